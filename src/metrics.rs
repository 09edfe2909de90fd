use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::summarization::{ChunkTiming, SummaryObserver};

/// Thread-safe counters describing pipeline activity.
#[derive(Default)]
pub struct PipelineMetrics {
    documents_processed: AtomicU64,
    documents_failed: AtomicU64,
    chunks_summarized: AtomicU64,
    merge_calls: AtomicU64,
}

impl PipelineMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a document that finished processing successfully.
    pub fn record_processed(&self) {
        self.documents_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a document whose processing failed.
    pub fn record_failed(&self) {
        self.documents_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_processed: self.documents_processed.load(Ordering::Relaxed),
            documents_failed: self.documents_failed.load(Ordering::Relaxed),
            chunks_summarized: self.chunks_summarized.load(Ordering::Relaxed),
            merge_calls: self.merge_calls.load(Ordering::Relaxed),
        }
    }
}

impl SummaryObserver for PipelineMetrics {
    fn chunk_summarized(&self, timing: &ChunkTiming) {
        self.chunks_summarized.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            chunk = timing.index,
            total = timing.total,
            chars = timing.chars,
            duration_ms = timing.duration.as_millis() as u64,
            "Chunk summarized"
        );
    }

    fn merge_completed(&self, parts: usize, duration: Duration) {
        self.merge_calls.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            parts,
            duration_ms = duration.as_millis() as u64,
            "Chunk summaries merged"
        );
    }
}

/// Immutable view of pipeline counters used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Documents processed successfully since startup.
    pub documents_processed: u64,
    /// Documents whose processing failed since startup.
    pub documents_failed: u64,
    /// Chunk summarization calls completed.
    pub chunks_summarized: u64,
    /// Merge calls completed.
    pub merge_calls: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_documents_and_summaries() {
        let metrics = PipelineMetrics::new();
        metrics.record_processed();
        metrics.record_processed();
        metrics.record_failed();
        for index in 1..=3 {
            metrics.chunk_summarized(&ChunkTiming {
                index,
                total: 3,
                chars: 100,
                duration: Duration::from_millis(5),
            });
        }
        metrics.merge_completed(3, Duration::from_millis(7));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.documents_processed, 2);
        assert_eq!(snapshot.documents_failed, 1);
        assert_eq!(snapshot.chunks_summarized, 3);
        assert_eq!(snapshot.merge_calls, 1);
    }

    #[test]
    fn snapshot_starts_empty() {
        let snapshot = PipelineMetrics::new().snapshot();
        assert_eq!(snapshot.documents_processed, 0);
        assert_eq!(snapshot.merge_calls, 0);
    }
}
