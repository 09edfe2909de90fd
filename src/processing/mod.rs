//! Document pipeline: registry, chunking, context budgeting, and orchestration.

pub mod chunking;
pub mod combine;
pub mod context;
pub mod persist;
pub mod registry;
mod service;
pub mod types;

pub use registry::{DocType, Document, DocumentRegistry, DocumentStatus, ProcessedData};
pub use service::{PipelineComponents, ProcessingApi, ProcessingService};
pub use types::{
    ChunkingError, PipelineError, ProcessOptions, ProcessingOutcome, QueryAnswer,
};
