#![deny(missing_docs)]

//! Core library for ParseNote: document extraction, chunked summarization, and cross-document
//! question answering.

/// HTTP routing and REST handlers.
pub mod api;
/// Environment-driven configuration management.
pub mod config;
/// Text and image extraction from PDFs.
pub mod extraction;
/// Structured logging and tracing setup.
pub mod logging;
/// Pipeline metrics helpers.
pub mod metrics;
/// OCR collaborator client.
pub mod ocr;
/// Document pipeline: registry, chunking, context budgeting, and orchestration.
pub mod processing;
/// Bounded retry with exponential backoff for remote calls.
pub mod retry;
/// Summarization backends and chunk-and-merge orchestration.
pub mod summarization;
