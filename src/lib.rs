#![deny(missing_docs)]

//! Core library for Rusty Knowledge: contextual document ingestion and vector retrieval.

/// HTTP routing and REST handlers.
pub mod api;
/// Environment-driven configuration management.
pub mod config;
/// Directory walking and bulk document submission.
pub mod docs_loader;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Text-generation client abstraction and adapters.
pub mod generation;
/// Chunking, contextual enrichment, embedding and fragment persistence.
pub mod ingestion;
/// Structured logging and tracing setup.
pub mod logging;
/// Ingestion metrics helpers.
pub mod metrics;
/// Knowledge service: admission, deduplication and retrieval.
pub mod service;
/// Document and fragment stores.
pub mod store;

mod provider;
