//! Qdrant-backed knowledge store.
//!
//! Fragments live in the configured collection with one cosine vector per point. Documents live
//! in a sibling `<collection>_documents` collection whose points carry a placeholder vector and
//! the document itself as payload.

mod client;
pub mod filters;
mod payload;
mod types;

pub use client::QdrantStore;
pub use filters::build_scope_filter;
