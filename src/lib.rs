//! libstudy library
//!
//! Caching and introspection for installed Node.js libraries: a TTL and size
//! bounded persistent cache, a two-tier library resolver addressed by file
//! content hash, and a documentation response cache in front of an AI provider.

pub use crate::config::StudyConfig;
pub use crate::doc_engine::StudyEngine;
pub use crate::error::{ErrorCode, StudyError, StudyResult};

// Re-export commonly used dependencies for tests
pub use serde_json;

pub mod cache;
pub mod config;
pub mod doc_engine;
pub mod error;
pub mod library;
