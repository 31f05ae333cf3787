//! Core domain types and shared logic for the silo chunk garbage collector.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Chunk hashes (opaque content-hash identifiers)
//! - Reference edges and their source kinds
//! - Metadata store configuration
//! - Serialization-conflict retry policy

pub mod chunk;
pub mod config;
pub mod error;
pub mod reference;

pub use chunk::ChunkHash;
pub use config::{MetadataConfig, PgSslMode, RetryConfig};
pub use error::{Error, Result};
pub use reference::{Reference, SourceKind};
