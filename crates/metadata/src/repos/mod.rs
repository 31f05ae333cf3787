//! Repository traits for reference graph operations.

pub mod chunks;
pub mod refs;

pub use chunks::ChunkRepo;
pub use refs::ReferenceRepo;

use silo_core::ChunkHash;
use std::collections::BTreeSet;

/// Dedup a hash list into bind-ready strings, preserving first-seen order.
pub(crate) fn dedup_hashes(chunks: &[ChunkHash]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    chunks
        .iter()
        .filter(|c| seen.insert(c.as_str()))
        .map(|c| c.as_str().to_string())
        .collect()
}
