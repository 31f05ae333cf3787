//! Chunk hash identifier.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An opaque content-hash identifier for an immutable chunk.
///
/// The collector never interprets the hash; it is whatever the producer's
/// chunking layer emits. Equality and ordering are plain byte comparison.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkHash(String);

impl ChunkHash {
    /// Wrap a hash string.
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    /// Borrow the hash as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into the underlying string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<String> for ChunkHash {
    fn from(hash: String) -> Self {
        Self(hash)
    }
}

impl From<&str> for ChunkHash {
    fn from(hash: &str) -> Self {
        Self(hash.to_string())
    }
}

impl fmt::Debug for ChunkHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.len() > 16 {
            write!(f, "ChunkHash({})", &self.0[..16])
        } else {
            write!(f, "ChunkHash({})", self.0)
        }
    }
}

impl fmt::Display for ChunkHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
