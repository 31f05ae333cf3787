//! Reference edges in the chunk graph.

use crate::chunk::ChunkHash;
use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kind of source a reference originates from.
///
/// The storage layer enforces this set, so an unknown kind can never reach
/// the reference table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// A parent chunk pointing at a child chunk (nested chunk graphs).
    Chunk,
    /// A transient pin held by an in-flight producer job.
    Job,
    /// A durable application-level reference (a commit, a fileset).
    Semantic,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chunk => "chunk",
            Self::Job => "job",
            Self::Semantic => "semantic",
        }
    }
}

impl FromStr for SourceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chunk" => Ok(Self::Chunk),
            "job" => Ok(Self::Job),
            "semantic" => Ok(Self::Semantic),
            other => Err(Error::InvalidSourceKind(other.to_string())),
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reference edge: a durable statement that `source` depends on `chunk`.
///
/// The triple (`source_kind`, `source`, `chunk`) is unique in the store;
/// adding an edge twice is a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    pub source_kind: SourceKind,
    pub source: String,
    pub chunk: ChunkHash,
}

impl Reference {
    /// An edge from a parent chunk to a child chunk.
    pub fn chunk(parent: impl Into<ChunkHash>, child: impl Into<ChunkHash>) -> Self {
        Self {
            source_kind: SourceKind::Chunk,
            source: parent.into().into_string(),
            chunk: child.into(),
        }
    }

    /// A transient pin held by a producer job.
    pub fn job(job_id: impl Into<String>, chunk: impl Into<ChunkHash>) -> Self {
        Self {
            source_kind: SourceKind::Job,
            source: job_id.into(),
            chunk: chunk.into(),
        }
    }

    /// A durable application-level reference.
    pub fn semantic(name: impl Into<String>, chunk: impl Into<ChunkHash>) -> Self {
        Self {
            source_kind: SourceKind::Semantic,
            source: name.into(),
            chunk: chunk.into(),
        }
    }
}
