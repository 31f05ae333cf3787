//! Database models mapping to the reference graph schema.

use sqlx::FromRow;
use time::OffsetDateTime;

/// Chunk lifecycle record.
///
/// `deleting_at` set means the chunk has been scheduled for deletion and must
/// not be referenced without a resurrection handshake.
#[derive(Debug, Clone, FromRow)]
pub struct ChunkRow {
    pub chunk_hash: String,
    pub deleting_at: Option<OffsetDateTime>,
}

/// Reference edge record.
#[derive(Debug, Clone, FromRow)]
pub struct RefRow {
    pub source_type: String,
    pub source: String,
    pub chunk_hash: String,
}

/// Aggregate reference graph statistics.
#[derive(Debug, Clone, Default)]
pub struct GraphStats {
    /// Total number of chunk rows.
    pub chunk_count: u64,
    /// Chunk rows currently scheduled for deletion.
    pub deleting_count: u64,
    /// Total number of reference edges.
    pub ref_count: u64,
}
