//! Reference graph store trait and SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::models::{ChunkRow, GraphStats, RefRow};
use crate::repos::{ChunkRepo, ReferenceRepo, dedup_hashes};
use crate::retry::with_serializable_retry;
use async_trait::async_trait;
use silo_core::{ChunkHash, Reference, RetryConfig};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use time::OffsetDateTime;

/// SQLite schema (embedded).
const SCHEMA_SQL: &str = include_str!("sqlite_schema.sql");

/// Combined reference graph store trait.
///
/// The metadata store exclusively owns the graph's truth; everything the
/// collector keeps in memory is derived and may be discarded.
#[async_trait]
pub trait MetadataStore: ReferenceRepo + ChunkRepo + Send + Sync {
    /// Run database migrations. Idempotent: safe against an
    /// already-initialized database.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based reference graph store.
///
/// SQLite funnels all writers through one connection, which makes every
/// transaction trivially serializable but also means this engine cannot
/// exercise cross-process contention. Intended for tests and single-process
/// deployments; use [`crate::PostgresStore`] in production.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    retry: RetryConfig,
}

impl SqliteStore {
    /// Create a new SQLite store.
    pub async fn new(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| MetadataError::Config(format!("cannot create {parent:?}: {e}")))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // SQLite permits limited write concurrency; a single connection
            // avoids persistent "database is locked" failures under test
            // concurrency and makes every transaction serializable.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self {
            pool,
            retry: RetryConfig::default(),
        };
        store.migrate().await?;

        Ok(store)
    }

    /// Override the serialization-conflict retry policy.
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    async fn try_reserve(&self, job_id: &str, hashes: &[String]) -> MetadataResult<Vec<String>> {
        let mut tx = self.pool.begin().await?;

        let mut resurrection_candidates = Vec::new();
        for hash in hashes {
            sqlx::query("INSERT INTO chunks (chunk_hash) VALUES (?) ON CONFLICT (chunk_hash) DO NOTHING")
                .bind(hash)
                .execute(&mut *tx)
                .await?;

            let deleting_at: Option<OffsetDateTime> =
                sqlx::query_scalar("SELECT deleting_at FROM chunks WHERE chunk_hash = ?")
                    .bind(hash)
                    .fetch_one(&mut *tx)
                    .await?;

            if deleting_at.is_none() {
                sqlx::query(
                    "INSERT INTO refs (source_type, source, chunk_hash) VALUES ('job', ?, ?) \
                     ON CONFLICT DO NOTHING",
                )
                .bind(job_id)
                .bind(hash)
                .execute(&mut *tx)
                .await?;
            } else {
                // A reference over a deleting chunk would let the deletion
                // escape detection; the caller must flush first.
                resurrection_candidates.push(hash.clone());
            }
        }

        tx.commit().await?;
        Ok(resurrection_candidates)
    }

    async fn try_update(
        &self,
        add: &[Reference],
        remove: &[Reference],
        release_jobs: &[String],
    ) -> MetadataResult<Vec<String>> {
        let mut tx = self.pool.begin().await?;

        if !add.is_empty() {
            let targets: BTreeSet<&str> = add.iter().map(|r| r.chunk.as_str()).collect();
            let mut missing = Vec::new();
            let mut deleting = Vec::new();
            for target in targets {
                let row: Option<Option<OffsetDateTime>> =
                    sqlx::query_scalar("SELECT deleting_at FROM chunks WHERE chunk_hash = ?")
                        .bind(target)
                        .fetch_optional(&mut *tx)
                        .await?;
                match row {
                    None => missing.push(target.to_string()),
                    Some(Some(_)) => deleting.push(target.to_string()),
                    Some(None) => {}
                }
            }
            if !missing.is_empty() {
                return Err(MetadataError::MissingChunks { chunks: missing });
            }
            if !deleting.is_empty() {
                return Err(MetadataError::ReferenceToDeletingChunks { chunks: deleting });
            }

            for edge in add {
                sqlx::query(
                    "INSERT INTO refs (source_type, source, chunk_hash) VALUES (?, ?, ?) \
                     ON CONFLICT DO NOTHING",
                )
                .bind(edge.source_kind.as_str())
                .bind(&edge.source)
                .bind(edge.chunk.as_str())
                .execute(&mut *tx)
                .await?;
            }
        }

        // Adds are in place; now delete removal edges and released jobs,
        // tracking every chunk that lost at least one edge.
        let mut touched = BTreeSet::new();
        for edge in remove {
            let result = sqlx::query(
                "DELETE FROM refs WHERE source_type = ? AND source = ? AND chunk_hash = ?",
            )
            .bind(edge.source_kind.as_str())
            .bind(&edge.source)
            .bind(edge.chunk.as_str())
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() > 0 {
                touched.insert(edge.chunk.as_str().to_string());
            }
        }
        for job in release_jobs {
            let unpinned: Vec<String> = sqlx::query_scalar(
                "DELETE FROM refs WHERE source_type = 'job' AND source = ? RETURNING chunk_hash",
            )
            .bind(job)
            .fetch_all(&mut *tx)
            .await?;
            touched.extend(unpinned);
        }

        let now = OffsetDateTime::now_utc();
        let mut collection_candidates = Vec::new();
        for hash in touched {
            let live: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM refs WHERE chunk_hash = ?")
                .bind(&hash)
                .fetch_one(&mut *tx)
                .await?;
            if live == 0 {
                // Already-deleting chunks keep their original stamp.
                let result = sqlx::query(
                    "UPDATE chunks SET deleting_at = ? WHERE chunk_hash = ? AND deleting_at IS NULL",
                )
                .bind(now)
                .bind(&hash)
                .execute(&mut *tx)
                .await?;
                if result.rows_affected() > 0 {
                    collection_candidates.push(hash);
                }
            }
        }

        tx.commit().await?;
        Ok(collection_candidates)
    }

    async fn try_resurrect(&self, job_id: &str, hashes: &[String]) -> MetadataResult<()> {
        let mut tx = self.pool.begin().await?;

        let mut lost = Vec::new();
        for hash in hashes {
            let result = sqlx::query("UPDATE chunks SET deleting_at = NULL WHERE chunk_hash = ?")
                .bind(hash)
                .execute(&mut *tx)
                .await?;
            if result.rows_affected() == 0 {
                lost.push(hash.clone());
                continue;
            }
            sqlx::query(
                "INSERT INTO refs (source_type, source, chunk_hash) VALUES ('job', ?, ?) \
                 ON CONFLICT DO NOTHING",
            )
            .bind(job_id)
            .bind(hash)
            .execute(&mut *tx)
            .await?;
        }

        if !lost.is_empty() {
            // Dropping the transaction rolls back the partial revive.
            return Err(MetadataError::ResurrectionLost { chunks: lost });
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl ReferenceRepo for SqliteStore {
    async fn reserve_chunks(
        &self,
        job_id: &str,
        chunks: &[ChunkHash],
    ) -> MetadataResult<Vec<ChunkHash>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }
        let hashes = dedup_hashes(chunks);
        let candidates = with_serializable_retry(&self.retry, "reserve_chunks", || {
            self.try_reserve(job_id, &hashes)
        })
        .await?;
        Ok(candidates.into_iter().map(ChunkHash::new).collect())
    }

    async fn update_references(
        &self,
        add: &[Reference],
        remove: &[Reference],
        release_jobs: &[String],
    ) -> MetadataResult<Vec<ChunkHash>> {
        if add.is_empty() && remove.is_empty() && release_jobs.is_empty() {
            return Ok(Vec::new());
        }
        let candidates = with_serializable_retry(&self.retry, "update_references", || {
            self.try_update(add, remove, release_jobs)
        })
        .await?;
        Ok(candidates.into_iter().map(ChunkHash::new).collect())
    }

    async fn resurrect_chunks(&self, job_id: &str, chunks: &[ChunkHash]) -> MetadataResult<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let hashes = dedup_hashes(chunks);
        with_serializable_retry(&self.retry, "resurrect_chunks", || {
            self.try_resurrect(job_id, &hashes)
        })
        .await
    }
}

#[async_trait]
impl ChunkRepo for SqliteStore {
    async fn get_chunk(&self, chunk: &ChunkHash) -> MetadataResult<Option<ChunkRow>> {
        let row = sqlx::query_as::<_, ChunkRow>(
            "SELECT chunk_hash, deleting_at FROM chunks WHERE chunk_hash = ?",
        )
        .bind(chunk.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_refs_to(&self, chunk: &ChunkHash) -> MetadataResult<Vec<RefRow>> {
        let rows = sqlx::query_as::<_, RefRow>(
            "SELECT source_type, source, chunk_hash FROM refs WHERE chunk_hash = ? \
             ORDER BY source_type, source",
        )
        .bind(chunk.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_deleting_chunks(
        &self,
        older_than: OffsetDateTime,
        limit: u32,
    ) -> MetadataResult<Vec<ChunkRow>> {
        let rows = sqlx::query_as::<_, ChunkRow>(
            "SELECT chunk_hash, deleting_at FROM chunks \
             WHERE deleting_at IS NOT NULL AND deleting_at < ? \
             ORDER BY deleting_at LIMIT ?",
        )
        .bind(older_than)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn purge_chunks(&self, chunks: &[ChunkHash]) -> MetadataResult<u64> {
        if chunks.is_empty() {
            return Ok(0);
        }
        let mut purged = 0;
        for hash in dedup_hashes(chunks) {
            // Guarded so a resurrection that raced the flusher confirmation wins.
            let result = sqlx::query(
                "DELETE FROM chunks \
                 WHERE chunk_hash = ? \
                   AND deleting_at IS NOT NULL \
                   AND NOT EXISTS (SELECT 1 FROM refs WHERE refs.chunk_hash = chunks.chunk_hash)",
            )
            .bind(&hash)
            .execute(&self.pool)
            .await?;
            purged += result.rows_affected();
        }
        Ok(purged)
    }

    async fn stats(&self) -> MetadataResult<GraphStats> {
        let chunk_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        let deleting_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE deleting_at IS NOT NULL")
                .fetch_one(&self.pool)
                .await?;
        let ref_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM refs")
            .fetch_one(&self.pool)
            .await?;

        Ok(GraphStats {
            chunk_count: chunk_count as u64,
            deleting_count: deleting_count as u64,
            ref_count: ref_count as u64,
        })
    }
}
