//! PostgreSQL-based reference graph store.

use crate::error::{MetadataError, MetadataResult};
use crate::models::{ChunkRow, GraphStats, RefRow};
use crate::repos::{ChunkRepo, ReferenceRepo, dedup_hashes};
use crate::retry::with_serializable_retry;
use crate::store::MetadataStore;
use async_trait::async_trait;
use silo_core::config::PgSslMode;
use silo_core::{ChunkHash, Reference, RetryConfig};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode as SqlxPgSslMode};
use sqlx::{Pool, Postgres, Transaction};
use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;
use time::OffsetDateTime;

/// PostgreSQL schema (embedded).
const POSTGRES_SCHEMA: &str = include_str!("postgres_schema.sql");

fn postgres_schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                return None;
            }
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

/// Split references into the three parallel arrays `unnest` expects.
fn ref_columns(refs: &[Reference]) -> (Vec<String>, Vec<String>, Vec<String>) {
    let mut kinds = Vec::with_capacity(refs.len());
    let mut sources = Vec::with_capacity(refs.len());
    let mut chunks = Vec::with_capacity(refs.len());
    for r in refs {
        kinds.push(r.source_kind.as_str().to_string());
        sources.push(r.source.clone());
        chunks.push(r.chunk.as_str().to_string());
    }
    (kinds, sources, chunks)
}

fn into_chunk_hashes(hashes: Vec<String>) -> Vec<ChunkHash> {
    hashes.into_iter().map(ChunkHash::new).collect()
}

/// PostgreSQL-based reference graph store.
///
/// All graph mutations run at serializable isolation and are retried on
/// serialization conflict; this is the production engine for many producer
/// processes sharing one graph.
pub struct PostgresStore {
    pool: Pool<Postgres>,
    retry: RetryConfig,
}

impl PostgresStore {
    /// Create a new PostgreSQL store from a connection URL.
    pub async fn from_url(
        url: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let opts = PgConnectOptions::from_str(url)?;
        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    /// Create a new PostgreSQL store from individual connection parameters.
    ///
    /// This allows credentials to be passed separately, enabling better
    /// secret management (e.g., passwords via environment variables).
    #[allow(clippy::too_many_arguments)]
    pub async fn from_params(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        database: &str,
        ssl_mode: Option<PgSslMode>,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let mut opts = PgConnectOptions::new()
            .host(host)
            .port(port)
            .database(database);

        if let Some(user) = username {
            opts = opts.username(user);
        }

        if let Some(pass) = password {
            opts = opts.password(pass);
        }

        if let Some(mode) = ssl_mode {
            let sqlx_mode = match mode {
                PgSslMode::Disable => SqlxPgSslMode::Disable,
                PgSslMode::Prefer => SqlxPgSslMode::Prefer,
                PgSslMode::Require => SqlxPgSslMode::Require,
            };
            opts = opts.ssl_mode(sqlx_mode);
        }

        // Log connection info without password
        tracing::info!(
            host = host,
            port = port,
            database = database,
            username = username.unwrap_or("<none>"),
            ssl_mode = ?ssl_mode,
            "Connecting to PostgreSQL reference graph store"
        );

        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    /// Override the serialization-conflict retry policy.
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn connect(
        mut opts: PgConnectOptions,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        // statement_timeout bounds how long a wedged graph query can hold a
        // pooled connection hostage.
        if let Some(timeout_ms) = statement_timeout_ms {
            opts = opts.options([("statement_timeout", format!("{}ms", timeout_ms))]);
            tracing::info!("PostgreSQL statement_timeout set to {}ms", timeout_ms);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        let store = Self {
            pool,
            retry: RetryConfig::default(),
        };
        store.migrate().await?;

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }

    async fn begin_serializable(&self) -> MetadataResult<Transaction<'_, Postgres>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }

    async fn try_reserve(&self, job_id: &str, hashes: &[String]) -> MetadataResult<Vec<String>> {
        let mut tx = self.begin_serializable().await?;

        // The no-op conflict update keeps every requested row in RETURNING
        // (DO NOTHING would drop the pre-existing ones) and takes the row
        // locks that serialize racing reservations of the same chunk.
        let resurrection_candidates: Vec<String> = sqlx::query_scalar(
            r#"
            WITH requested AS (
                SELECT chunk_hash FROM unnest($2::text[]) AS t(chunk_hash)
            ),
            upserted AS (
                INSERT INTO chunks (chunk_hash)
                SELECT chunk_hash FROM requested
                ON CONFLICT (chunk_hash) DO UPDATE SET chunk_hash = excluded.chunk_hash
                RETURNING chunk_hash, deleting_at
            ),
            pinned AS (
                INSERT INTO refs (source_type, source, chunk_hash)
                SELECT 'job'::ref_kind, $1, chunk_hash
                FROM upserted
                WHERE deleting_at IS NULL
                ON CONFLICT DO NOTHING
            )
            SELECT chunk_hash FROM upserted WHERE deleting_at IS NOT NULL
            "#,
        )
        .bind(job_id)
        .bind(hashes)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(resurrection_candidates)
    }

    async fn try_update(
        &self,
        add: &(Vec<String>, Vec<String>, Vec<String>),
        remove: &(Vec<String>, Vec<String>, Vec<String>),
        release_jobs: &[String],
    ) -> MetadataResult<Vec<String>> {
        let mut tx = self.begin_serializable().await?;

        if !add.2.is_empty() {
            Self::check_add_targets(&mut tx, &add.2).await?;

            sqlx::query(
                r#"
                INSERT INTO refs (source_type, source, chunk_hash)
                SELECT t.kind::ref_kind, t.source, t.chunk_hash
                FROM unnest($1::text[], $2::text[], $3::text[]) AS t(kind, source, chunk_hash)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(&add.0)
            .bind(&add.1)
            .bind(&add.2)
            .execute(&mut *tx)
            .await?;
        }

        // Composite deletion, collection count, and deleting stamp in one
        // statement. All reads inside it see the pre-statement snapshot, so
        // the remaining count is (count before deletion) - (edges deleted);
        // the adds above live in earlier statements of this transaction and
        // are therefore already counted.
        let collection_candidates: Vec<String> = sqlx::query_scalar(
            r#"
            WITH removal AS (
                SELECT t.kind::ref_kind AS source_type, t.source, t.chunk_hash
                FROM unnest($1::text[], $2::text[], $3::text[]) AS t(kind, source, chunk_hash)
            ),
            released AS (
                SELECT source FROM unnest($4::text[]) AS t(source)
            ),
            deleted AS (
                DELETE FROM refs
                WHERE (source_type, source, chunk_hash)
                      IN (SELECT source_type, source, chunk_hash FROM removal)
                   OR (source_type = 'job' AND source IN (SELECT source FROM released))
                RETURNING chunk_hash
            ),
            remaining AS (
                SELECT d.chunk_hash,
                       (SELECT count(*) FROM refs r WHERE r.chunk_hash = d.chunk_hash)
                           - d.removed AS live
                FROM (SELECT chunk_hash, count(*) AS removed FROM deleted GROUP BY chunk_hash) AS d
            )
            UPDATE chunks
            SET deleting_at = now()
            FROM remaining
            WHERE chunks.chunk_hash = remaining.chunk_hash
              AND remaining.live = 0
              AND chunks.deleting_at IS NULL
            RETURNING chunks.chunk_hash
            "#,
        )
        .bind(&remove.0)
        .bind(&remove.1)
        .bind(&remove.2)
        .bind(release_jobs)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(collection_candidates)
    }

    /// Refuse adds whose target chunk is missing or scheduled for deletion,
    /// before anything is persisted. Deleting targets must go through the
    /// reservation handshake instead; refusing here catches the protocol
    /// violation at its source.
    async fn check_add_targets(
        tx: &mut Transaction<'_, Postgres>,
        targets: &[String],
    ) -> MetadataResult<()> {
        let rows: Vec<(String, Option<OffsetDateTime>)> =
            sqlx::query_as("SELECT chunk_hash, deleting_at FROM chunks WHERE chunk_hash = ANY($1)")
                .bind(targets)
                .fetch_all(&mut **tx)
                .await?;
        let found: HashMap<&str, bool> = rows
            .iter()
            .map(|(hash, deleting_at)| (hash.as_str(), deleting_at.is_some()))
            .collect();

        let missing: BTreeSet<&str> = targets
            .iter()
            .map(String::as_str)
            .filter(|t| !found.contains_key(t))
            .collect();
        if !missing.is_empty() {
            return Err(MetadataError::MissingChunks {
                chunks: missing.into_iter().map(String::from).collect(),
            });
        }

        let deleting: BTreeSet<&str> = targets
            .iter()
            .map(String::as_str)
            .filter(|t| found.get(t).copied().unwrap_or(false))
            .collect();
        if !deleting.is_empty() {
            return Err(MetadataError::ReferenceToDeletingChunks {
                chunks: deleting.into_iter().map(String::from).collect(),
            });
        }

        Ok(())
    }

    async fn try_resurrect(&self, job_id: &str, hashes: &[String]) -> MetadataResult<()> {
        let mut tx = self.begin_serializable().await?;

        let revived: Vec<String> = sqlx::query_scalar(
            r#"
            WITH requested AS (
                SELECT chunk_hash FROM unnest($2::text[]) AS t(chunk_hash)
            ),
            revived AS (
                UPDATE chunks
                SET deleting_at = NULL
                WHERE chunk_hash IN (SELECT chunk_hash FROM requested)
                RETURNING chunk_hash
            ),
            pinned AS (
                INSERT INTO refs (source_type, source, chunk_hash)
                SELECT 'job'::ref_kind, $1, chunk_hash FROM revived
                ON CONFLICT DO NOTHING
            )
            SELECT chunk_hash FROM revived
            "#,
        )
        .bind(job_id)
        .bind(hashes)
        .fetch_all(&mut *tx)
        .await?;

        if revived.len() != hashes.len() {
            let revived: BTreeSet<&str> = revived.iter().map(String::as_str).collect();
            let lost: Vec<String> = hashes
                .iter()
                .filter(|h| !revived.contains(h.as_str()))
                .cloned()
                .collect();
            // Dropping the transaction rolls back the partial revive.
            return Err(MetadataError::ResurrectionLost { chunks: lost });
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for PostgresStore {
    async fn migrate(&self) -> MetadataResult<()> {
        // CREATE TYPE has no IF NOT EXISTS form; the guard absorbs the
        // duplicate_object race when two processes migrate at once. Runs as
        // one statement so it survives the schema splitter below.
        sqlx::query(
            "DO $$ BEGIN \
                CREATE TYPE ref_kind AS ENUM ('chunk', 'job', 'semantic'); \
             EXCEPTION WHEN duplicate_object THEN NULL; \
             END $$",
        )
        .execute(&self.pool)
        .await?;

        // PostgreSQL doesn't allow multiple statements in a single prepared
        // statement, so we split the schema and execute each statement
        // separately.
        for statement in postgres_schema_statements(POSTGRES_SCHEMA) {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl ReferenceRepo for PostgresStore {
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
        Ok(into_chunk_hashes(candidates))
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
        let add_cols = ref_columns(add);
        let remove_cols = ref_columns(remove);
        let candidates = with_serializable_retry(&self.retry, "update_references", || {
            self.try_update(&add_cols, &remove_cols, release_jobs)
        })
        .await?;
        Ok(into_chunk_hashes(candidates))
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
impl ChunkRepo for PostgresStore {
    async fn get_chunk(&self, chunk: &ChunkHash) -> MetadataResult<Option<ChunkRow>> {
        let row = sqlx::query_as::<_, ChunkRow>(
            "SELECT chunk_hash, deleting_at FROM chunks WHERE chunk_hash = $1",
        )
        .bind(chunk.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_refs_to(&self, chunk: &ChunkHash) -> MetadataResult<Vec<RefRow>> {
        let rows = sqlx::query_as::<_, RefRow>(
            "SELECT source_type::text AS source_type, source, chunk_hash \
             FROM refs WHERE chunk_hash = $1 ORDER BY source_type, source",
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
             WHERE deleting_at IS NOT NULL AND deleting_at < $1 \
             ORDER BY deleting_at LIMIT $2",
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
        let hashes = dedup_hashes(chunks);
        // Guarded so a resurrection that raced the flusher confirmation wins.
        let result = sqlx::query(
            "DELETE FROM chunks \
             WHERE chunk_hash = ANY($1) \
               AND deleting_at IS NOT NULL \
               AND NOT EXISTS (SELECT 1 FROM refs WHERE refs.chunk_hash = chunks.chunk_hash)",
        )
        .bind(&hashes)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
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
