//! Reference graph store for the silo chunk garbage collector.
//!
//! This crate owns the control-plane data model:
//! - Chunk lifecycle rows (`deleting_at` scheduling mark)
//! - Reference edges keyed by (source kind, source, chunk)
//! - The transactional reserve / update / resurrect operations
//! - Serialization-conflict retry with bounded backoff

pub mod error;
pub mod models;
pub mod postgres;
pub mod repos;
pub mod store;

mod retry;

pub use error::{MetadataError, MetadataResult};
pub use postgres::PostgresStore;
pub use repos::{ChunkRepo, ReferenceRepo};
pub use store::{MetadataStore, SqliteStore};

use silo_core::config::MetadataConfig;
use std::sync::Arc;

/// Create a reference graph store from configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn MetadataStore>> {
    if let Err(reason) = config.validate() {
        return Err(MetadataError::Config(reason));
    }
    match config {
        MetadataConfig::Sqlite { path } => {
            let store = SqliteStore::new(path).await?;
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
        MetadataConfig::Postgres {
            url,
            host,
            port,
            username,
            password,
            database,
            ssl_mode,
            max_connections,
            statement_timeout_ms,
        } => {
            let store = if let Some(url) = url {
                // URL takes precedence when both forms are present
                tracing::info!("Connecting to PostgreSQL using connection URL");
                PostgresStore::from_url(url, *max_connections, *statement_timeout_ms).await?
            } else if let (Some(host), Some(database)) = (host.as_ref(), database.as_ref()) {
                PostgresStore::from_params(
                    host,
                    port.unwrap_or(5432),
                    username.as_deref(),
                    password.as_deref(),
                    database,
                    *ssl_mode,
                    *max_connections,
                    *statement_timeout_ms,
                )
                .await?
            } else {
                return Err(MetadataError::Config(
                    "postgres config requires either 'url' or 'host' + 'database'".to_string(),
                ));
            };
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
    }
}
