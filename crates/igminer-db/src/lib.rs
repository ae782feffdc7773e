//! Storage port and its backends.

pub mod hosted;
pub mod json;
pub mod sqlite;
mod storage;

use std::path::Path;

use igminer_core::{StorageKind, StorageSettings};
use thiserror::Error;

pub use hosted::{HostedConfig, HostedStore};
pub use json::JsonStore;
pub use sqlite::SqliteStore;
pub use storage::{PostNeedingComments, Storage, StorageStats, UpsertOutcome};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error for {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("hosted backend returned HTTP {status} for {resource}: {body}")]
    Hosted {
        status: u16,
        resource: String,
        body: String,
    },

    #[error("storage misconfigured: {0}")]
    Config(String),
}

impl StorageError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Open the backend selected by `settings`.
///
/// # Errors
///
/// Returns [`StorageError`] if the backend cannot be opened, or
/// [`StorageError::Config`] when hosted storage lacks a URL or key.
pub async fn open_storage(settings: &StorageSettings) -> Result<Box<dyn Storage>, StorageError> {
    let storage: Box<dyn Storage> = match settings.backend {
        StorageKind::Sqlite => Box::new(SqliteStore::open(&settings.db_path).await?),
        StorageKind::Json => Box::new(JsonStore::open(&settings.output_dir).await?),
        StorageKind::Hosted => {
            let (Some(url), Some(key)) = (&settings.hosted_url, &settings.hosted_key) else {
                return Err(StorageError::Config(
                    "hosted storage requires a URL and a key".to_string(),
                ));
            };
            Box::new(HostedStore::new(HostedConfig {
                url: url.clone(),
                key: key.clone(),
                schema: settings
                    .hosted_schema
                    .clone()
                    .unwrap_or_else(|| "public".to_string()),
                bucket: settings.hosted_bucket.clone(),
            })?)
        }
    };
    tracing::info!(backend = storage.name(), "storage opened");
    Ok(storage)
}
