use igminer_db::StorageError;
use igminer_scraper::AuthError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollectError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("no valid session: {0}")]
    SessionUnavailable(String),

    #[error("checkpoint I/O on {path}: {source}")]
    CheckpointIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("checkpoint {path} is corrupt: {source}")]
    CheckpointParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("pid file {path}: {reason}")]
    PidFile { path: String, reason: String },
}
