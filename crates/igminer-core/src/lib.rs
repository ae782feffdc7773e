pub mod app_config;
pub mod checkpoint;
pub mod config;
pub mod entities;
pub mod settings;
pub mod targets;

pub use app_config::{AppConfig, DelayRange};
pub use checkpoint::ProgressCheckpoint;
pub use config::{load_app_config, load_app_config_from_env};
pub use entities::{Comment, Post, UserProfile};
pub use settings::{load_settings, Settings, StorageKind, StorageSettings, DEFAULT_HASHTAGS};
pub use targets::{CollectionTarget, TargetKind};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },

    #[error("failed to read settings file {path}: {source}")]
    SettingsFileIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings file: {0}")]
    SettingsFileParse(#[from] serde_yaml::Error),

    #[error("settings validation failed: {0}")]
    Validation(String),
}
