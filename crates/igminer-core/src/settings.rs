use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Travel hashtags cycled by the daemon when no list is configured.
pub const DEFAULT_HASHTAGS: &[&str] = &[
    "beijing",
    "shanghai",
    "chengdu",
    "xian",
    "guilin",
    "chongqing",
    "hangzhou",
    "guangzhou",
    "shenzhen",
    "suzhou",
    "nanjing",
    "kunming",
    "lijiang",
    "zhangjiajie",
    "harbin",
    "qingdao",
    "xiamen",
    "dalian",
    "wuhan",
    "sanya",
    "luoyang",
    "dali",
    "yangshuo",
    "huangshan",
    "lhasa",
    "pingyao",
    "fenghuang",
    "dunhuang",
    "travelchina",
    "chinatravel",
    "visitchina",
    "chinatrip",
    "explorechina",
    "discoverchina",
    "beautifulchina",
    "amazingchina",
    "chinesefood",
    "chineseculture",
    "chinesearchitecture",
    "greatwallofchina",
    "forbiddencity",
    "terracottawarriors",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Sqlite,
    Json,
    Hosted,
}

impl std::fmt::Display for StorageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageKind::Sqlite => write!(f, "sqlite"),
            StorageKind::Json => write!(f, "json"),
            StorageKind::Hosted => write!(f, "hosted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub backend: StorageKind,
    pub db_path: PathBuf,
    pub output_dir: PathBuf,
    pub hosted_url: Option<String>,
    pub hosted_key: Option<String>,
    pub hosted_schema: Option<String>,
    pub hosted_bucket: Option<String>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageKind::Sqlite,
            db_path: PathBuf::from("igminer.db"),
            output_dir: PathBuf::from("output"),
            hosted_url: None,
            hosted_key: None,
            hosted_schema: None,
            hosted_bucket: None,
        }
    }
}

/// Contents of the optional YAML settings file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub hashtags: Vec<String>,
    pub storage: StorageSettings,
}

impl Settings {
    /// Configured hashtags, or [`DEFAULT_HASHTAGS`] when the list is empty.
    #[must_use]
    pub fn daemon_hashtags(&self) -> Vec<String> {
        if self.hashtags.is_empty() {
            DEFAULT_HASHTAGS.iter().map(|t| (*t).to_string()).collect()
        } else {
            self.hashtags.clone()
        }
    }
}

/// Load and validate the settings file.
///
/// Hashtags are normalized (leading `#` removed, lowercased) before the
/// duplicate check.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed, or fails validation.
pub fn load_settings(path: &Path) -> Result<Settings, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::SettingsFileIo {
        path: path.display().to_string(),
        source: e,
    })?;

    let mut settings: Settings =
        serde_yaml::from_str(&content).map_err(ConfigError::SettingsFileParse)?;

    settings.hashtags = settings
        .hashtags
        .iter()
        .map(|t| t.trim().trim_start_matches('#').to_lowercase())
        .collect();

    validate_settings(&settings)?;

    Ok(settings)
}

fn validate_settings(settings: &Settings) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for tag in &settings.hashtags {
        if tag.is_empty() {
            return Err(ConfigError::Validation(
                "hashtag entries must be non-empty".to_string(),
            ));
        }
        if !tag.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return Err(ConfigError::Validation(format!(
                "hashtag '{tag}' contains characters other than letters, digits, or '_'"
            )));
        }
        if !seen.insert(tag.as_str()) {
            return Err(ConfigError::Validation(format!("duplicate hashtag: '{tag}'")));
        }
    }

    Ok(())
}
