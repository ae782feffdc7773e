//! Resolves flags, environment and the settings file into what the command
//! handlers need: storage settings, credential sources and a session.

use std::path::PathBuf;

use anyhow::Context as _;
use igminer_core::{load_settings, AppConfig, Settings, StorageSettings};
use igminer_scraper::{
    CommandCredentialSource, CredentialSource, FileCredentialSource, RefreshingCredentialSource,
    SessionContext,
};

use crate::GlobalArgs;

pub(crate) struct Context {
    pub(crate) config: AppConfig,
    pub(crate) settings: Settings,
    pub(crate) storage: StorageSettings,
    pub(crate) cookies: PathBuf,
    pub(crate) checkpoint: PathBuf,
}

impl Context {
    pub(crate) fn from_args(global: &GlobalArgs, config: AppConfig) -> anyhow::Result<Self> {
        let settings = match &global.config {
            Some(path) => load_settings(path)
                .with_context(|| format!("failed to load settings from {}", path.display()))?,
            None => Settings::default(),
        };
        let storage = storage_settings(settings.storage.clone(), global);

        Ok(Self {
            config,
            settings,
            storage,
            cookies: global.cookies.clone(),
            checkpoint: global.checkpoint.clone(),
        })
    }

    /// The cookie file, re-extracted through the cookie command when one is
    /// configured.
    pub(crate) fn credential_source(&self) -> RefreshingCredentialSource {
        let extractor = self
            .config
            .cookie_command
            .as_ref()
            .map(|cmd| Box::new(CommandCredentialSource::new(cmd.clone())) as Box<dyn CredentialSource>);
        RefreshingCredentialSource::new(extractor, &self.cookies)
    }

    /// Session from the cookie file, falling back to `fallback` when the
    /// file is missing or unusable.
    pub(crate) async fn load_session(
        &self,
        fallback: &dyn CredentialSource,
    ) -> anyhow::Result<SessionContext> {
        let file = FileCredentialSource::new(&self.cookies);
        let credentials = match file.obtain().await {
            Ok(credentials) => credentials,
            Err(e) => {
                tracing::warn!(error = %e, "cookie file unusable, trying {}", fallback.describe());
                fallback.obtain().await.with_context(|| {
                    format!(
                        "no usable session: run `igminer auth` or fix {}",
                        self.cookies.display()
                    )
                })?
            }
        };
        let max_age = chrono::Duration::days(self.config.session_max_age_days);
        let session = SessionContext::new(credentials, max_age)?;
        tracing::info!(session = %session.session_hint(), "session loaded");
        Ok(session)
    }
}

/// Overlay the storage flags on the settings-file values.
pub(crate) fn storage_settings(mut base: StorageSettings, global: &GlobalArgs) -> StorageSettings {
    if let Some(kind) = global.storage {
        base.backend = kind.into();
    }
    if let Some(db) = &global.db {
        base.db_path.clone_from(db);
    }
    if let Some(dir) = &global.output_dir {
        base.output_dir.clone_from(dir);
    }
    let overlay = |current: &mut Option<String>, flag: &Option<String>| {
        if flag.is_some() {
            current.clone_from(flag);
        }
    };
    overlay(&mut base.hosted_url, &global.hosted_url);
    overlay(&mut base.hosted_key, &global.hosted_key);
    overlay(&mut base.hosted_schema, &global.hosted_schema);
    overlay(&mut base.hosted_bucket, &global.hosted_bucket);
    base
}

/// Strip a leading `#` and lowercase; empty tags are dropped.
pub(crate) fn normalize_hashtags(tags: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim().trim_start_matches('#').to_lowercase();
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}
