use std::path::Path;

use anyhow::Context as _;
use igminer_core::AppConfig;
use igminer_scraper::{
    CommandCredentialSource, CredentialSource, FileCredentialSource, RefreshingCredentialSource,
    SessionContext,
};

/// Extract fresh cookies and persist them to `cookies`.
///
/// # Errors
///
/// Returns an error when no extraction source is configured, the source
/// fails, or the extracted bundle has no session id.
pub(crate) async fn run_auth(
    config: &AppConfig,
    cookies: &Path,
    from_file: Option<&Path>,
) -> anyhow::Result<()> {
    let extractor: Box<dyn CredentialSource> = match (from_file, &config.cookie_command) {
        (Some(path), _) => Box::new(FileCredentialSource::new(path)),
        (None, Some(command)) => Box::new(CommandCredentialSource::new(command.clone())),
        (None, None) => anyhow::bail!(
            "no cookie source: pass --from-file or set IGMINER_COOKIE_COMMAND"
        ),
    };

    let source = RefreshingCredentialSource::new(Some(extractor), cookies);
    let credentials = source
        .obtain()
        .await
        .with_context(|| format!("credential refresh via {} failed", source.describe()))?;
    let count = credentials.cookies.len();
    let session = SessionContext::new(
        credentials,
        chrono::Duration::days(config.session_max_age_days),
    )?;

    println!(
        "saved {count} cookies to {} (session {})",
        cookies.display(),
        session.session_hint()
    );
    Ok(())
}
