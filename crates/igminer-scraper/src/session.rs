//! Authenticated session state and the sources that can (re)supply it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::error::AuthError;

/// Cookie name → value, as exported from a logged-in browser.
pub type CookieJar = BTreeMap<String, String>;

/// A freshly obtained credential bundle.
#[derive(Clone)]
pub struct Credentials {
    pub cookies: CookieJar,
    pub obtained_at: DateTime<Utc>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("cookies", &self.cookies.keys().collect::<Vec<_>>())
            .field("obtained_at", &self.obtained_at)
            .finish()
    }
}

/// Supplies session cookies on demand.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// # Errors
    ///
    /// Returns [`AuthError`] when no usable bundle can be produced.
    async fn obtain(&self) -> Result<Credentials, AuthError>;

    /// Short human-readable description for logs.
    fn describe(&self) -> String;
}

/// Session cookies plus their validity window.
pub struct SessionContext {
    cookies: CookieJar,
    obtained_at: DateTime<Utc>,
    max_age: Duration,
    invalid_reason: Option<String>,
}

impl SessionContext {
    /// # Errors
    ///
    /// Returns [`AuthError::MissingSessionId`] when the bundle has no
    /// non-empty `sessionid` cookie.
    pub fn new(credentials: Credentials, max_age: Duration) -> Result<Self, AuthError> {
        check_session_id(&credentials.cookies)?;
        Ok(Self {
            cookies: credentials.cookies,
            obtained_at: credentials.obtained_at,
            max_age,
            invalid_reason: None,
        })
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.invalid_reason.is_none() && now < self.obtained_at + self.max_age
    }

    pub fn invalidate(&mut self, reason: &str) {
        tracing::warn!(reason, "session invalidated");
        self.invalid_reason = Some(reason.to_owned());
    }

    #[must_use]
    pub fn invalid_reason(&self) -> Option<&str> {
        self.invalid_reason.as_deref()
    }

    /// Replace the bundle with a fresh one from `source`.
    ///
    /// On failure the current bundle and its validity state are left as-is.
    ///
    /// # Errors
    ///
    /// Propagates the source's [`AuthError`], or
    /// [`AuthError::MissingSessionId`] when the new bundle lacks one.
    pub async fn refresh(&mut self, source: &dyn CredentialSource) -> Result<(), AuthError> {
        let credentials = source.obtain().await?;
        check_session_id(&credentials.cookies)?;
        self.cookies = credentials.cookies;
        self.obtained_at = credentials.obtained_at;
        self.invalid_reason = None;
        tracing::info!(
            source = %source.describe(),
            session = %self.session_hint(),
            "session refreshed"
        );
        Ok(())
    }

    #[must_use]
    pub fn obtained_at(&self) -> DateTime<Utc> {
        self.obtained_at
    }

    #[must_use]
    pub fn cookies(&self) -> &CookieJar {
        &self.cookies
    }

    #[must_use]
    pub fn csrf_token(&self) -> &str {
        self.cookies.get("csrftoken").map_or("", String::as_str)
    }

    /// Value for the `Cookie` request header.
    #[must_use]
    pub fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Last eight characters of the session id, safe to log.
    #[must_use]
    pub fn session_hint(&self) -> String {
        let id = self.cookies.get("sessionid").map_or("", String::as_str);
        let tail: String = id.chars().rev().take(8).collect::<Vec<_>>().into_iter().rev().collect();
        format!("...{tail}")
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("cookies", &self.cookies.keys().collect::<Vec<_>>())
            .field("session", &self.session_hint())
            .field("obtained_at", &self.obtained_at)
            .field("max_age_days", &self.max_age.num_days())
            .field("invalid_reason", &self.invalid_reason)
            .finish()
    }
}

fn check_session_id(cookies: &CookieJar) -> Result<(), AuthError> {
    match cookies.get("sessionid") {
        Some(id) if !id.trim().is_empty() => Ok(()),
        _ => Err(AuthError::MissingSessionId),
    }
}

/// Reads a flat JSON object of cookies from disk.
///
/// The file's modification time is taken as the moment the cookies were
/// obtained.
pub struct FileCredentialSource {
    path: PathBuf,
}

impl FileCredentialSource {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CredentialSource for FileCredentialSource {
    async fn obtain(&self) -> Result<Credentials, AuthError> {
        let io_err = |source| AuthError::CredentialFileIo {
            path: self.path.display().to_string(),
            source,
        };
        let raw = tokio::fs::read(&self.path).await.map_err(io_err)?;
        let cookies = parse_cookie_json(&raw).map_err(|source| AuthError::CredentialParse {
            path: self.path.display().to_string(),
            source,
        })?;
        check_session_id(&cookies)?;

        let obtained_at = tokio::fs::metadata(&self.path)
            .await
            .and_then(|m| m.modified())
            .map_or_else(|_| Utc::now(), DateTime::<Utc>::from);

        Ok(Credentials {
            cookies,
            obtained_at,
        })
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}

/// Runs an operator-configured shell command that prints a JSON object of
/// cookies on stdout (for example a browser cookie-store exporter).
pub struct CommandCredentialSource {
    command: String,
}

impl CommandCredentialSource {
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl CredentialSource for CommandCredentialSource {
    async fn obtain(&self) -> Result<Credentials, AuthError> {
        let output = tokio::process::Command::new("sh")
            .args(["-c", &self.command])
            .output()
            .await
            .map_err(|e| AuthError::Command(format!("could not spawn: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AuthError::Command(format!(
                "exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let cookies = parse_cookie_json(&output.stdout)
            .map_err(|e| AuthError::Command(format!("stdout is not a JSON cookie object: {e}")))?;
        check_session_id(&cookies)?;

        Ok(Credentials {
            cookies,
            obtained_at: Utc::now(),
        })
    }

    fn describe(&self) -> String {
        "cookie command".to_owned()
    }
}

/// Extracts fresh cookies through `extractor` and persists them to `path`,
/// falling back to the file itself when it already holds cookies.
pub struct RefreshingCredentialSource {
    extractor: Option<Box<dyn CredentialSource>>,
    file: FileCredentialSource,
}

impl RefreshingCredentialSource {
    #[must_use]
    pub fn new(extractor: Option<Box<dyn CredentialSource>>, path: impl Into<PathBuf>) -> Self {
        Self {
            extractor,
            file: FileCredentialSource::new(path),
        }
    }
}

#[async_trait]
impl CredentialSource for RefreshingCredentialSource {
    async fn obtain(&self) -> Result<Credentials, AuthError> {
        let Some(extractor) = &self.extractor else {
            return self.file.obtain().await;
        };

        let credentials = extractor.obtain().await?;
        save_cookies(self.file.path(), &credentials.cookies).await?;
        tracing::info!(
            count = credentials.cookies.len(),
            path = %self.file.path().display(),
            "saved extracted cookies"
        );
        Ok(credentials)
    }

    fn describe(&self) -> String {
        match &self.extractor {
            Some(extractor) => format!("{} -> {}", extractor.describe(), self.file.describe()),
            None => self.file.describe(),
        }
    }
}

/// Write `cookies` to `path` as a JSON object.
///
/// # Errors
///
/// Returns [`AuthError::CredentialFileIo`] if the file cannot be written.
pub async fn save_cookies(path: &Path, cookies: &CookieJar) -> Result<(), AuthError> {
    let io_err = |source| AuthError::CredentialFileIo {
        path: path.display().to_string(),
        source,
    };
    let body = serde_json::to_vec_pretty(cookies)
        .map_err(|e| io_err(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
    tokio::fs::write(path, body).await.map_err(io_err)
}

/// Accepts string values and stringifies scalars; nested values are dropped.
fn parse_cookie_json(raw: &[u8]) -> Result<CookieJar, serde_json::Error> {
    let map: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(raw)?;
    Ok(map
        .into_iter()
        .filter_map(|(k, v)| match v {
            serde_json::Value::String(s) => Some((k, s)),
            serde_json::Value::Number(n) => Some((k, n.to_string())),
            serde_json::Value::Bool(b) => Some((k, b.to_string())),
            _ => None,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jar(pairs: &[(&str, &str)]) -> CookieJar {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    fn session_at(obtained_at: DateTime<Utc>) -> SessionContext {
        SessionContext::new(
            Credentials {
                cookies: jar(&[("sessionid", "abc123456789"), ("csrftoken", "tok")]),
                obtained_at,
            },
            Duration::days(60),
        )
        .unwrap()
    }

    struct FixedSource(CookieJar);

    #[async_trait]
    impl CredentialSource for FixedSource {
        async fn obtain(&self) -> Result<Credentials, AuthError> {
            Ok(Credentials {
                cookies: self.0.clone(),
                obtained_at: Utc::now(),
            })
        }

        fn describe(&self) -> String {
            "fixed".to_owned()
        }
    }

    #[test]
    fn rejects_bundle_without_sessionid() {
        let result = SessionContext::new(
            Credentials {
                cookies: jar(&[("csrftoken", "tok")]),
                obtained_at: Utc::now(),
            },
            Duration::days(60),
        );
        assert!(matches!(result, Err(AuthError::MissingSessionId)));
    }

    #[test]
    fn expires_after_max_age() {
        let obtained = Utc::now() - Duration::days(61);
        let session = session_at(obtained);
        assert!(session.is_valid_at(obtained + Duration::days(59)));
        assert!(!session.is_valid_at(obtained + Duration::days(60)));
        assert!(!session.is_valid());
    }

    #[tokio::test]
    async fn refresh_clears_invalidation() {
        let mut session = session_at(Utc::now());
        session.invalidate("login_required");
        assert!(!session.is_valid());

        let source = FixedSource(jar(&[("sessionid", "fresh-session-id")]));
        session.refresh(&source).await.unwrap();
        assert!(session.is_valid());
        assert_eq!(session.session_hint(), "...ssion-id");
        assert_eq!(session.csrf_token(), "");
    }

    #[tokio::test]
    async fn failed_refresh_keeps_session_invalid() {
        let mut session = session_at(Utc::now());
        session.invalidate("checkpoint_required");
        let source = FixedSource(jar(&[("csrftoken", "only")]));
        let err = session.refresh(&source).await.unwrap_err();
        assert!(matches!(err, AuthError::MissingSessionId));
        assert!(!session.is_valid());
        assert_eq!(session.invalid_reason(), Some("checkpoint_required"));
    }

    #[test]
    fn cookie_header_joins_pairs() {
        let session = session_at(Utc::now());
        assert_eq!(
            session.cookie_header(),
            "csrftoken=tok; sessionid=abc123456789"
        );
    }

    #[test]
    fn debug_does_not_leak_cookie_values() {
        let rendered = format!("{:?}", session_at(Utc::now()));
        assert!(!rendered.contains("abc1234"), "leaked: {rendered}");
        assert!(!rendered.contains("tok\""), "leaked: {rendered}");
    }

    #[tokio::test]
    async fn file_source_round_trips_through_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.json");
        save_cookies(&path, &jar(&[("sessionid", "s1"), ("ds_user_id", "42")]))
            .await
            .unwrap();

        let credentials = FileCredentialSource::new(&path).obtain().await.unwrap();
        assert_eq!(credentials.cookies.get("ds_user_id").map(String::as_str), Some("42"));
    }

    #[tokio::test]
    async fn file_source_stringifies_numeric_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.json");
        std::fs::write(&path, br#"{"sessionid":"s1","ds_user_id":42,"nested":{"a":1}}"#).unwrap();

        let credentials = FileCredentialSource::new(&path).obtain().await.unwrap();
        assert_eq!(credentials.cookies.get("ds_user_id").map(String::as_str), Some("42"));
        assert!(!credentials.cookies.contains_key("nested"));
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let source = FileCredentialSource::new("/nonexistent/cookies.json");
        assert!(matches!(
            source.obtain().await,
            Err(AuthError::CredentialFileIo { .. })
        ));
    }

    #[tokio::test]
    async fn command_source_parses_stdout() {
        let source = CommandCredentialSource::new(r#"echo '{"sessionid":"cmd-session"}'"#);
        let credentials = source.obtain().await.unwrap();
        assert_eq!(
            credentials.cookies.get("sessionid").map(String::as_str),
            Some("cmd-session")
        );
    }

    #[tokio::test]
    async fn command_source_reports_non_zero_exit() {
        let source = CommandCredentialSource::new("echo nope >&2; exit 3");
        let err = source.obtain().await.unwrap_err();
        assert!(matches!(err, AuthError::Command(ref m) if m.contains("nope")));
    }

    #[tokio::test]
    async fn refreshing_source_persists_extracted_cookies() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.json");
        let extractor: Box<dyn CredentialSource> =
            Box::new(FixedSource(jar(&[("sessionid", "extracted")])));
        let source = RefreshingCredentialSource::new(Some(extractor), &path);

        source.obtain().await.unwrap();
        let reloaded = FileCredentialSource::new(&path).obtain().await.unwrap();
        assert_eq!(
            reloaded.cookies.get("sessionid").map(String::as_str),
            Some("extracted")
        );
    }
}
