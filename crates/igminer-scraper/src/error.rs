use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization error for {context}: {source}")]
    Deserialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    /// HTTP 429 or a rate-limit / spam signal in the response body.
    #[error("throttled (status {status}, retry after {retry_after_secs:?}s): {reason}")]
    Throttled {
        status: u16,
        retry_after_secs: Option<u64>,
        reason: String,
    },

    #[error("session rejected: {reason}")]
    AuthExpired { reason: String },

    #[error("unexpected HTTP status {status} from {url}")]
    UnexpectedStatus { status: u16, url: String },

    #[error("expected JSON from {url}, got content-type \"{content_type}\"")]
    NotJson { url: String, content_type: String },

    #[error("invalid URL \"{url}\": {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid shortcode \"{code}\": {reason}")]
    InvalidShortcode { code: String, reason: String },
}

impl ApiError {
    /// Network-level failures and 5xx responses; worth a short backoff and retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Http(_) => true,
            ApiError::UnexpectedStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("credential bundle has no sessionid cookie")]
    MissingSessionId,

    #[error("failed to read credential file {path}: {source}")]
    CredentialFileIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("credential file {path} is not a JSON object of cookie values: {source}")]
    CredentialParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("cookie extraction command failed: {0}")]
    Command(String),
}
