//! HTTP client for the hashtag, comments, and profile endpoints.

use std::time::Duration;

use igminer_core::AppConfig;
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;

use crate::error::ApiError;
use crate::session::SessionContext;
use crate::shortcode::shortcode_to_media_pk;
use crate::types::{
    CommentsResponse, ProfileResponse, RawPage, RawRecords, SectionsResponse, StatusEnvelope,
};

pub const DEFAULT_BASE_URL: &str = "https://www.instagram.com";
pub const IG_APP_ID: &str = "936619743392459";
const ASBD_ID: &str = "129477";

/// Client for the web API, authenticated per request by a [`SessionContext`].
///
/// One call is one HTTP request: throttling and transient failures come
/// back as typed [`ApiError`]s and retry policy belongs to the caller.
pub struct IgClient {
    client: Client,
    base_url: Url,
}

impl IgClient {
    /// # Errors
    ///
    /// Returns [`ApiError::Http`] if the underlying `reqwest::Client` cannot
    /// be constructed, or [`ApiError::InvalidUrl`] for a bad base URL.
    pub fn new(timeout_secs: u64, user_agent: &str) -> Result<Self, ApiError> {
        Self::with_base_url(DEFAULT_BASE_URL, timeout_secs, user_agent)
    }

    /// Client against an alternative origin (tests, proxies).
    ///
    /// # Errors
    ///
    /// Same as [`IgClient::new`].
    pub fn with_base_url(
        base_url: &str,
        timeout_secs: u64,
        user_agent: &str,
    ) -> Result<Self, ApiError> {
        let base_url = Url::parse(base_url.trim_end_matches('/')).map_err(|e| {
            ApiError::InvalidUrl {
                url: base_url.to_owned(),
                reason: e.to_string(),
            }
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::InvalidUrl {
                url: base_url.to_string(),
                reason: "not a hierarchical URL".to_owned(),
            });
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client, base_url })
    }

    /// # Errors
    ///
    /// Same as [`IgClient::new`].
    pub fn from_config(config: &AppConfig) -> Result<Self, ApiError> {
        Self::with_base_url(
            &config.api_base_url,
            config.request_timeout_secs,
            &config.user_agent,
        )
    }

    /// `{base}/seg1/seg2/.../` with each segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments).push("");
        }
        url
    }

    fn authed(&self, builder: RequestBuilder, session: &SessionContext, referer: &str) -> RequestBuilder {
        builder
            .header(reqwest::header::COOKIE, session.cookie_header())
            .header("x-ig-app-id", IG_APP_ID)
            .header("x-csrftoken", session.csrf_token())
            .header("x-requested-with", "XMLHttpRequest")
            .header("x-asbd-id", ASBD_ID)
            .header("sec-fetch-dest", "empty")
            .header("sec-fetch-mode", "cors")
            .header("sec-fetch-site", "same-origin")
            .header(reqwest::header::ACCEPT, "*/*")
            .header(reqwest::header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .header(reqwest::header::REFERER, referer)
    }

    /// One page of a hashtag's `top` or `recent` section feed.
    ///
    /// # Errors
    ///
    /// See [`IgClient::read_json`].
    pub async fn fetch_hashtag_section(
        &self,
        session: &SessionContext,
        tag: &str,
        tab: &str,
        max_id: Option<&str>,
    ) -> Result<RawPage, ApiError> {
        let url = self.endpoint(&["api", "v1", "tags", tag, "sections"]);
        let referer = self.endpoint(&["explore", "tags", tag]);

        let mut form = vec![("tab", tab)];
        if let Some(cursor) = max_id {
            form.push(("max_id", cursor));
        }

        let request = self.authed(self.client.post(url.clone()), session, referer.as_str());
        let response = request.form(&form).send().await?;
        let parsed: SectionsResponse =
            Self::read_json(response, &url, &format!("hashtag #{tag} ({tab})")).await?;

        let more_available = parsed.more_available;
        let next_cursor = parsed.next_max_id.clone();
        Ok(RawPage {
            records: RawRecords::Media(parsed.into_medias()),
            more_available,
            next_cursor,
        })
    }

    /// One page of comments for the post with shortcode `code`.
    ///
    /// # Errors
    ///
    /// [`ApiError::InvalidShortcode`] if `code` cannot be decoded, otherwise
    /// see [`IgClient::read_json`].
    pub async fn fetch_comments_page(
        &self,
        session: &SessionContext,
        code: &str,
        min_id: Option<&str>,
    ) -> Result<RawPage, ApiError> {
        let pk = shortcode_to_media_pk(code)?.to_string();
        let mut url = self.endpoint(&["api", "v1", "media", &pk, "comments"]);
        url.query_pairs_mut()
            .append_pair("can_support_threading", "true");
        if let Some(cursor) = min_id {
            url.query_pairs_mut().append_pair("min_id", cursor);
        }
        let referer = self.endpoint(&["p", code]);

        let request = self.authed(self.client.get(url.clone()), session, referer.as_str());
        let response = request.send().await?;
        let parsed: CommentsResponse =
            Self::read_json(response, &url, &format!("comments of {code}")).await?;

        Ok(RawPage {
            records: RawRecords::Comments(parsed.comments),
            more_available: parsed.has_more_comments,
            next_cursor: parsed.next_min_id,
        })
    }

    /// Full profile of `username`. A missing `data.user` yields an empty page.
    ///
    /// # Errors
    ///
    /// See [`IgClient::read_json`].
    pub async fn fetch_user_profile(
        &self,
        session: &SessionContext,
        username: &str,
    ) -> Result<RawPage, ApiError> {
        let mut url = self.endpoint(&["api", "v1", "users", "web_profile_info"]);
        url.query_pairs_mut().append_pair("username", username);
        let referer = self.endpoint(&[username]);

        let request = self.authed(self.client.get(url.clone()), session, referer.as_str());
        let response = request.send().await?;
        let parsed: ProfileResponse =
            Self::read_json(response, &url, &format!("profile @{username}")).await?;

        Ok(RawPage {
            records: RawRecords::Profile(parsed.data.and_then(|d| d.user)),
            more_available: false,
            next_cursor: None,
        })
    }

    /// Download a media file from its CDN URL. No session cookies are sent.
    ///
    /// # Errors
    ///
    /// [`ApiError::Http`] on network failure, [`ApiError::UnexpectedStatus`]
    /// on any non-2xx response.
    pub async fn download_image(&self, url: &str) -> Result<Vec<u8>, ApiError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::UnexpectedStatus {
                status: status.as_u16(),
                url: url.to_owned(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }

    /// Classify the response and decode its JSON body.
    ///
    /// # Errors
    ///
    /// - [`ApiError::Throttled`]: HTTP 429, or a `fail` body carrying a
    ///   wait message or the `spam` flag.
    /// - [`ApiError::AuthExpired`]: HTTP 401, a redirect to the login page, or
    ///   a `login_required`/`checkpoint_required` body.
    /// - [`ApiError::UnexpectedStatus`]: any other non-2xx status.
    /// - [`ApiError::NotJson`]: a 2xx response that is not JSON.
    /// - [`ApiError::Deserialize`]: the page envelope does not match.
    async fn read_json<T: DeserializeOwned>(
        response: Response,
        url: &Url,
        context: &str,
    ) -> Result<T, ApiError> {
        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok());
            return Err(ApiError::Throttled {
                status: status.as_u16(),
                retry_after_secs,
                reason: "HTTP 429".to_owned(),
            });
        }

        if status == reqwest::StatusCode::UNAUTHORIZED
            || response.url().path().starts_with("/accounts/login")
        {
            return Err(ApiError::AuthExpired {
                reason: format!("HTTP {} at {}", status.as_u16(), response.url().path()),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_owned();
        let body = response.text().await?;

        let envelope = if content_type.contains("json") {
            serde_json::from_str::<StatusEnvelope>(&body).ok()
        } else {
            None
        };
        if let Some(err) = envelope
            .as_ref()
            .and_then(|e| classify_failure(status.as_u16(), e))
        {
            return Err(err);
        }

        if !status.is_success() {
            return Err(ApiError::UnexpectedStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        if !content_type.contains("json") {
            return Err(ApiError::NotJson {
                url: url.to_string(),
                content_type,
            });
        }

        serde_json::from_str::<T>(&body).map_err(|e| ApiError::Deserialize {
            context: context.to_owned(),
            source: e,
        })
    }
}

/// Map a `{"status": "fail", ...}` body onto a throttle or auth signal.
fn classify_failure(status: u16, envelope: &StatusEnvelope) -> Option<ApiError> {
    let message = envelope.message.clone().unwrap_or_default();
    let lower = message.to_lowercase();

    if envelope.require_login
        || lower.contains("login_required")
        || lower.contains("checkpoint_required")
        || lower.contains("challenge_required")
    {
        return Some(ApiError::AuthExpired {
            reason: if message.is_empty() {
                "login required".to_owned()
            } else {
                message
            },
        });
    }

    let failed = envelope.status.as_deref() == Some("fail");
    if envelope.spam
        || (failed
            && (lower.contains("wait a few minutes")
                || lower.contains("try again later")
                || lower.contains("rate limit")))
    {
        return Some(ApiError::Throttled {
            status,
            retry_after_secs: None,
            reason: if message.is_empty() {
                "spam flag".to_owned()
            } else {
                message
            },
        });
    }

    None
}

#[cfg(test)]
#[path = "client_test.rs"]
mod tests;
