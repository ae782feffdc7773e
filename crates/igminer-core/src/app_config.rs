use std::time::Duration;

/// Inclusive millisecond range a randomized delay is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayRange {
    #[must_use]
    pub const fn from_millis(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    #[must_use]
    pub const fn from_secs(min_secs: u64, max_secs: u64) -> Self {
        Self {
            min_ms: min_secs * 1_000,
            max_ms: max_secs * 1_000,
        }
    }

    /// Both bounds multiplied by `factor`, saturating at `u64::MAX`.
    #[must_use]
    pub fn scaled(self, factor: u64) -> Self {
        Self {
            min_ms: self.min_ms.saturating_mul(factor),
            max_ms: self.max_ms.saturating_mul(factor),
        }
    }

    #[must_use]
    pub fn min(self) -> Duration {
        Duration::from_millis(self.min_ms)
    }

    #[must_use]
    pub fn max(self) -> Duration {
        Duration::from_millis(self.max_ms)
    }

    /// Width of the range in milliseconds.
    #[must_use]
    pub fn width_ms(self) -> u64 {
        self.max_ms - self.min_ms
    }
}

impl std::fmt::Display for DelayRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}ms", self.min_ms, self.max_ms)
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    pub user_agent: String,
    pub page_delay: DelayRange,
    pub target_delay: DelayRange,
    pub cycle_delay: DelayRange,
    pub throttle_delay: DelayRange,
    pub max_throttle_retries: u32,
    pub max_network_retries: u32,
    pub network_backoff_base_ms: u64,
    pub max_escalation_steps: u32,
    pub decay_after_successes: u32,
    pub max_pages_top: u32,
    pub max_pages_recent: u32,
    pub max_pages_comments: u32,
    pub session_max_age_days: i64,
    pub checkpoint_every_pages: u32,
    pub comment_batch_size: usize,
    pub recent_sample_size: usize,
    pub auth_retry_pause_secs: u64,
    pub cookie_command: Option<String>,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("log_level", &self.log_level)
            .field("api_base_url", &self.api_base_url)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("user_agent", &self.user_agent)
            .field("page_delay", &self.page_delay)
            .field("target_delay", &self.target_delay)
            .field("cycle_delay", &self.cycle_delay)
            .field("throttle_delay", &self.throttle_delay)
            .field("max_throttle_retries", &self.max_throttle_retries)
            .field("max_network_retries", &self.max_network_retries)
            .field("network_backoff_base_ms", &self.network_backoff_base_ms)
            .field("max_escalation_steps", &self.max_escalation_steps)
            .field("decay_after_successes", &self.decay_after_successes)
            .field("max_pages_top", &self.max_pages_top)
            .field("max_pages_recent", &self.max_pages_recent)
            .field("max_pages_comments", &self.max_pages_comments)
            .field("session_max_age_days", &self.session_max_age_days)
            .field("checkpoint_every_pages", &self.checkpoint_every_pages)
            .field("comment_batch_size", &self.comment_batch_size)
            .field("recent_sample_size", &self.recent_sample_size)
            .field("auth_retry_pause_secs", &self.auth_retry_pause_secs)
            // The command line may embed a browser profile path or a token.
            .field(
                "cookie_command",
                &self.cookie_command.as_ref().map(|_| "[redacted]"),
            )
            .finish()
    }
}
