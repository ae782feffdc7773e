use std::str::FromStr;

use crate::app_config::{AppConfig, DelayRange};
use crate::ConfigError;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if a value is present but cannot be parsed.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if a value is present but cannot be parsed.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// Decoupled from the process environment so it can be tested with a plain
/// `HashMap` lookup.
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let range = |var: &str, default: &str| -> Result<DelayRange, ConfigError> {
        parse_delay_range(var, &or_default(var, default))
    };

    let log_level = or_default("IGMINER_LOG_LEVEL", "info");
    let api_base_url = or_default("IGMINER_API_BASE_URL", "https://www.instagram.com");
    let user_agent = or_default("IGMINER_USER_AGENT", DEFAULT_USER_AGENT);
    let cookie_command = lookup("IGMINER_COOKIE_COMMAND")
        .ok()
        .filter(|s| !s.trim().is_empty());

    let request_timeout_secs = parse_var(&or_default, "IGMINER_REQUEST_TIMEOUT_SECS", "15")?;

    let page_delay = range("IGMINER_PAGE_DELAY_MS", "1500-3000")?;
    let target_delay = range("IGMINER_TARGET_DELAY_MS", "10000-25000")?;
    let cycle_delay = range("IGMINER_CYCLE_DELAY_MS", "300000-600000")?;
    let throttle_delay = range("IGMINER_THROTTLE_DELAY_MS", "30000-60000")?;

    let max_throttle_retries = parse_var(&or_default, "IGMINER_MAX_THROTTLE_RETRIES", "5")?;
    let max_network_retries = parse_var(&or_default, "IGMINER_MAX_NETWORK_RETRIES", "3")?;
    let network_backoff_base_ms =
        parse_var(&or_default, "IGMINER_NETWORK_BACKOFF_BASE_MS", "2000")?;
    let max_escalation_steps = parse_var(&or_default, "IGMINER_MAX_ESCALATION_STEPS", "4")?;
    let decay_after_successes = parse_var(&or_default, "IGMINER_DECAY_AFTER_SUCCESSES", "5")?;

    let max_pages_top = parse_var(&or_default, "IGMINER_MAX_PAGES_TOP", "20")?;
    let max_pages_recent = parse_var(&or_default, "IGMINER_MAX_PAGES_RECENT", "10")?;
    let max_pages_comments = parse_var(&or_default, "IGMINER_MAX_PAGES_COMMENTS", "3")?;

    let session_max_age_days = parse_var(&or_default, "IGMINER_SESSION_MAX_AGE_DAYS", "60")?;
    let checkpoint_every_pages = parse_var(&or_default, "IGMINER_CHECKPOINT_EVERY_PAGES", "5")?;
    let comment_batch_size = parse_var(&or_default, "IGMINER_COMMENT_BATCH_SIZE", "300")?;
    let recent_sample_size = parse_var(&or_default, "IGMINER_RECENT_SAMPLE_SIZE", "15")?;
    let auth_retry_pause_secs = parse_var(&or_default, "IGMINER_AUTH_RETRY_PAUSE_SECS", "3600")?;

    if checkpoint_every_pages == 0 {
        return Err(ConfigError::InvalidEnvVar {
            var: "IGMINER_CHECKPOINT_EVERY_PAGES".to_string(),
            reason: "must be at least 1".to_string(),
        });
    }

    Ok(AppConfig {
        log_level,
        api_base_url,
        request_timeout_secs,
        user_agent,
        page_delay,
        target_delay,
        cycle_delay,
        throttle_delay,
        max_throttle_retries,
        max_network_retries,
        network_backoff_base_ms,
        max_escalation_steps,
        decay_after_successes,
        max_pages_top,
        max_pages_recent,
        max_pages_comments,
        session_max_age_days,
        checkpoint_every_pages,
        comment_batch_size,
        recent_sample_size,
        auth_retry_pause_secs,
        cookie_command,
    })
}

fn parse_var<T, D>(or_default: &D, var: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    D: Fn(&str, &str) -> String,
{
    let raw = or_default(var, default);
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
}

/// Parse a `"MIN-MAX"` millisecond range such as `"1500-3000"`.
///
/// A single number is accepted as a fixed delay (`min == max`).
fn parse_delay_range(var: &str, raw: &str) -> Result<DelayRange, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidEnvVar {
        var: var.to_string(),
        reason,
    };

    let (min_raw, max_raw) = raw.split_once('-').unwrap_or((raw, raw));
    let min_ms = min_raw
        .trim()
        .parse::<u64>()
        .map_err(|e| invalid(format!("bad lower bound \"{min_raw}\": {e}")))?;
    let max_ms = max_raw
        .trim()
        .parse::<u64>()
        .map_err(|e| invalid(format!("bad upper bound \"{max_raw}\": {e}")))?;

    if min_ms > max_ms {
        return Err(invalid(format!(
            "lower bound {min_ms} exceeds upper bound {max_ms}"
        )));
    }

    Ok(DelayRange::from_millis(min_ms, max_ms))
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
