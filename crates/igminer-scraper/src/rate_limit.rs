//! Request pacing, throttle escalation, and transient-error retry.
//!
//! The [`RateController`] decides how long to wait; callers do the waiting,
//! so long pauses can be raced against a shutdown signal. All randomness
//! comes from a seedable [`StdRng`] and all instants from tokio's clock,
//! which keeps behaviour reproducible under a paused test runtime.

use std::future::Future;
use std::time::Duration;

use igminer_core::{AppConfig, DelayRange};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::Instant;

use crate::error::ApiError;

/// Static pacing policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimits {
    pub page_delay: DelayRange,
    pub target_delay: DelayRange,
    pub cycle_delay: DelayRange,
    pub throttle_delay: DelayRange,
    pub max_throttle_retries: u32,
    pub max_escalation_steps: u32,
    pub decay_after_successes: u32,
}

impl RateLimits {
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            page_delay: config.page_delay,
            target_delay: config.target_delay,
            cycle_delay: config.cycle_delay,
            throttle_delay: config.throttle_delay,
            max_throttle_retries: config.max_throttle_retries,
            max_escalation_steps: config.max_escalation_steps,
            decay_after_successes: config.decay_after_successes,
        }
    }
}

/// Mutable pacing state. Lives for the whole process; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateState {
    pub consecutive_throttles: u32,
    pub consecutive_successes: u32,
    pub current_delay_range: DelayRange,
    pub last_request_at: Option<Instant>,
}

pub struct RateController {
    limits: RateLimits,
    state: RateState,
    rng: StdRng,
}

impl RateController {
    #[must_use]
    pub fn new(limits: RateLimits) -> Self {
        Self::with_rng(limits, StdRng::from_os_rng())
    }

    /// Deterministic controller for tests and reproducible runs.
    #[must_use]
    pub fn with_seed(limits: RateLimits, seed: u64) -> Self {
        Self::with_rng(limits, StdRng::seed_from_u64(seed))
    }

    fn with_rng(limits: RateLimits, rng: StdRng) -> Self {
        Self {
            state: RateState {
                consecutive_throttles: 0,
                consecutive_successes: 0,
                current_delay_range: limits.page_delay,
                last_request_at: None,
            },
            limits,
            rng,
        }
    }

    #[must_use]
    pub fn limits(&self) -> &RateLimits {
        &self.limits
    }

    #[must_use]
    pub fn state(&self) -> &RateState {
        &self.state
    }

    /// `2^min(consecutive_throttles, max_escalation_steps)`.
    #[must_use]
    pub fn multiplier(&self) -> u64 {
        let steps = self
            .state
            .consecutive_throttles
            .min(self.limits.max_escalation_steps)
            .min(62);
        1u64 << steps
    }

    fn draw(&mut self, range: DelayRange) -> Duration {
        if range.min_ms >= range.max_ms {
            return range.min();
        }
        Duration::from_millis(self.rng.random_range(range.min_ms..=range.max_ms))
    }

    /// Time still to wait before the next page request, drawn from the
    /// current (possibly escalated) pacing range and measured from the last
    /// request.
    pub fn page_wait(&mut self, now: Instant) -> Duration {
        let delay = self.draw(self.state.current_delay_range);
        match self.state.last_request_at {
            Some(last) => delay.saturating_sub(now.saturating_duration_since(last)),
            None => Duration::ZERO,
        }
    }

    pub fn mark_request(&mut self, at: Instant) {
        self.state.last_request_at = Some(at);
    }

    pub fn target_wait(&mut self) -> Duration {
        self.draw(self.limits.target_delay)
    }

    pub fn cycle_wait(&mut self) -> Duration {
        self.draw(self.limits.cycle_delay)
    }

    /// Register a throttle signal and return how long to back off before
    /// retrying the same request.
    pub fn record_throttle(&mut self) -> Duration {
        let wait = self.draw(self.limits.throttle_delay.scaled(self.multiplier()));
        self.state.consecutive_throttles = self.state.consecutive_throttles.saturating_add(1);
        self.state.consecutive_successes = 0;
        self.state.current_delay_range = self.limits.page_delay.scaled(self.multiplier());

        tracing::warn!(
            consecutive_throttles = self.state.consecutive_throttles,
            wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
            pacing = %self.state.current_delay_range,
            "throttled; backing off"
        );
        wait
    }

    /// Register a successful request; enough in a row restores the baseline.
    pub fn record_success(&mut self) {
        self.state.consecutive_successes = self.state.consecutive_successes.saturating_add(1);

        if self.state.consecutive_throttles > 0
            && self.state.consecutive_successes >= self.limits.decay_after_successes
        {
            tracing::info!(
                after_successes = self.state.consecutive_successes,
                pacing = %self.limits.page_delay,
                "pacing back to baseline"
            );
            self.state.consecutive_throttles = 0;
            self.state.consecutive_successes = 0;
            self.state.current_delay_range = self.limits.page_delay;
        }
    }
}

/// Executes `operation`, retrying transient failures with exponential backoff.
///
/// Only errors for which [`ApiError::is_transient`] holds are retried;
/// throttle and auth signals are returned immediately so the caller can
/// apply its own policy. The wait before retry `n` (1-based) is
/// `base_ms * 2^(n-1)`. With `max_retries = 3` the operation runs at most
/// four times.
///
/// # Errors
///
/// Returns the first non-transient error, or the last transient error once
/// the retries are spent.
pub async fn retry_with_backoff<T, F, Fut>(
    max_retries: u32,
    base_ms: u64,
    mut operation: F,
) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut attempt = 0u32;

    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if !err.is_transient() || attempt >= max_retries {
            return Err(err);
        }

        let delay_ms = base_ms.saturating_mul(1u64 << attempt.min(62));
        tracing::warn!(
            attempt,
            max_retries,
            delay_ms,
            error = %err,
            "transient API error, retrying after backoff"
        );
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        attempt += 1;
    }
}
