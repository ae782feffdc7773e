//! Drives one [`CollectionTarget`] page by page.
//!
//! Each [`Paginator::step`] fetches at most one page: it waits out the
//! pacing delay, fetches through the [`PageSource`] (retrying transient
//! failures), hands the normalized records to the [`RecordSink`] and
//! advances the cursor. Throttle signals are absorbed here by backing off
//! and retrying the same cursor; auth expiry and hard failures end the
//! target and are reported to the caller.

use std::fmt;
use std::time::Duration;

use igminer_core::{AppConfig, CollectionTarget, TargetKind};
use igminer_db::StorageError;
use igminer_scraper::{
    normalize_records, retry_with_backoff, ApiError, PageSource, RateController, SessionContext,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::shutdown::sleep_or_cancel;
use crate::sink::RecordSink;

/// Per-kind page caps and network retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagePolicy {
    pub max_pages_top: u32,
    pub max_pages_recent: u32,
    pub max_pages_comments: u32,
    pub max_network_retries: u32,
    pub network_backoff_base_ms: u64,
}

impl PagePolicy {
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_pages_top: config.max_pages_top,
            max_pages_recent: config.max_pages_recent,
            max_pages_comments: config.max_pages_comments,
            max_network_retries: config.max_network_retries,
            network_backoff_base_ms: config.network_backoff_base_ms,
        }
    }

    /// Same policy with every hashtag cap replaced by `pages`.
    #[must_use]
    pub fn with_hashtag_cap(self, pages: u32) -> Self {
        Self {
            max_pages_top: pages,
            max_pages_recent: pages,
            ..self
        }
    }

    #[must_use]
    pub fn page_cap(&self, kind: TargetKind) -> u32 {
        match kind {
            TargetKind::HashtagTop => self.max_pages_top,
            TargetKind::HashtagRecent => self.max_pages_recent,
            TargetKind::PostComments => self.max_pages_comments,
            TargetKind::UserProfile => 1,
        }
    }
}

/// Why a target stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The API reported no further pages.
    Exhausted,
    PageCap,
    /// The last page added nothing new.
    NoNewRecords,
    /// The session was rejected or has aged out; the cursor is preserved.
    AuthExpired(String),
    /// Throttle budget spent, retries exhausted, or an unusable page.
    Failed(String),
    Cancelled,
}

impl StopReason {
    /// Whether the target is finished and can leave the queue.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StopReason::AuthExpired(_) | StopReason::Cancelled)
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Exhausted => f.write_str("no more pages"),
            StopReason::PageCap => f.write_str("page cap reached"),
            StopReason::NoNewRecords => f.write_str("page added no new records"),
            StopReason::AuthExpired(reason) => write!(f, "auth expired: {reason}"),
            StopReason::Failed(reason) => write!(f, "failed: {reason}"),
            StopReason::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Result of one [`Paginator::step`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub new_records: u64,
    pub page_fetched: bool,
    pub stop: Option<StopReason>,
}

impl StepReport {
    fn stopped(reason: StopReason) -> Self {
        Self {
            new_records: 0,
            page_fetched: false,
            stop: Some(reason),
        }
    }
}

/// Totals for a target run to completion with [`Paginator::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaginationOutcome {
    pub new_records: u64,
    pub pages: u32,
    pub stop: StopReason,
}

pub struct Paginator<'a> {
    source: &'a dyn PageSource,
    sink: &'a dyn RecordSink,
    rate: &'a mut RateController,
    cancel: CancellationToken,
    policy: PagePolicy,
    throttle_retries: u32,
    replay_through: u32,
}

impl<'a> Paginator<'a> {
    pub fn new(
        source: &'a dyn PageSource,
        sink: &'a dyn RecordSink,
        rate: &'a mut RateController,
        cancel: CancellationToken,
        policy: PagePolicy,
    ) -> Self {
        Self {
            source,
            sink,
            rate,
            cancel,
            policy,
            throttle_retries: 0,
            replay_through: 0,
        }
    }

    /// Pages up to and including `through_page` may add nothing new
    /// without ending the target: after a resume they can be pages that
    /// were stored before the last checkpoint was written.
    #[must_use]
    pub fn with_replay_window(mut self, through_page: u32) -> Self {
        self.replay_through = through_page;
        self
    }

    /// Drive `target` until it stops, with no checkpointing in between.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if a page cannot be persisted.
    pub async fn run(
        &mut self,
        target: &mut CollectionTarget,
        session: &mut SessionContext,
    ) -> Result<PaginationOutcome, StorageError> {
        let mut new_records = 0;
        let mut pages = 0;
        loop {
            let report = self.step(target, session).await?;
            new_records += report.new_records;
            if report.page_fetched {
                pages += 1;
            }
            if let Some(stop) = report.stop {
                return Ok(PaginationOutcome {
                    new_records,
                    pages,
                    stop,
                });
            }
        }
    }

    /// Fetch and persist at most one page of `target`.
    ///
    /// A throttled request is retried in place after the backoff, so one
    /// step may span several requests for the same cursor. On a terminal
    /// stop the target is marked done.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the page cannot be persisted; the cursor
    /// is then left on the page that failed.
    pub async fn step(
        &mut self,
        target: &mut CollectionTarget,
        session: &mut SessionContext,
    ) -> Result<StepReport, StorageError> {
        if let Some(stop) = self.precheck(target, session) {
            return Ok(self.finish(target, StepReport::stopped(stop)));
        }

        loop {
            let wait = self.rate.page_wait(Instant::now());
            if !sleep_or_cancel(wait, &self.cancel).await {
                return Ok(StepReport::stopped(StopReason::Cancelled));
            }
            self.rate.mark_request(Instant::now());

            let fetched = {
                let source = self.source;
                let target_ref: &CollectionTarget = target;
                let session_ref: &SessionContext = session;
                retry_with_backoff(
                    self.policy.max_network_retries,
                    self.policy.network_backoff_base_ms,
                    || source.fetch_page(target_ref, session_ref),
                )
                .await
            };

            let page = match fetched {
                Ok(page) => page,
                Err(ApiError::Throttled {
                    retry_after_secs, ..
                }) => {
                    self.throttle_retries += 1;
                    let budget = self.rate.limits().max_throttle_retries;
                    if self.throttle_retries > budget {
                        self.throttle_retries = 0;
                        let reason = format!("still throttled after {budget} retries");
                        return Ok(self.finish(target, StepReport::stopped(StopReason::Failed(reason))));
                    }
                    let mut backoff = self.rate.record_throttle();
                    if let Some(secs) = retry_after_secs {
                        backoff = backoff.max(Duration::from_secs(secs));
                    }
                    tracing::warn!(
                        target_id = %target,
                        attempt = self.throttle_retries,
                        backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                        "throttled, retrying same page"
                    );
                    if !sleep_or_cancel(backoff, &self.cancel).await {
                        return Ok(StepReport::stopped(StopReason::Cancelled));
                    }
                    continue;
                }
                Err(ApiError::AuthExpired { reason }) => {
                    session.invalidate(&reason);
                    tracing::warn!(target_id = %target, reason = %reason, "session rejected");
                    return Ok(StepReport::stopped(StopReason::AuthExpired(reason)));
                }
                Err(e) => {
                    self.throttle_retries = 0;
                    tracing::warn!(target_id = %target, error = %e, "target failed");
                    let reason = StopReason::Failed(e.to_string());
                    return Ok(self.finish(target, StepReport::stopped(reason)));
                }
            };

            self.throttle_retries = 0;
            self.rate.record_success();

            let normalized = normalize_records(&page.records, &target.key);
            if normalized.skipped > 0 {
                tracing::warn!(target_id = %target, skipped = normalized.skipped, "records skipped");
            }
            let new_records = self.sink.accept(normalized).await?;

            let previous_cursor = target.cursor.clone();
            target.advance(page.next_cursor.clone());
            tracing::debug!(
                target_id = %target,
                page = target.pages_fetched,
                records = page.records.len(),
                new_records,
                "page collected"
            );

            let stop = if !page.more_available || page.next_cursor.is_none() {
                Some(StopReason::Exhausted)
            } else if page.next_cursor == previous_cursor {
                // A cursor that does not move would refetch the same page forever.
                Some(StopReason::Exhausted)
            } else if target.pages_fetched >= self.policy.page_cap(target.kind) {
                Some(StopReason::PageCap)
            } else if new_records == 0 && target.pages_fetched > self.replay_through {
                Some(StopReason::NoNewRecords)
            } else {
                None
            };

            let report = StepReport {
                new_records,
                page_fetched: true,
                stop,
            };
            return Ok(self.finish(target, report));
        }
    }

    /// Stop conditions that hold before any request is made.
    fn precheck(
        &self,
        target: &CollectionTarget,
        session: &SessionContext,
    ) -> Option<StopReason> {
        if self.cancel.is_cancelled() {
            return Some(StopReason::Cancelled);
        }
        if target.done {
            return Some(StopReason::Exhausted);
        }
        if target.pages_fetched >= self.policy.page_cap(target.kind) {
            return Some(StopReason::PageCap);
        }
        if !session.is_valid() {
            let reason = session
                .invalid_reason()
                .unwrap_or("session past its maximum age")
                .to_owned();
            return Some(StopReason::AuthExpired(reason));
        }
        None
    }

    fn finish(&self, target: &mut CollectionTarget, report: StepReport) -> StepReport {
        if let Some(stop) = &report.stop {
            if stop.is_terminal() {
                target.mark_done();
                tracing::info!(
                    target_id = %target,
                    pages = target.pages_fetched,
                    reason = %stop,
                    "target finished"
                );
            }
        }
        report
    }
}

#[cfg(test)]
#[path = "paginator_test.rs"]
mod tests;
