//! Sequences collection targets: bounded one-shot passes for the CLI
//! commands, and the checkpointed daemon loop that cycles until a target
//! count or a shutdown signal.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use igminer_core::{AppConfig, CollectionTarget, ProgressCheckpoint, TargetKind};
use igminer_db::Storage;
use igminer_scraper::{CredentialSource, PageSource, RateController, SessionContext};
use rand::rngs::StdRng;
use rand::seq::{IndexedRandom, SliceRandom};
use rand::SeedableRng;
use tokio_util::sync::CancellationToken;

use crate::checkpoint::CheckpointStore;
use crate::paginator::{PagePolicy, PaginationOutcome, Paginator, StopReason};
use crate::shutdown::sleep_or_cancel;
use crate::sink::RecordSink;
use crate::CollectError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonOptions {
    pub hashtags: Vec<String>,
    /// Stop once this many new records were collected; `None` runs forever.
    pub target_total: Option<u64>,
    pub comment_batch_size: usize,
    pub recent_sample_size: usize,
    pub checkpoint_every_pages: u32,
    pub auth_retry_pause: Duration,
}

impl DaemonOptions {
    #[must_use]
    pub fn from_config(config: &AppConfig, hashtags: Vec<String>, target_total: Option<u64>) -> Self {
        Self {
            hashtags,
            target_total,
            comment_batch_size: config.comment_batch_size,
            recent_sample_size: config.recent_sample_size,
            checkpoint_every_pages: config.checkpoint_every_pages,
            auth_retry_pause: Duration::from_secs(config.auth_retry_pause_secs),
        }
    }

    fn reached(&self, total_collected: u64) -> bool {
        self.target_total.is_some_and(|target| total_collected >= target)
    }
}

/// Totals for a bounded pass over a fixed list of targets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub new_records: u64,
    pub pages: u32,
    pub targets_completed: u32,
    pub targets_failed: u32,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DaemonSummary {
    /// New records collected by this process.
    pub new_records: u64,
    /// Running total across resumes, as recorded in the checkpoint.
    pub total_collected: u64,
    pub cycles: u32,
    pub targets_completed: u32,
    pub targets_failed: u32,
    pub cancelled: bool,
}

pub struct Orchestrator<'a> {
    source: &'a dyn PageSource,
    storage: &'a dyn Storage,
    sink: &'a dyn RecordSink,
    credentials: &'a dyn CredentialSource,
    rate: RateController,
    policy: PagePolicy,
    rng: StdRng,
    cancel: CancellationToken,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        source: &'a dyn PageSource,
        storage: &'a dyn Storage,
        sink: &'a dyn RecordSink,
        credentials: &'a dyn CredentialSource,
        rate: RateController,
        policy: PagePolicy,
    ) -> Self {
        Self {
            source,
            storage,
            sink,
            credentials,
            rate,
            policy,
            rng: StdRng::from_os_rng(),
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Deterministic queue shuffling and sampling.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    #[must_use]
    pub fn rate(&self) -> &RateController {
        &self.rate
    }

    async fn refresh(&self, session: &mut SessionContext) -> bool {
        tracing::info!(source = %self.credentials.describe(), "refreshing credentials");
        match session.refresh(self.credentials).await {
            Ok(()) if session.is_valid() => {
                tracing::info!(session = %session.session_hint(), "credentials refreshed");
                true
            }
            Ok(()) => {
                tracing::warn!("refreshed credentials are already past their maximum age");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "credential refresh failed");
                false
            }
        }
    }

    /// Make sure `session` is usable, refreshing it once if not.
    ///
    /// # Errors
    ///
    /// Returns [`CollectError::SessionUnavailable`] when the session is
    /// invalid and cannot be refreshed.
    pub async fn ensure_session(&self, session: &mut SessionContext) -> Result<(), CollectError> {
        if session.is_valid() || self.refresh(session).await {
            return Ok(());
        }
        Err(CollectError::SessionUnavailable(
            session
                .invalid_reason()
                .unwrap_or("session past its maximum age")
                .to_owned(),
        ))
    }

    /// Run each target once, in order, pausing between targets.
    ///
    /// An auth rejection triggers one credential refresh and a retry of the
    /// same target from its cursor. A target rejected again after a
    /// successful refresh counts as failed and the pass moves on.
    ///
    /// # Errors
    ///
    /// Returns [`CollectError::SessionUnavailable`] if the session cannot be
    /// restored, or [`CollectError::Storage`] if a page cannot be persisted.
    pub async fn run_targets(
        &mut self,
        targets: Vec<CollectionTarget>,
        session: &mut SessionContext,
    ) -> Result<PassSummary, CollectError> {
        self.ensure_session(session).await?;

        let count = targets.len();
        let mut summary = PassSummary::default();

        for (index, mut target) in targets.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            let mut refreshed = false;
            let outcome = loop {
                let outcome = {
                    let mut paginator = Paginator::new(
                        self.source,
                        self.sink,
                        &mut self.rate,
                        self.cancel.clone(),
                        self.policy,
                    );
                    paginator.run(&mut target, session).await?
                };
                summary.new_records += outcome.new_records;
                summary.pages += outcome.pages;

                let StopReason::AuthExpired(reason) = &outcome.stop else {
                    break outcome;
                };
                if refreshed {
                    tracing::warn!(
                        target_id = %target,
                        reason = %reason,
                        "rejected again with fresh credentials, skipping target"
                    );
                    let stop =
                        StopReason::Failed(format!("auth rejected after refresh: {reason}"));
                    break PaginationOutcome { stop, ..outcome };
                }
                if !self.refresh(session).await {
                    return Err(CollectError::SessionUnavailable(reason.clone()));
                }
                refreshed = true;
            };

            match outcome.stop {
                StopReason::Cancelled => {
                    summary.cancelled = true;
                    break;
                }
                StopReason::Failed(_) => summary.targets_failed += 1,
                _ => summary.targets_completed += 1,
            }
            log_outcome(&target, &outcome);

            if index + 1 < count {
                let pause = self.rate.target_wait();
                if !sleep_or_cancel(pause, &self.cancel).await {
                    summary.cancelled = true;
                    break;
                }
            }
        }

        Ok(summary)
    }

    /// Fetch the full profile of every username not yet enriched.
    ///
    /// # Errors
    ///
    /// Same as [`Orchestrator::run_targets`].
    pub async fn enrich_authors<I>(
        &mut self,
        usernames: I,
        session: &mut SessionContext,
    ) -> Result<PassSummary, CollectError>
    where
        I: IntoIterator<Item = String>,
    {
        let enriched = self.storage.enriched_usernames().await?;
        let targets: Vec<CollectionTarget> = usernames
            .into_iter()
            .filter(|u| !u.is_empty() && !enriched.contains(u))
            .map(|u| CollectionTarget::user_profile(&u))
            .collect();
        if targets.is_empty() {
            tracing::info!("all authors already enriched");
            return Ok(PassSummary::default());
        }

        tracing::info!(count = targets.len(), "enriching author profiles");
        self.run_targets(targets, session).await
    }

    /// Collect comments for up to `limit` of the most liked posts that have
    /// none stored yet.
    ///
    /// # Errors
    ///
    /// Same as [`Orchestrator::run_targets`].
    pub async fn backfill_comments(
        &mut self,
        limit: usize,
        session: &mut SessionContext,
    ) -> Result<PassSummary, CollectError> {
        let posts = self.storage.posts_needing_comments(limit).await?;
        tracing::info!(posts = posts.len(), "backfilling comments");
        let targets = posts
            .iter()
            .map(|p| CollectionTarget::post_comments(&p.code))
            .collect();
        self.run_targets(targets, session).await
    }

    /// One cycle's queue: every hashtag's top feed (shuffled), comments for
    /// the most liked posts lacking them, then a random sample of recent
    /// feeds.
    async fn build_cycle(
        &mut self,
        options: &DaemonOptions,
    ) -> Result<Vec<CollectionTarget>, CollectError> {
        let mut tags = options.hashtags.clone();
        tags.shuffle(&mut self.rng);
        let mut queue: Vec<CollectionTarget> =
            tags.iter().map(|t| CollectionTarget::hashtag_top(t)).collect();

        let needing = self
            .storage
            .posts_needing_comments(options.comment_batch_size)
            .await?;
        queue.extend(needing.iter().map(|p| CollectionTarget::post_comments(&p.code)));

        queue.extend(
            options
                .hashtags
                .choose_multiple(&mut self.rng, options.recent_sample_size)
                .map(|t| CollectionTarget::hashtag_recent(t)),
        );

        tracing::info!(
            top = tags.len(),
            comments = needing.len(),
            recent = queue.len() - tags.len() - needing.len(),
            "cycle queue built"
        );
        Ok(queue)
    }

    /// Run the daemon loop, resuming from `store` when a checkpoint exists.
    ///
    /// The checkpoint is written after every target, every
    /// `checkpoint_every_pages` pages, at each cycle boundary, and once more
    /// on the way out, whether the loop ended by target count, by signal or
    /// by error.
    ///
    /// # Errors
    ///
    /// Returns [`CollectError::SessionUnavailable`] when no valid session can
    /// be obtained at startup, [`CollectError::Storage`] when a write fails,
    /// and checkpoint errors from [`CheckpointStore`].
    pub async fn run_daemon(
        &mut self,
        store: &CheckpointStore,
        options: &DaemonOptions,
        session: &mut SessionContext,
    ) -> Result<DaemonSummary, CollectError> {
        self.ensure_session(session).await?;

        // Pages fetched after the last save may already be stored, so a
        // resumed target gets that many pages before a page with nothing
        // new can end it.
        let mut replay = HashMap::new();
        let mut checkpoint = match store.load()? {
            Some(mut checkpoint) => {
                tracing::info!(
                    run_id = %checkpoint.run_id,
                    cycle = checkpoint.cycle,
                    pending = checkpoint.pending().count(),
                    total_collected = checkpoint.total_collected,
                    "resuming from checkpoint"
                );
                checkpoint.hashtags.clone_from(&options.hashtags);
                replay = checkpoint
                    .pending()
                    .map(|t| {
                        let through =
                            t.pages_fetched.saturating_add(options.checkpoint_every_pages);
                        (t.to_string(), through)
                    })
                    .collect();
                checkpoint
            }
            None => {
                let checkpoint = ProgressCheckpoint::fresh(options.hashtags.clone(), Utc::now());
                tracing::info!(run_id = %checkpoint.run_id, "starting fresh run");
                checkpoint
            }
        };

        let mut summary = DaemonSummary::default();
        let result = self
            .daemon_loop(
                store,
                options,
                session,
                &mut checkpoint,
                &mut replay,
                &mut summary,
            )
            .await;

        let saved = save_progress(self.storage, store, &mut checkpoint).await;
        summary.total_collected = checkpoint.total_collected;

        match (result, saved) {
            (Err(e), saved) => {
                if let Err(save_err) = saved {
                    tracing::error!(error = %save_err, "final checkpoint could not be written");
                }
                Err(e)
            }
            (Ok(()), Err(e)) => Err(e),
            (Ok(()), Ok(())) => {
                tracing::info!(
                    new_records = summary.new_records,
                    total_collected = summary.total_collected,
                    cycles = summary.cycles,
                    cancelled = summary.cancelled,
                    "daemon stopped"
                );
                Ok(summary)
            }
        }
    }

    async fn daemon_loop(
        &mut self,
        store: &CheckpointStore,
        options: &DaemonOptions,
        session: &mut SessionContext,
        checkpoint: &mut ProgressCheckpoint,
        replay: &mut HashMap<String, u32>,
        summary: &mut DaemonSummary,
    ) -> Result<(), CollectError> {
        let mut pages_since_save = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                summary.cancelled = true;
                return Ok(());
            }
            if options.reached(checkpoint.total_collected) {
                tracing::info!(total_collected = checkpoint.total_collected, "target count reached");
                return Ok(());
            }

            checkpoint.targets.retain(|t| !t.done);
            if checkpoint.targets.is_empty() {
                if checkpoint.cycle > 0 {
                    let pause = self.rate.cycle_wait();
                    tracing::info!(
                        cycle = checkpoint.cycle,
                        total_collected = checkpoint.total_collected,
                        pause_secs = pause.as_secs(),
                        "cycle complete"
                    );
                    save_progress(self.storage, store, checkpoint).await?;
                    if !sleep_or_cancel(pause, &self.cancel).await {
                        summary.cancelled = true;
                        return Ok(());
                    }
                }
                replay.clear();
                checkpoint.targets = self.build_cycle(options).await?;
                checkpoint.cycle += 1;
                summary.cycles += 1;
                save_progress(self.storage, store, checkpoint).await?;
                continue;
            }

            // Some(stop) once the target stops; None when the target count
            // is reached mid-target.
            let stop = {
                let window = replay
                    .get(&checkpoint.targets[0].to_string())
                    .copied()
                    .unwrap_or(0);
                let mut paginator = Paginator::new(
                    self.source,
                    self.sink,
                    &mut self.rate,
                    self.cancel.clone(),
                    self.policy,
                )
                .with_replay_window(window);
                loop {
                    let report = match paginator.step(&mut checkpoint.targets[0], session).await {
                        Ok(report) => report,
                        Err(e) => {
                            tracing::error!(
                                target_id = %checkpoint.targets[0],
                                error = %e,
                                "storage failure, aborting run"
                            );
                            return Err(e.into());
                        }
                    };
                    checkpoint.total_collected += report.new_records;
                    summary.new_records += report.new_records;

                    if report.page_fetched {
                        pages_since_save += 1;
                        if pages_since_save >= options.checkpoint_every_pages {
                            save_progress(self.storage, store, checkpoint).await?;
                            pages_since_save = 0;
                        }
                    }
                    if report.stop.is_some() {
                        break report.stop;
                    }
                    if options.reached(checkpoint.total_collected) {
                        break None;
                    }
                }
            };

            let Some(stop) = stop else {
                continue;
            };

            match &stop {
                StopReason::Cancelled => {
                    summary.cancelled = true;
                    return Ok(());
                }
                StopReason::AuthExpired(reason) => {
                    if self.refresh(session).await {
                        continue;
                    }
                    tracing::warn!(
                        reason = %reason,
                        pause_secs = options.auth_retry_pause.as_secs(),
                        "cannot refresh credentials, pausing before retrying"
                    );
                    save_progress(self.storage, store, checkpoint).await?;
                    if !sleep_or_cancel(options.auth_retry_pause, &self.cancel).await {
                        summary.cancelled = true;
                        return Ok(());
                    }
                    continue;
                }
                StopReason::Failed(_) => summary.targets_failed += 1,
                StopReason::Exhausted | StopReason::PageCap | StopReason::NoNewRecords => {
                    summary.targets_completed += 1;
                }
            }

            checkpoint.targets.retain(|t| !t.done);
            save_progress(self.storage, store, checkpoint).await?;
            pages_since_save = 0;

            if !checkpoint.targets.is_empty() && !options.reached(checkpoint.total_collected) {
                let pause = self.rate.target_wait();
                if !sleep_or_cancel(pause, &self.cancel).await {
                    summary.cancelled = true;
                    return Ok(());
                }
            }
        }
    }
}

/// Flush buffered records, then write the checkpoint, so a saved cursor
/// never points past records that only lived in memory.
async fn save_progress(
    storage: &dyn Storage,
    store: &CheckpointStore,
    checkpoint: &mut ProgressCheckpoint,
) -> Result<(), CollectError> {
    storage.flush().await?;
    checkpoint.touch(Utc::now());
    store.save(checkpoint)
}

fn log_outcome(target: &CollectionTarget, outcome: &PaginationOutcome) {
    let kind = match target.kind {
        TargetKind::HashtagTop | TargetKind::HashtagRecent => "hashtag",
        TargetKind::PostComments => "comments",
        TargetKind::UserProfile => "profile",
    };
    tracing::info!(
        target_id = %target,
        kind,
        pages = outcome.pages,
        new_records = outcome.new_records,
        reason = %outcome.stop,
        "target done"
    );
}

#[cfg(test)]
#[path = "orchestrator_test.rs"]
mod tests;
