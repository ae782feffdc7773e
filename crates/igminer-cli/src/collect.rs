//! Collection command handlers: `scrape`, `comments` and `daemon`.
//!
//! Each handler opens storage, loads the session and runs the orchestrator
//! with a cancellation token wired to SIGINT/SIGTERM. Storage is closed on
//! every exit path so buffered backends flush.

use anyhow::Context as _;
use igminer_collector::{
    cancel_on_signal, CheckpointStore, DaemonOptions, Orchestrator, PagePolicy, PidFile,
    StorageSink, DEFAULT_PID_FILE,
};
use igminer_core::{CollectionTarget, TargetKind};
use igminer_db::Storage;
use igminer_scraper::{IgClient, RateController, RateLimits};
use tokio_util::sync::CancellationToken;

use crate::setup::{normalize_hashtags, Context};

pub(crate) struct ScrapeArgs {
    pub(crate) hashtags: Vec<String>,
    pub(crate) kind: TargetKind,
    pub(crate) pages: Option<u32>,
    pub(crate) images: bool,
    pub(crate) enrich: bool,
}

async fn open(ctx: &Context) -> anyhow::Result<(Box<dyn Storage>, IgClient)> {
    let client = IgClient::from_config(&ctx.config).context("failed to build API client")?;
    let storage = igminer_db::open_storage(&ctx.storage)
        .await
        .context("failed to open storage")?;
    Ok((storage, client))
}

async fn close(storage: &dyn Storage) {
    if let Err(e) = storage.close().await {
        tracing::error!(backend = storage.name(), error = %e, "storage close failed");
    }
}

fn rate_controller(ctx: &Context) -> RateController {
    RateController::new(RateLimits::from_config(&ctx.config))
}

/// One bounded pass over `args.hashtags`, then optional author enrichment.
pub(crate) async fn run_scrape(ctx: &Context, args: &ScrapeArgs) -> anyhow::Result<()> {
    let hashtags = normalize_hashtags(&args.hashtags);
    anyhow::ensure!(!hashtags.is_empty(), "no usable hashtags given");

    let (storage, client) = open(ctx).await?;
    let credentials = ctx.credential_source();
    let cancel = CancellationToken::new();
    let signals = cancel_on_signal(cancel.clone());

    let result = async {
        let mut session = ctx.load_session(&credentials).await?;
        let mut sink = StorageSink::new(storage.as_ref());
        if args.images {
            sink = sink.with_images(&client);
        }
        let mut policy = PagePolicy::from_config(&ctx.config);
        if let Some(pages) = args.pages {
            policy = policy.with_hashtag_cap(pages);
        }

        tracing::info!(
            hashtags = ?hashtags,
            tab = args.kind.tab().unwrap_or("top"),
            backend = storage.name(),
            images = args.images,
            "starting scrape"
        );

        let mut orchestrator = Orchestrator::new(
            &client,
            storage.as_ref(),
            &sink,
            &credentials,
            rate_controller(ctx),
            policy,
        )
        .with_cancel(cancel.clone());

        let targets = hashtags
            .iter()
            .map(|tag| CollectionTarget::new(args.kind, tag.as_str()))
            .collect();
        let pass = orchestrator.run_targets(targets, &mut session).await?;
        println!(
            "scraped {} hashtags: {} new records over {} pages ({} failed)",
            pass.targets_completed, pass.new_records, pass.pages, pass.targets_failed
        );

        if args.enrich && !pass.cancelled {
            let enriched = orchestrator
                .enrich_authors(sink.authors(), &mut session)
                .await?;
            println!("enriched {} author profiles", enriched.targets_completed);
        }
        anyhow::Ok(())
    }
    .await;

    close(storage.as_ref()).await;
    signals.abort();
    result
}

/// Comment backfill for up to `limit` posts.
pub(crate) async fn run_comments(ctx: &Context, limit: usize) -> anyhow::Result<()> {
    let (storage, client) = open(ctx).await?;
    let credentials = ctx.credential_source();
    let cancel = CancellationToken::new();
    let signals = cancel_on_signal(cancel.clone());

    let result = async {
        let mut session = ctx.load_session(&credentials).await?;
        let sink = StorageSink::new(storage.as_ref());
        let mut orchestrator = Orchestrator::new(
            &client,
            storage.as_ref(),
            &sink,
            &credentials,
            rate_controller(ctx),
            PagePolicy::from_config(&ctx.config),
        )
        .with_cancel(cancel.clone());

        let pass = orchestrator.backfill_comments(limit, &mut session).await?;
        println!(
            "collected {} new comments from {} posts ({} failed)",
            pass.new_records, pass.targets_completed, pass.targets_failed
        );
        anyhow::Ok(())
    }
    .await;

    close(storage.as_ref()).await;
    signals.abort();
    result
}

/// The continuous daemon loop. A shutdown signal ends it with exit code 0.
pub(crate) async fn run_daemon(
    ctx: &Context,
    hashtags: &[String],
    target: u64,
    images: bool,
) -> anyhow::Result<()> {
    let hashtags = if hashtags.is_empty() {
        ctx.settings.daemon_hashtags()
    } else {
        normalize_hashtags(hashtags)
    };
    anyhow::ensure!(!hashtags.is_empty(), "no usable hashtags given");

    let _pid_file = PidFile::acquire(ctx.checkpoint.with_file_name(DEFAULT_PID_FILE))?;
    let (storage, client) = open(ctx).await?;
    let credentials = ctx.credential_source();
    let cancel = CancellationToken::new();
    let signals = cancel_on_signal(cancel.clone());

    let result = async {
        let mut session = ctx.load_session(&credentials).await?;
        let mut sink = StorageSink::new(storage.as_ref());
        if images {
            sink = sink.with_images(&client);
        }
        let options =
            DaemonOptions::from_config(&ctx.config, hashtags, (target > 0).then_some(target));
        tracing::info!(
            hashtags = options.hashtags.len(),
            target_total = ?options.target_total,
            backend = storage.name(),
            checkpoint = %ctx.checkpoint.display(),
            "starting daemon"
        );

        let mut orchestrator = Orchestrator::new(
            &client,
            storage.as_ref(),
            &sink,
            &credentials,
            rate_controller(ctx),
            PagePolicy::from_config(&ctx.config),
        )
        .with_cancel(cancel.clone());

        let store = CheckpointStore::new(&ctx.checkpoint);
        let summary = orchestrator.run_daemon(&store, &options, &mut session).await?;
        println!(
            "daemon stopped after {} cycles: {} new records this run, {} total",
            summary.cycles, summary.new_records, summary.total_collected
        );
        anyhow::Ok(())
    }
    .await;

    close(storage.as_ref()).await;
    signals.abort();
    result
}
