mod auth;
mod collect;
mod setup;
mod stats;

use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand, ValueEnum};
use igminer_collector::DEFAULT_CHECKPOINT_FILE;
use igminer_core::{StorageKind, TargetKind};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "igminer")]
#[command(about = "Resumable, rate-aware Instagram collection")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every command. Storage flags override the settings file.
#[derive(Debug, Clone, Args)]
struct GlobalArgs {
    /// Cookie JSON file holding the session
    #[arg(long, global = true, env = "IGMINER_COOKIES", default_value = "ig_cookies.json")]
    cookies: PathBuf,

    #[arg(long, global = true, value_enum)]
    storage: Option<StorageArg>,

    /// SQLite database path
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// JSON output directory
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    #[arg(long, global = true, env = "IGMINER_HOSTED_URL")]
    hosted_url: Option<String>,

    #[arg(long, global = true, env = "IGMINER_HOSTED_KEY", hide_env_values = true)]
    hosted_key: Option<String>,

    #[arg(long, global = true)]
    hosted_schema: Option<String>,

    /// Bucket for downloaded images on the hosted backend
    #[arg(long, global = true)]
    hosted_bucket: Option<String>,

    /// Daemon progress checkpoint
    #[arg(long, global = true, default_value = DEFAULT_CHECKPOINT_FILE)]
    checkpoint: PathBuf,

    /// YAML settings file (hashtags, storage)
    #[arg(long, global = true, env = "IGMINER_CONFIG")]
    config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StorageArg {
    Sqlite,
    Json,
    Hosted,
}

impl From<StorageArg> for StorageKind {
    fn from(arg: StorageArg) -> Self {
        match arg {
            StorageArg::Sqlite => StorageKind::Sqlite,
            StorageArg::Json => StorageKind::Json,
            StorageArg::Hosted => StorageKind::Hosted,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TabArg {
    Top,
    Recent,
}

impl From<TabArg> for TargetKind {
    fn from(tab: TabArg) -> Self {
        match tab {
            TabArg::Top => TargetKind::HashtagTop,
            TabArg::Recent => TargetKind::HashtagRecent,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Extract fresh session cookies and save them to the cookie file
    Auth {
        /// Import cookies from this JSON file instead of running the cookie command
        #[arg(long)]
        from_file: Option<PathBuf>,
    },
    /// One bounded pass over the given hashtags
    Scrape {
        #[arg(required = true)]
        hashtags: Vec<String>,

        #[arg(long, value_enum, default_value_t = TabArg::Top)]
        tab: TabArg,

        /// Page cap per hashtag (default from IGMINER_MAX_PAGES_TOP/RECENT)
        #[arg(long)]
        pages: Option<u32>,

        #[arg(long)]
        no_images: bool,

        /// Skip fetching full profiles of post authors
        #[arg(long)]
        no_enrich: bool,
    },
    /// Collect comments for the most liked posts that have none stored
    Comments {
        #[arg(long, default_value_t = 200)]
        limit: usize,
    },
    /// Show storage counts
    Stats,
    /// Cycle through hashtags until the target count or a shutdown signal
    Daemon {
        /// Hashtags to cycle (default: settings file, then the built-in list)
        #[arg(long, num_args = 1..)]
        hashtags: Vec<String>,

        /// Stop after this many new records; 0 runs until stopped
        #[arg(long, default_value_t = 100_000)]
        target: u64,

        #[arg(long)]
        no_images: bool,
    },
}

fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = igminer_core::load_app_config_from_env().context("invalid configuration")?;
    init_tracing(if cli.global.verbose {
        "debug"
    } else {
        &config.log_level
    });

    if let Commands::Auth { from_file } = &cli.command {
        return auth::run_auth(&config, &cli.global.cookies, from_file.as_deref()).await;
    }

    let ctx = setup::Context::from_args(&cli.global, config)?;
    match cli.command {
        Commands::Auth { .. } => Ok(()),
        Commands::Scrape {
            hashtags,
            tab,
            pages,
            no_images,
            no_enrich,
        } => {
            let args = collect::ScrapeArgs {
                hashtags,
                kind: tab.into(),
                pages,
                images: !no_images,
                enrich: !no_enrich,
            };
            collect::run_scrape(&ctx, &args).await
        }
        Commands::Comments { limit } => collect::run_comments(&ctx, limit).await,
        Commands::Stats => stats::run_stats(&ctx).await,
        Commands::Daemon {
            hashtags,
            target,
            no_images,
        } => collect::run_daemon(&ctx, &hashtags, target, !no_images).await,
    }
}
