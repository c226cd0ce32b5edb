//! Polymarket Window Tracker CLI
//!
//! Commands:
//! - `track`: Follow one market (slug or URL) until it resolves
//! - `run`: Track consecutive windows until Ctrl+C
//!
//! # Usage
//! ```bash
//! # One market by slug or URL
//! pm_tracker track btc-updown-5m-1767603600
//! pm_tracker track https://polymarket.com/event/btc-updown-5m-1767603600 --stream
//!
//! # Continuous 5-minute BTC windows, sessions written to ./sessions
//! pm_tracker run --out-dir sessions
//!
//! # Unattended: no outcome prompt, infer from prices as a last resort
//! pm_tracker run --no-prompt --infer-threshold 0.95
//! ```
//!
//! Env overrides: PM_GAMMA_API, PM_CLOB_API, PM_CLOB_WSS, PM_TRACKER_OUT_DIR

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use polymarket_tracker::outcome::{NoOracle, OutcomeOracle, OutcomeState};
use polymarket_tracker::types::MarketDescriptor;
use polymarket_tracker::{TrackReport, Tracker, TrackerConfig, TrackerContext, WindowPolicy};

/// How long the outcome prompt waits before giving up
const PROMPT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Parser)]
#[command(name = "pm_tracker")]
#[command(about = "Polymarket rolling-window price session tracker")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Track one market until it resolves
    Track {
        /// Market slug or polymarket.com URL
        market: String,

        #[command(flatten)]
        opts: TrackerOpts,
    },

    /// Track consecutive windows until Ctrl+C
    Run {
        #[command(flatten)]
        opts: TrackerOpts,
    },
}

#[derive(Args)]
struct TrackerOpts {
    /// Directory for pm_session_<slug>.json files
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Window framing: floor (slug names the start) or ceiling (slug names the end)
    #[arg(long, default_value = "floor")]
    policy: String,

    /// Window length in seconds
    #[arg(long, default_value = "300")]
    window_secs: i64,

    /// Slug prefix for derived windows (default depends on policy)
    #[arg(long)]
    slug_prefix: Option<String>,

    /// Sampling interval in milliseconds (1000-2000)
    #[arg(long, default_value = "2000")]
    tick_ms: u64,

    /// Read prices from the market channel, REST as fallback
    #[arg(long, default_value = "false")]
    stream: bool,

    /// Do not ask for the outcome when settlement is unavailable
    #[arg(long, default_value = "false")]
    no_prompt: bool,

    /// Infer the outcome from the last point when one side is at or above this price
    #[arg(long)]
    infer_threshold: Option<f64>,
}

impl TrackerOpts {
    fn to_config(&self) -> Result<TrackerConfig> {
        let policy: WindowPolicy = self.policy.parse()?;
        let mut config = TrackerConfig::from_env().with_policy(policy);

        config.window_secs = self.window_secs;
        if let Some(prefix) = &self.slug_prefix {
            config.slug_prefix = prefix.clone();
        }
        config.tick_interval = Duration::from_millis(self.tick_ms);
        config.streaming = self.stream;
        config.infer_threshold = self.infer_threshold;
        if let Some(dir) = &self.out_dir {
            config.out_dir = dir.clone();
        }

        config.validate()?;
        Ok(config)
    }

    fn oracle(&self, interrupted: Arc<AtomicBool>) -> Arc<dyn OutcomeOracle> {
        if self.no_prompt {
            Arc::new(NoOracle)
        } else {
            Arc::new(StdinOracle::new(tokio::io::stdin(), interrupted, PROMPT_TIMEOUT))
        }
    }
}

/// Asks the operator on stdin
///
/// One reader task owns the input for the life of the oracle. A prompt that times out
/// leaves the read pending in that task, so a late answer is discarded at the next
/// prompt instead of being lost to an abandoned reader.
struct StdinOracle {
    lines: Mutex<mpsc::Receiver<String>>,
    interrupted: Arc<AtomicBool>,
    timeout: Duration,
}

impl StdinOracle {
    fn new<R>(input: R, interrupted: Arc<AtomicBool>, timeout: Duration) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            let mut lines = BufReader::new(input).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tx.send(line).await.is_err() {
                    break;
                }
            }
        });
        Self { lines: Mutex::new(rx), interrupted, timeout }
    }
}

#[async_trait]
impl OutcomeOracle for StdinOracle {
    async fn ask(&self, market: &MarketDescriptor) -> Option<String> {
        if self.interrupted.load(Ordering::Relaxed) {
            return None;
        }

        let labels: Vec<&str> = market.tokens.iter().map(|t| t.label.as_str()).collect();
        let prompt = if market.is_binary() {
            format!("\nWhat was the outcome of {}? (u={} / d={} / skip=Enter): ", market.slug, labels[0], labels[1])
        } else {
            format!("\nWhat was the outcome of {}? ({} / skip=Enter): ", market.slug, labels.join(" / "))
        };

        let mut lines = self.lines.lock().await;
        // Typed while nobody was asking
        while let Ok(stale) = lines.try_recv() {
            debug!("Discarding unprompted input: {:?}", stale);
        }

        let mut stdout = tokio::io::stdout();
        if stdout.write_all(prompt.as_bytes()).await.is_err() || stdout.flush().await.is_err() {
            return None;
        }

        match tokio::time::timeout(self.timeout, lines.recv()).await {
            Ok(Some(line)) => Some(line.trim().to_string()).filter(|s| !s.is_empty()),
            Ok(None) => None,
            Err(_) => {
                warn!("No answer within {}s, skipping", self.timeout.as_secs());
                None
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt().with_env_filter(env_filter).with_target(false).init();

    // Setup Ctrl+C handler: first press stops after a save, second exits
    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupted_clone = interrupted.clone();

    tokio::spawn(async move {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            if interrupted_clone.swap(true, Ordering::Relaxed) {
                warn!("Second Ctrl+C, exiting without saving");
                std::process::exit(130);
            }
            info!("Received Ctrl+C, saving and shutting down...");
        }
    });

    match cli.command {
        Commands::Track { market, opts } => run_track(&market, &opts, interrupted).await,
        Commands::Run { opts } => run_continuous(&opts, interrupted).await,
    }
}

fn build_tracker(opts: &TrackerOpts, interrupted: Arc<AtomicBool>) -> Result<Tracker> {
    let config = opts.to_config().context("Invalid tracker options")?;
    let oracle = opts.oracle(interrupted.clone());
    let ctx = TrackerContext::live(config, oracle, interrupted)?;
    Tracker::new(ctx)
}

async fn run_track(market: &str, opts: &TrackerOpts, interrupted: Arc<AtomicBool>) -> Result<()> {
    let tracker = build_tracker(opts, interrupted)?;
    info!("Saving files to: {}", tracker.context().store.dir().display());

    match tracker.track_input(market).await? {
        TrackReport::NotFound { slug } => {
            warn!("Market not found: {}", slug);
        }
        TrackReport::Interrupted { path, points } => {
            info!("Stopped early with {} points: {}", points, path.display());
        }
        TrackReport::Completed { path, points, outcome } => {
            match outcome {
                OutcomeState::Settled { label, source } => {
                    info!("Outcome: {} ({:?})", label, source);
                }
                OutcomeState::Pending | OutcomeState::Unknown => {
                    info!("Outcome unknown");
                }
            }
            info!("Session complete: {} points in {}", points, path.display());
        }
    }

    Ok(())
}

async fn run_continuous(opts: &TrackerOpts, interrupted: Arc<AtomicBool>) -> Result<()> {
    let tracker = build_tracker(opts, interrupted)?;
    info!("Press Ctrl+C to stop.");
    tracker.run().await
}
