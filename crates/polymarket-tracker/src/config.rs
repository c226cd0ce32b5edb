//! Tracker configuration
//!
//! Defaults cover a 5-minute BTC up/down window sampled every 2 s. Endpoints and the
//! output directory can be overridden from the environment:
//! - `PM_GAMMA_API`: Gamma base URL
//! - `PM_CLOB_API`: CLOB REST base URL
//! - `PM_CLOB_WSS`: market channel WebSocket URL
//! - `PM_TRACKER_OUT_DIR`: where session files are written

use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;

use crate::httpws::{RetryPolicy, DEFAULT_RECONNECT_DELAY, DEFAULT_REQUEST_TIMEOUT};
use crate::window::{WindowPolicy, DEFAULT_WINDOW_SECS};
use crate::{CLOB_REST_BASE, CLOB_WSS_ENDPOINT, GAMMA_API_BASE};

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_CHECKPOINT_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_OUTCOME_POLL_INTERVAL: Duration = Duration::from_secs(3);
pub const DEFAULT_OUTCOME_POLL_ATTEMPTS: u32 = 20;
pub const DEFAULT_RUN_GAP: Duration = Duration::from_secs(3);

const MIN_TICK: Duration = Duration::from_secs(1);
const MAX_TICK: Duration = Duration::from_secs(2);

#[derive(Clone, Debug)]
pub struct TrackerConfig {
    /// Window length in seconds
    pub window_secs: i64,
    pub policy: WindowPolicy,
    /// Slug prefix for derived windows (e.g. `btc-updown-5m`)
    pub slug_prefix: String,
    pub tick_interval: Duration,
    /// Minimum time between durability saves while sampling
    pub checkpoint_interval: Duration,
    /// Read prices from the market channel first
    pub streaming: bool,
    pub reconnect_delay: Duration,
    pub outcome_poll_interval: Duration,
    pub outcome_poll_attempts: u32,
    /// Last-resort outcome guess from the final point; `None` disables it
    pub infer_threshold: Option<f64>,
    /// Pause between windows in continuous mode
    pub run_gap: Duration,
    pub out_dir: PathBuf,
    pub gamma_base: String,
    pub clob_base: String,
    pub clob_wss: String,
    /// Per-request timeout for Gamma and CLOB REST calls
    pub request_timeout: Duration,
    /// Retry budget for every REST call; kept small so a tick or poll stays on cadence
    pub retry: RetryPolicy,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        let policy = WindowPolicy::Floor;
        Self {
            window_secs: DEFAULT_WINDOW_SECS,
            policy,
            slug_prefix: policy.default_slug_prefix().to_string(),
            tick_interval: DEFAULT_TICK_INTERVAL,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            streaming: false,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            outcome_poll_interval: DEFAULT_OUTCOME_POLL_INTERVAL,
            outcome_poll_attempts: DEFAULT_OUTCOME_POLL_ATTEMPTS,
            infer_threshold: None,
            run_gap: DEFAULT_RUN_GAP,
            out_dir: PathBuf::from("."),
            gamma_base: GAMMA_API_BASE.to_string(),
            clob_base: CLOB_REST_BASE.to_string(),
            clob_wss: CLOB_WSS_ENDPOINT.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry: RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(200),
                max_delay: Duration::from_secs(1),
            },
        }
    }
}

impl TrackerConfig {
    /// Defaults with endpoint and output overrides from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("PM_GAMMA_API") {
            config.gamma_base = v;
        }
        if let Some(v) = get("PM_CLOB_API") {
            config.clob_base = v;
        }
        if let Some(v) = get("PM_CLOB_WSS") {
            config.clob_wss = v;
        }
        if let Some(v) = get("PM_TRACKER_OUT_DIR") {
            config.out_dir = PathBuf::from(v);
        }
        config
    }

    /// Switch policy; the slug prefix follows unless it was customized
    pub fn with_policy(mut self, policy: WindowPolicy) -> Self {
        if self.slug_prefix == self.policy.default_slug_prefix() {
            self.slug_prefix = policy.default_slug_prefix().to_string();
        }
        self.policy = policy;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.window_secs <= 0 {
            anyhow::bail!("Window length must be positive, got {}s", self.window_secs);
        }
        if self.tick_interval < MIN_TICK || self.tick_interval > MAX_TICK {
            anyhow::bail!(
                "Tick interval must be between {}ms and {}ms, got {}ms",
                MIN_TICK.as_millis(),
                MAX_TICK.as_millis(),
                self.tick_interval.as_millis()
            );
        }
        if let Some(threshold) = self.infer_threshold {
            if !(threshold > 0.5 && threshold < 1.0) {
                anyhow::bail!("Inference threshold must be in (0.5, 1.0), got {}", threshold);
            }
        }
        if self.outcome_poll_attempts == 0 {
            anyhow::bail!("Outcome poll attempts must be at least 1");
        }
        Ok(())
    }
}
