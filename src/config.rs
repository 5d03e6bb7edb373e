use std::time::Duration;

use serde::Deserialize;

/// Runtime configuration, loaded from `COURIER_`-prefixed environment
/// variables.
///
/// Every pacing interval of the dispatch loop is explicit configuration here
/// rather than a constant inside the loop.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// Explicit database file path. When unset, the store walks the
    /// candidate-location ladder (application dir, roaming profile, local
    /// profile, system temp).
    pub db_path: Option<String>,

    /// Explicit audit ledger path. Defaults to `deliveries.csv` next to the
    /// resolved database.
    pub audit_path: Option<String>,

    /// HTTP listen port for the producer/status surface.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Sleep between polls while the queue is empty.
    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,

    /// Pacing delay before every delivery attempt.
    #[serde(default = "default_pre_send_delay_ms")]
    pub pre_send_delay_ms: u64,

    /// Additional throttle after a successful delivery.
    #[serde(default = "default_post_send_delay_ms")]
    pub post_send_delay_ms: u64,

    /// Backoff after an iteration-level failure.
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,

    /// Trailing window for exact-duplicate suppression. 0 disables the check.
    #[serde(default = "default_duplicate_window_secs")]
    pub duplicate_window_secs: u64,

    /// Per-signal timeout for session classification probes.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Interval between session state polls.
    #[serde(default = "default_session_poll_ms")]
    pub session_poll_ms: u64,

    /// How many times a message abandoned in PROCESSING by a crash may be
    /// returned to PENDING before it is finalized as ERROR.
    #[serde(default = "default_stale_requeue_limit")]
    pub stale_requeue_limit: u32,
}

fn default_port() -> u16 {
    8000
}

fn default_idle_poll_ms() -> u64 {
    3000
}

fn default_pre_send_delay_ms() -> u64 {
    2000
}

fn default_post_send_delay_ms() -> u64 {
    3000
}

fn default_error_backoff_ms() -> u64 {
    5000
}

fn default_duplicate_window_secs() -> u64 {
    60
}

fn default_probe_timeout_ms() -> u64 {
    1000
}

fn default_session_poll_ms() -> u64 {
    3000
}

fn default_stale_requeue_limit() -> u32 {
    3
}

impl Config {
    pub fn load() -> eyre::Result<Self> {
        Ok(envy::prefixed("COURIER_").from_env::<Self>()?)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    pub fn pre_send_delay(&self) -> Duration {
        Duration::from_millis(self.pre_send_delay_ms)
    }

    pub fn post_send_delay(&self) -> Duration {
        Duration::from_millis(self.post_send_delay_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn session_poll(&self) -> Duration {
        Duration::from_millis(self.session_poll_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: None,
            audit_path: None,
            port: default_port(),
            idle_poll_ms: default_idle_poll_ms(),
            pre_send_delay_ms: default_pre_send_delay_ms(),
            post_send_delay_ms: default_post_send_delay_ms(),
            error_backoff_ms: default_error_backoff_ms(),
            duplicate_window_secs: default_duplicate_window_secs(),
            probe_timeout_ms: default_probe_timeout_ms(),
            session_poll_ms: default_session_poll_ms(),
            stale_requeue_limit: default_stale_requeue_limit(),
        }
    }
}
