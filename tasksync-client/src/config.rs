use backon::{BackoffBuilder, ExponentialBuilder};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

pub const DEFAULT_DATABASE_URL: &str = "sqlite:tasksync.db";
pub const DEFAULT_SERVER_URL: &str = "ws://localhost:8080/ws";

/// Backoff applied to queue entries whose remote write failed.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Failed attempts after which an entry needs resolution.
    pub max_attempts: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub factor: f32,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            factor: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts, escalation after `max_attempts` failures.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            factor: 1.0,
            jitter: false,
        }
    }

    fn builder(&self) -> ExponentialBuilder {
        let builder = ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_factor(self.factor)
            .with_max_times(self.max_attempts as usize);
        if self.jitter {
            builder.with_jitter()
        } else {
            builder
        }
    }

    /// Wait before the next attempt of an entry that has failed `attempts`
    /// times, or `None` once the entry has used up its attempts.
    pub fn delay_after(&self, attempts: u32) -> Option<Duration> {
        if attempts >= self.max_attempts {
            return None;
        }
        if attempts == 0 {
            return Some(Duration::ZERO);
        }
        self.builder().build().nth(attempts as usize - 1)
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub database_url: String,
    pub server_url: String,
    pub owner_id: Option<String>,
    pub retry: RetryPolicy,
    /// Upper bound on each remote request.
    pub request_timeout: Duration,
    /// Periodic reconcile in addition to connectivity and foreground
    /// transitions. Off by default.
    pub resync_interval: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            server_url: DEFAULT_SERVER_URL.to_string(),
            owner_id: None,
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(10),
            resync_interval: None,
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `TASKSYNC_DATABASE_URL`, `TASKSYNC_SERVER_URL`
    /// and `TASKSYNC_OWNER`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("TASKSYNC_DATABASE_URL") {
            config.database_url = url;
        }
        if let Ok(url) = std::env::var("TASKSYNC_SERVER_URL") {
            config.server_url = url;
        }
        config.owner_id = std::env::var("TASKSYNC_OWNER").ok().filter(|o| !o.is_empty());
        config
    }

    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    pub fn with_resync_interval(mut self, interval: Duration) -> Self {
        self.resync_interval = Some(interval);
        self
    }
}

/// Install a fmt subscriber filtered by `RUST_LOG`, falling back to
/// `default_filter`. Does nothing if a subscriber is already set.
pub fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
