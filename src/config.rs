use std::env;
use std::time::Duration;
use tracing::warn;

/// Push-stream endpoint configuration.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// WebSocket URL (ws:// or wss://).
    pub url: String,
    /// Access token attached to the stream URL, if already known.
    pub access_token: Option<String>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:3002/ws".to_string(),
            access_token: None,
        }
    }
}

/// Snapshot polling configuration.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Full snapshot endpoint.
    pub snapshot_url: String,
    /// Base URL for per-roulette detail; the roulette key is appended.
    pub detailed_url: String,
    /// Interval of the defensive poll.
    pub interval: Duration,
    /// Per-request timeout; a timeout counts as a failure.
    pub timeout: Duration,
    /// Consecutive failures that trigger a stream reconnect.
    pub failure_threshold: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            snapshot_url: "http://127.0.0.1:3002/api/roulettes".to_string(),
            detailed_url: "http://127.0.0.1:3002/api/roulettes/detailed".to_string(),
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(10),
            failure_threshold: 3,
        }
    }
}

/// Reconnect backoff configuration.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub base: Duration,
    /// Upper bound on any single delay.
    pub max: Duration,
    /// Jitter as a fraction of the un-jittered delay (clamped to 0.0-1.0).
    pub jitter: f64,
    /// Consecutive failures before giving up until a manual reconnect.
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
            jitter: 0.2,
            max_attempts: 10,
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Status API host address.
    pub host: String,
    /// Status API port.
    pub port: u16,
    pub stream: StreamConfig,
    pub poll: PollConfig,
    pub backoff: BackoffConfig,
    /// Maximum spins kept per roulette.
    pub history_cap: usize,
    /// Interval of the connection health check.
    pub supervisor_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            stream: StreamConfig::default(),
            poll: PollConfig::default(),
            backoff: BackoffConfig::default(),
            history_cap: 1000,
            supervisor_interval: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Config::default();

        let parse_ms = |key: &str, default: Duration| {
            env::var(key)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(default)
        };

        Self {
            host: env::var("HOST").unwrap_or(defaults.host),
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            stream: StreamConfig {
                url: env::var("STREAM_URL").unwrap_or(defaults.stream.url),
                access_token: env::var("ACCESS_TOKEN")
                    .ok()
                    .filter(|t| !t.trim().is_empty()),
            },
            poll: PollConfig {
                snapshot_url: env::var("SNAPSHOT_URL").unwrap_or(defaults.poll.snapshot_url),
                detailed_url: env::var("DETAILED_URL").unwrap_or(defaults.poll.detailed_url),
                interval: parse_ms("POLL_INTERVAL_MS", defaults.poll.interval),
                timeout: parse_ms("POLL_TIMEOUT_MS", defaults.poll.timeout),
                failure_threshold: env::var("POLL_FAILURE_THRESHOLD")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .filter(|v| *v > 0)
                    .unwrap_or(defaults.poll.failure_threshold),
            },
            backoff: BackoffConfig {
                base: parse_ms("RECONNECT_BASE_MS", defaults.backoff.base),
                max: parse_ms("RECONNECT_MAX_MS", defaults.backoff.max),
                jitter: env::var("RECONNECT_JITTER")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.backoff.jitter),
                max_attempts: env::var("RECONNECT_MAX_ATTEMPTS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.backoff.max_attempts),
            },
            history_cap: env::var("HISTORY_CAP")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|v| *v > 0)
                .unwrap_or(defaults.history_cap),
            supervisor_interval: parse_ms("SUPERVISOR_INTERVAL_MS", defaults.supervisor_interval),
        }
    }

    /// Replace zero timer periods with their defaults; tokio intervals reject zero.
    pub fn with_nonzero_intervals(mut self) -> Self {
        let defaults = Config::default();
        if self.poll.interval.is_zero() {
            warn!("Poll interval is zero; using {:?}", defaults.poll.interval);
            self.poll.interval = defaults.poll.interval;
        }
        if self.poll.timeout.is_zero() {
            warn!("Poll timeout is zero; using {:?}", defaults.poll.timeout);
            self.poll.timeout = defaults.poll.timeout;
        }
        if self.supervisor_interval.is_zero() {
            warn!(
                "Supervisor interval is zero; using {:?}",
                defaults.supervisor_interval
            );
            self.supervisor_interval = defaults.supervisor_interval;
        }
        self
    }
}
