//! Configuration for the run event buffer.

use std::time::Duration;

/// Default time a run is kept after its last activity (5 minutes).
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Default per-run event cap before the oldest events are evicted.
pub const DEFAULT_MAX_EVENTS_PER_RUN: usize = 10_000;

/// Default interval between background expiry sweeps.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Shortest sweep interval the cleanup task will use.
pub const MIN_CLEANUP_INTERVAL: Duration = Duration::from_millis(100);

/// Configuration for the run event buffer.
#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Runs idle for longer than this are removed by the sweep.
    pub ttl: Duration,

    /// Maximum events retained per run. Older events are evicted first.
    pub max_events_per_run: usize,

    /// Whether the server should run the periodic sweep.
    /// If false, expired runs linger until `cleanup_expired` is called.
    pub enable_cleanup_task: bool,

    /// Interval for the sweep (if enabled).
    pub cleanup_interval: Duration,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            max_events_per_run: DEFAULT_MAX_EVENTS_PER_RUN,
            enable_cleanup_task: true,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
        }
    }
}

impl BufferConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the inactivity TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the per-run event cap. Zero is treated as one.
    pub fn with_max_events_per_run(mut self, max: usize) -> Self {
        self.max_events_per_run = max.max(1);
        self
    }

    /// Enable or disable the background sweep.
    pub fn with_cleanup_task(mut self, enabled: bool) -> Self {
        self.enable_cleanup_task = enabled;
        self
    }

    /// Set the sweep interval. Values below [`MIN_CLEANUP_INTERVAL`] are
    /// raised to it.
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval.max(MIN_CLEANUP_INTERVAL);
        self
    }
}
