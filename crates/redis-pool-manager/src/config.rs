//! Manager configuration.

use std::time::Duration;

use redis_pool_client::{ClientOptions, ClusterNode};

/// Configuration for a [`PoolManager`](crate::PoolManager).
///
/// Immutable after construction. Build with the fluent setters or from the
/// environment via [`ManagerConfig::from_env`].
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Number of permanent pools created per node at registration; idle
    /// cleanup never shrinks a node below this floor.
    pub pools_per_node_at_start: usize,

    /// Per-pool cap on concurrent leased calls.
    pub max_connection_size: u32,

    /// Connect to a cluster instead of standalone nodes.
    pub use_cluster: bool,

    /// Cluster discovery nodes; ignored unless `use_cluster` is set.
    pub startup_nodes: Vec<ClusterNode>,

    /// Caller option overrides, merged over the mode defaults at pool
    /// construction.
    pub pool_options: ClientOptions,

    /// Interval of the background health/recovery task.
    pub health_check_interval: Duration,

    /// Interval of the background idle-cleanup task.
    pub cleanup_interval: Duration,

    /// Idle age beyond which an elastic pool is eligible for cleanup.
    pub max_idle_time: Duration,

    /// Acquisition budget used when the caller does not pass one.
    pub default_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            pools_per_node_at_start: 1,
            max_connection_size: 50,
            use_cluster: false,
            startup_nodes: Vec::new(),
            pool_options: ClientOptions::default(),
            health_check_interval: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(120),
            max_idle_time: Duration::from_secs(180),
            default_timeout: Duration::from_secs(10),
        }
    }
}

impl ManagerConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read configuration from the environment.
    ///
    /// Recognised variables: `MAX_CONNECTION_SIZE`, `USE_REDIS_CLUSTER`,
    /// `HEALTH_CHECK_INTERVAL`, `CLEANUP_INTERVAL`, `MAX_IDLE_TIME`
    /// (intervals in seconds). Unset or unparsable values fall back to the
    /// defaults, with a warning for the unparsable ones.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(size) = env_parse::<u32>("MAX_CONNECTION_SIZE") {
            config.max_connection_size = size;
        }
        if let Ok(value) = std::env::var("USE_REDIS_CLUSTER") {
            config.use_cluster = value.eq_ignore_ascii_case("true")
                || value.eq_ignore_ascii_case("yes")
                || value == "1";
        }
        if let Some(secs) = env_parse::<u64>("HEALTH_CHECK_INTERVAL") {
            config.health_check_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("CLEANUP_INTERVAL") {
            config.cleanup_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("MAX_IDLE_TIME") {
            config.max_idle_time = Duration::from_secs(secs);
        }
        config
    }

    /// Set the permanent pool floor per node.
    #[must_use]
    pub fn pools_per_node_at_start(mut self, count: usize) -> Self {
        self.pools_per_node_at_start = count;
        self
    }

    /// Set the per-pool concurrent call cap.
    #[must_use]
    pub fn max_connection_size(mut self, size: u32) -> Self {
        self.max_connection_size = size;
        self
    }

    /// Enable cluster mode with the given discovery nodes.
    #[must_use]
    pub fn cluster(mut self, startup_nodes: Vec<ClusterNode>) -> Self {
        self.use_cluster = true;
        self.startup_nodes = startup_nodes;
        self
    }

    /// Set caller option overrides.
    #[must_use]
    pub fn pool_options(mut self, options: ClientOptions) -> Self {
        self.pool_options = options;
        self
    }

    /// Set the health/recovery tick interval.
    #[must_use]
    pub fn health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    /// Set the idle-cleanup tick interval.
    #[must_use]
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Set the idle-eviction threshold.
    #[must_use]
    pub fn max_idle_time(mut self, max_idle: Duration) -> Self {
        self.max_idle_time = max_idle;
        self
    }

    /// Set the default acquisition budget.
    #[must_use]
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let value = std::env::var(key).ok()?;
    match value.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!(key, value = %value, "ignoring unparsable environment value");
            None
        }
    }
}
