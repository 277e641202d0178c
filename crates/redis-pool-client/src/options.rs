//! Typed client options with per-mode allow-list validation.
//!
//! The backend client accepts a small set of tunables. Single-node and
//! cluster mode each have their own allow-list and default set; the cluster
//! allow-list is a strict superset of the single-node one. Options supplied
//! by the caller are merged over the mode defaults at pool-entry
//! construction, and any key outside the mode's allow-list fails with
//! [`PoolError::InvalidOptions`].

use std::collections::HashMap;
use std::time::Duration;

use crate::error::PoolError;

/// TCP keepalive probe tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveProbes {
    /// Idle time before the first probe.
    pub idle: Duration,
    /// Interval between probes.
    pub interval: Duration,
    /// Number of unanswered probes before the connection is dropped.
    pub count: u32,
}

impl Default for KeepaliveProbes {
    fn default() -> Self {
        Self {
            idle: Duration::from_secs(60),
            interval: Duration::from_secs(10),
            count: 3,
        }
    }
}

/// Options forwarded to the backend client library.
///
/// Every field is optional; unset fields take the mode default (see
/// [`ClientOptions::single_node_defaults`] and
/// [`ClientOptions::cluster_defaults`]). The last six fields are only valid
/// in cluster mode.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientOptions {
    /// Enable TCP keepalive on backend sockets.
    pub socket_keepalive: Option<bool>,
    /// Keepalive probe tuning; only meaningful with `socket_keepalive`.
    pub socket_keepalive_options: Option<KeepaliveProbes>,
    /// Decode backend responses to UTF-8 strings.
    pub decode_responses: Option<bool>,
    /// Retry a command once when it times out.
    pub retry_on_timeout: Option<bool>,
    /// Interval of the client library's own connection health checking.
    pub health_check_interval: Option<Duration>,
    /// Socket connect timeout.
    pub socket_connect_timeout: Option<Duration>,

    /// Use TLS for cluster connections.
    ///
    /// Deliberately has no default in [`ClientOptions::cluster_defaults`]:
    /// deployments must opt in or out explicitly.
    pub ssl: Option<bool>,
    /// Require all slots covered before serving (cluster only).
    pub require_full_coverage: Option<bool>,
    /// Allow reads from replica nodes (cluster only).
    pub read_from_replicas: Option<bool>,
    /// Slot-map refresh cadence (cluster only).
    pub reinitialize_steps: Option<u32>,
    /// Retries on cluster-level errors (cluster only).
    pub cluster_error_retry_attempts: Option<u32>,
    /// Retries on per-connection errors (cluster only).
    pub connection_error_retry_attempts: Option<u32>,
}

/// Option keys valid in single-node mode.
pub const SINGLE_NODE_KEYS: &[&str] = &[
    "socket_keepalive",
    "socket_keepalive_options",
    "decode_responses",
    "retry_on_timeout",
    "health_check_interval",
    "socket_connect_timeout",
];

/// Option keys valid only in cluster mode (in addition to
/// [`SINGLE_NODE_KEYS`]).
pub const CLUSTER_ONLY_KEYS: &[&str] = &[
    "ssl",
    "require_full_coverage",
    "read_from_replicas",
    "reinitialize_steps",
    "cluster_error_retry_attempts",
    "connection_error_retry_attempts",
];

impl ClientOptions {
    /// Default options for single-node connections.
    #[must_use]
    pub fn single_node_defaults() -> Self {
        Self {
            socket_keepalive: Some(true),
            socket_keepalive_options: Some(KeepaliveProbes::default()),
            decode_responses: Some(true),
            retry_on_timeout: Some(true),
            health_check_interval: Some(Duration::from_secs(60)),
            socket_connect_timeout: Some(Duration::from_secs(5)),
            ..Self::default()
        }
    }

    /// Default options for cluster connections.
    ///
    /// `ssl` is intentionally left unset; see the field documentation.
    #[must_use]
    pub fn cluster_defaults() -> Self {
        Self {
            socket_keepalive: Some(true),
            decode_responses: Some(true),
            health_check_interval: Some(Duration::from_secs(60)),
            socket_connect_timeout: Some(Duration::from_secs(5)),
            ..Self::default()
        }
    }

    /// Check that no cluster-only field is set when `cluster` is false.
    pub fn validate(&self, cluster: bool) -> Result<(), PoolError> {
        if cluster {
            return Ok(());
        }
        let offending: Vec<&str> = [
            ("ssl", self.ssl.is_some()),
            ("require_full_coverage", self.require_full_coverage.is_some()),
            ("read_from_replicas", self.read_from_replicas.is_some()),
            ("reinitialize_steps", self.reinitialize_steps.is_some()),
            (
                "cluster_error_retry_attempts",
                self.cluster_error_retry_attempts.is_some(),
            ),
            (
                "connection_error_retry_attempts",
                self.connection_error_retry_attempts.is_some(),
            ),
        ]
        .into_iter()
        .filter_map(|(key, set)| set.then_some(key))
        .collect();

        if offending.is_empty() {
            Ok(())
        } else {
            Err(PoolError::invalid_options(offending))
        }
    }

    /// Validate, then overlay these options on the mode defaults.
    ///
    /// The result is the effective option set handed to the connector.
    pub fn merged_over_defaults(&self, cluster: bool) -> Result<Self, PoolError> {
        self.validate(cluster)?;
        let base = if cluster {
            Self::cluster_defaults()
        } else {
            Self::single_node_defaults()
        };
        Ok(Self {
            socket_keepalive: self.socket_keepalive.or(base.socket_keepalive),
            socket_keepalive_options: self
                .socket_keepalive_options
                .or(base.socket_keepalive_options),
            decode_responses: self.decode_responses.or(base.decode_responses),
            retry_on_timeout: self.retry_on_timeout.or(base.retry_on_timeout),
            health_check_interval: self.health_check_interval.or(base.health_check_interval),
            socket_connect_timeout: self.socket_connect_timeout.or(base.socket_connect_timeout),
            ssl: self.ssl.or(base.ssl),
            require_full_coverage: self.require_full_coverage.or(base.require_full_coverage),
            read_from_replicas: self.read_from_replicas.or(base.read_from_replicas),
            reinitialize_steps: self.reinitialize_steps.or(base.reinitialize_steps),
            cluster_error_retry_attempts: self
                .cluster_error_retry_attempts
                .or(base.cluster_error_retry_attempts),
            connection_error_retry_attempts: self
                .connection_error_retry_attempts
                .or(base.connection_error_retry_attempts),
        })
    }

    /// Parse options from a caller-supplied string map.
    ///
    /// Keys outside the mode's allow-list, and values that fail to parse,
    /// fail with [`PoolError::InvalidOptions`] naming every offending key.
    /// `socket_keepalive_options` takes the form `"idle,interval,count"`
    /// in seconds.
    pub fn from_map(cluster: bool, map: &HashMap<String, String>) -> Result<Self, PoolError> {
        let mut opts = Self::default();
        let mut bad: Vec<String> = Vec::new();

        for (key, value) in map {
            let allowed = SINGLE_NODE_KEYS.contains(&key.as_str())
                || (cluster && CLUSTER_ONLY_KEYS.contains(&key.as_str()));
            if !allowed {
                bad.push(key.clone());
                continue;
            }
            if apply_key(&mut opts, key, value).is_err() {
                bad.push(key.clone());
            }
        }

        if bad.is_empty() {
            Ok(opts)
        } else {
            bad.sort();
            Err(PoolError::InvalidOptions { keys: bad })
        }
    }
}

/// Set one parsed option field; `Err(())` means the value did not parse.
fn apply_key(opts: &mut ClientOptions, key: &str, value: &str) -> Result<(), ()> {
    match key {
        "socket_keepalive" => opts.socket_keepalive = Some(parse_bool(value)?),
        "socket_keepalive_options" => {
            opts.socket_keepalive_options = Some(parse_probes(value)?);
        }
        "decode_responses" => opts.decode_responses = Some(parse_bool(value)?),
        "retry_on_timeout" => opts.retry_on_timeout = Some(parse_bool(value)?),
        "health_check_interval" => {
            opts.health_check_interval = Some(parse_seconds(value)?);
        }
        "socket_connect_timeout" => {
            opts.socket_connect_timeout = Some(parse_seconds(value)?);
        }
        "ssl" => opts.ssl = Some(parse_bool(value)?),
        "require_full_coverage" => opts.require_full_coverage = Some(parse_bool(value)?),
        "read_from_replicas" => opts.read_from_replicas = Some(parse_bool(value)?),
        "reinitialize_steps" => {
            opts.reinitialize_steps = Some(value.parse().map_err(|_| ())?);
        }
        "cluster_error_retry_attempts" => {
            opts.cluster_error_retry_attempts = Some(value.parse().map_err(|_| ())?);
        }
        "connection_error_retry_attempts" => {
            opts.connection_error_retry_attempts = Some(value.parse().map_err(|_| ())?);
        }
        _ => return Err(()),
    }
    Ok(())
}

fn parse_bool(value: &str) -> Result<bool, ()> {
    if value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("yes") || value == "1" {
        Ok(true)
    } else if value.eq_ignore_ascii_case("false")
        || value.eq_ignore_ascii_case("no")
        || value == "0"
    {
        Ok(false)
    } else {
        Err(())
    }
}

fn parse_seconds(value: &str) -> Result<Duration, ()> {
    let secs: f64 = value.parse().map_err(|_| ())?;
    if secs.is_finite() && secs >= 0.0 {
        Ok(Duration::from_secs_f64(secs))
    } else {
        Err(())
    }
}

fn parse_probes(value: &str) -> Result<KeepaliveProbes, ()> {
    let mut parts = value.split(',');
    let idle: u64 = parts.next().ok_or(())?.trim().parse().map_err(|_| ())?;
    let interval: u64 = parts.next().ok_or(())?.trim().parse().map_err(|_| ())?;
    let count: u32 = parts.next().ok_or(())?.trim().parse().map_err(|_| ())?;
    if parts.next().is_some() {
        return Err(());
    }
    Ok(KeepaliveProbes {
        idle: Duration::from_secs(idle),
        interval: Duration::from_secs(interval),
        count,
    })
}
