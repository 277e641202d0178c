//! # redis-pool-metrics
//!
//! Prometheus metrics for the redis-pool connection-pool manager.
//!
//! All metrics are labelled by `node_url` so a single process managing
//! several backend nodes exposes one time series per node. Metric names can
//! be overridden through environment variables (`REDIS_POOL_SIZE_METRIC`,
//! `REDIS_FAILED_CONNECTIONS_METRIC`, ...); the defaults below are used when
//! a variable is unset.
//!
//! Metrics are registered once in a process-global [`Registry`]. Use
//! [`gather_text`] to render the text exposition format for a `/metrics`
//! endpoint.

#![warn(missing_docs)]
#![deny(unsafe_code)]

use std::sync::OnceLock;

use prometheus::{CounterVec, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry};

/// Global Prometheus registry for pool metrics.
static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Total number of connection pools per node.
static POOL_SIZE: OnceLock<GaugeVec> = OnceLock::new();

/// Sum of in-flight calls across a node's pools.
static POOL_ACTIVE: OnceLock<GaugeVec> = OnceLock::new();

/// Number of pools idle past the configured idle threshold.
static POOL_IDLE: OnceLock<GaugeVec> = OnceLock::new();

/// Number of healthy pools per node.
static POOL_HEALTHY: OnceLock<GaugeVec> = OnceLock::new();

/// Number of unhealthy pools per node.
static POOL_UNHEALTHY: OnceLock<GaugeVec> = OnceLock::new();

/// Total client handles materialised per node.
static CONNECTIONS_CREATED: OnceLock<CounterVec> = OnceLock::new();

/// Total failed readiness ping attempts per node.
static FAILED_CONNECTIONS: OnceLock<CounterVec> = OnceLock::new();

/// Total pools evicted by the idle-cleanup task per node.
static IDLE_CLEANUP_EVENTS: OnceLock<CounterVec> = OnceLock::new();

/// Lease acquisition latency per node.
///
/// Observed in `acquire`, measuring the time from the call until a usable
/// lease is handed to the caller (including growth and readiness waits).
static CONNECTION_LATENCY: OnceLock<HistogramVec> = OnceLock::new();

/// Resolve a metric name from the environment, falling back to `default`.
fn metric_name(env_key: &str, default: &str) -> String {
    std::env::var(env_key).unwrap_or_else(|_| default.to_string())
}

/// Get or initialise the global registry.
pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(|| {
        let r = Registry::new();
        register_metrics(&r);
        r
    })
}

/// Register all pool metrics with the registry.
#[allow(clippy::expect_used)] // metric construction from static definitions cannot fail at runtime
fn register_metrics(registry: &Registry) {
    let gauge = |env_key: &str, default: &str, help: &str| {
        let g = GaugeVec::new(Opts::new(metric_name(env_key, default), help), &["node_url"])
            .expect("failed to create gauge");
        registry
            .register(Box::new(g.clone()))
            .expect("failed to register gauge");
        g
    };
    let counter = |env_key: &str, default: &str, help: &str| {
        let c = CounterVec::new(Opts::new(metric_name(env_key, default), help), &["node_url"])
            .expect("failed to create counter");
        registry
            .register(Box::new(c.clone()))
            .expect("failed to register counter");
        c
    };

    POOL_SIZE
        .set(gauge(
            "REDIS_POOL_SIZE_METRIC",
            "redis_pool_size",
            "Total number of connection pools",
        ))
        .ok();
    POOL_ACTIVE
        .set(gauge(
            "REDIS_POOL_ACTIVE_METRIC",
            "redis_pool_active",
            "Number of active calls across the node's pools",
        ))
        .ok();
    POOL_IDLE
        .set(gauge(
            "REDIS_POOL_IDLE_METRIC",
            "redis_pool_idle",
            "Number of pools idle past the idle threshold",
        ))
        .ok();
    POOL_HEALTHY
        .set(gauge(
            "REDIS_POOL_HEALTHY_METRIC",
            "redis_pool_healthy",
            "Number of healthy pools",
        ))
        .ok();
    POOL_UNHEALTHY
        .set(gauge(
            "REDIS_POOL_UNHEALTHY_METRIC",
            "redis_pool_unhealthy",
            "Number of unhealthy pools",
        ))
        .ok();
    CONNECTIONS_CREATED
        .set(counter(
            "REDIS_CONNECTIONS_CREATED_METRIC",
            "redis_connections_created",
            "Total number of client handles created",
        ))
        .ok();
    FAILED_CONNECTIONS
        .set(counter(
            "REDIS_FAILED_CONNECTIONS_METRIC",
            "redis_failed_connections",
            "Total number of failed connection attempts",
        ))
        .ok();
    IDLE_CLEANUP_EVENTS
        .set(counter(
            "REDIS_IDLE_CLEANUP_METRIC",
            "redis_idle_cleanup_events",
            "Total number of idle cleanup events",
        ))
        .ok();

    let latency = HistogramVec::new(
        HistogramOpts::new(
            metric_name(
                "REDIS_CONNECTION_LATENCY_METRIC",
                "redis_connection_latency_seconds",
            ),
            "Connection acquisition latency in seconds",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]),
        &["node_url"],
    )
    .expect("failed to create latency histogram");
    registry
        .register(Box::new(latency.clone()))
        .expect("failed to register latency histogram");
    CONNECTION_LATENCY.set(latency).ok();
}

/// A point-in-time summary of one node's pool list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolSample {
    /// Total number of pools for the node.
    pub total_pools: usize,
    /// Sum of in-flight calls across the node's pools.
    pub active_calls: u64,
    /// Pools whose last use is older than the idle threshold.
    pub idle_pools: usize,
    /// Pools currently passing health checks.
    pub healthy_pools: usize,
    /// Pools currently failing health checks.
    pub unhealthy_pools: usize,
}

/// Record the pool gauges for a node.
pub fn record_pool_sample(node_url: &str, sample: &PoolSample) {
    registry();
    if let Some(g) = POOL_SIZE.get() {
        g.with_label_values(&[node_url]).set(sample.total_pools as f64);
    }
    if let Some(g) = POOL_ACTIVE.get() {
        g.with_label_values(&[node_url]).set(sample.active_calls as f64);
    }
    if let Some(g) = POOL_IDLE.get() {
        g.with_label_values(&[node_url]).set(sample.idle_pools as f64);
    }
    if let Some(g) = POOL_HEALTHY.get() {
        g.with_label_values(&[node_url]).set(sample.healthy_pools as f64);
    }
    if let Some(g) = POOL_UNHEALTHY.get() {
        g.with_label_values(&[node_url])
            .set(sample.unhealthy_pools as f64);
    }
}

/// Observe one lease acquisition latency.
pub fn observe_connection_latency(node_url: &str, seconds: f64) {
    registry();
    if let Some(h) = CONNECTION_LATENCY.get() {
        h.with_label_values(&[node_url]).observe(seconds);
    }
}

/// Increment the failed connection attempt counter.
pub fn inc_failed_connection(node_url: &str) {
    registry();
    if let Some(c) = FAILED_CONNECTIONS.get() {
        c.with_label_values(&[node_url]).inc();
    }
}

/// Increment the created client handle counter.
pub fn inc_connections_created(node_url: &str) {
    registry();
    if let Some(c) = CONNECTIONS_CREATED.get() {
        c.with_label_values(&[node_url]).inc();
    }
}

/// Increment the idle cleanup eviction counter.
pub fn inc_idle_cleanup(node_url: &str) {
    registry();
    if let Some(c) = IDLE_CLEANUP_EVENTS.get() {
        c.with_label_values(&[node_url]).inc();
    }
}

/// Render all registered metrics in the Prometheus text exposition format.
pub fn gather_text() -> String {
    use prometheus::{Encoder, TextEncoder};

    let encoder = TextEncoder::new();
    let families = registry().gather();
    let mut buffer = Vec::new();
    if encoder.encode(&families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_initialisation() {
        let reg = registry();
        assert!(!reg.gather().is_empty());
    }

    #[test]
    fn metric_name_falls_back_to_default() {
        let name = metric_name("REDIS_POOL_METRIC_NAME_THAT_IS_NEVER_SET", "redis_pool_size");
        assert_eq!(name, "redis_pool_size");
    }

    #[test]
    fn pool_sample_is_rendered() {
        let sample = PoolSample {
            total_pools: 3,
            active_calls: 7,
            idle_pools: 1,
            healthy_pools: 2,
            unhealthy_pools: 1,
        };
        record_pool_sample("redis://sample-node", &sample);

        let text = gather_text();
        assert!(text.contains("node_url=\"redis://sample-node\""));
        assert!(text.contains("redis_pool_size"));
        assert!(text.contains("redis_pool_unhealthy"));
    }

    #[test]
    fn counters_accumulate() {
        inc_failed_connection("redis://counter-node");
        inc_failed_connection("redis://counter-node");
        inc_connections_created("redis://counter-node");
        inc_idle_cleanup("redis://counter-node");

        let text = gather_text();
        assert!(text.contains("redis_failed_connections"));
        assert!(text.contains("redis_connections_created"));
        assert!(text.contains("redis_idle_cleanup_events"));
    }

    #[test]
    fn latency_observations_are_recorded() {
        observe_connection_latency("redis://latency-node", 0.003);
        observe_connection_latency("redis://latency-node", 0.8);

        let text = gather_text();
        assert!(text.contains("redis_connection_latency_seconds"));
    }
}
