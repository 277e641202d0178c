//! The pool-of-pools lifecycle engine.
//!
//! A [`PoolManager`] keeps an ordered list of pool entries per backend URL.
//! The first `pools_per_node_at_start` entries of each list are permanent;
//! entries appended under contention are elastic and reclaimed by the idle
//! cleanup task. Acquisition hands out scoped [`Lease`]s against the
//! least-loaded healthy entry, growing the list when every entry is
//! saturated.
//!
//! Locking is two-tier: a per-URL gate (async mutex + `Notify`) serialises
//! the decision to grow a URL's list and wakes blocked acquirers, while a
//! global traversal lock covers the cross-URL sweeps (recovery, cleanup,
//! close, status). The URL map itself sits behind a `parking_lot` RwLock
//! that is only ever held for non-suspending critical sections.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use redis_pool_client::{
    ConnectSpec, Connector, DEFAULT_READY_RETRIES, DEFAULT_READY_STEP, NodeMode, PoolEntry,
    PoolError,
};

use crate::config::ManagerConfig;
use crate::lease::Lease;
use crate::status::{EntryStatus, NodeStatus};
use crate::tasks;

/// Ready-budget per entry during initial registration and elastic growth.
pub(crate) const GROWTH_READY_BUDGET: Duration = Duration::from_secs(1);

/// Ready-budget for a replacement entry built by the recovery task.
pub(crate) const RECOVERY_READY_TIMEOUT: Duration = Duration::from_secs(5);

/// Backoff step for recovery readiness.
pub(crate) const RECOVERY_READY_STEP: Duration = Duration::from_secs(1);

/// Per-URL condition: serialises add/growth and wakes blocked acquirers.
#[derive(Default)]
pub(crate) struct UrlGate {
    pub(crate) lock: tokio::sync::Mutex<()>,
    pub(crate) notify: Notify,
}

pub(crate) struct TaskHandle {
    pub(crate) cancel: CancellationToken,
    pub(crate) join: JoinHandle<()>,
}

pub(crate) struct ManagerInner<F: Connector> {
    pub(crate) config: ManagerConfig,
    pub(crate) connector: F,
    /// URL -> ordered pool list. Held only for short critical sections.
    pub(crate) pools: RwLock<HashMap<String, Vec<Arc<PoolEntry<F::Client>>>>>,
    /// Per-URL gates, created on demand and kept for the manager's life.
    gates: Mutex<HashMap<String, Arc<UrlGate>>>,
    /// Serialises cross-URL sweeps: recovery, cleanup, close, status.
    pub(crate) traversal_lock: tokio::sync::Mutex<()>,
}

impl<F: Connector> ManagerInner<F> {
    fn new(config: ManagerConfig, connector: F) -> Self {
        Self {
            config,
            connector,
            pools: RwLock::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
            traversal_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub(crate) fn gate(&self, url: &str) -> Arc<UrlGate> {
        self.gates.lock().entry(url.to_string()).or_default().clone()
    }

    pub(crate) fn connect_spec(&self, url: &str) -> ConnectSpec {
        let mode = if self.config.use_cluster && !self.config.startup_nodes.is_empty() {
            NodeMode::Cluster {
                startup_nodes: self.config.startup_nodes.clone(),
            }
        } else {
            NodeMode::SingleNode
        };
        ConnectSpec {
            url: url.to_string(),
            max_connections: self.config.max_connection_size,
            mode,
            options: self.config.pool_options.clone(),
        }
    }

    /// Budget left before `start + budget`, or `NoHealthyPools` when spent.
    fn remaining(start: Instant, budget: Duration, url: &str) -> Result<Duration, PoolError> {
        let elapsed = start.elapsed();
        if elapsed >= budget {
            Err(PoolError::no_healthy_pools(url))
        } else {
            Ok(budget - elapsed)
        }
    }

    /// Refresh the node's pool gauges from the current list.
    pub(crate) fn update_url_metrics(&self, url: &str) {
        let sample = {
            let map = self.pools.read();
            let Some(entries) = map.get(url) else { return };
            let now = Instant::now();
            let healthy = entries.iter().filter(|e| e.health_status()).count();
            redis_pool_metrics::PoolSample {
                total_pools: entries.len(),
                active_calls: entries.iter().map(|e| u64::from(e.active_calls())).sum(),
                idle_pools: entries
                    .iter()
                    .filter(|e| now.duration_since(e.last_used()) >= self.config.max_idle_time)
                    .count(),
                healthy_pools: healthy,
                unhealthy_pools: entries.len() - healthy,
            }
        };
        redis_pool_metrics::record_pool_sample(url, &sample);
    }

    /// Build `count` entries for `url` and wait for all of them to become
    /// ready in parallel. On any failure every entry in the batch is closed
    /// and the first readiness error is returned.
    async fn build_entries(
        &self,
        url: &str,
        count: usize,
        ready_budget: Duration,
    ) -> Result<Vec<Arc<PoolEntry<F::Client>>>, PoolError> {
        let spec = self.connect_spec(url);
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            entries.push(Arc::new(PoolEntry::connect(&self.connector, &spec)?));
        }

        let readiness = entries
            .iter()
            .map(|entry| entry.wait_for_ready(ready_budget, DEFAULT_READY_STEP, DEFAULT_READY_RETRIES));
        let results = futures_util::future::join_all(readiness).await;

        if let Some(err) = results.into_iter().find_map(Result::err) {
            for entry in &entries {
                entry.close().await;
            }
            return Err(err);
        }
        Ok(entries)
    }

    /// Idempotent node registration; see [`PoolManager::add_node_pool`].
    pub(crate) async fn add_node_pool(&self, url: &str, timeout: Duration) -> Result<(), PoolError> {
        if self.pools.read().contains_key(url) {
            return Ok(());
        }
        let start = Instant::now();
        let gate = self.gate(url);

        loop {
            Self::remaining(start, timeout, url)?;
            let guard = gate.lock.lock().await;
            if self.pools.read().contains_key(url) {
                return Ok(());
            }
            Self::remaining(start, timeout, url)?;

            let floor = self.config.pools_per_node_at_start.max(1);
            match self.build_entries(url, floor, GROWTH_READY_BUDGET).await {
                Ok(entries) => {
                    for entry in &entries {
                        entry.touch();
                    }
                    self.pools.write().insert(url.to_string(), entries);
                    self.update_url_metrics(url);
                    gate.notify.notify_waiters();
                    tracing::info!(node_url = %url, pools = floor, "node pools initialised");
                    return Ok(());
                }
                Err(err @ PoolError::InvalidOptions { .. }) => return Err(err),
                Err(_) => {
                    // Another caller may be initialising concurrently; wake
                    // everyone, then wait for the survivor to finish.
                    gate.notify.notify_waiters();
                    let remaining = Self::remaining(start, timeout, url)?;
                    let notified = gate.notify.notified();
                    tokio::pin!(notified);
                    // Register as a waiter before releasing the gate so a
                    // wake between the two cannot be missed.
                    notified.as_mut().enable();
                    drop(guard);
                    if tokio::time::timeout(remaining, notified).await.is_err() {
                        return Err(PoolError::no_healthy_pools(url));
                    }
                }
            }
        }
    }

    /// Healthy entry with the fewest in-flight calls, ties broken by list
    /// order. `NoHealthyPools` when every entry is unhealthy or the URL has
    /// been removed.
    fn least_active_entry(
        &self,
        url: &str,
    ) -> Result<(Arc<PoolEntry<F::Client>>, u32), PoolError> {
        let map = self.pools.read();
        let mut best: Option<(Arc<PoolEntry<F::Client>>, u32)> = None;
        for entry in map.get(url).map(Vec::as_slice).unwrap_or_default() {
            if !entry.health_status() {
                continue;
            }
            let calls = entry.active_calls();
            if best.as_ref().is_none_or(|(_, min)| calls < *min) {
                best = Some((Arc::clone(entry), calls));
            }
        }
        best.ok_or_else(|| PoolError::no_healthy_pools(url))
    }

    /// Append one elastic entry for `url`.
    async fn grow_one(&self, url: &str) -> Result<Arc<PoolEntry<F::Client>>, PoolError> {
        let mut entries = self.build_entries(url, 1, GROWTH_READY_BUDGET).await?;
        let entry = entries
            .pop()
            .ok_or_else(|| PoolError::no_healthy_pools(url))?;
        entry.touch();

        let appended = {
            let mut map = self.pools.write();
            match map.get_mut(url) {
                Some(list) => {
                    list.push(Arc::clone(&entry));
                    true
                }
                None => false,
            }
        };
        if !appended {
            // The node was closed while we were growing; don't resurrect it.
            entry.close().await;
            return Err(PoolError::no_healthy_pools(url));
        }
        Ok(entry)
    }

    /// Lease acquisition; see [`PoolManager::acquire`].
    pub(crate) async fn acquire(
        inner: &Arc<Self>,
        url: &str,
        timeout: Duration,
    ) -> Result<Lease<F>, PoolError> {
        if !inner.pools.read().contains_key(url) {
            return Err(PoolError::UnknownUrl {
                url: url.to_string(),
            });
        }
        let start = Instant::now();
        let gate = inner.gate(url);

        loop {
            Self::remaining(start, timeout, url)?;
            let guard = gate.lock.lock().await;

            let (entry, min_active) = inner.least_active_entry(url)?;
            if min_active < inner.config.max_connection_size {
                entry.begin_call();
                entry.touch();
                drop(guard);
                inner.update_url_metrics(url);
                redis_pool_metrics::observe_connection_latency(
                    url,
                    start.elapsed().as_secs_f64(),
                );
                return Ok(Lease::new(Arc::clone(inner), entry));
            }

            // Every healthy entry is saturated: try to grow by one.
            Self::remaining(start, timeout, url)?;
            match inner.grow_one(url).await {
                Ok(new_entry) => {
                    gate.notify.notify_waiters();
                    // The new entry has zero load by construction; lease it
                    // without re-running the selection.
                    new_entry.begin_call();
                    let total = inner.pools.read().get(url).map_or(0, Vec::len);
                    drop(guard);
                    inner.update_url_metrics(url);
                    redis_pool_metrics::observe_connection_latency(
                        url,
                        start.elapsed().as_secs_f64(),
                    );
                    tracing::info!(node_url = %url, total_pools = total, "added pool under contention");
                    return Ok(Lease::new(Arc::clone(inner), new_entry));
                }
                Err(PoolError::NoHealthyPools { .. }) => {
                    gate.notify.notify_waiters();
                    let remaining = Self::remaining(start, timeout, url)?;
                    let notified = gate.notify.notified();
                    tokio::pin!(notified);
                    notified.as_mut().enable();
                    drop(guard);
                    if tokio::time::timeout(remaining, notified).await.is_err() {
                        return Err(PoolError::no_healthy_pools(url));
                    }
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// Return a leased call slot. No-op when the entry has already been
    /// removed from the mapping (targeted close or full shutdown).
    pub(crate) fn release(&self, entry: &Arc<PoolEntry<F::Client>>) {
        if !entry.is_present() {
            return;
        }
        entry.end_call();
        self.update_url_metrics(entry.url());
    }

    /// Close and remove one node's pools; see
    /// [`PoolManager::close_node_pools`].
    pub(crate) async fn close_node_pools(&self, url: &str) {
        let _traversal = self.traversal_lock.lock().await;
        let entries = {
            let map = self.pools.read();
            match map.get(url) {
                Some(entries) => entries.clone(),
                None => return,
            }
        };
        for entry in &entries {
            entry.close().await;
        }
        self.pools.write().remove(url);
        tracing::info!(node_url = %url, pools = entries.len(), "node pools closed");
    }

    /// Close every pool of every node and clear the mapping.
    pub(crate) async fn close_all(&self) {
        let _traversal = self.traversal_lock.lock().await;
        let snapshot: Vec<(String, Vec<Arc<PoolEntry<F::Client>>>)> = {
            let map = self.pools.read();
            map.iter().map(|(u, e)| (u.clone(), e.clone())).collect()
        };
        for (url, entries) in &snapshot {
            for entry in entries {
                entry.close().await;
            }
            tracing::info!(node_url = %url, pools = entries.len(), "node pools closed");
        }
        self.pools.write().clear();
    }

    /// Snapshot per-node pool state; see
    /// [`PoolManager::fetch_pool_status`].
    pub(crate) async fn fetch_pool_status(&self) -> HashMap<String, NodeStatus> {
        let _traversal = self.traversal_lock.lock().await;
        let map = self.pools.read();
        map.iter()
            .map(|(url, entries)| {
                let healthy = entries.iter().filter(|e| e.health_status()).count();
                (
                    url.clone(),
                    NodeStatus {
                        total_pools: entries.len(),
                        healthy_pools: healthy,
                        unhealthy_pools: entries.len() - healthy,
                        pools: entries
                            .iter()
                            .enumerate()
                            .map(|(index, entry)| EntryStatus {
                                index,
                                active_calls: entry.active_calls(),
                            })
                            .collect(),
                    },
                )
            })
            .collect()
    }
}

/// Multi-node connection-pool manager.
///
/// Maintains one or more connection pools per backend URL, grows them
/// elastically under contention, recovers pools that fail health checks,
/// and shrinks unused elastic capacity after an idle period. Every mutation
/// updates the node's Prometheus gauges.
///
/// The health-recovery task starts at construction; the idle-cleanup task
/// only runs after [`PoolManager::start_cleanup`]. Call
/// [`PoolManager::close_all_pools`] for a clean shutdown (stopping cleanup
/// first, if started).
///
/// # Example
///
/// ```rust,ignore
/// use redis_pool_manager::{ManagerConfig, PoolManager};
///
/// let manager = PoolManager::new(ManagerConfig::from_env(), connector);
/// manager.add_node_pool("redis://cache-1:6379").await?;
///
/// {
///     let lease = manager.acquire("redis://cache-1:6379").await?;
///     lease.ping().await?;
/// } // lease released here
///
/// manager.close_all_pools().await;
/// ```
pub struct PoolManager<F: Connector> {
    inner: Arc<ManagerInner<F>>,
    health_task: Mutex<Option<TaskHandle>>,
    cleanup_task: Mutex<Option<TaskHandle>>,
}

impl<F: Connector> PoolManager<F> {
    /// Create a manager and start its health-recovery task.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(config: ManagerConfig, connector: F) -> Self {
        let manager = Self {
            inner: Arc::new(ManagerInner::new(config, connector)),
            health_task: Mutex::new(None),
            cleanup_task: Mutex::new(None),
        };
        manager.start_health_checks();
        manager
    }

    /// The manager's configuration.
    #[must_use]
    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// Register a node and create its permanent pools.
    ///
    /// Idempotent: registering an already-known URL returns immediately.
    /// Uses the configured default timeout; see
    /// [`PoolManager::add_node_pool_timeout`].
    pub async fn add_node_pool(&self, url: &str) -> Result<(), PoolError> {
        self.add_node_pool_timeout(url, self.inner.config.default_timeout)
            .await
    }

    /// Register a node with an explicit wall-clock budget.
    ///
    /// Concurrent registrations of the same URL converge on a single
    /// successful initialisation; losers wait on the URL's gate until the
    /// winner finishes or the budget runs out.
    pub async fn add_node_pool_timeout(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<(), PoolError> {
        self.inner.add_node_pool(url, timeout).await
    }

    /// Acquire a lease on the least-loaded healthy pool of `url`, using the
    /// configured default timeout.
    pub async fn acquire(&self, url: &str) -> Result<Lease<F>, PoolError> {
        self.acquire_timeout(url, self.inner.config.default_timeout)
            .await
    }

    /// Acquire a lease with an explicit wall-clock budget.
    ///
    /// Fails with [`PoolError::UnknownUrl`] for URLs never registered, and
    /// with [`PoolError::NoHealthyPools`] when every entry is unhealthy or
    /// the budget runs out while all pools are saturated and growth keeps
    /// failing. Dropping the lease returns the call slot.
    pub async fn acquire_timeout(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<Lease<F>, PoolError> {
        ManagerInner::acquire(&self.inner, url, timeout).await
    }

    /// Run one health/recovery pass now, outside the periodic schedule.
    pub async fn recover_unhealthy_pools(&self) {
        self.inner.recover_unhealthy_pools().await;
    }

    /// Run one idle-cleanup pass now, outside the periodic schedule.
    pub async fn cleanup_idle_pools(&self) {
        self.inner.cleanup_idle_pools().await;
    }

    /// Start the periodic health-recovery task if it is not running.
    pub fn start_health_checks(&self) {
        let mut slot = self.health_task.lock();
        if slot.as_ref().is_some_and(|task| !task.join.is_finished()) {
            return;
        }
        let cancel = CancellationToken::new();
        let join = tasks::spawn_health_loop(Arc::clone(&self.inner), cancel.clone());
        *slot = Some(TaskHandle { cancel, join });
    }

    /// Cancel the periodic health-recovery task.
    pub fn stop_health_checks(&self) {
        if let Some(task) = self.health_task.lock().take() {
            task.cancel.cancel();
        }
    }

    /// Whether the health-recovery task is currently running.
    #[must_use]
    pub fn is_health_check_running(&self) -> bool {
        self.health_task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.join.is_finished())
    }

    /// Start the periodic idle-cleanup task if it is not running.
    pub fn start_cleanup(&self) {
        let mut slot = self.cleanup_task.lock();
        if slot.as_ref().is_some_and(|task| !task.join.is_finished()) {
            return;
        }
        let cancel = CancellationToken::new();
        let join = tasks::spawn_cleanup_loop(Arc::clone(&self.inner), cancel.clone());
        *slot = Some(TaskHandle { cancel, join });
    }

    /// Cancel the periodic idle-cleanup task.
    pub fn stop_cleanup(&self) {
        if let Some(task) = self.cleanup_task.lock().take() {
            task.cancel.cancel();
        }
    }

    /// Whether the idle-cleanup task is currently running.
    #[must_use]
    pub fn is_cleanup_running(&self) -> bool {
        self.cleanup_task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.join.is_finished())
    }

    /// Close every pool of one node and forget the URL.
    ///
    /// Safe to call for URLs that were never registered.
    pub async fn close_node_pools(&self, url: &str) {
        self.inner.close_node_pools(url).await;
    }

    /// Shut the manager down: stop and await the health task, then close
    /// every pool of every node.
    ///
    /// The cleanup task, if started, should be stopped first with
    /// [`PoolManager::stop_cleanup`].
    pub async fn close_all_pools(&self) {
        let task = self.health_task.lock().take();
        if let Some(task) = task {
            task.cancel.cancel();
            if task.join.await.is_err() {
                tracing::warn!("health check task ended abnormally");
            } else {
                tracing::info!("health check task cancelled");
            }
        }
        self.inner.close_all().await;
    }

    /// Snapshot per-node pool state.
    pub async fn fetch_pool_status(&self) -> HashMap<String, NodeStatus> {
        self.inner.fetch_pool_status().await
    }

    /// Emit the current pool state through `tracing`.
    pub async fn log_pool_state(&self) {
        let status = self.fetch_pool_status().await;
        for (url, node) in &status {
            tracing::info!(
                node_url = %url,
                total_pools = node.total_pools,
                healthy_pools = node.healthy_pools,
                unhealthy_pools = node.unhealthy_pools,
                "pool state"
            );
            for pool in &node.pools {
                tracing::info!(
                    node_url = %url,
                    index = pool.index,
                    active_calls = pool.active_calls,
                    "pool entry state"
                );
            }
        }
    }
}

impl<F: Connector> Drop for PoolManager<F> {
    fn drop(&mut self) {
        if let Some(task) = self.health_task.lock().take() {
            task.cancel.cancel();
        }
        if let Some(task) = self.cleanup_task.lock().take() {
            task.cancel.cancel();
        }
    }
}

impl<F: Connector> std::fmt::Debug for PoolManager<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolManager")
            .field("nodes", &self.inner.pools.read().len())
            .field("health_check_running", &self.is_health_check_running())
            .field("cleanup_running", &self.is_cleanup_running())
            .finish()
    }
}
