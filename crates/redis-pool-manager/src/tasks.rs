//! Background tasks: health recovery and idle cleanup.
//!
//! Both loops are spawned tasks driven by a [`CancellationToken`]: the
//! current sleep is interrupted on cancellation, the next iteration is not
//! entered, and the task ends cleanly. Everything that can fail inside a
//! tick is handled and logged in place, so the loops themselves never exit
//! on error.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use redis_pool_client::{Connector, DEFAULT_READY_RETRIES, PoolEntry};

use crate::manager::{ManagerInner, RECOVERY_READY_STEP, RECOVERY_READY_TIMEOUT};

/// Spawn the periodic health-recovery loop.
///
/// Runs a recovery pass immediately, then once per
/// `health_check_interval`.
pub(crate) fn spawn_health_loop<F: Connector>(
    inner: Arc<ManagerInner<F>>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = inner.recover_unhealthy_pools() => {}
            }
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(inner.config.health_check_interval) => {}
            }
        }
        tracing::debug!("health check task stopped");
    })
}

/// Spawn the periodic idle-cleanup loop.
///
/// Sleeps one `cleanup_interval` before the first pass.
pub(crate) fn spawn_cleanup_loop<F: Connector>(
    inner: Arc<ManagerInner<F>>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(inner.config.cleanup_interval) => {}
            }
            tokio::select! {
                () = cancel.cancelled() => break,
                () = inner.cleanup_idle_pools() => {}
            }
        }
        tracing::debug!("cleanup task stopped");
    })
}

impl<F: Connector> ManagerInner<F> {
    /// One health/recovery pass over every entry of every node.
    ///
    /// Each entry gets a health check; entries that fail get a replacement
    /// client built and readied, swapped in without disturbing the entry's
    /// identity, so outstanding leases stay valid. Entries whose replacement
    /// cannot become ready stay unhealthy until the next pass.
    pub(crate) async fn recover_unhealthy_pools(&self) {
        let _traversal = self.traversal_lock.lock().await;
        let urls: Vec<String> = self.pools.read().keys().cloned().collect();

        for url in urls {
            let entries = {
                let map = self.pools.read();
                match map.get(&url) {
                    Some(entries) => entries.clone(),
                    None => continue,
                }
            };
            for entry in entries {
                entry.health_check().await;
                if !entry.health_status() {
                    self.try_recover_entry(&url, &entry).await;
                }
            }
            self.update_url_metrics(&url);
        }
    }

    async fn try_recover_entry(&self, url: &str, entry: &Arc<PoolEntry<F::Client>>) {
        let spec = self.connect_spec(url);
        let replacement = match PoolEntry::connect(&self.connector, &spec) {
            Ok(replacement) => replacement,
            Err(err) => {
                tracing::error!(node_url = %url, error = %err, "failed to build replacement pool");
                return;
            }
        };

        match replacement
            .wait_for_ready(
                RECOVERY_READY_TIMEOUT,
                RECOVERY_READY_STEP,
                DEFAULT_READY_RETRIES,
            )
            .await
        {
            Ok(_) => {
                entry.adopt_client(replacement.client());
                entry.set_health(true);
                tracing::warn!(node_url = %url, "recovered connection pool");
            }
            Err(_) => {
                // Entry stays unhealthy; the next tick retries.
                tracing::debug!(node_url = %url, "recovery attempt failed");
            }
        }
    }

    /// One idle-cleanup pass over every node.
    ///
    /// Entries beyond the permanent floor that carry no in-flight calls and
    /// have been idle past `max_idle_time` are closed and dropped from the
    /// node's list; the floor prefix is never touched.
    pub(crate) async fn cleanup_idle_pools(&self) {
        let _traversal = self.traversal_lock.lock().await;
        let floor = self.config.pools_per_node_at_start.max(1);
        let urls: Vec<String> = self.pools.read().keys().cloned().collect();

        for url in urls {
            let entries = {
                let map = self.pools.read();
                match map.get(&url) {
                    Some(entries) => entries.clone(),
                    None => continue,
                }
            };
            let now = tokio::time::Instant::now();
            let victims: Vec<_> = entries
                .iter()
                .skip(floor)
                .filter(|entry| {
                    entry.active_calls() == 0
                        && now.duration_since(entry.last_used()) > self.config.max_idle_time
                })
                .cloned()
                .collect();

            for victim in victims {
                if victim.active_calls() != 0 {
                    // Leased since the scan; keep it.
                    continue;
                }
                victim.close().await;
                redis_pool_metrics::inc_idle_cleanup(&url);
                tracing::info!(node_url = %url, "removed idle connection pool");
            }

            if let Some(list) = self.pools.write().get_mut(&url) {
                list.retain(|entry| entry.is_present());
            }
            self.update_url_metrics(&url);
        }
    }
}
