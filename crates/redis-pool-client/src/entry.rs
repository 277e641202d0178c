//! Pool entry lifecycle.
//!
//! A [`PoolEntry`] wraps one backend client handle with the state the
//! manager needs: a health flag, an in-flight call counter, a last-used
//! timestamp, and the readiness gate. The recovery task can swap the inner
//! handle while the entry itself stays in place, so outstanding leases keep
//! working against the handle they were given.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::client::{ConnectSpec, Connector};
use crate::error::PoolError;

/// Default wall-clock budget for [`PoolEntry::wait_for_ready`].
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(10);

/// Default backoff step for [`PoolEntry::wait_for_ready`].
pub const DEFAULT_READY_STEP: Duration = Duration::from_millis(250);

/// Default retry cap for [`PoolEntry::wait_for_ready`].
pub const DEFAULT_READY_RETRIES: u32 = 5;

/// One managed connection container: a client handle plus lifecycle state.
pub struct PoolEntry<C> {
    url: String,
    /// Swap-able handle cell; recovery replaces the `Arc` while leases
    /// keep the one they cloned at acquire time.
    client: Mutex<Arc<C>>,
    health_status: AtomicBool,
    active_calls: AtomicU32,
    /// Cleared when the entry is dropped from the manager's mapping;
    /// release becomes a no-op afterwards.
    present: AtomicBool,
    last_used: Mutex<Instant>,
    /// First readiness attempt to first success. Observational only.
    connection_duration: Mutex<Option<Duration>>,
}

impl<C> PoolEntry<C> {
    /// Materialise a client handle and wrap it in a new entry.
    ///
    /// Validates the caller's options against the mode's allow-list and
    /// merges them over the mode defaults. Performs no network I/O; the
    /// entry starts unhealthy until [`PoolEntry::wait_for_ready`] sees a
    /// successful ping.
    pub fn connect<F>(connector: &F, spec: &ConnectSpec) -> Result<Self, PoolError>
    where
        F: Connector<Client = C>,
    {
        let effective = ConnectSpec {
            options: spec.options.merged_over_defaults(spec.mode.is_cluster())?,
            ..spec.clone()
        };
        let client = connector.connect(&effective)?;
        redis_pool_metrics::inc_connections_created(&spec.url);
        tracing::debug!(node_url = %spec.url, cluster = spec.mode.is_cluster(), "client handle created");

        Ok(Self {
            url: spec.url.clone(),
            client: Mutex::new(Arc::new(client)),
            health_status: AtomicBool::new(false),
            active_calls: AtomicU32::new(0),
            present: AtomicBool::new(true),
            last_used: Mutex::new(Instant::now()),
            connection_duration: Mutex::new(None),
        })
    }

    /// Backend node URL this entry serves.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Snapshot of the current client handle.
    #[must_use]
    pub fn client(&self) -> Arc<C> {
        self.client.lock().clone()
    }

    /// Whether the last ping succeeded.
    #[must_use]
    pub fn health_status(&self) -> bool {
        self.health_status.load(Ordering::Acquire)
    }

    /// Set the health flag.
    pub fn set_health(&self, healthy: bool) {
        self.health_status.store(healthy, Ordering::Release);
    }

    /// Number of in-flight calls leased from this entry.
    #[must_use]
    pub fn active_calls(&self) -> u32 {
        self.active_calls.load(Ordering::Acquire)
    }

    /// Whether the entry is still part of the manager's mapping.
    #[must_use]
    pub fn is_present(&self) -> bool {
        self.present.load(Ordering::Acquire)
    }

    /// When the entry last served a successful acquire.
    #[must_use]
    pub fn last_used(&self) -> Instant {
        *self.last_used.lock()
    }

    /// Time from first readiness attempt to first success, if ready yet.
    #[must_use]
    pub fn connection_duration(&self) -> Option<Duration> {
        *self.connection_duration.lock()
    }

    /// Stamp the last-used timestamp with the current time.
    pub fn touch(&self) {
        *self.last_used.lock() = Instant::now();
    }

    /// Reserve one in-flight call slot.
    pub fn begin_call(&self) {
        self.active_calls.fetch_add(1, Ordering::AcqRel);
    }

    /// Return one in-flight call slot.
    pub fn end_call(&self) {
        let previous = self.active_calls.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "active_calls underflow");
    }

    /// Swap in a replacement client handle.
    ///
    /// Outstanding leases keep the handle they cloned at acquire time; the
    /// next acquire sees the replacement.
    pub fn adopt_client(&self, replacement: Arc<C>) {
        *self.client.lock() = replacement;
    }
}

impl<C> PoolEntry<C>
where
    C: crate::client::BackendClient,
{
    /// Ping until the backend answers, with exponential backoff.
    ///
    /// On success sets the health flag, records the connection duration,
    /// and returns the elapsed time. Fails with
    /// [`PoolError::NoHealthyPools`] once the wall-clock budget or the
    /// retry cap is exhausted; the health flag stays false in that case.
    /// Each failed ping increments the node's failed-connection counter.
    pub async fn wait_for_ready(
        &self,
        timeout: Duration,
        step: Duration,
        max_retries: u32,
    ) -> Result<Duration, PoolError> {
        let start = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            match self.client().ping().await {
                Ok(()) => {
                    self.set_health(true);
                    let elapsed = start.elapsed();
                    *self.connection_duration.lock() = Some(elapsed);
                    tracing::info!(
                        node_url = %self.url,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "connection ready"
                    );
                    return Ok(elapsed);
                }
                Err(err) => {
                    redis_pool_metrics::inc_failed_connection(&self.url);
                    self.set_health(false);
                    attempt += 1;
                    tracing::warn!(
                        node_url = %self.url,
                        attempt,
                        error = %err,
                        "connection not ready"
                    );

                    if start.elapsed() > timeout || attempt >= max_retries {
                        return Err(PoolError::no_healthy_pools(&self.url));
                    }
                    // Backoff starts at attempt 1, so the first sleep is
                    // already 2 * step.
                    let backoff = step.saturating_mul(1u32 << attempt.min(16));
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// One ping attempt; updates the health flag and never errors.
    pub async fn health_check(&self) {
        match self.client().ping().await {
            Ok(()) => self.set_health(true),
            Err(err) => {
                self.set_health(false);
                tracing::error!(node_url = %self.url, error = %err, "health check failed");
            }
        }
    }

    /// Close the inner client handle and mark the entry unhealthy and
    /// no longer present.
    pub async fn close(&self) {
        self.client().close().await;
        self.set_health(false);
        self.present.store(false, Ordering::Release);
        tracing::info!(node_url = %self.url, "connection closed");
    }
}

impl<C> std::fmt::Debug for PoolEntry<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolEntry")
            .field("url", &self.url)
            .field("health_status", &self.health_status())
            .field("active_calls", &self.active_calls())
            .field("present", &self.is_present())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{BackendClient, NodeMode};
    use crate::error::ClientError;
    use crate::options::ClientOptions;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Ping succeeds once `fail_first` attempts have been burned.
    struct FlakyClient {
        fail_first: AtomicUsize,
        pings: AtomicUsize,
        closes: AtomicUsize,
    }

    #[async_trait]
    impl BackendClient for Arc<FlakyClient> {
        async fn ping(&self) -> Result<(), ClientError> {
            let n = self.pings.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first.load(Ordering::SeqCst) {
                Err(ClientError::Connection("refused".into()))
            } else {
                Ok(())
            }
        }

        async fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FlakyConnector {
        fail_first: usize,
        last: Mutex<Option<Arc<FlakyClient>>>,
    }

    impl FlakyConnector {
        fn new(fail_first: usize) -> Self {
            Self {
                fail_first,
                last: Mutex::new(None),
            }
        }
    }

    impl Connector for FlakyConnector {
        type Client = Arc<FlakyClient>;

        fn connect(&self, _spec: &ConnectSpec) -> Result<Self::Client, PoolError> {
            let client = Arc::new(FlakyClient {
                fail_first: AtomicUsize::new(self.fail_first),
                pings: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
            });
            *self.last.lock() = Some(client.clone());
            Ok(client)
        }
    }

    fn spec(url: &str) -> ConnectSpec {
        ConnectSpec {
            url: url.to_string(),
            max_connections: 10,
            mode: NodeMode::SingleNode,
            options: ClientOptions::default(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn entry_becomes_healthy_after_flaky_start() {
        let connector = FlakyConnector::new(2);
        let entry = PoolEntry::connect(&connector, &spec("redis://flaky")).unwrap();
        assert!(!entry.health_status());

        let elapsed = entry
            .wait_for_ready(Duration::from_secs(10), Duration::from_millis(250), 5)
            .await
            .unwrap();
        assert!(entry.health_status());
        assert_eq!(entry.connection_duration(), Some(elapsed));
    }

    #[tokio::test(start_paused = true)]
    async fn readiness_fails_after_retry_cap() {
        let connector = FlakyConnector::new(usize::MAX);
        let entry = PoolEntry::connect(&connector, &spec("redis://down")).unwrap();

        let err = entry
            .wait_for_ready(Duration::from_secs(60), Duration::from_millis(250), 3)
            .await;
        assert!(matches!(err, Err(PoolError::NoHealthyPools { .. })));
        assert!(!entry.health_status());

        let client = connector.last.lock().clone().unwrap();
        assert_eq!(client.pings.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn readiness_fails_when_budget_expires_first() {
        let connector = FlakyConnector::new(usize::MAX);
        let entry = PoolEntry::connect(&connector, &spec("redis://slow")).unwrap();

        // First backoff is 2 * step = 2s, so the second ping lands past
        // the 1s budget and no third attempt is made.
        let err = entry
            .wait_for_ready(Duration::from_secs(1), Duration::from_secs(1), 100)
            .await;
        assert!(matches!(err, Err(PoolError::NoHealthyPools { .. })));

        let client = connector.last.lock().clone().unwrap();
        assert_eq!(client.pings.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn health_check_flips_the_flag_both_ways() {
        let connector = FlakyConnector::new(0);
        let entry = PoolEntry::connect(&connector, &spec("redis://hc")).unwrap();

        entry.health_check().await;
        assert!(entry.health_status());

        let client = connector.last.lock().clone().unwrap();
        client.fail_first.store(usize::MAX, Ordering::SeqCst);
        entry.health_check().await;
        assert!(!entry.health_status());
    }

    #[tokio::test]
    async fn close_marks_absent_and_unhealthy() {
        let connector = FlakyConnector::new(0);
        let entry = PoolEntry::connect(&connector, &spec("redis://close")).unwrap();
        entry.set_health(true);

        entry.close().await;
        assert!(!entry.health_status());
        assert!(!entry.is_present());

        let client = connector.last.lock().clone().unwrap();
        assert_eq!(client.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn adopt_client_swaps_for_new_acquires_only() {
        let connector = FlakyConnector::new(0);
        let entry = PoolEntry::connect(&connector, &spec("redis://swap")).unwrap();
        let original = entry.client();

        let replacement = connector.connect(&spec("redis://swap")).unwrap();
        entry.adopt_client(Arc::new(replacement));

        // The snapshot taken before the swap still points at the original.
        assert_eq!(original.pings.load(Ordering::SeqCst), 0);
        assert!(!Arc::ptr_eq(&original, &entry.client()));
    }

    #[test]
    fn invalid_options_fail_construction() {
        let connector = FlakyConnector::new(0);
        let mut bad = spec("redis://opts");
        bad.options.read_from_replicas = Some(true);
        let err = PoolEntry::connect(&connector, &bad);
        assert!(matches!(err, Err(PoolError::InvalidOptions { .. })));
    }

    #[test]
    fn call_counters_track_leases() {
        let connector = FlakyConnector::new(0);
        let entry = PoolEntry::connect(&connector, &spec("redis://count")).unwrap();
        entry.begin_call();
        entry.begin_call();
        assert_eq!(entry.active_calls(), 2);
        entry.end_call();
        assert_eq!(entry.active_calls(), 1);
    }
}
