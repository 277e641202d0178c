//! # redis-pool-testing
//!
//! Mock backend client and connector for redis-pool test suites.
//!
//! The mock never opens a socket: ping outcomes are scripted through a
//! shared [`MockControl`], and every handle the connector hands out is
//! recorded so tests can assert on ping and close counts after the fact.
//!
//! Kept in its own crate so the manager crate can depend on it as a
//! dev-dependency without creating a circular dependency.

#![warn(missing_docs)]
#![deny(unsafe_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use redis_pool_client::{BackendClient, ClientError, ConnectSpec, Connector, PoolError};

/// Shared switchboard for scripted ping outcomes.
///
/// One control is shared by the connector and every client it creates, so a
/// test can flip the backend "down" or "up" mid-scenario.
#[derive(Debug, Default)]
pub struct MockControl {
    fail_all: AtomicBool,
    fail_next: AtomicU32,
}

impl MockControl {
    /// Make every subsequent ping fail (`true`) or succeed (`false`).
    pub fn set_fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    /// Make exactly the next `count` pings fail, then succeed again.
    pub fn fail_next_pings(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    fn should_fail(&self) -> bool {
        if self.fail_all.load(Ordering::SeqCst) {
            return true;
        }
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[derive(Debug)]
struct MockClientState {
    url: String,
    pings: AtomicU32,
    failed_pings: AtomicU32,
    close_calls: AtomicU32,
    /// Per-client override; fails this client's pings regardless of the
    /// shared control.
    fail_local: AtomicBool,
    control: Arc<MockControl>,
}

/// A scripted backend client handle.
///
/// Cloning shares the underlying state, so a test can keep a handle to a
/// client the pool is using and observe it.
#[derive(Debug, Clone)]
pub struct MockClient {
    state: Arc<MockClientState>,
}

impl MockClient {
    /// URL the client was created for.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.state.url
    }

    /// Total pings attempted against this client.
    #[must_use]
    pub fn ping_count(&self) -> u32 {
        self.state.pings.load(Ordering::SeqCst)
    }

    /// Pings that were scripted to fail.
    #[must_use]
    pub fn failed_ping_count(&self) -> u32 {
        self.state.failed_pings.load(Ordering::SeqCst)
    }

    /// How many times `close` was called.
    #[must_use]
    pub fn close_count(&self) -> u32 {
        self.state.close_calls.load(Ordering::SeqCst)
    }

    /// Whether `close` was called at least once.
    #[must_use]
    pub fn was_closed(&self) -> bool {
        self.close_count() > 0
    }

    /// Whether this handle and `other` share state.
    #[must_use]
    pub fn same_client(&self, other: &MockClient) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    /// Make this client's pings fail (`true`) or follow the shared
    /// control again (`false`).
    pub fn set_fail(&self, fail: bool) {
        self.state.fail_local.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl BackendClient for MockClient {
    async fn ping(&self) -> Result<(), ClientError> {
        self.state.pings.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_local.load(Ordering::SeqCst) || self.state.control.should_fail() {
            self.state.failed_pings.fetch_add(1, Ordering::SeqCst);
            Err(ClientError::Connection("scripted ping failure".into()))
        } else {
            Ok(())
        }
    }

    async fn close(&self) {
        self.state.close_calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
struct MockConnectorInner {
    control: Arc<MockControl>,
    clients: Mutex<Vec<MockClient>>,
    specs: Mutex<Vec<ConnectSpec>>,
}

/// A connector that fabricates [`MockClient`] handles.
///
/// Clones share state: hand one clone to the manager and keep another to
/// drive the script and inspect created clients.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    inner: Arc<MockConnectorInner>,
}

impl MockConnector {
    /// Create a connector whose pings all succeed until scripted otherwise.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared ping switchboard.
    #[must_use]
    pub fn control(&self) -> &MockControl {
        &self.inner.control
    }

    /// Snapshot of every client created so far, in creation order.
    #[must_use]
    pub fn created_clients(&self) -> Vec<MockClient> {
        self.inner.clients.lock().clone()
    }

    /// Number of clients created so far.
    #[must_use]
    pub fn created_count(&self) -> usize {
        self.inner.clients.lock().len()
    }

    /// Clients whose `close` was called at least once.
    #[must_use]
    pub fn closed_clients(&self) -> Vec<MockClient> {
        self.inner
            .clients
            .lock()
            .iter()
            .filter(|c| c.was_closed())
            .cloned()
            .collect()
    }

    /// Snapshot of every connect spec seen, in call order.
    #[must_use]
    pub fn seen_specs(&self) -> Vec<ConnectSpec> {
        self.inner.specs.lock().clone()
    }
}

impl Connector for MockConnector {
    type Client = MockClient;

    fn connect(&self, spec: &ConnectSpec) -> Result<Self::Client, PoolError> {
        let client = MockClient {
            state: Arc::new(MockClientState {
                url: spec.url.clone(),
                pings: AtomicU32::new(0),
                failed_pings: AtomicU32::new(0),
                close_calls: AtomicU32::new(0),
                fail_local: AtomicBool::new(false),
                control: Arc::clone(&self.inner.control),
            }),
        };
        self.inner.clients.lock().push(client.clone());
        self.inner.specs.lock().push(spec.clone());
        Ok(client)
    }
}
