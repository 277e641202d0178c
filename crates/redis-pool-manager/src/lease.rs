//! Scoped leases.

use std::ops::Deref;
use std::sync::Arc;

use redis_pool_client::{Connector, PoolEntry};

use crate::manager::ManagerInner;

/// A scoped right to use one pool's client handle.
///
/// Holds the call-slot reservation made at acquire time and returns it when
/// dropped, on every exit path. The lease carries the client handle the
/// entry held at acquire time; a recovery swap happening mid-lease does not
/// affect it. The lease never closes the entry.
pub struct Lease<F: Connector> {
    inner: Arc<ManagerInner<F>>,
    entry: Arc<PoolEntry<F::Client>>,
    client: Arc<F::Client>,
}

impl<F: Connector> Lease<F> {
    pub(crate) fn new(inner: Arc<ManagerInner<F>>, entry: Arc<PoolEntry<F::Client>>) -> Self {
        let client = entry.client();
        Self {
            inner,
            entry,
            client,
        }
    }

    /// The leased client handle.
    #[must_use]
    pub fn client(&self) -> &F::Client {
        &self.client
    }

    /// The node URL this lease was acquired for.
    #[must_use]
    pub fn url(&self) -> &str {
        self.entry.url()
    }
}

impl<F: Connector> Deref for Lease<F> {
    type Target = F::Client;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

impl<F: Connector> Drop for Lease<F> {
    fn drop(&mut self) {
        self.inner.release(&self.entry);
    }
}

impl<F: Connector> std::fmt::Debug for Lease<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("url", &self.entry.url())
            .field("active_calls", &self.entry.active_calls())
            .finish()
    }
}
