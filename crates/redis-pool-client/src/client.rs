//! The backend client seam.
//!
//! The pool manager never speaks the backend protocol itself; it works
//! against an opaque client handle that can be pinged and closed. Command
//! dispatch, framing, and cluster slot routing all live behind
//! [`BackendClient`] implementations supplied by the embedding application.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, PoolError};
use crate::options::ClientOptions;

/// An opaque backend client handle.
///
/// Implementations wrap a concrete client library. `ping` is the only
/// probe the manager uses for readiness and health; `close` releases the
/// transport and must be idempotent.
#[async_trait]
pub trait BackendClient: Send + Sync + 'static {
    /// Probe the backend; `Ok` means the connection is usable.
    async fn ping(&self) -> Result<(), ClientError>;

    /// Release transport resources. Safe to call more than once.
    async fn close(&self);
}

/// Factory for backend client handles.
///
/// `connect` materialises a handle without performing network I/O; the
/// first actual round-trip happens when the pool entry pings it during
/// readiness.
pub trait Connector: Send + Sync + 'static {
    /// The handle type this connector produces.
    type Client: BackendClient;

    /// Build a client handle for the given connection spec.
    fn connect(&self, spec: &ConnectSpec) -> Result<Self::Client, PoolError>;
}

/// One cluster startup node.
///
/// Passed through to the client library as an opaque configuration blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterNode {
    /// Node hostname or IP address.
    pub host: String,
    /// Node port.
    pub port: u16,
}

impl ClusterNode {
    /// Create a startup node entry.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

/// Single-node or cluster connection mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeMode {
    /// One standalone backend node.
    SingleNode,
    /// A cluster reached through the given startup nodes.
    Cluster {
        /// Nodes used to discover the cluster topology.
        startup_nodes: Vec<ClusterNode>,
    },
}

impl NodeMode {
    /// Whether this is cluster mode.
    #[must_use]
    pub fn is_cluster(&self) -> bool {
        matches!(self, Self::Cluster { .. })
    }
}

/// Everything a connector needs to materialise one client handle.
#[derive(Debug, Clone)]
pub struct ConnectSpec {
    /// Backend node URL.
    pub url: String,
    /// Maximum concurrent connections the handle may open.
    pub max_connections: u32,
    /// Single-node or cluster mode.
    pub mode: NodeMode,
    /// Effective client options (already merged over mode defaults).
    pub options: ClientOptions,
}
