//! # redis-pool-client
//!
//! Client-handle seam and pool-entry lifecycle for the redis-pool manager.
//!
//! This crate defines the boundary between the pool manager and the backend
//! client library: the [`BackendClient`] / [`Connector`] traits, the typed
//! [`ClientOptions`] with per-mode allow-list validation, and [`PoolEntry`],
//! the managed container that wraps one client handle with health state,
//! an in-flight call counter, and readiness backoff.
//!
//! ## Example
//!
//! ```rust,ignore
//! use redis_pool_client::{ClientOptions, ConnectSpec, NodeMode, PoolEntry};
//!
//! let spec = ConnectSpec {
//!     url: "redis://cache-1:6379".into(),
//!     max_connections: 50,
//!     mode: NodeMode::SingleNode,
//!     options: ClientOptions::default(),
//! };
//!
//! let entry = PoolEntry::connect(&connector, &spec)?;
//! entry
//!     .wait_for_ready(
//!         redis_pool_client::DEFAULT_READY_TIMEOUT,
//!         redis_pool_client::DEFAULT_READY_STEP,
//!         redis_pool_client::DEFAULT_READY_RETRIES,
//!     )
//!     .await?;
//! assert!(entry.health_status());
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod client;
pub mod entry;
pub mod error;
pub mod options;

// Re-export commonly used types
pub use client::{BackendClient, ClusterNode, ConnectSpec, Connector, NodeMode};
pub use entry::{
    DEFAULT_READY_RETRIES, DEFAULT_READY_STEP, DEFAULT_READY_TIMEOUT, PoolEntry,
};
pub use error::{ClientError, PoolError};
pub use options::{CLUSTER_ONLY_KEYS, ClientOptions, KeepaliveProbes, SINGLE_NODE_KEYS};
