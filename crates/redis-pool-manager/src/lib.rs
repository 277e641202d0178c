//! # redis-pool-manager
//!
//! Multi-node elastic connection-pool manager for a Redis-style key/value
//! backend.
//!
//! Callers register backend nodes by URL and acquire ready-to-use client
//! handles through scoped leases. The manager transparently:
//!
//! - keeps one or more pools per URL, with a permanent floor and elastic
//!   growth under contention,
//! - recovers pools that fail health checks by swapping in a fresh client
//!   without invalidating outstanding leases,
//! - shrinks unused elastic capacity after a configurable idle period,
//! - reports per-node Prometheus metrics on every mutation.
//!
//! The backend client library stays behind the
//! [`Connector`](redis_pool_client::Connector) /
//! [`BackendClient`](redis_pool_client::BackendClient) seam from
//! `redis-pool-client`; the manager only ever pings, closes, and hands out
//! handles.
//!
//! ## Example
//!
//! ```rust,ignore
//! use redis_pool_manager::{ManagerConfig, PoolManager};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = PoolManager::new(ManagerConfig::from_env(), connector);
//!     manager.add_node_pool("redis://cache-1:6379").await?;
//!     manager.start_cleanup();
//!
//!     {
//!         let lease = manager.acquire("redis://cache-1:6379").await?;
//!         lease.ping().await?;
//!     } // call slot returned here
//!
//!     manager.stop_cleanup();
//!     manager.close_all_pools().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod lease;
pub mod manager;
pub mod status;

mod tasks;

// Re-export commonly used types
pub use config::ManagerConfig;
pub use lease::Lease;
pub use manager::PoolManager;
pub use redis_pool_client::{
    BackendClient, ClientError, ClientOptions, ClusterNode, ConnectSpec, Connector, NodeMode,
    PoolEntry, PoolError,
};
pub use status::{EntryStatus, NodeStatus};
