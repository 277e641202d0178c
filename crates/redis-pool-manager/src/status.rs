//! Pool status snapshots.

use serde::{Deserialize, Serialize};

/// Status of one pool entry within a node's list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryStatus {
    /// Position in the node's pool list.
    pub index: usize,
    /// In-flight leased calls on this pool.
    pub active_calls: u32,
}

/// Status of one node's pool list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    /// Total number of pools for the node.
    pub total_pools: usize,
    /// Pools currently passing health checks.
    pub healthy_pools: usize,
    /// Pools currently failing health checks.
    pub unhealthy_pools: usize,
    /// Per-pool detail, in list order.
    pub pools: Vec<EntryStatus>,
}
