//! Exercises the pool manager end to end against the mock backend and
//! prints the status snapshot plus the Prometheus exposition.
//!
//! ```bash
//! REDIS_URLS=redis://cache-1,redis://cache-2 \
//! MAX_CONNECTION_SIZE=4 \
//! cargo run -p redis-pool-manager --example testbench
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use redis_pool_manager::{BackendClient, ManagerConfig, PoolManager};
use redis_pool_testing::MockConnector;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let urls: Vec<String> = std::env::var("REDIS_URLS")
        .unwrap_or_else(|_| "redis://localhost:6379".to_string())
        .split(',')
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty())
        .collect();

    let connector = MockConnector::new();
    let manager = PoolManager::new(ManagerConfig::from_env(), connector);
    manager.start_cleanup();

    for url in &urls {
        manager.add_node_pool(url).await.expect("node registration failed");
    }

    // A few rounds of held-then-released leases per node.
    for round in 0..5u32 {
        let mut leases = Vec::new();
        for url in &urls {
            for _ in 0..3 {
                leases.push(manager.acquire(url).await.expect("acquire failed"));
            }
        }
        for lease in &leases {
            lease.ping().await.expect("leased client unusable");
        }
        tracing::info!(round, leases = leases.len(), "round complete");
        drop(leases);
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    manager.log_pool_state().await;

    let status = manager.fetch_pool_status().await;
    println!(
        "{}",
        serde_json::to_string_pretty(&status).expect("status serialisation failed")
    );
    println!("{}", redis_pool_metrics::gather_text());

    manager.stop_cleanup();
    manager.close_all_pools().await;
}
