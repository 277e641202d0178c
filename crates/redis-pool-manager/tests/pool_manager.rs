//! End-to-end pool manager scenarios against the mock backend.
//!
//! Everything here goes through the public API; entry-level internals are
//! covered by the unit tests inside the crate.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::time::Duration;

use futures_util::FutureExt;

use redis_pool_manager::{BackendClient, ManagerConfig, PoolError, PoolManager};
use redis_pool_testing::MockConnector;

fn make_manager(config: ManagerConfig) -> (PoolManager<MockConnector>, MockConnector) {
    let connector = MockConnector::new();
    let manager = PoolManager::new(config, connector.clone());
    // Most scenarios drive recovery and cleanup passes explicitly.
    manager.stop_health_checks();
    (manager, connector)
}

#[tokio::test]
async fn single_node_happy_path() {
    let (manager, connector) = make_manager(
        ManagerConfig::new()
            .pools_per_node_at_start(2)
            .max_connection_size(10),
    );
    manager.add_node_pool("redis://a").await.unwrap();

    let status = manager.fetch_pool_status().await;
    let node = &status["redis://a"];
    assert_eq!(node.total_pools, 2);
    assert_eq!(node.healthy_pools, 2);
    assert_eq!(node.unhealthy_pools, 0);
    assert_eq!(node.pools.len(), 2);
    assert!(node.pools.iter().all(|p| p.active_calls == 0));
    assert_eq!(connector.created_count(), 2);
}

#[tokio::test]
async fn duplicate_add_leaves_state_unchanged() {
    let (manager, connector) = make_manager(
        ManagerConfig::new()
            .pools_per_node_at_start(2)
            .max_connection_size(10),
    );
    manager.add_node_pool("redis://a").await.unwrap();
    manager.add_node_pool("redis://a").await.unwrap();

    let status = manager.fetch_pool_status().await;
    assert_eq!(status["redis://a"].total_pools, 2);
    assert_eq!(connector.created_count(), 2);
}

#[tokio::test]
async fn concurrent_adds_converge_on_one_initialisation() {
    let (manager, connector) = make_manager(ManagerConfig::new().pools_per_node_at_start(2));

    let (first, second) = tokio::join!(
        manager.add_node_pool("redis://a"),
        manager.add_node_pool("redis://a"),
    );
    first.unwrap();
    second.unwrap();

    let status = manager.fetch_pool_status().await;
    assert_eq!(status["redis://a"].total_pools, 2);
    assert_eq!(connector.created_count(), 2);
}

#[tokio::test]
async fn saturation_triggers_growth() {
    let (manager, _connector) = make_manager(
        ManagerConfig::new()
            .pools_per_node_at_start(1)
            .max_connection_size(1),
    );
    manager.add_node_pool("redis://a").await.unwrap();

    let first = manager.acquire("redis://a").await.unwrap();
    // The only pool is saturated, so this acquire must grow the list.
    let second = manager.acquire("redis://a").await.unwrap();

    let status = manager.fetch_pool_status().await;
    assert_eq!(status["redis://a"].total_pools, 2);

    // Both leases carry working clients.
    first.ping().await.unwrap();
    second.ping().await.unwrap();

    drop(first);
    drop(second);

    let status = manager.fetch_pool_status().await;
    let active: u32 = status["redis://a"].pools.iter().map(|p| p.active_calls).sum();
    assert_eq!(active, 0);
}

#[tokio::test]
async fn leases_spread_to_the_least_loaded_pool() {
    let (manager, _connector) = make_manager(
        ManagerConfig::new()
            .pools_per_node_at_start(2)
            .max_connection_size(10),
    );
    manager.add_node_pool("redis://a").await.unwrap();

    let _l1 = manager.acquire("redis://a").await.unwrap();
    let _l2 = manager.acquire("redis://a").await.unwrap();
    let _l3 = manager.acquire("redis://a").await.unwrap();

    let status = manager.fetch_pool_status().await;
    let node = &status["redis://a"];
    let active: u32 = node.pools.iter().map(|p| p.active_calls).sum();
    assert_eq!(active, 3);
    // The second lease went to the then-empty second pool.
    assert!(node.pools.iter().all(|p| p.active_calls >= 1));
}

#[tokio::test(start_paused = true)]
async fn recovery_restores_an_unhealthy_node() {
    let (manager, connector) = make_manager(ManagerConfig::new());
    manager.add_node_pool("redis://a").await.unwrap();

    connector.control().set_fail_all(true);
    manager.recover_unhealthy_pools().await;
    let status = manager.fetch_pool_status().await;
    assert_eq!(status["redis://a"].unhealthy_pools, 1);

    connector.control().set_fail_all(false);
    manager.recover_unhealthy_pools().await;
    let status = manager.fetch_pool_status().await;
    assert_eq!(status["redis://a"].healthy_pools, 1);
    assert_eq!(status["redis://a"].unhealthy_pools, 0);
}

#[tokio::test(start_paused = true)]
async fn cleanup_honours_the_permanent_floor() {
    let (manager, connector) = make_manager(
        ManagerConfig::new()
            .pools_per_node_at_start(1)
            .max_connection_size(1)
            .max_idle_time(Duration::from_secs(180)),
    );
    manager.add_node_pool("redis://a").await.unwrap();

    // Grow to one permanent plus three elastic entries.
    let leases = [
        manager.acquire("redis://a").await.unwrap(),
        manager.acquire("redis://a").await.unwrap(),
        manager.acquire("redis://a").await.unwrap(),
        manager.acquire("redis://a").await.unwrap(),
    ];
    assert_eq!(manager.fetch_pool_status().await["redis://a"].total_pools, 4);
    drop(leases);

    tokio::time::advance(Duration::from_secs(181)).await;
    manager.cleanup_idle_pools().await;

    let status = manager.fetch_pool_status().await;
    assert_eq!(status["redis://a"].total_pools, 1);

    // Exactly the three elastic clients were closed, once each.
    let created = connector.created_clients();
    assert_eq!(created.len(), 4);
    assert!(!created[0].was_closed());
    for client in &created[1..] {
        assert_eq!(client.close_count(), 1);
    }
}

#[tokio::test(start_paused = true)]
async fn cleanup_keeps_busy_and_recent_entries() {
    let (manager, connector) = make_manager(
        ManagerConfig::new()
            .pools_per_node_at_start(1)
            .max_connection_size(1)
            .max_idle_time(Duration::from_secs(180)),
    );
    manager.add_node_pool("redis://a").await.unwrap();

    let _held = manager.acquire("redis://a").await.unwrap();
    let second = manager.acquire("redis://a").await.unwrap();
    let _third = manager.acquire("redis://a").await.unwrap();
    drop(second);

    // Entry 1 is idle but entry 2 still carries a call; only entry 1 may go.
    tokio::time::advance(Duration::from_secs(181)).await;
    manager.cleanup_idle_pools().await;

    let status = manager.fetch_pool_status().await;
    assert_eq!(status["redis://a"].total_pools, 2);
    assert_eq!(connector.closed_clients().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn acquire_fails_when_every_pool_is_unhealthy() {
    let (manager, connector) = make_manager(ManagerConfig::new());
    manager.add_node_pool("redis://a").await.unwrap();

    connector.control().set_fail_all(true);
    manager.recover_unhealthy_pools().await;

    let err = manager
        .acquire_timeout("redis://a", Duration::from_secs(1))
        .await;
    assert!(matches!(err, Err(PoolError::NoHealthyPools { .. })));
}

#[tokio::test]
async fn acquire_for_unknown_url_fails_immediately() {
    let (manager, _connector) = make_manager(ManagerConfig::new());

    let err = manager.acquire("redis://never-added").await;
    assert!(matches!(err, Err(PoolError::UnknownUrl { .. })));
}

#[tokio::test]
async fn spent_budget_fails_at_entry() {
    let (manager, _connector) = make_manager(ManagerConfig::new());
    manager.add_node_pool("redis://a").await.unwrap();

    let err = manager.acquire_timeout("redis://a", Duration::ZERO).await;
    assert!(matches!(err, Err(PoolError::NoHealthyPools { .. })));

    let err = manager
        .add_node_pool_timeout("redis://b", Duration::ZERO)
        .await;
    assert!(matches!(err, Err(PoolError::NoHealthyPools { .. })));
    assert!(!manager.fetch_pool_status().await.contains_key("redis://b"));
}

#[tokio::test(start_paused = true)]
async fn add_fails_when_the_backend_never_answers() {
    let (manager, connector) = make_manager(ManagerConfig::new());
    connector.control().set_fail_all(true);

    let err = manager
        .add_node_pool_timeout("redis://down", Duration::from_secs(2))
        .await;
    assert!(matches!(err, Err(PoolError::NoHealthyPools { .. })));
    assert!(manager.fetch_pool_status().await.is_empty());

    // The node can still be registered once the backend comes back.
    connector.control().set_fail_all(false);
    manager.add_node_pool("redis://down").await.unwrap();
    assert_eq!(
        manager.fetch_pool_status().await["redis://down"].total_pools,
        1
    );
}

#[tokio::test]
async fn invalid_options_surface_through_add() {
    let mut options = redis_pool_manager::ClientOptions::default();
    options.read_from_replicas = Some(true);
    let (manager, _connector) =
        make_manager(ManagerConfig::new().pool_options(options));

    let err = manager.add_node_pool("redis://a").await;
    assert!(matches!(err, Err(PoolError::InvalidOptions { .. })));
}

#[tokio::test]
async fn lease_is_released_even_when_the_caller_panics() {
    let (manager, _connector) = make_manager(ManagerConfig::new());
    manager.add_node_pool("redis://a").await.unwrap();

    let result = std::panic::AssertUnwindSafe(async {
        let _lease = manager.acquire("redis://a").await.unwrap();
        panic!("caller exploded mid-lease");
    })
    .catch_unwind()
    .await;
    assert!(result.is_err());

    let status = manager.fetch_pool_status().await;
    assert_eq!(status["redis://a"].pools[0].active_calls, 0);
}

#[tokio::test]
async fn close_node_pools_is_safe_for_unknown_urls() {
    let (manager, _connector) = make_manager(ManagerConfig::new());
    manager.close_node_pools("redis://ghost").await;
    assert!(manager.fetch_pool_status().await.is_empty());
}

#[tokio::test]
async fn close_all_pools_closes_every_client_once() {
    let (manager, connector) = make_manager(ManagerConfig::new().pools_per_node_at_start(1));
    manager.add_node_pool("redis://a").await.unwrap();
    manager.add_node_pool("redis://b").await.unwrap();

    {
        let _lease = manager.acquire("redis://a").await.unwrap();
    }

    manager.close_all_pools().await;

    assert!(manager.fetch_pool_status().await.is_empty());
    for client in connector.created_clients() {
        assert_eq!(client.close_count(), 1);
    }
}

#[tokio::test]
async fn acquire_after_close_reports_unknown_url() {
    let (manager, _connector) = make_manager(ManagerConfig::new());
    manager.add_node_pool("redis://a").await.unwrap();
    manager.close_node_pools("redis://a").await;

    let err = manager.acquire("redis://a").await;
    assert!(matches!(err, Err(PoolError::UnknownUrl { .. })));
}

#[tokio::test]
async fn task_controls_report_running_state() {
    let connector = MockConnector::new();
    let manager = PoolManager::new(ManagerConfig::new(), connector);

    // The health task starts with the manager; cleanup is opt-in.
    assert!(manager.is_health_check_running());
    assert!(!manager.is_cleanup_running());

    manager.start_cleanup();
    assert!(manager.is_cleanup_running());

    manager.stop_cleanup();
    assert!(!manager.is_cleanup_running());

    manager.stop_health_checks();
    assert!(!manager.is_health_check_running());
}

#[tokio::test(start_paused = true)]
async fn periodic_cleanup_task_evicts_idle_capacity() {
    let connector = MockConnector::new();
    let manager = PoolManager::new(
        ManagerConfig::new()
            .pools_per_node_at_start(1)
            .max_connection_size(1)
            .cleanup_interval(Duration::from_secs(10))
            .max_idle_time(Duration::from_secs(5)),
        connector.clone(),
    );
    manager.stop_health_checks();
    manager.add_node_pool("redis://a").await.unwrap();

    {
        let _l1 = manager.acquire("redis://a").await.unwrap();
        let _l2 = manager.acquire("redis://a").await.unwrap();
    }
    assert_eq!(manager.fetch_pool_status().await["redis://a"].total_pools, 2);

    manager.start_cleanup();
    tokio::time::sleep(Duration::from_secs(12)).await;

    let status = manager.fetch_pool_status().await;
    assert_eq!(status["redis://a"].total_pools, 1);

    manager.stop_cleanup();
    manager.close_all_pools().await;
}
