//! Unit tests for the registry store and heartbeat monitor

use discovery_gateway::registry::store::EvictOutcome;
use discovery_gateway::registry::{
    HeartbeatMonitor, InstanceStatus, MonitorConfig, RegistryStore, ServiceInstance,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn instance(app: &str, id: &str, lease_secs: u64) -> ServiceInstance {
    ServiceInstance {
        app_name: app.to_string(),
        instance_id: id.to_string(),
        host: "10.0.0.5".to_string(),
        port: 8080,
        status: InstanceStatus::Up,
        lease_duration_secs: lease_secs,
        metadata: HashMap::new(),
    }
}

#[tokio::test(start_paused = true)]
async fn test_fetch_reports_heartbeat_age() {
    let store = RegistryStore::new();
    store.register(instance("users", "u-1", 90));

    tokio::time::advance(Duration::from_secs(20)).await;
    let views = store.fetch("USERS").unwrap();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].last_renewal_age_ms, 20_000);
    assert_eq!(views[0].remaining_lease(), Duration::from_secs(70));

    store.renew("users", "u-1");
    let views = store.fetch("users").unwrap();
    assert_eq!(views[0].last_renewal_age_ms, 0);
}

#[tokio::test]
async fn test_applications_are_independent() {
    let store = RegistryStore::new();
    store.register(instance("users", "u-1", 90));
    store.register(instance("orders", "o-1", 90));
    store.register(instance("orders", "o-2", 90));

    assert!(store.cancel("users", "u-1").is_some());
    assert!(store.fetch("users").is_none());
    assert_eq!(store.fetch("orders").unwrap().len(), 2);

    let names: Vec<String> = store.fetch_all().into_iter().map(|a| a.name).collect();
    assert_eq!(names, vec!["ORDERS"]);
}

#[tokio::test]
async fn test_cancel_twice_is_harmless() {
    let store = RegistryStore::new();
    store.register(instance("users", "u-1", 90));

    assert!(store.cancel("users", "u-1").is_some());
    assert!(store.cancel("users", "u-1").is_none());
    assert!(!store.renew("users", "u-1"));
}

#[tokio::test]
async fn test_status_override_is_visible_in_views() {
    let store = RegistryStore::new();
    store.register(instance("users", "u-1", 90));

    assert!(store.update_status("users", "u-1", InstanceStatus::OutOfService));
    let view = &store.fetch("users").unwrap()[0];
    assert_eq!(view.instance.status, InstanceStatus::OutOfService);
    assert!(!view.is_eligible());

    assert!(!store.update_status("users", "missing", InstanceStatus::Down));
}

#[tokio::test(start_paused = true)]
async fn test_evict_outcomes() {
    let store = RegistryStore::new();
    store.register(instance("users", "u-1", 30));

    assert_eq!(store.evict("users", "u-1"), EvictOutcome::NotExpired);
    assert_eq!(store.evict("users", "nobody"), EvictOutcome::Absent);

    tokio::time::advance(Duration::from_secs(30)).await;
    assert!(matches!(store.evict("users", "u-1"), EvictOutcome::Evicted(ref i) if i.instance_id == "u-1"));
    assert_eq!(store.instance_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_heartbeats_from_many_instances() {
    let store = Arc::new(RegistryStore::new());

    let tasks: Vec<_> = (0..16)
        .map(|t| {
            let store = store.clone();
            tokio::spawn(async move {
                let app = format!("app-{}", t % 4);
                let id = format!("i-{}", t);
                store.register(instance(&app, &id, 90));
                for _ in 0..100 {
                    assert!(store.renew(&app, &id));
                }
                if t % 2 == 0 {
                    store.cancel(&app, &id);
                }
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(store.instance_count(), 8);
    // 16 registrations and 1600 renewals
    assert_eq!(store.take_renewals(), 1616);
    assert_eq!(store.take_renewals(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_monitor_task_evicts_in_background() {
    let store = Arc::new(RegistryStore::new());
    let monitor = Arc::new(HeartbeatMonitor::new(
        store.clone(),
        MonitorConfig {
            interval: Duration::from_secs(10),
            self_preservation_enabled: false,
            renewal_threshold: 0.85,
            expected_renewals_per_lease: 3,
            max_eviction_ratio: 1.0,
        },
    ));
    store.register(instance("users", "u-1", 30));
    monitor.start().await;

    tokio::time::sleep(Duration::from_secs(25)).await;
    assert_eq!(store.instance_count(), 1);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(store.instance_count(), 0);
    assert!(store.expired_candidates(Instant::now()).is_empty());

    monitor.stop().await;
}
