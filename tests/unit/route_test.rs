//! Unit tests for route matching and load balancing

use discovery_gateway::config::RouteConfig;
use discovery_gateway::gateway::route::{RouteEntry, RouteOrigin, RouteSet};
use discovery_gateway::gateway::{LoadBalancer, LoadBalancingStrategy};

fn config(path: &str, service: &str, strip_prefix: bool) -> RouteConfig {
    RouteConfig {
        id: None,
        path: path.to_string(),
        service_id: service.to_string(),
        strip_prefix,
    }
}

#[test]
fn test_longest_prefix_wins() {
    let routes = RouteSet::from_config(&[
        config("/api/**", "svcA", true),
        config("/api/v2/**", "svcB", true),
    ]);

    let resolved = routes.resolve("/api/v2/items/7").unwrap();
    assert_eq!(resolved.service_id, "SVCB");
    assert_eq!(resolved.forward_path, "/items/7");
    assert_eq!(resolved.matched_prefix, "/api/v2");

    let resolved = routes.resolve("/api/v1/items").unwrap();
    assert_eq!(resolved.service_id, "SVCA");
    assert_eq!(resolved.forward_path, "/v1/items");
}

#[test]
fn test_prefix_kept_when_not_stripped() {
    let routes = RouteSet::from_config(&[config("/legacy/orders/**", "orders", false)]);
    let resolved = routes.resolve("/legacy/orders/42").unwrap();
    assert_eq!(resolved.forward_path, "/legacy/orders/42");
}

#[test]
fn test_stripping_whole_path_forwards_root() {
    let routes = RouteSet::from_config(&[config("/users/**", "users", true)]);
    assert_eq!(routes.resolve("/users").unwrap().forward_path, "/");
}

#[test]
fn test_unmatched_path() {
    let routes = RouteSet::from_config(&[config("/users/**", "users", true)]);
    assert!(routes.resolve("/orders/1").is_none());
    assert!(routes.resolve("/usersx/1").is_none());
}

#[test]
fn test_configured_route_beats_discovered_of_equal_length() {
    let routes = RouteSet::new(
        vec![RouteEntry::new("custom", "/users/**", "accounts", true, RouteOrigin::Configured)],
        vec![
            RouteEntry::discovered("USERS"),
            RouteEntry::discovered("ORDERS"),
        ],
    );

    // Same pattern: the discovered entry is shadowed
    assert_eq!(routes.entries().len(), 2);
    assert_eq!(routes.resolve("/users/1").unwrap().service_id, "ACCOUNTS");
    assert_eq!(routes.resolve("/orders/1").unwrap().service_id, "ORDERS");
    assert_eq!(routes.configured().len(), 1);
}

#[test]
fn test_service_ids_are_normalized() {
    let routes = RouteSet::from_config(&[
        config("/a/**", "orders", true),
        config("/b/**", "Orders", true),
        config("/c/**", "users", true),
    ]);
    let ids: Vec<String> = routes.service_ids().into_iter().collect();
    assert_eq!(ids, vec!["ORDERS", "USERS"]);
}

#[test]
fn test_strategy_parsing() {
    assert_eq!(LoadBalancingStrategy::parse("round_robin"), Some(LoadBalancingStrategy::RoundRobin));
    assert_eq!(
        LoadBalancingStrategy::parse("Least-Connections"),
        Some(LoadBalancingStrategy::LeastConnections)
    );
    assert_eq!(LoadBalancingStrategy::parse("weighted"), Some(LoadBalancingStrategy::WeightedRoundRobin));
    assert_eq!(LoadBalancingStrategy::parse("fastest"), None);
}

#[test]
fn test_load_balancer_without_candidates() {
    let balancer = LoadBalancer::new(LoadBalancingStrategy::Random);
    assert!(balancer.select("ORDERS", &[], &[]).is_none());
    balancer.set_strategy(LoadBalancingStrategy::LeastConnections);
    assert_eq!(balancer.strategy(), LoadBalancingStrategy::LeastConnections);
}
