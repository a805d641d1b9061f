//! Functional tests for the gateway proxy pipeline against wiremock upstreams

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    response::Response,
    Router,
};
use discovery_gateway::api::routes::create_gateway_router;
use discovery_gateway::config::{AuthConfig, GatewayConfig, RouteConfig};
use discovery_gateway::discovery::LocalRegistrySource;
use discovery_gateway::gateway::filters::{default_chain, ApiKeyFilter};
use discovery_gateway::gateway::{
    GatewayMetrics, HttpForwarder, LoadBalancer, PipelineConfig, ProxyPipeline, RouteTable, RouteTableConfig,
};
use discovery_gateway::registry::{RegisterRequest, RegistryService, RegistryStore};
use discovery_gateway::GatewayState;
use serde_json::Value;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct TestGateway {
    router: Router,
    registry: Arc<RegistryService>,
    route_table: Arc<RouteTable>,
}

impl TestGateway {
    fn new(config: GatewayConfig) -> Self {
        let registry = Arc::new(RegistryService::new(Arc::new(RegistryStore::new()), 90));
        let load_balancer = Arc::new(LoadBalancer::default());
        let metrics = Arc::new(GatewayMetrics::new());
        let route_table = Arc::new(
            RouteTable::new(
                Arc::new(LocalRegistrySource::new(registry.clone())),
                &config.routes,
                RouteTableConfig::from_settings(&config),
            )
            .with_listener(load_balancer.clone())
            .with_listener(metrics.clone()),
        );
        let forwarder = Arc::new(
            HttpForwarder::new(
                Duration::from_millis(config.connect_timeout_ms),
                Duration::from_millis(config.forward_timeout_ms),
            )
            .unwrap(),
        );
        let pipeline = Arc::new(ProxyPipeline::new(
            route_table.clone(),
            load_balancer.clone(),
            forwarder,
            default_chain(&config),
            metrics.clone(),
            PipelineConfig::from_settings(&config),
        ));

        let router = create_gateway_router(Arc::new(GatewayState {
            route_table: route_table.clone(),
            pipeline,
            metrics,
            load_balancer,
            config_path: PathBuf::from("config/default.toml"),
            admin_auth: ApiKeyFilter::from_config(&config.auth).map(Arc::new),
        }));

        Self {
            router,
            registry,
            route_table,
        }
    }

    fn register(&self, app: &str, id: &str, addr: SocketAddr) {
        self.registry
            .register(
                app,
                RegisterRequest {
                    instance_id: id.to_string(),
                    host: addr.ip().to_string(),
                    port: addr.port(),
                    ..Default::default()
                },
            )
            .unwrap();
    }

    async fn refresh(&self) {
        self.route_table.refresh().await.unwrap();
    }

    async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    async fn get(&self, uri: &str) -> Response {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap()).await
    }
}

fn config() -> GatewayConfig {
    GatewayConfig {
        routes: vec![
            RouteConfig {
                id: None,
                path: "/users/**".to_string(),
                service_id: "users".to_string(),
                strip_prefix: true,
            },
            RouteConfig {
                id: None,
                path: "/orders/**".to_string(),
                service_id: "orders".to_string(),
                strip_prefix: true,
            },
        ],
        auto_routes: false,
        forward_timeout_ms: 300,
        ..GatewayConfig::default()
    }
}

async fn body_text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Address that refuses connections
async fn closed_port() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

#[tokio::test]
async fn test_routes_to_live_instance_and_rejects_empty_service() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/profile/1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("alice"))
        .expect(1)
        .mount(&upstream)
        .await;

    let gateway = TestGateway::new(config());
    gateway.register("users", "u-1", *upstream.address());
    gateway.refresh().await;

    let response = gateway.get("/users/profile/1").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(body_text(response).await, "alice");

    let response = gateway.get("/orders/9").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "no_live_instance");
}

#[tokio::test]
async fn test_unknown_path_is_not_found() {
    let gateway = TestGateway::new(config());
    gateway.refresh().await;

    let response = gateway.get("/payments/1").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"]["code"], "route_not_found");
}

#[tokio::test]
async fn test_timeout_is_retried_once_on_another_instance() {
    let slow = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .expect(1)
        .mount(&slow)
        .await;
    let fast = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("fast"))
        .expect(1)
        .mount(&fast)
        .await;

    let gateway = TestGateway::new(config());
    // Round robin starts with the lowest instance id
    gateway.register("orders", "o-1", *slow.address());
    gateway.register("orders", "o-2", *fast.address());
    gateway.refresh().await;

    let response = gateway.get("/orders/42").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "fast");
}

#[tokio::test]
async fn test_retries_exhausted_returns_timeout() {
    let first = MockServer::start().await;
    let second = MockServer::start().await;
    for server in [&first, &second] {
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .expect(1)
            .mount(server)
            .await;
    }

    let gateway = TestGateway::new(config());
    gateway.register("orders", "o-1", *first.address());
    gateway.register("orders", "o-2", *second.address());
    gateway.refresh().await;

    let response = gateway.get("/orders/42").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "upstream_timeout");
    assert!(!body["error"]["message"].as_str().unwrap().contains("127.0.0.1"));
}

#[tokio::test]
async fn test_refused_connection_is_retried() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(200).set_body_string("items"))
        .expect(1)
        .mount(&upstream)
        .await;

    let gateway = TestGateway::new(config());
    gateway.register("orders", "o-1", closed_port().await);
    gateway.register("orders", "o-2", *upstream.address());
    gateway.refresh().await;

    let response = gateway.get("/orders/items").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "items");
}

#[tokio::test]
async fn test_post_is_not_retried() {
    let slow = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201).set_delay(Duration::from_secs(5)))
        .expect(1)
        .mount(&slow)
        .await;
    let fast = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&fast)
        .await;

    let gateway = TestGateway::new(config());
    gateway.register("orders", "o-1", *slow.address());
    gateway.register("orders", "o-2", *fast.address());
    gateway.refresh().await;

    let response = gateway
        .send(
            Request::builder()
                .method(Method::POST)
                .uri("/orders")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_upstream_error_status_is_returned_verbatim() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(1)
        .mount(&upstream)
        .await;
    let other = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&other)
        .await;

    let gateway = TestGateway::new(config());
    gateway.register("orders", "o-1", *upstream.address());
    gateway.register("orders", "o-2", *other.address());
    gateway.refresh().await;

    let response = gateway.get("/orders/1").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_text(response).await, "boom");
}

#[tokio::test]
async fn test_sensitive_headers_are_not_forwarded() {
    let upstream = MockServer::start().await;
    Mock::given(header_exists("cookie"))
        .respond_with(ResponseTemplate::new(400))
        .expect(0)
        .mount(&upstream)
        .await;
    Mock::given(header_exists("authorization"))
        .respond_with(ResponseTemplate::new(400))
        .expect(0)
        .mount(&upstream)
        .await;
    Mock::given(method("GET"))
        .and(path("/me"))
        .and(header_exists("x-forwarded-host"))
        .and(header_exists("x-request-id"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-powered-by", "upstream-framework")
                .insert_header("x-custom", "kept")
                .set_body_string("me"),
        )
        .expect(1)
        .mount(&upstream)
        .await;

    let gateway = TestGateway::new(config());
    gateway.register("users", "u-1", *upstream.address());
    gateway.refresh().await;

    let response = gateway
        .send(
            Request::builder()
                .uri("/users/me")
                .header(header::HOST, "gateway.test")
                .header(header::COOKIE, "session=abc")
                .header(header::AUTHORIZATION, "Bearer secret")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get("x-powered-by").is_none());
    assert_eq!(response.headers().get("x-custom").unwrap(), "kept");
}

#[tokio::test]
async fn test_api_key_required_when_enabled() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&upstream)
        .await;

    let gateway = TestGateway::new(GatewayConfig {
        auth: AuthConfig {
            enabled: true,
            api_keys: vec!["valid-key".to_string()],
        },
        ..config()
    });
    gateway.register("users", "u-1", *upstream.address());
    gateway.refresh().await;

    let response = gateway.get("/users/1").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = gateway
        .send(
            Request::builder()
                .uri("/users/1")
                .header(header::AUTHORIZATION, "Bearer wrong-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = gateway
        .send(
            Request::builder()
                .uri("/users/1")
                .header(header::AUTHORIZATION, "Bearer valid-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_out_of_service_instance_receives_no_traffic() {
    let drained = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&drained)
        .await;
    let serving = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(3)
        .mount(&serving)
        .await;

    let gateway = TestGateway::new(config());
    gateway.register("users", "u-1", *drained.address());
    gateway.register("users", "u-2", *serving.address());
    gateway.registry.update_status("users", "u-1", "OUT_OF_SERVICE").unwrap();
    gateway.refresh().await;

    for _ in 0..3 {
        assert_eq!(gateway.get("/users/1").await.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let gateway = TestGateway::new(GatewayConfig {
        max_body_bytes: 8,
        ..config()
    });
    gateway.refresh().await;

    let response = gateway
        .send(
            Request::builder()
                .method(Method::PUT)
                .uri("/users/1")
                .header(header::CONTENT_LENGTH, "32")
                .body(Body::from(vec![b'x'; 32]))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_admin_endpoints() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&upstream)
        .await;

    let gateway = TestGateway::new(config());
    gateway.register("users", "u-1", *upstream.address());
    gateway.refresh().await;
    gateway.get("/users/1").await;
    gateway.get("/nowhere").await;

    let response = gateway.get("/actuator/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "UP");

    let body = body_json(gateway.get("/actuator/routes").await).await;
    let paths: Vec<&str> = body["routes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["path"].as_str().unwrap())
        .collect();
    assert_eq!(paths, vec!["/orders/**", "/users/**"]);

    let body = body_json(gateway.get("/actuator/metrics").await).await;
    assert_eq!(body["metrics"]["requests"], 2);
    assert_eq!(body["metrics"]["failed_requests"], 1);
    assert_eq!(body["metrics"]["instances"]["USERS/u-1"]["requests"], 1);
    assert_eq!(body["load_balancing"], "round_robin");
}

#[tokio::test]
async fn test_admin_endpoints_require_api_key_when_enabled() {
    let gateway = TestGateway::new(GatewayConfig {
        auth: AuthConfig {
            enabled: true,
            api_keys: vec!["ops-key".to_string()],
        },
        ..config()
    });
    gateway.refresh().await;

    assert_eq!(gateway.get("/actuator/metrics").await.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(gateway.get("/actuator/routes").await.status(), StatusCode::UNAUTHORIZED);

    let response = gateway
        .send(
            Request::builder()
                .method(Method::POST)
                .uri("/actuator/routes")
                .header(header::AUTHORIZATION, "Bearer wrong-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = gateway
        .send(
            Request::builder()
                .uri("/actuator/metrics")
                .header("x-api-key", "ops-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    // Probes stay open
    assert_eq!(gateway.get("/actuator/health").await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_departed_instance_leaves_metrics() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&upstream)
        .await;

    let gateway = TestGateway::new(config());
    gateway.register("users", "u-1", *upstream.address());
    gateway.register("users", "u-2", *upstream.address());
    gateway.refresh().await;
    gateway.get("/users/1").await;
    gateway.get("/users/2").await;

    let body = body_json(gateway.get("/actuator/metrics").await).await;
    assert_eq!(body["metrics"]["instances"].as_object().unwrap().len(), 2);

    gateway.registry.cancel("users", "u-1").unwrap();
    gateway.refresh().await;

    let body = body_json(gateway.get("/actuator/metrics").await).await;
    let instances = body["metrics"]["instances"].as_object().unwrap();
    assert_eq!(instances.len(), 1);
    assert!(instances.contains_key("USERS/u-2"));
    assert_eq!(body["metrics"]["requests"], 2);
}
