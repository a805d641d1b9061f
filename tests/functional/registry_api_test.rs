//! Functional tests for the registry HTTP API

use axum::{
    body::Body,
    http::{header::CONTENT_TYPE, Method, Request, StatusCode},
    Router,
};
use discovery_gateway::api::routes::create_registry_router;
use discovery_gateway::registry::{RegistryService, RegistryStore};
use discovery_gateway::RegistryState;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn create_test_app() -> Router {
    let service = Arc::new(RegistryService::new(Arc::new(RegistryStore::new()), 90));
    create_registry_router(Arc::new(RegistryState { service }))
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            builder = builder.header(CONTENT_TYPE, "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn registration(id: &str) -> Value {
    json!({
        "instance_id": id,
        "host": "10.0.0.12",
        "port": 8081,
        "metadata": { "zone": "a" }
    })
}

#[tokio::test]
async fn test_register_and_fetch() {
    let app = create_test_app();

    let (status, _) = send(&app, Method::POST, "/eureka/apps/orders", Some(registration("o-1"))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(&app, Method::GET, "/eureka/apps/ORDERS", None).await;
    assert_eq!(status, StatusCode::OK);
    let instances = body.as_array().unwrap();
    assert_eq!(instances.len(), 1);
    assert_eq!(instances[0]["instance_id"], "o-1");
    assert_eq!(instances[0]["app_name"], "ORDERS");
    assert_eq!(instances[0]["status"], "UP");
    assert_eq!(instances[0]["lease_duration_secs"], 90);
    assert_eq!(instances[0]["metadata"]["zone"], "a");
}

#[tokio::test]
async fn test_duplicate_registration_overwrites() {
    let app = create_test_app();

    send(&app, Method::POST, "/eureka/apps/orders", Some(registration("o-1"))).await;
    let mut updated = registration("o-1");
    updated["port"] = json!(9091);
    let (status, _) = send(&app, Method::POST, "/eureka/apps/orders", Some(updated)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, body) = send(&app, Method::GET, "/eureka/apps/orders", None).await;
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["port"], 9091);
}

#[tokio::test]
async fn test_invalid_registration_is_rejected() {
    let app = create_test_app();

    let mut invalid = registration("o-1");
    invalid["port"] = json!(0);
    let (status, body) = send(&app, Method::POST, "/eureka/apps/orders", Some(invalid)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["type"], "invalid_request_error");

    let (status, _) = send(&app, Method::POST, "/eureka/apps/orders", Some(json!({ "host": "x" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, Method::POST, "/eureka/apps/orders", Some(registration(" "))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unbounded_lease_is_rejected() {
    let app = create_test_app();

    let mut endless = registration("o-1");
    endless["lease_duration_secs"] = json!(u64::MAX);
    let (status, body) = send(&app, Method::POST, "/eureka/apps/orders", Some(endless)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["message"].as_str().unwrap().contains("lease_duration_secs"));

    let (status, _) = send(&app, Method::GET, "/eureka/apps/orders", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_renew_unknown_instance_is_not_found() {
    let app = create_test_app();

    let (status, _) = send(&app, Method::PUT, "/eureka/apps/orders/o-1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    send(&app, Method::POST, "/eureka/apps/orders", Some(registration("o-1"))).await;
    let (status, _) = send(&app, Method::PUT, "/eureka/apps/orders/o-1", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_cancel_is_idempotent() {
    let app = create_test_app();
    send(&app, Method::POST, "/eureka/apps/orders", Some(registration("o-1"))).await;

    let (status, _) = send(&app, Method::DELETE, "/eureka/apps/orders/o-1", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, Method::DELETE, "/eureka/apps/orders/o-1", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app, Method::GET, "/eureka/apps/orders", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_fetch_unknown_application() {
    let app = create_test_app();
    let (status, body) = send(&app, Method::GET, "/eureka/apps/payments", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"]["message"].as_str().unwrap().contains("PAYMENTS"));
}

#[tokio::test]
async fn test_status_override() {
    let app = create_test_app();
    send(&app, Method::POST, "/eureka/apps/orders", Some(registration("o-1"))).await;

    let (status, _) = send(&app, Method::PUT, "/eureka/apps/orders/o-1/status?value=OUT_OF_SERVICE", None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = send(&app, Method::GET, "/eureka/apps/orders", None).await;
    assert_eq!(body[0]["status"], "OUT_OF_SERVICE");

    let (status, _) = send(&app, Method::PUT, "/eureka/apps/orders/o-1/status?value=SLEEPING", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = send(&app, Method::PUT, "/eureka/apps/orders/o-1/status", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = send(&app, Method::PUT, "/eureka/apps/orders/o-9/status?value=UP", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_fetch_all_and_status() {
    let app = create_test_app();
    send(&app, Method::POST, "/eureka/apps/orders", Some(registration("o-1"))).await;
    send(&app, Method::POST, "/eureka/apps/orders", Some(registration("o-2"))).await;
    send(&app, Method::POST, "/eureka/apps/users", Some(registration("u-1"))).await;

    let (status, body) = send(&app, Method::GET, "/eureka/apps", None).await;
    assert_eq!(status, StatusCode::OK);
    let applications = body["applications"].as_array().unwrap();
    assert_eq!(applications.len(), 2);
    assert_eq!(applications[0]["name"], "ORDERS");
    assert_eq!(applications[0]["instances"].as_array().unwrap().len(), 2);
    assert_eq!(body["self_preservation"], false);

    let (status, body) = send(&app, Method::GET, "/eureka/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["applications"], 2);
    assert_eq!(body["instances"], 3);
    assert_eq!(body["self_preservation"]["active"], false);

    let (status, body) = send(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "UP");
}
