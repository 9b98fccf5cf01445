//! HTTP surface tests for the delivery service.
//!
//! Drive the router with `oneshot` over in-memory collaborators and check
//! status codes, response bodies and the resulting store state.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{TimeDelta, TimeZone, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;
use waybill_core::{NotificationStatus, ShipmentId, ShipmentStatus};
use waybill_delivery::{
    collaborators::mock::{RecordingCoreNotifier, RecordingThirdPartyLogistics},
    storage::mock::MockShipmentStore,
    Config, DeliveryApp, Dependencies,
};
use waybill_testing::{request_body, TestClock};

struct Harness {
    app: DeliveryApp,
    store: MockShipmentStore,
    courier: RecordingThirdPartyLogistics,
    core: RecordingCoreNotifier,
    clock: TestClock,
}

impl Harness {
    fn new() -> Self {
        let store = MockShipmentStore::new();
        let courier = RecordingThirdPartyLogistics::new();
        let core = RecordingCoreNotifier::new();
        let clock = TestClock::at(Utc.with_ymd_and_hms(2026, 5, 4, 10, 0, 0).unwrap());
        let app = DeliveryApp::new(
            Config::default(),
            Dependencies {
                store: Arc::new(store.clone()),
                courier: Arc::new(courier.clone()),
                core: Arc::new(core.clone()),
                clock: Arc::new(clock.clone()),
            },
        );
        Self { app, store, courier, core, clock }
    }

    fn router(&self) -> Router {
        self.app.router()
    }

    fn now(&self) -> chrono::DateTime<Utc> {
        waybill_core::Clock::now_utc(&self.clock)
    }
}

async fn post(router: Router, path: &str, body: String) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    assert!(response.headers().contains_key("x-request-id"));

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn valid_request_returns_empty_object() {
    let h = Harness::new();
    let body = request_body("s-1", h.now() + TimeDelta::hours(3));

    let (status, json) = post(h.router(), "/request", body.to_string()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!({}));
    assert_eq!(h.store.status_of(&"s-1".into()).await, Some(ShipmentStatus::Queued));
}

#[tokio::test]
async fn request_with_started_window_dispatches_immediately() {
    let h = Harness::new();
    let body = request_body("s-1", h.now() - TimeDelta::hours(1));

    let (status, _) = post(h.router(), "/request", body.to_string()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.store.status_of(&"s-1".into()).await, Some(ShipmentStatus::Requested));
    assert_eq!(h.courier.requests().await, vec![ShipmentId::new("s-1")]);
}

#[tokio::test]
async fn out_of_range_latitude_is_a_bad_request() {
    let h = Harness::new();
    let mut body = request_body("s-1", h.now() + TimeDelta::hours(3));
    body["routing_info"]["origin"] = json!({"lat": 91, "long": 0});

    let (status, json) = post(h.router(), "/request", body.to_string()).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "routing_info.origin.lat must be between -90 and 90");
    assert_eq!(h.store.len().await, 0);
}

#[tokio::test]
async fn malformed_json_is_a_bad_request() {
    let h = Harness::new();

    let (status, json) = post(h.router(), "/request", "{not json".to_string()).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].is_string());
}

#[tokio::test]
async fn duplicate_shipment_is_an_internal_error() {
    let h = Harness::new();
    let body = request_body("s-1", h.now() + TimeDelta::hours(3)).to_string();

    post(h.router(), "/request", body.clone()).await;
    let (status, json) = post(h.router(), "/request", body).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(json["error"].as_str().unwrap().contains("already exists"));
}

#[tokio::test]
async fn failed_3pl_call_on_creation_is_an_internal_error() {
    let h = Harness::new();
    h.courier.fail_for("s-1").await;
    let body = request_body("s-1", h.now() - TimeDelta::hours(1));

    let (status, _) = post(h.router(), "/request", body.to_string()).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn webhook_requires_status() {
    let h = Harness::new();

    let (status, json) =
        post(h.router(), "/webhook", json!({"shipment_uid": "s-1"}).to_string()).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "status is required");
}

#[tokio::test]
async fn webhook_forwards_status_to_core() {
    let h = Harness::new();

    let (status, json) = post(
        h.router(),
        "/webhook",
        json!({"shipment_uid": "s-1", "status": "searching"}).to_string(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!({}));
    let forwarded = h.core.notifications().await;
    assert_eq!(forwarded.len(), 1);
    assert_eq!(forwarded[0].status, NotificationStatus::Searching);
}

#[tokio::test]
async fn not_found_at_ten_redispatches_and_at_23_does_not() {
    let h = Harness::new();
    let body = request_body("s-1", h.now() + TimeDelta::hours(3));
    post(h.router(), "/request", body.to_string()).await;
    let not_found = json!({"shipment_uid": "s-1", "status": "not_found"}).to_string();

    let (status, _) = post(h.router(), "/webhook", not_found.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.courier.requests().await.len(), 1);

    h.clock.jump_to(Utc.with_ymd_and_hms(2026, 5, 4, 23, 15, 0).unwrap());
    let (status, _) = post(h.router(), "/webhook", not_found).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.courier.requests().await.len(), 1);
    assert_eq!(h.core.notifications().await.len(), 2);
}

#[tokio::test]
async fn shipped_webhook_completes_the_shipment() {
    let h = Harness::new();
    let body = request_body("s-1", h.now() - TimeDelta::hours(1));
    post(h.router(), "/request", body.to_string()).await;

    let (status, _) = post(
        h.router(),
        "/webhook",
        json!({"shipment_uid": "s-1", "status": "shipped"}).to_string(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.store.status_of(&"s-1".into()).await, Some(ShipmentStatus::Shipped));
}

#[tokio::test]
async fn health_reflects_store_state() {
    let h = Harness::new();
    let get = || Request::builder().uri("/health").body(Body::empty()).unwrap();

    let response = h.router().oneshot(get()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    h.store.inject_error("connection refused").await;
    let response = h.router().oneshot(get()).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn queued_shipment_reaches_requested_through_workers() {
    let h = Harness::new();
    let body = request_body("s-1", h.now() + TimeDelta::minutes(30));
    post(h.router(), "/request", body.to_string()).await;

    let pending = h.app.pending_worker().run_cycle().await.unwrap();
    let dispatched = h.app.dispatch_worker().run_cycle().await.unwrap();

    assert_eq!((pending, dispatched), (1, 1));
    assert_eq!(h.store.status_of(&"s-1".into()).await, Some(ShipmentStatus::Requested));
    assert_eq!(h.core.notifications().await[0].status, NotificationStatus::Requested);
}
