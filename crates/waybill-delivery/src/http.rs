//! HTTP surface of the delivery service.
//!
//! Requests flow through request-id injection, tracing and a timeout before
//! reaching a handler. Every response body is JSON: `{}` on success and
//! `{"error": "<message>"}` on failure.

use std::{sync::Arc, time::Duration};

use axum::{
    extract::{rejection::JsonRejection, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::{
    service::DeliveryService,
    validation::{RequestInput, WebhookInput},
};

/// Builds the delivery router.
pub fn create_router(service: Arc<DeliveryService>, request_timeout: Duration) -> Router {
    Router::new()
        .route("/request", post(request))
        .route("/webhook", post(webhook))
        .route("/health", get(health))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(inject_request_id))
        .with_state(service)
}

/// Adds an `X-Request-Id` header to every response.
pub(crate) async fn inject_request_id(mut req: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    req.extensions_mut().insert(request_id.clone());

    let mut response = next.run(req).await;
    if let Ok(value) = request_id.parse() {
        response.headers_mut().insert("X-Request-Id", value);
    }
    response
}

fn ok() -> Response {
    (StatusCode::OK, Json(json!({}))).into_response()
}

fn bad_body(rejection: &JsonRejection) -> Response {
    warn!(error = %rejection.body_text(), "malformed request body");
    (StatusCode::BAD_REQUEST, Json(json!({ "error": rejection.body_text() }))).into_response()
}

#[instrument(name = "http_request", skip_all)]
async fn request(
    State(service): State<Arc<DeliveryService>>,
    body: Result<Json<RequestInput>, JsonRejection>,
) -> Response {
    let Json(input) = match body {
        Ok(input) => input,
        Err(rejection) => return bad_body(&rejection),
    };

    match service.request(input).await {
        Ok(_) => ok(),
        Err(error) => error.into_response(),
    }
}

#[instrument(name = "http_webhook", skip_all)]
async fn webhook(
    State(service): State<Arc<DeliveryService>>,
    body: Result<Json<WebhookInput>, JsonRejection>,
) -> Response {
    let Json(input) = match body {
        Ok(input) => input,
        Err(rejection) => return bad_body(&rejection),
    };

    match service.webhook(input).await {
        Ok(()) => ok(),
        Err(error) => error.into_response(),
    }
}

async fn health(State(service): State<Arc<DeliveryService>>) -> Response {
    match service.health_check().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "healthy" }))).into_response(),
        Err(error) => {
            warn!(error = %error, "health check failed");
            let body = json!({ "status": "unhealthy", "error": error.to_string() });
            (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
        },
    }
}
