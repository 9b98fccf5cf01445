//! HTTP surface of the courier simulator.

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
    error::IntakeError,
    intake::{IntakeInput, IntakeService},
};

/// Builds the courier router.
pub fn create_router(intake: Arc<IntakeService>, request_timeout: Duration) -> Router {
    Router::new()
        .route("/request", post(request))
        .route("/health", get(health))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(inject_request_id))
        .with_state(intake)
}

async fn inject_request_id(mut req: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    req.extensions_mut().insert(request_id.clone());

    let mut response = next.run(req).await;
    if let Ok(value) = request_id.parse() {
        response.headers_mut().insert("X-Request-Id", value);
    }
    response
}

#[instrument(name = "http_intake", skip_all)]
async fn request(
    State(intake): State<Arc<IntakeService>>,
    body: Result<Json<IntakeInput>, JsonRejection>,
) -> Response {
    let Json(input) = match body {
        Ok(input) => input,
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "malformed intake body");
            return IntakeError::Malformed(rejection.body_text()).into_response();
        },
    };

    match intake.intake(input).await {
        Ok(_) => (StatusCode::OK, Json(json!({}))).into_response(),
        Err(error) => error.into_response(),
    }
}

async fn health(State(intake): State<Arc<IntakeService>>) -> Response {
    match intake.health_check().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "healthy" }))).into_response(),
        Err(error) => {
            warn!(error = %error, "health check failed");
            let body = json!({ "status": "unhealthy", "error": error.to_string() });
            (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
        },
    }
}
