//! HTTP transport.
//!
//! Endpoints:
//! - `POST /webhooks/github` - GitHub webhook deliveries
//! - `POST /webhooks/envelope` - queue-style envelopes (see [`crate::queue`])
//! - `GET /healthz` - liveness

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{warn, Level};

use crate::queue::parse_message;
use crate::router::{Delivery, DeliveryStatus, Processor};
use crate::webhooks::{DELIVERY_HEADER, EVENT_HEADER, SIGNATURE_HEADER};

/// Server state shared across handlers.
pub struct AppState {
    pub processor: Processor,
}

/// Build the HTTP router.
pub fn build_router(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/healthz", get(health_handler))
        .route("/webhooks/github", post(github_webhook_handler))
        .route("/webhooks/envelope", post(envelope_handler))
        .layer(DefaultBodyLimit::disable())
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                        .on_response(DefaultOnResponse::new().level(Level::INFO)),
                )
                .layer(RequestBodyLimitLayer::new(max_body_bytes)),
        )
        .with_state(state)
}

async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "autocherry",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn github_webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .trim()
            .to_string()
    };

    let delivery = Delivery {
        event: header(EVENT_HEADER),
        delivery_id: header(DELIVERY_HEADER),
        signature: header(SIGNATURE_HEADER),
        body: body.to_vec(),
    };
    status_code(state.processor.accept(&delivery).status)
}

async fn envelope_handler(State(state): State<Arc<AppState>>, body: Bytes) -> StatusCode {
    match parse_message(&body) {
        Ok(delivery) => status_code(state.processor.accept(&delivery).status),
        Err(e) => {
            warn!(error = %e, "Rejected queue envelope");
            StatusCode::BAD_REQUEST
        }
    }
}

fn status_code(status: DeliveryStatus) -> StatusCode {
    match status {
        DeliveryStatus::Accepted => StatusCode::ACCEPTED,
        DeliveryStatus::NoContent => StatusCode::NO_CONTENT,
        DeliveryStatus::BadRequest => StatusCode::BAD_REQUEST,
        DeliveryStatus::Unauthorized => StatusCode::UNAUTHORIZED,
    }
}
