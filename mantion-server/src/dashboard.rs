// HTTP routes for the monitoring dashboard

use crate::websocket::websocket_handler;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use mantion_eye::MonitorHub;
use mantion_storage::EventStore;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

const DEFAULT_EVENT_LIMIT: usize = 50;
const MAX_EVENT_LIMIT: usize = 1000;

#[derive(Clone)]
pub struct DashboardState {
    pub hub: MonitorHub,
    /// Absent when the dashboard runs without persistence
    pub store: Option<EventStore>,
}

impl DashboardState {
    pub fn new(hub: MonitorHub, store: Option<EventStore>) -> Self {
        Self { hub, store }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub limit: Option<usize>,
}

/// Create the dashboard router
pub fn create_router(state: DashboardState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/stats", get(stats_handler))
        .route("/api/cameras", get(cameras_handler))
        .route("/api/events", get(events_handler))
        .route("/ws", get(websocket_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn stats_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    Json(state.hub.stats())
}

async fn cameras_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    Json(state.hub.cameras())
}

/// Recent detection events, newest first
async fn events_handler(
    State(state): State<DashboardState>,
    Query(query): Query<EventsQuery>,
) -> Response {
    let Some(store) = state.store else {
        return error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "NO_STORE",
            "Event store is not configured",
        );
    };
    let limit = query.limit.unwrap_or(DEFAULT_EVENT_LIMIT).min(MAX_EVENT_LIMIT);

    // rusqlite is blocking
    match tokio::task::spawn_blocking(move || store.recent(limit)).await {
        Ok(Ok(events)) => Json(events).into_response(),
        Ok(Err(e)) => {
            error!("Persistence fault: failed to read events: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR", &e.to_string())
        }
        Err(e) => {
            error!("Event query task failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", "Event query failed")
        }
    }
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    let body = Json(ErrorResponse {
        error: message.to_string(),
        code: code.to_string(),
    });
    (status, body).into_response()
}
