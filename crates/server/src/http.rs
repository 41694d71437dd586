//! HTTP Endpoints
//!
//! Session CRUD, the WebSocket upgrade route, and operational endpoints,
//! all served from a single `axum::Router`.

use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::{HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Timelike, Utc};
use serde::Serialize;
use tower::limit::ConcurrencyLimitLayer;
use tower::timeout::TimeoutLayer;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::metrics::{init_metrics, record_request};
use crate::session::MessageRole;
use crate::state::AppState;
use crate::websocket::ws_handler;

pub fn create_router(state: AppState) -> Router {
    let (cors_enabled, cors_origins, max_connections, timeout_seconds, ws_path, metrics_enabled) = {
        let config = state.get_config();
        (
            config.server.cors_enabled,
            config.server.cors_origins.clone(),
            config.server.max_connections,
            config.server.timeout_seconds,
            config.server.ws_path.clone(),
            config.observability.metrics_enabled,
        )
    };
    let cors_layer = build_cors_layer(&cors_origins, cors_enabled);

    let mut router = Router::new()
        .route("/api/sessions", post(create_session))
        .route("/api/sessions", get(list_sessions))
        .route("/api/sessions/:id/messages", get(get_session_messages))
        .route("/api/sessions/:id", delete(delete_session))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/admin/reload-config", post(reload_config))
        .route(&ws_path, get(ws_handler));

    if metrics_enabled {
        let metrics_handle = init_metrics();
        router = router.route("/metrics", get(move || metrics_handler(metrics_handle.clone())));
    }

    router
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(Duration::from_secs(timeout_seconds)))
        .layer(ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

fn build_cors_layer(origins: &[String], enabled: bool) -> CorsLayer {
    if !enabled {
        tracing::warn!("CORS is disabled, allowing all origins");
        return CorsLayer::permissive();
    }

    let parsed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    if parsed.is_empty() {
        tracing::info!("no CORS origins configured, defaulting to localhost:3000");
        return CorsLayer::new()
            .allow_origin("http://localhost:3000".parse::<HeaderValue>().unwrap())
            .allow_methods([Method::GET, Method::POST, Method::DELETE])
            .allow_headers(Any);
    }

    CorsLayer::new()
        .allow_origin(parsed)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any)
        .allow_credentials(true)
}

#[derive(Debug, Serialize)]
struct SessionSummary {
    id: String,
    title: Option<String>,
    last_activity: String,
    message_count: usize,
}

fn validate_uuid(id: &str) -> Result<(), StatusCode> {
    uuid::Uuid::parse_str(id).map(|_| ()).map_err(|_| StatusCode::BAD_REQUEST)
}

async fn create_session(State(state): State<AppState>) -> Json<serde_json::Value> {
    let session = state.sessions.create();
    Json(serde_json::json!({ "session_id": session.id }))
}

async fn list_sessions(State(state): State<AppState>) -> Json<serde_json::Value> {
    let now = Utc::now();
    let summaries: Vec<SessionSummary> = state
        .sessions
        .list()
        .into_iter()
        .map(|s| SessionSummary {
            id: s.id.clone(),
            title: s.title(),
            last_activity: relative_timestamp(s.created_at, now),
            message_count: s.message_count(),
        })
        .collect();

    Json(serde_json::json!({ "sessions": summaries }))
}

async fn get_session_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    validate_uuid(&id)?;
    let session = state.sessions.get(&id).ok_or(StatusCode::NOT_FOUND)?;

    let messages: Vec<serde_json::Value> = session
        .messages()
        .into_iter()
        .map(|m| {
            serde_json::json!({
                "role": match m.role { MessageRole::User => "user", MessageRole::Assistant => "assistant" },
                "content": m.content,
                "timestamp": m.timestamp.to_rfc3339(),
            })
        })
        .collect();

    Ok(Json(serde_json::json!({ "messages": messages })))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, StatusCode> {
    validate_uuid(&id)?;
    if state.sessions.delete(&id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

/// Formats a timestamp the way a chat history sidebar would: relative for
/// the last week, an absolute date beyond that.
fn relative_timestamp(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let days = (now.date_naive() - at.date_naive()).num_days();
    let time = format_time(at);

    if days == 0 {
        format!("Today at {time}")
    } else if days == 1 {
        format!("Yesterday at {time}")
    } else if days < 7 {
        format!("{} at {time}", at.format("%A"))
    } else {
        at.format("%b %d, %Y").to_string()
    }
}

fn format_time(at: DateTime<Utc>) -> String {
    let hour24 = at.hour();
    let minute = at.minute();
    let period = if hour24 < 12 { "AM" } else { "PM" };
    let hour12 = match hour24 % 12 {
        0 => 12,
        h => h,
    };
    format!("{hour12}:{minute:02} {period}")
}

async fn health_check(State(_state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}

async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let configured = state.get_config().providers.llm_api_key.is_some();
    let endpoint = state.llm_primary_endpoint.clone();

    let reachable = configured
        && tokio::time::timeout(std::time::Duration::from_secs(2), reqwest::get(&endpoint))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false);

    let status = if reachable { "ready" } else { "not_ready" };
    let status_code = if reachable { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };

    (status_code, Json(serde_json::json!({ "status": status })))
}

async fn metrics_handler(handle: metrics_exporter_prometheus::PrometheusHandle) -> impl IntoResponse {
    record_request("/metrics", 200);
    handle.render()
}

async fn reload_config(State(state): State<AppState>) -> impl IntoResponse {
    match state.reload_config() {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({ "status": "success", "message": "configuration reloaded" })),
        ),
        Err(e) => {
            tracing::error!("config reload failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "status": "error", "message": e.to_string() })),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voice_agent_config::Settings;

    #[test]
    fn test_router_creation() {
        let state = AppState::new(Settings::default());
        let _ = create_router(state);
    }

    #[test]
    fn relative_timestamp_today() {
        let now = Utc::now();
        assert!(relative_timestamp(now, now).starts_with("Today at"));
    }

    #[test]
    fn relative_timestamp_old_date_is_absolute() {
        let now = Utc::now();
        let old = now - chrono::Duration::days(30);
        let formatted = relative_timestamp(old, now);
        assert!(!formatted.starts_with("Today") && !formatted.starts_with("Yesterday"));
    }
}
