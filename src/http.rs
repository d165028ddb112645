//! Synchronous Ingress (C6): the HTTP front door.
//!
//! `POST /run-code` and `GET /health` mirror the FastAPI surface the
//! original runner exposed (`/run-code`, `/health`, `/dashboard/*`); the
//! shared-state handler shape (`State<Arc<T>>`, JSON request/response,
//! `(StatusCode, Json<Value>)` error mapping) follows
//! `examples/other_examples/..sos__src-lib-http.rs.rs`'s `SoSState`
//! pattern. The websocket push endpoint forwards [`crate::observer::PoolEvent`]s
//! verbatim to any subscriber.

use std::sync::Arc;

use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use axum::routing::get;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::config::Config;
use crate::execution::{self, ExecutionOutcome};
use crate::observer::{ObservationBus, PoolEvent};
use crate::pool::PoolAllocator;
use crate::screener::static_check;

const DASHBOARD_HTML: &str = include_str!("../assets/dashboard.html");

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<PoolAllocator>,
    pub bus: Arc<ObservationBus>,
    pub config: Arc<Config>,
}

#[derive(Debug, Deserialize)]
struct RunCodeRequest {
    code: String,
    #[serde(default = "default_user")]
    user_id: String,
    timeout: Option<u64>,
}

fn default_user() -> String {
    "anonymous".to_string()
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    limit: usize,
}

fn default_history_limit() -> usize {
    50
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/run-code", axum::routing::post(run_code))
        .route("/health", get(health))
        .route("/dashboard/stats", get(dashboard_stats))
        .route("/dashboard/history", get(dashboard_history))
        .route("/dashboard", get(dashboard_page))
        .route("/ws/dashboard", get(dashboard_ws))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn run_code(State(state): State<AppState>, Json(body): Json<RunCodeRequest>) -> Response {
    if state.config.static_check {
        let violations = static_check(&body.code);
        if !violations.is_empty() {
            return (
                StatusCode::FORBIDDEN,
                Json(json!({ "error": "forbidden constructs found", "details": violations })),
            )
                .into_response();
        }
    }

    let outcome = execution::execute(&state.pool, &state.bus, &state.config, body.code, body.timeout, body.user_id).await;

    let status = StatusCode::from_u16(outcome.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = match outcome {
        ExecutionOutcome::Success { stdout, stderr, return_code } => {
            json!({ "stdout": stdout, "stderr": stderr, "return_code": return_code })
        }
        ExecutionOutcome::Error { error, .. } => json!({ "error": error }),
    };

    (status, Json(body)).into_response()
}

async fn health(State(state): State<AppState>) -> Response {
    let health = state.pool.health().await;
    let (code, status) = if health.total == 0 {
        (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
    } else {
        (StatusCode::OK, "ok")
    };
    (code, Json(json!({ "status": status, "pool": health }))).into_response()
}

async fn dashboard_stats(State(state): State<AppState>) -> Json<Value> {
    let stats = state.pool.stats().await;
    Json(json!({
        "total_executions": stats.total_executions,
        "success_count": stats.success_count,
        "avg_exec_time_ms": stats.avg_exec_time_ms(),
        "avg_lines": stats.avg_lines(),
        "success_rate": stats.success_rate(),
    }))
}

async fn dashboard_history(State(state): State<AppState>, Query(query): Query<HistoryQuery>) -> Json<Value> {
    let history = state.pool.history(query.limit).await;
    Json(json!(history))
}

async fn dashboard_page() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

async fn dashboard_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_dashboard_socket(socket, state))
}

async fn handle_dashboard_socket(mut socket: WebSocket, state: AppState) {
    let mut events = state.bus.subscribe();

    let initial = [
        PoolEvent::PoolStatus { workers: state.pool.statuses().await },
        PoolEvent::stats(&state.pool.stats().await),
        PoolEvent::History { entries: state.pool.history(50).await },
    ];
    for event in &initial {
        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "failed to serialize dashboard snapshot event");
                continue;
            }
        };
        if socket.send(Message::Text(payload)).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                let event = match event {
                    Ok(event) => event,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "dashboard websocket lagged behind event stream");
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };

                let payload = match serde_json::to_string(&event) {
                    Ok(payload) => payload,
                    Err(err) => {
                        warn!(error = %err, "failed to serialize dashboard event");
                        continue;
                    }
                };

                if socket.send(Message::Text(payload)).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
}
