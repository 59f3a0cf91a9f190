//! Axum route handlers for the chainladder-agent HTTP server.
//!
//! # Routes
//!
//! - `GET /health`: Returns `{"status": "ok", "version": ...}`
//! - `POST /chat`: Route one user message, returns `ChatResponse`
//! - `GET /sessions`: List session keys
//! - `GET /sessions/:key`: Session transcript and context
//! - `DELETE /sessions/:key`: Evict an idle session
//! - `POST /sessions/:key/cancel`: Cancel in-flight requests of a session
//! - `GET /capabilities`: Registered capability descriptors
//! - `GET /datasets`: Selectable sample triangles

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::chat::{ChatError, ChatRequest, ChatResponse, ChatService};
use crate::error::DispatchError;
use crate::session::Session;

type ApiError = (StatusCode, Json<Value>);

/// Shared application state for the HTTP server.
#[derive(Clone)]
pub struct AppState {
    pub chat: Arc<ChatService>,
}

impl AppState {
    pub fn new(chat: ChatService) -> Self {
        Self {
            chat: Arc::new(chat),
        }
    }
}

/// Build the axum router with all routes.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/chat", post(chat_handler))
        .route("/sessions", get(list_sessions_handler))
        .route(
            "/sessions/:key",
            get(get_session_handler).delete(delete_session_handler),
        )
        .route("/sessions/:key/cancel", post(cancel_handler))
        .route("/capabilities", get(capabilities_handler))
        .route("/datasets", get(datasets_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn error_response(status: StatusCode, err: &DispatchError) -> ApiError {
    (
        status,
        Json(json!({
            "error": err.to_string(),
            "kind": err.kind(),
        })),
    )
}

/// GET /health: liveness probe.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": crate::VERSION,
        "service": "chainladder-agent",
    }))
}

/// POST /chat: route one user message through the supervisor.
///
/// Empty messages are rejected with 400 before any session is touched.
/// A cancelled request answers 409; every other outcome is a 200 reply.
async fn chat_handler(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    if request.session_key.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "session_key must not be empty", "kind": "invalid_request"})),
        ));
    }

    match state.chat.handle(request).await {
        Ok(resp) => Ok(Json(resp)),
        Err(ChatError::EmptyMessage) => Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": ChatError::EmptyMessage.to_string(), "kind": "invalid_request"})),
        )),
        Err(ChatError::Dispatch(err)) => {
            let status = match err {
                DispatchError::Cancelled { .. } => StatusCode::CONFLICT,
                DispatchError::NotFound { .. } => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            Err(error_response(status, &err))
        }
    }
}

/// GET /sessions: keys of all live sessions.
async fn list_sessions_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "sessions": state.chat.store().keys() }))
}

/// GET /sessions/:key: transcript and context of one session.
async fn get_session_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Session>, ApiError> {
    state
        .chat
        .store()
        .snapshot(&key)
        .await
        .map(Json)
        .map_err(|e| error_response(StatusCode::NOT_FOUND, &e))
}

/// DELETE /sessions/:key: evict a session; 409 while requests are routing.
async fn delete_session_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<StatusCode, ApiError> {
    match state.chat.evict(&key) {
        Ok(true) => {
            log::info!("Evicted session '{}'", key);
            Ok(StatusCode::NO_CONTENT)
        }
        Ok(false) => Err(error_response(
            StatusCode::NOT_FOUND,
            &DispatchError::NotFound { session_key: key },
        )),
        Err(err) => Err(error_response(StatusCode::CONFLICT, &err)),
    }
}

/// POST /sessions/:key/cancel: cancel in-flight requests.
async fn cancel_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> impl IntoResponse {
    let cancelled = state.chat.cancel(&key);
    Json(json!({ "session_key": key, "cancelled": cancelled }))
}

/// GET /capabilities: descriptors in registration order.
async fn capabilities_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "capabilities": state.chat.registry().descriptors() }))
}

/// GET /datasets: sample triangles and the default selection.
async fn datasets_handler(State(state): State<AppState>) -> impl IntoResponse {
    let catalog = state.chat.catalog();
    Json(json!({
        "datasets": catalog.names(),
        "default": catalog.default_name(),
    }))
}
