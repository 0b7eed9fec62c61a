//! Inbound HTTP API.
//!
//! - `POST /api/chat` — validate, truncate, forward upstream, answer
//!   with a buffered completion or a re-framed event stream
//! - `OPTIONS /api/chat` — 200, empty body
//! - any other method on `/api/chat` — 405
//! - `GET /health` — liveness

use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::header::{self, HeaderName, HeaderValue, CACHE_CONTROL};
use axum::http::{Method, StatusCode};
use axum::response::sse::Sse;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{ErrorBody, RelayError};
use crate::server::streaming::relay_to_sse_stream;
use crate::upstream::client::UpstreamClient;
use crate::upstream::protocol::{ChatMessage, Completion, Role};

/// Application state shared across handlers.
pub struct AppState {
    pub client: UpstreamClient,
    pub config: Arc<Config>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: Arc<Config>) -> anyhow::Result<Self> {
        Ok(Self {
            client: UpstreamClient::new(config.clone())?,
            config,
            start_time: Instant::now(),
        })
    }
}

/// Build the axum router with all routes and layers.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/api/chat",
            post(chat).options(preflight).fallback(method_not_allowed),
        )
        .route("/health", get(health))
        .fallback(unmatched)
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Static CORS policy, attached uniformly to every response.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::OPTIONS,
            Method::PATCH,
            Method::DELETE,
            Method::POST,
            Method::PUT,
        ])
        .allow_headers([
            HeaderName::from_static("x-csrf-token"),
            HeaderName::from_static("x-requested-with"),
            header::ACCEPT,
            HeaderName::from_static("accept-version"),
            header::CONTENT_LENGTH,
            HeaderName::from_static("content-md5"),
            header::CONTENT_TYPE,
            header::DATE,
            HeaderName::from_static("x-api-version"),
        ])
}

// ─── Route Handlers ────────────────────────────────────────────────────────

async fn chat(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response {
    let request_id = Uuid::new_v4();

    let body = match payload {
        Ok(Json(body)) => body,
        Err(rejection) => {
            return error_response(
                &state.config,
                RelayError::InvalidFormat(format!("body is not valid JSON: {rejection}")),
            );
        }
    };

    let messages = match parse_request(&body) {
        Ok(messages) => messages,
        Err(err) => return error_response(&state.config, err),
    };

    info!(
        %request_id,
        messages = messages.len(),
        stream = state.config.relay.stream,
        "chat request"
    );

    if state.config.relay.stream {
        match state.client.stream(&messages).await {
            Ok(events) => {
                let mut response = Sse::new(relay_to_sse_stream(events)).into_response();
                response
                    .headers_mut()
                    .insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
                response
            }
            Err(err) => {
                error!(%request_id, error = %err, "streaming relay failed");
                error_response(&state.config, err)
            }
        }
    } else {
        match state.client.complete(&messages).await {
            Ok(content) => Json(Completion::from_content(content)).into_response(),
            Err(err) => {
                error!(%request_id, error = %err, "buffered relay failed");
                error_response(&state.config, err)
            }
        }
    }
}

async fn preflight() -> StatusCode {
    StatusCode::OK
}

/// Unmatched paths: OPTIONS still gets its 200, everything else 404.
async fn unmatched(method: Method) -> StatusCode {
    if method == Method::OPTIONS {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn method_not_allowed(State(state): State<Arc<AppState>>) -> Response {
    error_response(&state.config, RelayError::MethodNotAllowed)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

// ─── Validation ────────────────────────────────────────────────────────────

/// Validate the inbound body: `messages` must be a non-empty array and
/// every element must carry a known role and a string content.
fn parse_request(body: &Value) -> Result<Vec<ChatMessage>, RelayError> {
    let messages = body
        .get("messages")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            RelayError::InvalidFormat("missing or non-array `messages` field".to_string())
        })?;

    if messages.is_empty() {
        return Err(RelayError::InvalidFormat("`messages` must not be empty".to_string()));
    }

    messages
        .iter()
        .enumerate()
        .map(|(i, raw)| {
            let role = raw
                .get("role")
                .and_then(Value::as_str)
                .ok_or_else(|| RelayError::InvalidFormat(format!("message {i} is missing `role`")))?;
            let role = match role {
                "system" => Role::System,
                "user" => Role::User,
                "assistant" => Role::Assistant,
                other => {
                    return Err(RelayError::InvalidFormat(format!(
                        "message {i} has unknown role {other:?}"
                    )))
                }
            };
            let content = raw
                .get("content")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    RelayError::InvalidFormat(format!("message {i} is missing `content`"))
                })?;
            Ok(ChatMessage::new(role, content))
        })
        .collect()
}

fn error_response(config: &Config, err: RelayError) -> Response {
    let body = ErrorBody::from_error(&err, config.server.debug_errors);
    (err.status(), Json(body)).into_response()
}
