use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use axum::extract::{Query, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::agent::AgentState;
use crate::interpreter::{HandleResponse, Interpreter};
use crate::runtime::HubRuntime;
use crate::store::ChatTurn;

pub const USER_ID_HEADER: &str = "x-user-id";
const INTERNAL_ERROR_TEXT: &str = "Internal server error";

#[derive(Clone)]
pub struct ServerState {
    pub interpreter: Arc<Interpreter>,
    pub auth: BackendAuthConfig,
}

#[derive(Debug, Clone)]
pub struct BackendAuthConfig {
    mode: AuthMode,
    token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthMode {
    Required,
    Disabled,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    message: String,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct ClearHistoryResponse {
    deleted: usize,
}

pub async fn serve_backend(runtime: HubRuntime) -> Result<()> {
    let bind_addr = runtime
        .config
        .bind_addr
        .parse::<SocketAddr>()
        .with_context(|| {
            format!(
                "Invalid bind address '{}' (expected host:port)",
                runtime.config.bind_addr
            )
        })?;

    let auth = load_auth_config()?;
    let state = Arc::new(ServerState {
        interpreter: runtime.interpreter.clone(),
        auth,
    });

    runtime.spawn_telegram_bot();

    let app = router(state);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind backend server to {}", bind_addr))?;
    tracing::info!("Hub backend listening on http://{}", bind_addr);
    axum::serve(listener, app)
        .await
        .context("Backend server failed")?;
    Ok(())
}

pub fn router(state: Arc<ServerState>) -> Router {
    let protected = Router::new()
        .route("/health", get(health))
        .route("/chat", post(chat))
        .route("/history", get(list_history).delete(clear_history))
        .route("/agent-state", get(get_agent_state))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new().nest("/v1", protected)
}

fn load_auth_config() -> Result<BackendAuthConfig> {
    let mode = parse_auth_mode(std::env::var("HUB_BACKEND_AUTH_MODE").ok())?;
    let token = std::env::var("HUB_BACKEND_TOKEN")
        .ok()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());

    if mode == AuthMode::Required && token.is_none() {
        return Err(anyhow!(
            "HUB_BACKEND_TOKEN is required when HUB_BACKEND_AUTH_MODE=required"
        ));
    }
    if mode == AuthMode::Disabled {
        tracing::warn!("Backend auth is disabled; every caller can act as any user");
    }

    Ok(BackendAuthConfig { mode, token })
}

fn parse_auth_mode(raw: Option<String>) -> Result<AuthMode> {
    let value = raw.unwrap_or_else(|| "required".to_string());
    match value.trim().to_ascii_lowercase().as_str() {
        "required" | "on" | "enabled" | "true" | "" => Ok(AuthMode::Required),
        "disabled" | "off" | "false" => Ok(AuthMode::Disabled),
        other => Err(anyhow!(
            "Invalid HUB_BACKEND_AUTH_MODE '{}' (expected required|disabled)",
            other
        )),
    }
}

async fn auth_middleware(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    authorize(&headers, &state.auth)?;
    Ok(next.run(request).await)
}

fn authorize(headers: &HeaderMap, auth: &BackendAuthConfig) -> Result<(), StatusCode> {
    if auth.mode == AuthMode::Disabled {
        return Ok(());
    }

    let expected = auth.token.as_deref().ok_or(StatusCode::UNAUTHORIZED)?;
    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if provided == format!("Bearer {}", expected) {
        Ok(())
    } else {
        Err(StatusCode::UNAUTHORIZED)
    }
}

fn require_user_id(headers: &HeaderMap) -> Result<String, (StatusCode, String)> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                "missing X-User-Id header".to_string(),
            )
        })
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn chat(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(body): Json<ChatRequest>,
) -> Result<Json<HandleResponse>, (StatusCode, String)> {
    let user_id = require_user_id(&headers)?;
    tracing::debug!("Chat request from {} ({} chars)", user_id, body.message.chars().count());
    Ok(Json(state.interpreter.handle(&user_id, &body.message).await))
}

async fn list_history(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<ChatTurn>>, (StatusCode, String)> {
    let user_id = require_user_id(&headers)?;
    let limit = clamp_limit(query.limit, 50, 1, 500);
    state
        .interpreter
        .memory()
        .history(&user_id, limit)
        .map(Json)
        .map_err(internal_error)
}

async fn clear_history(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
) -> Result<Json<ClearHistoryResponse>, (StatusCode, String)> {
    let user_id = require_user_id(&headers)?;
    let deleted = state
        .interpreter
        .memory()
        .reset(&user_id)
        .map_err(internal_error)?;
    tracing::info!("Cleared {} turns for {}", deleted, user_id);
    Ok(Json(ClearHistoryResponse { deleted }))
}

async fn get_agent_state(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
) -> Result<Json<AgentState>, (StatusCode, String)> {
    let user_id = require_user_id(&headers)?;
    state
        .interpreter
        .agent()
        .load(&user_id)
        .map(Json)
        .map_err(internal_error)
}

fn clamp_limit(value: Option<usize>, default: usize, min: usize, max: usize) -> usize {
    value.unwrap_or(default).clamp(min, max)
}

fn internal_error<E: Into<anyhow::Error>>(error: E) -> (StatusCode, String) {
    let error = error.into();
    tracing::error!("Request failed: {:#}", error);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        INTERNAL_ERROR_TEXT.to_string(),
    )
}
