//! HTTP API v1: users, tool configuration and chat sessions.
//!
//! Endpoints:
//!
//! - `POST   /v1/auth/register`         Create a user and issue a bearer token
//! - `GET    /v1/users/me`              The authenticated user
//! - `PUT    /v1/users/me/tool-config`  Replace the user's MCP servers
//! - `POST   /v1/sessions`              Start a session with an opening message
//! - `POST   /v1/sessions/chat`         Send a message to an existing session
//! - `GET    /v1/sessions`              List the caller's sessions
//! - `GET    /v1/sessions/{id}`         One session with its transcript
//! - `DELETE /v1/sessions/{id}`         Delete a session
//! - `GET    /v1/agent/status`          Agent cache diagnostics

use std::sync::Arc;

use axum::{
    Extension, Router,
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::Json,
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use parlor_agent::{AgentExecutor, AgentReply};
use parlor_core::error::StoreError;
use parlor_core::message::{ChatSession, Message, MessageToolCall, Role, SessionId};
use parlor_core::user::{ToolConfiguration, UserId, UserRecord};

use crate::{SharedState, auth_middleware};

/// Maximum number of in-memory sessions before the oldest are evicted.
const MAX_SESSIONS: usize = 1_000;

// ── Router ────────────────────────────────────────────────────────────────

/// Build the v1 API router. Nest this under "/v1" in the main router.
pub fn v1_router(state: SharedState) -> Router {
    let authenticated = Router::new()
        .route("/users/me", get(me_handler))
        .route("/users/me/tool-config", put(update_tool_config_handler))
        .route(
            "/sessions",
            get(list_sessions_handler).post(create_session_handler),
        )
        .route("/sessions/chat", post(chat_handler))
        .route(
            "/sessions/{id}",
            get(get_session_handler).delete(delete_session_handler),
        )
        .route("/agent/status", get(agent_status_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/auth/register", post(register_handler))
        .merge(authenticated)
        .with_state(state)
}

// ── Request / Response types ──────────────────────────────────────────────

#[derive(Deserialize)]
struct RegisterRequest {
    username: String,
}

#[derive(Serialize, Deserialize)]
struct RegisterResponse {
    token: String,
    user: UserDto,
}

/// A user as returned by the API. Credentials never leave the server.
#[derive(Serialize, Deserialize)]
struct UserDto {
    id: UserId,
    username: String,
    /// Configured MCP server names; empty when the default applies.
    tool_servers: Vec<String>,
    uses_default_tools: bool,
    config_version: u64,
    created_at: String,
}

impl From<&UserRecord> for UserDto {
    fn from(user: &UserRecord) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            tool_servers: user
                .tool_config
                .as_ref()
                .map(|config| config.servers().map(|(name, _)| name.clone()).collect())
                .unwrap_or_default(),
            uses_default_tools: user.tool_config.is_none(),
            config_version: user.config_version,
            created_at: user.created_at.to_rfc3339(),
        }
    }
}

#[derive(Deserialize)]
struct CreateSessionRequest {
    initial_message: String,
}

#[derive(Deserialize)]
struct ChatRequest {
    session_id: String,
    content: String,
}

#[derive(Serialize, Deserialize)]
struct ChatResponse {
    session_id: String,
    user_message: MessageDto,
    ai_response: MessageDto,
    tool_names_used: Vec<String>,
    tool_calls: Vec<MessageToolCall>,
}

#[derive(Serialize, Deserialize)]
struct MessageDto {
    id: String,
    role: Role,
    content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<MessageToolCall>,
    timestamp: String,
}

impl From<&Message> for MessageDto {
    fn from(m: &Message) -> Self {
        Self {
            id: m.id.clone(),
            role: m.role,
            content: m.content.clone(),
            tool_calls: m.tool_calls.clone(),
            timestamp: m.timestamp.to_rfc3339(),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct SessionDto {
    id: String,
    user_id: UserId,
    title: String,
    created_at: String,
    updated_at: String,
    messages: Vec<MessageDto>,
}

impl From<&ChatSession> for SessionDto {
    fn from(s: &ChatSession) -> Self {
        Self {
            id: s.id.to_string(),
            user_id: s.user_id,
            title: s.title.clone(),
            created_at: s.created_at.to_rfc3339(),
            updated_at: s.updated_at.to_rfc3339(),
            messages: s.messages.iter().map(MessageDto::from).collect(),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct SessionSummaryDto {
    id: String,
    title: String,
    message_count: usize,
    created_at: String,
    updated_at: String,
}

#[derive(Serialize, Deserialize)]
struct SessionListResponse {
    sessions: Vec<SessionSummaryDto>,
}

#[derive(Serialize, Deserialize)]
struct AgentStatusResponse {
    model_configured: bool,
    cache_len: usize,
    cache_capacity: usize,
    /// Whether the caller currently has a cached agent.
    cached: bool,
    uptime_secs: u64,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn session_not_found() -> ApiError {
    api_error(StatusCode::NOT_FOUND, "Chat session not found")
}

fn store_error(e: StoreError) -> ApiError {
    match e {
        StoreError::UserNotFound(_) => api_error(StatusCode::NOT_FOUND, e.to_string()),
        StoreError::UsernameTaken(_) => api_error(StatusCode::CONFLICT, e.to_string()),
        StoreError::Storage(_) => {
            error!(error = %e, "User store failure");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

fn agent_error(e: parlor_core::Error) -> ApiError {
    error!(error = %e, "Agent turn failed");
    match e {
        parlor_core::Error::Provider(p) => {
            api_error(StatusCode::BAD_GATEWAY, format!("Model provider error: {p}"))
        }
        other => api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Agent error: {other}"),
        ),
    }
}

fn require_text(value: &str, field: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            format!("{field} must not be empty"),
        ));
    }
    Ok(())
}

async fn agent_for(state: &SharedState, user: &UserRecord) -> Result<Arc<AgentExecutor>, ApiError> {
    state
        .agents
        .get_agent_for_user(user)
        .await
        .ok_or_else(|| api_error(StatusCode::SERVICE_UNAVAILABLE, "AI agent is not available"))
}

fn assistant_message(reply: &AgentReply) -> Message {
    let mut message = Message::assistant(&reply.content);
    message.tool_calls = reply.tool_calls.clone();
    message
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn register_handler(
    State(state): State<SharedState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let username = payload.username.trim();
    require_text(username, "username")?;

    let user = state
        .users
        .create(username, None)
        .await
        .map_err(store_error)?;
    let token = state.users.issue_token(user.id).await.map_err(store_error)?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            token,
            user: UserDto::from(&user),
        }),
    ))
}

async fn me_handler(Extension(user): Extension<UserRecord>) -> Json<UserDto> {
    Json(UserDto::from(&user))
}

/// Replace the caller's tool configuration and drop their cached agent so
/// the next turn is served with the new tools.
async fn update_tool_config_handler(
    State(state): State<SharedState>,
    Extension(user): Extension<UserRecord>,
    Json(config): Json<ToolConfiguration>,
) -> Result<Json<UserDto>, ApiError> {
    let updated = state
        .users
        .update_tool_config(user.id, config)
        .await
        .map_err(store_error)?;
    state.agents.invalidate_user_agent(user.id);

    info!(
        user_id = %user.id,
        servers = updated.tool_config.as_ref().map_or(0, |c| c.len()),
        config_version = updated.config_version,
        "Tool configuration updated"
    );
    Ok(Json(UserDto::from(&updated)))
}

async fn create_session_handler(
    State(state): State<SharedState>,
    Extension(user): Extension<UserRecord>,
    Json(payload): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<SessionDto>), ApiError> {
    require_text(&payload.initial_message, "initial_message")?;

    let agent = agent_for(&state, &user).await?;
    let reply = agent
        .respond(&payload.initial_message, &[])
        .await
        .map_err(agent_error)?;

    let mut session = ChatSession::new(user.id, &payload.initial_message);
    session.push(Message::user(&payload.initial_message));
    session.push(assistant_message(&reply));
    let dto = SessionDto::from(&session);

    let mut sessions = state.sessions.write().await;

    // Evict oldest session if at capacity
    if sessions.len() >= MAX_SESSIONS
        && let Some(oldest) = sessions
            .values()
            .min_by_key(|s| s.updated_at)
            .map(|s| s.id.clone())
    {
        sessions.remove(&oldest);
    }
    sessions.insert(session.id.clone(), session);

    info!(user_id = %user.id, session_id = %dto.id, "Session created");
    Ok((StatusCode::CREATED, Json(dto)))
}

async fn chat_handler(
    State(state): State<SharedState>,
    Extension(user): Extension<UserRecord>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    require_text(&payload.content, "content")?;
    let session_id = SessionId(payload.session_id.clone());

    // Copy the transcript out so no lock is held during the model call.
    let history = {
        let sessions = state.sessions.read().await;
        sessions
            .get(&session_id)
            .filter(|s| s.user_id == user.id)
            .ok_or_else(session_not_found)?
            .history()
    };

    let agent = agent_for(&state, &user).await?;
    let reply = agent
        .respond(&payload.content, &history)
        .await
        .map_err(agent_error)?;

    let user_message = Message::user(&payload.content);
    let ai_message = assistant_message(&reply);

    let mut sessions = state.sessions.write().await;
    let session = sessions
        .get_mut(&session_id)
        .filter(|s| s.user_id == user.id)
        .ok_or_else(session_not_found)?;
    session.push(user_message.clone());
    session.push(ai_message.clone());

    Ok(Json(ChatResponse {
        session_id: payload.session_id,
        user_message: MessageDto::from(&user_message),
        ai_response: MessageDto::from(&ai_message),
        tool_names_used: reply.tool_names_used,
        tool_calls: reply.tool_calls,
    }))
}

async fn list_sessions_handler(
    State(state): State<SharedState>,
    Extension(user): Extension<UserRecord>,
) -> Json<SessionListResponse> {
    let sessions = state.sessions.read().await;

    let mut owned: Vec<&ChatSession> = sessions.values().filter(|s| s.user_id == user.id).collect();
    owned.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

    Json(SessionListResponse {
        sessions: owned
            .into_iter()
            .map(|s| SessionSummaryDto {
                id: s.id.to_string(),
                title: s.title.clone(),
                message_count: s.messages.len(),
                created_at: s.created_at.to_rfc3339(),
                updated_at: s.updated_at.to_rfc3339(),
            })
            .collect(),
    })
}

async fn get_session_handler(
    State(state): State<SharedState>,
    Extension(user): Extension<UserRecord>,
    Path(id): Path<String>,
) -> Result<Json<SessionDto>, ApiError> {
    let sessions = state.sessions.read().await;
    sessions
        .get(&SessionId(id))
        .filter(|s| s.user_id == user.id)
        .map(|s| Json(SessionDto::from(s)))
        .ok_or_else(session_not_found)
}

async fn delete_session_handler(
    State(state): State<SharedState>,
    Extension(user): Extension<UserRecord>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = SessionId(id);
    let mut sessions = state.sessions.write().await;

    if !sessions.get(&id).is_some_and(|s| s.user_id == user.id) {
        return Err(session_not_found());
    }
    sessions.remove(&id);
    Ok(StatusCode::NO_CONTENT)
}

async fn agent_status_handler(
    State(state): State<SharedState>,
    Extension(user): Extension<UserRecord>,
) -> Json<AgentStatusResponse> {
    let stats = state.agents.stats();
    let uptime = chrono::Utc::now()
        .signed_duration_since(state.start_time)
        .num_seconds()
        .max(0) as u64;

    Json(AgentStatusResponse {
        model_configured: stats.model_configured,
        cache_len: stats.len,
        cache_capacity: stats.capacity,
        cached: state.agents.is_cached(user.id),
        uptime_secs: uptime,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────
