//! HTTP API gateway for Parlor.
//!
//! Exposes a health check, user registration, per-user tool configuration,
//! and chat sessions answered by the caller's cached agent executor.
//!
//! Built on Axum.

pub mod api;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::{
    Router,
    extract::State,
    http::{HeaderValue, Method, StatusCode, header},
    middleware::Next,
    response::Json,
    routing::get,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{RwLock, broadcast};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{debug, info, warn};

use parlor_agent::{AgentManager, DefaultAgentFactory};
use parlor_config::AppConfig;
use parlor_core::error::ToolError;
use parlor_core::event::{DomainEvent, EventBus};
use parlor_core::message::{ChatSession, SessionId};
use parlor_core::user::{InMemoryUserStore, UserStore};
use parlor_tools::{
    CredentialPolicy, InMemoryVectorIndex, JsonSourceRegistry, McpToolSource, ToolProvisioner,
};

/// Shared application state for the gateway.
pub struct GatewayState {
    pub users: Arc<dyn UserStore>,
    pub agents: Arc<AgentManager>,
    /// Chat transcripts, held in memory only.
    pub sessions: RwLock<HashMap<SessionId, ChatSession>>,
    pub start_time: DateTime<Utc>,
}

impl GatewayState {
    pub fn new(users: Arc<dyn UserStore>, agents: Arc<AgentManager>) -> Self {
        Self {
            users,
            agents,
            sessions: RwLock::new(HashMap::new()),
            start_time: Utc::now(),
        }
    }
}

pub type SharedState = Arc<GatewayState>;

/// Build the tool provisioner described by `config`.
///
/// Loads the retrieval corpus from `agent.documents_dir`; a missing
/// directory yields an empty index.
pub async fn build_provisioner(config: &AppConfig) -> Result<Arc<ToolProvisioner>, ToolError> {
    let index = InMemoryVectorIndex::load_dir(&config.agent.documents_dir).await?;

    Ok(Arc::new(ToolProvisioner::new(
        CredentialPolicy::from_config(&config.agent),
        Arc::new(McpToolSource::new(Duration::from_secs(
            config.agent.mcp_timeout_secs,
        ))),
        Arc::new(JsonSourceRegistry::new(&config.agent.sources_path)),
        Arc::new(index),
    )))
}

/// Build the agent manager and install the shared model when one is configured.
///
/// A missing model is not fatal: the gateway starts and chat requests answer
/// 503 until the process is restarted with a usable provider.
pub async fn build_agent_manager(
    config: &AppConfig,
    event_bus: Arc<EventBus>,
) -> Result<AgentManager, ToolError> {
    let provisioner = build_provisioner(config).await?;
    let factory = DefaultAgentFactory::from_config(&config.agent).with_event_bus(event_bus.clone());

    let manager = AgentManager::new(
        config.agent.cache_size,
        config.agent.default_tool_config.clone(),
        provisioner,
        Arc::new(factory),
    )
    .with_event_bus(event_bus);

    match parlor_providers::build_model(config) {
        Ok(model) => {
            manager.set_model(model);
        }
        Err(e) => warn!(error = %e, "No language model available, chat is disabled"),
    }

    Ok(manager)
}

/// Build the Axum router with all gateway routes.
///
/// Layers applied:
/// - Bearer token authentication on every /v1 route except registration
/// - CORS limited to the configured origins
/// - Request body size limit (1 MB)
/// - HTTP trace logging
pub fn build_router(state: SharedState, cors_origins: &[String]) -> Router {
    let v1 = api::v1_router(state.clone());

    let mut router = Router::new()
        .route("/health", get(health_handler))
        .with_state(state)
        .nest("/v1", v1)
        .layer(DefaultBodyLimit::max(1024 * 1024));

    if let Some(cors) = cors_layer(cors_origins) {
        router = router.layer(cors);
    }

    router.layer(tower_http::trace::TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    if origins.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
            .max_age(Duration::from_secs(3600)),
    )
}

/// Start the gateway HTTP server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let event_bus = Arc::new(EventBus::default());
    let agents = Arc::new(build_agent_manager(&config, event_bus.clone()).await?);
    let users: Arc<dyn UserStore> = Arc::new(InMemoryUserStore::new());
    let state = Arc::new(GatewayState::new(users, agents));
    tokio::spawn(log_events(event_bus.subscribe()));

    let app = build_router(state, &config.gateway.cors_origins);

    info!(addr = %addr, cache_size = config.agent.cache_size, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Trace agent lifecycle events until the bus closes.
async fn log_events(mut events: broadcast::Receiver<Arc<DomainEvent>>) {
    loop {
        match events.recv().await {
            Ok(event) => match event.as_ref() {
                DomainEvent::AgentBuilt {
                    user_id,
                    tool_count,
                    config_version,
                    ..
                } => debug!(user_id = %user_id, tool_count, config_version, "event: agent built"),
                DomainEvent::AgentEvicted { user_id, .. } => {
                    debug!(user_id = %user_id, "event: agent evicted")
                }
                DomainEvent::AgentInvalidated { user_id, .. } => {
                    debug!(user_id = %user_id, "event: agent invalidated")
                }
                DomainEvent::ResponseGenerated {
                    model, tokens_used, ..
                } => debug!(model = %model, tokens_used, "event: response generated"),
                DomainEvent::ToolExecuted {
                    tool_name,
                    success,
                    duration_ms,
                    ..
                } => debug!(tool = %tool_name, success, duration_ms, "event: tool executed"),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event logger lagged behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    model_configured: bool,
}

async fn health_handler(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        model_configured: state.agents.model().is_some(),
    })
}

/// Authentication middleware for the /v1 API.
///
/// Resolves `Authorization: Bearer <token>` to a user record and stores it
/// in the request extensions for the handlers.
pub(crate) async fn auth_middleware(
    State(state): State<SharedState>,
    mut req: axum::extract::Request,
    next: Next,
) -> Result<axum::response::Response, StatusCode> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);

    let user = match token {
        Some(token) if !token.is_empty() => state.users.user_for_token(token).await,
        _ => None,
    };

    match user {
        Some(user) => {
            req.extensions_mut().insert(user);
            Ok(next.run(req).await)
        }
        None => {
            warn!(path = %req.uri().path(), "Unauthorized request to /v1 API");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}
