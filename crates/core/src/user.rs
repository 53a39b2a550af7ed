//! User records, per-user tool configuration, and the user store.
//!
//! A user's `ToolConfiguration` names the MCP servers their agent may use.
//! Every write bumps `config_version`, which cached agents are checked
//! against.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;

/// Opaque, immutable user identifier. Used as the agent cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Wire transport used to reach an MCP server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum McpTransport {
    #[default]
    StreamableHttp,
    Sse,
}

/// Connection details for one remote tool provider.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServerConfig {
    #[serde(default)]
    pub transport: McpTransport,

    pub url: String,

    /// Extra HTTP headers; the credential lives in `Authorization`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl McpServerConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            transport: McpTransport::StreamableHttp,
            url: url.into(),
            headers: BTreeMap::new(),
        }
    }

    pub fn with_authorization(mut self, value: impl Into<String>) -> Self {
        self.headers.insert("Authorization".into(), value.into());
        self
    }

    /// The `Authorization` header value, matched case-insensitively.
    pub fn authorization(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("authorization"))
            .map(|(_, v)| v.as_str())
    }
}

impl std::fmt::Debug for McpServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let header_names: Vec<&str> = self.headers.keys().map(|k| k.as_str()).collect();
        f.debug_struct("McpServerConfig")
            .field("transport", &self.transport)
            .field("url", &self.url)
            .field("headers", &header_names)
            .finish()
    }
}

/// Provider name → connection details, iterated in name order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolConfiguration(pub BTreeMap<String, McpServerConfig>);

impl ToolConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_server(mut self, name: impl Into<String>, server: McpServerConfig) -> Self {
        self.0.insert(name.into(), server);
        self
    }

    pub fn servers(&self) -> impl Iterator<Item = (&String, &McpServerConfig)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A stored user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub username: String,

    /// `None` means "use the process-wide default configuration".
    #[serde(default)]
    pub tool_config: Option<ToolConfiguration>,

    /// Incremented on every tool configuration write.
    #[serde(default)]
    pub config_version: u64,

    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl UserRecord {
    pub fn new(id: UserId, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            tool_config: None,
            config_version: 0,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    pub fn with_tool_config(mut self, config: ToolConfiguration) -> Self {
        self.tool_config = Some(config);
        self
    }
}

/// Read/write access to user records.
///
/// Writers of `tool_config` must also invalidate the user's cached agent.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create(
        &self,
        username: &str,
        tool_config: Option<ToolConfiguration>,
    ) -> Result<UserRecord, StoreError>;

    async fn get(&self, id: UserId) -> Result<UserRecord, StoreError>;

    async fn get_by_username(&self, username: &str) -> Result<UserRecord, StoreError>;

    /// Issue a new opaque bearer token for `id`.
    async fn issue_token(&self, id: UserId) -> Result<String, StoreError>;

    async fn user_for_token(&self, token: &str) -> Option<UserRecord>;

    /// Replace the user's tool configuration and bump its version.
    async fn update_tool_config(
        &self,
        id: UserId,
        config: ToolConfiguration,
    ) -> Result<UserRecord, StoreError>;
}

#[derive(Default)]
struct UserTables {
    users: HashMap<UserId, UserRecord>,
    by_name: HashMap<String, UserId>,
    tokens: HashMap<String, UserId>,
}

/// Process-local user store.
pub struct InMemoryUserStore {
    tables: RwLock<UserTables>,
    next_id: AtomicU64,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(UserTables::default()),
            next_id: AtomicU64::new(1),
        }
    }

    pub async fn count(&self) -> usize {
        self.tables.read().await.users.len()
    }
}

impl Default for InMemoryUserStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn create(
        &self,
        username: &str,
        tool_config: Option<ToolConfiguration>,
    ) -> Result<UserRecord, StoreError> {
        let mut tables = self.tables.write().await;
        if tables.by_name.contains_key(username) {
            return Err(StoreError::UsernameTaken(username.to_string()));
        }

        let id = UserId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut user = UserRecord::new(id, username);
        user.tool_config = tool_config;

        tables.by_name.insert(username.to_string(), id);
        tables.users.insert(id, user.clone());
        tracing::info!(user_id = %id, username = %username, "User created");
        Ok(user)
    }

    async fn get(&self, id: UserId) -> Result<UserRecord, StoreError> {
        self.tables
            .read()
            .await
            .users
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::UserNotFound(id.to_string()))
    }

    async fn get_by_username(&self, username: &str) -> Result<UserRecord, StoreError> {
        let tables = self.tables.read().await;
        tables
            .by_name
            .get(username)
            .and_then(|id| tables.users.get(id))
            .cloned()
            .ok_or_else(|| StoreError::UserNotFound(username.to_string()))
    }

    async fn issue_token(&self, id: UserId) -> Result<String, StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&id) {
            return Err(StoreError::UserNotFound(id.to_string()));
        }
        let token = Uuid::new_v4().to_string();
        tables.tokens.insert(token.clone(), id);
        Ok(token)
    }

    async fn user_for_token(&self, token: &str) -> Option<UserRecord> {
        let tables = self.tables.read().await;
        let id = tables.tokens.get(token)?;
        tables.users.get(id).cloned()
    }

    async fn update_tool_config(
        &self,
        id: UserId,
        config: ToolConfiguration,
    ) -> Result<UserRecord, StoreError> {
        let mut tables = self.tables.write().await;
        let user = tables
            .users
            .get_mut(&id)
            .ok_or_else(|| StoreError::UserNotFound(id.to_string()))?;
        user.tool_config = Some(config);
        user.config_version += 1;
        user.updated_at = Some(Utc::now());
        tracing::info!(user_id = %id, version = user.config_version, "Tool configuration updated");
        Ok(user.clone())
    }
}
