//! Configuration loading, validation, and management for Parlor.
//!
//! Loads configuration from `~/.parlor/config.toml` (or an explicit path)
//! with environment variable overrides. Validates all settings at startup.

use parlor_core::user::{McpServerConfig, ToolConfiguration};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Marker found in the shipped default credential; never a usable token.
pub const GITHUB_TOKEN_PLACEHOLDER: &str = "YOUR_GITHUB_TOKEN_HERE";

/// The root configuration structure.
///
/// Maps directly to `~/.parlor/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the model provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Provider name, used for logging and default base URL lookup
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Override for the provider's OpenAI-compatible base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Embedding model used by retrieval; keyword scoring when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub agent: AgentConfig,
}

fn default_provider() -> String {
    "openrouter".into()
}
fn default_model() -> String {
    "x-ai/grok-4.1-fast:free".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("embedding_model", &self.embedding_model)
            .field("gateway", &self.gateway)
            .field("agent", &self.agent)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Allowed CORS origins; empty disables CORS headers
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_cors_origins() -> Vec<String> {
    vec!["http://localhost:5173".into()]
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            cors_origins: default_cors_origins(),
        }
    }
}

/// Agent construction and caching settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum number of cached per-user agents
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,

    /// Used for users who have not stored their own tool configuration
    #[serde(default = "default_tool_config")]
    pub default_tool_config: ToolConfiguration,

    /// Provider names that may be used without an Authorization header
    #[serde(default)]
    pub public_servers: Vec<String>,

    /// Credential substrings that mark a value as a placeholder
    #[serde(default = "default_placeholder_markers")]
    pub placeholder_markers: Vec<String>,

    /// JSON list of `{resource_name, resource_description}` records
    #[serde(default = "default_sources_path")]
    pub sources_path: PathBuf,

    /// Retrieval corpus laid out as `<dir>/<namespace>/<file>`
    #[serde(default = "default_documents_dir")]
    pub documents_dir: PathBuf,

    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: u32,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// HTTP timeout for MCP server requests
    #[serde(default = "default_mcp_timeout_secs")]
    pub mcp_timeout_secs: u64,
}

fn default_cache_size() -> usize {
    100
}
fn default_tool_config() -> ToolConfiguration {
    ToolConfiguration::new().with_server(
        "github",
        McpServerConfig::new("https://api.githubcopilot.com/mcp/")
            .with_authorization(format!("Bearer <{GITHUB_TOKEN_PLACEHOLDER}>")),
    )
}
fn default_placeholder_markers() -> Vec<String> {
    vec![GITHUB_TOKEN_PLACEHOLDER.into()]
}
fn default_sources_path() -> PathBuf {
    PathBuf::from("data").join("sources.json")
}
fn default_documents_dir() -> PathBuf {
    PathBuf::from("data").join("documents")
}
fn default_max_tool_iterations() -> u32 {
    10
}
fn default_system_prompt() -> String {
    "You are a helpful assistant. Use the available tools when they help answer \
     the user's question, and say so when you could not find an answer."
        .into()
}
fn default_mcp_timeout_secs() -> u64 {
    30
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            cache_size: default_cache_size(),
            default_tool_config: default_tool_config(),
            public_servers: vec![],
            placeholder_markers: default_placeholder_markers(),
            sources_path: default_sources_path(),
            documents_dir: default_documents_dir(),
            max_tool_iterations: default_max_tool_iterations(),
            system_prompt: default_system_prompt(),
            mcp_timeout_secs: default_mcp_timeout_secs(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.parlor/config.toml).
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        Self::load_with_env(&config_path)
    }

    /// Load from `path`, then apply environment overrides and re-validate.
    ///
    /// Recognized variables:
    /// - `PARLOR_API_KEY`, `OPENROUTER_API_KEY`, `OPENAI_API_KEY` (first wins)
    /// - `PARLOR_BASE_URL`, `OPENROUTER_BASE_URL`
    /// - `PARLOR_MODEL`
    /// - `AGENT_CACHE_SIZE`
    /// - `GITHUB_COPILOT_TOKEN` (credential for the default `github` server)
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if self.api_key.is_none() {
            self.api_key = var("PARLOR_API_KEY")
                .or_else(|| var("OPENROUTER_API_KEY"))
                .or_else(|| var("OPENAI_API_KEY"));
        }

        if let Some(url) = var("PARLOR_BASE_URL").or_else(|| var("OPENROUTER_BASE_URL")) {
            self.base_url = Some(url);
        }

        if let Some(model) = var("PARLOR_MODEL") {
            self.model = model;
        }

        if let Some(size) = var("AGENT_CACHE_SIZE") {
            self.agent.cache_size = size.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "AGENT_CACHE_SIZE must be a positive integer, got '{size}'"
                ))
            })?;
        }

        if let Some(token) = var("GITHUB_COPILOT_TOKEN")
            && let Some(github) = self.agent.default_tool_config.0.get_mut("github")
        {
            let value = if token.starts_with("Bearer ") {
                token
            } else {
                format!("Bearer {token}")
            };
            github.headers.insert("Authorization".into(), value);
        }

        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".parlor")
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.temperature < 0.0 || self.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.cache_size == 0 {
            return Err(ConfigError::ValidationError(
                "agent.cache_size must be at least 1".into(),
            ));
        }

        if self.agent.max_tool_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_tool_iterations must be at least 1".into(),
            ));
        }

        Ok(())
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            provider: default_provider(),
            base_url: None,
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            embedding_model: None,
            gateway: GatewayConfig::default(),
            agent: AgentConfig::default(),
        }
    }
}

fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
