//! Tool Provisioner: turns a tool configuration into callable tools.
//!
//! Provider entries with unusable credentials are dropped, the remainder is
//! fetched from the remote source as one batch, and one retrieval tool is
//! added per known document source. Every failure degrades to fewer tools;
//! provisioning itself never fails.

use std::sync::Arc;

use parlor_config::AgentConfig;
use parlor_core::provider::ModelHandle;
use parlor_core::retrieval::{Retriever, SourceRegistry};
use parlor_core::tool::Tool;
use parlor_core::user::{McpServerConfig, ToolConfiguration};
use tracing::{debug, info, warn};

use crate::remote::{NamedServer, RemoteToolSource};
use crate::retrieval::RetrievalTool;

/// Which provider entries may be contacted.
#[derive(Debug, Clone)]
pub struct CredentialPolicy {
    /// Providers usable without an `Authorization` header.
    pub public_servers: Vec<String>,
    /// Substrings that mark a credential as a placeholder.
    pub placeholder_markers: Vec<String>,
}

impl CredentialPolicy {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            public_servers: config.public_servers.clone(),
            placeholder_markers: config.placeholder_markers.clone(),
        }
    }

    /// `Err` carries the reason the entry is unusable.
    pub fn check(&self, name: &str, server: &McpServerConfig) -> Result<(), &'static str> {
        if self.public_servers.iter().any(|p| p == name) {
            return Ok(());
        }
        match server.authorization() {
            None => Err("no Authorization header"),
            Some(value) if value.trim().is_empty() => Err("empty Authorization header"),
            Some(value) if self.placeholder_markers.iter().any(|m| value.contains(m.as_str())) => {
                Err("placeholder credential")
            }
            Some(_) => Ok(()),
        }
    }
}

impl Default for CredentialPolicy {
    fn default() -> Self {
        Self::from_config(&AgentConfig::default())
    }
}

pub struct ToolProvisioner {
    policy: CredentialPolicy,
    remote: Arc<dyn RemoteToolSource>,
    sources: Arc<dyn SourceRegistry>,
    retriever: Arc<dyn Retriever>,
}

impl ToolProvisioner {
    pub fn new(
        policy: CredentialPolicy,
        remote: Arc<dyn RemoteToolSource>,
        sources: Arc<dyn SourceRegistry>,
        retriever: Arc<dyn Retriever>,
    ) -> Self {
        Self {
            policy,
            remote,
            sources,
            retriever,
        }
    }

    /// Entries that pass credential validation, ordered by provider name.
    pub fn valid_servers(&self, config: &ToolConfiguration) -> Vec<NamedServer> {
        config
            .servers()
            .filter_map(|(name, server)| match self.policy.check(name, server) {
                Ok(()) => Some(NamedServer::new(name.clone(), server.clone())),
                Err(reason) => {
                    warn!(provider = %name, reason, "Skipping tool provider with unusable credentials");
                    None
                }
            })
            .collect()
    }

    /// Resolve the tools for `config`: remote tools first, then retrieval tools.
    pub async fn resolve(
        &self,
        model: &ModelHandle,
        config: &ToolConfiguration,
    ) -> Vec<Arc<dyn Tool>> {
        let mut tools = self.remote_tools(config).await;
        tools.extend(self.retrieval_tools(model).await);
        debug!(count = tools.len(), "Tools provisioned");
        tools
    }

    async fn remote_tools(&self, config: &ToolConfiguration) -> Vec<Arc<dyn Tool>> {
        let servers = self.valid_servers(config);
        if servers.is_empty() {
            info!("No valid remote tool providers configured");
            return Vec::new();
        }

        match self.remote.fetch_tools(&servers).await {
            Ok(tools) => tools,
            Err(e) => {
                warn!(error = %e, providers = servers.len(), "Failed to load remote tools, continuing without them");
                Vec::new()
            }
        }
    }

    async fn retrieval_tools(&self, model: &ModelHandle) -> Vec<Arc<dyn Tool>> {
        let sources = match self.sources.load().await {
            Ok(sources) => sources,
            Err(e) => {
                warn!(error = %e, "Known sources unavailable, no retrieval tools");
                return Vec::new();
            }
        };

        sources
            .iter()
            .filter(|source| !source.resource_name.is_empty())
            .map(|source| {
                Arc::new(RetrievalTool::new(
                    source,
                    Arc::clone(&self.retriever),
                    model.clone(),
                )) as Arc<dyn Tool>
            })
            .collect()
    }
}
