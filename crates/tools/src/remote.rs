//! The seam between the provisioner and remote tool providers.

use std::sync::Arc;

use async_trait::async_trait;
use parlor_core::error::ToolError;
use parlor_core::tool::Tool;
use parlor_core::user::McpServerConfig;

/// A provider entry that passed credential validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedServer {
    pub name: String,
    pub config: McpServerConfig,
}

impl NamedServer {
    pub fn new(name: impl Into<String>, config: McpServerConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }
}

/// Fetches the callable tools advertised by a batch of remote providers.
///
/// The batch succeeds or fails as a whole.
#[async_trait]
pub trait RemoteToolSource: Send + Sync {
    async fn fetch_tools(&self, servers: &[NamedServer]) -> Result<Vec<Arc<dyn Tool>>, ToolError>;
}
