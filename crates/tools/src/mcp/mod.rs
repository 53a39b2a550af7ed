//! Remote tools served over the Model Context Protocol.

pub mod client;
pub mod protocol;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::try_join_all;
use parlor_core::error::ToolError;
use parlor_core::tool::Tool;
use parlor_core::user::McpTransport;
use tracing::{debug, info};

pub use client::McpClient;

use crate::remote::{NamedServer, RemoteToolSource};

/// `RemoteToolSource` backed by one `McpClient` per server.
///
/// Servers are contacted concurrently; any failure fails the whole batch.
pub struct McpToolSource {
    timeout: Duration,
}

impl McpToolSource {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for McpToolSource {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl RemoteToolSource for McpToolSource {
    async fn fetch_tools(&self, servers: &[NamedServer]) -> Result<Vec<Arc<dyn Tool>>, ToolError> {
        let fetches = servers.iter().map(|server| async move {
            if server.config.transport != McpTransport::StreamableHttp {
                return Err(ToolError::SourceUnavailable(format!(
                    "server '{}' uses the {:?} transport, only streamable_http is supported",
                    server.name, server.config.transport
                )));
            }

            let client = McpClient::new(server.name.clone(), &server.config, self.timeout)?;
            let tools = client.into_tools().await?;
            debug!(server = %server.name, count = tools.len(), "Fetched MCP tools");
            Ok::<_, ToolError>(tools)
        });

        let tools: Vec<Arc<dyn Tool>> = try_join_all(fetches).await?.into_iter().flatten().collect();
        info!(servers = servers.len(), tools = tools.len(), "Remote tools loaded");
        Ok(tools)
    }
}
