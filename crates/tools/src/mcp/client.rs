//! MCP client for one remote tool server.
//!
//! Speaks JSON-RPC 2.0 over the Streamable HTTP transport. Responses may be
//! plain JSON or a single-message SSE stream; the `Mcp-Session-Id` header
//! returned by `initialize` is echoed on every later request.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use parlor_core::error::ToolError;
use parlor_core::tool::{Tool, ToolResult};
use parlor_core::user::McpServerConfig;
use tokio::sync::RwLock;
use tracing::debug;

use super::protocol::{
    CallToolResult, InitializeResult, ListToolsResult, McpRequest, McpResponse, McpTool,
};

const SESSION_HEADER: &str = "Mcp-Session-Id";

/// Upper bound on `tools/list` pages fetched from one server.
const MAX_TOOL_PAGES: usize = 100;

pub struct McpClient {
    server_name: String,
    server_url: String,
    headers: Vec<(String, String)>,
    http_client: reqwest::Client,
    next_id: AtomicU64,
    session_id: RwLock<Option<String>>,
}

impl McpClient {
    pub fn new(
        server_name: impl Into<String>,
        config: &McpServerConfig,
        timeout: Duration,
    ) -> Result<Self, ToolError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ToolError::ExternalService(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            server_name: server_name.into(),
            server_url: config.url.clone(),
            headers: config
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            http_client,
            next_id: AtomicU64::new(1),
            session_id: RwLock::new(None),
        })
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// POST one JSON-RPC message. Notifications yield `Ok(None)`.
    async fn send(&self, request: &McpRequest) -> Result<Option<McpResponse>, ToolError> {
        let mut builder = self
            .http_client
            .post(&self.server_url)
            .header("Accept", "application/json, text/event-stream")
            .header("Content-Type", "application/json")
            .json(request);

        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(session_id) = self.session_id.read().await.as_deref() {
            builder = builder.header(SESSION_HEADER, session_id);
        }

        let response = builder.send().await.map_err(|e| {
            let mut chain = format!("MCP request to '{}' failed: {e}", self.server_name);
            let mut source = std::error::Error::source(&e);
            while let Some(cause) = source {
                chain.push_str(&format!(" -> {cause}"));
                source = cause.source();
            }
            ToolError::ExternalService(chain)
        })?;

        if let Some(session_id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.write().await = Some(session_id.to_string());
        }

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ToolError::ExternalService(format!(
                "MCP server '{}' rejected the credentials ({status})",
                self.server_name
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ToolError::ExternalService(format!(
                "MCP server '{}' returned status {status}: {body}",
                self.server_name
            )));
        }

        if request.is_notification() {
            return Ok(None);
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.contains("text/event-stream") {
            let mut stream = response.bytes_stream();
            let mut buffer = SseBuffer::default();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| {
                    ToolError::ExternalService(format!("Failed to read SSE chunk: {e}"))
                })?;
                if let Some(parsed) = buffer.push(&chunk) {
                    return Ok(Some(parsed));
                }
            }
            buffer.finish().map(Some).ok_or_else(|| {
                ToolError::ExternalService(format!(
                    "No JSON-RPC response in SSE stream from '{}'",
                    self.server_name
                ))
            })
        } else {
            response.json().await.map(Some).map_err(|e| {
                ToolError::ExternalService(format!("Failed to parse MCP response: {e}"))
            })
        }
    }

    /// Send a request and unwrap its `result`, mapping JSON-RPC errors.
    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        request: McpRequest,
    ) -> Result<T, ToolError> {
        let method = request.method.clone();
        let response = self.send(&request).await?.ok_or_else(|| {
            ToolError::ExternalService(format!("No response to '{method}'"))
        })?;

        if let Some(error) = response.error {
            return Err(ToolError::ExternalService(format!(
                "MCP '{method}' error from '{}': {} (code {})",
                self.server_name, error.message, error.code
            )));
        }

        let result = response.result.ok_or_else(|| {
            ToolError::ExternalService(format!("No result in '{method}' response"))
        })?;
        serde_json::from_value(result)
            .map_err(|e| ToolError::ExternalService(format!("Invalid '{method}' result: {e}")))
    }

    /// Handshake with the server and acknowledge with `notifications/initialized`.
    pub async fn initialize(&self) -> Result<InitializeResult, ToolError> {
        let result: InitializeResult = self
            .call(McpRequest::initialize(self.next_request_id()))
            .await?;
        self.send(&McpRequest::initialized_notification()).await?;

        debug!(
            server = %self.server_name,
            protocol = ?result.protocol_version,
            "MCP session initialized"
        );
        Ok(result)
    }

    /// All advertised tools, following `nextCursor` pagination.
    ///
    /// A repeated cursor or more than `MAX_TOOL_PAGES` pages is an error.
    pub async fn list_tools(&self) -> Result<Vec<McpTool>, ToolError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen = HashSet::new();
        for _ in 0..MAX_TOOL_PAGES {
            let page: ListToolsResult = self
                .call(McpRequest::list_tools(self.next_request_id(), cursor.as_deref()))
                .await?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => {
                    if !seen.insert(next.clone()) {
                        return Err(ToolError::ExternalService(format!(
                            "MCP server '{}' repeated tools/list cursor '{next}'",
                            self.server_name
                        )));
                    }
                    cursor = Some(next);
                }
                _ => return Ok(tools),
            }
        }
        Err(ToolError::ExternalService(format!(
            "MCP server '{}' returned more than {MAX_TOOL_PAGES} tools/list pages",
            self.server_name
        )))
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<CallToolResult, ToolError> {
        self.call(McpRequest::call_tool(self.next_request_id(), name, arguments))
            .await
    }

    /// Connect, list tools, and wrap each one as a `Tool` named `<server>_<tool>`.
    pub async fn into_tools(self) -> Result<Vec<Arc<dyn Tool>>, ToolError> {
        self.initialize().await?;
        let tools = self.list_tools().await?;
        let client = Arc::new(self);

        Ok(tools
            .into_iter()
            .map(|tool| {
                let prefixed_name = format!("{}_{}", client.server_name, tool.name);
                Arc::new(McpToolWrapper {
                    tool,
                    prefixed_name,
                    client: Arc::clone(&client),
                }) as Arc<dyn Tool>
            })
            .collect())
    }
}

/// Raw SSE bytes; only text up to the last newline is decoded, so a
/// multi-byte character split across chunks stays intact.
#[derive(Default)]
struct SseBuffer {
    bytes: Vec<u8>,
}

impl SseBuffer {
    fn push(&mut self, chunk: &[u8]) -> Option<McpResponse> {
        self.bytes.extend_from_slice(chunk);
        let end = self.bytes.iter().rposition(|b| *b == b'\n')?;
        let text = std::str::from_utf8(&self.bytes[..=end]).ok()?;
        parse_sse_response(text)
    }

    /// Parse whatever is left once the stream has ended.
    fn finish(&self) -> Option<McpResponse> {
        parse_sse_response(&String::from_utf8_lossy(&self.bytes))
    }
}

/// Find the first `data:` line that parses as a JSON-RPC response.
fn parse_sse_response(buffer: &str) -> Option<McpResponse> {
    buffer
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .filter_map(|data| serde_json::from_str::<McpResponse>(data.trim_start()).ok())
        .find(|response| response.result.is_some() || response.error.is_some())
}

/// A remote MCP tool exposed through the `Tool` trait.
struct McpToolWrapper {
    tool: McpTool,
    prefixed_name: String,
    client: Arc<McpClient>,
}

#[async_trait]
impl Tool for McpToolWrapper {
    fn name(&self) -> &str {
        &self.prefixed_name
    }

    fn description(&self) -> &str {
        &self.tool.description
    }

    fn parameters_schema(&self) -> serde_json::Value {
        self.tool.input_schema.clone()
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let start = Instant::now();
        let result = self.client.call_tool(&self.tool.name, arguments).await?;
        debug!(
            tool = %self.prefixed_name,
            is_error = result.is_error,
            duration_ms = start.elapsed().as_millis() as u64,
            "MCP tool call finished"
        );

        let text = result.text();
        Ok(if result.is_error {
            ToolResult::failed(text)
        } else {
            ToolResult::ok(text)
        })
    }
}
