//! MCP JSON-RPC message types.

use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: &str = "2025-03-26";

/// An outgoing JSON-RPC request or notification.
#[derive(Debug, Clone, Serialize)]
pub struct McpRequest {
    pub jsonrpc: &'static str,

    /// Absent for notifications.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,

    pub method: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl McpRequest {
    fn new(id: Option<u64>, method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.to_string(),
            params,
        }
    }

    pub fn initialize(id: u64) -> Self {
        Self::new(
            Some(id),
            "initialize",
            Some(serde_json::json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {
                    "name": "parlor",
                    "version": env!("CARGO_PKG_VERSION"),
                }
            })),
        )
    }

    pub fn initialized_notification() -> Self {
        Self::new(None, "notifications/initialized", None)
    }

    pub fn list_tools(id: u64, cursor: Option<&str>) -> Self {
        let params = cursor.map(|c| serde_json::json!({ "cursor": c }));
        Self::new(Some(id), "tools/list", params)
    }

    pub fn call_tool(id: u64, name: &str, arguments: serde_json::Value) -> Self {
        Self::new(
            Some(id),
            "tools/call",
            Some(serde_json::json!({ "name": name, "arguments": arguments })),
        )
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct McpResponse {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<McpErrorObject>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct McpErrorObject {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    #[serde(default)]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub server_info: Option<ServerInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// A tool as advertised by `tools/list`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "empty_object_schema")]
    pub input_schema: serde_json::Value,
}

fn empty_object_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    pub tools: Vec<McpTool>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        #[serde(rename = "mimeType", default)]
        mime_type: String,
    },
    Resource {
        resource: serde_json::Value,
    },
    #[serde(other)]
    Unknown,
}

impl ContentBlock {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub is_error: bool,
}

impl CallToolResult {
    /// Text blocks joined by newlines.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(ContentBlock::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_shapes() {
        let req = McpRequest::list_tools(1, None);
        assert_eq!(req.method, "tools/list");
        assert_eq!(req.id, Some(1));
        assert!(req.params.is_none());

        let req = McpRequest::list_tools(4, Some("page-2"));
        assert_eq!(req.params.as_ref().unwrap()["cursor"], "page-2");

        let req = McpRequest::call_tool(2, "search_issues", serde_json::json!({"q": "bug"}));
        assert_eq!(req.params.as_ref().unwrap()["name"], "search_issues");

        let note = McpRequest::initialized_notification();
        assert!(note.is_notification());
        let wire = serde_json::to_value(&note).unwrap();
        assert!(wire.get("id").is_none());
    }

    #[test]
    fn list_tools_defaults_missing_schema() {
        let parsed: ListToolsResult = serde_json::from_value(serde_json::json!({
            "tools": [{ "name": "get_me" }]
        }))
        .unwrap();
        assert_eq!(parsed.tools[0].input_schema["type"], "object");
        assert!(parsed.tools[0].description.is_empty());
    }

    #[test]
    fn call_result_text_skips_non_text_blocks() {
        let parsed: CallToolResult = serde_json::from_value(serde_json::json!({
            "content": [
                { "type": "text", "text": "line one" },
                { "type": "image", "mimeType": "image/png", "data": "..." },
                { "type": "text", "text": "line two" }
            ],
            "isError": false
        }))
        .unwrap();
        assert_eq!(parsed.text(), "line one\nline two");
        assert!(!parsed.is_error);
    }
}
