//! Retrieval tool synthesized for one known document source.

use std::sync::Arc;

use async_trait::async_trait;
use parlor_core::error::ToolError;
use parlor_core::provider::ModelHandle;
use parlor_core::retrieval::{KnownSource, Retriever};
use parlor_core::tool::{Tool, ToolResult};
use tracing::debug;

pub const RETRIEVAL_TOOL_PREFIX: &str = "RAG_";

/// Answers a query with the best-matching chunk from one namespace.
pub struct RetrievalTool {
    name: String,
    description: String,
    namespace: String,
    retriever: Arc<dyn Retriever>,
    model: ModelHandle,
}

impl RetrievalTool {
    pub fn new(source: &KnownSource, retriever: Arc<dyn Retriever>, model: ModelHandle) -> Self {
        Self {
            name: format!("{RETRIEVAL_TOOL_PREFIX}{}", source.resource_name),
            description: format!(
                "RAG over '{}'. {}",
                source.resource_name, source.resource_description
            ),
            namespace: source.resource_name.clone(),
            retriever,
            model,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

#[async_trait]
impl Tool for RetrievalTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What to look up in this document collection"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let query = arguments["query"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;

        let hits = self
            .retriever
            .search(query, &self.model, &self.namespace)
            .await?;
        debug!(tool = %self.name, hits = hits.len(), "Retrieval finished");

        Ok(match hits.into_iter().next() {
            Some(top) => ToolResult::ok(top.content),
            None => ToolResult::ok("No results found"),
        })
    }
}
