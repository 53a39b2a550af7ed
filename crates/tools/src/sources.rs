//! Known-sources registry backed by a JSON file.
//!
//! The file holds a list of `{resource_name, resource_description}` records
//! and is re-read on every call, so edits apply to the next agent build.

use std::path::PathBuf;

use async_trait::async_trait;
use parlor_core::error::ToolError;
use parlor_core::retrieval::{KnownSource, SourceRegistry};

pub struct JsonSourceRegistry {
    path: PathBuf,
}

impl JsonSourceRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl SourceRegistry for JsonSourceRegistry {
    async fn load(&self) -> Result<Vec<KnownSource>, ToolError> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            ToolError::SourceUnavailable(format!("failed to read {}: {e}", self.path.display()))
        })?;

        serde_json::from_str(&content).map_err(|e| {
            ToolError::SourceUnavailable(format!("failed to parse {}: {e}", self.path.display()))
        })
    }
}
