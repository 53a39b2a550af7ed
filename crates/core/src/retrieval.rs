//! Retrieval over private document collections.
//!
//! A `Retriever` searches one namespace (a named document collection) and
//! returns chunks ranked best-first. A `SourceRegistry` lists the known
//! namespaces; each becomes one retrieval tool at provisioning time.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ToolError;
use crate::provider::ModelHandle;

/// A ranked search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub document_id: String,
    pub content: String,
    pub namespace: String,
    pub score: f32,
}

#[async_trait]
pub trait Retriever: Send + Sync {
    /// Search `namespace` for `query`, best match first.
    async fn search(
        &self,
        query: &str,
        model: &ModelHandle,
        namespace: &str,
    ) -> Result<Vec<RetrievedChunk>, ToolError>;
}

/// One known document collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownSource {
    #[serde(default)]
    pub resource_name: String,

    #[serde(default)]
    pub resource_description: String,
}

impl KnownSource {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            resource_name: name.into(),
            resource_description: description.into(),
        }
    }
}

/// Read-only list of known sources, re-read on every provisioning call.
#[async_trait]
pub trait SourceRegistry: Send + Sync {
    async fn load(&self) -> Result<Vec<KnownSource>, ToolError>;
}
