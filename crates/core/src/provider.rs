//! Provider trait and the shared model handle.
//!
//! A Provider knows how to send a conversation to an LLM and get a response
//! back, and optionally how to embed text. The `ModelHandle` bundles a
//! provider with the model settings every agent executor uses; it is built
//! once at startup and shared read-only by all cached agents.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::Message;

/// Configuration for a provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "x-ai/grok-4.1-fast", "gpt-4o")
    pub model: String,

    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Available tools the model can call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
}

/// A tool definition sent to the LLM so it knows what tools it can call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// A complete response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub message: Message,
    pub usage: Option<Usage>,
    /// Which model actually responded (may differ from requested)
    pub model: String,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// An embedding request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    pub model: String,
    pub inputs: Vec<String>,
}

/// An embedding response, one vector per input text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    pub embeddings: Vec<Vec<f32>>,
    pub model: String,
}

/// The core Provider trait.
///
/// Every LLM backend implements this trait. Agent executors call
/// `complete()` without knowing which backend is behind it.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openrouter").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError>;

    /// Generate embeddings for the given texts.
    ///
    /// Default implementation returns an error indicating embeddings aren't supported.
    async fn embed(&self, _request: EmbeddingRequest) -> Result<EmbeddingResponse, ProviderError> {
        Err(ProviderError::NotConfigured(format!(
            "Provider '{}' does not support embeddings",
            self.name()
        )))
    }
}

/// Shared, read-only handle to the language model.
#[derive(Clone)]
pub struct ModelHandle {
    pub provider: Arc<dyn Provider>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Model used for `embed` calls; retrieval falls back to keyword scoring when unset.
    pub embedding_model: Option<String>,
}

impl ModelHandle {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
            embedding_model: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = Some(model.into());
        self
    }

    /// Build a completion request for this model.
    pub fn request(&self, messages: Vec<Message>, tools: Vec<ToolDefinition>) -> ProviderRequest {
        ProviderRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            tools,
        }
    }

    /// Embed `inputs` with the configured embedding model.
    pub async fn embed(&self, inputs: Vec<String>) -> Result<Vec<Vec<f32>>, ProviderError> {
        let Some(model) = &self.embedding_model else {
            return Err(ProviderError::NotConfigured(
                "no embedding model configured".into(),
            ));
        };
        let response = self
            .provider
            .embed(EmbeddingRequest {
                model: model.clone(),
                inputs,
            })
            .await?;
        Ok(response.embeddings)
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("provider", &self.provider.name())
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("embedding_model", &self.embedding_model)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoEmbedProvider;

    #[async_trait]
    impl Provider for NoEmbedProvider {
        fn name(&self) -> &str {
            "plain"
        }

        async fn complete(
            &self,
            _request: ProviderRequest,
        ) -> Result<ProviderResponse, ProviderError> {
            Ok(ProviderResponse {
                message: Message::assistant("ok"),
                usage: None,
                model: "plain-model".into(),
            })
        }
    }

    #[test]
    fn request_carries_model_settings() {
        let handle = ModelHandle::new(Arc::new(NoEmbedProvider), "gpt-4o")
            .with_temperature(0.2)
            .with_max_tokens(256);
        let req = handle.request(vec![Message::user("hi")], vec![]);
        assert_eq!(req.model, "gpt-4o");
        assert!((req.temperature - 0.2).abs() < f32::EPSILON);
        assert_eq!(req.max_tokens, Some(256));
    }

    #[tokio::test]
    async fn embed_without_model_is_not_configured() {
        let handle = ModelHandle::new(Arc::new(NoEmbedProvider), "gpt-4o");
        let err = handle.embed(vec!["x".into()]).await.unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn default_embed_is_unsupported() {
        let handle = ModelHandle::new(Arc::new(NoEmbedProvider), "gpt-4o")
            .with_embedding_model("text-embedding-3-small");
        let err = handle.embed(vec!["x".into()]).await.unwrap_err();
        assert!(err.to_string().contains("does not support embeddings"));
    }
}
