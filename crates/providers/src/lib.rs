//! LLM provider implementations for Parlor.
//!
//! All providers implement the `parlor_core::Provider` trait. `build_model`
//! turns the application config into the single shared `ModelHandle` that
//! every agent executor uses.

pub mod openai_compat;

use std::sync::Arc;

use parlor_config::AppConfig;
use parlor_core::error::ProviderError;
use parlor_core::provider::ModelHandle;
use tracing::info;

pub use openai_compat::OpenAiCompatProvider;

/// Providers that run on the local machine and accept requests without a key.
const LOCAL_PROVIDERS: &[&str] = &["ollama", "vllm", "llamacpp", "lmstudio"];

/// Default OpenAI-compatible base URL for a named provider.
pub fn default_base_url(provider: &str) -> Option<&'static str> {
    match provider {
        "openrouter" => Some("https://openrouter.ai/api/v1"),
        "openai" => Some("https://api.openai.com/v1"),
        "groq" => Some("https://api.groq.com/openai/v1"),
        "together" => Some("https://api.together.xyz/v1"),
        "deepseek" => Some("https://api.deepseek.com/v1"),
        "ollama" => Some("http://localhost:11434/v1"),
        "vllm" => Some("http://localhost:8000/v1"),
        "llamacpp" => Some("http://localhost:8080/v1"),
        "lmstudio" => Some("http://localhost:1234/v1"),
        _ => None,
    }
}

/// Build the shared model handle from configuration.
///
/// Returns `NotConfigured` when a hosted provider has no API key or an
/// unknown provider has no explicit `base_url`.
pub fn build_model(config: &AppConfig) -> Result<ModelHandle, ProviderError> {
    let is_local = LOCAL_PROVIDERS.contains(&config.provider.as_str());

    let api_key = match (&config.api_key, is_local) {
        (Some(key), _) if !key.trim().is_empty() => key.clone(),
        (_, true) => String::new(),
        _ => {
            return Err(ProviderError::NotConfigured(format!(
                "no API key configured for provider '{}'",
                config.provider
            )));
        }
    };

    let base_url = match &config.base_url {
        Some(url) => url.clone(),
        None => default_base_url(&config.provider)
            .ok_or_else(|| {
                ProviderError::NotConfigured(format!(
                    "unknown provider '{}' and no base_url set",
                    config.provider
                ))
            })?
            .to_string(),
    };

    let provider = OpenAiCompatProvider::new(config.provider.clone(), &base_url, api_key)?;
    let mut handle = ModelHandle::new(Arc::new(provider), config.model.clone())
        .with_temperature(config.temperature)
        .with_max_tokens(config.max_tokens);
    if let Some(embedding_model) = &config.embedding_model {
        handle = handle.with_embedding_model(embedding_model.clone());
    }

    info!(
        provider = %config.provider,
        model = %handle.model,
        base_url = %base_url,
        "Language model configured"
    );
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_is_not_configured() {
        let config = AppConfig::default();
        let err = build_model(&config).unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }

    #[test]
    fn blank_key_is_not_configured() {
        let config = AppConfig {
            api_key: Some("   ".into()),
            ..AppConfig::default()
        };
        assert!(build_model(&config).is_err());
    }

    #[test]
    fn hosted_provider_with_key() {
        let config = AppConfig {
            api_key: Some("sk-or-test".into()),
            embedding_model: Some("openai/text-embedding-3-small".into()),
            ..AppConfig::default()
        };
        let handle = build_model(&config).unwrap();
        assert_eq!(handle.provider.name(), "openrouter");
        assert_eq!(handle.model, config.model);
        assert_eq!(handle.max_tokens, Some(4096));
        assert_eq!(
            handle.embedding_model.as_deref(),
            Some("openai/text-embedding-3-small")
        );
    }

    #[test]
    fn local_provider_needs_no_key() {
        let config = AppConfig {
            provider: "ollama".into(),
            model: "llama3.2".into(),
            ..AppConfig::default()
        };
        let handle = build_model(&config).unwrap();
        assert_eq!(handle.provider.name(), "ollama");
    }

    #[test]
    fn unknown_provider_requires_base_url() {
        let config = AppConfig {
            provider: "acme".into(),
            api_key: Some("k".into()),
            ..AppConfig::default()
        };
        assert!(build_model(&config).is_err());

        let config = AppConfig {
            base_url: Some("https://llm.acme.internal/v1".into()),
            ..config
        };
        assert!(build_model(&config).is_ok());
    }

    #[test]
    fn known_base_urls() {
        assert_eq!(
            default_base_url("openai"),
            Some("https://api.openai.com/v1")
        );
        assert!(default_base_url("nope").is_none());
    }
}
