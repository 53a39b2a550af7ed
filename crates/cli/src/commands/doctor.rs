//! `parlor doctor`: diagnose configuration and data files.

use std::path::Path;

use parlor_config::AppConfig;
use parlor_core::retrieval::SourceRegistry;
use parlor_tools::{CredentialPolicy, JsonSourceRegistry};

/// Human-readable findings for `config`; empty when everything looks usable.
pub async fn diagnose(config: &AppConfig) -> Vec<String> {
    let mut issues = Vec::new();

    if let Err(e) = parlor_providers::build_model(config) {
        issues.push(format!("Language model unavailable: {e}"));
    }

    let policy = CredentialPolicy::from_config(&config.agent);
    for (name, server) in config.agent.default_tool_config.servers() {
        if let Err(reason) = policy.check(name, server) {
            issues.push(format!("Default tool provider '{name}' will be skipped: {reason}"));
        }
    }

    match JsonSourceRegistry::new(&config.agent.sources_path).load().await {
        Ok(sources) if sources.is_empty() => {
            issues.push("Known sources file lists no sources".into());
        }
        Ok(_) => {}
        Err(e) => issues.push(format!("Known sources unavailable: {e}")),
    }

    if !config.agent.documents_dir.is_dir() {
        issues.push(format!(
            "Documents directory {} does not exist",
            config.agent.documents_dir.display()
        ));
    }

    issues
}

pub async fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("Parlor Doctor: System Diagnostics");
    println!("=================================\n");

    let path = super::config_file(config_path);
    if path.exists() {
        println!("  [ok] Config file {}", path.display());
    } else {
        println!("  [--] No config file at {}, using defaults", path.display());
    }

    let config = match super::load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            println!("  [!!] Config invalid: {e}");
            return Err(e.into());
        }
    };

    let issues = diagnose(&config).await;
    for issue in &issues {
        println!("  [!!] {issue}");
    }

    println!();
    if issues.is_empty() {
        println!("  All checks passed.");
    } else {
        println!("  {} issue(s) found.", issues.len());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_config_reports_missing_pieces() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.agent.sources_path = dir.path().join("missing.json");
        config.agent.documents_dir = dir.path().join("missing-docs");

        let issues = diagnose(&config).await;
        assert!(issues.iter().any(|i| i.contains("Language model unavailable")));
        assert!(issues.iter().any(|i| i.contains("'github' will be skipped")));
        assert!(issues.iter().any(|i| i.contains("Known sources unavailable")));
        assert!(issues.iter().any(|i| i.contains("Documents directory")));
    }

    #[tokio::test]
    async fn complete_setup_passes() {
        let dir = tempfile::tempdir().unwrap();
        let sources = dir.path().join("sources.json");
        std::fs::write(
            &sources,
            r#"[{"resource_name": "handbook", "resource_description": "HR policies"}]"#,
        )
        .unwrap();
        std::fs::create_dir_all(dir.path().join("documents")).unwrap();

        let mut config = AppConfig {
            api_key: Some("sk-test".into()),
            ..AppConfig::default()
        };
        config.agent.default_tool_config = Default::default();
        config.agent.sources_path = sources;
        config.agent.documents_dir = dir.path().join("documents");

        assert!(diagnose(&config).await.is_empty());
    }
}
