//! `parlor config`: configuration management commands.

use std::path::Path;

use parlor_config::AppConfig;

/// Redact every header value of the configured tool servers.
fn redact_headers(value: &mut toml::Value) {
    let Some(servers) = value
        .get_mut("agent")
        .and_then(|agent| agent.get_mut("default_tool_config"))
        .and_then(toml::Value::as_table_mut)
    else {
        return;
    };
    for (_, server) in servers.iter_mut() {
        if let Some(headers) = server.get_mut("headers").and_then(toml::Value::as_table_mut) {
            for (_, header) in headers.iter_mut() {
                *header = toml::Value::String("[REDACTED]".into());
            }
        }
    }
}

pub fn render_redacted(config: &AppConfig) -> Result<String, Box<dyn std::error::Error>> {
    let mut value = toml::Value::try_from(config)?;
    if let Some(table) = value.as_table_mut()
        && table.contains_key("api_key")
    {
        table.insert("api_key".into(), toml::Value::String("[REDACTED]".into()));
    }
    redact_headers(&mut value);
    Ok(toml::to_string_pretty(&value)?)
}

pub fn show(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config =
        super::load_config(config_path).map_err(|e| format!("Failed to load config: {e}"))?;
    println!("{}", render_redacted(&config)?);
    Ok(())
}

pub fn path(config_path: Option<&Path>) {
    println!("{}", super::config_file(config_path).display());
}

pub fn init(config_path: Option<&Path>, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let path = super::config_file(config_path);
    if path.exists() && !force {
        return Err(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )
        .into());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, AppConfig::default_toml())?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}
