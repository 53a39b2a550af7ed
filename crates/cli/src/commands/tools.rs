//! `parlor tools`: show which tools an agent would be built with.

use std::path::Path;

use parlor_core::tool::Tool;
use parlor_core::user::ToolConfiguration;

pub async fn run(
    config_path: Option<&Path>,
    tool_config_path: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config =
        super::load_config(config_path).map_err(|e| format!("Failed to load config: {e}"))?;

    let tool_config = match tool_config_path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
            serde_json::from_str::<ToolConfiguration>(&content)
                .map_err(|e| format!("Failed to parse {}: {e}", path.display()))?
        }
        None => config.agent.default_tool_config.clone(),
    };

    let provisioner = parlor_gateway::build_provisioner(&config).await?;

    let usable = provisioner.valid_servers(&tool_config);
    println!("Tool providers ({} configured, {} usable):", tool_config.len(), usable.len());
    for (name, server) in tool_config.servers() {
        let mark = if usable.iter().any(|s| &s.name == name) {
            "ok"
        } else {
            "skipped"
        };
        println!("   [{mark:^7}] {name:<16} {}", server.url);
    }
    println!();

    let model = match parlor_providers::build_model(&config) {
        Ok(model) => model,
        Err(e) => {
            println!("No language model available ({e}); cannot resolve tools.");
            return Ok(());
        }
    };

    let tools = provisioner.resolve(&model, &tool_config).await;
    println!("Resolved tools ({}):", tools.len());
    for tool in &tools {
        println!("   {:<32} {}", tool.name(), tool.description());
    }

    Ok(())
}
