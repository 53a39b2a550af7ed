//! Agent Factory: builds an executor from the model and a resolved tool set.

use std::sync::Arc;

use parlor_config::AgentConfig;
use parlor_core::event::EventBus;
use parlor_core::provider::ModelHandle;
use parlor_core::tool::{Tool, ToolRegistry};

use crate::executor::AgentExecutor;

/// Pure construction; no I/O happens here.
pub trait AgentFactory: Send + Sync {
    /// `None` when no model is available.
    fn build(
        &self,
        model: Option<&ModelHandle>,
        tools: Vec<Arc<dyn Tool>>,
        config_version: u64,
    ) -> Option<AgentExecutor>;
}

pub struct DefaultAgentFactory {
    system_prompt: String,
    max_iterations: u32,
    event_bus: Option<Arc<EventBus>>,
}

impl DefaultAgentFactory {
    pub fn new(system_prompt: impl Into<String>, max_iterations: u32) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            max_iterations,
            event_bus: None,
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(config.system_prompt.clone(), config.max_tool_iterations)
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }
}

impl AgentFactory for DefaultAgentFactory {
    fn build(
        &self,
        model: Option<&ModelHandle>,
        tools: Vec<Arc<dyn Tool>>,
        config_version: u64,
    ) -> Option<AgentExecutor> {
        let model = model?;
        let registry: ToolRegistry = tools.into_iter().collect();
        let mut executor = AgentExecutor::new(model.clone(), registry, self.system_prompt.clone())
            .with_max_iterations(self.max_iterations)
            .with_config_version(config_version);
        if let Some(bus) = &self.event_bus {
            executor = executor.with_event_bus(Arc::clone(bus));
        }
        Some(executor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{EchoTool, SequentialMockProvider};

    #[test]
    fn no_model_builds_nothing() {
        let factory = DefaultAgentFactory::new("prompt", 3);
        assert!(factory.build(None, vec![EchoTool::named("echo")], 0).is_none());
    }

    #[test]
    fn builds_executor_with_tools_in_order() {
        let model = ModelHandle::new(Arc::new(SequentialMockProvider::new(vec![])), "m");
        let factory = DefaultAgentFactory::from_config(&AgentConfig::default());
        let executor = factory
            .build(
                Some(&model),
                vec![EchoTool::named("github_search"), EchoTool::named("RAG_handbook")],
                7,
            )
            .unwrap();
        assert_eq!(executor.tool_names(), vec!["github_search", "RAG_handbook"]);
        assert_eq!(executor.config_version(), 7);
        assert_eq!(executor.model().model, "m");
    }
}
