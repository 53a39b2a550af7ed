//! The per-user agent executor.
//!
//! An executor answers one chat turn: it sends the system prompt, the prior
//! transcript and the new query to the model, runs any tool calls the model
//! asks for, and loops until the model answers in plain text or the
//! iteration limit is reached.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parlor_core::event::{DomainEvent, EventBus};
use parlor_core::message::{Message, MessageToolCall, Role};
use parlor_core::provider::ModelHandle;
use parlor_core::tool::{ToolCall, ToolRegistry};
use serde::Serialize;
use tracing::{debug, info, warn};

pub const MAX_ITERATIONS_REPLY: &str =
    "I've reached the maximum number of tool call iterations. Please provide further guidance.";

/// The outcome of one chat turn.
#[derive(Debug, Clone, Serialize)]
pub struct AgentReply {
    pub content: String,
    /// Distinct tool names in first-use order.
    pub tool_names_used: Vec<String>,
    /// Every tool call the model issued this turn.
    pub tool_calls: Vec<MessageToolCall>,
    pub iterations: u32,
}

pub struct AgentExecutor {
    model: ModelHandle,
    tools: ToolRegistry,
    system_prompt: String,
    max_iterations: u32,
    config_version: u64,
    built_at: DateTime<Utc>,
    event_bus: Option<Arc<EventBus>>,
}

impl AgentExecutor {
    pub fn new(model: ModelHandle, tools: ToolRegistry, system_prompt: impl Into<String>) -> Self {
        Self {
            model,
            tools,
            system_prompt: system_prompt.into(),
            max_iterations: 10,
            config_version: 0,
            built_at: Utc::now(),
            event_bus: None,
        }
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max.max(1);
        self
    }

    /// Record the tool-configuration version this executor reflects.
    pub fn with_config_version(mut self, version: u64) -> Self {
        self.config_version = version;
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn config_version(&self) -> u64 {
        self.config_version
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.names()
    }

    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }

    pub fn model(&self) -> &ModelHandle {
        &self.model
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }

    /// Answer `query` given the prior transcript.
    ///
    /// Only user and assistant turns of `history` are forwarded. Tool
    /// failures are reported back to the model; provider failures abort the
    /// turn.
    pub async fn respond(
        &self,
        query: &str,
        history: &[Message],
    ) -> Result<AgentReply, parlor_core::Error> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(&self.system_prompt));
        messages.extend(
            history
                .iter()
                .filter(|m| matches!(m.role, Role::User | Role::Assistant))
                .cloned(),
        );
        messages.push(Message::user(query));

        let definitions = self.tools.definitions();
        let mut tool_names_used: Vec<String> = Vec::new();
        let mut tool_calls: Vec<MessageToolCall> = Vec::new();

        for iteration in 1..=self.max_iterations {
            debug!(iteration, messages = messages.len(), "Agent iteration");

            let request = self.model.request(messages.clone(), definitions.clone());
            let response = self.model.provider.complete(request).await?;

            if let Some(usage) = &response.usage {
                self.publish(DomainEvent::ResponseGenerated {
                    model: response.model.clone(),
                    tokens_used: usage.total_tokens,
                    timestamp: Utc::now(),
                });
            }

            if response.message.tool_calls.is_empty() {
                info!(
                    iterations = iteration,
                    tools_used = tool_names_used.len(),
                    "Agent produced a reply"
                );
                return Ok(AgentReply {
                    content: response.message.content,
                    tool_names_used,
                    tool_calls,
                    iterations: iteration,
                });
            }

            let requested = response.message.tool_calls.clone();
            messages.push(response.message);

            for tc in requested {
                let call = ToolCall {
                    id: tc.id.clone(),
                    name: tc.name.clone(),
                    arguments: serde_json::from_str(&tc.arguments).unwrap_or_default(),
                };

                let start = std::time::Instant::now();
                let result = self.tools.execute(&call).await;
                let duration_ms = start.elapsed().as_millis() as u64;

                let (success, output) = match result {
                    Ok(r) => (r.success, r.output),
                    Err(e) => {
                        warn!(tool = %tc.name, error = %e, "Tool execution failed");
                        (false, format!("Error: {e}"))
                    }
                };

                self.publish(DomainEvent::ToolExecuted {
                    tool_name: tc.name.clone(),
                    success,
                    duration_ms,
                    timestamp: Utc::now(),
                });

                messages.push(Message::tool_result(&tc.id, output));
                if !tool_names_used.contains(&tc.name) {
                    tool_names_used.push(tc.name.clone());
                }
                tool_calls.push(tc);
            }
        }

        warn!(
            max_iterations = self.max_iterations,
            "Max tool iterations reached, returning fallback reply"
        );
        Ok(AgentReply {
            content: MAX_ITERATIONS_REPLY.into(),
            tool_names_used,
            tool_calls,
            iterations: self.max_iterations,
        })
    }
}

impl std::fmt::Debug for AgentExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentExecutor")
            .field("model", &self.model)
            .field("tools", &self.tools.names())
            .field("max_iterations", &self.max_iterations)
            .field("config_version", &self.config_version)
            .field("built_at", &self.built_at)
            .finish()
    }
}
