//! Shared test doubles for the agent crate.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use parlor_core::error::{ProviderError, ToolError};
use parlor_core::message::{Message, MessageToolCall};
use parlor_core::provider::{ModelHandle, Provider, ProviderRequest, ProviderResponse, Usage};
use parlor_core::retrieval::{KnownSource, RetrievedChunk, Retriever, SourceRegistry};
use parlor_core::tool::{Tool, ToolResult};
use parlor_tools::{CredentialPolicy, NamedServer, RemoteToolSource, ToolProvisioner};
use tokio::sync::Notify;

use crate::executor::AgentExecutor;
use crate::factory::{AgentFactory, DefaultAgentFactory};

/// Returns scripted responses in order and records every request.
pub struct SequentialMockProvider {
    responses: Mutex<Vec<ProviderResponse>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl SequentialMockProvider {
    pub fn new(responses: Vec<ProviderResponse>) -> Self {
        Self {
            responses: Mutex::new(responses),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn single_text(text: &str) -> Self {
        Self::new(vec![make_text_response(text)])
    }

    pub fn tool_then_answer(tool_calls: Vec<MessageToolCall>, answer: &str) -> Self {
        Self::new(vec![
            make_tool_call_response(tool_calls),
            make_text_response(answer),
        ])
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let index = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len() - 1
        };
        self.responses
            .lock()
            .unwrap()
            .get(index)
            .cloned()
            .ok_or_else(|| ProviderError::InvalidResponse(format!("no scripted response #{index}")))
    }
}

pub fn make_text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
    }
}

pub fn make_tool_call_response(tool_calls: Vec<MessageToolCall>) -> ProviderResponse {
    let mut message = Message::assistant("");
    message.tool_calls = tool_calls;
    ProviderResponse {
        message,
        usage: None,
        model: "mock-model".into(),
    }
}

pub fn tool_call(id: &str, name: &str, arguments: &str) -> MessageToolCall {
    MessageToolCall {
        id: id.into(),
        name: name.into(),
        arguments: arguments.into(),
    }
}

pub fn mock_model() -> ModelHandle {
    ModelHandle::new(Arc::new(SequentialMockProvider::new(vec![])), "mock-model")
}

pub struct EchoTool {
    name: String,
}

impl EchoTool {
    pub fn named(name: &str) -> Arc<dyn Tool> {
        Arc::new(Self { name: name.into() })
    }
}

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        &self.name
    }
    fn description(&self) -> &str {
        "Echoes the text argument"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": { "text": { "type": "string" } } })
    }
    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        Ok(ToolResult::ok(arguments["text"].as_str().unwrap_or_default()))
    }
}

pub struct FailingTool {
    name: String,
}

impl FailingTool {
    pub fn named(name: &str) -> Arc<dyn Tool> {
        Arc::new(Self { name: name.into() })
    }
}

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        &self.name
    }
    fn description(&self) -> &str {
        "Always fails"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object" })
    }
    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        Err(ToolError::ExecutionFailed {
            tool_name: self.name.clone(),
            reason: "backend down".into(),
        })
    }
}

/// Remote source returning one `<server>_search` tool per server.
///
/// Records each batch, can be slowed down, and can be held at a gate until
/// the test releases it.
#[derive(Default)]
pub struct StubRemote {
    pub batches: Mutex<Vec<Vec<String>>>,
    pub delay: Option<Duration>,
    pub gate: Option<(Arc<Notify>, Arc<Notify>)>,
}

impl StubRemote {
    pub fn batch_count(&self) -> usize {
        self.batches.lock().unwrap().len()
    }
}

#[async_trait]
impl RemoteToolSource for StubRemote {
    async fn fetch_tools(&self, servers: &[NamedServer]) -> Result<Vec<Arc<dyn Tool>>, ToolError> {
        self.batches
            .lock()
            .unwrap()
            .push(servers.iter().map(|s| s.name.clone()).collect());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some((entered, release)) = &self.gate {
            entered.notify_one();
            release.notified().await;
        }
        Ok(servers
            .iter()
            .map(|s| EchoTool::named(&format!("{}_search", s.name)))
            .collect())
    }
}

#[derive(Default)]
pub struct StubSources {
    pub sources: Vec<KnownSource>,
    pub loads: AtomicUsize,
}

impl StubSources {
    pub fn new(sources: Vec<KnownSource>) -> Self {
        Self {
            sources,
            loads: AtomicUsize::new(0),
        }
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceRegistry for StubSources {
    async fn load(&self) -> Result<Vec<KnownSource>, ToolError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.sources.clone())
    }
}

pub struct NoHits;

#[async_trait]
impl Retriever for NoHits {
    async fn search(
        &self,
        _query: &str,
        _model: &ModelHandle,
        _namespace: &str,
    ) -> Result<Vec<RetrievedChunk>, ToolError> {
        Ok(vec![])
    }
}

pub fn provisioner(remote: Arc<StubRemote>, sources: Arc<StubSources>) -> Arc<ToolProvisioner> {
    Arc::new(ToolProvisioner::new(
        CredentialPolicy::default(),
        remote,
        sources,
        Arc::new(NoHits),
    ))
}

/// `DefaultAgentFactory` that counts successful builds.
pub struct CountingFactory {
    inner: DefaultAgentFactory,
    pub builds: AtomicUsize,
}

impl CountingFactory {
    pub fn new() -> Self {
        Self {
            inner: DefaultAgentFactory::new("test prompt", 5),
            builds: AtomicUsize::new(0),
        }
    }

    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

impl AgentFactory for CountingFactory {
    fn build(
        &self,
        model: Option<&ModelHandle>,
        tools: Vec<Arc<dyn Tool>>,
        config_version: u64,
    ) -> Option<AgentExecutor> {
        let built = self.inner.build(model, tools, config_version);
        if built.is_some() {
            self.builds.fetch_add(1, Ordering::SeqCst);
        }
        built
    }
}
