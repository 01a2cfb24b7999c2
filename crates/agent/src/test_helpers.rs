//! Shared test helpers for agent loop tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chartwise_core::capability::{
    CapabilityDescriptor, InvocationRequest, InvocationResult, ToolHandle,
};
use chartwise_core::error::ModelError;
use chartwise_core::model::{Decision, ModelClient, PromptContext};
use chartwise_mcp::ToolRegistry;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::agent_loop::{AgentLoop, RunOutcome};
use crate::stream_event::StreamEvent;
use crate::streamer::StepStreamer;

/// A decision service that replays scripted decisions in order.
///
/// Once the script is exhausted it returns `fallback`, or panics if there
/// is none.
pub struct ScriptedModel {
    script: Mutex<VecDeque<Result<Decision, ModelError>>>,
    fallback: Option<Decision>,
    delay: Option<Duration>,
    contexts: Mutex<Vec<PromptContext>>,
}

impl ScriptedModel {
    pub fn new(script: Vec<Result<Decision, ModelError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback: None,
            delay: None,
            contexts: Mutex::new(Vec::new()),
        })
    }

    /// Return the same decision forever.
    pub fn repeating(decision: Decision) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Some(decision),
            delay: None,
            contexts: Mutex::new(Vec::new()),
        })
    }

    /// Sleep before every decision.
    pub fn with_delay(self: Arc<Self>, delay: Duration) -> Arc<Self> {
        let mut model = Arc::into_inner(self).expect("model not yet shared");
        model.delay = Some(delay);
        Arc::new(model)
    }

    pub fn calls(&self) -> usize {
        self.contexts.lock().unwrap().len()
    }

    pub fn contexts(&self) -> Vec<PromptContext> {
        self.contexts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn decide(&self, context: &PromptContext) -> Result<Decision, ModelError> {
        self.contexts.lock().unwrap().push(context.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.script.lock().unwrap().pop_front();
        match (next, &self.fallback) {
            (Some(result), _) => result,
            (None, Some(decision)) => Ok(decision.clone()),
            (None, None) => panic!("ScriptedModel: no more decisions"),
        }
    }
}

/// A tool provider that returns queued results, then `"{capability} ok"`.
pub struct FakeTools {
    name: String,
    capabilities: Vec<CapabilityDescriptor>,
    results: Mutex<VecDeque<InvocationResult>>,
    invocations: Mutex<Vec<String>>,
    cancel_on_invoke: Option<CancellationToken>,
}

impl FakeTools {
    pub fn new(name: &str, tools: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            capabilities: tools
                .iter()
                .map(|t| CapabilityDescriptor {
                    name: (*t).into(),
                    description: format!("fake {t}"),
                    input_schema: serde_json::json!({
                        "type": "object",
                        "properties": {"stock_ticker": {"type": "string"}},
                        "required": ["stock_ticker"]
                    }),
                })
                .collect(),
            results: Mutex::new(VecDeque::new()),
            invocations: Mutex::new(Vec::new()),
            cancel_on_invoke: None,
        })
    }

    pub fn with_results(self: Arc<Self>, results: Vec<InvocationResult>) -> Arc<Self> {
        *self.results.lock().unwrap() = results.into();
        self
    }

    /// Cancel `token` from inside every invoke.
    pub fn cancelling(self: Arc<Self>, token: CancellationToken) -> Arc<Self> {
        let mut tools = Arc::into_inner(self).expect("tools not yet shared");
        tools.cancel_on_invoke = Some(token);
        Arc::new(tools)
    }

    pub fn invocations(&self) -> Vec<String> {
        self.invocations.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolHandle for FakeTools {
    fn server_name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &[CapabilityDescriptor] {
        &self.capabilities
    }

    async fn invoke(&self, request: &InvocationRequest) -> InvocationResult {
        self.invocations
            .lock()
            .unwrap()
            .push(request.capability.clone());
        if let Some(token) = &self.cancel_on_invoke {
            token.cancel();
        }
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| InvocationResult::success(format!("{} ok", request.capability)))
    }
}

pub fn act(thought: Option<&str>, capability: &str, args: serde_json::Value) -> Decision {
    Decision::Act {
        thought: thought.map(String::from),
        request: InvocationRequest::from_value(capability, args),
    }
}

pub fn registry_with(handles: Vec<Arc<FakeTools>>) -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    for handle in handles {
        registry.register_handle(handle).unwrap();
    }
    Arc::new(registry)
}

pub async fn collect(mut rx: mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

/// Run `prompt` while draining the stream concurrently.
pub async fn run_to_end(agent: &AgentLoop, prompt: &str) -> (RunOutcome, Vec<StreamEvent>) {
    let (mut streamer, rx) = StepStreamer::channel();
    let producer = async move {
        let outcome = agent.run(prompt, &mut streamer).await;
        drop(streamer);
        outcome
    };
    tokio::join!(producer, collect(rx))
}
