//! Chat-completion backed decision client.
//!
//! Replays the step history as assistant tool-call / tool-result message
//! pairs and turns the model's reply into a [`Decision`].

use std::sync::Arc;

use async_trait::async_trait;
use chartwise_core::capability::InvocationRequest;
use chartwise_core::error::ModelError;
use chartwise_core::message::{Message, MessageToolCall};
use chartwise_core::model::{Decision, ModelClient, PromptContext};
use chartwise_core::provider::{Provider, ProviderRequest};
use chartwise_core::step::ExecutionStep;
use tracing::{debug, warn};

/// Answer used when the model ends a run without any text.
const EMPTY_ANSWER: &str = "Done";

/// A [`ModelClient`] on top of any chat-completion [`Provider`].
pub struct ChatModelClient {
    provider: Arc<dyn Provider>,
    model: String,
    system_prompt: String,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl ChatModelClient {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            system_prompt: String::new(),
            temperature: 0.0,
            max_tokens: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Build the message list for one decide call.
    ///
    /// Call ids are derived from the call's position in the window, so they
    /// only need to be consistent within one request.
    fn build_messages(&self, context: &PromptContext) -> Vec<Message> {
        let mut messages = Vec::with_capacity(context.history.len() + 2);
        if !self.system_prompt.is_empty() {
            messages.push(Message::system(&self.system_prompt));
        }
        messages.push(Message::user(&context.prompt));

        let mut pending_thought: Option<&str> = None;
        let mut open_call: Option<String> = None;
        let mut call_index = 0usize;

        for step in &context.history {
            match step {
                ExecutionStep::Thought { text } => pending_thought = Some(text),
                ExecutionStep::ToolCall {
                    capability,
                    arguments,
                } => {
                    let id = format!("call_{call_index}");
                    call_index += 1;
                    messages.push(Message::assistant_tool_call(
                        pending_thought.take().unwrap_or_default(),
                        MessageToolCall {
                            id: id.clone(),
                            name: capability.clone(),
                            arguments: serde_json::Value::Object(arguments.clone()).to_string(),
                        },
                    ));
                    open_call = Some(id);
                }
                ExecutionStep::Observation { result } => {
                    if let Some(id) = open_call.take() {
                        messages.push(Message::tool_result(id, result.render()));
                    }
                }
                ExecutionStep::Final { .. } | ExecutionStep::Failure { .. } => {}
            }
        }

        messages
    }

    /// Read tool-call arguments; the error text is handed back to the model.
    fn parse_arguments(
        name: &str,
        raw: &str,
    ) -> Result<serde_json::Map<String, serde_json::Value>, String> {
        if raw.trim().is_empty() {
            return Ok(serde_json::Map::new());
        }
        match serde_json::from_str(raw) {
            Ok(serde_json::Value::Object(map)) => Ok(map),
            Ok(other) => Err(format!(
                "arguments for '{name}' must be a JSON object, got {other}"
            )),
            Err(e) => Err(format!("arguments for '{name}' are not valid JSON: {e}")),
        }
    }
}

#[async_trait]
impl ModelClient for ChatModelClient {
    fn name(&self) -> &str {
        self.provider.name()
    }

    async fn decide(&self, context: &PromptContext) -> Result<Decision, ModelError> {
        let request = ProviderRequest {
            model: self.model.clone(),
            messages: self.build_messages(context),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            tools: context
                .capabilities
                .iter()
                .map(|c| c.to_definition())
                .collect(),
        };

        let response = self.provider.complete(request).await?;
        let message = response.message;
        debug!(
            model = %response.model,
            tool_calls = message.tool_calls.len(),
            "Decision received"
        );

        let mut calls = message.tool_calls.into_iter();
        let Some(call) = calls.next() else {
            let answer = message.content.trim();
            let answer = if answer.is_empty() { EMPTY_ANSWER } else { answer };
            return Ok(Decision::Answer(answer.to_string()));
        };

        let ignored = calls.count();
        if ignored > 0 {
            warn!(
                tool = %call.name,
                ignored,
                "Model returned several tool calls, using the first"
            );
        }

        let thought = Some(message.content.trim())
            .filter(|t| !t.is_empty())
            .map(String::from);

        match Self::parse_arguments(&call.name, &call.arguments) {
            Ok(arguments) => Ok(Decision::Act {
                thought,
                request: InvocationRequest::new(call.name, arguments),
            }),
            Err(reason) => {
                warn!(tool = %call.name, %reason, "Model sent unreadable tool arguments");
                Ok(Decision::Rejected {
                    thought,
                    capability: call.name,
                    raw_arguments: call.arguments,
                    reason,
                })
            }
        }
    }
}
