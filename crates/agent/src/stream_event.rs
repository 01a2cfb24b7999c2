//! Wire encoding of execution steps.
//!
//! `StreamEvent` is what the gateway writes to clients, one JSON object per
//! line. Each event maps to exactly one [`ExecutionStep`] and back.

use chartwise_core::capability::InvocationResult;
use chartwise_core::step::ExecutionStep;
use serde::{Deserialize, Serialize};

/// Events written to the NDJSON response body.
///
/// - `thought`     — reasoning text from a decision step
/// - `tool_call`   — a capability invocation was issued
/// - `observation` — the tool result (`is_error` marks failures)
/// - `final`       — terminal success
/// - `error`       — terminal failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Thought {
        content: String,
    },

    ToolCall {
        tool: String,
        args: serde_json::Map<String, serde_json::Value>,
    },

    Observation {
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },

    Final {
        content: String,
    },

    Error {
        content: String,
    },
}

impl StreamEvent {
    /// Wire name of this event.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Thought { .. } => "thought",
            Self::ToolCall { .. } => "tool_call",
            Self::Observation { .. } => "observation",
            Self::Final { .. } => "final",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Final { .. } | Self::Error { .. })
    }

    /// One JSON object followed by `\n`.
    pub fn to_ndjson_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    pub fn from_ndjson_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line.trim_end())
    }
}

impl From<ExecutionStep> for StreamEvent {
    fn from(step: ExecutionStep) -> Self {
        match step {
            ExecutionStep::Thought { text } => Self::Thought { content: text },
            ExecutionStep::ToolCall {
                capability,
                arguments,
            } => Self::ToolCall {
                tool: capability,
                args: arguments,
            },
            ExecutionStep::Observation { result } => match result {
                InvocationResult::Success { content } => Self::Observation {
                    content,
                    is_error: false,
                },
                InvocationResult::Failure { reason } => Self::Observation {
                    content: reason,
                    is_error: true,
                },
            },
            ExecutionStep::Final { answer } => Self::Final { content: answer },
            ExecutionStep::Failure { reason } => Self::Error { content: reason },
        }
    }
}

impl From<StreamEvent> for ExecutionStep {
    fn from(event: StreamEvent) -> Self {
        match event {
            StreamEvent::Thought { content } => Self::Thought { text: content },
            StreamEvent::ToolCall { tool, args } => Self::ToolCall {
                capability: tool,
                arguments: args,
            },
            StreamEvent::Observation { content, is_error } => Self::Observation {
                result: if is_error {
                    InvocationResult::Failure { reason: content }
                } else {
                    InvocationResult::Success { content }
                },
            },
            StreamEvent::Final { content } => Self::Final { answer: content },
            StreamEvent::Error { content } => Self::Failure { reason: content },
        }
    }
}
