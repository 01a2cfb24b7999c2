//! Execution steps — the observable transitions of one agent run.

use crate::capability::InvocationResult;

/// One transition of the reasoning/acting loop.
///
/// Steps are immutable once emitted; their order is the order they were
/// produced and is preserved all the way to the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionStep {
    /// Reasoning text that accompanied a decision.
    Thought { text: String },

    /// A capability invocation was issued.
    ToolCall {
        capability: String,
        arguments: serde_json::Map<String, serde_json::Value>,
    },

    /// The result of the preceding tool call.
    Observation { result: InvocationResult },

    /// Terminal success.
    Final { answer: String },

    /// Terminal failure.
    Failure { reason: String },
}

impl ExecutionStep {
    pub fn thought(text: impl Into<String>) -> Self {
        Self::Thought { text: text.into() }
    }

    pub fn final_answer(answer: impl Into<String>) -> Self {
        Self::Final {
            answer: answer.into(),
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self::Failure {
            reason: reason.into(),
        }
    }

    /// Whether this step ends a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Final { .. } | Self::Failure { .. })
    }

    /// Short name of the variant, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Thought { .. } => "thought",
            Self::ToolCall { .. } => "tool_call",
            Self::Observation { .. } => "observation",
            Self::Final { .. } => "final",
            Self::Failure { .. } => "failure",
        }
    }
}
