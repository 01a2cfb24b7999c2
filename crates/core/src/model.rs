//! ModelClient trait — the decision service seen by the agent loop.
//!
//! Given the original prompt, the available capabilities and the prior step
//! history, a ModelClient answers with either one capability invocation or a
//! final answer. Implementations are single-shot: no retries here.

use async_trait::async_trait;

use crate::capability::{CapabilityDescriptor, InvocationRequest};
use crate::error::ModelError;
use crate::step::ExecutionStep;

/// What the decision service wants to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Call a capability, optionally explaining why.
    Act {
        thought: Option<String>,
        request: InvocationRequest,
    },

    /// A call was requested but its arguments could not be read. The loop
    /// reports `reason` back as a failed observation.
    Rejected {
        thought: Option<String>,
        capability: String,
        raw_arguments: String,
        reason: String,
    },

    /// Stop and return this answer.
    Answer(String),
}

/// Everything the decision service sees for one decide call.
#[derive(Debug, Clone)]
pub struct PromptContext {
    pub prompt: String,
    pub capabilities: Vec<CapabilityDescriptor>,
    pub history: Vec<ExecutionStep>,
}

impl PromptContext {
    /// Build a context holding at most the last `history_limit` steps.
    ///
    /// The retained window never begins with an Observation whose ToolCall
    /// was cut off.
    pub fn new(
        prompt: impl Into<String>,
        capabilities: Vec<CapabilityDescriptor>,
        history: &[ExecutionStep],
        history_limit: usize,
    ) -> Self {
        let start = history.len().saturating_sub(history_limit);
        let mut window = &history[start..];
        while let Some(ExecutionStep::Observation { .. }) = window.first() {
            window = &window[1..];
        }

        Self {
            prompt: prompt.into(),
            capabilities,
            history: window.to_vec(),
        }
    }
}

/// The decision service.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Decide the next action.
    async fn decide(&self, context: &PromptContext) -> Result<Decision, ModelError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::InvocationResult;

    fn call(name: &str) -> ExecutionStep {
        ExecutionStep::ToolCall {
            capability: name.into(),
            arguments: serde_json::Map::new(),
        }
    }

    fn obs(text: &str) -> ExecutionStep {
        ExecutionStep::Observation {
            result: InvocationResult::success(text),
        }
    }

    #[test]
    fn keeps_full_history_under_limit() {
        let history = vec![call("trend"), obs("up")];
        let ctx = PromptContext::new("q", vec![], &history, 10);
        assert_eq!(ctx.history.len(), 2);
        assert_eq!(ctx.prompt, "q");
    }

    #[test]
    fn trims_to_limit_without_orphan_observation() {
        let history = vec![call("trend"), obs("up"), call("momentum"), obs("neutral")];
        // Last 3 would start with obs("up"), which must be dropped.
        let ctx = PromptContext::new("q", vec![], &history, 3);
        assert_eq!(ctx.history, vec![call("momentum"), obs("neutral")]);
    }

    #[test]
    fn zero_limit_keeps_nothing() {
        let history = vec![call("trend"), obs("up")];
        let ctx = PromptContext::new("q", vec![], &history, 0);
        assert!(ctx.history.is_empty());
    }
}
