//! The Chartwise agent loop.
//!
//! A run alternates **Decide → Act → Observe** until the decision service
//! answers, a failure occurs, or the step budget runs out:
//!
//! 1. **Decide**: ask the [`ModelClient`](chartwise_core::model::ModelClient)
//!    for the next action given the prompt, capabilities and step history
//! 2. **Act**: invoke the chosen capability through the
//!    [`ToolRegistry`](chartwise_mcp::ToolRegistry)
//! 3. **Observe**: record the result and go back to deciding
//!
//! Every transition is emitted as an [`ExecutionStep`](chartwise_core::step::ExecutionStep)
//! through a [`StepStreamer`], which the gateway turns into NDJSON.

pub mod agent_loop;
pub mod stream_event;
pub mod streamer;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use agent_loop::{AgentLoop, RunOutcome};
pub use stream_event::StreamEvent;
pub use streamer::{StepStreamer, StreamError};
