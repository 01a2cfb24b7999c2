//! The agent loop: a bounded state machine over decide, invoke and emit.

use std::sync::Arc;
use std::time::Duration;

use chartwise_core::capability::{InvocationRequest, InvocationResult};
use chartwise_core::model::{Decision, ModelClient, PromptContext};
use chartwise_core::step::ExecutionStep;
use chartwise_mcp::ToolRegistry;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::streamer::StepStreamer;

/// Upper bound on delivering the closing error of a cancelled run.
const CANCEL_NOTICE_TIMEOUT: Duration = Duration::from_millis(500);

/// How a run ended. `steps` counts decide calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed { answer: String, steps: usize },
    Failed { reason: String, steps: usize },
    Cancelled { steps: usize },
}

impl RunOutcome {
    pub fn steps(&self) -> usize {
        match self {
            Self::Completed { steps, .. } | Self::Failed { steps, .. } | Self::Cancelled { steps } => {
                *steps
            }
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// The consumer went away or the run was cancelled.
struct Halted;

/// Mutable state of a single run.
struct RunState<'s> {
    streamer: &'s mut StepStreamer,
    history: Vec<ExecutionStep>,
    decisions: usize,
}

/// Drives one prompt to a terminal step.
pub struct AgentLoop {
    model: Arc<dyn ModelClient>,
    registry: Arc<ToolRegistry>,
    max_steps: usize,
    decide_timeout: Duration,
    history_limit: usize,
    cancel: CancellationToken,
}

impl AgentLoop {
    pub fn new(model: Arc<dyn ModelClient>, registry: Arc<ToolRegistry>) -> Self {
        Self {
            model,
            registry,
            max_steps: 10,
            decide_timeout: Duration::from_secs(60),
            history_limit: 20,
            cancel: CancellationToken::new(),
        }
    }

    /// Maximum number of decide calls per run.
    pub fn with_max_steps(mut self, max: usize) -> Self {
        self.max_steps = max;
        self
    }

    pub fn with_decide_timeout(mut self, timeout: Duration) -> Self {
        self.decide_timeout = timeout;
        self
    }

    /// Number of trailing steps replayed to the decision service.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Run `prompt` until it completes, fails or is cancelled.
    ///
    /// Exactly one terminal step is emitted unless the consumer went away.
    /// A cancelled run with a connected consumer ends with a
    /// `run cancelled` error.
    pub async fn run(&self, prompt: &str, streamer: &mut StepStreamer) -> RunOutcome {
        let run_id = Uuid::new_v4();
        let mut state = RunState {
            streamer,
            history: Vec::new(),
            decisions: 0,
        };

        let outcome = self
            .drive(prompt, &mut state)
            .instrument(info_span!("agent_run", run_id = %run_id))
            .await;

        match outcome {
            Ok(outcome) => outcome,
            Err(Halted) => {
                info!(run_id = %run_id, steps = state.decisions, "Agent run cancelled");
                notify_cancelled(state.streamer).await;
                RunOutcome::Cancelled {
                    steps: state.decisions,
                }
            }
        }
    }

    async fn drive(&self, prompt: &str, state: &mut RunState<'_>) -> Result<RunOutcome, Halted> {
        info!(
            model = %self.model.name(),
            max_steps = self.max_steps,
            capabilities = self.registry.len(),
            "Agent run starting"
        );

        loop {
            self.check(state)?;

            if state.decisions >= self.max_steps {
                warn!("Agent: step budget exhausted ({})", self.max_steps);
                let reason = format!(
                    "step budget of {} decision steps exceeded",
                    self.max_steps
                );
                return self.fail(state, reason).await;
            }

            state.decisions += 1;
            debug!(step = state.decisions, "Deciding");

            let context = PromptContext::new(
                prompt,
                self.registry.definitions().to_vec(),
                &state.history,
                self.history_limit,
            );

            let decision =
                match tokio::time::timeout(self.decide_timeout, self.model.decide(&context)).await
                {
                    Ok(Ok(decision)) => decision,
                    Ok(Err(e)) => {
                        warn!(error = %e, "Decision failed");
                        return self.fail(state, e.to_string()).await;
                    }
                    Err(_) => {
                        warn!(timeout = ?self.decide_timeout, "Decision timed out");
                        let reason = format!("decision timed out after {:?}", self.decide_timeout);
                        return self.fail(state, reason).await;
                    }
                };

            let (thought, request, rejected) = match decision {
                Decision::Answer(answer) => {
                    self.emit(state, ExecutionStep::final_answer(answer.clone()))
                        .await?;
                    info!(steps = state.decisions, "Agent run completed");
                    return Ok(RunOutcome::Completed {
                        answer,
                        steps: state.decisions,
                    });
                }
                Decision::Act { thought, request } => (thought, request, None),
                Decision::Rejected {
                    thought,
                    capability,
                    raw_arguments,
                    reason,
                } => {
                    let request = InvocationRequest::new(capability, raw_argument_map(raw_arguments));
                    (thought, request, Some(InvocationResult::failure(reason)))
                }
            };

            if let Some(text) = thought.filter(|t| !t.trim().is_empty()) {
                self.emit(state, ExecutionStep::thought(text)).await?;
            }
            self.emit(
                state,
                ExecutionStep::ToolCall {
                    capability: request.capability.clone(),
                    arguments: request.arguments.clone(),
                },
            )
            .await?;

            self.check(state)?;

            let result = match rejected {
                Some(result) => result,
                None => self.invoke(&request).await,
            };
            debug!(
                capability = %request.capability,
                success = result.is_success(),
                "Capability returned"
            );

            self.emit(state, ExecutionStep::Observation { result }).await?;
        }
    }

    async fn invoke(&self, request: &InvocationRequest) -> InvocationResult {
        debug!(capability = %request.capability, "Invoking capability");
        match self.registry.invoke(request).await {
            Ok(result) => result,
            Err(e) => {
                warn!(capability = %request.capability, error = %e, "Capability not resolvable");
                InvocationResult::failure(e.to_string())
            }
        }
    }

    async fn fail(&self, state: &mut RunState<'_>, reason: String) -> Result<RunOutcome, Halted> {
        self.emit(state, ExecutionStep::failure(reason.clone()))
            .await?;
        Ok(RunOutcome::Failed {
            reason,
            steps: state.decisions,
        })
    }

    fn check(&self, state: &RunState<'_>) -> Result<(), Halted> {
        if self.cancel.is_cancelled() || state.streamer.is_closed() {
            return Err(Halted);
        }
        Ok(())
    }

    /// Emit one step and, if it is not terminal, append it to the history.
    async fn emit(&self, state: &mut RunState<'_>, step: ExecutionStep) -> Result<(), Halted> {
        if self.cancel.is_cancelled() {
            return Err(Halted);
        }

        let kept = (!step.is_terminal()).then(|| step.clone());
        let kind = step.kind();

        let sent = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(Halted),
            sent = state.streamer.emit(step) => sent,
        };
        if let Err(e) = sent {
            debug!(step = kind, error = %e, "Step not delivered");
            return Err(Halted);
        }

        if let Some(step) = kept {
            state.history.push(step);
        }
        Ok(())
    }
}

/// Unparseable arguments travel on the wire as `{"raw": "<text>"}`.
fn raw_argument_map(raw: String) -> serde_json::Map<String, serde_json::Value> {
    let mut arguments = serde_json::Map::new();
    arguments.insert("raw".into(), serde_json::Value::String(raw));
    arguments
}

/// Close a cancelled run's stream with an error if anyone is still reading.
async fn notify_cancelled(streamer: &mut StepStreamer) {
    if streamer.is_closed() || streamer.is_terminated() {
        return;
    }
    let sent = tokio::time::timeout(
        CANCEL_NOTICE_TIMEOUT,
        streamer.emit(ExecutionStep::failure("run cancelled")),
    )
    .await;
    if !matches!(sent, Ok(Ok(()))) {
        debug!("Cancellation notice not delivered");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream_event::StreamEvent;
    use crate::test_helpers::*;
    use chartwise_core::error::ModelError;
    use serde_json::json;

    fn aapl() -> serde_json::Map<String, serde_json::Value> {
        let mut args = serde_json::Map::new();
        args.insert("stock_ticker".into(), json!("AAPL"));
        args
    }

    #[tokio::test]
    async fn trend_question_streams_the_full_cycle() {
        let model = ScriptedModel::new(vec![
            Ok(act(Some("I should check the trend."), "trend", json!({"stock_ticker": "AAPL"}))),
            Ok(Decision::Answer("Done".into())),
        ]);
        let tools = FakeTools::new("ta", &["trend", "momentum", "volatility"])
            .with_results(vec![InvocationResult::success("AAPL Trend: Strong Uptrend")]);
        let agent = AgentLoop::new(model.clone(), registry_with(vec![tools.clone()]));

        let (outcome, events) = run_to_end(&agent, "What is the trend for AAPL?").await;

        assert_eq!(
            events,
            vec![
                StreamEvent::Thought {
                    content: "I should check the trend.".into()
                },
                StreamEvent::ToolCall {
                    tool: "trend".into(),
                    args: aapl(),
                },
                StreamEvent::Observation {
                    content: "AAPL Trend: Strong Uptrend".into(),
                    is_error: false,
                },
                StreamEvent::Final {
                    content: "Done".into()
                },
            ]
        );
        assert_eq!(
            outcome,
            RunOutcome::Completed {
                answer: "Done".into(),
                steps: 2
            }
        );
        assert_eq!(tools.invocations(), vec!["trend".to_string()]);
    }

    #[tokio::test]
    async fn crashed_tool_is_observed_and_the_run_continues() {
        let model = ScriptedModel::new(vec![
            Ok(act(None, "trend", json!({"stock_ticker": "AAPL"}))),
            Ok(Decision::Answer("The trend tool is unavailable.".into())),
        ]);
        let tools = FakeTools::new("ta", &["trend"]).with_results(vec![InvocationResult::failure(
            "tool server 'ta' crashed while running 'trend': stream closed",
        )]);
        let agent = AgentLoop::new(model.clone(), registry_with(vec![tools]));

        let (outcome, events) = run_to_end(&agent, "trend for AAPL").await;

        assert_eq!(events.len(), 3);
        assert_eq!(events[0].event_type(), "tool_call");
        assert!(matches!(
            &events[1],
            StreamEvent::Observation { is_error: true, content } if content.contains("crashed")
        ));
        assert_eq!(events[2].event_type(), "final");
        assert!(outcome.is_completed());

        // The failure was replayed to the second decision.
        let contexts = model.contexts();
        assert_eq!(contexts.len(), 2);
        assert!(matches!(
            contexts[1].history.last(),
            Some(ExecutionStep::Observation { result }) if !result.is_success()
        ));
    }

    #[tokio::test]
    async fn model_failure_is_a_single_error_event() {
        let model = ScriptedModel::new(vec![Err(ModelError::AuthenticationFailed(
            "invalid api key".into(),
        ))]);
        let agent = AgentLoop::new(model, registry_with(vec![FakeTools::new("ta", &["trend"])]));

        let (outcome, events) = run_to_end(&agent, "trend for AAPL").await;

        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            StreamEvent::Error { content } if content.contains("Authentication failed")
        ));
        assert!(matches!(outcome, RunOutcome::Failed { steps: 1, .. }));
    }

    #[tokio::test]
    async fn step_budget_ends_with_an_error() {
        let model = ScriptedModel::repeating(act(
            Some("Let me check again."),
            "trend",
            json!({"stock_ticker": "AAPL"}),
        ));
        let agent = AgentLoop::new(model.clone(), registry_with(vec![FakeTools::new("ta", &["trend"])]))
            .with_max_steps(3);

        let (outcome, events) = run_to_end(&agent, "loop forever").await;

        assert_eq!(model.calls(), 3);
        assert_eq!(events.len(), 3 * 3 + 1);
        assert_eq!(
            events.last(),
            Some(&StreamEvent::Error {
                content: "step budget of 3 decision steps exceeded".into()
            })
        );
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert_eq!(
            outcome,
            RunOutcome::Failed {
                reason: "step budget of 3 decision steps exceeded".into(),
                steps: 3
            }
        );
    }

    #[tokio::test]
    async fn unknown_capability_becomes_a_failed_observation() {
        let model = ScriptedModel::new(vec![
            Ok(act(None, "fundamentals", json!({"stock_ticker": "AAPL"}))),
            Ok(Decision::Answer("Done".into())),
        ]);
        let agent = AgentLoop::new(model, registry_with(vec![FakeTools::new("ta", &["trend"])]));

        let (_, events) = run_to_end(&agent, "fundamentals for AAPL").await;

        assert!(matches!(
            &events[1],
            StreamEvent::Observation { is_error: true, content } if content.contains("fundamentals")
        ));
        assert_eq!(events.last().map(|e| e.event_type()), Some("final"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_decision_times_out() {
        let model = ScriptedModel::new(vec![Ok(Decision::Answer("too late".into()))])
            .with_delay(Duration::from_secs(120));
        let agent = AgentLoop::new(model, registry_with(vec![]))
            .with_decide_timeout(Duration::from_secs(60));

        let (outcome, events) = run_to_end(&agent, "anything").await;

        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            StreamEvent::Error { content } if content.contains("timed out")
        ));
        assert!(matches!(outcome, RunOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn blank_thought_is_not_emitted() {
        let model = ScriptedModel::new(vec![
            Ok(act(Some("   "), "trend", json!({"stock_ticker": "MSFT"}))),
            Ok(Decision::Answer("Done".into())),
        ]);
        let agent = AgentLoop::new(model, registry_with(vec![FakeTools::new("ta", &["trend"])]));

        let (_, events) = run_to_end(&agent, "trend for MSFT").await;

        let kinds: Vec<&str> = events.iter().map(|e| e.event_type()).collect();
        assert_eq!(kinds, vec!["tool_call", "observation", "final"]);
    }

    #[tokio::test]
    async fn history_window_is_bounded() {
        let model = ScriptedModel::new(vec![
            Ok(act(Some("first"), "trend", json!({"stock_ticker": "AAPL"}))),
            Ok(act(Some("second"), "momentum", json!({"stock_ticker": "AAPL"}))),
            Ok(Decision::Answer("Done".into())),
        ]);
        let tools = FakeTools::new("ta", &["trend", "momentum"]);
        let agent = AgentLoop::new(model.clone(), registry_with(vec![tools])).with_history_limit(2);

        run_to_end(&agent, "trend and momentum for AAPL").await;

        let contexts = model.contexts();
        assert!(contexts[0].history.is_empty());
        let last = &contexts[2].history;
        assert_eq!(last.len(), 2);
        assert!(matches!(
            &last[0],
            ExecutionStep::ToolCall { capability, .. } if capability == "momentum"
        ));
        assert_eq!(contexts[2].capabilities.len(), 2);
    }

    #[tokio::test]
    async fn unreadable_arguments_are_observed_and_the_run_continues() {
        let model = ScriptedModel::new(vec![
            Ok(Decision::Rejected {
                thought: Some("Checking the trend.".into()),
                capability: "trend".into(),
                raw_arguments: r#"{"stock_ticker": AAPL"#.into(),
                reason: "arguments for 'trend' are not valid JSON: expected value at line 1 column 18"
                    .into(),
            }),
            Ok(act(None, "trend", json!({"stock_ticker": "AAPL"}))),
            Ok(Decision::Answer("Done".into())),
        ]);
        let tools = FakeTools::new("ta", &["trend"]);
        let agent = AgentLoop::new(model.clone(), registry_with(vec![tools.clone()]));

        let (outcome, events) = run_to_end(&agent, "trend for AAPL").await;

        let kinds: Vec<&str> = events.iter().map(|e| e.event_type()).collect();
        assert_eq!(
            kinds,
            vec!["thought", "tool_call", "observation", "tool_call", "observation", "final"]
        );
        assert_eq!(
            events[1],
            StreamEvent::ToolCall {
                tool: "trend".into(),
                args: json!({"raw": r#"{"stock_ticker": AAPL"#}).as_object().cloned().unwrap(),
            }
        );
        assert!(matches!(
            &events[2],
            StreamEvent::Observation { is_error: true, content } if content.contains("not valid JSON")
        ));
        assert!(outcome.is_completed());

        // Only the well-formed call reached the tool server.
        assert_eq!(tools.invocations(), vec!["trend".to_string()]);
        let contexts = model.contexts();
        assert!(matches!(
            contexts[1].history.last(),
            Some(ExecutionStep::Observation { result }) if !result.is_success()
        ));
    }

    #[tokio::test]
    async fn cancelled_before_start_only_reports_the_cancellation() {
        let model = ScriptedModel::new(vec![Ok(Decision::Answer("Done".into()))]);
        let token = CancellationToken::new();
        token.cancel();
        let agent = AgentLoop::new(model.clone(), registry_with(vec![])).with_cancellation(token);

        let (outcome, events) = run_to_end(&agent, "anything").await;

        assert_eq!(
            events,
            vec![StreamEvent::Error {
                content: "run cancelled".into()
            }]
        );
        assert_eq!(outcome, RunOutcome::Cancelled { steps: 0 });
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn cancellation_during_invoke_ends_with_an_error() {
        let token = CancellationToken::new();
        let model = ScriptedModel::repeating(act(None, "trend", json!({"stock_ticker": "AAPL"})));
        let tools = FakeTools::new("ta", &["trend"]).cancelling(token.clone());
        let agent = AgentLoop::new(model.clone(), registry_with(vec![tools]))
            .with_cancellation(token);

        let (outcome, events) = run_to_end(&agent, "trend for AAPL").await;

        let kinds: Vec<&str> = events.iter().map(|e| e.event_type()).collect();
        assert_eq!(kinds, vec!["tool_call", "error"]);
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert_eq!(outcome, RunOutcome::Cancelled { steps: 1 });
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_consumer_does_not_block_a_cancelled_run() {
        let token = CancellationToken::new();
        token.cancel();
        let model = ScriptedModel::new(vec![]);
        let agent = AgentLoop::new(model, registry_with(vec![])).with_cancellation(token);

        let (mut streamer, _rx) = StepStreamer::channel();
        // Fill the single slot so the cancellation notice cannot be delivered.
        streamer.emit(ExecutionStep::thought("pending")).await.unwrap();

        let outcome = agent.run("anything", &mut streamer).await;

        assert_eq!(outcome, RunOutcome::Cancelled { steps: 0 });
        assert!(!streamer.is_terminated());
    }

    #[tokio::test]
    async fn departed_consumer_cancels_the_run() {
        let model = ScriptedModel::new(vec![Ok(Decision::Answer("Done".into()))]);
        let agent = AgentLoop::new(model.clone(), registry_with(vec![]));

        let (mut streamer, rx) = StepStreamer::channel();
        drop(rx);
        let outcome = agent.run("anything", &mut streamer).await;

        assert_eq!(outcome, RunOutcome::Cancelled { steps: 0 });
        assert_eq!(model.calls(), 0);
        assert_eq!(streamer.emitted(), 0);
    }
}
