//! Shared test helpers for gateway tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chartwise_agent::{RunOutcome, StepStreamer, StreamEvent};
use chartwise_core::error::ModelError;
use chartwise_core::model::{Decision, ModelClient, PromptContext};
use tokio_util::sync::CancellationToken;

use crate::runtime::ChatRuntime;

/// Returns scripted decisions in order; panics once they run out.
pub struct ScriptedModel {
    decisions: Mutex<VecDeque<Decision>>,
    calls: Mutex<usize>,
}

impl ScriptedModel {
    pub fn new(decisions: Vec<Decision>) -> Arc<Self> {
        Arc::new(Self {
            decisions: Mutex::new(decisions.into()),
            calls: Mutex::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn decide(&self, _context: &PromptContext) -> Result<Decision, ModelError> {
        *self.calls.lock().unwrap() += 1;
        let next = self.decisions.lock().unwrap().pop_front();
        Ok(next.expect("ScriptedModel: no more decisions"))
    }
}

/// Fails every decision with the same error.
pub struct FailingModel {
    error: ModelError,
}

impl FailingModel {
    pub fn new(error: ModelError) -> Arc<Self> {
        Arc::new(Self { error })
    }
}

#[async_trait]
impl ModelClient for FailingModel {
    fn name(&self) -> &str {
        "failing"
    }

    async fn decide(&self, _context: &PromptContext) -> Result<Decision, ModelError> {
        Err(self.error.clone())
    }
}

/// Plays `decisions` in order and cancels `token` when they run out, as a
/// host shutdown arriving mid-run would.
pub struct ShutdownModel {
    decisions: Mutex<VecDeque<Decision>>,
    token: CancellationToken,
}

impl ShutdownModel {
    pub fn new(decisions: Vec<Decision>, token: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            decisions: Mutex::new(decisions.into()),
            token,
        })
    }
}

#[async_trait]
impl ModelClient for ShutdownModel {
    fn name(&self) -> &str {
        "shutdown"
    }

    async fn decide(&self, _context: &PromptContext) -> Result<Decision, ModelError> {
        let next = self.decisions.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| {
            self.token.cancel();
            Decision::Answer("too late".into())
        }))
    }
}

/// Execute `prompt` while draining the step stream concurrently.
pub async fn execute_to_end(runtime: &ChatRuntime, prompt: &str) -> (RunOutcome, Vec<StreamEvent>) {
    let (mut streamer, mut rx) = StepStreamer::channel();
    let producer = async move {
        let outcome = runtime
            .execute(prompt, &mut streamer, CancellationToken::new())
            .await;
        drop(streamer);
        outcome
    };
    let consumer = async move {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    };
    tokio::join!(producer, consumer)
}
