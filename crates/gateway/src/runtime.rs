//! One prompt, end to end: launch tool servers, build the registry, run the
//! agent loop, stop the servers.

use std::sync::Arc;

use chartwise_agent::{AgentLoop, RunOutcome, StepStreamer};
use chartwise_config::{AgentConfig, AppConfig};
use chartwise_core::error::ModelError;
use chartwise_core::model::ModelClient;
use chartwise_core::step::ExecutionStep;
use chartwise_mcp::{ServerScope, ToolServerSpec, build_registry};
use chartwise_providers::{ChatModelClient, OpenAiCompatProvider};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Everything needed to serve a prompt. Shared by all runs; holds no
/// per-run state.
pub struct ChatRuntime {
    model: Arc<dyn ModelClient>,
    servers: Vec<ToolServerSpec>,
    agent: AgentConfig,
}

impl ChatRuntime {
    pub fn new(model: Arc<dyn ModelClient>, servers: Vec<ToolServerSpec>, agent: AgentConfig) -> Self {
        Self {
            model,
            servers,
            agent,
        }
    }

    /// Build the OpenAI-compatible decision service and server specs from
    /// configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self, ModelError> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            ModelError::NotConfigured(
                "no API key; set CHARTWISE_API_KEY or OPENAI_API_KEY".into(),
            )
        })?;
        let provider = OpenAiCompatProvider::new("openai", &config.base_url, api_key)?;
        let model = ChatModelClient::new(Arc::new(provider), &config.model)
            .with_system_prompt(&config.system_prompt)
            .with_temperature(config.temperature)
            .with_max_tokens(config.max_tokens);

        Ok(Self::new(
            Arc::new(model),
            config.tool_servers.iter().map(ToolServerSpec::from).collect(),
            config.agent.clone(),
        ))
    }

    pub fn servers(&self) -> &[ToolServerSpec] {
        &self.servers
    }

    /// Run `prompt` with freshly launched tool servers.
    ///
    /// Launch failures and capability name collisions become the run's
    /// single error step. The servers are stopped before this returns.
    pub async fn execute(
        &self,
        prompt: &str,
        streamer: &mut StepStreamer,
        cancel: CancellationToken,
    ) -> RunOutcome {
        let streamer_ref = &mut *streamer;
        let scoped = ServerScope::run(&self.servers, |connectors| async move {
            let registry = match build_registry(&connectors) {
                Ok(registry) => registry,
                Err(e) => {
                    warn!(error = %e, "Tool registry setup failed");
                    return fail_setup(streamer_ref, e.to_string()).await;
                }
            };

            AgentLoop::new(self.model.clone(), Arc::new(registry))
                .with_max_steps(self.agent.max_steps)
                .with_decide_timeout(self.agent.decide_timeout())
                .with_history_limit(self.agent.history_limit)
                .with_cancellation(cancel)
                .run(prompt, streamer_ref)
                .await
        })
        .await;

        let outcome = match scoped {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "Tool servers failed to launch");
                fail_setup(streamer, e.to_string()).await
            }
        };

        info!(steps = outcome.steps(), completed = outcome.is_completed(), "Run finished");
        outcome
    }
}

async fn fail_setup(streamer: &mut StepStreamer, reason: String) -> RunOutcome {
    match streamer.emit(ExecutionStep::failure(reason.clone())).await {
        Ok(()) => RunOutcome::Failed { reason, steps: 0 },
        Err(_) => RunOutcome::Cancelled { steps: 0 },
    }
}
