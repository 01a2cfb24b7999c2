//! `chartwise ask` — Run one prompt locally and print the step stream.

use chartwise_agent::{RunOutcome, StepStreamer, StreamEvent};
use chartwise_config::AppConfig;
use chartwise_gateway::ChatRuntime;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub async fn run(prompt: String, ndjson: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    // Check for API key early — give a clear error
    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    CHARTWISE_API_KEY = 'sk-...'");
        eprintln!("    OPENAI_API_KEY    = 'sk-...'");
        eprintln!();
        eprintln!("  Or add api_key to {}", AppConfig::config_path().display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let runtime = ChatRuntime::from_config(&config)?;
    debug!(model = %config.model, servers = runtime.servers().len(), "Running prompt locally");

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let (mut streamer, mut rx) = StepStreamer::channel();
    let producer = async {
        let outcome = runtime.execute(&prompt, &mut streamer, cancel).await;
        drop(streamer);
        outcome
    };
    let printer = async {
        while let Some(event) = rx.recv().await {
            if ndjson {
                print!("{}", event.to_ndjson_line()?);
            } else {
                println!("{}", render_event(&event));
            }
        }
        Ok::<_, serde_json::Error>(())
    };

    let (outcome, printed) = tokio::join!(producer, printer);
    ctrl_c.abort();
    printed?;

    match outcome {
        RunOutcome::Completed { .. } => Ok(()),
        RunOutcome::Failed { reason, .. } => Err(format!("run failed: {reason}").into()),
        RunOutcome::Cancelled { steps } => {
            eprintln!("Cancelled after {steps} step(s).");
            Ok(())
        }
    }
}

/// Human-readable rendering of one event.
fn render_event(event: &StreamEvent) -> String {
    match event {
        StreamEvent::Thought { content } => format!("💭 {content}"),
        StreamEvent::ToolCall { tool, args } => {
            format!("🔧 {tool}({})", serde_json::Value::Object(args.clone()))
        }
        StreamEvent::Observation { content, is_error } => {
            let marker = if *is_error { "⚠️ " } else { "📊" };
            format!("{marker} {}", indent_continuation(content))
        }
        StreamEvent::Final { content } => format!("\n✅ {content}"),
        StreamEvent::Error { content } => format!("❌ {content}"),
    }
}

fn indent_continuation(text: &str) -> String {
    text.lines().collect::<Vec<_>>().join("\n   ")
}
