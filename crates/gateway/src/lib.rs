//! HTTP gateway for Chartwise.
//!
//! - `POST /chat`   — run one prompt, stream the steps as NDJSON
//! - `GET  /health` — liveness and version
//!
//! Each chat request gets its own agent run on a separate task with freshly
//! launched tool servers. The response body is fed by the run's step stream;
//! when the client goes away the run stops at its next step.

pub mod runtime;

#[cfg(test)]
pub(crate) mod test_helpers;

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use chartwise_agent::StepStreamer;
use serde::Serialize;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

pub use runtime::ChatRuntime;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub runtime: ChatRuntime,
    /// Cancelled on server shutdown; every run gets a child token.
    pub shutdown: CancellationToken,
}

type SharedState = Arc<GatewayState>;

const NDJSON: &str = "application/x-ndjson";
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Build the Axum router with all gateway routes.
///
/// Layers applied:
/// - CORS restricted to `allowed_origins`
/// - Request body size limit (1 MB)
/// - HTTP trace logging
pub fn build_router(state: SharedState, allowed_origins: &[String]) -> Router {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter(|origin| origin.as_str() != "*")
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    let allow_origin = if allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(origins)
    };

    let cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .max_age(std::time::Duration::from_secs(3600));

    Router::new()
        .route("/health", get(health_handler))
        .route("/chat", post(chat_handler))
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Start the gateway HTTP server and serve until Ctrl-C.
pub async fn start(config: chartwise_config::AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let runtime = ChatRuntime::from_config(&config)?;
    let shutdown = CancellationToken::new();
    let state = Arc::new(GatewayState {
        runtime,
        shutdown: shutdown.clone(),
    });
    let app = build_router(state, &config.gateway.allowed_origins);

    info!(
        addr = %addr,
        model = %config.model,
        tool_servers = config.tool_servers.len(),
        "Gateway starting"
    );
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
            info!("Shutdown requested, cancelling runs");
            shutdown.cancel();
        })
        .await?;

    Ok(())
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn bad_request(error: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
}

/// Pull the prompt out of a `{"prompt": "..."}` body.
fn parse_prompt(body: &[u8]) -> Result<String, String> {
    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| format!("malformed JSON body: {e}"))?;
    match value.get("prompt") {
        Some(serde_json::Value::String(prompt)) if !prompt.trim().is_empty() => Ok(prompt.clone()),
        Some(serde_json::Value::String(_)) => Err("'prompt' must not be empty".into()),
        Some(_) => Err("'prompt' must be a string".into()),
        None => Err("missing 'prompt' field".into()),
    }
}

/// `POST /chat` — run a prompt and stream its steps as NDJSON.
async fn chat_handler(
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    let prompt = parse_prompt(&body).map_err(|e| {
        warn!(error = %e, "Rejected chat request");
        bad_request(e)
    })?;
    info!(prompt_len = prompt.len(), "Chat request");

    let (mut streamer, rx) = StepStreamer::channel();
    let cancel = state.shutdown.child_token();
    tokio::spawn(async move {
        state.runtime.execute(&prompt, &mut streamer, cancel).await;
    });

    let body = ReceiverStream::new(rx).map(|event| event.to_ndjson_line().map(Bytes::from));
    Ok(([(header::CONTENT_TYPE, NDJSON)], Body::from_stream(body)).into_response())
}
