//! Error types for the Chartwise domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; `Error` wraps them all.

use thiserror::Error;

/// The top-level error type for all Chartwise operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Tool server lifecycle ---
    #[error("Launch error: {0}")]
    Launch(#[from] LaunchError),

    // --- Capability namespace ---
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    // --- Decision service ---
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// A tool-provider process could not be started or did not complete the
/// protocol handshake.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("failed to spawn tool server '{server}' ({command}): {reason}")]
    Spawn {
        server: String,
        command: String,
        reason: String,
    },

    #[error("tool server '{server}' did not finish the handshake within {timeout_ms}ms")]
    HandshakeTimeout { server: String, timeout_ms: u64 },

    #[error("tool server '{server}' exited before completing the handshake")]
    ExitedDuringHandshake { server: String },

    #[error("tool server '{server}' handshake failed: {reason}")]
    Handshake { server: String, reason: String },
}

/// Why a single capability invocation did not produce a success payload.
///
/// These are folded into an `InvocationResult::Failure` before reaching the
/// agent loop; the loop treats them as information, not as fatal errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvocationFailure {
    #[error("call to '{capability}' timed out after {timeout_ms}ms")]
    Timeout { capability: String, timeout_ms: u64 },

    #[error("tool server '{server}' crashed while running '{capability}': {reason}")]
    Crashed {
        server: String,
        capability: String,
        reason: String,
    },

    #[error("tool server '{server}' is unavailable ({state})")]
    Unavailable { server: String, state: String },

    #[error("'{capability}' reported an error: {message}")]
    ToolReported { capability: String, message: String },

    #[error("protocol error from '{server}': {message}")]
    Protocol { server: String, message: String },
}

/// Configuration-level defects in the aggregated capability namespace.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("unknown capability: {0}")]
    UnknownCapability(String),

    #[error("capability '{name}' from '{rejected}' collides with the one already registered by '{existing}'")]
    NameCollision {
        name: String,
        existing: String,
        rejected: String,
    },
}

/// Failures of the decision service. Terminal for the current run.
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed model response: {0}")]
    MalformedResponse(String),
}
