//! Capability types — what tool providers expose and how they are called.
//!
//! A capability is one named operation offered by a tool-provider process.
//! Descriptors are captured once during the handshake; requests and results
//! flow between the agent loop and the registry for every invocation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::InvocationFailure;
use crate::provider::ToolDefinition;

/// A named, independently invokable operation of a tool provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    /// Name, unique within the aggregated registry
    pub name: String,

    /// Human-readable description (sent to the model)
    #[serde(default)]
    pub description: String,

    /// JSON Schema object describing the named, typed parameters
    #[serde(rename = "inputSchema", alias = "input_schema")]
    pub input_schema: serde_json::Value,
}

impl CapabilityDescriptor {
    /// Convert this descriptor into a ToolDefinition for the model request.
    pub fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.input_schema.clone(),
        }
    }

    /// Names of the declared parameters, in schema order.
    pub fn parameter_names(&self) -> Vec<&str> {
        self.input_schema["properties"]
            .as_object()
            .map(|props| props.keys().map(|k| k.as_str()).collect())
            .unwrap_or_default()
    }
}

/// A request to run one capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRequest {
    /// Capability name
    pub capability: String,

    /// Argument name → value
    #[serde(default)]
    pub arguments: serde_json::Map<String, serde_json::Value>,
}

impl InvocationRequest {
    pub fn new(
        capability: impl Into<String>,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            capability: capability.into(),
            arguments,
        }
    }

    /// Build a request from a JSON value; non-object values yield no arguments.
    pub fn from_value(capability: impl Into<String>, arguments: serde_json::Value) -> Self {
        let arguments = match arguments {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        Self::new(capability, arguments)
    }
}

/// The outcome of one invocation, as seen by the agent loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InvocationResult {
    /// The provider returned a payload.
    Success { content: String },

    /// The call failed; `reason` describes why.
    Failure { reason: String },
}

impl InvocationResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self::Success {
            content: content.into(),
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self::Failure {
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Text handed back to the model and to the stream.
    pub fn render(&self) -> String {
        match self {
            Self::Success { content } => content.clone(),
            Self::Failure { reason } => format!("Error: {reason}"),
        }
    }
}

impl From<InvocationFailure> for InvocationResult {
    fn from(failure: InvocationFailure) -> Self {
        Self::failure(failure.to_string())
    }
}

/// A live connection to one tool provider, as seen by the registry.
///
/// Invocations never return an error: every failure is folded into an
/// [`InvocationResult::Failure`] so the caller can hand it to the model.
#[async_trait]
pub trait ToolHandle: Send + Sync {
    /// Name of the provider, used in logs and collision reports.
    fn server_name(&self) -> &str;

    /// Descriptors captured when the provider was connected.
    fn capabilities(&self) -> &[CapabilityDescriptor];

    /// Run one capability.
    async fn invoke(&self, request: &InvocationRequest) -> InvocationResult;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_parses_mcp_shape() {
        let json = serde_json::json!({
            "name": "trend",
            "description": "Trend detection using moving averages.",
            "inputSchema": {
                "type": "object",
                "properties": { "stock_ticker": { "type": "string" } },
                "required": ["stock_ticker"]
            }
        });
        let desc: CapabilityDescriptor = serde_json::from_value(json).unwrap();
        assert_eq!(desc.name, "trend");
        assert_eq!(desc.parameter_names(), vec!["stock_ticker"]);

        let def = desc.to_definition();
        assert_eq!(def.name, "trend");
        assert_eq!(def.parameters["required"][0], "stock_ticker");
    }

    #[test]
    fn request_from_non_object_has_no_arguments() {
        let req = InvocationRequest::from_value("trend", serde_json::json!("AAPL"));
        assert!(req.arguments.is_empty());
    }

    #[test]
    fn failure_renders_with_prefix() {
        let result = InvocationResult::from(InvocationFailure::Unavailable {
            server: "ta".into(),
            state: "failed".into(),
        });
        assert!(!result.is_success());
        assert!(result.render().starts_with("Error: tool server 'ta'"));
    }

    #[test]
    fn success_renders_verbatim() {
        let result = InvocationResult::success("AAPL Trend Analysis");
        assert_eq!(result.render(), "AAPL Trend Analysis");
    }
}
