//! Tool trait and the set of tools a server exposes.
//!
//! Tools are what the agent calls through the tool server: each one takes
//! JSON arguments and produces a text report.

use async_trait::async_trait;
use chartwise_core::capability::CapabilityDescriptor;
use chartwise_mcp::protocol::CallToolResult;
use tracing::{debug, warn};

use crate::prices::PriceError;

/// Errors a tool reports back to the caller as an `isError` result.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Unknown tool: {0}")]
    NotFound(String),

    #[error("Not enough price history for {ticker}: need {needed} closes, got {got}")]
    InsufficientHistory {
        ticker: String,
        needed: usize,
        got: usize,
    },

    #[error(transparent)]
    Prices(#[from] PriceError),
}

/// One callable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "trend").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments.
    async fn execute(
        &self,
        arguments: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<String, ToolError>;

    /// Descriptor advertised through `tools/list`.
    fn to_descriptor(&self) -> CapabilityDescriptor {
        CapabilityDescriptor {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.parameters_schema(),
        }
    }
}

/// Tools in registration order.
#[derive(Default)]
pub struct ToolSet {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.iter().find(|t| t.name() == name).map(|t| t.as_ref())
    }

    pub fn descriptors(&self) -> Vec<CapabilityDescriptor> {
        self.tools.iter().map(|t| t.to_descriptor()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Run a tool, folding every failure into an `isError` result.
    pub async fn call(
        &self,
        name: &str,
        arguments: &serde_json::Map<String, serde_json::Value>,
    ) -> CallToolResult {
        let outcome = match self.get(name) {
            Some(tool) => tool.execute(arguments).await,
            None => Err(ToolError::NotFound(name.to_string())),
        };

        match outcome {
            Ok(text) => {
                debug!(tool = %name, "Tool succeeded");
                CallToolResult::text(text)
            }
            Err(e) => {
                warn!(tool = %name, error = %e, "Tool failed");
                CallToolResult::error(e.to_string())
            }
        }
    }
}

/// Read the required `stock_ticker` argument.
pub fn ticker_argument(
    arguments: &serde_json::Map<String, serde_json::Value>,
) -> Result<String, ToolError> {
    arguments
        .get("stock_ticker")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .ok_or_else(|| ToolError::InvalidArguments("Missing 'stock_ticker' argument".into()))
}
