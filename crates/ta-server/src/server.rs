//! MCP server side of the stdio transport: one JSON-RPC message per line in,
//! one response per request line out.

use chartwise_mcp::protocol::{
    CallToolParams, Implementation, InitializeResult, JsonRpcResponse, ListToolsParams,
    ListToolsResult, MessageKind, PROTOCOL_VERSION, classify_message, codes,
};
use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::tool::ToolSet;

/// Serves a [`ToolSet`] over newline-delimited JSON-RPC.
pub struct McpServer {
    info: Implementation,
    tools: ToolSet,
    page_size: Option<usize>,
}

impl McpServer {
    pub fn new(name: impl Into<String>, tools: ToolSet) -> Self {
        Self {
            info: Implementation {
                name: name.into(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            tools,
            page_size: None,
        }
    }

    /// Split `tools/list` into pages of `size` tools.
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size.max(1));
        self
    }

    pub fn tools(&self) -> &ToolSet {
        &self.tools
    }

    /// Serve until the reader reaches end of input.
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        info!(server = %self.info.name, tools = self.tools.len(), "Tool server ready");
        let mut lines = reader.lines();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            if let Some(response) = self.handle_line(&line).await {
                let mut frame = serde_json::to_string(&response)?;
                frame.push('\n');
                writer.write_all(frame.as_bytes()).await?;
                writer.flush().await?;
            }
        }

        info!("Input closed, tool server exiting");
        Ok(())
    }

    /// Handle one incoming line. Notifications and stray responses produce
    /// no reply.
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        let message: Value = match serde_json::from_str(line) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Unparseable input line");
                return Some(JsonRpcResponse::failure(
                    Value::Null,
                    codes::PARSE_ERROR,
                    format!("Parse error: {e}"),
                ));
            }
        };

        let method = message.get("method").and_then(Value::as_str).unwrap_or_default();
        match classify_message(&message) {
            MessageKind::IncomingRequest => {}
            MessageKind::Notification => {
                debug!(method = %method, "Notification");
                return None;
            }
            MessageKind::Response { .. } => return None,
            MessageKind::Invalid => {
                return Some(JsonRpcResponse::failure(
                    message.get("id").cloned().unwrap_or(Value::Null),
                    codes::INVALID_REQUEST,
                    "Invalid request",
                ));
            }
        }

        let id = message.get("id").cloned().unwrap_or(Value::Null);
        let params = message.get("params").cloned().unwrap_or(Value::Null);
        debug!(method = %method, id = %id, "Request");

        let outcome = match method {
            "initialize" => self.initialize(),
            "ping" => Ok(json!({})),
            "tools/list" => self.list_tools(params),
            "tools/call" => self.call_tool(params).await,
            other => Err((codes::METHOD_NOT_FOUND, format!("Method not found: {other}"))),
        };

        Some(match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err((code, message)) => JsonRpcResponse::failure(id, code, message),
        })
    }

    fn initialize(&self) -> Result<Value, (i64, String)> {
        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: json!({"tools": {"listChanged": false}}),
            server_info: Some(self.info.clone()),
        };
        to_value(&result)
    }

    fn list_tools(&self, params: Value) -> Result<Value, (i64, String)> {
        let params: ListToolsParams = if params.is_null() {
            ListToolsParams::default()
        } else {
            serde_json::from_value(params).map_err(invalid_params)?
        };

        let all = self.tools.descriptors();
        let start = match params.cursor {
            Some(cursor) => cursor
                .parse::<usize>()
                .ok()
                .filter(|&start| start <= all.len())
                .ok_or_else(|| (codes::INVALID_PARAMS, format!("Invalid cursor: {cursor}")))?,
            None => 0,
        };
        let end = self
            .page_size
            .map_or(all.len(), |size| (start + size).min(all.len()));

        let result = ListToolsResult {
            tools: all[start..end].to_vec(),
            next_cursor: (end < all.len()).then(|| end.to_string()),
        };
        to_value(&result)
    }

    async fn call_tool(&self, params: Value) -> Result<Value, (i64, String)> {
        let params: CallToolParams = serde_json::from_value(params).map_err(invalid_params)?;
        info!(tool = %params.name, "Tool call");
        let result = self.tools.call(&params.name, &params.arguments).await;
        to_value(&result)
    }
}

fn invalid_params(e: serde_json::Error) -> (i64, String) {
    (codes::INVALID_PARAMS, format!("Invalid params: {e}"))
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, (i64, String)> {
    serde_json::to_value(value).map_err(|e| (codes::INTERNAL_ERROR, e.to_string()))
}
