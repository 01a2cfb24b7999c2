//! Line-framed JSON-RPC transport over a pair of byte streams.
//!
//! One JSON object per line in each direction. Used over a child process's
//! stdout/stdin in production and over `tokio::io::duplex` in tests.

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, trace, warn};

use crate::protocol::{
    JsonRpcRequest, JsonRpcResponse, MessageKind, classify_message, codes,
};

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Transport-level failures.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection closed by peer")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("JSON-RPC error (code {code}): {message}")]
    Rpc { code: i64, message: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl TransportError {
    /// Whether the peer is gone (as opposed to answering badly).
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Closed | Self::Io(_))
    }
}

/// A bidirectional newline-delimited JSON-RPC channel.
pub struct LineTransport {
    peer: String,
    reader: BufReader<BoxedReader>,
    writer: BoxedWriter,
    /// Bytes of a partially received line; kept across cancelled reads.
    line: Vec<u8>,
}

impl LineTransport {
    pub fn new(peer: impl Into<String>, reader: BoxedReader, writer: BoxedWriter) -> Self {
        Self {
            peer: peer.into(),
            reader: BufReader::new(reader),
            writer,
            line: Vec::new(),
        }
    }

    /// Write one message as a single line and flush it.
    pub async fn send<T: Serialize>(&mut self, message: &T) -> Result<(), TransportError> {
        let mut frame = serde_json::to_vec(message)?;
        frame.push(b'\n');
        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Read the next complete line as JSON, skipping blank and non-JSON lines.
    ///
    /// Cancel safe: a partially read line stays buffered for the next call.
    pub async fn next_message(&mut self) -> Result<serde_json::Value, TransportError> {
        loop {
            let read = self.reader.read_until(b'\n', &mut self.line).await?;
            if read == 0 {
                return Err(TransportError::Closed);
            }
            if self.line.last() != Some(&b'\n') {
                // EOF in the middle of a line
                continue;
            }

            let line = std::mem::take(&mut self.line);
            let text = String::from_utf8_lossy(&line);
            let text = text.trim();
            if text.is_empty() {
                continue;
            }

            match serde_json::from_str(text) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(peer = %self.peer, error = %e, "Skipping non-JSON line");
                }
            }
        }
    }

    /// Wait for the response with the given id.
    ///
    /// Responses with other ids (late answers to timed-out calls) and
    /// notifications are skipped. Peer `ping` requests are answered inline;
    /// other peer requests are rejected as unsupported.
    pub async fn recv_response(&mut self, id: u64) -> Result<serde_json::Value, TransportError> {
        loop {
            let message = self.next_message().await?;
            match classify_message(&message) {
                MessageKind::Response { id: Some(got) } if got == id => {
                    let response: JsonRpcResponse = serde_json::from_value(message)
                        .map_err(|e| TransportError::Malformed(e.to_string()))?;
                    if let Some(err) = response.error {
                        return Err(TransportError::Rpc {
                            code: err.code,
                            message: err.message,
                        });
                    }
                    return response.result.ok_or_else(|| {
                        TransportError::Malformed(format!("response {id} has no result"))
                    });
                }
                MessageKind::Response { id: got } => {
                    debug!(peer = %self.peer, expected = id, got = ?got, "Skipping stale response");
                }
                MessageKind::IncomingRequest => self.answer_peer_request(&message).await?,
                MessageKind::Notification => {
                    trace!(peer = %self.peer, method = ?message.get("method"), "Ignoring notification");
                }
                MessageKind::Invalid => {
                    warn!(peer = %self.peer, "Ignoring message without id or method");
                }
            }
        }
    }

    /// Send a request and wait for its result.
    pub async fn request(
        &mut self,
        id: u64,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, TransportError> {
        self.send(&JsonRpcRequest::new(id, method, params)).await?;
        self.recv_response(id).await
    }

    async fn answer_peer_request(&mut self, message: &serde_json::Value) -> Result<(), TransportError> {
        let id = message["id"].clone();
        let method = message["method"].as_str().unwrap_or_default();
        let response = if method == "ping" {
            JsonRpcResponse::success(id, serde_json::json!({}))
        } else {
            debug!(peer = %self.peer, method, "Rejecting unsupported peer request");
            JsonRpcResponse::failure(id, codes::METHOD_NOT_FOUND, format!("method not found: {method}"))
        };
        self.send(&response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

    fn pair() -> (LineTransport, DuplexStream) {
        let (client, server) = tokio::io::duplex(4096);
        let (read, write) = tokio::io::split(client);
        (
            LineTransport::new("test", Box::new(read), Box::new(write)),
            server,
        )
    }

    #[tokio::test]
    async fn send_writes_one_line() {
        let (mut transport, server) = pair();
        transport
            .send(&JsonRpcRequest::new(1, "tools/list", None))
            .await
            .unwrap();

        let mut lines = BufReader::new(server).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(json["method"], "tools/list");
        assert_eq!(json["id"], 1);
    }

    #[tokio::test]
    async fn recv_skips_noise_and_stale_responses() {
        let (mut transport, mut server) = pair();
        server
            .write_all(
                concat!(
                    "\n",
                    "server starting up\n",
                    r#"{"jsonrpc":"2.0","method":"notifications/message","params":{}}"#, "\n",
                    r#"{"jsonrpc":"2.0","id":1,"result":{"late":true}}"#, "\n",
                    r#"{"jsonrpc":"2.0","id":2,"result":{"ok":true}}"#, "\n",
                )
                .as_bytes(),
            )
            .await
            .unwrap();

        let result = transport.recv_response(2).await.unwrap();
        assert_eq!(result["ok"], true);
    }

    #[tokio::test]
    async fn rpc_error_is_surfaced() {
        let (mut transport, mut server) = pair();
        server
            .write_all(
                b"{\"jsonrpc\":\"2.0\",\"id\":4,\"error\":{\"code\":-32601,\"message\":\"nope\"}}\n",
            )
            .await
            .unwrap();

        let err = transport.recv_response(4).await.unwrap_err();
        assert!(matches!(err, TransportError::Rpc { code: -32601, .. }));
        assert!(!err.is_disconnect());
    }

    #[tokio::test]
    async fn eof_is_closed() {
        let (mut transport, server) = pair();
        drop(server);
        let err = transport.recv_response(1).await.unwrap_err();
        assert!(err.is_disconnect());
    }

    #[tokio::test]
    async fn ping_from_peer_is_answered() {
        let (mut transport, server) = pair();
        let (read, mut write) = tokio::io::split(server);
        write
            .write_all(
                concat!(
                    r#"{"jsonrpc":"2.0","id":99,"method":"ping"}"#, "\n",
                    r#"{"jsonrpc":"2.0","id":5,"result":{}}"#, "\n",
                )
                .as_bytes(),
            )
            .await
            .unwrap();

        transport.recv_response(5).await.unwrap();

        let mut lines = BufReader::new(read).lines();
        let pong: serde_json::Value =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(pong["id"], 99);
        assert!(pong.get("result").is_some());
    }

    #[tokio::test]
    async fn partial_line_survives_cancelled_read() {
        let (mut transport, mut server) = pair();
        server.write_all(br#"{"jsonrpc":"2.0","id":1,"#).await.unwrap();

        let timed_out = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            transport.recv_response(1),
        )
        .await;
        assert!(timed_out.is_err());

        server.write_all(b"\"result\":{\"n\":1}}\n").await.unwrap();
        let result = transport.recv_response(1).await.unwrap();
        assert_eq!(result["n"], 1);
    }
}
