//! Lifecycle of one tool-provider process.
//!
//! A [`ToolServerConnector`] spawns the process, performs the MCP handshake,
//! captures the advertised capabilities, dispatches calls one at a time and
//! tears the process down (stdin close, grace period, kill).
//!
//! The child itself is owned by a supervisor task. The supervisor notices
//! unexpected exits and performs the shutdown sequence when asked to.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chartwise_config::ToolServerConfig;
use chartwise_core::capability::{
    CapabilityDescriptor, InvocationRequest, InvocationResult, ToolHandle,
};
use chartwise_core::error::{InvocationFailure, LaunchError};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::protocol::{
    CallToolParams, CallToolResult, Implementation, InitializeParams, InitializeResult,
    JsonRpcNotification, JsonRpcRequest, ListToolsParams, ListToolsResult, PROTOCOL_VERSION,
};
use crate::transport::{BoxedReader, BoxedWriter, LineTransport, TransportError};

/// How to launch and talk to one tool provider. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolServerSpec {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub handshake_timeout: Duration,
    pub call_timeout: Duration,
    pub shutdown_grace: Duration,
}

impl ToolServerSpec {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            handshake_timeout: Duration::from_secs(10),
            call_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(2),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}

impl From<&ToolServerConfig> for ToolServerSpec {
    fn from(config: &ToolServerConfig) -> Self {
        Self {
            name: config.name.clone(),
            command: config.command.clone(),
            args: config.args.clone(),
            env: config.env.clone(),
            handshake_timeout: config.handshake_timeout(),
            call_timeout: config.call_timeout(),
            shutdown_grace: config.shutdown_grace(),
        }
    }
}

/// Where a connector is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectorState {
    Ready,
    /// The process died or the connection broke. Permanent.
    Failed { reason: String },
    Stopped,
}

impl std::fmt::Display for ConnectorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready => write!(f, "ready"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// A live, handshaken connection to one tool provider.
pub struct ToolServerConnector {
    spec: ToolServerSpec,
    server_info: Option<Implementation>,
    capabilities: Vec<CapabilityDescriptor>,
    /// Call mutex: at most one request in flight. `None` once the
    /// connection is unusable.
    transport: Mutex<Option<LineTransport>>,
    next_id: AtomicU64,
    state: Arc<watch::Sender<ConnectorState>>,
    shutdown: CancellationToken,
    supervisor: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Outcome of one request/response exchange under a deadline.
enum Exchange {
    Reply(serde_json::Value),
    TimedOut,
    WriteStalled,
    Broken(TransportError),
}

impl ToolServerConnector {
    /// Spawn the provider process and complete the handshake.
    pub async fn start(spec: ToolServerSpec) -> Result<Arc<Self>, LaunchError> {
        info!(server = %spec.name, command = %spec.command, "Starting tool server");

        let mut child = spawn_process(&spec)?;
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(LaunchError::Spawn {
                server: spec.name.clone(),
                command: spec.command.clone(),
                reason: "stdio was not captured".into(),
            });
        };
        if let Some(stderr) = child.stderr.take() {
            forward_stderr(spec.name.clone(), stderr);
        }

        Self::establish(spec, Box::new(stdout), Box::new(stdin), Some(child)).await
    }

    /// Complete the handshake over an existing pair of streams.
    ///
    /// There is no process to supervise; `stop` only closes the streams.
    pub async fn connect<R, W>(
        spec: ToolServerSpec,
        reader: R,
        writer: W,
    ) -> Result<Arc<Self>, LaunchError>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::establish(spec, Box::new(reader), Box::new(writer), None).await
    }

    async fn establish(
        spec: ToolServerSpec,
        reader: BoxedReader,
        writer: BoxedWriter,
        child: Option<Child>,
    ) -> Result<Arc<Self>, LaunchError> {
        let mut transport = LineTransport::new(spec.name.clone(), reader, writer);
        let next_id = AtomicU64::new(1);

        // On every error path below `child` is dropped, which kills it.
        let (server_info, capabilities) =
            match timeout(spec.handshake_timeout, handshake(&mut transport, &next_id)).await {
                Ok(Ok(found)) => found,
                Ok(Err(e)) if e.is_disconnect() => {
                    warn!(server = %spec.name, error = %e, "Tool server exited during handshake");
                    return Err(LaunchError::ExitedDuringHandshake { server: spec.name });
                }
                Ok(Err(e)) => {
                    return Err(LaunchError::Handshake {
                        server: spec.name,
                        reason: e.to_string(),
                    });
                }
                Err(_) => {
                    return Err(LaunchError::HandshakeTimeout {
                        server: spec.name,
                        timeout_ms: spec.handshake_timeout.as_millis() as u64,
                    });
                }
            };

        info!(
            server = %spec.name,
            tools = capabilities.len(),
            server_info = ?server_info.as_ref().map(|i| format!("{} {}", i.name, i.version)),
            "Tool server ready"
        );

        let (state, _) = watch::channel(ConnectorState::Ready);
        let state = Arc::new(state);
        let shutdown = CancellationToken::new();
        let supervisor = child.map(|child| {
            tokio::spawn(supervise(
                spec.name.clone(),
                child,
                state.clone(),
                shutdown.clone(),
                spec.shutdown_grace,
            ))
        });

        Ok(Arc::new(Self {
            spec,
            server_info,
            capabilities,
            transport: Mutex::new(Some(transport)),
            next_id,
            state,
            shutdown,
            supervisor: std::sync::Mutex::new(supervisor),
        }))
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &ToolServerSpec {
        &self.spec
    }

    /// What the server said about itself during `initialize`.
    pub fn server_info(&self) -> Option<&Implementation> {
        self.server_info.as_ref()
    }

    /// Descriptors captured at handshake. Never re-queried.
    pub fn list_capabilities(&self) -> &[CapabilityDescriptor] {
        &self.capabilities
    }

    pub fn state(&self) -> ConnectorState {
        self.state.borrow().clone()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe(&self) -> watch::Receiver<ConnectorState> {
        self.state.subscribe()
    }

    /// Run one `tools/call`, returning the text content or a typed failure.
    ///
    /// Calls queue on the connector's mutex. A Failed or Stopped connector
    /// answers `Unavailable` without touching the process.
    pub async fn call_tool(&self, request: &InvocationRequest) -> Result<String, InvocationFailure> {
        self.ensure_ready()?;
        let mut guard = self.transport.lock().await;
        // The state may have changed while queued.
        self.ensure_ready()?;
        let Some(transport) = guard.as_mut() else {
            return Err(self.unavailable());
        };

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let params = CallToolParams {
            name: request.capability.clone(),
            arguments: request.arguments.clone(),
        };
        let params = serde_json::to_value(params).map_err(|e| InvocationFailure::Protocol {
            server: self.spec.name.clone(),
            message: e.to_string(),
        })?;

        debug!(server = %self.spec.name, tool = %request.capability, id, "Calling tool");
        let deadline = Instant::now() + self.spec.call_timeout;
        let exchange = exchange(transport, JsonRpcRequest::new(id, "tools/call", Some(params)), deadline).await;

        let timed_out = || InvocationFailure::Timeout {
            capability: request.capability.clone(),
            timeout_ms: self.spec.call_timeout.as_millis() as u64,
        };

        match exchange {
            Exchange::Reply(value) => {
                let result: CallToolResult =
                    serde_json::from_value(value).map_err(|e| InvocationFailure::Protocol {
                        server: self.spec.name.clone(),
                        message: format!("invalid tools/call result: {e}"),
                    })?;
                let text = result.joined_text();
                if result.is_error {
                    Err(InvocationFailure::ToolReported {
                        capability: request.capability.clone(),
                        message: text,
                    })
                } else {
                    Ok(text)
                }
            }
            Exchange::TimedOut => {
                warn!(server = %self.spec.name, tool = %request.capability, id, "Tool call timed out");
                Err(timed_out())
            }
            Exchange::WriteStalled => {
                // A half-written frame would corrupt every later exchange.
                *guard = None;
                self.mark_failed("request write timed out".into());
                Err(timed_out())
            }
            Exchange::Broken(e) if e.is_disconnect() => {
                *guard = None;
                self.mark_failed(e.to_string());
                Err(InvocationFailure::Crashed {
                    server: self.spec.name.clone(),
                    capability: request.capability.clone(),
                    reason: e.to_string(),
                })
            }
            Exchange::Broken(TransportError::Rpc { code, message }) => {
                Err(InvocationFailure::ToolReported {
                    capability: request.capability.clone(),
                    message: format!("{message} (code {code})"),
                })
            }
            Exchange::Broken(e) => Err(InvocationFailure::Protocol {
                server: self.spec.name.clone(),
                message: e.to_string(),
            }),
        }
    }

    /// Stop the provider: close stdin, wait for the grace period, then kill.
    ///
    /// Safe to call after a failure and more than once.
    pub async fn stop(&self) {
        let first = self.state.send_if_modified(|state| {
            if *state == ConnectorState::Stopped {
                false
            } else {
                *state = ConnectorState::Stopped;
                true
            }
        });

        // Dropping the transport closes stdin. A call still holding the lock
        // ends when the process is killed.
        if let Ok(mut transport) = self.transport.try_lock() {
            transport.take();
        }
        self.shutdown.cancel();

        let supervisor = self
            .supervisor
            .lock()
            .ok()
            .and_then(|mut handle| handle.take());
        if let Some(handle) = supervisor {
            if let Err(e) = handle.await {
                warn!(server = %self.spec.name, error = %e, "Supervisor task failed");
            }
        }

        if first {
            info!(server = %self.spec.name, "Tool server stopped");
        }
    }

    fn ensure_ready(&self) -> Result<(), InvocationFailure> {
        let ready = *self.state.borrow() == ConnectorState::Ready;
        if ready { Ok(()) } else { Err(self.unavailable()) }
    }

    fn unavailable(&self) -> InvocationFailure {
        InvocationFailure::Unavailable {
            server: self.spec.name.clone(),
            state: self.state.borrow().to_string(),
        }
    }

    fn mark_failed(&self, reason: String) {
        let changed = mark_failed(&self.state, reason.clone());
        if changed {
            warn!(server = %self.spec.name, %reason, "Tool server connection failed");
        }
    }
}

impl Drop for ToolServerConnector {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl ToolHandle for ToolServerConnector {
    fn server_name(&self) -> &str {
        &self.spec.name
    }

    fn capabilities(&self) -> &[CapabilityDescriptor] {
        &self.capabilities
    }

    async fn invoke(&self, request: &InvocationRequest) -> InvocationResult {
        match self.call_tool(request).await {
            Ok(content) => InvocationResult::success(content),
            Err(failure) => {
                warn!(
                    server = %self.spec.name,
                    tool = %request.capability,
                    %failure,
                    "Tool invocation failed"
                );
                failure.into()
            }
        }
    }
}

fn mark_failed(state: &watch::Sender<ConnectorState>, reason: String) -> bool {
    state.send_if_modified(|current| {
        if *current == ConnectorState::Ready {
            *current = ConnectorState::Failed { reason };
            true
        } else {
            false
        }
    })
}

fn spawn_process(spec: &ToolServerSpec) -> Result<Child, LaunchError> {
    let mut cmd = Command::new(&spec.command);
    cmd.args(&spec.args)
        .envs(&spec.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    // Linux: have the kernel send SIGTERM to the child if we die without
    // running destructors.
    #[cfg(target_os = "linux")]
    unsafe {
        cmd.pre_exec(|| {
            libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM);
            Ok(())
        });
    }

    cmd.spawn().map_err(|e| LaunchError::Spawn {
        server: spec.name.clone(),
        command: spec.command.clone(),
        reason: e.to_string(),
    })
}

/// Forward the child's stderr to the host log, line by line.
fn forward_stderr(server: String, stderr: ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(server = %server, "stderr: {line}");
        }
    });
}

async fn handshake(
    transport: &mut LineTransport,
    ids: &AtomicU64,
) -> Result<(Option<Implementation>, Vec<CapabilityDescriptor>), TransportError> {
    let next_id = || ids.fetch_add(1, Ordering::SeqCst);

    let params = InitializeParams {
        protocol_version: PROTOCOL_VERSION.into(),
        capabilities: serde_json::json!({}),
        client_info: Implementation {
            name: "chartwise".into(),
            version: env!("CARGO_PKG_VERSION").into(),
        },
    };
    let result = transport
        .request(next_id(), "initialize", Some(serde_json::to_value(params)?))
        .await?;
    let init: InitializeResult = serde_json::from_value(result)
        .map_err(|e| TransportError::Malformed(format!("invalid initialize result: {e}")))?;
    if init.protocol_version != PROTOCOL_VERSION {
        debug!(
            requested = PROTOCOL_VERSION,
            offered = %init.protocol_version,
            "Server negotiated a different protocol version"
        );
    }

    transport
        .send(&JsonRpcNotification::new("notifications/initialized"))
        .await?;

    let mut capabilities = Vec::new();
    let mut cursor = None;
    loop {
        let params = serde_json::to_value(ListToolsParams { cursor })?;
        let result = transport
            .request(next_id(), "tools/list", Some(params))
            .await?;
        let page: ListToolsResult = serde_json::from_value(result)
            .map_err(|e| TransportError::Malformed(format!("invalid tools/list result: {e}")))?;
        capabilities.extend(page.tools);

        match page.next_cursor {
            Some(next) if !next.is_empty() => cursor = Some(next),
            _ => break,
        }
    }

    Ok((init.server_info, capabilities))
}

async fn exchange(
    transport: &mut LineTransport,
    request: JsonRpcRequest,
    deadline: Instant,
) -> Exchange {
    match timeout_at(deadline, transport.send(&request)).await {
        Err(_) => return Exchange::WriteStalled,
        Ok(Err(e)) => return Exchange::Broken(e),
        Ok(Ok(())) => {}
    }

    match timeout_at(deadline, transport.recv_response(request.id)).await {
        Err(_) => Exchange::TimedOut,
        Ok(Err(e)) => Exchange::Broken(e),
        Ok(Ok(value)) => Exchange::Reply(value),
    }
}

/// Owns the child process until it exits or shutdown is requested.
async fn supervise(
    server: String,
    mut child: Child,
    state: Arc<watch::Sender<ConnectorState>>,
    shutdown: CancellationToken,
    grace: Duration,
) {
    tokio::select! {
        status = child.wait() => {
            let reason = match status {
                Ok(status) => format!("process exited ({status})"),
                Err(e) => format!("failed to wait for process: {e}"),
            };
            if mark_failed(&state, reason.clone()) {
                warn!(server = %server, %reason, "Tool server exited unexpectedly");
            } else {
                debug!(server = %server, %reason, "Tool server exited");
            }
        }
        _ = shutdown.cancelled() => {
            match timeout(grace, child.wait()).await {
                Ok(Ok(status)) => debug!(server = %server, %status, "Tool server exited after stdin closed"),
                Ok(Err(e)) => warn!(server = %server, error = %e, "Failed to wait for tool server"),
                Err(_) => {
                    warn!(
                        server = %server,
                        grace_ms = grace.as_millis() as u64,
                        "Tool server ignored shutdown, killing"
                    );
                    if let Err(e) = child.kill().await {
                        warn!(server = %server, error = %e, "Failed to kill tool server");
                    }
                }
            }
        }
    }
}
