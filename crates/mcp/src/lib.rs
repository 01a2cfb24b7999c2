//! MCP (Model Context Protocol) client side for Chartwise.
//!
//! Tool providers are child processes speaking newline-delimited JSON-RPC
//! 2.0 over stdin/stdout.
//!
//! - [`ToolServerConnector`]: one provider process, from spawn to kill
//! - [`ToolRegistry`]: the flat capability namespace across providers
//! - [`ServerScope`]: start N providers, stop them all on every exit path

pub mod connector;
pub mod protocol;
pub mod registry;
pub mod scope;
pub mod transport;

pub use connector::{ConnectorState, ToolServerConnector, ToolServerSpec};
pub use registry::ToolRegistry;
pub use scope::{ServerScope, build_registry};
