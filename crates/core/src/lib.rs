//! # Chartwise Core
//!
//! Domain types, traits, and error definitions for the Chartwise agent runtime.
//! This crate has **no framework dependencies** — it defines the domain model
//! that the other crates implement against.
//!
//! - [`capability`]: what tool providers expose and how a call turns out
//! - [`step`]: the observable transitions of one agent run
//! - [`model`]: the decision service trait
//! - [`provider`]: the chat-completion backend trait underneath it

pub mod capability;
pub mod error;
pub mod message;
pub mod model;
pub mod provider;
pub mod step;

// Re-export key types at crate root for ergonomics
pub use capability::{CapabilityDescriptor, InvocationRequest, InvocationResult, ToolHandle};
pub use error::{
    Error, InvocationFailure, LaunchError, ModelError, RegistryError, Result,
};
pub use message::{Message, MessageToolCall, Role};
pub use model::{Decision, ModelClient, PromptContext};
pub use provider::{Provider, ProviderRequest, ProviderResponse, ToolDefinition, Usage};
pub use step::ExecutionStep;
