//! Decision-service implementations for Chartwise.
//!
//! [`OpenAiCompatProvider`] implements `chartwise_core::Provider` over any
//! OpenAI-compatible endpoint; [`ChatModelClient`] turns a provider into the
//! `ModelClient` the agent loop talks to.

pub mod decision;
pub mod openai_compat;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use decision::ChatModelClient;
pub use openai_compat::OpenAiCompatProvider;
