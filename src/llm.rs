//! Abstract LLM chat endpoint
//!
//! Provider adapters live outside the core; responders only depend on this
//! trait. Responses are whole strings — no streaming.

use async_trait::async_trait;

/// A chat-completion endpoint.
#[async_trait]
pub trait ChatEndpoint: Send + Sync {
    /// Run one chat turn and return the assistant text.
    async fn chat(&self, system_prompt: &str, user_prompt: &str) -> anyhow::Result<String>;
}
