//! Thin LLM client boundary.
//!
//! The daemon core only needs "text in, text out over a messages array";
//! model selection, rate limiting and prompt policy live behind this trait.

mod anthropic;
mod mock;

pub use anthropic::AnthropicClient;
pub use mock::MockAIClient;

use crate::core::Result;
use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct AIMessage {
    pub role: String,
    pub content: String,
}

impl AIMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait AIClient: Send + Sync {
    /// Plain text completion, no tool use. `system` is the persona prompt,
    /// `agent` names the persona for logging.
    async fn send_without_tools(
        &self,
        messages: &[AIMessage],
        system: &str,
        agent: &str,
    ) -> Result<String>;

    fn model(&self) -> &str;
}
