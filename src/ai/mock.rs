//! Canned-response client so materialization and possession are testable
//! without network access.

use super::{AIClient, AIMessage};
use crate::core::Result;
use async_trait::async_trait;
use std::sync::Mutex;

pub struct MockAIClient {
    responses: Mutex<Vec<String>>,
    fallback: String,
    pub calls: Mutex<Vec<String>>,
}

impl MockAIClient {
    /// Always answers with `fallback`.
    pub fn new(fallback: impl Into<String>) -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            fallback: fallback.into(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Answers from the queue first, then with the fallback.
    pub fn with_queue(fallback: impl Into<String>, queued: Vec<String>) -> Self {
        let mut reversed = queued;
        reversed.reverse();
        Self {
            responses: Mutex::new(reversed),
            fallback: fallback.into(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// A fenced-json tool definition the tool materializer accepts; handy
    /// default for declare tests.
    pub fn tool_response(name: &str, language: &str, implementation: &str) -> String {
        format!(
            "Here is the tool.\n```json\n{{\"name\": \"{}\", \"description\": \"generated\", \"language\": \"{}\", \"implementation\": \"{}\", \"tags\": [\"generated\"]}}\n```",
            name, language, implementation
        )
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }
}

#[async_trait]
impl AIClient for MockAIClient {
    async fn send_without_tools(
        &self,
        messages: &[AIMessage],
        _system: &str,
        _agent: &str,
    ) -> Result<String> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(messages.last().map(|m| m.content.clone()).unwrap_or_default());
        }
        let queued = self.responses.lock().ok().and_then(|mut q| q.pop());
        Ok(queued.unwrap_or_else(|| self.fallback.clone()))
    }

    fn model(&self) -> &str {
        "mock"
    }
}
