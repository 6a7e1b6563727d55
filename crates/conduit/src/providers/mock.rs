use async_trait::async_trait;
use std::sync::Arc;
use std::sync::Mutex;

use crate::errors::{ProviderError, ProviderResult};
use crate::models::message::Message;
use crate::models::tool::Tool;
use crate::providers::base::{Completion, CompletionOptions, Provider, Usage};

/// A mock provider that returns pre-configured responses for testing
pub struct MockProvider {
    responses: Arc<Mutex<Vec<ProviderResult<Message>>>>,
    requests: Arc<Mutex<Vec<Vec<Message>>>>,
}

impl MockProvider {
    /// Create a new mock provider with a sequence of responses
    pub fn new(responses: Vec<Message>) -> Self {
        Self::scripted(responses.into_iter().map(Ok).collect())
    }

    /// Like `new`, but individual calls can fail
    pub fn scripted(responses: Vec<ProviderResult<Message>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// The histories the provider was called with, in call order
    pub fn requests(&self) -> Arc<Mutex<Vec<Vec<Message>>>> {
        Arc::clone(&self.requests)
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn complete(
        &self,
        messages: &[Message],
        _tools: &[Tool],
        _options: &CompletionOptions,
    ) -> ProviderResult<Completion> {
        self.requests.lock().unwrap().push(messages.to_vec());

        let mut responses = self.responses.lock().unwrap();
        let message = if responses.is_empty() {
            // Return empty response if no more pre-configured responses
            Ok(Message::assistant().with_text(""))
        } else {
            responses.remove(0)
        }?;
        Ok(Completion::new(message, None, Usage::default()))
    }
}

/// An upstream failure for scripting
pub fn upstream_failure() -> ProviderError {
    ProviderError::Http {
        status: 503,
        body: "upstream unavailable".to_string(),
    }
}
