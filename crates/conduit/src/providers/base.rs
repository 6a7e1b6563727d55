use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::errors::{ProviderError, ProviderResult};
use crate::models::message::Message;
use crate::models::tool::{Tool, ToolChoice};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<i32>,
    pub output_tokens: Option<i32>,
    pub total_tokens: Option<i32>,
}

impl Usage {
    pub fn new(
        input_tokens: Option<i32>,
        output_tokens: Option<i32>,
        total_tokens: Option<i32>,
    ) -> Self {
        // Fill in the total when the upstream only reports the parts
        let total_tokens = total_tokens.or(match (input_tokens, output_tokens) {
            (Some(input), Some(output)) => Some(input + output),
            _ => None,
        });
        Self {
            input_tokens,
            output_tokens,
            total_tokens,
        }
    }
}

/// Per-call knobs shared by every wire format
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionOptions {
    pub tool_choice: ToolChoice,
    pub temperature: Option<f32>,
    pub timeout: Option<Duration>,
}

/// One finished assistant response
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub message: Message,
    pub finish_reason: Option<String>,
    pub usage: Usage,
}

impl Completion {
    pub fn new(message: Message, finish_reason: Option<String>, usage: Usage) -> Self {
        Self {
            message,
            finish_reason,
            usage,
        }
    }
}

/// An item of a streamed response: text deltas followed by exactly one `Done`
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    Delta(String),
    Done(Completion),
}

pub type ChunkStream = BoxStream<'static, ProviderResult<StreamChunk>>;

/// Base trait for the wire format adapters (OpenAI, Anthropic, Gemini, Ollama)
#[async_trait]
pub trait Provider: Send + Sync {
    /// The id of the provider record this adapter was built from
    fn name(&self) -> &str;

    /// The model every call is made against
    fn model(&self) -> &str;

    /// Generate the next assistant message
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[Tool],
        options: &CompletionOptions,
    ) -> ProviderResult<Completion>;

    /// Generate the next assistant message as a stream of text deltas.
    ///
    /// Formats without incremental support answer with the full completion as a
    /// single delta.
    async fn stream(
        &self,
        messages: &[Message],
        tools: &[Tool],
        options: &CompletionOptions,
    ) -> ProviderResult<ChunkStream> {
        let completion = self.complete(messages, tools, options).await?;
        let text = completion.message.text();

        let mut chunks = Vec::with_capacity(2);
        if !text.is_empty() {
            chunks.push(Ok(StreamChunk::Delta(text)));
        }
        chunks.push(Ok(StreamChunk::Done(completion)));
        Ok(stream::iter(chunks).boxed())
    }

    /// Embed each text into a vector
    async fn embed(&self, _texts: &[String]) -> ProviderResult<Vec<Vec<f32>>> {
        Err(ProviderError::Unsupported("embedding"))
    }

    /// Score each document against the query, in document order
    async fn rerank(&self, _query: &str, _documents: &[String]) -> ProviderResult<Vec<f32>> {
        Err(ProviderError::Unsupported("rerank"))
    }
}
