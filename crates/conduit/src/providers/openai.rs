use async_stream::try_stream;
use async_trait::async_trait;
use futures::{pin_mut, StreamExt};
use reqwest::Client;
use serde_json::{json, Value};

use super::base::{ChunkStream, Completion, CompletionOptions, Provider, StreamChunk, Usage};
use super::configs::ProviderConfig;
use super::utils::{
    check_openai_context_length_error, float_array, get_openai_usage, messages_to_openai_spec,
    openai_response_to_message, openai_tool_choice, prepare_request, response_lines,
    send_request, tools_to_openai_spec,
};
use crate::errors::{ProviderError, ProviderResult};
use crate::models::message::Message;
use crate::models::tool::{Tool, ToolCall};

pub struct OpenAiProvider {
    client: Client,
    config: ProviderConfig,
}

impl OpenAiProvider {
    pub fn new(client: Client, config: ProviderConfig) -> Self {
        Self { client, config }
    }

    /// Most configured hosts already end in `/v1`; only add it when missing
    fn endpoint(&self, path: &str) -> String {
        if self.config.host.trim_end_matches('/').ends_with("/v1") {
            self.config.url(path)
        } else {
            self.config.url(&format!("v1/{}", path))
        }
    }

    fn create_request_payload(
        &self,
        messages: &[Message],
        tools: &[Tool],
        options: &CompletionOptions,
        stream: bool,
    ) -> ProviderResult<Value> {
        let mut payload = json!({
            "model": self.config.model,
            "messages": messages_to_openai_spec(messages),
        });
        let object = payload
            .as_object_mut()
            .ok_or_else(|| ProviderError::InvalidRequest("payload is not an object".into()))?;

        if !tools.is_empty() {
            object.insert("tools".to_string(), json!(tools_to_openai_spec(tools)?));
            object.insert(
                "tool_choice".to_string(),
                openai_tool_choice(&options.tool_choice),
            );
        }
        if let Some(temp) = options.temperature {
            object.insert("temperature".to_string(), json!(temp));
        }
        if let Some(tokens) = self.config.max_tokens {
            object.insert("max_tokens".to_string(), json!(tokens));
        }
        if stream {
            object.insert("stream".to_string(), json!(true));
        }

        Ok(payload)
    }

    async fn post(
        &self,
        path: &str,
        payload: &Value,
        options: &CompletionOptions,
    ) -> ProviderResult<reqwest::Response> {
        let url = self.endpoint(path);
        tracing::debug!(provider = %self.config.id, model = %self.config.model, %url, "openai request");

        let mut request = self.client.post(&url).json(payload);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }
        send_request(prepare_request(
            request,
            &self.config.headers,
            options.timeout,
        ))
        .await
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.config.id
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[Tool],
        options: &CompletionOptions,
    ) -> ProviderResult<Completion> {
        let payload = self.create_request_payload(messages, tools, options, false)?;
        let response: Value = self
            .post("chat/completions", &payload, options)
            .await?
            .json()
            .await?;

        // Raise specific error if context length is exceeded
        if let Some(error) = response.get("error") {
            if let Some(err) = check_openai_context_length_error(error) {
                return Err(err);
            }
            return Err(ProviderError::Api(error.to_string()));
        }

        let (message, finish_reason) = openai_response_to_message(&response)?;
        let usage = get_openai_usage(&response);

        Ok(Completion::new(message, finish_reason, usage))
    }

    async fn stream(
        &self,
        messages: &[Message],
        tools: &[Tool],
        options: &CompletionOptions,
    ) -> ProviderResult<ChunkStream> {
        let payload = self.create_request_payload(messages, tools, options, true)?;
        let response = self.post("chat/completions", &payload, options).await?;

        Ok(Box::pin(try_stream! {
            let lines = response_lines(response);
            pin_mut!(lines);

            let mut accumulator = OpenAiStreamAccumulator::new();
            while let Some(line) = lines.next().await {
                if let Some(delta) = accumulator.feed_line(&line?)? {
                    yield StreamChunk::Delta(delta);
                }
                if accumulator.is_done() {
                    break;
                }
            }

            yield StreamChunk::Done(accumulator.into_completion()?);
        }))
    }

    async fn embed(&self, texts: &[String]) -> ProviderResult<Vec<Vec<f32>>> {
        let payload = json!({
            "model": self.config.model,
            "input": texts,
        });
        let response: Value = self
            .post("embeddings", &payload, &CompletionOptions::default())
            .await?
            .json()
            .await?;

        let mut data: Vec<(u64, Vec<f32>)> = response
            .get("data")
            .and_then(Value::as_array)
            .ok_or(ProviderError::MissingField("data"))?
            .iter()
            .enumerate()
            .map(|(position, item)| {
                let index = item["index"].as_u64().unwrap_or(position as u64);
                (index, float_array(&item["embedding"]))
            })
            .collect();
        data.sort_by_key(|(index, _)| *index);

        Ok(data.into_iter().map(|(_, embedding)| embedding).collect())
    }

    async fn rerank(&self, query: &str, documents: &[String]) -> ProviderResult<Vec<f32>> {
        let payload = json!({
            "model": self.config.model,
            "query": query,
            "documents": documents,
        });
        let response: Value = self
            .post("rerank", &payload, &CompletionOptions::default())
            .await?
            .json()
            .await?;

        let results = response
            .get("results")
            .and_then(Value::as_array)
            .ok_or(ProviderError::MissingField("results"))?;

        let mut scores = vec![0.0; documents.len()];
        for result in results {
            let index = result["index"]
                .as_u64()
                .ok_or(ProviderError::MissingField("index"))? as usize;
            let score = result["relevance_score"].as_f64().unwrap_or_default() as f32;
            if let Some(slot) = scores.get_mut(index) {
                *slot = score;
            }
        }
        Ok(scores)
    }
}

/// Assembles an OpenAI `data:` line stream into one assistant message.
///
/// Tool calls arrive as a sparse array keyed by `index`; the name usually comes in
/// the first fragment and the argument text is spread over the following ones.
#[derive(Debug, Default)]
pub struct OpenAiStreamAccumulator {
    text: String,
    tool_call_builders: Vec<ToolCallBuilder>,
    finish_reason: Option<String>,
    usage: Usage,
    done: bool,
}

#[derive(Debug, Default)]
struct ToolCallBuilder {
    id: String,
    name: String,
    arguments: String,
}

impl OpenAiStreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the `[DONE]` sentinel has been received
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed one line of the stream, returning the text delta it carried, if any
    pub fn feed_line(&mut self, line: &str) -> ProviderResult<Option<String>> {
        let line = line.trim_end();
        if line.is_empty() || line.starts_with(':') {
            return Ok(None);
        }

        let data = match line.strip_prefix("data:") {
            Some(data) => data.trim(),
            None => return Ok(None),
        };

        if data == "[DONE]" {
            self.done = true;
            return Ok(None);
        }

        let chunk: Value = serde_json::from_str(data)?;
        if let Some(error) = chunk.get("error").filter(|e| !e.is_null()) {
            return Err(check_openai_context_length_error(error)
                .unwrap_or_else(|| ProviderError::Api(error.to_string())));
        }

        if let Some(usage) = chunk.get("usage").filter(|u| u.is_object()) {
            self.usage = get_openai_usage(&json!({ "usage": usage }));
        }

        let choice = &chunk["choices"][0];
        if let Some(reason) = choice["finish_reason"].as_str() {
            self.finish_reason = Some(reason.to_string());
        }

        let delta = &choice["delta"];
        if delta.is_null() {
            return Ok(None);
        }

        if let Some(tool_calls) = delta["tool_calls"].as_array() {
            for fragment in tool_calls {
                let index = fragment["index"].as_u64().unwrap_or(0) as usize;
                if self.tool_call_builders.len() <= index {
                    self.tool_call_builders
                        .resize_with(index + 1, ToolCallBuilder::default);
                }
                let builder = &mut self.tool_call_builders[index];

                if let Some(id) = fragment["id"].as_str().filter(|id| !id.is_empty()) {
                    builder.id = id.to_string();
                }
                let function = &fragment["function"];
                if let Some(name) = function["name"].as_str() {
                    // Some compatible servers repeat the whole name on every chunk
                    if name.starts_with(builder.name.as_str()) {
                        builder.name = name.to_string();
                    } else {
                        builder.name.push_str(name);
                    }
                }
                if let Some(arguments) = function["arguments"].as_str() {
                    builder.arguments.push_str(arguments);
                }
            }
        }

        match delta["content"].as_str() {
            Some(content) if !content.is_empty() => {
                self.text.push_str(content);
                Ok(Some(content.to_string()))
            }
            _ => Ok(None),
        }
    }

    pub fn into_completion(self) -> ProviderResult<Completion> {
        if !self.done && self.finish_reason.is_none() {
            return Err(ProviderError::Stream(
                "stream closed before [DONE]".to_string(),
            ));
        }

        let message = self
            .tool_call_builders
            .into_iter()
            // Gaps in the index sequence leave builders that never got a fragment
            .filter(|builder| !builder.name.is_empty() || !builder.arguments.is_empty())
            .fold(Message::assistant().with_text(self.text), |message, b| {
                message.with_tool_call(ToolCall::new(b.id, b.name, b.arguments))
            });

        Ok(Completion::new(message, self.finish_reason, self.usage))
    }
}
