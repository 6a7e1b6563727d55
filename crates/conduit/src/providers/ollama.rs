use async_stream::try_stream;
use async_trait::async_trait;
use futures::{pin_mut, StreamExt};
use reqwest::Client;
use serde_json::{json, Value};

use super::base::{ChunkStream, Completion, CompletionOptions, Provider, StreamChunk, Usage};
use super::configs::ProviderConfig;
use super::utils::{
    float_array, prepare_request, response_lines, sanitize_function_name, send_request,
    tools_to_openai_spec,
};
use crate::errors::{ProviderError, ProviderResult};
use crate::models::message::Message;
use crate::models::role::Role;
use crate::models::tool::{Tool, ToolCall};

pub struct OllamaProvider {
    client: Client,
    config: ProviderConfig,
}

impl OllamaProvider {
    pub fn new(client: Client, config: ProviderConfig) -> Self {
        Self { client, config }
    }

    fn get_usage(data: &Value) -> Usage {
        let tokens = |key: &str| data.get(key).and_then(Value::as_i64).map(|v| v as i32);
        Usage::new(tokens("prompt_eval_count"), tokens("eval_count"), None)
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
            "messages": messages_to_ollama_spec(messages),
            "stream": stream,
        });
        // Ollama has no tool_choice; the catalogue is all it gets
        if !tools.is_empty() {
            payload["tools"] = json!(tools_to_openai_spec(tools)?);
        }
        let mut model_options = serde_json::Map::new();
        if let Some(temp) = options.temperature {
            model_options.insert("temperature".to_string(), json!(temp));
        }
        if let Some(tokens) = self.config.max_tokens {
            model_options.insert("num_predict".to_string(), json!(tokens));
        }
        if !model_options.is_empty() {
            payload["options"] = Value::Object(model_options);
        }
        Ok(payload)
    }

    async fn post(
        &self,
        path: &str,
        payload: &Value,
        options: &CompletionOptions,
    ) -> ProviderResult<reqwest::Response> {
        let url = self.config.url(path);
        tracing::debug!(provider = %self.config.id, model = %self.config.model, %url, "ollama request");

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
impl Provider for OllamaProvider {
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
        let response: Value = self.post("api/chat", &payload, options).await?.json().await?;

        if let Some(error) = response.get("error").and_then(Value::as_str) {
            return Err(ProviderError::Api(error.to_string()));
        }
        let original = response
            .get("message")
            .filter(|message| message.is_object())
            .ok_or(ProviderError::MissingField("message"))?;

        let text = original["content"].as_str().unwrap_or_default();
        let message = ollama_message_to_message(original, text);
        let finish_reason = response
            .get("done_reason")
            .and_then(Value::as_str)
            .map(String::from);

        Ok(Completion::new(
            message,
            finish_reason,
            Self::get_usage(&response),
        ))
    }

    async fn stream(
        &self,
        messages: &[Message],
        tools: &[Tool],
        options: &CompletionOptions,
    ) -> ProviderResult<ChunkStream> {
        let payload = self.create_request_payload(messages, tools, options, true)?;
        let response = self.post("api/chat", &payload, options).await?;

        Ok(Box::pin(try_stream! {
            let lines = response_lines(response);
            pin_mut!(lines);

            let mut accumulator = OllamaStreamAccumulator::default();
            while let Some(line) = lines.next().await {
                if let Some(delta) = accumulator.feed_line(&line?)? {
                    yield StreamChunk::Delta(delta);
                }
                if accumulator.done {
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
            .post("api/embed", &payload, &CompletionOptions::default())
            .await?
            .json()
            .await?;

        let embeddings = response
            .get("embeddings")
            .and_then(Value::as_array)
            .ok_or(ProviderError::MissingField("embeddings"))?;
        Ok(embeddings.iter().map(float_array).collect())
    }
}

/// Convert canonical messages to Ollama's chat format.
///
/// Ollama has no tool role with call ids, so tool results are sent back as user
/// text tagged with the call id they answer.
pub fn messages_to_ollama_spec(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|message| {
            if message.role == Role::Tool {
                let id = message.tool_call_id.as_deref().unwrap_or_default();
                return json!({
                    "role": "user",
                    "content": format!("[tool:{}] {}", id, message.text()),
                });
            }

            let mut converted = json!({
                "role": message.role,
                "content": message.text(),
            });

            let images: Vec<&str> = message
                .content
                .images()
                .into_iter()
                .filter_map(|image| image.inline().map(|inline| inline.data))
                .collect();
            if !images.is_empty() {
                converted["images"] = json!(images);
            }

            if message.has_tool_calls() {
                converted["tool_calls"] = message
                    .tool_calls
                    .iter()
                    .map(|call| {
                        json!({
                            "function": {
                                "name": sanitize_function_name(&call.name),
                                "arguments": call.arguments_or_empty(),
                            }
                        })
                    })
                    .collect();
            }

            converted
        })
        .collect()
}

/// Build an assistant message from an Ollama `message` object, using `text` as its body
fn ollama_message_to_message(original: &Value, text: &str) -> Message {
    let mut message = Message::assistant().with_text(text);
    if let Some(tool_calls) = original.get("tool_calls").and_then(Value::as_array) {
        for call in tool_calls {
            let function = &call["function"];
            let arguments = match &function["arguments"] {
                Value::String(raw) => raw.clone(),
                Value::Null => "{}".to_string(),
                other => other.to_string(),
            };
            // Ollama usually omits ids; normalization assigns call_<index> later
            message = message.with_tool_call(ToolCall::new(
                call["id"].as_str().unwrap_or_default(),
                function["name"].as_str().unwrap_or_default(),
                arguments,
            ));
        }
    }
    message
}

/// Assembles Ollama's newline delimited JSON stream.
///
/// Text fragments are concatenated. Tool calls come whole, so the last `message`
/// object that carried tool calls becomes the base of the final message.
#[derive(Debug, Default)]
pub struct OllamaStreamAccumulator {
    text: String,
    base: Option<Value>,
    last: Option<Value>,
    finish_reason: Option<String>,
    usage: Usage,
    done: bool,
}

impl OllamaStreamAccumulator {
    pub fn feed_line(&mut self, line: &str) -> ProviderResult<Option<String>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        let chunk: Value = serde_json::from_str(line)?;
        if let Some(error) = chunk.get("error").and_then(Value::as_str) {
            return Err(ProviderError::Api(error.to_string()));
        }

        let mut delta = None;
        if let Some(message) = chunk.get("message").filter(|m| m.is_object()) {
            if let Some(content) = message["content"].as_str().filter(|c| !c.is_empty()) {
                self.text.push_str(content);
                delta = Some(content.to_string());
            }
            let has_tool_calls = message["tool_calls"]
                .as_array()
                .map_or(false, |calls| !calls.is_empty());
            if has_tool_calls {
                self.base = Some(message.clone());
            }
            self.last = Some(message.clone());
        }

        if chunk["done"].as_bool().unwrap_or(false) {
            self.done = true;
            self.finish_reason = chunk
                .get("done_reason")
                .and_then(Value::as_str)
                .map(String::from);
            self.usage = OllamaProvider::get_usage(&chunk);
        }

        Ok(delta)
    }

    pub fn into_completion(self) -> ProviderResult<Completion> {
        if !self.done {
            return Err(ProviderError::Stream(
                "stream closed before done".to_string(),
            ));
        }
        let base = self
            .base
            .or(self.last)
            .ok_or(ProviderError::MissingField("message"))?;

        Ok(Completion::new(
            ollama_message_to_message(&base, &self.text),
            self.finish_reason,
            self.usage,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn _provider(mock_server: &MockServer) -> OllamaProvider {
        OllamaProvider::new(
            Client::new(),
            ProviderConfig::new("ollama", mock_server.uri(), "qwen2.5"),
        )
    }

    fn ndjson(lines: &[Value]) -> String {
        lines
            .iter()
            .map(|line| format!("{}\n", line))
            .collect::<String>()
    }

    #[test]
    fn test_tool_messages_become_tagged_user_text() {
        let messages = vec![
            Message::user().with_text("list /docs").with_image("QUJD", "image/png"),
            Message::assistant().with_tool_call(ToolCall::new("call_0", "vfs_list_dir", r#"{"path":"/docs"}"#)),
            Message::tool("call_0", "a.txt"),
        ];
        let spec = messages_to_ollama_spec(&messages);

        assert_eq!(spec[0]["images"], json!(["QUJD"]));
        assert_eq!(
            spec[1]["tool_calls"][0]["function"],
            json!({"name": "vfs_list_dir", "arguments": {"path": "/docs"}})
        );
        assert_eq!(spec[2], json!({"role": "user", "content": "[tool:call_0] a.txt"}));
    }

    #[tokio::test]
    async fn test_complete_basic() -> Result<()> {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(json!({"model": "qwen2.5", "stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "message": {"role": "assistant", "content": "Hi there"},
                "done": true,
                "done_reason": "stop",
                "prompt_eval_count": 3,
                "eval_count": 2
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let completion = _provider(&mock_server)
            .complete(&[Message::user().with_text("hi")], &[], &CompletionOptions::default())
            .await?;
        assert_eq!(completion.message.text(), "Hi there");
        assert_eq!(completion.usage.total_tokens, Some(5));
        assert_eq!(completion.finish_reason.as_deref(), Some("stop"));
        Ok(())
    }

    #[tokio::test]
    async fn test_complete_missing_message() -> Result<()> {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"done": true})))
            .mount(&mock_server)
            .await;

        let err = _provider(&mock_server)
            .complete(&[Message::user().with_text("hi")], &[], &CompletionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::MissingField("message")));
        Ok(())
    }

    #[tokio::test]
    async fn test_stream_tool_call_with_accumulated_text() -> Result<()> {
        let body = ndjson(&[
            json!({"message": {"role": "assistant", "content": "Let me "}, "done": false}),
            json!({"message": {"role": "assistant", "content": "check."}, "done": false}),
            json!({"message": {"role": "assistant", "content": "", "tool_calls": [
                {"function": {"name": "vfs_list_dir", "arguments": {"path": "/docs"}}}
            ]}, "done": false}),
            json!({"message": {"role": "assistant", "content": ""}, "done": true, "done_reason": "stop", "eval_count": 9}),
        ]);

        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&mock_server)
            .await;

        let chunks: Vec<StreamChunk> = _provider(&mock_server)
            .stream(&[Message::user().with_text("list /docs")], &[], &CompletionOptions::default())
            .await?
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], StreamChunk::Delta("Let me ".to_string()));
        if let StreamChunk::Done(completion) = &chunks[2] {
            assert_eq!(completion.message.text(), "Let me check.");
            let call = &completion.message.tool_calls[0];
            assert!(call.id.is_empty());
            assert_eq!(call.parse_arguments()?["path"], "/docs");
            assert_eq!(completion.usage.output_tokens, Some(9));
        } else {
            panic!("Expected the terminal message last");
        }
        Ok(())
    }

    #[test]
    fn test_accumulator_error_line() {
        let mut accumulator = OllamaStreamAccumulator::default();
        let result = accumulator.feed_line(r#"{"error": "model not found"}"#);
        assert!(matches!(result, Err(ProviderError::Api(_))));
    }

    #[tokio::test]
    async fn test_embed() -> Result<()> {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "embeddings": [[0.1, 0.2], [0.3, 0.4]]
            })))
            .mount(&mock_server)
            .await;

        let embeddings = _provider(&mock_server)
            .embed(&["a".to_string(), "b".to_string()])
            .await?;
        assert_eq!(embeddings.len(), 2);
        assert_eq!(embeddings[1], vec![0.3, 0.4]);
        Ok(())
    }
}
