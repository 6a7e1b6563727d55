use std::collections::BTreeMap;

use async_stream::try_stream;
use async_trait::async_trait;
use futures::{pin_mut, StreamExt};
use reqwest::Client;
use serde_json::{json, Value};

use super::base::{ChunkStream, Completion, CompletionOptions, Provider, StreamChunk, Usage};
use super::configs::{ProviderConfig, DEFAULT_ANTHROPIC_MAX_TOKENS};
use super::utils::{prepare_request, response_lines, sanitize_function_name, send_request};
use crate::errors::{ProviderError, ProviderResult};
use crate::models::content::Content;
use crate::models::message::Message;
use crate::models::role::Role;
use crate::models::tool::{Tool, ToolCall, ToolChoice};

pub const ANTHROPIC_API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: Client,
    config: ProviderConfig,
}

impl AnthropicProvider {
    pub fn new(client: Client, config: ProviderConfig) -> Self {
        Self { client, config }
    }

    fn get_usage(data: &Value) -> Usage {
        let tokens = |key: &str| data.get(key).and_then(Value::as_i64).map(|v| v as i32);
        Usage::new(tokens("input_tokens"), tokens("output_tokens"), None)
    }

    fn create_request_payload(
        &self,
        messages: &[Message],
        tools: &[Tool],
        options: &CompletionOptions,
        stream: bool,
    ) -> Value {
        let (system, anthropic_messages) = messages_to_anthropic_spec(messages);

        let mut payload = json!({
            "model": self.config.model,
            "messages": anthropic_messages,
            "max_tokens": self.config.max_tokens.unwrap_or(DEFAULT_ANTHROPIC_MAX_TOKENS),
        });

        if let Some(system) = system {
            payload["system"] = json!(system);
        }
        if !tools.is_empty() {
            payload["tools"] = json!(tools_to_anthropic_spec(tools));
            if let Some(choice) = anthropic_tool_choice(&options.tool_choice) {
                payload["tool_choice"] = choice;
            }
        }
        if let Some(temp) = options.temperature {
            payload["temperature"] = json!(temp);
        }
        if stream {
            payload["stream"] = json!(true);
        }

        payload
    }

    async fn post(
        &self,
        payload: &Value,
        options: &CompletionOptions,
    ) -> ProviderResult<reqwest::Response> {
        let url = self.config.url("v1/messages");
        tracing::debug!(provider = %self.config.id, model = %self.config.model, %url, "anthropic request");

        let mut request = self
            .client
            .post(&url)
            .header("anthropic-version", ANTHROPIC_API_VERSION)
            .json(payload);
        if let Some(key) = &self.config.api_key {
            request = request.header("x-api-key", key);
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
impl Provider for AnthropicProvider {
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
        let payload = self.create_request_payload(messages, tools, options, false);
        let response: Value = self.post(&payload, options).await?.json().await?;

        let message = anthropic_response_to_message(&response)?;
        let finish_reason = response
            .get("stop_reason")
            .and_then(Value::as_str)
            .map(String::from);
        let usage = Self::get_usage(&response["usage"]);

        Ok(Completion::new(message, finish_reason, usage))
    }

    async fn stream(
        &self,
        messages: &[Message],
        tools: &[Tool],
        options: &CompletionOptions,
    ) -> ProviderResult<ChunkStream> {
        let payload = self.create_request_payload(messages, tools, options, true);
        let response = self.post(&payload, options).await?;

        Ok(Box::pin(try_stream! {
            let lines = response_lines(response);
            pin_mut!(lines);

            let mut accumulator = AnthropicStreamAccumulator::new();
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
}

fn content_to_anthropic_block(content: &Content) -> Value {
    match content {
        Content::Text(text) => json!({"type": "text", "text": text.text}),
        Content::Image(image) => match image.inline() {
            Some(inline) => json!({
                "type": "image",
                "source": {
                    "type": "base64",
                    "media_type": inline.mime_type,
                    "data": inline.data,
                }
            }),
            None => json!({
                "type": "image",
                "source": {"type": "url", "url": image.url()}
            }),
        },
    }
}

fn message_to_anthropic_turn(message: &Message) -> (&'static str, Vec<Value>) {
    match message.role {
        Role::Tool => (
            "user",
            vec![json!({
                "type": "tool_result",
                "tool_use_id": message.tool_call_id.clone().unwrap_or_default(),
                "content": message.text(),
            })],
        ),
        Role::Assistant => {
            let mut blocks: Vec<Value> = message
                .content
                .to_parts()
                .iter()
                .filter(|part| part.as_text().map_or(true, |text| !text.is_empty()))
                .map(content_to_anthropic_block)
                .collect();
            blocks.extend(message.tool_calls.iter().map(|call| {
                json!({
                    "type": "tool_use",
                    "id": call.id,
                    "name": sanitize_function_name(&call.name),
                    "input": call.arguments_or_empty(),
                })
            }));
            ("assistant", blocks)
        }
        Role::User | Role::System => (
            "user",
            message
                .content
                .to_parts()
                .iter()
                .map(content_to_anthropic_block)
                .collect(),
        ),
    }
}

/// Restructure canonical messages into Anthropic's shape.
///
/// The leading system messages move into the returned top level system text. A
/// system message later in the history stays in place as user text. Adjacent turns
/// with the same role are merged and the result always opens with a user turn.
pub fn messages_to_anthropic_spec(messages: &[Message]) -> (Option<String>, Vec<Value>) {
    let leading = messages
        .iter()
        .take_while(|message| message.role == Role::System)
        .count();
    let system: Vec<String> = messages[..leading]
        .iter()
        .map(Message::text)
        .filter(|text| !text.is_empty())
        .collect();

    let mut turns: Vec<(&'static str, Vec<Value>)> = Vec::new();
    for message in &messages[leading..] {
        let (role, blocks) = message_to_anthropic_turn(message);
        if blocks.is_empty() {
            continue;
        }
        match turns.last_mut() {
            Some((last_role, last_blocks)) if *last_role == role => last_blocks.extend(blocks),
            _ => turns.push((role, blocks)),
        }
    }

    let mut spec: Vec<Value> = turns
        .into_iter()
        .map(|(role, content)| json!({"role": role, "content": content}))
        .collect();

    if spec.first().map_or(true, |turn| turn["role"] != "user") {
        spec.insert(0, json!({"role": "user", "content": ""}));
    }

    let system = if system.is_empty() {
        None
    } else {
        Some(system.join("\n\n"))
    };
    (system, spec)
}

pub fn tools_to_anthropic_spec(tools: &[Tool]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "name": sanitize_function_name(&tool.name),
                "description": tool.description,
                "input_schema": tool.parameters,
            })
        })
        .collect()
}

fn anthropic_tool_choice(choice: &ToolChoice) -> Option<Value> {
    match choice {
        // auto is the upstream default
        ToolChoice::Auto => None,
        ToolChoice::None => Some(json!({"type": "none"})),
        ToolChoice::Required => Some(json!({"type": "any"})),
        ToolChoice::Function(name) => Some(json!({
            "type": "tool",
            "name": sanitize_function_name(name),
        })),
    }
}

pub fn anthropic_response_to_message(response: &Value) -> ProviderResult<Message> {
    let blocks = response
        .get("content")
        .and_then(Value::as_array)
        .ok_or(ProviderError::MissingField("content"))?;

    let mut text = Vec::new();
    let mut tool_calls = Vec::new();
    for block in blocks {
        match block["type"].as_str() {
            Some("text") => text.push(block["text"].as_str().unwrap_or_default()),
            Some("tool_use") => tool_calls.push(ToolCall::new(
                block["id"].as_str().unwrap_or_default(),
                block["name"].as_str().unwrap_or_default(),
                tool_input_text(&block["input"]),
            )),
            _ => {}
        }
    }

    Ok(tool_calls
        .into_iter()
        .fold(Message::assistant().with_text(text.concat()), |message, call| {
            message.with_tool_call(call)
        }))
}

fn tool_input_text(input: &Value) -> String {
    match input {
        Value::Null => "{}".to_string(),
        other => other.to_string(),
    }
}

#[derive(Debug)]
enum BlockBuilder {
    Text(String),
    ToolUse {
        id: String,
        name: String,
        input: Value,
        partial_json: String,
    },
}

/// Assembles Anthropic's typed SSE events into one assistant message.
///
/// `tool_use` blocks collect `input_json_delta` fragments by block index. When a
/// block got no fragments, the `input` object from `content_block_start` is used.
#[derive(Debug, Default)]
pub struct AnthropicStreamAccumulator {
    current_event_type: Option<String>,
    blocks: BTreeMap<u64, BlockBuilder>,
    finish_reason: Option<String>,
    input_tokens: Option<i32>,
    output_tokens: Option<i32>,
    done: bool,
}

impl AnthropicStreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn feed_line(&mut self, line: &str) -> ProviderResult<Option<String>> {
        let line = line.trim_end();
        if line.is_empty() || line.starts_with(':') {
            return Ok(None);
        }

        if let Some(event_type) = line.strip_prefix("event:") {
            self.current_event_type = Some(event_type.trim().to_string());
            return Ok(None);
        }

        let data = match line.strip_prefix("data:") {
            Some(data) => data.trim(),
            None => return Ok(None),
        };

        let event: Value = serde_json::from_str(data)?;
        let stashed = self.current_event_type.take();
        let event_type = event["type"]
            .as_str()
            .map(String::from)
            .or(stashed)
            .unwrap_or_default();

        self.apply(&event_type, &event)
    }

    fn apply(&mut self, event_type: &str, event: &Value) -> ProviderResult<Option<String>> {
        match event_type {
            "message_start" => {
                let usage = &event["message"]["usage"];
                self.input_tokens = usage["input_tokens"].as_i64().map(|v| v as i32);
            }
            "content_block_start" => {
                let index = event["index"].as_u64().unwrap_or(0);
                let block = &event["content_block"];
                let builder = match block["type"].as_str() {
                    Some("tool_use") => BlockBuilder::ToolUse {
                        id: block["id"].as_str().unwrap_or_default().to_string(),
                        name: block["name"].as_str().unwrap_or_default().to_string(),
                        input: block["input"].clone(),
                        partial_json: String::new(),
                    },
                    _ => BlockBuilder::Text(block["text"].as_str().unwrap_or_default().to_string()),
                };
                self.blocks.insert(index, builder);
            }
            "content_block_delta" => {
                let index = event["index"].as_u64().unwrap_or(0);
                let delta = &event["delta"];
                match delta["type"].as_str() {
                    Some("text_delta") => {
                        let text = delta["text"].as_str().unwrap_or_default();
                        match self
                            .blocks
                            .entry(index)
                            .or_insert_with(|| BlockBuilder::Text(String::new()))
                        {
                            BlockBuilder::Text(buffer) => buffer.push_str(text),
                            BlockBuilder::ToolUse { .. } => {
                                return Err(ProviderError::Stream(format!(
                                    "text delta for tool_use block {}",
                                    index
                                )))
                            }
                        }
                        if !text.is_empty() {
                            return Ok(Some(text.to_string()));
                        }
                    }
                    Some("input_json_delta") => {
                        let fragment = delta["partial_json"].as_str().unwrap_or_default();
                        match self.blocks.get_mut(&index) {
                            Some(BlockBuilder::ToolUse { partial_json, .. }) => {
                                partial_json.push_str(fragment)
                            }
                            _ => {
                                return Err(ProviderError::Stream(format!(
                                    "input_json_delta for unknown tool_use block {}",
                                    index
                                )))
                            }
                        }
                    }
                    _ => {}
                }
            }
            "message_delta" => {
                if let Some(reason) = event["delta"]["stop_reason"].as_str() {
                    self.finish_reason = Some(reason.to_string());
                }
                if let Some(tokens) = event["usage"]["output_tokens"].as_i64() {
                    self.output_tokens = Some(tokens as i32);
                }
            }
            "message_stop" => self.done = true,
            "error" => {
                let message = event["error"]["message"]
                    .as_str()
                    .unwrap_or("unknown stream error");
                return Err(ProviderError::Api(message.to_string()));
            }
            _ => {}
        }
        Ok(None)
    }

    pub fn into_completion(self) -> ProviderResult<Completion> {
        if !self.done {
            return Err(ProviderError::Stream(
                "stream closed before message_stop".to_string(),
            ));
        }

        let mut text = String::new();
        let mut message = Message::assistant();
        for block in self.blocks.into_values() {
            match block {
                BlockBuilder::Text(fragment) => text.push_str(&fragment),
                BlockBuilder::ToolUse {
                    id,
                    name,
                    input,
                    partial_json,
                } => {
                    let arguments = if partial_json.trim().is_empty() {
                        tool_input_text(&input)
                    } else {
                        partial_json
                    };
                    message = message.with_tool_call(ToolCall::new(id, name, arguments));
                }
            }
        }
        message.content.extend(text.into());

        let usage = Usage::new(self.input_tokens, self.output_tokens, None);
        Ok(Completion::new(message, self.finish_reason, usage))
    }
}
