use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::base::{Completion, CompletionOptions, Provider, Usage};
use super::configs::ProviderConfig;
use super::utils::{float_array, prepare_request, sanitize_function_name, send_request};
use crate::errors::{ProviderError, ProviderResult};
use crate::models::content::Content;
use crate::models::message::Message;
use crate::models::role::Role;
use crate::models::tool::{Tool, ToolCall, ToolChoice};

/// Adapter for Google's Gemini `generateContent` API.
///
/// Gemini only gets whole responses here; streaming falls back to the trait's
/// single-delta default.
pub struct GeminiProvider {
    client: Client,
    config: ProviderConfig,
}

impl GeminiProvider {
    pub fn new(client: Client, config: ProviderConfig) -> Self {
        Self { client, config }
    }

    fn model_path(&self) -> String {
        let model = self.config.model.trim_start_matches("models/");
        let host = self.config.host.trim_end_matches('/');
        if host.ends_with("/v1beta") || host.ends_with("/v1") {
            format!("models/{}", model)
        } else {
            format!("v1beta/models/{}", model)
        }
    }

    fn get_usage(data: &Value) -> Usage {
        let metadata = &data["usageMetadata"];
        let tokens = |key: &str| metadata.get(key).and_then(Value::as_i64).map(|v| v as i32);
        Usage::new(
            tokens("promptTokenCount"),
            tokens("candidatesTokenCount"),
            tokens("totalTokenCount"),
        )
    }

    async fn post(
        &self,
        method: &str,
        payload: &Value,
        options: &CompletionOptions,
    ) -> ProviderResult<Value> {
        let url = self
            .config
            .url(&format!("{}:{}", self.model_path(), method));
        tracing::debug!(provider = %self.config.id, model = %self.config.model, %url, "gemini request");

        let mut request = self.client.post(&url).json(payload);
        if let Some(key) = &self.config.api_key {
            request = request.query(&[("key", key)]);
        }
        let response = send_request(prepare_request(
            request,
            &self.config.headers,
            options.timeout,
        ))
        .await?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl Provider for GeminiProvider {
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
        let (system, contents) = messages_to_gemini_spec(messages);

        let mut payload = json!({ "contents": contents });
        if let Some(system) = system {
            payload["systemInstruction"] = json!({"parts": [{"text": system}]});
        }
        if !tools.is_empty() {
            payload["tools"] = json!([{ "functionDeclarations": tools_to_gemini_spec(tools) }]);
            payload["toolConfig"] = gemini_tool_config(&options.tool_choice);
        }
        let mut generation_config = serde_json::Map::new();
        if let Some(temp) = options.temperature {
            generation_config.insert("temperature".to_string(), json!(temp));
        }
        if let Some(tokens) = self.config.max_tokens {
            generation_config.insert("maxOutputTokens".to_string(), json!(tokens));
        }
        if !generation_config.is_empty() {
            payload["generationConfig"] = Value::Object(generation_config);
        }

        let response = self.post("generateContent", &payload, options).await?;
        let (message, finish_reason) = gemini_response_to_message(&response)?;

        Ok(Completion::new(
            message,
            finish_reason,
            Self::get_usage(&response),
        ))
    }

    async fn embed(&self, texts: &[String]) -> ProviderResult<Vec<Vec<f32>>> {
        let model = self.model_path();
        let model = model.trim_start_matches("v1beta/");
        let requests: Vec<Value> = texts
            .iter()
            .map(|text| {
                json!({
                    "model": model,
                    "content": {"parts": [{"text": text}]},
                })
            })
            .collect();

        let response = self
            .post(
                "batchEmbedContents",
                &json!({ "requests": requests }),
                &CompletionOptions::default(),
            )
            .await?;

        let embeddings = response
            .get("embeddings")
            .and_then(Value::as_array)
            .ok_or(ProviderError::MissingField("embeddings"))?;
        Ok(embeddings
            .iter()
            .map(|embedding| float_array(&embedding["values"]))
            .collect())
    }
}

fn content_to_gemini_part(content: &Content) -> Value {
    match content {
        Content::Text(text) => json!({"text": text.text}),
        Content::Image(image) => match image.inline() {
            Some(inline) => json!({
                "inlineData": {"mimeType": inline.mime_type, "data": inline.data}
            }),
            None => json!({"fileData": {"fileUri": image.url()}}),
        },
    }
}

/// Convert canonical messages to Gemini `contents`, returning the system text separately.
///
/// Only the leading system messages become the system text, later ones stay in
/// place as user text. Tool results become `functionResponse` parts; Gemini matches them by function
/// name, which is looked up from the assistant call that produced them.
pub fn messages_to_gemini_spec(messages: &[Message]) -> (Option<String>, Vec<Value>) {
    let mut system = Vec::new();
    let mut call_names: HashMap<&str, &str> = HashMap::new();
    let mut contents: Vec<(&'static str, Vec<Value>)> = Vec::new();

    for (position, message) in messages.iter().enumerate() {
        let (role, parts) = match message.role {
            Role::System if messages[..position].iter().all(|m| m.role == Role::System) => {
                system.push(message.text());
                continue;
            }
            Role::User | Role::System => (
                "user",
                message
                    .content
                    .to_parts()
                    .iter()
                    .map(content_to_gemini_part)
                    .collect::<Vec<_>>(),
            ),
            Role::Assistant => {
                let mut parts: Vec<Value> = message
                    .content
                    .to_parts()
                    .iter()
                    .filter(|part| part.as_text().map_or(true, |text| !text.is_empty()))
                    .map(content_to_gemini_part)
                    .collect();
                for call in &message.tool_calls {
                    call_names.insert(call.id.as_str(), call.name.as_str());
                    parts.push(json!({
                        "functionCall": {
                            "name": sanitize_function_name(&call.name),
                            "args": call.arguments_or_empty(),
                        }
                    }));
                }
                ("model", parts)
            }
            Role::Tool => {
                let id = message.tool_call_id.as_deref().unwrap_or_default();
                let name = call_names.get(id).copied().unwrap_or(id);
                let text = message.text();
                let response = serde_json::from_str::<Value>(&text)
                    .ok()
                    .filter(Value::is_object)
                    .unwrap_or_else(|| json!({ "content": text }));
                (
                    "user",
                    vec![json!({
                        "functionResponse": {
                            "name": sanitize_function_name(name),
                            "response": response,
                        }
                    })],
                )
            }
        };

        if parts.is_empty() {
            continue;
        }
        match contents.last_mut() {
            Some((last_role, last_parts)) if *last_role == role => last_parts.extend(parts),
            _ => contents.push((role, parts)),
        }
    }

    let system = system
        .into_iter()
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>();
    let system = (!system.is_empty()).then(|| system.join("\n\n"));

    let contents = contents
        .into_iter()
        .map(|(role, parts)| json!({"role": role, "parts": parts}))
        .collect();
    (system, contents)
}

pub fn tools_to_gemini_spec(tools: &[Tool]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "name": sanitize_function_name(&tool.name),
                "description": tool.description,
                "parameters": tool.parameters,
            })
        })
        .collect()
}

fn gemini_tool_config(choice: &ToolChoice) -> Value {
    let config = match choice {
        ToolChoice::Auto => json!({"mode": "AUTO"}),
        ToolChoice::None => json!({"mode": "NONE"}),
        ToolChoice::Required => json!({"mode": "ANY"}),
        ToolChoice::Function(name) => json!({
            "mode": "ANY",
            "allowedFunctionNames": [sanitize_function_name(name)],
        }),
    };
    json!({ "functionCallingConfig": config })
}

pub fn gemini_response_to_message(response: &Value) -> ProviderResult<(Message, Option<String>)> {
    let candidate = response
        .get("candidates")
        .and_then(|candidates| candidates.get(0))
        .ok_or(ProviderError::MissingField("candidates"))?;

    let finish_reason = candidate
        .get("finishReason")
        .and_then(Value::as_str)
        .map(String::from);

    // A candidate blocked by safety filters comes back without content
    let parts = candidate["content"]["parts"]
        .as_array()
        .cloned()
        .unwrap_or_default();

    let mut text = String::new();
    let mut message = Message::assistant();
    for part in &parts {
        if let Some(fragment) = part["text"].as_str() {
            text.push_str(fragment);
        }
        if let Some(call) = part.get("functionCall") {
            let arguments = match &call["args"] {
                Value::Null => "{}".to_string(),
                args => args.to_string(),
            };
            // Gemini has no call ids; they are assigned when the message is normalized
            message = message.with_tool_call(ToolCall::new(
                call["id"].as_str().unwrap_or_default(),
                call["name"].as_str().unwrap_or_default(),
                arguments,
            ));
        }
    }
    message.content.extend(text.into());

    Ok((message, finish_reason))
}
