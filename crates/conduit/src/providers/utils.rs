use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_stream::try_stream;
use futures::{Stream, StreamExt};
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::{RequestBuilder, Response};
use serde_json::{json, Value};

use super::base::Usage;
use crate::errors::{ProviderError, ProviderResult};
use crate::models::message::Message;
use crate::models::role::Role;
use crate::models::tool::{Tool, ToolCall, ToolChoice};

lazy_static! {
    static ref INVALID_NAME_CHARS: Regex = Regex::new(r"[^a-zA-Z0-9_-]").unwrap();
    static ref VALID_NAME: Regex = Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap();
}

pub fn sanitize_function_name(name: &str) -> String {
    INVALID_NAME_CHARS.replace_all(name, "_").to_string()
}

pub fn is_valid_function_name(name: &str) -> bool {
    VALID_NAME.is_match(name)
}

/// Convert the tool catalogue to OpenAI's `tools` specification
pub fn tools_to_openai_spec(tools: &[Tool]) -> ProviderResult<Vec<Value>> {
    let mut tool_names = HashSet::new();
    let mut result = Vec::new();

    for tool in tools {
        let name = sanitize_function_name(&tool.name);
        if !tool_names.insert(name.clone()) {
            return Err(ProviderError::InvalidRequest(format!(
                "Duplicate tool name: {}",
                tool.name
            )));
        }

        result.push(json!({
            "type": "function",
            "function": {
                "name": name,
                "description": tool.description,
                "parameters": tool.parameters,
            }
        }));
    }

    Ok(result)
}

pub fn openai_tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!("auto"),
        ToolChoice::None => json!("none"),
        ToolChoice::Required => json!("required"),
        ToolChoice::Function(name) => json!({
            "type": "function",
            "function": {"name": sanitize_function_name(name)}
        }),
    }
}

fn tool_call_to_openai_spec(call: &ToolCall) -> Value {
    let arguments = if call.arguments.trim().is_empty() {
        "{}".to_string()
    } else {
        call.arguments.clone()
    };
    json!({
        "id": call.id,
        "type": "function",
        "function": {
            "name": sanitize_function_name(&call.name),
            "arguments": arguments,
        }
    })
}

/// Convert canonical messages to OpenAI's chat message specification.
///
/// The canonical model already follows OpenAI's schema, so this mostly passes the
/// history through, cleaning up tool call names and empty bodies along the way.
pub fn messages_to_openai_spec(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|message| {
            let mut converted = json!({
                "role": message.role,
                "content": message.content,
            });

            if message.role == Role::Assistant && message.has_tool_calls() {
                converted["tool_calls"] = Value::Array(
                    message
                        .tool_calls
                        .iter()
                        .map(tool_call_to_openai_spec)
                        .collect(),
                );
                if message.content.is_empty() {
                    converted["content"] = Value::Null;
                }
            }

            if let Some(id) = &message.tool_call_id {
                converted["tool_call_id"] = json!(id);
            }

            converted
        })
        .collect()
}

/// Convert an OpenAI chat completion response into a canonical message
pub fn openai_response_to_message(response: &Value) -> ProviderResult<(Message, Option<String>)> {
    let choice = response
        .get("choices")
        .and_then(|choices| choices.get(0))
        .ok_or(ProviderError::MissingField("choices"))?;
    let original = choice
        .get("message")
        .filter(|message| message.is_object())
        .ok_or(ProviderError::MissingField("message"))?;

    let mut message = Message::assistant();
    if let Some(text) = original.get("content").and_then(Value::as_str) {
        message = message.with_text(text);
    }

    if let Some(tool_calls) = original.get("tool_calls").and_then(Value::as_array) {
        for tool_call in tool_calls {
            let id = tool_call["id"].as_str().unwrap_or_default();
            let name = tool_call["function"]["name"].as_str().unwrap_or_default();
            // Some compatible backends send the arguments as an object
            let arguments = match &tool_call["function"]["arguments"] {
                Value::String(text) => text.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            message = message.with_tool_call(ToolCall::new(id, name, arguments));
        }
    }

    let finish_reason = choice
        .get("finish_reason")
        .and_then(Value::as_str)
        .map(String::from);

    Ok((message, finish_reason))
}

pub fn get_openai_usage(data: &Value) -> Usage {
    let usage = match data.get("usage") {
        Some(usage) if usage.is_object() => usage,
        _ => return Usage::default(),
    };
    let tokens = |key: &str| usage.get(key).and_then(Value::as_i64).map(|v| v as i32);

    Usage::new(
        tokens("prompt_tokens"),
        tokens("completion_tokens"),
        tokens("total_tokens"),
    )
}

pub fn check_openai_context_length_error(error: &Value) -> Option<ProviderError> {
    let code = error.get("code")?.as_str()?;
    if code == "context_length_exceeded" || code == "string_above_max_length" {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("Unknown error")
            .to_string();
        Some(ProviderError::ContextLengthExceeded(message))
    } else {
        None
    }
}

/// Read a JSON array of numbers, skipping anything that is not a number
pub fn float_array(value: &Value) -> Vec<f32> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_f64)
                .map(|v| v as f32)
                .collect()
        })
        .unwrap_or_default()
}

/// Attach per-provider headers and the per-call timeout to a request
pub fn prepare_request(
    builder: RequestBuilder,
    headers: &HashMap<String, String>,
    timeout: Option<Duration>,
) -> RequestBuilder {
    let builder = headers
        .iter()
        .fold(builder, |builder, (name, value)| builder.header(name, value));
    match timeout {
        Some(timeout) => builder.timeout(timeout),
        None => builder,
    }
}

/// Send a request, turning any non-success status into a single explicit failure
pub async fn send_request(builder: RequestBuilder) -> ProviderResult<Response> {
    let response = builder.send().await?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    tracing::error!(status = status.as_u16(), body = %body, "upstream request failed");

    if let Ok(parsed) = serde_json::from_str::<Value>(&body) {
        if let Some(err) = parsed.get("error").and_then(check_openai_context_length_error) {
            return Err(err);
        }
    }

    Err(ProviderError::Http {
        status: status.as_u16(),
        body,
    })
}

/// Split a streaming response body into lines.
///
/// Bytes are buffered until a newline arrives so that multi-byte characters split
/// across network chunks are decoded intact.
pub fn response_lines(response: Response) -> impl Stream<Item = ProviderResult<String>> + Send {
    try_stream! {
        let mut body = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            buffer.extend_from_slice(&chunk);

            while let Some(position) = buffer.iter().position(|byte| *byte == b'\n') {
                let line: Vec<u8> = buffer.drain(..=position).collect();
                yield String::from_utf8_lossy(&line)
                    .trim_end_matches(['\r', '\n'])
                    .to_string();
            }
        }

        if !buffer.is_empty() {
            yield String::from_utf8_lossy(&buffer)
                .trim_end_matches(['\r', '\n'])
                .to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::content::Content;
    use anyhow::Result;
    use futures::TryStreamExt;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const OPENAI_TOOL_USE_RESPONSE: &str = r#"{
        "choices": [{
            "message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "1",
                    "type": "function",
                    "function": {
                        "name": "example_fn",
                        "arguments": "{\"param\": \"value\"}"
                    }
                }]
            },
            "finish_reason": "tool_calls"
        }],
        "usage": {
            "prompt_tokens": 10,
            "completion_tokens": 25,
            "total_tokens": 35
        }
    }"#;

    #[test]
    fn test_sanitize_function_name() {
        assert_eq!(sanitize_function_name("hello-world"), "hello-world");
        assert_eq!(sanitize_function_name("hello world"), "hello_world");
        assert_eq!(sanitize_function_name("hello@world"), "hello_world");
        assert!(is_valid_function_name("vfs_list_dir"));
        assert!(!is_valid_function_name("vfs.list"));
    }

    #[test]
    fn test_messages_to_openai_spec() -> Result<()> {
        let messages = vec![
            Message::system("be brief"),
            Message::user().with_text("Hello").with_image("QUJD", "image/png"),
            Message::assistant().with_tool_call(ToolCall::new("call_1", "my tool", "")),
            Message::tool("call_1", "done"),
        ];
        let spec = messages_to_openai_spec(&messages);

        assert_eq!(spec.len(), 4);
        assert_eq!(spec[0], json!({"role": "system", "content": "be brief"}));
        assert_eq!(spec[1]["content"][0], json!({"type": "text", "text": "Hello"}));
        assert_eq!(
            spec[1]["content"][1]["image_url"]["url"],
            "data:image/png;base64,QUJD"
        );
        assert_eq!(spec[2]["content"], Value::Null);
        assert_eq!(spec[2]["tool_calls"][0]["function"]["name"], "my_tool");
        assert_eq!(spec[2]["tool_calls"][0]["function"]["arguments"], "{}");
        assert_eq!(spec[3]["tool_call_id"], "call_1");
        assert_eq!(spec[3]["content"], "done");
        Ok(())
    }

    #[test]
    fn test_tools_to_openai_spec() -> Result<()> {
        let tool = Tool::new(
            "test_tool",
            "A test tool",
            json!({
                "type": "object",
                "properties": {
                    "input": {
                        "type": "string",
                        "description": "Test parameter"
                    }
                },
                "required": ["input"]
            }),
        );

        let spec = tools_to_openai_spec(&[tool])?;

        assert_eq!(spec.len(), 1);
        assert_eq!(spec[0]["type"], "function");
        assert_eq!(spec[0]["function"]["name"], "test_tool");
        assert_eq!(spec[0]["function"]["parameters"]["required"][0], "input");
        Ok(())
    }

    #[test]
    fn test_tools_to_openai_spec_duplicate() {
        let tool = Tool::new("test_tool", "A test tool", json!({"type": "object"}));
        let result = tools_to_openai_spec(&[tool.clone(), tool]);
        assert!(matches!(result, Err(ProviderError::InvalidRequest(_))));
    }

    #[test]
    fn test_openai_response_to_message_tool_call() -> Result<()> {
        let response: Value = serde_json::from_str(OPENAI_TOOL_USE_RESPONSE)?;
        let (message, finish_reason) = openai_response_to_message(&response)?;

        assert!(message.content.is_empty());
        assert_eq!(message.tool_calls.len(), 1);
        assert_eq!(message.tool_calls[0].name, "example_fn");
        assert_eq!(message.tool_calls[0].parse_arguments()?["param"], "value");
        assert_eq!(finish_reason.as_deref(), Some("tool_calls"));

        let usage = get_openai_usage(&response);
        assert_eq!(usage.total_tokens, Some(35));
        Ok(())
    }

    #[test]
    fn test_openai_response_missing_schema() {
        let err = openai_response_to_message(&json!({"id": "x"})).unwrap_err();
        assert!(matches!(err, ProviderError::MissingField("choices")));

        let err = openai_response_to_message(&json!({"choices": [{"index": 0}]})).unwrap_err();
        assert!(matches!(err, ProviderError::MissingField("message")));
    }

    #[test]
    fn test_openai_response_text_parts() -> Result<()> {
        let (message, _) = openai_response_to_message(&json!({
            "choices": [{"message": {"role": "assistant", "content": "Hi"}}]
        }))?;
        assert_eq!(message.text(), "Hi");
        assert_eq!(message.content.to_parts(), vec![Content::text("Hi")]);
        Ok(())
    }

    #[test]
    fn test_check_openai_context_length_error() {
        let error = json!({
            "code": "context_length_exceeded",
            "message": "This message is too long"
        });
        let result = check_openai_context_length_error(&error);
        assert!(matches!(
            result,
            Some(ProviderError::ContextLengthExceeded(message)) if message == "This message is too long"
        ));

        let error = json!({"code": "other_error", "message": "Some other error"});
        assert!(check_openai_context_length_error(&error).is_none());
    }

    #[test]
    fn test_openai_tool_choice() {
        assert_eq!(openai_tool_choice(&ToolChoice::Auto), json!("auto"));
        assert_eq!(openai_tool_choice(&ToolChoice::Required), json!("required"));
        assert_eq!(
            openai_tool_choice(&ToolChoice::Function("vfs_read_file".into())),
            json!({"type": "function", "function": {"name": "vfs_read_file"}})
        );
    }

    #[tokio::test]
    async fn test_response_lines_splits_and_flushes() -> Result<()> {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("one\r\ntwo\n\nthree"))
            .mount(&mock_server)
            .await;

        let response = reqwest::get(mock_server.uri()).await?;
        let lines: Vec<String> = response_lines(response).try_collect().await?;
        assert_eq!(lines, vec!["one", "two", "", "three"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_send_request_maps_status() -> Result<()> {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"code": "context_length_exceeded", "message": "too long"}
            })))
            .mount(&mock_server)
            .await;

        let client = reqwest::Client::new();
        let err = send_request(client.post(mock_server.uri())).await.unwrap_err();
        assert!(matches!(err, ProviderError::ContextLengthExceeded(_)));
        Ok(())
    }
}
