use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Map, Value};
use url::Url;

use super::output::ToolOutput;
use super::registry::{ToolHandler, ToolSpec};
use crate::errors::{AgentError, AgentResult};
use crate::models::tool::Tool;

pub const DEFAULT_MAX_CHARS: usize = 20_000;
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetches a web page with a single GET and returns its text, truncated
pub struct WebFetch {
    client: Client,
    max_chars: usize,
}

impl WebFetch {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            max_chars: DEFAULT_MAX_CHARS,
        }
    }

    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars;
        self
    }

    pub fn spec(self) -> ToolSpec {
        ToolSpec::new(
            Tool::new(
                "web_fetch",
                "Fetch a web page over http(s) and return its text content.",
                json!({
                    "type": "object",
                    "required": ["url"],
                    "properties": {
                        "url": {"type": "string", "description": "Absolute http or https url."}
                    }
                }),
            ),
            self,
        )
    }
}

#[async_trait]
impl ToolHandler for WebFetch {
    async fn call(&self, arguments: Map<String, Value>) -> AgentResult<ToolOutput> {
        let raw = arguments
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| AgentError::InvalidParameters("Missing 'url' parameter".into()))?;
        let url = Url::parse(raw)
            .map_err(|e| AgentError::InvalidParameters(format!("Invalid url '{}': {}", raw, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(AgentError::InvalidParameters(format!(
                "Unsupported url scheme '{}'",
                url.scheme()
            )));
        }

        tracing::debug!(%url, "fetching web page");
        let response = self
            .client
            .get(url.clone())
            .timeout(FETCH_TIMEOUT)
            .send()
            .await
            .map_err(|e| AgentError::ExecutionError(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AgentError::ExecutionError(format!(
                "{} answered with status {}",
                url, status
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response
            .text()
            .await
            .map_err(|e| AgentError::ExecutionError(format!("Could not read body: {}", e)))?;

        let total_chars = body.chars().count();
        let truncated = total_chars > self.max_chars;
        let content: String = body.chars().take(self.max_chars).collect();

        let mut entries = Map::new();
        entries.insert("url".to_string(), json!(url.as_str()));
        entries.insert("status".to_string(), json!(status.as_u16()));
        entries.insert("content_type".to_string(), json!(content_type));
        entries.insert("truncated".to_string(), json!(truncated));
        entries.insert("content".to_string(), json!(content));

        Ok(ToolOutput::key_value(
            format!("Fetched {} ({} chars)", url, total_chars),
            entries,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tool::ToolCall;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_fetch_truncates() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(ResponseTemplate::new(200).set_body_string("abcdefghij"))
            .mount(&mock_server)
            .await;

        let spec = WebFetch::new(Client::new()).with_max_chars(4).spec();
        let arguments = json!({"url": format!("{}/page", mock_server.uri())}).to_string();
        let output = spec
            .invoke(&ToolCall::new("1", "web_fetch", arguments))
            .await
            .unwrap();

        match output {
            ToolOutput::KeyValue { entries, .. } => {
                assert_eq!(entries["content"], "abcd");
                assert_eq!(entries["truncated"], true);
                assert_eq!(entries["status"], 200);
            }
            other => panic!("Expected key-value, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_error_status() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let spec = WebFetch::new(Client::new()).spec();
        let arguments = json!({"url": mock_server.uri()}).to_string();
        let err = spec
            .invoke(&ToolCall::new("1", "web_fetch", arguments))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ExecutionError(_)));
    }

    #[tokio::test]
    async fn test_rejects_non_http_scheme() {
        let spec = WebFetch::new(Client::new()).spec();
        let err = spec
            .invoke(&ToolCall::new("1", "web_fetch", r#"{"url": "file:///etc/passwd"}"#))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidParameters(_)));
    }
}
