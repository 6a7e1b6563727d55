use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{AgentError, AgentResult};

/// A tool that can be used by a model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tool {
    /// The name of the tool
    pub name: String,
    /// A description of what the tool does
    pub description: String,
    /// A JSON Schema object defining the expected parameters for the tool
    pub parameters: Value,
}

impl Tool {
    /// Create a new tool with the given name and description
    pub fn new<N, D>(name: N, description: D, parameters: Value) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        Tool {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// A model-issued request to invoke a tool.
///
/// `arguments` is kept as the raw text the model produced so that a malformed
/// payload can still be echoed back into history unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireToolCall", into = "WireToolCall")]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ToolCall {
    pub fn new<I, N, A>(id: I, name: N, arguments: A) -> Self
    where
        I: Into<String>,
        N: Into<String>,
        A: Into<String>,
    {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Parse the arguments, which must be a JSON object. Empty text is an empty object.
    pub fn parse_arguments(&self) -> AgentResult<Map<String, Value>> {
        if self.arguments.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&self.arguments) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(AgentError::InvalidParameters(format!(
                "Arguments for '{}' must be a JSON object, got: {}",
                self.name, other
            ))),
            Err(e) => Err(AgentError::InvalidParameters(format!(
                "Could not interpret tool use parameters for id {}: {}",
                self.id, e
            ))),
        }
    }

    /// Best-effort parse used for display; invalid JSON degrades to an empty object
    pub fn arguments_or_empty(&self) -> Value {
        Value::Object(self.parse_arguments().unwrap_or_default())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireFunction {
    #[serde(default)]
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: String,
    #[serde(rename = "type", default = "function_type")]
    kind: String,
    function: WireFunction,
}

fn function_type() -> String {
    "function".to_string()
}

impl From<WireToolCall> for ToolCall {
    fn from(wire: WireToolCall) -> Self {
        ToolCall {
            id: wire.id,
            name: wire.function.name,
            arguments: wire.function.arguments,
        }
    }
}

impl From<ToolCall> for WireToolCall {
    fn from(call: ToolCall) -> Self {
        WireToolCall {
            id: call.id,
            kind: function_type(),
            function: WireFunction {
                name: call.name,
                arguments: call.arguments,
            },
        }
    }
}

/// A tool call held back until a human approves or rejects it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
    pub requires_confirmation: bool,
}

impl From<&ToolCall> for PendingToolCall {
    fn from(call: &ToolCall) -> Self {
        PendingToolCall {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.arguments_or_empty(),
            requires_confirmation: true,
        }
    }
}

/// How the model is allowed to pick tools for one call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    #[default]
    Auto,
    None,
    Required,
    Function(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_call_wire_shape() {
        let call = ToolCall::new("call_1", "vfs_list_dir", r#"{"path":"/docs"}"#);
        let value = serde_json::to_value(&call).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "call_1",
                "type": "function",
                "function": {"name": "vfs_list_dir", "arguments": "{\"path\":\"/docs\"}"}
            })
        );

        let back: ToolCall = serde_json::from_value(value).unwrap();
        assert_eq!(back, call);
    }

    #[test]
    fn test_tool_call_missing_id_deserializes_empty() {
        let call: ToolCall =
            serde_json::from_value(json!({"function": {"name": "x", "arguments": "{}"}})).unwrap();
        assert!(call.id.is_empty());
    }

    #[test]
    fn test_parse_arguments() {
        let call = ToolCall::new("1", "t", r#"{"a": 1}"#);
        assert_eq!(call.parse_arguments().unwrap()["a"], json!(1));

        let empty = ToolCall::new("1", "t", "");
        assert!(empty.parse_arguments().unwrap().is_empty());

        let invalid = ToolCall::new("1", "t", "invalid json {");
        assert!(matches!(
            invalid.parse_arguments(),
            Err(AgentError::InvalidParameters(_))
        ));

        let array = ToolCall::new("1", "t", "[1, 2]");
        assert!(array.parse_arguments().is_err());
    }

    #[test]
    fn test_pending_degrades_invalid_arguments() {
        let pending = PendingToolCall::from(&ToolCall::new("1", "vfs_delete", "{oops"));
        assert_eq!(pending.arguments, json!({}));
        assert!(pending.requires_confirmation);
    }
}
