use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::content::{deserialize_content, Content, MessageContent};
use super::role::Role;
use super::tool::ToolCall;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// A message to or from an LLM, independent of any vendor
pub struct Message {
    pub role: Role,
    #[serde(default, deserialize_with = "deserialize_content")]
    pub content: MessageContent,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn with_role(role: Role) -> Self {
        Message {
            role,
            content: MessageContent::default(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Create a new system message
    pub fn system<S: Into<String>>(text: S) -> Self {
        Self::with_role(Role::System).with_text(text)
    }

    /// Create a new, empty user message
    pub fn user() -> Self {
        Self::with_role(Role::User)
    }

    /// Create a new, empty assistant message
    pub fn assistant() -> Self {
        Self::with_role(Role::Assistant)
    }

    /// Create a tool result message answering `tool_call_id`
    pub fn tool<I: Into<String>, S: Into<String>>(tool_call_id: I, text: S) -> Self {
        let mut message = Self::with_role(Role::Tool).with_text(text);
        message.tool_call_id = Some(tool_call_id.into());
        message
    }

    /// Add text content to the message
    pub fn with_text<S: Into<String>>(mut self, text: S) -> Self {
        self.content.extend(MessageContent::Text(text.into()));
        self
    }

    /// Add image content to the message
    pub fn with_image<S: AsRef<str>, T: AsRef<str>>(mut self, data: S, mime_type: T) -> Self {
        self.content
            .extend(MessageContent::Parts(vec![Content::image(data, mime_type)]));
        self
    }

    /// Add a tool call to the message
    pub fn with_tool_call(mut self, tool_call: ToolCall) -> Self {
        self.tool_calls.push(tool_call);
        self
    }

    pub fn text(&self) -> String {
        self.content.text()
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Give every tool call a non-empty id that is unique within this message.
    ///
    /// Missing or repeated ids are replaced with `call_<index>`, suffixed `_<n>` when
    /// that id is already taken. Ids that are already valid are never touched, so
    /// running this again is a no-op.
    pub fn normalize_tool_call_ids(&mut self) {
        let mut taken = HashSet::new();
        let keep: Vec<bool> = self
            .tool_calls
            .iter()
            .map(|call| !call.id.is_empty() && taken.insert(call.id.clone()))
            .collect();

        for (index, call) in self.tool_calls.iter_mut().enumerate() {
            if keep[index] {
                continue;
            }
            let base = format!("call_{}", index);
            let mut id = base.clone();
            let mut n = 1;
            while taken.contains(&id) {
                id = format!("{}_{}", base, n);
                n += 1;
            }
            taken.insert(id.clone());
            call.id = id;
        }
    }
}
