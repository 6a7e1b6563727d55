//! The event protocol a turn is streamed with.
//!
//! Every event is framed as `event: <type>\ndata: <json>\n\n`.

use serde::{Deserialize, Serialize};

use crate::models::message::Message;
use crate::models::tool::PendingToolCall;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    AssistantStart {
        id: String,
    },
    AssistantDelta {
        id: String,
        delta: String,
    },
    AssistantEnd {
        id: String,
        message: Message,
    },
    ToolStart {
        tool_call_id: String,
        name: String,
    },
    ToolEnd {
        tool_call_id: String,
        name: String,
        message: Message,
    },
    Pending {
        pending_tool_calls: Vec<PendingToolCall>,
    },
    Done {
        messages: Vec<Message>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pending_tool_calls: Option<Vec<PendingToolCall>>,
    },
}

impl AgentEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            AgentEvent::AssistantStart { .. } => "assistant_start",
            AgentEvent::AssistantDelta { .. } => "assistant_delta",
            AgentEvent::AssistantEnd { .. } => "assistant_end",
            AgentEvent::ToolStart { .. } => "tool_start",
            AgentEvent::ToolEnd { .. } => "tool_end",
            AgentEvent::Pending { .. } => "pending",
            AgentEvent::Done { .. } => "done",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentEvent::Done { .. })
    }

    /// The JSON payload carried in the `data:` line
    pub fn payload(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(object) = value.as_object_mut() {
            object.remove("type");
        }
        value
    }

    /// Frame the event for the wire
    pub fn encode(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.event_type(), self.payload())
    }
}
