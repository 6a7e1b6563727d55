//! These models represent the objects passed around by the agent
//!
//! There are several different related formats we need to interact with:
//! - canonical chat messages, sent from the client to the agent and echoed back
//! - the event stream protocol, sent from the agent to the client
//! - openai messages/tools, sent from the agent to the LLM
//! - anthropic messages/tools, sent from the agent to the LLM
//! - gemini contents/parts, sent from the agent to the LLM
//! - ollama chat messages, sent from the agent to the LLM
//!
//! The canonical models deliberately follow the OpenAI chat shape on the wire, since
//! that format is a superset of what the other vendors can express. Every adapter converts
//! to and from these structs immediately at its boundary.
pub mod content;
pub mod message;
pub mod role;
pub mod tool;
