use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resolver::Ability;

/// Failures local to a single tool call. These never abort a turn; the agent
/// turns them into tool result messages so the model can react to them.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum AgentError {
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Tool execution failed: {0}")]
    ExecutionError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type AgentResult<T> = Result<T, AgentError>;

/// Failures talking to an upstream model API
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Request failed: {status} - {body}")]
    Http { status: u16, body: String },

    #[error("Response is missing '{0}'")]
    MissingField(&'static str),

    #[error("Context length exceeded. Message: {0}")]
    ContextLengthExceeded(String),

    #[error("Upstream API error: {0}")]
    Api(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("{0} is not supported by this provider")]
    Unsupported(&'static str),

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Failures selecting a model or building an adapter, raised before any model call
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("No model is configured for ability '{ability}'")]
    MissingModel { ability: Ability },

    #[error("Provider '{provider}' has no base url")]
    MissingBaseUrl { provider: String },

    #[error("Provider '{provider}' could not be loaded: {reason}")]
    ProviderUnavailable { provider: String, reason: String },

    #[error("Provider '{provider}' uses unsupported api format '{api_format}'")]
    UnsupportedApiFormat {
        provider: String,
        api_format: String,
    },
}

/// The only errors allowed to end a turn early
#[derive(Error, Debug)]
pub enum TurnError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Upstream(#[from] ProviderError),
}
