use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use conduit::errors::{ConfigurationError, ProviderError, TurnError};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {env_var}")]
    MissingEnvVar { env_var: String },

    #[error("Invalid value for {env_var}: {reason}")]
    InvalidValue { env_var: String, reason: String },

    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

/// Convert a config path like `providers.openai.api_key` to the environment variable
/// that sets it, `CONDUIT_PROVIDERS__OPENAI__API_KEY`
pub fn to_env_var(field_path: &str) -> String {
    let key = field_path
        .split('.')
        .map(|part| part.to_uppercase())
        .collect::<Vec<_>>()
        .join("__");
    format!("CONDUIT_{}", key)
}

/// Errors a route answers with instead of a result
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Upstream(#[from] ProviderError),

    #[error("{0}")]
    BadRequest(String),
}

impl From<TurnError> for ApiError {
    fn from(error: TurnError) -> Self {
        match error {
            TurnError::Configuration(e) => ApiError::Configuration(e),
            TurnError::Upstream(e) => ApiError::Upstream(e),
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Configuration(ConfigurationError::UnsupportedApiFormat { .. }) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Upstream(ProviderError::Unsupported(_)) => StatusCode::BAD_REQUEST,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
