use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;

use super::{
    anthropic::AnthropicProvider, base::Provider, configs::ProviderConfig, gemini::GeminiProvider,
    ollama::OllamaProvider, openai::OpenAiProvider,
};
use crate::errors::ConfigurationError;
use crate::resolver::{ApiFormat, ResolvedModel};

/// Upper bound for any single upstream call; per call timeouts are usually shorter
const CLIENT_TIMEOUT: Duration = Duration::from_secs(600);

/// Pick the adapter for a resolved model from its provider's `api_format`.
///
/// An unknown format fails here, before any request is built.
pub fn get_provider(resolved: &ResolvedModel) -> Result<Arc<dyn Provider>, ConfigurationError> {
    let record = &resolved.provider;
    let api_format = ApiFormat::from_str(record.api_format.trim()).map_err(|_| {
        ConfigurationError::UnsupportedApiFormat {
            provider: record.id.clone(),
            api_format: record.api_format.clone(),
        }
    })?;

    let client = Client::builder()
        .timeout(CLIENT_TIMEOUT)
        .build()
        .map_err(|e| ConfigurationError::ProviderUnavailable {
            provider: record.id.clone(),
            reason: e.to_string(),
        })?;
    let config = ProviderConfig::from(resolved);

    tracing::debug!(provider = %record.id, model = %resolved.model, %api_format, "selected adapter");

    Ok(match api_format {
        ApiFormat::OpenAi => Arc::new(OpenAiProvider::new(client, config)),
        ApiFormat::Anthropic => Arc::new(AnthropicProvider::new(client, config)),
        ApiFormat::Gemini => Arc::new(GeminiProvider::new(client, config)),
        ApiFormat::Ollama => Arc::new(OllamaProvider::new(client, config)),
    })
}
