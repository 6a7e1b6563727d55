//! Ability based model selection.
//!
//! Which providers and models exist is owned by an external configuration store; the
//! resolver only answers "which model handles this ability, and who serves it".

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::errors::ConfigurationError;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
/// A named capability class used to pick a model
pub enum Ability {
    Chat,
    Vision,
    Embedding,
    Rerank,
    Voice,
    Tools,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
/// The upstream wire protocols we can speak
pub enum ApiFormat {
    OpenAi,
    Anthropic,
    Gemini,
    Ollama,
}

/// A provider as stored by the configuration store.
///
/// `api_format` is kept as free text here. It is only validated when an adapter is
/// selected for the provider.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProviderRecord {
    pub id: String,
    pub api_format: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelBinding {
    pub model: String,
    pub provider: String,
}

/// The external store that knows which models and providers exist
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// The model bound to an ability, if any
    async fn binding(&self, ability: Ability) -> Option<ModelBinding>;

    /// Load a provider record by id
    async fn provider(&self, id: &str) -> anyhow::Result<ProviderRecord>;
}

/// A read-only, in-process configuration store
#[derive(Debug, Clone, Default)]
pub struct StaticConfigStore {
    bindings: HashMap<Ability, ModelBinding>,
    providers: HashMap<String, ProviderRecord>,
}

impl StaticConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, provider: ProviderRecord) -> Self {
        self.providers.insert(provider.id.clone(), provider);
        self
    }

    pub fn with_binding<M, P>(mut self, ability: Ability, model: M, provider: P) -> Self
    where
        M: Into<String>,
        P: Into<String>,
    {
        self.bindings.insert(
            ability,
            ModelBinding {
                model: model.into(),
                provider: provider.into(),
            },
        );
        self
    }
}

#[async_trait]
impl ConfigStore for StaticConfigStore {
    async fn binding(&self, ability: Ability) -> Option<ModelBinding> {
        self.bindings.get(&ability).cloned()
    }

    async fn provider(&self, id: &str) -> anyhow::Result<ProviderRecord> {
        self.providers
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown provider '{}'", id))
    }
}

/// A model together with the provider that serves it
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedModel {
    pub ability: Ability,
    pub model: String,
    pub provider: ProviderRecord,
}

impl ResolvedModel {
    /// The provider's base url; always present once resolved
    pub fn base_url(&self) -> &str {
        self.provider.base_url.as_deref().unwrap_or_default()
    }
}

#[derive(Clone)]
pub struct ModelResolver {
    store: Arc<dyn ConfigStore>,
}

impl ModelResolver {
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self { store }
    }

    pub async fn resolve(&self, ability: Ability) -> Result<ResolvedModel, ConfigurationError> {
        let binding = self
            .store
            .binding(ability)
            .await
            .ok_or(ConfigurationError::MissingModel { ability })?;

        let provider = self.store.provider(&binding.provider).await.map_err(|e| {
            ConfigurationError::ProviderUnavailable {
                provider: binding.provider.clone(),
                reason: e.to_string(),
            }
        })?;

        if provider
            .base_url
            .as_deref()
            .map_or(true, |url| url.trim().is_empty())
        {
            return Err(ConfigurationError::MissingBaseUrl {
                provider: provider.id,
            });
        }

        Ok(ResolvedModel {
            ability,
            model: binding.model,
            provider,
        })
    }

    /// Resolve the model for an agent turn: `tools` when bound, otherwise `chat`.
    ///
    /// Only a missing `tools` binding falls back. A `tools` binding that is broken
    /// (unknown provider, no base url) is reported as is.
    pub async fn resolve_for_tools(&self) -> Result<ResolvedModel, ConfigurationError> {
        match self.resolve(Ability::Tools).await {
            Err(ConfigurationError::MissingModel { .. }) => {
                tracing::debug!("no model bound for tools, falling back to chat");
                self.resolve(Ability::Chat).await
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn provider(id: &str, base_url: Option<&str>) -> ProviderRecord {
        ProviderRecord {
            id: id.to_string(),
            api_format: "openai".to_string(),
            base_url: base_url.map(String::from),
            ..Default::default()
        }
    }

    fn resolver(store: StaticConfigStore) -> ModelResolver {
        ModelResolver::new(Arc::new(store))
    }

    #[test]
    fn test_ability_parsing() {
        assert_eq!(Ability::from_str("tools").unwrap(), Ability::Tools);
        assert_eq!(Ability::from_str("Embedding").unwrap(), Ability::Embedding);
        assert!(Ability::from_str("telepathy").is_err());
        assert_eq!(Ability::Rerank.to_string(), "rerank");
    }

    #[test]
    fn test_api_format_parsing() {
        assert_eq!(ApiFormat::from_str("openai").unwrap(), ApiFormat::OpenAi);
        assert_eq!(ApiFormat::from_str("Ollama").unwrap(), ApiFormat::Ollama);
        assert!(ApiFormat::from_str("bedrock").is_err());
    }

    #[tokio::test]
    async fn test_resolve_bound_model() {
        let store = StaticConfigStore::new()
            .with_provider(provider("local", Some("http://localhost:11434")))
            .with_binding(Ability::Chat, "qwen2.5", "local");

        let resolved = resolver(store).resolve(Ability::Chat).await.unwrap();
        assert_eq!(resolved.model, "qwen2.5");
        assert_eq!(resolved.base_url(), "http://localhost:11434");
    }

    #[tokio::test]
    async fn test_resolve_missing_binding() {
        let err = resolver(StaticConfigStore::new())
            .resolve(Ability::Vision)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::MissingModel {
                ability: Ability::Vision
            }
        );
    }

    #[tokio::test]
    async fn test_resolve_missing_base_url() {
        let store = StaticConfigStore::new()
            .with_provider(provider("broken", None))
            .with_binding(Ability::Chat, "gpt-4o", "broken");

        let err = resolver(store).resolve(Ability::Chat).await.unwrap_err();
        assert!(matches!(err, ConfigurationError::MissingBaseUrl { .. }));
    }

    #[tokio::test]
    async fn test_resolve_unknown_provider() {
        let store = StaticConfigStore::new().with_binding(Ability::Chat, "gpt-4o", "nowhere");
        let err = resolver(store).resolve(Ability::Chat).await.unwrap_err();
        assert!(matches!(err, ConfigurationError::ProviderUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_tools_falls_back_to_chat() {
        let store = StaticConfigStore::new()
            .with_provider(provider("openai", Some("https://api.openai.com")))
            .with_binding(Ability::Chat, "gpt-4o-mini", "openai");

        let resolved = resolver(store).resolve_for_tools().await.unwrap();
        assert_eq!(resolved.ability, Ability::Chat);
        assert_eq!(resolved.model, "gpt-4o-mini");
    }

    #[tokio::test]
    async fn test_tools_binding_preferred() {
        let store = StaticConfigStore::new()
            .with_provider(provider("openai", Some("https://api.openai.com")))
            .with_binding(Ability::Chat, "gpt-4o-mini", "openai")
            .with_binding(Ability::Tools, "gpt-4o", "openai");

        let resolved = resolver(store).resolve_for_tools().await.unwrap();
        assert_eq!(resolved.ability, Ability::Tools);
        assert_eq!(resolved.model, "gpt-4o");
    }

    #[tokio::test]
    async fn test_broken_tools_binding_does_not_fall_back() {
        let store = StaticConfigStore::new()
            .with_provider(provider("openai", Some("https://api.openai.com")))
            .with_binding(Ability::Chat, "gpt-4o-mini", "openai")
            .with_binding(Ability::Tools, "gpt-4o", "missing");

        let err = resolver(store).resolve_for_tools().await.unwrap_err();
        assert!(matches!(err, ConfigurationError::ProviderUnavailable { .. }));
    }
}
