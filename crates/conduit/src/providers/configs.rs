use std::collections::HashMap;

use crate::resolver::ResolvedModel;

pub const DEFAULT_ANTHROPIC_MAX_TOKENS: u32 = 4096;

/// Everything an adapter needs to talk to one model on one provider
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    pub id: String,
    pub host: String,
    pub model: String,
    pub api_key: Option<String>,
    pub max_tokens: Option<u32>,
    pub headers: HashMap<String, String>,
}

impl ProviderConfig {
    pub fn new<I, H, M>(id: I, host: H, model: M) -> Self
    where
        I: Into<String>,
        H: Into<String>,
        M: Into<String>,
    {
        Self {
            id: id.into(),
            host: host.into(),
            model: model.into(),
            api_key: None,
            max_tokens: None,
            headers: HashMap::new(),
        }
    }

    pub fn with_api_key<S: Into<String>>(mut self, api_key: S) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Join the host with an api path, tolerating trailing slashes on the host
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.host.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

impl From<&ResolvedModel> for ProviderConfig {
    fn from(resolved: &ResolvedModel) -> Self {
        let provider = &resolved.provider;
        Self {
            id: provider.id.clone(),
            host: resolved.base_url().to_string(),
            model: resolved.model.clone(),
            api_key: provider.api_key.clone().filter(|key| !key.is_empty()),
            max_tokens: provider.max_tokens,
            headers: provider.headers.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{Ability, ProviderRecord};

    #[test]
    fn test_from_resolved_model() {
        let resolved = ResolvedModel {
            ability: Ability::Chat,
            model: "claude-3-5-sonnet".to_string(),
            provider: ProviderRecord {
                id: "anthropic".to_string(),
                api_format: "anthropic".to_string(),
                base_url: Some("https://api.anthropic.com/".to_string()),
                api_key: Some(String::new()),
                max_tokens: Some(1024),
                ..Default::default()
            },
        };

        let config = ProviderConfig::from(&resolved);
        assert_eq!(config.model, "claude-3-5-sonnet");
        assert_eq!(config.api_key, None);
        assert_eq!(config.max_tokens, Some(1024));
        assert_eq!(config.url("/v1/messages"), "https://api.anthropic.com/v1/messages");
    }
}
