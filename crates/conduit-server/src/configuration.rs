use crate::error::{to_env_var, ConfigError};
use config::{Config, Environment, File};
use conduit::agent::MAX_LOOPS;
use conduit::resolver::{Ability, ProviderRecord, StaticConfigStore};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Points at an optional TOML file layered under the environment
pub const CONFIG_PATH_VAR: &str = "CONDUIT_CONFIG";

#[derive(Debug, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::InvalidValue {
                env_var: to_env_var("server.host"),
                reason: e.to_string(),
            })
    }
}

#[derive(Debug, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_max_loops")]
    pub max_loops: usize,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_loops: default_max_loops(),
            temperature: None,
            timeout_secs: default_timeout_secs(),
            workspace_root: default_workspace_root(),
        }
    }
}

impl AgentSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSettings {
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

impl ProviderSettings {
    pub fn into_record(self, id: &str) -> ProviderRecord {
        ProviderRecord {
            id: id.to_string(),
            api_format: self.api_format,
            base_url: self.base_url,
            api_key: self.api_key,
            max_tokens: self.max_tokens,
            headers: self.headers,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelSettings {
    pub model: String,
    pub provider: String,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub providers: HashMap<String, ProviderSettings>,
    #[serde(default)]
    pub models: HashMap<String, ModelSettings>,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let file = env::var(CONFIG_PATH_VAR).ok().map(PathBuf::from);
        Self::load(file.as_deref())
    }

    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        // Start with default configuration
        let mut builder = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            .set_default("agent.max_loops", default_max_loops() as i64)?
            .set_default("agent.timeout_secs", default_timeout_secs())?
            .set_default(
                "agent.workspace_root",
                default_workspace_root().to_string_lossy().to_string(),
            )?;

        if let Some(path) = file {
            builder = builder.add_source(File::from(path).required(true));
        }

        // Layer on the environment variables
        let config = builder
            .add_source(
                Environment::with_prefix("CONDUIT")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        match config.try_deserialize::<Self>() {
            Ok(settings) => Ok(settings),
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                if let Some(field) = missing_field_path(&err.to_string()) {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(&field),
                    })
                } else if let config::ConfigError::NotFound(field) = &err {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else {
                    Err(ConfigError::Other(err))
                }
            }
        }
    }

    /// The provider records and ability bindings as a read-only store
    pub fn config_store(&self) -> Result<StaticConfigStore, ConfigError> {
        let mut store = StaticConfigStore::new();
        for (id, provider) in &self.providers {
            store = store.with_provider(provider.clone().into_record(id));
        }
        for (key, binding) in &self.models {
            let ability = Ability::from_str(key).map_err(|_| ConfigError::InvalidValue {
                env_var: to_env_var(&format!("models.{}", key)),
                reason: format!("'{}' is not an ability", key),
            })?;
            store = store.with_binding(ability, &binding.model, &binding.provider);
        }
        Ok(store)
    }
}

/// Extract `key.field` from "missing field `field` for key `key`"
fn missing_field_path(message: &str) -> Option<String> {
    let rest = message.strip_prefix("missing field `")?;
    let (field, rest) = rest.split_once('`')?;
    match rest
        .split_once("for key `")
        .and_then(|(_, key)| key.split_once('`'))
    {
        Some((key, _)) if !key.is_empty() => Some(format!("{}.{}", key, field)),
        _ => Some(field.to_string()),
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_max_loops() -> usize {
    MAX_LOOPS
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from("./workspace")
}
