use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use glossa_domain::PromptDefaults;
use glossa_provider_protocol::backend::ProviderKind;
use glossa_provider_protocol::request::GenerationParameters;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ENV_GLOSSA_CONFIG: &str = "GLOSSA_CONFIG";

const DEFAULT_OLLAMA_ENDPOINT: &str = "http://localhost:11434";
const DEFAULT_OPENROUTER_ENDPOINT: &str = "https://openrouter.ai/api/v1";
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 60;
const DEFAULT_COMPLETION_IDLE_DELAY_MS: u64 = 2000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0}")]
    Message(String),
}

impl ConfigError {
    fn configuration(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

/// Top-level TOML document: provider registry, shared prompt defaults, and
/// orchestration tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GlossaConfig {
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfigToml>,
    #[serde(default)]
    pub default_prompts: PromptDefaults,
    #[serde(default)]
    pub orchestration: OrchestrationConfigToml,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfigToml {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Keyed by the wire-level model name, without the provider prefix.
    #[serde(default)]
    pub models: BTreeMap<String, ModelConfigToml>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ModelConfigToml {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default)]
    pub parameters: GenerationParameters,
    /// Provider-specific passthrough values, forwarded untyped.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub options: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrchestrationConfigToml {
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_completion_idle_delay_ms")]
    pub completion_idle_delay_ms: u64,
}

impl Default for OrchestrationConfigToml {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout_secs(),
            completion_idle_delay_ms: default_completion_idle_delay_ms(),
        }
    }
}

/// Everything an adapter needs for one model, merged from the provider
/// section and the model entry (model entry wins on overlap).
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedModel {
    pub provider: ProviderKind,
    pub endpoint: String,
    pub api_key: Option<String>,
    /// Wire-level model name with the provider prefix stripped.
    pub model_name: String,
    pub parameters: GenerationParameters,
    pub options: serde_json::Map<String, serde_json::Value>,
}

impl GlossaConfig {
    /// Resolves a full model identifier against the provider registry.
    /// Unknown providers and unlisted models are configuration errors.
    pub fn resolve_model(&self, model_id: &str) -> Result<ResolvedModel, ConfigError> {
        let provider = ProviderKind::for_model_id(model_id)
            .map_err(|err| ConfigError::configuration(err.to_string()))?;
        let provider_config = self.providers.get(provider.prefix()).ok_or_else(|| {
            ConfigError::configuration(format!(
                "Provider '{}' is not configured (model id '{model_id}')",
                provider.prefix()
            ))
        })?;

        let model_name = provider.model_name(model_id);
        let model_config = provider_config.models.get(model_name).ok_or_else(|| {
            ConfigError::configuration(format!(
                "Model '{model_name}' is not configured under provider '{}'",
                provider.prefix()
            ))
        })?;

        let endpoint = model_config
            .endpoint
            .clone()
            .or_else(|| provider_config.endpoint.clone())
            .unwrap_or_else(|| default_endpoint(provider).to_owned());
        let api_key = model_config
            .api_key
            .clone()
            .or_else(|| provider_config.api_key.clone());

        Ok(ResolvedModel {
            provider,
            endpoint,
            api_key,
            model_name: model_name.to_owned(),
            parameters: model_config.parameters.clone(),
            options: model_config.options.clone(),
        })
    }

    pub fn idle_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.orchestration.idle_timeout_secs)
    }

    pub fn completion_idle_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.orchestration.completion_idle_delay_ms)
    }
}

impl Default for GlossaConfig {
    fn default() -> Self {
        let mut providers = BTreeMap::new();
        providers.insert(
            ProviderKind::Ollama.prefix().to_owned(),
            ProviderConfigToml {
                endpoint: Some(DEFAULT_OLLAMA_ENDPOINT.to_owned()),
                api_key: None,
                models: BTreeMap::new(),
            },
        );
        providers.insert(
            ProviderKind::OpenRouter.prefix().to_owned(),
            ProviderConfigToml {
                endpoint: Some(DEFAULT_OPENROUTER_ENDPOINT.to_owned()),
                api_key: None,
                models: BTreeMap::new(),
            },
        );

        Self {
            providers,
            default_prompts: PromptDefaults::default(),
            orchestration: OrchestrationConfigToml::default(),
        }
    }
}

pub fn default_endpoint(provider: ProviderKind) -> &'static str {
    match provider {
        ProviderKind::Ollama => DEFAULT_OLLAMA_ENDPOINT,
        ProviderKind::OpenRouter => DEFAULT_OPENROUTER_ENDPOINT,
    }
}

pub fn load_from_env() -> Result<GlossaConfig, ConfigError> {
    let path = config_path_from_env()?;
    load_from_path(path)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<GlossaConfig, ConfigError> {
    load_or_create_config(path.as_ref())
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let home = resolve_home_dir().ok_or_else(|| {
        ConfigError::configuration("Unable to resolve home directory from HOME or USERPROFILE")
    })?;

    Ok(home.join(".config").join("glossa").join("config.toml"))
}

fn config_path_from_env() -> Result<PathBuf, ConfigError> {
    match std::env::var(ENV_GLOSSA_CONFIG) {
        Ok(raw) => {
            if raw.trim().is_empty() {
                default_config_path()
            } else {
                Ok(raw.into())
            }
        }
        Err(std::env::VarError::NotPresent) => default_config_path(),
        Err(_) => Err(ConfigError::configuration(
            "GLOSSA_CONFIG contained invalid UTF-8",
        )),
    }
}

fn resolve_home_dir() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var("USERPROFILE")
                .ok()
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
                .map(PathBuf::from)
        })
}

fn default_idle_timeout_secs() -> u64 {
    DEFAULT_IDLE_TIMEOUT_SECS
}

fn default_completion_idle_delay_ms() -> u64 {
    DEFAULT_COMPLETION_IDLE_DELAY_MS
}

fn persist_config(path: &Path, config: &GlossaConfig) -> Result<(), ConfigError> {
    let rendered = toml::to_string_pretty(config).map_err(|err| {
        ConfigError::configuration(format!(
            "Failed to serialize GLOSSA_CONFIG for {}: {err}",
            path.display()
        ))
    })?;

    std::fs::write(path, rendered.as_bytes()).map_err(|err| {
        ConfigError::configuration(format!(
            "Failed to write GLOSSA_CONFIG to {}: {err}",
            path.display()
        ))
    })
}

fn load_or_create_config(path: &Path) -> Result<GlossaConfig, ConfigError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|err| {
                        ConfigError::configuration(format!(
                            "Failed to create parent directory {} for GLOSSA_CONFIG: {err}",
                            parent.display()
                        ))
                    })?;
                }
            }

            let default_config = GlossaConfig::default();
            persist_config(path, &default_config)?;

            toml::to_string_pretty(&default_config).map_err(|err| {
                ConfigError::configuration(format!(
                    "Failed to serialize default GLOSSA_CONFIG: {err}"
                ))
            })?
        }
        Err(err) => {
            return Err(ConfigError::configuration(format!(
                "Failed to read GLOSSA_CONFIG from {}: {err}",
                path.display()
            )));
        }
    };

    let mut config: GlossaConfig = toml::from_str(&raw).map_err(|err| {
        ConfigError::configuration(format!(
            "Failed to parse GLOSSA_CONFIG from {}: {err}",
            path.display()
        ))
    })?;

    let changed = normalize_config(&mut config);
    if changed {
        persist_config(path, &config)?;
    }

    Ok(config)
}

fn normalize_config(config: &mut GlossaConfig) -> bool {
    let mut changed = false;

    for provider in config.providers.values_mut() {
        changed |= normalize_optional_string(&mut provider.endpoint);
        changed |= normalize_optional_string(&mut provider.api_key);
        for model in provider.models.values_mut() {
            changed |= normalize_optional_string(&mut model.endpoint);
            changed |= normalize_optional_string(&mut model.api_key);
        }
    }

    changed |= normalize_optional_string(&mut config.default_prompts.pre_system_prompt);
    changed |= normalize_optional_string(&mut config.default_prompts.post_system_prompt);
    changed |= normalize_optional_string(&mut config.default_prompts.user_prompt);

    if config.orchestration.idle_timeout_secs == 0 {
        config.orchestration.idle_timeout_secs = default_idle_timeout_secs();
        changed = true;
    }

    changed
}

/// Trims a value in place; blank strings collapse to `None`.
fn normalize_optional_string(value: &mut Option<String>) -> bool {
    match value {
        Some(inner) => {
            let trimmed = inner.trim();
            if trimmed.is_empty() {
                *value = None;
                true
            } else if trimmed != inner {
                *inner = trimmed.to_owned();
                true
            } else {
                false
            }
        }
        None => false,
    }
}
