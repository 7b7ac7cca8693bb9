use std::fmt;

use async_trait::async_trait;

use crate::error::{ProviderResult, ProviderRuntimeError};
use crate::request::ChatRequest;

/// Closed set of supported providers, selected by model-identifier prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Ollama,
    OpenRouter,
}

impl ProviderKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::OpenRouter => "openrouter",
        }
    }

    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "ollama" => Some(Self::Ollama),
            "openrouter" => Some(Self::OpenRouter),
            _ => None,
        }
    }

    /// Resolves the provider for a model identifier. `prefix/rest` selects by
    /// prefix; an identifier without a slash belongs to the local Ollama-style
    /// provider. An unrecognized prefix is an unsupported-provider error.
    pub fn for_model_id(model_id: &str) -> ProviderResult<Self> {
        match model_id.split_once('/') {
            Some((prefix, _)) => Self::from_prefix(prefix)
                .ok_or_else(|| ProviderRuntimeError::UnsupportedProvider(model_id.to_owned())),
            None => Ok(Self::Ollama),
        }
    }

    /// The wire-level model name: the identifier with this provider's prefix
    /// stripped, untouched when the prefix is absent.
    pub fn model_name<'a>(&self, model_id: &'a str) -> &'a str {
        model_id
            .strip_prefix(self.prefix())
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(model_id)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Pull handle over one provider's fragment sequence. `Ok(None)` marks
/// natural exhaustion; dropping the subscription abandons the transfer.
#[async_trait]
pub trait FragmentSubscription: Send {
    async fn next_fragment(&mut self) -> ProviderResult<Option<String>>;
}

pub type FragmentStream = Box<dyn FragmentSubscription>;

impl fmt::Debug for dyn FragmentSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FragmentSubscription").finish_non_exhaustive()
    }
}

#[async_trait]
pub trait ProviderConnection: Send + Sync {
    /// Cheap reachability and model-availability probe, run before any
    /// streaming request. `Ok(false)` means a clean "not usable" answer;
    /// `Err` means the probe itself failed.
    async fn validate_connection(&self) -> ProviderResult<bool>;
}

#[async_trait]
pub trait ProviderStreamSource: Send + Sync {
    /// Opens the streaming transfer for `request`. The returned stream is
    /// finite and not restartable.
    async fn send_request(&self, request: &ChatRequest) -> ProviderResult<FragmentStream>;
}

pub trait ProviderInfo: Send + Sync {
    fn kind(&self) -> ProviderKind;
}

/// Aggregate capability bound the orchestration core programs against.
pub trait ProviderHandler: ProviderConnection + ProviderStreamSource + ProviderInfo {}

impl<T> ProviderHandler for T where T: ProviderConnection + ProviderStreamSource + ProviderInfo {}

impl fmt::Debug for dyn ProviderHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderHandler")
            .field("kind", &self.kind())
            .finish()
    }
}

/// Creates a ready-to-use handler for a model identifier, resolving provider
/// selection and model configuration in one step. Injected into the
/// orchestrator so tests can substitute scripted handlers.
#[async_trait]
pub trait HandlerFactory: Send + Sync {
    async fn create_handler(&self, model_id: &str) -> ProviderResult<Box<dyn ProviderHandler>>;
}
