use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse failure class attached to every provider error event. Adapters
/// assign kinds from transport structure (HTTP status) where available;
/// [`ProviderErrorKind::classify`] is the substring fallback for unstructured
/// message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    Authentication,
    Quota,
    ModelAccess,
    AccessDenied,
    Network,
    Generic,
}

impl ProviderErrorKind {
    /// Best-effort classification of free-form error text.
    pub fn classify(message: &str) -> Self {
        let text = message.to_lowercase();
        if contains_any(&text, &["401", "unauthorized", "api key", "authentication"]) {
            Self::Authentication
        } else if contains_any(&text, &["429", "quota", "rate limit"]) {
            Self::Quota
        } else if contains_any(&text, &["404", "model not found", "does not exist"]) {
            Self::ModelAccess
        } else if contains_any(&text, &["403", "forbidden", "access denied", "privacy"]) {
            Self::AccessDenied
        } else if contains_any(
            &text,
            &["timed out", "timeout", "connect", "connection", "network", "dns"],
        ) {
            Self::Network
        } else {
            Self::Generic
        }
    }

    /// Kind implied by an HTTP response status, when the status alone is
    /// conclusive.
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            401 => Some(Self::Authentication),
            402 | 429 => Some(Self::Quota),
            403 => Some(Self::AccessDenied),
            404 => Some(Self::ModelAccess),
            _ => None,
        }
    }

    /// Failures of this class fail fast at the provider boundary; the
    /// orchestrator announces idle immediately instead of a transient error
    /// state when one ends a job.
    pub fn is_authorization_class(&self) -> bool {
        matches!(
            self,
            Self::Authentication | Self::Quota | Self::ModelAccess | Self::AccessDenied
        )
    }
}

fn contains_any(text: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| text.contains(needle))
}

/// Errors crossing the provider handler boundary. The per-kind variants carry
/// the adapter's human-readable message verbatim; `Configuration` and
/// `UnsupportedProvider` arise before any stream starts.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderRuntimeError {
    #[error("provider configuration error: {0}")]
    Configuration(String),
    #[error("no provider registered for model id: {0}")]
    UnsupportedProvider(String),
    #[error("{0}")]
    Authentication(String),
    #[error("{0}")]
    Quota(String),
    #[error("{0}")]
    ModelAccess(String),
    #[error("{0}")]
    AccessDenied(String),
    #[error("{0}")]
    Network(String),
    #[error("{0}")]
    Generic(String),
}

impl ProviderRuntimeError {
    /// Wraps `message` in the variant matching `kind`.
    pub fn from_kind(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            ProviderErrorKind::Authentication => Self::Authentication(message),
            ProviderErrorKind::Quota => Self::Quota(message),
            ProviderErrorKind::ModelAccess => Self::ModelAccess(message),
            ProviderErrorKind::AccessDenied => Self::AccessDenied(message),
            ProviderErrorKind::Network => Self::Network(message),
            ProviderErrorKind::Generic => Self::Generic(message),
        }
    }

    /// Classifies `message` by substring and wraps it.
    pub fn classified(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::from_kind(ProviderErrorKind::classify(&message), message)
    }

    pub fn kind(&self) -> ProviderErrorKind {
        match self {
            Self::Authentication(_) => ProviderErrorKind::Authentication,
            Self::Quota(_) => ProviderErrorKind::Quota,
            Self::ModelAccess(_) => ProviderErrorKind::ModelAccess,
            Self::AccessDenied(_) => ProviderErrorKind::AccessDenied,
            Self::Network(_) => ProviderErrorKind::Network,
            Self::Configuration(_) | Self::UnsupportedProvider(_) | Self::Generic(_) => {
                ProviderErrorKind::Generic
            }
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderRuntimeError>;
