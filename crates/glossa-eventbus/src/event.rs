use glossa_domain::{LockLevel, TranslationState};
use glossa_provider_protocol::error::ProviderErrorKind;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentEvent {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Estimated percentage, capped below 100 until completion reports it.
    pub percent: u8,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedEvent {
    pub translated_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub message: String,
    pub kind: ProviderErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationFailedEvent {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutEvent {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChangedEvent {
    pub state: TranslationState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockLevelEvent {
    pub level: LockLevel,
}

/// Everything the orchestration core announces to its subscribers. Item-scoped
/// variants travel with their index in the envelope; `StateChanged` and
/// `LockLevel` are project-scoped and carry none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TranslationEvent {
    Fragment(FragmentEvent),
    Progress(ProgressEvent),
    Completed(CompletedEvent),
    Error(ErrorEvent),
    ValidationFailed(ValidationFailedEvent),
    Timeout(TimeoutEvent),
    StateChanged(StateChangedEvent),
    LockLevel(LockLevelEvent),
}
