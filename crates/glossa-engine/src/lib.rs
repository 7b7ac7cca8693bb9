//! Concurrent translation orchestration: request assembly, per-item job
//! dispatch, stream buffering, and mutation gating over one project.

pub mod buffer;
pub mod controller;
pub mod error;
pub mod payload;
pub mod registry;

pub use buffer::StreamingBuffer;
pub use controller::{
    TranslationOrchestrator, TranslationOrchestratorConfig, TranslationPerfSnapshot,
    TranslationTaskSnapshot,
};
pub use error::{EngineError, EngineResult};
pub use payload::{
    build_chat_request, FALLBACK_POST_SYSTEM_PROMPT, FALLBACK_PRE_SYSTEM_PROMPT,
    FALLBACK_USER_PROMPT,
};
pub use registry::{TranslationJob, TranslationRegistry};
