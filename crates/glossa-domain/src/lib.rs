//! Data model and pure selection logic for the Glossa translation core.
//!
//! Everything in this crate is synchronous and side-effect free: the project
//! and item model with its structural invariants, the memoizing token
//! counter, the context-window selection policies, and the lock/aggregate
//! state vocabulary the orchestrator publishes.

pub mod context;
pub mod project;
pub mod state;
pub mod tokens;

pub use context::{ContextMode, ContextSelection, select_context};
pub use project::{Item, Project, ProjectError, PromptDefaults, PromptOverrides};
pub use state::{LockLevel, TranslationState};
pub use tokens::{TokenCounter, Tokenizer};
