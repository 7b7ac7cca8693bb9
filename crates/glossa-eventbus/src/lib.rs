//! Translation eventbus publish/fanout APIs.

pub mod bus;
pub mod envelope;
pub mod event;

pub use bus::{
    TranslationEventBus, TranslationEventBusConfig, DEFAULT_GLOBAL_BUFFER_CAPACITY,
    DEFAULT_ITEM_BUFFER_CAPACITY,
};
pub use envelope::TranslationEventEnvelope;
pub use event::{
    CompletedEvent, ErrorEvent, FragmentEvent, LockLevelEvent, ProgressEvent, StateChangedEvent,
    TimeoutEvent, TranslationEvent, ValidationFailedEvent,
};
