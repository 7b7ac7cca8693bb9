use crate::event::TranslationEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationEventEnvelope {
    /// Item index for item-scoped events; `None` for project-scoped ones.
    pub item: Option<usize>,
    pub sequence: u64,
    pub received_at_monotonic_nanos: u64,
    pub event: TranslationEvent,
}
