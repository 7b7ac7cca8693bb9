//! Registry of in-flight translation jobs, keyed by item index.

use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::buffer::StreamingBuffer;

const BUFFER_LOCK: &str = "translation buffer lock poisoned";

/// Shared handle to one in-flight translation. Cloned between the runner
/// task, the orchestrator, and live-text readers; all clones observe the
/// same buffer and cancellation token.
#[derive(Debug, Clone)]
pub struct TranslationJob {
    buffer: Arc<Mutex<StreamingBuffer>>,
    cancellation: CancellationToken,
}

impl TranslationJob {
    fn new() -> Self {
        Self {
            buffer: Arc::new(Mutex::new(StreamingBuffer::new())),
            cancellation: CancellationToken::new(),
        }
    }

    /// Appends a streamed fragment. Returns the accumulated character count
    /// after the append, or `None` when the buffer is already frozen and
    /// the fragment was discarded.
    pub fn append_fragment(&self, text: &str) -> Option<usize> {
        let mut buffer = self.buffer.lock().expect(BUFFER_LOCK);
        if buffer.add_chunk(text) {
            Some(buffer.char_count())
        } else {
            None
        }
    }

    /// Marks natural completion and returns the accumulated text.
    pub fn finish(&self) -> String {
        let mut buffer = self.buffer.lock().expect(BUFFER_LOCK);
        buffer.complete();
        buffer.full_text()
    }

    /// Freezes the buffer and signals the runner to halt. Fragments that
    /// race past the signal are rejected by the frozen buffer.
    pub fn request_stop(&self) {
        self.buffer.lock().expect(BUFFER_LOCK).stop();
        self.cancellation.cancel();
    }

    /// Text received so far. Advisory while the runner is still appending.
    pub fn live_text(&self) -> String {
        self.buffer.lock().expect(BUFFER_LOCK).full_text()
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancellation.clone()
    }
}

/// Tracks which item indices have a translation running. One job per index;
/// a second dispatch for the same index is refused until the first is
/// removed.
#[derive(Debug, Default)]
pub struct TranslationRegistry {
    jobs: HashMap<usize, TranslationJob>,
}

impl TranslationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `index` for a new run and returns the fresh job handle, or
    /// `None` when a run for that index is already registered.
    pub fn reserve(&mut self, index: usize) -> Option<TranslationJob> {
        match self.jobs.entry(index) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => Some(slot.insert(TranslationJob::new()).clone()),
        }
    }

    pub fn job(&self, index: usize) -> Option<TranslationJob> {
        self.jobs.get(&index).cloned()
    }

    pub fn remove(&mut self, index: usize) -> Option<TranslationJob> {
        self.jobs.remove(&index)
    }

    pub fn contains(&self, index: usize) -> bool {
        self.jobs.contains_key(&index)
    }

    /// Indices with a running job, in ascending order.
    pub fn indices(&self) -> BTreeSet<usize> {
        self.jobs.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
