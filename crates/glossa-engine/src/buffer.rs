/// Accumulates streamed fragments for one in-flight translation.
///
/// Starts open and ends in exactly one of two terminal states: completed
/// (natural exhaustion, content eligible for commit) or stopped (user
/// cancellation, content discarded). Neither terminal state can be left, and
/// fragments are rejected once either is reached.
#[derive(Debug, Default)]
pub struct StreamingBuffer {
    chunks: Vec<String>,
    char_count: usize,
    complete: bool,
    stopped: bool,
}

impl StreamingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a fragment while the buffer is open. Returns false, with no
    /// mutation, once the buffer is completed or stopped.
    pub fn add_chunk(&mut self, text: impl Into<String>) -> bool {
        if self.complete || self.stopped {
            return false;
        }
        let text = text.into();
        self.char_count += text.chars().count();
        self.chunks.push(text);
        true
    }

    /// Marks natural completion. Idempotent; ignored after `stop`.
    pub fn complete(&mut self) {
        if !self.stopped {
            self.complete = true;
        }
    }

    /// Marks user cancellation. Idempotent; ignored after `complete`.
    pub fn stop(&mut self) {
        if !self.complete {
            self.stopped = true;
        }
    }

    pub fn is_open(&self) -> bool {
        !self.complete && !self.stopped
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Concatenation of all accepted fragments in arrival order, valid in any
    /// state.
    pub fn full_text(&self) -> String {
        self.chunks.concat()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Characters accepted so far; drives the progress estimate.
    pub fn char_count(&self) -> usize {
        self.char_count
    }
}
