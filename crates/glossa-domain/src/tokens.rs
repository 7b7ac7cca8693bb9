use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

/// Pluggable exact tokenizer. When none is installed, or when encoding
/// fails, counting falls back to the character heuristic.
pub trait Tokenizer: Send + Sync {
    fn encode_len(&self, text: &str) -> Result<usize, String>;
}

/// Approximate token counter, memoized by text content.
///
/// The cache key is a hash of the text itself, never an item index, so
/// editing one item invalidates only that item's entry (by producing a new
/// key). `clear_cache` drops everything; callers invoke it when document
/// content may have changed program-wide, such as a project switch.
pub struct TokenCounter {
    tokenizer: Option<Box<dyn Tokenizer>>,
    cache: Mutex<HashMap<u64, usize>>,
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCounter {
    /// Counter with no tokenizer installed; every count uses the fallback
    /// heuristic of `len(text) / 4` in characters.
    pub fn new() -> Self {
        Self {
            tokenizer: None,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_tokenizer(tokenizer: Box<dyn Tokenizer>) -> Self {
        Self {
            tokenizer: Some(tokenizer),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn count(&self, text: &str) -> usize {
        let key = content_key(text);
        {
            let cache = self.cache.lock().expect("token cache lock poisoned");
            if let Some(count) = cache.get(&key) {
                return *count;
            }
        }

        let count = match &self.tokenizer {
            Some(tokenizer) => tokenizer.encode_len(text).unwrap_or_else(|_| fallback(text)),
            None => fallback(text),
        };

        let mut cache = self.cache.lock().expect("token cache lock poisoned");
        *cache.entry(key).or_insert(count)
    }

    /// Combined cost of an item: source plus translated tokens.
    pub fn count_pair(&self, source_text: &str, translated_text: &str) -> usize {
        self.count(source_text) + self.count(translated_text)
    }

    pub fn clear_cache(&self) {
        let mut cache = self.cache.lock().expect("token cache lock poisoned");
        cache.clear();
    }

    pub fn cached_entries(&self) -> usize {
        let cache = self.cache.lock().expect("token cache lock poisoned");
        cache.len()
    }
}

impl std::fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCounter")
            .field("has_tokenizer", &self.tokenizer.is_some())
            .field("cached_entries", &self.cached_entries())
            .finish()
    }
}

fn fallback(text: &str) -> usize {
    text.chars().count() / 4
}

fn content_key(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}
