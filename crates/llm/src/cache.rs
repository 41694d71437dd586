//! Content cache for the LLM router.
//!
//! Keys are a hash of the user input plus the system prompt, namespaced by
//! a version string so a prompt-format change invalidates old entries
//! rather than serving stale responses under a changed contract.

use dashmap::DashMap;
use std::time::{Duration, Instant};

const KEY_VERSION: &str = "v1";

fn cache_key(user_input: &str, system_prompt: &str) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    user_input.hash(&mut hasher);
    system_prompt.hash(&mut hasher);
    format!("cache:{}:{:x}", KEY_VERSION, hasher.finish())
}

struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-memory TTL cache keyed by `(user_input, system_prompt)`.
pub struct ContentCache {
    entries: DashMap<String, Entry>,
    ttl: Duration,
}

impl ContentCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn get(&self, user_input: &str, system_prompt: &str) -> Option<String> {
        let key = cache_key(user_input, system_prompt);
        let entry = self.entries.get(&key)?;
        if entry.expires_at < Instant::now() {
            drop(entry);
            self.entries.remove(&key);
            return None;
        }
        Some(entry.value.clone())
    }

    pub fn set(&self, user_input: &str, system_prompt: &str, value: String) {
        let key = cache_key(user_input, system_prompt);
        self.entries.insert(
            key,
            Entry {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miss_then_hit() {
        let cache = ContentCache::new(Duration::from_secs(60));
        assert!(cache.get("hi", "sys").is_none());
        cache.set("hi", "sys", "hello there".to_string());
        assert_eq!(cache.get("hi", "sys").as_deref(), Some("hello there"));
    }

    #[test]
    fn different_system_prompt_is_different_key() {
        let cache = ContentCache::new(Duration::from_secs(60));
        cache.set("hi", "sys-a", "a".to_string());
        assert!(cache.get("hi", "sys-b").is_none());
    }

    #[test]
    fn expired_entry_is_evicted() {
        let cache = ContentCache::new(Duration::from_millis(1));
        cache.set("hi", "sys", "stale".to_string());
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("hi", "sys").is_none());
    }
}
