//! Last-known lookup results keyed by canonical number

use dashmap::DashMap;
use std::sync::Arc;

use crate::models::{LookupKey, LookupResponse};

/// Unbounded map from key to the most recent response.
///
/// There is no eviction; the owning service clears it on stop and on low
/// memory. Each key is guarded by its shard lock, so concurrent writers for
/// one key are linearized.
#[derive(Debug, Default)]
pub struct ResultCache {
    entries: DashMap<LookupKey, Arc<LookupResponse>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &LookupKey) -> Option<Arc<LookupResponse>> {
        self.entries.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Store `response`, returning the value it replaced
    pub fn put(&self, key: LookupKey, response: Arc<LookupResponse>) -> Option<Arc<LookupResponse>> {
        self.entries.insert(key, response)
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_replaces_and_clear_empties() {
        let cache = ResultCache::new();
        let key = LookupKey::parse_normalized("+15551234567").unwrap();

        assert!(cache.get(&key).is_none());
        assert!(cache
            .put(key.clone(), Arc::new(LookupResponse::new("+15551234567").with_name("A")))
            .is_none());
        let previous = cache
            .put(key.clone(), Arc::new(LookupResponse::new("+15551234567").with_name("B")))
            .unwrap();
        assert_eq!(previous.name.as_deref(), Some("A"));
        assert_eq!(cache.get(&key).unwrap().name.as_deref(), Some("B"));

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn concurrent_writers_leave_one_value_per_key() {
        let cache = Arc::new(ResultCache::new());
        let key = LookupKey::parse_normalized("+15551234567").unwrap();

        let threads: Vec<_> = (0..8)
            .map(|i| {
                let cache = cache.clone();
                let key = key.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        cache.put(
                            key.clone(),
                            Arc::new(LookupResponse::new("+15551234567").with_spam_count(i)),
                        );
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(cache.len(), 1);
        assert!(cache.get(&key).unwrap().spam_count < 8);
    }
}
