//! The two in-memory tiers behind the avatar cache

use image::DynamicImage;
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Weak};

use crate::models::LookupKey;

/// Decoded image shared between the cache and its consumers
pub type Bitmap = Arc<DynamicImage>;

/// Bounded LRU tier with strong ownership
pub(crate) struct HotTier {
    entries: LruCache<LookupKey, Bitmap>,
}

impl HotTier {
    pub(crate) fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: LruCache::new(capacity),
        }
    }

    /// Hit moves the entry to the most-recently-used position
    pub(crate) fn get(&mut self, key: &LookupKey) -> Option<Bitmap> {
        self.entries.get(key).cloned()
    }

    /// Insert as most recently used, returning the entry pushed out to make room
    pub(crate) fn insert(&mut self, key: LookupKey, image: Bitmap) -> Option<(LookupKey, Bitmap)> {
        match self.entries.push(key.clone(), image) {
            Some((evicted_key, evicted)) if evicted_key != key => Some((evicted_key, evicted)),
            _ => None,
        }
    }

    pub(crate) fn remove(&mut self, key: &LookupKey) -> Option<Bitmap> {
        self.entries.pop(key)
    }

    pub(crate) fn contains(&self, key: &LookupKey) -> bool {
        self.entries.contains(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Reference that is strong until memory pressure softens it
enum SoftRef {
    Strong(Bitmap),
    Weak(Weak<DynamicImage>),
}

impl SoftRef {
    fn get(&self) -> Option<Bitmap> {
        match self {
            SoftRef::Strong(image) => Some(Arc::clone(image)),
            SoftRef::Weak(weak) => weak.upgrade(),
        }
    }

    fn soften(&mut self) {
        if let SoftRef::Strong(image) = self {
            let weak = Arc::downgrade(image);
            *self = SoftRef::Weak(weak);
        }
    }

    fn is_alive(&self) -> bool {
        match self {
            SoftRef::Strong(_) => true,
            SoftRef::Weak(weak) => weak.strong_count() > 0,
        }
    }
}

/// Outcome of taking an entry out of the soft tier
#[derive(Debug)]
pub(crate) enum SoftTake {
    Absent,
    /// The key was present but its image has been reclaimed
    Reclaimed,
    Alive(Bitmap),
}

/// Unbounded tier whose entries may vanish after [`SoftTier::reclaim`]
#[derive(Default)]
pub(crate) struct SoftTier {
    entries: HashMap<LookupKey, SoftRef>,
}

impl SoftTier {
    pub(crate) fn insert(&mut self, key: LookupKey, image: Bitmap) {
        self.entries.insert(key, SoftRef::Strong(image));
    }

    /// Remove the entry for `key`; a hit is promoted by the caller
    pub(crate) fn take(&mut self, key: &LookupKey) -> SoftTake {
        match self.entries.remove(key) {
            None => SoftTake::Absent,
            Some(soft) => match soft.get() {
                Some(image) => SoftTake::Alive(image),
                None => SoftTake::Reclaimed,
            },
        }
    }

    pub(crate) fn remove(&mut self, key: &LookupKey) {
        self.entries.remove(key);
    }

    pub(crate) fn contains(&self, key: &LookupKey) -> bool {
        self.entries.get(key).is_some_and(SoftRef::is_alive)
    }

    /// Downgrade every entry to a weak reference and drop the ones nobody
    /// else holds. Returns how many entries were dropped.
    pub(crate) fn reclaim(&mut self) -> usize {
        let before = self.entries.len();
        for soft in self.entries.values_mut() {
            soft.soften();
        }
        self.entries.retain(|_, soft| soft.is_alive());
        before - self.entries.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: usize) -> LookupKey {
        LookupKey::opaque(&format!("https://cdn.example.com/{n}.png")).unwrap()
    }

    fn bitmap() -> Bitmap {
        Arc::new(DynamicImage::new_rgb8(1, 1))
    }

    #[test]
    fn hot_tier_evicts_least_recently_used() {
        let mut hot = HotTier::new(NonZeroUsize::new(2).unwrap());
        assert!(hot.insert(key(1), bitmap()).is_none());
        assert!(hot.insert(key(2), bitmap()).is_none());
        hot.get(&key(1));

        let (evicted, _) = hot.insert(key(3), bitmap()).unwrap();
        assert_eq!(evicted, key(2));
        assert!(hot.contains(&key(1)));
    }

    #[test]
    fn replacing_a_key_is_not_an_eviction() {
        let mut hot = HotTier::new(NonZeroUsize::new(1).unwrap());
        hot.insert(key(1), bitmap());
        assert!(hot.insert(key(1), bitmap()).is_none());
        assert_eq!(hot.len(), 1);
    }

    #[test]
    fn reclaim_keeps_only_images_held_elsewhere() {
        let mut soft = SoftTier::default();
        let held = bitmap();
        soft.insert(key(1), Arc::clone(&held));
        soft.insert(key(2), bitmap());

        assert_eq!(soft.reclaim(), 1);
        assert!(soft.contains(&key(1)));
        assert!(matches!(soft.take(&key(1)), SoftTake::Alive(_)));
        assert!(matches!(soft.take(&key(2)), SoftTake::Absent));
    }

    #[test]
    fn take_reports_reclaimed_entries() {
        let mut soft = SoftTier::default();
        let held = bitmap();
        soft.insert(key(1), Arc::clone(&held));
        soft.reclaim();
        drop(held);

        assert!(matches!(soft.take(&key(1)), SoftTake::Reclaimed));
        assert_eq!(soft.len(), 0);
    }
}
