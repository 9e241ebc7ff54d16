//! Avatar cache service with hot/soft tiers and an asynchronous fetch path

use parking_lot::Mutex;
use serde::Serialize;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

use super::tiers::{Bitmap, HotTier, SoftTake, SoftTier};
use crate::config::AvatarCacheConfig;
use crate::errors::{AppError, AppResult};
use crate::models::LookupKey;
use crate::services::delivery::DeliveryQueue;
use crate::services::fetch_executor::FetchExecutor;
use crate::services::traits::{ImageFetchTransport, PersistentImageTier};
use crate::transports::HttpImageFetcher;

const EXECUTOR_NAME: &str = "avatar-cache";

/// Which in-memory tier currently holds a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TierLocation {
    Hot,
    Soft,
}

/// Avatar cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AvatarCacheStats {
    pub hot_entries: usize,
    pub soft_entries: usize,
    pub hot_hits: u64,
    pub soft_hits: u64,
    pub misses: u64,
    /// Entries pushed from the hot tier into the soft tier
    pub demotions: u64,
    pub remote_fetches: u64,
}

struct Tiers {
    hot: HotTier,
    soft: SoftTier,
}

#[derive(Default)]
struct Counters {
    hot_hits: AtomicU64,
    soft_hits: AtomicU64,
    misses: AtomicU64,
    demotions: AtomicU64,
    remote_fetches: AtomicU64,
}

struct CacheInner {
    tiers: Mutex<Tiers>,
    counters: Counters,
    delivery: DeliveryQueue,
    executor: Mutex<Option<FetchExecutor>>,
    max_fetch_workers: Option<usize>,
    persistent: Option<Arc<dyn PersistentImageTier>>,
    remote: Option<Arc<dyn ImageFetchTransport>>,
}

/// Two-tier in-memory avatar cache.
///
/// A key lives in at most one tier. `put` always lands in the hot tier;
/// whatever the hot tier evicts is demoted to the soft tier. Lookups go
/// through [`fetch_async`](Self::fetch_async) and complete on the delivery
/// context.
#[derive(Clone)]
pub struct TieredBitmapCache {
    inner: Arc<CacheInner>,
}

impl TieredBitmapCache {
    pub fn new(hot_capacity: usize, delivery: DeliveryQueue) -> AppResult<Self> {
        let capacity = NonZeroUsize::new(hot_capacity)
            .ok_or_else(|| AppError::invalid_argument("hot_capacity", "must be at least 1"))?;

        Ok(Self {
            inner: Arc::new(CacheInner {
                tiers: Mutex::new(Tiers {
                    hot: HotTier::new(capacity),
                    soft: SoftTier::default(),
                }),
                counters: Counters::default(),
                delivery,
                executor: Mutex::new(None),
                max_fetch_workers: None,
                persistent: None,
                remote: None,
            }),
        })
    }

    /// Build from configuration; `fetch_remote` attaches an HTTP image fetcher
    pub fn from_config(config: &AvatarCacheConfig, delivery: DeliveryQueue) -> AppResult<Self> {
        let cache = Self::new(config.hot_capacity, delivery)?
            .with_max_fetch_workers(config.max_fetch_workers);
        if !config.fetch_remote {
            return Ok(cache);
        }
        let fetcher = HttpImageFetcher::new(config.request_timeout)?;
        Ok(cache.with_image_fetcher(Arc::new(fetcher)))
    }

    pub fn with_max_fetch_workers(self, max_fetch_workers: Option<usize>) -> Self {
        self.reconfigure(|inner| inner.max_fetch_workers = max_fetch_workers)
    }

    /// Consult `tier` after both in-memory tiers miss
    pub fn with_persistent_tier(self, tier: Arc<dyn PersistentImageTier>) -> Self {
        self.reconfigure(|inner| inner.persistent = Some(tier))
    }

    /// Download and decode on a full miss
    pub fn with_image_fetcher(self, fetcher: Arc<dyn ImageFetchTransport>) -> Self {
        self.reconfigure(|inner| inner.remote = Some(fetcher))
    }

    /// Builder helper; only effective before the cache is shared
    fn reconfigure(self, apply: impl FnOnce(&mut CacheInner)) -> Self {
        match Arc::try_unwrap(self.inner) {
            Ok(mut inner) => {
                apply(&mut inner);
                Self {
                    inner: Arc::new(inner),
                }
            }
            Err(shared) => {
                warn!("Avatar cache already shared; ignoring configuration change");
                Self { inner: shared }
            }
        }
    }

    /// Create the worker pool. Calling it twice keeps the existing pool.
    pub fn initialize(&self) -> AppResult<()> {
        let mut executor = self.inner.executor.lock();
        if executor.as_ref().is_some_and(FetchExecutor::is_alive) {
            return Ok(());
        }
        *executor = Some(FetchExecutor::new(EXECUTOR_NAME, self.inner.max_fetch_workers)?);
        info!("Avatar cache initialized");
        Ok(())
    }

    /// Shut the worker pool down, abandoning fetches still in progress
    pub fn terminate(&self) {
        if let Some(executor) = self.inner.executor.lock().take() {
            executor.abort();
            info!("Avatar cache terminated");
        }
    }

    pub fn has_remote_fallback(&self) -> bool {
        self.inner.remote.is_some()
    }

    pub fn is_initialized(&self) -> bool {
        self.inner
            .executor
            .lock()
            .as_ref()
            .is_some_and(FetchExecutor::is_alive)
    }

    /// Insert `image` for `raw_key` into the hot tier, replacing any entry in either tier
    pub fn put(&self, raw_key: &str, image: Bitmap) -> AppResult<()> {
        let key = LookupKey::opaque(raw_key)?;
        self.inner.insert(key, image);
        Ok(())
    }

    /// Look `raw_key` up off the caller's thread and hand the result to
    /// `callback` on the delivery context.
    ///
    /// An empty key, or a cache that has not been initialized, drops the
    /// request without calling `callback`.
    pub fn fetch_async<F>(&self, raw_key: &str, callback: F)
    where
        F: FnOnce(LookupKey, Option<Bitmap>) + Send + 'static,
    {
        let Ok(key) = LookupKey::opaque(raw_key) else {
            debug!("Ignoring avatar fetch with empty key");
            return;
        };

        let guard = self.inner.executor.lock();
        let Some(executor) = guard.as_ref() else {
            warn!("Avatar fetch for {} ignored: cache not initialized", key);
            return;
        };

        let inner = Arc::clone(&self.inner);
        let submitted = executor.submit(async move {
            let image = inner.resolve(&key).await;
            let delivered_key = key.clone();
            if !inner.delivery.post(move || callback(delivered_key, image)) {
                warn!("Avatar result for {} dropped: delivery context is gone", key);
            }
        });
        if !submitted {
            debug!("Avatar fetch dropped: cache terminated");
        }
    }

    /// Memory pressure: let go of soft entries nobody else is holding
    pub fn on_low_memory(&self) -> usize {
        let reclaimed = self.inner.tiers.lock().soft.reclaim();
        info!("Low memory: reclaimed {} soft avatar entr(ies)", reclaimed);
        reclaimed
    }

    pub fn clear(&self) {
        let mut tiers = self.inner.tiers.lock();
        tiers.hot.clear();
        tiers.soft.clear();
    }

    /// Which tier holds `raw_key`, without touching recency
    pub fn tier_of(&self, raw_key: &str) -> Option<TierLocation> {
        let key = LookupKey::opaque(raw_key).ok()?;
        let tiers = self.inner.tiers.lock();
        if tiers.hot.contains(&key) {
            Some(TierLocation::Hot)
        } else if tiers.soft.contains(&key) {
            Some(TierLocation::Soft)
        } else {
            None
        }
    }

    pub fn stats(&self) -> AvatarCacheStats {
        let tiers = self.inner.tiers.lock();
        let counters = &self.inner.counters;
        AvatarCacheStats {
            hot_entries: tiers.hot.len(),
            soft_entries: tiers.soft.len(),
            hot_hits: counters.hot_hits.load(Ordering::Relaxed),
            soft_hits: counters.soft_hits.load(Ordering::Relaxed),
            misses: counters.misses.load(Ordering::Relaxed),
            demotions: counters.demotions.load(Ordering::Relaxed),
            remote_fetches: counters.remote_fetches.load(Ordering::Relaxed),
        }
    }
}

impl CacheInner {
    fn insert(&self, key: LookupKey, image: Bitmap) {
        let mut tiers = self.tiers.lock();
        tiers.hot.remove(&key);
        tiers.soft.remove(&key);
        self.insert_hot(&mut tiers, key, image);
    }

    fn insert_hot(&self, tiers: &mut Tiers, key: LookupKey, image: Bitmap) {
        if let Some((evicted_key, evicted)) = tiers.hot.insert(key, image) {
            debug!("Demoting avatar {} to the soft tier", evicted_key);
            tiers.soft.insert(evicted_key, evicted);
            self.counters.demotions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Hot tier, then soft tier with promotion
    fn lookup_memory(&self, key: &LookupKey) -> Option<Bitmap> {
        let mut tiers = self.tiers.lock();
        if let Some(image) = tiers.hot.get(key) {
            self.counters.hot_hits.fetch_add(1, Ordering::Relaxed);
            return Some(image);
        }

        match tiers.soft.take(key) {
            SoftTake::Alive(image) => {
                self.counters.soft_hits.fetch_add(1, Ordering::Relaxed);
                self.insert_hot(&mut tiers, key.clone(), Arc::clone(&image));
                Some(image)
            }
            SoftTake::Reclaimed => {
                debug!("Soft avatar entry for {} was reclaimed", key);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            SoftTake::Absent => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    async fn resolve(&self, key: &LookupKey) -> Option<Bitmap> {
        if let Some(image) = self.lookup_memory(key) {
            return Some(image);
        }

        if let Some(persistent) = &self.persistent {
            if let Some(image) = persistent.load(key) {
                debug!("Avatar {} restored from the persistent tier", key);
                self.insert(key.clone(), Arc::clone(&image));
                return Some(image);
            }
        }

        match &self.remote {
            Some(remote) => self.fetch_remote(remote.as_ref(), key).await,
            None => None,
        }
    }

    async fn fetch_remote(&self, remote: &dyn ImageFetchTransport, key: &LookupKey) -> Option<Bitmap> {
        self.counters.remote_fetches.fetch_add(1, Ordering::Relaxed);
        let bytes = match remote.download(key).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Avatar download for {} failed: {}", key, e);
                return None;
            }
        };

        let decoded = tokio::task::spawn_blocking(move || image::load_from_memory(&bytes)).await;
        let image = match decoded {
            Ok(Ok(image)) => Arc::new(image),
            Ok(Err(e)) => {
                warn!("Failed to decode avatar {}: {}", key, e);
                return None;
            }
            Err(e) => {
                warn!("Avatar decode task for {} failed: {}", key, e);
                return None;
            }
        };

        debug!(
            "Fetched avatar {} ({}x{})",
            key,
            image.width(),
            image.height()
        );
        self.insert(key.clone(), Arc::clone(&image));
        if let Some(persistent) = &self.persistent {
            persistent.store(key, &image);
        }
        Some(image)
    }
}
