//! Tiered avatar cache: demotion, promotion, memory pressure and the remote fallback

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;

use lookup_provider::errors::{TransportError, TransportResult};
use lookup_provider::models::LookupKey;
use lookup_provider::services::{
    Bitmap, DeliveryQueue, ImageFetchTransport, TierLocation, TieredBitmapCache,
};

fn bitmap(width: u32, height: u32) -> Bitmap {
    Arc::new(DynamicImage::new_rgb8(width, height))
}

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut bytes = Vec::new();
    DynamicImage::new_rgb8(width, height)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

async fn fetch(cache: &TieredBitmapCache, key: &str) -> (LookupKey, Option<Bitmap>) {
    let (tx, rx) = oneshot::channel();
    cache.fetch_async(key, move |key, image| {
        let _ = tx.send((key, image));
    });
    tokio::time::timeout(Duration::from_secs(2), rx)
        .await
        .expect("callback not delivered in time")
        .expect("callback dropped")
}

/// Serves a 4x3 PNG for `.png` URLs, garbage for `.txt` and a 404 otherwise
#[derive(Default)]
struct FakeImageServer {
    downloads: AtomicUsize,
}

#[async_trait]
impl ImageFetchTransport for FakeImageServer {
    async fn download(&self, key: &LookupKey) -> TransportResult<Vec<u8>> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if key.as_str().ends_with(".png") {
            Ok(png_bytes(4, 3))
        } else if key.as_str().ends_with(".txt") {
            Ok(b"definitely not an image".to_vec())
        } else {
            Err(TransportError::Http {
                status: 404,
                message: "Not Found".to_string(),
            })
        }
    }
}

#[tokio::test]
async fn test_overflowing_the_hot_tier_demotes_the_least_recently_used_entry() {
    let (delivery, _loop) = DeliveryQueue::spawn();
    let cache = TieredBitmapCache::new(50, delivery).unwrap();
    cache.initialize().unwrap();

    for i in 0..51 {
        cache.put(&format!("avatar-{i}"), bitmap(1, 1)).unwrap();
    }

    let stats = cache.stats();
    assert_eq!(stats.hot_entries, 50);
    assert_eq!(stats.soft_entries, 1);
    assert_eq!(stats.demotions, 1);
    assert_eq!(cache.tier_of("avatar-0"), Some(TierLocation::Soft));
    assert_eq!(cache.tier_of("avatar-50"), Some(TierLocation::Hot));

    // A soft hit moves the entry back up and pushes out the next oldest
    let (key, image) = fetch(&cache, "avatar-0").await;
    assert_eq!(key.as_str(), "avatar-0");
    assert!(image.is_some());
    assert_eq!(cache.tier_of("avatar-0"), Some(TierLocation::Hot));
    assert_eq!(cache.tier_of("avatar-1"), Some(TierLocation::Soft));
    assert_eq!(cache.stats().soft_hits, 1);
}

#[tokio::test]
async fn test_miss_without_fallback_reports_no_image() {
    let (delivery, _loop) = DeliveryQueue::spawn();
    let cache = TieredBitmapCache::new(4, delivery).unwrap();
    cache.initialize().unwrap();

    let (key, image) = fetch(&cache, "https://example.com/missing.png").await;
    assert_eq!(key.as_str(), "https://example.com/missing.png");
    assert!(image.is_none());
    assert_eq!(cache.stats().misses, 1);
}

#[tokio::test]
async fn test_low_memory_reclaims_only_unreferenced_soft_entries() {
    let (delivery, _loop) = DeliveryQueue::spawn();
    let cache = TieredBitmapCache::new(1, delivery).unwrap();
    cache.initialize().unwrap();

    let held = bitmap(2, 2);
    cache.put("held", Arc::clone(&held)).unwrap();
    cache.put("loose", bitmap(3, 3)).unwrap();
    cache.put("hot", bitmap(5, 5)).unwrap();
    assert_eq!(cache.stats().soft_entries, 2);

    assert_eq!(cache.on_low_memory(), 1);
    assert_eq!(cache.tier_of("held"), Some(TierLocation::Soft));
    assert_eq!(cache.tier_of("loose"), None);
    assert_eq!(cache.tier_of("hot"), Some(TierLocation::Hot));

    let (_, image) = fetch(&cache, "held").await;
    assert!(Arc::ptr_eq(&image.unwrap(), &held));
}

#[tokio::test]
async fn test_remote_fallback_decodes_and_caches() {
    let (delivery, _loop) = DeliveryQueue::spawn();
    let server = Arc::new(FakeImageServer::default());
    let cache = TieredBitmapCache::new(4, delivery)
        .unwrap()
        .with_image_fetcher(server.clone());
    cache.initialize().unwrap();

    let (_, image) = fetch(&cache, "https://example.com/a.png").await;
    let image = image.unwrap();
    assert_eq!((image.width(), image.height()), (4, 3));
    assert_eq!(cache.tier_of("https://example.com/a.png"), Some(TierLocation::Hot));

    // Second fetch is served from memory
    assert!(fetch(&cache, "https://example.com/a.png").await.1.is_some());
    assert_eq!(server.downloads.load(Ordering::SeqCst), 1);
    assert_eq!(cache.stats().remote_fetches, 1);
}

#[tokio::test]
async fn test_remote_failures_report_no_image() {
    let (delivery, _loop) = DeliveryQueue::spawn();
    let cache = TieredBitmapCache::new(4, delivery)
        .unwrap()
        .with_image_fetcher(Arc::new(FakeImageServer::default()));
    cache.initialize().unwrap();

    assert!(fetch(&cache, "https://example.com/a.txt").await.1.is_none());
    assert!(fetch(&cache, "https://example.com/gone").await.1.is_none());
    assert_eq!(cache.tier_of("https://example.com/a.txt"), None);
}

#[tokio::test]
async fn test_terminated_cache_drops_fetches() {
    let (delivery, _loop) = DeliveryQueue::spawn();
    let cache = TieredBitmapCache::new(4, delivery).unwrap();
    cache.initialize().unwrap();
    cache.put("a", bitmap(1, 1)).unwrap();
    assert!(cache.is_initialized());

    cache.terminate();
    assert!(!cache.is_initialized());

    let (tx, rx) = oneshot::channel::<()>();
    cache.fetch_async("a", move |_, _| {
        let _ = tx.send(());
    });
    assert!(rx.await.is_err());

    // Entries survive termination; a new pool serves them again
    cache.initialize().unwrap();
    assert!(fetch(&cache, "a").await.1.is_some());
}

#[tokio::test]
async fn test_clear_empties_both_tiers() {
    let (delivery, _loop) = DeliveryQueue::spawn();
    let cache = TieredBitmapCache::new(1, delivery).unwrap();
    cache.put("a", bitmap(1, 1)).unwrap();
    cache.put("b", bitmap(1, 1)).unwrap();

    cache.clear();
    let stats = cache.stats();
    assert_eq!((stats.hot_entries, stats.soft_entries), (0, 0));
}

#[tokio::test]
async fn test_zero_capacity_is_rejected() {
    let (delivery, _loop) = DeliveryQueue::spawn();
    assert!(TieredBitmapCache::new(0, delivery).is_err());
}
