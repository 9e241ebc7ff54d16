//! Collaborator traits at the edges of the lookup and avatar services
//!
//! The services never talk to a network or a UI directly. Providers,
//! image downloaders, persistent image stores and listeners all plug in
//! through the traits below.

use async_trait::async_trait;

use crate::errors::TransportResult;
use crate::models::{LookupKey, LookupResponse};
use crate::services::avatar_cache::Bitmap;

/// Remote phone number lookup provider
///
/// `start` and `stop` bracket the running lifecycle of the lookup service;
/// `fetch` and `report_spam` are only called in between. Timeouts and retries
/// are the provider's business.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PhoneLookupTransport: Send + Sync {
    /// Bring the provider up. An error leaves the lookup service stopped.
    fn start(&self) -> TransportResult<()>;

    /// Release provider resources. Requests still in flight may complete.
    fn stop(&self);

    /// Resolve caller attribution for a canonical key
    async fn fetch(&self, key: &LookupKey) -> TransportResult<LookupResponse>;

    /// Report the number behind `key` as spam
    async fn report_spam(&self, key: &LookupKey) -> TransportResult<()>;

    fn supports_spam_reporting(&self) -> bool;

    /// Human-readable provider name for attribution
    fn provider_name(&self) -> String;
}

/// Downloads raw image bytes for an avatar key (the key is the image URL)
#[async_trait]
pub trait ImageFetchTransport: Send + Sync {
    async fn download(&self, key: &LookupKey) -> TransportResult<Vec<u8>>;
}

/// Extension point for a persistent avatar tier.
///
/// No implementation ships with the crate; a cache without one treats every
/// persistent lookup as a miss.
pub trait PersistentImageTier: Send + Sync {
    fn load(&self, key: &LookupKey) -> Option<Bitmap>;
    fn store(&self, key: &LookupKey, image: &Bitmap);
}

/// Subscriber interested in results for one or more keys.
///
/// Notifications arrive on the delivery context for fetch completions, or on
/// the caller's thread when `lookup` finds a cached value.
pub trait LookupListener: Send + Sync {
    fn on_new_info(&self, response: &LookupResponse);
}

impl<F> LookupListener for F
where
    F: Fn(&LookupResponse) + Send + Sync,
{
    fn on_new_info(&self, response: &LookupResponse) {
        self(response)
    }
}
