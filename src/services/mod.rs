//! Service layer for caller lookups and avatar images
//!
//! The services own all caching and lifecycle state. They talk to providers,
//! image downloaders and subscribers only through the collaborator traits in
//! [`traits`], which keeps every network and UI concern at the edge.
//!
//! # Components
//!
//! - **KeyNormalizer**: canonical E.164 keys from raw user input
//! - **ListenerRegistry**: per-key subscriber sets, notified outside any lock
//! - **ResultCache**: last known provider answer per key
//! - **FetchExecutor**: bounded or unbounded worker pool with close/abort
//! - **DeliveryQueue**: single-consumer context that runs notifications in order
//! - **LookupService**: observer-driven lifecycle tying the above together
//! - **TieredBitmapCache**: hot/soft avatar cache with asynchronous fetches
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use lookup_provider::services::{
//!     DeliveryQueue, KeyNormalizer, ListenerHandle, LookupService, LookupServiceSettings,
//! };
//! use lookup_provider::transports::DirectoryTransport;
//!
//! # async fn example() -> lookup_provider::errors::AppResult<()> {
//! let (delivery, _loop) = DeliveryQueue::spawn();
//! let transport = Arc::new(DirectoryTransport::from_file("directory.toml", "Local")?);
//! let service = LookupService::new(
//!     KeyNormalizer::new("US")?,
//!     transport,
//!     delivery,
//!     LookupServiceSettings::default(),
//! );
//!
//! let listener: ListenerHandle = Arc::new(|info: &lookup_provider::models::LookupResponse| {
//!     println!("{:?}", info.name);
//! });
//! service.on_observer_arrive();
//! service.subscribe("(555) 123-4567", &listener)?;
//! service.lookup("(555) 123-4567", false)?;
//! # Ok(())
//! # }
//! ```

pub mod avatar_cache;
pub mod delivery;
pub mod fetch_executor;
pub mod key_normalizer;
pub mod listener_registry;
pub mod lookup_service;
pub mod result_cache;
pub mod traits;

// Re-export main traits and services
pub use avatar_cache::{AvatarCacheStats, Bitmap, TierLocation, TieredBitmapCache};
pub use delivery::DeliveryQueue;
pub use fetch_executor::FetchExecutor;
pub use key_normalizer::{KeyNormalizer, RegionRules};
pub use listener_registry::{ListenerHandle, ListenerRegistry};
pub use lookup_service::{LookupService, LookupServiceSettings};
pub use result_cache::ResultCache;
pub use traits::*;
