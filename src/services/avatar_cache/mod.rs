//! Tiered avatar image cache
//!
//! Decoded images live in one of two in-memory tiers:
//!
//! - **Hot tier**: bounded, strongly held, least-recently-used order
//! - **Soft tier**: unbounded, entries may disappear under memory pressure
//!
//! Images pushed out of the hot tier are demoted to the soft tier and promoted
//! back on the next hit. A persistent tier and a remote downloader can be
//! plugged in behind both.

pub mod service;
pub mod tiers;

pub use service::{AvatarCacheStats, TierLocation, TieredBitmapCache};
pub use tiers::Bitmap;
