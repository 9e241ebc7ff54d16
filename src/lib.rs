//! Caller-identity lookup with request coalescing, listener fan-out and a
//! tiered avatar image cache.
//!
//! The [`services::LookupService`] runs its provider only while observers are
//! active, caches the last answer per canonical number and notifies every
//! subscribed listener on a single delivery context. The
//! [`services::TieredBitmapCache`] keeps decoded avatar images in a bounded
//! hot tier backed by a reclaimable soft tier.

pub mod config;
pub mod errors;
pub mod models;
pub mod services;
pub mod transports;
