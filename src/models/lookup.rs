use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use crate::errors::{AppError, AppResult};

/// Canonical identifier used for every cache and listener operation.
///
/// Equality and hashing are by canonical string value. Instances are produced
/// by [`crate::services::KeyNormalizer`] or by the explicit constructors below
/// and never change afterwards; cloning is a reference count bump.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LookupKey(Arc<str>);

impl LookupKey {
    /// Key for values that have no canonical form beyond trimming (image URLs)
    pub fn opaque(raw: &str) -> AppResult<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AppError::invalid_argument("key", "must not be empty"));
        }
        Ok(Self(Arc::from(trimmed)))
    }

    /// Accept a phone number that is already in E.164 form
    pub fn parse_normalized(raw: &str) -> AppResult<Self> {
        if raw.is_empty() {
            return Err(AppError::invalid_argument("key", "must not be empty"));
        }
        if !is_e164(raw) {
            return Err(AppError::invalid_key(raw, "not in E.164 form"));
        }
        Ok(Self(Arc::from(raw)))
    }

    /// Wrap a string the normalizer has already canonicalized
    pub(crate) fn from_canonical(canonical: String) -> Self {
        Self(Arc::from(canonical))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// `+` followed by 3 to 15 digits, no leading zero in the country code
pub(crate) fn is_e164(value: &str) -> bool {
    let Some(digits) = value.strip_prefix('+') else {
        return false;
    };
    (3..=15).contains(&digits.len())
        && digits.bytes().all(|b| b.is_ascii_digit())
        && !digits.starts_with('0')
}

impl fmt::Display for LookupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for LookupKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for LookupKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Caller attribution returned by a lookup provider.
///
/// Immutable once built; the service hands out `Arc<LookupResponse>` so that
/// the cache and every listener share one allocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupResponse {
    /// Number the provider resolved, in E.164 form
    pub number: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    /// Remote avatar image, usable as a key for the avatar cache
    #[serde(default)]
    pub photo_url: Option<String>,
    /// Number of spam reports the provider holds for this number
    #[serde(default)]
    pub spam_count: u32,
    /// Provider that produced this record
    #[serde(default)]
    pub provider_name: Option<String>,
    #[serde(default = "Utc::now")]
    pub fetched_at: DateTime<Utc>,
}

impl LookupResponse {
    pub fn new(number: impl Into<String>) -> Self {
        Self {
            number: number.into(),
            name: None,
            address: None,
            city: None,
            country: None,
            photo_url: None,
            spam_count: 0,
            provider_name: None,
            fetched_at: Utc::now(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_spam_count(mut self, spam_count: u32) -> Self {
        self.spam_count = spam_count;
        self
    }

    pub fn is_likely_spam(&self) -> bool {
        self.spam_count > 0
    }
}

/// Lifecycle of the lookup service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Stopped,
    Starting,
    Running,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Stopped => "stopped",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a cache hit still sends a request to the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshPolicy {
    /// Deliver the cached value and refresh it from the provider
    #[default]
    Always,
    /// Only ask the provider when nothing was cached or on requery
    WhenMissing,
}

/// Point-in-time view of the lookup service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LookupServiceStats {
    pub state: LifecycleState,
    pub observers: usize,
    pub cached_results: usize,
    pub listener_keys: usize,
    pub listeners: usize,
    pub in_flight: usize,
    /// Incremented on every successful start
    pub generation: u64,
}
