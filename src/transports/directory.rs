//! File-backed lookup provider
//!
//! Reads caller records from a TOML file of the form
//!
//! ```toml
//! [[entries]]
//! number = "+15551234567"
//! name = "Springfield Plumbing"
//! city = "Springfield"
//! spam_count = 0
//! ```
//!
//! and answers lookups from memory after a configurable delay.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::ProviderConfig;
use crate::errors::{AppError, AppResult, TransportError, TransportResult};
use crate::models::{LookupKey, LookupResponse};
use crate::services::PhoneLookupTransport;

#[derive(Debug, Default, Deserialize)]
struct DirectoryFile {
    #[serde(default)]
    entries: Vec<LookupResponse>,
}

pub struct DirectoryTransport {
    name: String,
    records: HashMap<LookupKey, LookupResponse>,
    /// Reports received since load, added to the recorded count on fetch
    spam_reports: DashMap<LookupKey, u32>,
    latency: Duration,
    spam_reporting: bool,
    started: AtomicBool,
}

impl DirectoryTransport {
    /// Build a directory from records whose numbers are already in E.164 form
    pub fn new(
        name: impl Into<String>,
        records: impl IntoIterator<Item = LookupResponse>,
    ) -> AppResult<Self> {
        let mut by_key = HashMap::new();
        for record in records {
            let key = LookupKey::parse_normalized(&record.number)?;
            if by_key.insert(key, record).is_some() {
                warn!("Duplicate directory entry; keeping the last one");
            }
        }

        Ok(Self {
            name: name.into(),
            records: by_key,
            spam_reports: DashMap::new(),
            latency: Duration::ZERO,
            spam_reporting: true,
            started: AtomicBool::new(false),
        })
    }

    pub fn from_file(path: impl AsRef<Path>, name: impl Into<String>) -> AppResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let file: DirectoryFile = toml::from_str(&contents).map_err(|e| {
            AppError::configuration(format!("Failed to parse {}: {e}", path.display()))
        })?;
        let transport = Self::new(name, file.entries)?;
        info!(
            "Loaded {} directory entr(ies) from {}",
            transport.records.len(),
            path.display()
        );
        Ok(transport)
    }

    /// Load the configured directory file; a missing file yields an empty directory
    pub fn from_config(config: &ProviderConfig) -> AppResult<Self> {
        let transport = if config.directory_file.exists() {
            Self::from_file(&config.directory_file, config.name.clone())?
        } else {
            warn!(
                "Directory file {} not found; starting with an empty directory",
                config.directory_file.display()
            );
            Self::new(config.name.clone(), Vec::new())?
        };
        Ok(transport
            .with_latency(config.simulated_latency)
            .with_spam_reporting(config.spam_reporting))
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_spam_reporting(mut self, enabled: bool) -> Self {
        self.spam_reporting = enabled;
        self
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn ensure_started(&self) -> TransportResult<()> {
        if self.started.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::unavailable(&self.name, "provider not started"))
        }
    }
}

#[async_trait]
impl PhoneLookupTransport for DirectoryTransport {
    fn start(&self) -> TransportResult<()> {
        self.started.store(true, Ordering::SeqCst);
        debug!("Directory provider '{}' started", self.name);
        Ok(())
    }

    fn stop(&self) {
        self.started.store(false, Ordering::SeqCst);
        debug!("Directory provider '{}' stopped", self.name);
    }

    async fn fetch(&self, key: &LookupKey) -> TransportResult<LookupResponse> {
        self.ensure_started()?;
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut response = self
            .records
            .get(key)
            .cloned()
            .ok_or_else(|| TransportError::NotFound {
                key: key.to_string(),
            })?;

        if let Some(reports) = self.spam_reports.get(key) {
            response.spam_count = response.spam_count.saturating_add(*reports);
        }
        response.provider_name = Some(self.name.clone());
        response.fetched_at = Utc::now();
        Ok(response)
    }

    async fn report_spam(&self, key: &LookupKey) -> TransportResult<()> {
        self.ensure_started()?;
        if !self.spam_reporting {
            return Err(TransportError::unavailable(
                &self.name,
                "spam reporting disabled",
            ));
        }
        *self.spam_reports.entry(key.clone()).or_insert(0) += 1;
        Ok(())
    }

    fn supports_spam_reporting(&self) -> bool {
        self.spam_reporting
    }

    fn provider_name(&self) -> String {
        self.name.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const DIRECTORY: &str = r#"
[[entries]]
number = "+15551234567"
name = "Springfield Plumbing"
city = "Springfield"

[[entries]]
number = "+442079460000"
name = "Unknown Caller"
spam_count = 4
"#;

    fn key(raw: &str) -> LookupKey {
        LookupKey::parse_normalized(raw).unwrap()
    }

    fn write_directory() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(DIRECTORY.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn fetch_requires_start() {
        let file = write_directory();
        let transport = DirectoryTransport::from_file(file.path(), "Local").unwrap();
        assert_eq!(transport.len(), 2);

        let err = transport.fetch(&key("+15551234567")).await.unwrap_err();
        assert!(matches!(err, TransportError::Unavailable { .. }));

        transport.start().unwrap();
        let response = transport.fetch(&key("+15551234567")).await.unwrap();
        assert_eq!(response.name.as_deref(), Some("Springfield Plumbing"));
        assert_eq!(response.provider_name.as_deref(), Some("Local"));
    }

    #[tokio::test]
    async fn unknown_numbers_are_not_found() {
        let transport = DirectoryTransport::new("Local", Vec::new()).unwrap();
        transport.start().unwrap();
        let err = transport.fetch(&key("+15550000000")).await.unwrap_err();
        assert!(matches!(err, TransportError::NotFound { .. }));
    }

    #[tokio::test]
    async fn spam_reports_raise_the_count_on_later_fetches() {
        let file = write_directory();
        let transport = DirectoryTransport::from_file(file.path(), "Local").unwrap();
        transport.start().unwrap();

        let uk = key("+442079460000");
        transport.report_spam(&uk).await.unwrap();
        transport.report_spam(&uk).await.unwrap();
        assert_eq!(transport.fetch(&uk).await.unwrap().spam_count, 6);
    }

    #[tokio::test]
    async fn disabled_spam_reporting_is_refused() {
        let transport = DirectoryTransport::new("Local", Vec::new())
            .unwrap()
            .with_spam_reporting(false);
        transport.start().unwrap();
        assert!(!transport.supports_spam_reporting());
        assert!(transport.report_spam(&key("+15551234567")).await.is_err());
    }

    #[test]
    fn non_canonical_numbers_are_rejected_at_load() {
        let result = DirectoryTransport::new("Local", vec![LookupResponse::new("555-1234")]);
        assert!(matches!(result, Err(AppError::InvalidKey { .. })));
    }

    #[test]
    fn missing_file_from_config_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let config = ProviderConfig {
            directory_file: dir.path().join("absent.toml"),
            ..ProviderConfig::default()
        };
        let transport = DirectoryTransport::from_config(&config).unwrap();
        assert!(transport.is_empty());
        assert_eq!(transport.provider_name(), config.name);
    }
}
