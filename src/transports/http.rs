use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::config::ProviderConfig;
use crate::errors::{AppError, AppResult, TransportError, TransportResult};
use crate::models::{LookupKey, LookupResponse};
use crate::services::PhoneLookupTransport;

/// Lookup provider backed by a JSON HTTP API.
///
/// `GET {base}/lookup/{number}` answers with a [`LookupResponse`] body,
/// `POST {base}/spam/{number}` records a spam report.
pub struct HttpLookupTransport {
    name: String,
    base_url: Url,
    client: Client,
    spam_reporting: bool,
    started: AtomicBool,
}

impl HttpLookupTransport {
    pub fn new(
        name: impl Into<String>,
        base_url: &str,
        request_timeout: Duration,
        spam_reporting: bool,
    ) -> AppResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| AppError::configuration(format!("Invalid base URL '{base_url}': {e}")))?;
        let client = Client::builder().timeout(request_timeout).build()?;

        Ok(Self {
            name: name.into(),
            base_url,
            client,
            spam_reporting,
            started: AtomicBool::new(false),
        })
    }

    pub fn from_config(config: &ProviderConfig) -> AppResult<Self> {
        let base_url = config.base_url.as_deref().ok_or_else(|| {
            AppError::configuration("provider.base_url is required for the http provider")
        })?;
        Self::new(
            config.name.clone(),
            base_url,
            config.request_timeout,
            config.spam_reporting,
        )
    }

    fn endpoint(&self, action: &str, key: &LookupKey) -> String {
        format!(
            "{}/{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            action,
            urlencoding::encode(key.as_str())
        )
    }

    fn ensure_started(&self) -> TransportResult<()> {
        if self.started.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::unavailable(&self.name, "provider not started"))
        }
    }

    fn check_status(status: StatusCode, key: &LookupKey) -> TransportResult<()> {
        if status == StatusCode::NOT_FOUND {
            return Err(TransportError::NotFound {
                key: key.to_string(),
            });
        }
        if !status.is_success() {
            return Err(TransportError::Http {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("Unknown").to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PhoneLookupTransport for HttpLookupTransport {
    fn start(&self) -> TransportResult<()> {
        self.started.store(true, Ordering::SeqCst);
        debug!("HTTP provider '{}' started against {}", self.name, self.base_url);
        Ok(())
    }

    fn stop(&self) {
        self.started.store(false, Ordering::SeqCst);
    }

    async fn fetch(&self, key: &LookupKey) -> TransportResult<LookupResponse> {
        self.ensure_started()?;
        let url = self.endpoint("lookup", key);
        debug!("Fetching caller info from {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(&url, &e))?;
        Self::check_status(response.status(), key)?;

        let mut info: LookupResponse = response
            .json()
            .await
            .map_err(|e| TransportError::decode(&url, e.to_string()))?;
        if info.provider_name.is_none() {
            info.provider_name = Some(self.name.clone());
        }
        Ok(info)
    }

    async fn report_spam(&self, key: &LookupKey) -> TransportResult<()> {
        self.ensure_started()?;
        if !self.spam_reporting {
            return Err(TransportError::unavailable(
                &self.name,
                "spam reporting disabled",
            ));
        }

        let url = self.endpoint("spam", key);
        let response = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(&url, &e))?;
        Self::check_status(response.status(), key)
    }

    fn supports_spam_reporting(&self) -> bool {
        self.spam_reporting
    }

    fn provider_name(&self) -> String {
        self.name.clone()
    }
}
