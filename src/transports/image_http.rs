use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::errors::{AppResult, TransportError, TransportResult};
use crate::models::LookupKey;
use crate::services::ImageFetchTransport;

/// Downloads avatar images; the cache key is the image URL
pub struct HttpImageFetcher {
    client: Client,
}

impl HttpImageFetcher {
    pub fn new(request_timeout: Duration) -> AppResult<Self> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ImageFetchTransport for HttpImageFetcher {
    async fn download(&self, key: &LookupKey) -> TransportResult<Vec<u8>> {
        let url = Url::parse(key.as_str())
            .map_err(|e| TransportError::decode(key.as_str(), format!("not a URL: {e}")))?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(key.as_str(), &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Http {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("Unknown").to_string(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransportError::from_reqwest(key.as_str(), &e))?;
        debug!("Downloaded {} bytes for avatar {}", bytes.len(), key);
        Ok(bytes.to_vec())
    }
}
