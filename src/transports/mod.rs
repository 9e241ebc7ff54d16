//! Concrete collaborators for the lookup and avatar services
//!
//! - [`DirectoryTransport`]: records loaded from a local TOML file
//! - [`HttpLookupTransport`]: remote JSON lookup API
//! - [`HttpImageFetcher`]: plain HTTP download for avatar images

pub mod directory;
pub mod http;
pub mod image_http;

pub use directory::DirectoryTransport;
pub use http::HttpLookupTransport;
pub use image_http::HttpImageFetcher;

use std::sync::Arc;

use crate::config::{ProviderConfig, ProviderKind};
use crate::errors::AppResult;
use crate::services::PhoneLookupTransport;

/// Build the lookup transport selected by `config`
pub fn from_config(config: &ProviderConfig) -> AppResult<Arc<dyn PhoneLookupTransport>> {
    Ok(match config.kind {
        ProviderKind::Directory => Arc::new(DirectoryTransport::from_config(config)?),
        ProviderKind::Http => Arc::new(HttpLookupTransport::from_config(config)?),
    })
}
