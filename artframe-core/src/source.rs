//! Raw byte sources behind the fetch coordinator.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::asset::AssetKey;
use crate::config::CacheConfig;
use crate::error::{AssetError, Result};
use crate::units::ByteSize;

/// Retrieves the raw encoded bytes for an asset key.
///
/// Implementations perform a single attempt; retries are left to callers.
#[async_trait]
pub trait AssetSource: Send + Sync {
    /// Fetch the encoded bytes behind `key`.
    async fn fetch(&self, key: &AssetKey) -> Result<Vec<u8>>;
}

/// HTTP(S) source backed by a pooled reqwest client.
///
/// Response bodies larger than `max_body` are refused, first by their
/// declared `Content-Length` and otherwise while streaming.
#[derive(Debug, Clone)]
pub struct HttpAssetSource {
    client: Client,
    max_body: ByteSize,
}

impl HttpAssetSource {
    pub fn new(timeout: Duration, max_body: ByteSize) -> Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(4)
            .timeout(timeout)
            .build()
            .map_err(|e| {
                AssetError::Network(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self::with_client(client, max_body))
    }

    /// Timeout and body cap taken from the pipeline config.
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        Self::new(config.fetch_timeout(), config.max_asset_bytes())
    }

    /// Wrap an existing client (shared connection pool, custom TLS, ...).
    pub fn with_client(client: Client, max_body: ByteSize) -> Self {
        Self { client, max_body }
    }

    pub fn max_body(&self) -> ByteSize {
        self.max_body
    }

    fn too_large(&self, size: u64) -> AssetError {
        AssetError::TooLarge {
            size: ByteSize::from_bytes(size),
            limit: self.max_body,
        }
    }
}

#[async_trait]
impl AssetSource for HttpAssetSource {
    async fn fetch(&self, key: &AssetKey) -> Result<Vec<u8>> {
        let url = key.to_url()?;

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AssetError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AssetError::Network(format!(
                "HTTP {}: {}",
                response.status(),
                key
            )));
        }

        let limit = self.max_body.as_bytes();
        if let Some(declared) = response.content_length()
            && declared > limit
        {
            return Err(self.too_large(declared));
        }

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| AssetError::Network(e.to_string()))?
        {
            let received = (body.len() + chunk.len()) as u64;
            if received > limit {
                return Err(self.too_large(received));
            }
            body.extend_from_slice(&chunk);
        }

        Ok(body)
    }
}
