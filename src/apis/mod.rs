//! Chained-call surface.
//!
//! # Data Flow
//! ```text
//! handler → ApiClient::post_json("ranker", "/", body)
//!     → [apis] table lookup (logical name → internal address)
//!     → reqwest (pooled outbound connection)
//!     → response bytes / json back to the handler
//! ```
//!
//! # Design Decisions
//! - The caller's in-flight entry stays elevated because its dispatch has not
//!   returned; nothing here touches the tracker
//! - Unknown logical names fail immediately instead of falling back to DNS

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use url::Url;

use crate::error::HandlerError;

/// Outbound client for calling other deployed logical APIs by name.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    addresses: Arc<BTreeMap<String, Url>>,
}

impl ApiClient {
    /// Build from the `[apis]` table. Addresses are validated at config load.
    pub fn new(apis: &BTreeMap<String, String>, timeout: Duration) -> Result<Self, HandlerError> {
        let mut addresses = BTreeMap::new();
        for (name, address) in apis {
            let url = Url::parse(address)
                .map_err(|e| HandlerError::from_error(format!("invalid address for api '{}'", name), e))?;
            addresses.insert(name.clone(), url);
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            addresses: Arc::new(addresses),
        })
    }

    /// Names of every reachable logical API.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.addresses.keys().map(String::as_str)
    }

    /// Resolve `path` against the internal address of `api`.
    pub fn url(&self, api: &str, path: &str) -> Result<Url, HandlerError> {
        let base = self
            .addresses
            .get(api)
            .ok_or_else(|| HandlerError::new(format!("unknown api '{}'", api)))?;
        base.join(path.trim_start_matches('/'))
            .map_err(|e| HandlerError::from_error(format!("invalid path '{}' for api '{}'", path, api), e))
    }

    pub async fn post_json(
        &self,
        api: &str,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, HandlerError> {
        let url = self.url(api, path)?;
        tracing::debug!(target_api = %api, url = %url, "Chained call");
        let response = self.client.post(url).json(body).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }

    pub async fn post_bytes(
        &self,
        api: &str,
        path: &str,
        content_type: &str,
        body: impl Into<Bytes>,
    ) -> Result<Bytes, HandlerError> {
        let url = self.url(api, path)?;
        tracing::debug!(target_api = %api, url = %url, "Chained call");
        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body.into())
            .send()
            .await?
            .error_for_status()?;
        Ok(response.bytes().await?)
    }

    pub async fn get(&self, api: &str, path: &str) -> Result<Bytes, HandlerError> {
        let url = self.url(api, path)?;
        tracing::debug!(target_api = %api, url = %url, "Chained call");
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?)
    }
}
