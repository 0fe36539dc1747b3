//! # Provider HTTP Client
//!
//! Thin reqwest wrapper shared by the vendor clients and the ERP client.
//!
//! ## Error Mapping
//! ```text
//! request deadline      → Timeout(secs)
//! connect / 5xx / 429   → ConnectionFailed
//! 401 / 403             → AuthRejected
//! other 4xx             → RequestRejected
//! unparseable body      → Schema
//! ```

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{SyncError, SyncResult};

/// Longest error body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct ProviderHttp {
    client: Client,
    base_url: String,
    timeout: Duration,
    provider: &'static str,
}

impl ProviderHttp {
    /// Builds a client for `base_url` whose requests abort after `timeout`.
    pub fn new(provider: &'static str, base_url: &str, timeout: Duration) -> SyncResult<Self> {
        let parsed = url::Url::parse(base_url)?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(SyncError::InvalidUrl(format!(
                "{} base URL must be http(s): '{}'",
                provider, base_url
            )));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Internal(format!("HTTP client: {}", e)))?;

        Ok(ProviderHttp {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            provider,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = self.url(path);
        debug!(provider = self.provider, %method, %url, "Vendor request");
        self.client.request(method, url)
    }

    pub fn get(&self, path: &str) -> RequestBuilder {
        self.request(Method::GET, path)
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        self.request(Method::POST, path)
    }

    /// Sends the request; non-2xx statuses become errors.
    pub async fn send(&self, builder: RequestBuilder) -> SyncResult<Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| SyncError::from_http(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::from_status(status, truncate(&body)));
        }
        Ok(response)
    }

    /// Sends the request and decodes a successful JSON body.
    pub async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> SyncResult<T> {
        self.decode(self.send(builder).await?).await
    }

    pub async fn decode<T: DeserializeOwned>(&self, response: Response) -> SyncResult<T> {
        response
            .json::<T>()
            .await
            .map_err(|e| SyncError::from_http(e, self.timeout))
    }
}

fn truncate(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &body[..end])
}
