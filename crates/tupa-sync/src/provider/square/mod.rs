//! # Square Adapter
//!
//! ## Configuration (`pos_config`)
//! ```toml
//! access_token = "sq0atp-..."     # required
//! location_id = "L1"              # required
//! base_url = "https://connect.squareup.com"
//! timeout_secs = 30
//! page_limit = 100
//! last_sync = "2024-03-10T00:00:00Z"   # optional seed
//! ```

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::{SyncError, SyncResult};
use crate::provider::http::DEFAULT_TIMEOUT_SECS;
use crate::provider::{PosAdapter, ProviderHttp};
use tupa_core::{AdapterDescriptor, DateRange, NormalizedSale, ProviderFeature};

pub mod client;
pub mod mapper;

pub use client::SquareClient;

pub const PROVIDER_ID: &str = "square";

const FEATURES: &[ProviderFeature] = &[
    ProviderFeature::Sales,
    ProviderFeature::Customers,
    ProviderFeature::Categories,
    ProviderFeature::Modifiers,
    ProviderFeature::Locations,
    ProviderFeature::Pagination,
];

#[derive(Debug, Clone, Deserialize)]
pub struct SquareConfig {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub location_id: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,
    #[serde(default)]
    pub last_sync: Option<DateTime<Utc>>,
}

fn default_base_url() -> String {
    "https://connect.squareup.com".to_string()
}
fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}
fn default_page_limit() -> u32 {
    100
}

impl SquareConfig {
    pub fn from_value(value: &Value) -> SyncResult<Self> {
        let config: SquareConfig = serde_json::from_value(value.clone())
            .map_err(|e| SyncError::InvalidConfig(format!("square: {}", e)))?;

        if config.access_token.trim().is_empty() {
            return Err(SyncError::InvalidConfig("square: access_token is required".into()));
        }
        if config.location_id.trim().is_empty() {
            return Err(SyncError::InvalidConfig("square: location_id is required".into()));
        }
        if config.page_limit == 0 {
            return Err(SyncError::InvalidConfig("square: page_limit must be greater than 0".into()));
        }
        Ok(config)
    }
}

pub struct SquareAdapter {
    client: SquareClient,
    last_sync: RwLock<Option<DateTime<Utc>>>,
}

impl SquareAdapter {
    pub fn new(config: SquareConfig) -> SyncResult<Self> {
        let http = ProviderHttp::new(
            PROVIDER_ID,
            &config.base_url,
            Duration::from_secs(config.timeout_secs),
        )?;
        let client = SquareClient::new(http, config.access_token, config.location_id, config.page_limit);

        Ok(SquareAdapter {
            client,
            last_sync: RwLock::new(config.last_sync),
        })
    }

    /// Registry factory entry point.
    pub fn from_config(value: &Value) -> SyncResult<Box<dyn PosAdapter>> {
        let adapter = SquareAdapter::new(SquareConfig::from_value(value)?)?;
        Ok(Box::new(adapter))
    }

    pub fn descriptor() -> AdapterDescriptor {
        AdapterDescriptor {
            provider_id: PROVIDER_ID.to_string(),
            display_name: "Square".to_string(),
            version: "1.0.0".to_string(),
            features: AdapterDescriptor::feature_names(FEATURES),
            batch_size_limit: 1000,
            real_time_supported: true,
            pagination_supported: true,
        }
    }
}

#[async_trait]
impl PosAdapter for SquareAdapter {
    fn provider_id(&self) -> &str {
        PROVIDER_ID
    }

    async fn fetch_sales(&self, client_id: &str, range: DateRange) -> SyncResult<Vec<NormalizedSale>> {
        let orders = self.client.list_orders(range).await?;
        let sales = mapper::map_orders(&orders)?;

        info!(
            client_id,
            provider = PROVIDER_ID,
            location_id = %self.client.location_id(),
            orders = orders.len(),
            sales = sales.len(),
            "Fetched Square sales"
        );

        *self.last_sync.write().await = Some(range.to);
        Ok(sales)
    }

    fn map_to_tupa(&self, raw: &Value) -> SyncResult<Vec<NormalizedSale>> {
        mapper::map_payload(raw)
    }

    async fn validate_connection(&self) -> bool {
        match self.client.retrieve_location().await {
            Ok(_) => true,
            Err(e) => {
                warn!(provider = PROVIDER_ID, error = %e, "Square connection check failed");
                false
            }
        }
    }

    async fn last_sync(&self) -> Option<DateTime<Utc>> {
        *self.last_sync.read().await
    }

    fn supported_features(&self) -> Vec<ProviderFeature> {
        FEATURES.to_vec()
    }

    fn metadata(&self) -> AdapterDescriptor {
        Self::descriptor()
    }
}
