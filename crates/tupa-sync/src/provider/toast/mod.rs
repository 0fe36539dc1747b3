//! # Toast Adapter
//!
//! ## Configuration (`pos_config`)
//! ```toml
//! client_id = "..."              # required, machine client
//! client_secret = "..."          # required
//! restaurant_guid = "..."        # required
//! base_url = "https://ws-api.toasttab.com"
//! timeout_secs = 30
//! page_size = 100
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

pub use client::ToastClient;

pub const PROVIDER_ID: &str = "toast";

const FEATURES: &[ProviderFeature] = &[
    ProviderFeature::Sales,
    ProviderFeature::Customers,
    ProviderFeature::Categories,
    ProviderFeature::Modifiers,
    ProviderFeature::Pagination,
];

#[derive(Debug, Clone, Deserialize)]
pub struct ToastConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub restaurant_guid: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default)]
    pub last_sync: Option<DateTime<Utc>>,
}

fn default_base_url() -> String {
    "https://ws-api.toasttab.com".to_string()
}
fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}
fn default_page_size() -> u32 {
    100
}

impl ToastConfig {
    pub fn from_value(value: &Value) -> SyncResult<Self> {
        let config: ToastConfig = serde_json::from_value(value.clone())
            .map_err(|e| SyncError::InvalidConfig(format!("toast: {}", e)))?;

        for (field, value) in [
            ("client_id", &config.client_id),
            ("client_secret", &config.client_secret),
            ("restaurant_guid", &config.restaurant_guid),
        ] {
            if value.trim().is_empty() {
                return Err(SyncError::InvalidConfig(format!("toast: {} is required", field)));
            }
        }
        if config.page_size == 0 {
            return Err(SyncError::InvalidConfig("toast: page_size must be greater than 0".into()));
        }
        Ok(config)
    }
}

pub struct ToastAdapter {
    client: ToastClient,
    last_sync: RwLock<Option<DateTime<Utc>>>,
}

impl ToastAdapter {
    pub fn new(config: ToastConfig) -> SyncResult<Self> {
        let http = ProviderHttp::new(
            PROVIDER_ID,
            &config.base_url,
            Duration::from_secs(config.timeout_secs),
        )?;
        let client = ToastClient::new(
            http,
            config.client_id,
            config.client_secret,
            config.restaurant_guid,
            config.page_size,
        );

        Ok(ToastAdapter {
            client,
            last_sync: RwLock::new(config.last_sync),
        })
    }

    /// Registry factory entry point.
    pub fn from_config(value: &Value) -> SyncResult<Box<dyn PosAdapter>> {
        let adapter = ToastAdapter::new(ToastConfig::from_value(value)?)?;
        Ok(Box::new(adapter))
    }

    pub fn descriptor() -> AdapterDescriptor {
        AdapterDescriptor {
            provider_id: PROVIDER_ID.to_string(),
            display_name: "Toast".to_string(),
            version: "1.0.0".to_string(),
            features: AdapterDescriptor::feature_names(FEATURES),
            batch_size_limit: 500,
            real_time_supported: false,
            pagination_supported: true,
        }
    }
}

#[async_trait]
impl PosAdapter for ToastAdapter {
    fn provider_id(&self) -> &str {
        PROVIDER_ID
    }

    async fn fetch_sales(&self, client_id: &str, range: DateRange) -> SyncResult<Vec<NormalizedSale>> {
        let orders = self.client.list_orders(range).await?;
        let sales = mapper::map_orders(&orders, Some(self.client.restaurant_guid()))?;

        info!(
            client_id,
            provider = PROVIDER_ID,
            restaurant = %self.client.restaurant_guid(),
            orders = orders.len(),
            sales = sales.len(),
            "Fetched Toast sales"
        );

        *self.last_sync.write().await = Some(range.to);
        Ok(sales)
    }

    fn map_to_tupa(&self, raw: &Value) -> SyncResult<Vec<NormalizedSale>> {
        mapper::map_payload(raw)
    }

    async fn validate_connection(&self) -> bool {
        match self.client.token().await {
            Ok(_) => true,
            Err(e) => {
                warn!(provider = PROVIDER_ID, error = %e, "Toast connection check failed");
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
