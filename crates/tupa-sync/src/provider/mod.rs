//! # POS Provider Adapters
//!
//! Every POS vendor is reached through one [`PosAdapter`]. The orchestrator
//! only sees the trait, so adding a vendor never touches orchestration code.
//!
//! ## Adapter Anatomy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         <vendor> adapter                                │
//! │                                                                         │
//! │  ┌──────────────────────┐          ┌──────────────────────────────┐    │
//! │  │  client.rs           │  JSON    │  mapper.rs                   │    │
//! │  │  auth, pagination,   │─────────►│  vendor shape → NormalizedSale│   │
//! │  │  HTTP errors         │          │  (pure, Schema errors)       │    │
//! │  └──────────────────────┘          └──────────────────────────────┘    │
//! │             ▲                                     │                     │
//! │             │ ProviderHttp (timeout, status map)  ▼                     │
//! │        vendor API                         Vec<NormalizedSale>          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::SyncResult;
use tupa_core::{AdapterDescriptor, DateRange, NormalizedSale, ProviderFeature};

pub mod http;
pub(crate) mod raw;
pub mod square;
pub mod toast;

pub use http::ProviderHttp;
pub use square::SquareAdapter;
pub use toast::ToastAdapter;

/// Contract every POS vendor adapter satisfies.
#[async_trait]
pub trait PosAdapter: Send + Sync {
    /// Registry slug of this provider.
    fn provider_id(&self) -> &str;

    /// Fetches and normalizes every sale inside `range`.
    ///
    /// ## Errors
    /// - `ConnectionFailed` on transport failure
    /// - `AuthRejected` when credentials are refused
    /// - `Timeout` when a request exceeds its deadline
    /// - `Schema` when the vendor payload cannot be mapped
    async fn fetch_sales(&self, client_id: &str, range: DateRange)
        -> SyncResult<Vec<NormalizedSale>>;

    /// Maps a raw vendor payload. Pure; fails with `Schema` on bad shape.
    fn map_to_tupa(&self, raw: &Value) -> SyncResult<Vec<NormalizedSale>>;

    /// Never fails: any error is reported as `false`.
    async fn validate_connection(&self) -> bool;

    /// End of the last window this adapter fetched successfully.
    async fn last_sync(&self) -> Option<DateTime<Utc>> {
        None
    }

    fn supported_features(&self) -> Vec<ProviderFeature> {
        Vec::new()
    }

    fn metadata(&self) -> AdapterDescriptor;
}
