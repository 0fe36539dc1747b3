//! Square Orders API access: bearer token, cursor pagination.
//!
//! ```text
//! GET /v2/orders?location_id&begin_time&end_time&limit          → {orders, cursor: "c1"}
//! GET /v2/orders?location_id&begin_time&end_time&limit&cursor=c1 → {orders, cursor: "c2"}
//! ...                                                            → {orders}  (done)
//! ```

use std::collections::HashSet;

use chrono::SecondsFormat;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::SyncResult;
use crate::provider::ProviderHttp;
use tupa_core::DateRange;

#[derive(Debug, Deserialize)]
struct OrdersPage {
    #[serde(default)]
    orders: Vec<Value>,
    #[serde(default)]
    cursor: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SquareClient {
    http: ProviderHttp,
    access_token: String,
    location_id: String,
    page_limit: u32,
}

impl SquareClient {
    pub fn new(http: ProviderHttp, access_token: String, location_id: String, page_limit: u32) -> Self {
        SquareClient {
            http,
            access_token,
            location_id,
            page_limit,
        }
    }

    pub fn location_id(&self) -> &str {
        &self.location_id
    }

    /// Every raw order in `range`, across all pages.
    pub async fn list_orders(&self, range: DateRange) -> SyncResult<Vec<Value>> {
        let begin = range.from.to_rfc3339_opts(SecondsFormat::Secs, true);
        let end = range.to.to_rfc3339_opts(SecondsFormat::Secs, true);
        let limit = self.page_limit.to_string();

        let mut orders = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen = HashSet::new();

        loop {
            let mut query = vec![
                ("location_id", self.location_id.as_str()),
                ("begin_time", begin.as_str()),
                ("end_time", end.as_str()),
                ("limit", limit.as_str()),
            ];
            if let Some(c) = cursor.as_deref() {
                query.push(("cursor", c));
            }

            let request = self
                .http
                .get("/v2/orders")
                .bearer_auth(&self.access_token)
                .query(&query);
            let page: OrdersPage = self.http.send_json(request).await?;

            debug!(
                location_id = %self.location_id,
                page_orders = page.orders.len(),
                "Fetched Square orders page"
            );
            orders.extend(page.orders);

            match page.cursor.filter(|c| !c.is_empty()) {
                Some(next) if seen.insert(next.clone()) => cursor = Some(next),
                Some(next) => {
                    warn!(cursor = %next, "Square returned a repeated cursor, stopping pagination");
                    break;
                }
                None => break,
            }
        }

        Ok(orders)
    }

    /// Reads the configured location; proves the token works for it.
    pub async fn retrieve_location(&self) -> SyncResult<Value> {
        let request = self
            .http
            .get(&format!("/v2/locations/{}", self.location_id))
            .bearer_auth(&self.access_token);
        self.http.send_json(request).await
    }
}
