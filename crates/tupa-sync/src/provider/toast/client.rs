//! # Toast API Client
//!
//! ## Token Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  token()                                                               │
//! │     │  read lock: cached and not due for refresh? ──yes──► use it       │
//! │     │ no                                                                │
//! │     ▼                                                                   │
//! │  write lock, check again, then POST /authentication/v1/authentication/login
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │  ordersBulk ──401──► drop cached token, log in once more, retry page   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Orders are paged by number; a page shorter than `pageSize` is the last.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::provider::ProviderHttp;
use tupa_core::DateRange;

/// Tokens are renewed this long before they expire, or halfway through
/// their lifetime when that is shorter.
const REFRESH_MARGIN: Duration = Duration::from_secs(300);

/// Lifetime assumed when the login omits `expiresIn`.
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

const LOGIN_PATH: &str = "/authentication/v1/authentication/login";
const ORDERS_PATH: &str = "/orders/v2/ordersBulk";
const RESTAURANT_HEADER: &str = "Toast-Restaurant-External-ID";
const USER_ACCESS_TYPE: &str = "TOAST_MACHINE_CLIENT";
const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%z";

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    refresh_at: Instant,
}

impl CachedToken {
    fn new(access_token: String, lifetime: Duration) -> Self {
        let margin = REFRESH_MARGIN.min(lifetime / 2);
        CachedToken {
            access_token,
            refresh_at: Instant::now() + (lifetime - margin),
        }
    }

    fn needs_refresh(&self) -> bool {
        Instant::now() >= self.refresh_at
    }
}

/// `expiresIn` in seconds; absent or zero falls back to the default lifetime.
fn token_lifetime(expires_in: Option<u64>) -> Duration {
    expires_in
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_TOKEN_LIFETIME)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginToken {
    access_token: Option<String>,
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: Option<LoginToken>,
}

#[derive(Debug)]
pub struct ToastClient {
    http: ProviderHttp,
    client_id: String,
    client_secret: String,
    restaurant_guid: String,
    page_size: u32,
    token: RwLock<Option<CachedToken>>,
}

impl ToastClient {
    pub fn new(
        http: ProviderHttp,
        client_id: String,
        client_secret: String,
        restaurant_guid: String,
        page_size: u32,
    ) -> Self {
        ToastClient {
            http,
            client_id,
            client_secret,
            restaurant_guid,
            page_size,
            token: RwLock::new(None),
        }
    }

    pub fn restaurant_guid(&self) -> &str {
        &self.restaurant_guid
    }

    /// Returns a bearer token, logging in when none is cached or it is close
    /// to expiry.
    pub async fn token(&self) -> SyncResult<String> {
        {
            let guard = self.token.read().await;
            if let Some(token) = guard.as_ref().filter(|t| !t.needs_refresh()) {
                return Ok(token.access_token.clone());
            }
        }

        let mut guard = self.token.write().await;
        if let Some(token) = guard.as_ref().filter(|t| !t.needs_refresh()) {
            return Ok(token.access_token.clone());
        }

        let token = self.login().await?;
        let access_token = token.access_token.clone();
        *guard = Some(token);
        Ok(access_token)
    }

    async fn invalidate_token(&self) {
        *self.token.write().await = None;
    }

    async fn login(&self) -> SyncResult<CachedToken> {
        let request = self.http.post(LOGIN_PATH).json(&json!({
            "clientId": self.client_id,
            "clientSecret": self.client_secret,
            "userAccessType": USER_ACCESS_TYPE,
        }));
        let response: LoginResponse = self.http.send_json(request).await?;

        let token = response
            .token
            .ok_or_else(|| SyncError::AuthRejected("Toast login returned no token".into()))?;
        let access_token = token
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| SyncError::AuthRejected("Toast login returned no access token".into()))?;

        let lifetime = token_lifetime(token.expires_in);
        info!(
            restaurant = %self.restaurant_guid,
            lifetime_secs = lifetime.as_secs(),
            "Authenticated with Toast"
        );

        Ok(CachedToken::new(access_token, lifetime))
    }

    /// Every raw order in `range`, across all pages.
    pub async fn list_orders(&self, range: DateRange) -> SyncResult<Vec<Value>> {
        let start = range.from.format(DATE_FORMAT).to_string();
        let end = range.to.format(DATE_FORMAT).to_string();

        let mut orders = Vec::new();
        let mut page = 1u32;
        loop {
            let batch = self.orders_page(&start, &end, page).await?;
            let count = batch.len();
            debug!(restaurant = %self.restaurant_guid, page, count, "Fetched Toast orders page");
            orders.extend(batch);

            if count < self.page_size as usize {
                break;
            }
            page += 1;
        }

        Ok(orders)
    }

    async fn orders_page(&self, start: &str, end: &str, page: u32) -> SyncResult<Vec<Value>> {
        let token = self.token().await?;
        match self.send_orders_page(&token, start, end, page).await {
            Err(SyncError::AuthRejected(reason)) => {
                warn!(restaurant = %self.restaurant_guid, %reason, "Toast token rejected, logging in again");
                self.invalidate_token().await;
                let token = self.token().await?;
                self.send_orders_page(&token, start, end, page).await
            }
            other => other,
        }
    }

    async fn send_orders_page(&self, token: &str, start: &str, end: &str, page: u32) -> SyncResult<Vec<Value>> {
        let page = page.to_string();
        let page_size = self.page_size.to_string();
        let request = self
            .http
            .get(ORDERS_PATH)
            .bearer_auth(token)
            .header(RESTAURANT_HEADER, &self.restaurant_guid)
            .query(&[
                ("startDate", start),
                ("endDate", end),
                ("page", page.as_str()),
                ("pageSize", page_size.as_str()),
            ]);
        self.http.send_json(request).await
    }
}
