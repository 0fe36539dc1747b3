//! # ERP JSON-RPC Client
//!
//! ## Session Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  POST /web/session/authenticate {db, login, password}                   │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │  Set-Cookie: session_id=…  ──► cached until the ERP says otherwise     │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │  POST /web/dataset/call_kw/{model}/{method}   Cookie: session_id=…      │
//! │     │                                                                   │
//! │     └── SessionExpired fault ──► drop session, log in, call once more   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every other fault surfaces as [`SyncError::Erp`].

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, COOKIE, SET_COOKIE};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{DomainTerm, ErpGateway, ErpValues};
use crate::config::ErpSettings;
use crate::error::{SyncError, SyncResult};
use crate::provider::ProviderHttp;

const AUTH_PATH: &str = "/web/session/authenticate";
const SESSION_COOKIE: &str = "session_id";
const SESSION_EXPIRED_CODE: i64 = 100;

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcFault>,
}

#[derive(Debug, Deserialize)]
struct RpcFault {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<FaultData>,
}

#[derive(Debug, Deserialize)]
struct FaultData {
    #[serde(default)]
    name: String,
    #[serde(default)]
    message: String,
}

impl RpcFault {
    fn is_session_expired(&self) -> bool {
        self.code == SESSION_EXPIRED_CODE
            || self
                .data
                .as_ref()
                .map_or(false, |d| d.name.contains("SessionExpired"))
    }

    fn detail(self) -> String {
        self.data
            .map(|d| d.message)
            .filter(|m| !m.is_empty())
            .unwrap_or(self.message)
    }
}

#[derive(Debug)]
pub struct ErpClient {
    http: ProviderHttp,
    database: String,
    username: String,
    password: String,
    session: RwLock<Option<String>>,
    request_id: AtomicU64,
}

impl ErpClient {
    pub fn new(settings: &ErpSettings) -> SyncResult<Self> {
        Ok(ErpClient {
            http: ProviderHttp::new("erp", &settings.url, settings.timeout())?,
            database: settings.database.clone(),
            username: settings.username.clone(),
            password: settings.password.clone(),
            session: RwLock::new(None),
            request_id: AtomicU64::new(1),
        })
    }

    /// The cached session id, logging in when there is none.
    async fn session_id(&self) -> SyncResult<String> {
        if let Some(session) = self.session.read().await.as_ref() {
            return Ok(session.clone());
        }

        let mut guard = self.session.write().await;
        if let Some(session) = guard.as_ref() {
            return Ok(session.clone());
        }

        let session = self.login().await?;
        *guard = Some(session.clone());
        Ok(session)
    }

    async fn invalidate_session(&self) {
        *self.session.write().await = None;
    }

    async fn login(&self) -> SyncResult<String> {
        let request = self.http.post(AUTH_PATH).json(&self.envelope(json!({
            "db": self.database,
            "login": self.username,
            "password": self.password,
        })));
        let response = self.http.send(request).await?;
        let cookie = session_cookie(response.headers());
        let body: RpcResponse = self.http.decode(response).await?;

        if let Some(fault) = body.error {
            return Err(SyncError::AuthRejected(fault.detail()));
        }
        let uid = body
            .result
            .as_ref()
            .and_then(|r| r.get("uid"))
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                SyncError::AuthRejected(format!(
                    "ERP rejected credentials for '{}' on '{}'",
                    self.username, self.database
                ))
            })?;
        let session = cookie
            .ok_or_else(|| SyncError::AuthRejected("ERP login returned no session cookie".into()))?;

        info!(database = %self.database, uid, "ERP session opened");
        Ok(session)
    }

    fn envelope(&self, params: Value) -> Value {
        json!({
            "jsonrpc": "2.0",
            "method": "call",
            "params": params,
            "id": self.request_id.fetch_add(1, Ordering::Relaxed),
        })
    }

    /// Calls `model.method(*args, **kwargs)`, re-authenticating once when
    /// the session has expired.
    async fn call_kw(&self, model: &str, method: &str, args: Value, kwargs: Value) -> SyncResult<Value> {
        let fault = match self.call_once(model, method, &args, &kwargs).await? {
            Ok(result) => return Ok(result),
            Err(fault) => fault,
        };
        if !fault.is_session_expired() {
            return Err(SyncError::Erp(fault.detail()));
        }

        warn!(model, method, "ERP session expired, logging in again");
        self.invalidate_session().await;
        self.call_once(model, method, &args, &kwargs)
            .await?
            .map_err(|fault| SyncError::Erp(fault.detail()))
    }

    async fn call_once(
        &self,
        model: &str,
        method: &str,
        args: &Value,
        kwargs: &Value,
    ) -> SyncResult<Result<Value, RpcFault>> {
        let session = self.session_id().await?;
        let path = format!("/web/dataset/call_kw/{}/{}", model, method);
        debug!(model, method, "ERP call");

        let request = self
            .http
            .post(&path)
            .header(COOKIE, format!("{}={}", SESSION_COOKIE, session))
            .json(&self.envelope(json!({
                "model": model,
                "method": method,
                "args": args,
                "kwargs": kwargs,
            })));
        let body: RpcResponse = self.http.send_json(request).await?;

        Ok(match body.error {
            Some(fault) => Err(fault),
            None => Ok(body.result.unwrap_or(Value::Null)),
        })
    }
}

#[async_trait]
impl ErpGateway for ErpClient {
    async fn authenticate(&self) -> SyncResult<()> {
        self.session_id().await.map(|_| ())
    }

    async fn search(
        &self,
        model: &str,
        domain: &[DomainTerm],
        limit: Option<u32>,
    ) -> SyncResult<Vec<i64>> {
        let kwargs = match limit {
            Some(limit) => json!({ "limit": limit }),
            None => json!({}),
        };
        let result = self.call_kw(model, "search", json!([domain]), kwargs).await?;
        serde_json::from_value(result)
            .map_err(|e| SyncError::Schema(format!("search on {} returned {}", model, e)))
    }

    async fn create(&self, model: &str, values: &ErpValues) -> SyncResult<i64> {
        let result = self.call_kw(model, "create", json!([values]), json!({})).await?;
        // Newer servers answer a list of ids even for a single record.
        let id = match &result {
            Value::Array(ids) => ids.first().and_then(Value::as_i64),
            other => other.as_i64(),
        };
        id.ok_or_else(|| SyncError::Schema(format!("create on {} returned {}", model, result)))
    }

    async fn write(&self, model: &str, ids: &[i64], values: &ErpValues) -> SyncResult<bool> {
        let result = self.call_kw(model, "write", json!([ids, values]), json!({})).await?;
        result
            .as_bool()
            .ok_or_else(|| SyncError::Schema(format!("write on {} returned {}", model, result)))
    }

    async fn unlink(&self, model: &str, ids: &[i64]) -> SyncResult<bool> {
        let result = self.call_kw(model, "unlink", json!([ids]), json!({})).await?;
        result
            .as_bool()
            .ok_or_else(|| SyncError::Schema(format!("unlink on {} returned {}", model, result)))
    }
}

fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|cookie| cookie.split(';').next())
        .filter_map(|pair| pair.trim().strip_prefix("session_id="))
        .find(|id| !id.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::{Path, State},
        http::HeaderMap as AxumHeaders,
        response::{IntoResponse, Response},
        routing::post,
        Json, Router,
    };
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32};
    use std::sync::{Arc, Mutex};

    const MODEL: &str = "tupa.consumption";

    #[derive(Default)]
    struct FakeErp {
        logins: AtomicU32,
        expire_next: AtomicBool,
        next_id: AtomicI64,
        records: Mutex<BTreeMap<i64, Value>>,
    }

    fn rpc_result(id: &Value, result: Value) -> Response {
        Json(json!({"jsonrpc": "2.0", "id": id, "result": result})).into_response()
    }

    fn rpc_fault(id: &Value, code: i64, name: &str, message: &str) -> Response {
        Json(json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": code, "message": "Odoo Server Error", "data": {"name": name, "message": message}}
        }))
        .into_response()
    }

    async fn authenticate(State(erp): State<Arc<FakeErp>>, Json(body): Json<Value>) -> Response {
        if body["params"]["password"] != "secret" {
            return rpc_result(&body["id"], json!({"uid": false}));
        }
        let n = erp.logins.fetch_add(1, Ordering::SeqCst) + 1;
        (
            [(SET_COOKIE, format!("session_id=sess-{}; Path=/; HttpOnly", n))],
            Json(json!({"jsonrpc": "2.0", "id": body["id"], "result": {"uid": 2}})),
        )
            .into_response()
    }

    async fn call_kw(
        State(erp): State<Arc<FakeErp>>,
        Path((_model, method)): Path<(String, String)>,
        headers: AxumHeaders,
        Json(body): Json<Value>,
    ) -> Response {
        let id = &body["id"];
        let expected = format!("session_id=sess-{}", erp.logins.load(Ordering::SeqCst));
        let cookie = headers.get(COOKIE).and_then(|v| v.to_str().ok()).unwrap_or("");
        if cookie != expected || erp.expire_next.swap(false, Ordering::SeqCst) {
            return rpc_fault(id, 100, "odoo.http.SessionExpiredException", "Session expired");
        }

        let args = &body["params"]["args"];
        let mut records = erp.records.lock().unwrap();
        match method.as_str() {
            "search" => {
                let wanted = &args[0][0][2];
                let ids: Vec<i64> = records
                    .iter()
                    .filter(|(_, r)| &r["external_id"] == wanted)
                    .map(|(id, _)| *id)
                    .collect();
                rpc_result(id, json!(ids))
            }
            "create" => {
                let new_id = erp.next_id.fetch_add(1, Ordering::SeqCst) + 1;
                records.insert(new_id, args[0].clone());
                rpc_result(id, json!(new_id))
            }
            "write" => {
                let target = args[0][0].as_i64().unwrap();
                let record = records.get_mut(&target).unwrap();
                for (k, v) in args[1].as_object().unwrap() {
                    record[k] = v.clone();
                }
                rpc_result(id, json!(true))
            }
            "unlink" => {
                let targets: Vec<i64> = serde_json::from_value(args[0].clone()).unwrap();
                if targets.iter().any(|t| !records.contains_key(t)) {
                    return rpc_fault(id, 200, "odoo.exceptions.MissingError", "Record does not exist");
                }
                for t in targets {
                    records.remove(&t);
                }
                rpc_result(id, json!(true))
            }
            _ => rpc_fault(id, 200, "odoo.exceptions.UserError", "unknown method"),
        }
    }

    async fn serve(erp: Arc<FakeErp>) -> String {
        let router = Router::new()
            .route(AUTH_PATH, post(authenticate))
            .route("/web/dataset/call_kw/{model}/{method}", post(call_kw))
            .with_state(erp);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn settings(url: &str, password: &str) -> ErpSettings {
        ErpSettings {
            url: url.to_string(),
            database: "tupa".to_string(),
            username: "sync@tupa.test".to_string(),
            password: password.to_string(),
            ..ErpSettings::default()
        }
    }

    fn values(external_id: &str, total: f64) -> ErpValues {
        let mut values = ErpValues::new();
        values.insert("external_id".into(), external_id.into());
        values.insert("total_amount".into(), total.into());
        values
    }

    #[tokio::test]
    async fn test_crud_reuses_session() {
        let erp = Arc::new(FakeErp::default());
        let client = ErpClient::new(&settings(&serve(erp.clone()).await, "secret")).unwrap();

        client.authenticate().await.unwrap();
        let id = client.create(MODEL, &values("ext-1", 10.0)).await.unwrap();
        assert_eq!(id, 1);

        let found = client
            .search(MODEL, &[DomainTerm::eq("external_id", "ext-1")], Some(1))
            .await
            .unwrap();
        assert_eq!(found, vec![1]);

        assert!(client.write(MODEL, &[1], &values("ext-1", 12.5)).await.unwrap());
        assert_eq!(erp.records.lock().unwrap()[&1]["total_amount"], 12.5);

        assert!(client.unlink(MODEL, &[1]).await.unwrap());
        let found = client
            .search(MODEL, &[DomainTerm::eq("external_id", "ext-1")], None)
            .await
            .unwrap();
        assert!(found.is_empty());

        assert_eq!(erp.logins.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_session_relogs_once() {
        let erp = Arc::new(FakeErp::default());
        let client = ErpClient::new(&settings(&serve(erp.clone()).await, "secret")).unwrap();
        client.authenticate().await.unwrap();

        erp.expire_next.store(true, Ordering::SeqCst);
        let id = client.create(MODEL, &values("ext-2", 1.0)).await.unwrap();

        assert_eq!(id, 1);
        assert_eq!(erp.logins.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_bad_credentials_rejected() {
        let erp = Arc::new(FakeErp::default());
        let client = ErpClient::new(&settings(&serve(erp.clone()).await, "wrong")).unwrap();

        let err = client.authenticate().await.unwrap_err();
        assert!(matches!(err, SyncError::AuthRejected(ref m) if m.contains("sync@tupa.test")));
        assert!(client.session.read().await.is_none());
    }

    #[tokio::test]
    async fn test_fault_surfaces_as_erp_error() {
        let erp = Arc::new(FakeErp::default());
        let client = ErpClient::new(&settings(&serve(erp.clone()).await, "secret")).unwrap();

        let err = client.unlink(MODEL, &[42]).await.unwrap_err();
        assert!(matches!(err, SyncError::Erp(ref m) if m == "Record does not exist"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_session_cookie_parsing() {
        let mut headers = HeaderMap::new();
        headers.append(SET_COOKIE, "frontend_lang=en_US; Path=/".parse().unwrap());
        headers.append(SET_COOKIE, "session_id=abc123; Expires=Wed; HttpOnly".parse().unwrap());
        assert_eq!(session_cookie(&headers), Some("abc123".to_string()));

        assert_eq!(session_cookie(&HeaderMap::new()), None);
    }
}
