//! # ERP Integration
//!
//! Pushes daily consumption records into the ERP, which owns them from then
//! on.
//!
//! ## Module Structure
//! ```text
//! erp/
//! ├── mod.rs      ◄── ErpGateway trait, DomainTerm
//! ├── client.rs   ◄── JSON-RPC client with a cached session cookie
//! ├── mapping.rs  ◄── ConsumptionRecord → ERP values, pre-flight checks
//! └── push.rs     ◄── PushSyncService (dedup, retry, pacing, cleanup)
//! ```
//!
//! ## Record Lifecycle (ERP side)
//! ```text
//! create ──► draft ──► confirmed ──► processed ──► (cleanup after N days)
//!              ▲
//!              └── the engine only sets `state` on create
//! ```

pub mod client;
pub mod mapping;
pub mod push;

pub use client::ErpClient;
pub use push::{PushSettings, PushSyncService};

use async_trait::async_trait;
use serde::ser::{Serialize, SerializeTuple, Serializer};
use serde_json::Value;

use crate::error::SyncResult;

/// Field values of an ERP record.
pub type ErpValues = serde_json::Map<String, Value>;

/// One `(field, operator, value)` filter of a search domain.
///
/// Serializes as a three-element JSON array, the shape the ERP expects.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainTerm {
    pub field: String,
    pub operator: String,
    pub value: Value,
}

impl DomainTerm {
    pub fn new(field: &str, operator: &str, value: impl Into<Value>) -> Self {
        DomainTerm {
            field: field.to_string(),
            operator: operator.to_string(),
            value: value.into(),
        }
    }

    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self::new(field, "=", value)
    }
}

impl Serialize for DomainTerm {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(3)?;
        tuple.serialize_element(&self.field)?;
        tuple.serialize_element(&self.operator)?;
        tuple.serialize_element(&self.value)?;
        tuple.end()
    }
}

/// The ERP operations the push service needs.
///
/// Implementations authenticate lazily and cache their session, so
/// `authenticate` doubles as a connectivity probe.
#[async_trait]
pub trait ErpGateway: Send + Sync {
    async fn authenticate(&self) -> SyncResult<()>;

    /// Ids of the records in `model` matching every term of `domain`.
    async fn search(
        &self,
        model: &str,
        domain: &[DomainTerm],
        limit: Option<u32>,
    ) -> SyncResult<Vec<i64>>;

    async fn create(&self, model: &str, values: &ErpValues) -> SyncResult<i64>;

    async fn write(&self, model: &str, ids: &[i64], values: &ErpValues) -> SyncResult<bool>;

    async fn unlink(&self, model: &str, ids: &[i64]) -> SyncResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_domain_term_serializes_as_triple() {
        let domain = vec![
            DomainTerm::eq("external_id", "tupa_consumption_c1_2024-03-10_main"),
            DomainTerm::new("sync_timestamp", "<", "2024-02-09 00:00:00"),
        ];
        assert_eq!(
            serde_json::to_value(&domain).unwrap(),
            json!([
                ["external_id", "=", "tupa_consumption_c1_2024-03-10_main"],
                ["sync_timestamp", "<", "2024-02-09 00:00:00"]
            ])
        );
    }
}
