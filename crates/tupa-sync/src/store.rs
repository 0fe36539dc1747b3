//! # Persistence Seams
//!
//! The engine talks to storage through two small traits so runs can be
//! driven against SQLite in production and memory in tests.
//!
//! ```text
//! ConsumptionAggregator ──► dyn ConsumptionStore ──┬── ConsumptionRepository (SQLite)
//!                                                  └── MemoryConsumptionStore
//! SyncOrchestrator      ──► dyn SyncLogStore     ───── SyncLogRepository (SQLite)
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::{SyncError, SyncResult};
use tupa_core::{ConsumptionRecord, ConsumptionUpdate, DaySpan, SyncReport};
use tupa_db::{ConsumptionRepository, SyncLogRepository};

/// CRUD over daily consumption records.
#[async_trait]
pub trait ConsumptionStore: Send + Sync {
    /// Persists a new record and returns its id.
    async fn insert(&self, record: &ConsumptionRecord) -> SyncResult<String>;

    /// A client's records, oldest date first, optionally narrowed by day span
    /// and location.
    async fn select_by_client(
        &self,
        client_id: &str,
        span: Option<DaySpan>,
        location_id: Option<&str>,
    ) -> SyncResult<Vec<ConsumptionRecord>>;

    /// Replaces the derived fields of an existing record.
    async fn update(&self, id: &str, update: &ConsumptionUpdate) -> SyncResult<()>;

    async fn get_by_id(&self, id: &str) -> SyncResult<Option<ConsumptionRecord>>;
}

/// Sink for run reports, and source of the last successful window.
#[async_trait]
pub trait SyncLogStore: Send + Sync {
    async fn record(&self, report: &SyncReport) -> SyncResult<()>;

    async fn last_successful_sync(
        &self,
        client_id: &str,
        provider: &str,
    ) -> SyncResult<Option<DateTime<Utc>>>;
}

// =============================================================================
// SQLite
// =============================================================================

#[async_trait]
impl ConsumptionStore for ConsumptionRepository {
    async fn insert(&self, record: &ConsumptionRecord) -> SyncResult<String> {
        Ok(ConsumptionRepository::insert(self, record).await?)
    }

    async fn select_by_client(
        &self,
        client_id: &str,
        span: Option<DaySpan>,
        location_id: Option<&str>,
    ) -> SyncResult<Vec<ConsumptionRecord>> {
        Ok(ConsumptionRepository::select_by_client(self, client_id, span, location_id).await?)
    }

    async fn update(&self, id: &str, update: &ConsumptionUpdate) -> SyncResult<()> {
        Ok(ConsumptionRepository::update(self, id, update).await?)
    }

    async fn get_by_id(&self, id: &str) -> SyncResult<Option<ConsumptionRecord>> {
        Ok(ConsumptionRepository::get_by_id(self, id).await?)
    }
}

#[async_trait]
impl SyncLogStore for SyncLogRepository {
    async fn record(&self, report: &SyncReport) -> SyncResult<()> {
        SyncLogRepository::record(self, report).await?;
        Ok(())
    }

    async fn last_successful_sync(
        &self,
        client_id: &str,
        provider: &str,
    ) -> SyncResult<Option<DateTime<Utc>>> {
        Ok(SyncLogRepository::last_successful_sync(self, client_id, provider).await?)
    }
}

// =============================================================================
// Memory
// =============================================================================

/// Vec-backed store with the same semantics as the SQLite repository.
#[derive(Debug, Default)]
pub struct MemoryConsumptionStore {
    records: RwLock<Vec<ConsumptionRecord>>,
}

impl MemoryConsumptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl ConsumptionStore for MemoryConsumptionStore {
    async fn insert(&self, record: &ConsumptionRecord) -> SyncResult<String> {
        let mut records = self.records.write().await;
        let duplicate = records.iter().any(|r| {
            r.id == record.id
                || (r.client_id() == record.client_id()
                    && r.location_id() == record.location_id()
                    && r.date() == record.date())
        });
        if duplicate {
            return Err(SyncError::Storage(format!(
                "consumption record '{}' already exists",
                record.external_id()
            )));
        }
        records.push(record.clone());
        Ok(record.id.clone())
    }

    async fn select_by_client(
        &self,
        client_id: &str,
        span: Option<DaySpan>,
        location_id: Option<&str>,
    ) -> SyncResult<Vec<ConsumptionRecord>> {
        let records = self.records.read().await;
        let mut selected: Vec<ConsumptionRecord> = records
            .iter()
            .filter(|r| r.client_id() == client_id)
            .filter(|r| span.map_or(true, |s| s.contains(r.date())))
            .filter(|r| location_id.map_or(true, |l| r.location_id() == Some(l)))
            .cloned()
            .collect();
        selected.sort_by(|a, b| {
            a.date()
                .cmp(&b.date())
                .then_with(|| a.location_id().unwrap_or("").cmp(b.location_id().unwrap_or("")))
        });
        Ok(selected)
    }

    async fn update(&self, id: &str, update: &ConsumptionUpdate) -> SyncResult<()> {
        let mut records = self.records.write().await;
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| SyncError::Storage(format!("ConsumptionRecord not found: {}", id)))?;
        record.apply(update.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> SyncResult<Option<ConsumptionRecord>> {
        Ok(self.records.read().await.iter().find(|r| r.id == id).cloned())
    }
}
