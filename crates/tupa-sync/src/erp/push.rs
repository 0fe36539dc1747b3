//! # ERP Push Sync
//!
//! ## Per-Record Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  ConsumptionRecord                                                      │
//! │     │ map + validate ──✗──► skipped (no network call)                   │
//! │     ▼                                                                   │
//! │  search external_id (when deduplication is on)                          │
//! │     │                                                                   │
//! │     ├── found ────► write(id, values)        ─┐                         │
//! │     └── missing ──► create(values + draft)   ─┴─► linear retry,         │
//! │                                                   exhausted → skipped   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Records go out in chunks of `batch_size` with `batch_delay` between
//! chunks. A skipped record never stops the push; only a failed login makes
//! the whole report unsuccessful.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::mapping::{self, STATE_PROCESSED, SYNC_SOURCE, TIMESTAMP_FORMAT};
use super::{DomainTerm, ErpGateway};
use crate::config::ErpSettings;
use crate::error::{SyncError, SyncResult};
use crate::retry::{retry_async, LinearBackoff};
use crate::store::ConsumptionStore;
use crate::{system_clock, Clock};
use tupa_core::{ConsumptionRecord, DaySpan, PushReport};

#[derive(Debug, Clone)]
pub struct PushSettings {
    pub model: String,
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    pub deduplication: bool,
}

impl From<&ErpSettings> for PushSettings {
    fn from(settings: &ErpSettings) -> Self {
        PushSettings {
            model: settings.model.clone(),
            batch_size: settings.batch_size.max(1),
            batch_delay: settings.batch_delay(),
            retry_attempts: settings.retry_attempts,
            retry_delay: settings.retry_delay(),
            deduplication: settings.deduplication,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PushAction {
    Created(i64),
    Updated(i64),
}

pub struct PushSyncService {
    gateway: Arc<dyn ErpGateway>,
    settings: PushSettings,
    clock: Clock,
}

impl PushSyncService {
    pub fn new(gateway: Arc<dyn ErpGateway>, settings: PushSettings) -> Self {
        PushSyncService {
            gateway,
            settings,
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Pushes `records` and reports what happened to each of them.
    pub async fn push_records(&self, records: &[ConsumptionRecord]) -> PushReport {
        let started = Instant::now();
        let mut report = PushReport::default();

        if let Err(err) = self.gateway.authenticate().await {
            error!(error = %err, "ERP authentication failed, nothing pushed");
            report.errors.push(format!("authentication: {}", err));
            report.duration_ms = started.elapsed().as_millis() as u64;
            return report;
        }

        let pushed_at = (self.clock)();
        for (index, chunk) in records.chunks(self.settings.batch_size.max(1)).enumerate() {
            if index > 0 && !self.settings.batch_delay.is_zero() {
                tokio::time::sleep(self.settings.batch_delay).await;
            }

            for record in chunk {
                report.records_processed += 1;
                let external_id = record.external_id();
                match self.push_one(record, &external_id, pushed_at).await {
                    Ok(PushAction::Created(id)) => {
                        debug!(external_id = %external_id, erp_id = id, "Created ERP record");
                        report.records_created += 1;
                    }
                    Ok(PushAction::Updated(id)) => {
                        debug!(external_id = %external_id, erp_id = id, "Updated ERP record");
                        report.records_updated += 1;
                    }
                    Err(reason) => {
                        warn!(external_id = %external_id, reason = %reason, "Skipped ERP record");
                        report.records_skipped += 1;
                        report.errors.push(format!("{}: {}", external_id, reason));
                    }
                }
            }
        }

        report.success = true;
        report.last_sync_at = Some(pushed_at);
        report.duration_ms = started.elapsed().as_millis() as u64;

        info!(
            processed = report.records_processed,
            created = report.records_created,
            updated = report.records_updated,
            skipped = report.records_skipped,
            duration_ms = report.duration_ms,
            "ERP push finished"
        );
        report
    }

    /// Pushes a client's stored records, optionally narrowed to `span`.
    pub async fn push_for_client(
        &self,
        store: &dyn ConsumptionStore,
        client_id: &str,
        span: Option<DaySpan>,
    ) -> SyncResult<PushReport> {
        let records = store.select_by_client(client_id, span, None).await?;
        info!(client_id, records = records.len(), "Pushing stored consumption records");
        Ok(self.push_records(&records).await)
    }

    /// Deletes this engine's `processed` ERP records last synced more than
    /// `days_old` days ago. Returns how many were deleted.
    pub async fn cleanup_old_records(&self, days_old: u32) -> SyncResult<usize> {
        self.gateway.authenticate().await?;

        let cutoff = (self.clock)() - chrono::Duration::days(i64::from(days_old));
        let domain = [
            DomainTerm::eq("state", STATE_PROCESSED),
            DomainTerm::eq("sync_source", SYNC_SOURCE),
            DomainTerm::new("sync_timestamp", "<", cutoff.format(TIMESTAMP_FORMAT).to_string()),
        ];
        let ids = self.gateway.search(&self.settings.model, &domain, None).await?;
        if ids.is_empty() {
            info!(days_old, "No ERP records old enough to clean up");
            return Ok(0);
        }

        if !self.gateway.unlink(&self.settings.model, &ids).await? {
            return Err(SyncError::Erp(format!(
                "ERP refused to delete {} records",
                ids.len()
            )));
        }
        info!(days_old, deleted = ids.len(), "Cleaned up processed ERP records");
        Ok(ids.len())
    }

    async fn push_one(
        &self,
        record: &ConsumptionRecord,
        external_id: &str,
        pushed_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<PushAction, String> {
        let values = mapping::to_erp_values(record, pushed_at).map_err(|e| e.to_string())?;
        mapping::validate(&values)?;

        let existing = if self.settings.deduplication {
            self.find_existing(external_id)
                .await
                .map_err(|e| format!("search failed: {}", e))?
        } else {
            None
        };

        let model = self.settings.model.as_str();
        let mut policy = LinearBackoff::new(self.settings.retry_delay, self.settings.retry_attempts);

        match existing {
            Some(id) => {
                let ids = [id];
                let written = retry_async(&mut policy, "erp.write", |_| {
                    self.gateway.write(model, &ids, &values)
                })
                .await
                .map_err(|e| e.to_string())?;
                if !written {
                    return Err(format!("ERP refused to update record {}", id));
                }
                Ok(PushAction::Updated(id))
            }
            None => {
                let create = mapping::creation_values(&values);
                let id = retry_async(&mut policy, "erp.create", |_| {
                    self.gateway.create(model, &create)
                })
                .await
                .map_err(|e| e.to_string())?;
                Ok(PushAction::Created(id))
            }
        }
    }

    async fn find_existing(&self, external_id: &str) -> SyncResult<Option<i64>> {
        let ids = self
            .gateway
            .search(
                &self.settings.model,
                &[DomainTerm::eq("external_id", external_id)],
                Some(1),
            )
            .await?;
        Ok(ids.first().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::erp::ErpValues;
    use crate::retry::transient;
    use crate::store::testing::sale;
    use crate::store::MemoryConsumptionStore;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::Value;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
    use std::sync::Mutex;
    use tupa_core::aggregation::aggregate;
    use tupa_core::Money;

    #[derive(Default)]
    struct FakeGateway {
        records: Mutex<BTreeMap<i64, ErpValues>>,
        next_id: AtomicI64,
        reject_auth: AtomicBool,
        /// Upcoming create calls that fail with a transport error.
        failing_creates: AtomicU32,
        /// JSON-RPC fault every create answers with.
        create_fault: Mutex<Option<String>>,
        /// JSON-RPC fault every write answers with.
        write_fault: Mutex<Option<String>>,
        /// Writes answer `false`.
        refuse_writes: AtomicBool,
        creates: AtomicU32,
        writes: AtomicU32,
        searches: AtomicU32,
    }

    impl FakeGateway {
        fn insert(&self, values: ErpValues) -> i64 {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            self.records.lock().unwrap().insert(id, values);
            id
        }

        fn field(&self, id: i64, field: &str) -> Value {
            self.records.lock().unwrap()[&id][field].clone()
        }

        fn len(&self) -> usize {
            self.records.lock().unwrap().len()
        }
    }

    fn matches(record: &ErpValues, term: &DomainTerm) -> bool {
        let Some(actual) = record.get(&term.field) else {
            return false;
        };
        match term.operator.as_str() {
            "=" => actual == &term.value,
            "<" => match (actual.as_str(), term.value.as_str()) {
                (Some(a), Some(b)) => a < b,
                _ => false,
            },
            other => panic!("unsupported operator {}", other),
        }
    }

    #[async_trait]
    impl ErpGateway for FakeGateway {
        async fn authenticate(&self) -> SyncResult<()> {
            if self.reject_auth.load(Ordering::SeqCst) {
                return Err(SyncError::AuthRejected("bad password".into()));
            }
            Ok(())
        }

        async fn search(
            &self,
            _model: &str,
            domain: &[DomainTerm],
            limit: Option<u32>,
        ) -> SyncResult<Vec<i64>> {
            self.searches.fetch_add(1, Ordering::SeqCst);
            let records = self.records.lock().unwrap();
            let ids = records
                .iter()
                .filter(|(_, r)| domain.iter().all(|t| matches(r, t)))
                .map(|(id, _)| *id)
                .take(limit.map_or(usize::MAX, |l| l as usize))
                .collect();
            Ok(ids)
        }

        async fn create(&self, _model: &str, values: &ErpValues) -> SyncResult<i64> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            if let Some(fault) = self.create_fault.lock().unwrap().clone() {
                return Err(SyncError::Erp(fault));
            }
            let failing = self.failing_creates.load(Ordering::SeqCst);
            if failing > 0 {
                self.failing_creates.store(failing - 1, Ordering::SeqCst);
                return Err(transient("ERP unavailable"));
            }
            Ok(self.insert(values.clone()))
        }

        async fn write(&self, _model: &str, ids: &[i64], values: &ErpValues) -> SyncResult<bool> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            if let Some(fault) = self.write_fault.lock().unwrap().clone() {
                return Err(SyncError::Erp(fault));
            }
            if self.refuse_writes.load(Ordering::SeqCst) {
                return Ok(false);
            }
            let mut records = self.records.lock().unwrap();
            for id in ids {
                let Some(record) = records.get_mut(id) else {
                    return Ok(false);
                };
                for (k, v) in values {
                    record.insert(k.clone(), v.clone());
                }
            }
            Ok(true)
        }

        async fn unlink(&self, _model: &str, ids: &[i64]) -> SyncResult<bool> {
            let mut records = self.records.lock().unwrap();
            for id in ids {
                records.remove(id);
            }
            Ok(true)
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 20, 12, 0, 0).unwrap()
    }

    fn record(client: &str, day: u32, cents: i64) -> ConsumptionRecord {
        let at = Utc.with_ymd_and_hms(2024, 3, day, 18, 0, 0).unwrap();
        let draft = aggregate(client, &[sale("s1", cents, 1.0)], None, at);
        ConsumptionRecord::new(draft, at)
    }

    fn service(gateway: Arc<FakeGateway>, tweak: impl FnOnce(&mut PushSettings)) -> PushSyncService {
        let mut settings = PushSettings::from(&ErpSettings::default());
        tweak(&mut settings);
        PushSyncService::new(gateway, settings).with_clock(Arc::new(now))
    }

    #[tokio::test]
    async fn test_second_push_updates_without_touching_state() {
        let gateway = Arc::new(FakeGateway::default());
        let push = service(gateway.clone(), |_| {});

        let report = push.push_records(&[record("c1", 10, 500)]).await;
        assert!(report.success);
        assert_eq!(report.records_created, 1);
        assert_eq!(gateway.field(1, "state"), "draft");

        gateway
            .records
            .lock()
            .unwrap()
            .get_mut(&1)
            .unwrap()
            .insert("state".into(), "confirmed".into());

        let report = push.push_records(&[record("c1", 10, 900)]).await;
        assert_eq!(report.records_created, 0);
        assert_eq!(report.records_updated, 1);
        assert_eq!(gateway.len(), 1);
        assert_eq!(gateway.field(1, "total_amount"), 9.0);
        assert_eq!(gateway.field(1, "state"), "confirmed");
        assert_eq!(report.last_sync_at, Some(now()));
    }

    #[tokio::test]
    async fn test_without_dedup_every_push_creates() {
        let gateway = Arc::new(FakeGateway::default());
        let push = service(gateway.clone(), |s| s.deduplication = false);

        push.push_records(&[record("c1", 10, 500)]).await;
        let report = push.push_records(&[record("c1", 10, 500)]).await;

        assert_eq!(report.records_created, 1);
        assert_eq!(gateway.len(), 2);
        assert_eq!(gateway.searches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_retries_are_bounded() {
        let gateway = Arc::new(FakeGateway::default());
        gateway.failing_creates.store(u32::MAX, Ordering::SeqCst);
        let push = service(gateway.clone(), |_| {});

        let started = Instant::now();
        let report = push.push_records(&[record("c1", 10, 500)]).await;

        assert!(report.success);
        assert_eq!(gateway.creates.load(Ordering::SeqCst), 3);
        assert_eq!(report.records_skipped, 1);
        assert!(report.errors[0].starts_with("tupa_consumption_c1_2024-03-10_main: "));
        assert!(report.errors[0].contains("ERP unavailable"));
        // 1s after the first try, 2s after the second.
        assert!(started.elapsed() >= Duration::from_millis(3000));
        assert!(started.elapsed() < Duration::from_millis(3500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_create_failure_recovers() {
        let gateway = Arc::new(FakeGateway::default());
        gateway.failing_creates.store(1, Ordering::SeqCst);
        let push = service(gateway.clone(), |_| {});

        let report = push.push_records(&[record("c1", 10, 500)]).await;

        assert_eq!(report.records_created, 1);
        assert_eq!(report.records_skipped, 0);
        assert_eq!(gateway.creates.load(Ordering::SeqCst), 2);
    }

    const SERIALIZATION_FAULT: &str = "could not serialize access due to concurrent update";

    #[tokio::test(start_paused = true)]
    async fn test_create_fault_uses_every_attempt() {
        let gateway = Arc::new(FakeGateway::default());
        *gateway.create_fault.lock().unwrap() = Some(SERIALIZATION_FAULT.to_string());
        let push = service(gateway.clone(), |_| {});

        let report = push.push_records(&[record("c1", 10, 500)]).await;

        assert!(report.success);
        assert_eq!(gateway.creates.load(Ordering::SeqCst), 3);
        assert_eq!(report.records_skipped, 1);
        assert_eq!(report.records_created, 0);
        assert_eq!(
            report.errors,
            vec![format!(
                "tupa_consumption_c1_2024-03-10_main: ERP error: {}",
                SERIALIZATION_FAULT
            )]
        );
        assert_eq!(gateway.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_fault_uses_every_attempt() {
        let gateway = Arc::new(FakeGateway::default());
        let push = service(gateway.clone(), |_| {});
        push.push_records(&[record("c1", 10, 500)]).await;
        *gateway.write_fault.lock().unwrap() = Some(SERIALIZATION_FAULT.to_string());

        let started = Instant::now();
        let report = push.push_records(&[record("c1", 10, 900)]).await;

        assert!(report.success);
        assert_eq!(gateway.writes.load(Ordering::SeqCst), 3);
        assert_eq!(gateway.creates.load(Ordering::SeqCst), 1);
        assert_eq!(report.records_skipped, 1);
        assert_eq!(report.records_updated, 0);
        assert_eq!(
            report.errors,
            vec![format!(
                "tupa_consumption_c1_2024-03-10_main: ERP error: {}",
                SERIALIZATION_FAULT
            )]
        );
        assert_eq!(started.elapsed(), Duration::from_millis(3000));
        assert_eq!(gateway.field(1, "total_amount"), 5.0);
    }

    #[tokio::test]
    async fn test_refused_write_is_skipped() {
        let gateway = Arc::new(FakeGateway::default());
        let push = service(gateway.clone(), |_| {});
        push.push_records(&[record("c1", 10, 500)]).await;
        gateway.refuse_writes.store(true, Ordering::SeqCst);

        let report = push.push_records(&[record("c1", 10, 900), record("c1", 11, 300)]).await;

        assert!(report.success);
        assert_eq!(gateway.writes.load(Ordering::SeqCst), 1);
        assert_eq!(report.records_skipped, 1);
        assert_eq!(report.records_created, 1);
        assert_eq!(
            report.errors,
            vec!["tupa_consumption_c1_2024-03-10_main: ERP refused to update record 1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_invalid_record_skipped_before_network() {
        let gateway = Arc::new(FakeGateway::default());
        let push = service(gateway.clone(), |_| {});

        let mut refunds = record("c1", 10, 500);
        refunds.draft.totals.total_amount = Money::from_cents(-500);
        let report = push.push_records(&[refunds, record("c1", 11, 300)]).await;

        assert!(report.success);
        assert_eq!(report.records_processed, 2);
        assert_eq!(report.records_skipped, 1);
        assert_eq!(report.records_created, 1);
        assert!(report.errors[0].contains("total_amount is negative"));
        assert_eq!(gateway.searches.load(Ordering::SeqCst), 1);
        assert_eq!(gateway.creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_login_fails_the_push() {
        let gateway = Arc::new(FakeGateway::default());
        gateway.reject_auth.store(true, Ordering::SeqCst);
        let push = service(gateway.clone(), |_| {});

        let report = push.push_records(&[record("c1", 10, 500)]).await;

        assert!(!report.success);
        assert_eq!(report.records_processed, 0);
        assert!(report.errors[0].starts_with("authentication: "));
        assert_eq!(report.last_sync_at, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunks_are_paced() {
        let gateway = Arc::new(FakeGateway::default());
        let push = service(gateway.clone(), |s| s.batch_size = 2);

        let records: Vec<_> = (10..15).map(|day| record("c1", day, 100)).collect();
        let started = Instant::now();
        let report = push.push_records(&records).await;

        assert_eq!(report.records_created, 5);
        // Three chunks, two pauses of 500ms.
        assert!(started.elapsed() >= Duration::from_millis(1000));
        assert!(started.elapsed() < Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn test_cleanup_only_removes_old_processed_records() {
        let gateway = Arc::new(FakeGateway::default());
        let push = service(gateway.clone(), |_| {});

        let erp_record = |state: &str, synced: &str, source: &str| {
            let mut values = ErpValues::new();
            values.insert("state".into(), state.into());
            values.insert("sync_timestamp".into(), synced.into());
            values.insert("sync_source".into(), source.into());
            values
        };
        let old_processed = gateway.insert(erp_record("processed", "2024-01-05 10:00:00", "tupa"));
        gateway.insert(erp_record("processed", "2024-03-15 10:00:00", "tupa"));
        gateway.insert(erp_record("draft", "2024-01-05 10:00:00", "tupa"));
        gateway.insert(erp_record("confirmed", "2024-01-05 10:00:00", "tupa"));
        gateway.insert(erp_record("processed", "2024-01-05 10:00:00", "manual"));

        let deleted = push.cleanup_old_records(30).await.unwrap();

        assert_eq!(deleted, 1);
        assert_eq!(gateway.len(), 4);
        assert!(!gateway.records.lock().unwrap().contains_key(&old_processed));

        assert_eq!(push.cleanup_old_records(30).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_push_for_client_reads_the_store() {
        let gateway = Arc::new(FakeGateway::default());
        let push = service(gateway.clone(), |_| {});

        let store = MemoryConsumptionStore::new();
        store.insert(&record("c1", 10, 500)).await.unwrap();
        store.insert(&record("c1", 11, 700)).await.unwrap();
        store.insert(&record("c2", 10, 900)).await.unwrap();

        let span = DaySpan::single(chrono::NaiveDate::from_ymd_opt(2024, 3, 11).unwrap());
        let report = push.push_for_client(&store, "c1", Some(span)).await.unwrap();
        assert_eq!(report.records_created, 1);

        let report = push.push_for_client(&store, "c1", None).await.unwrap();
        assert_eq!(report.records_created, 1);
        assert_eq!(report.records_updated, 1);
        assert_eq!(gateway.len(), 2);
    }
}
