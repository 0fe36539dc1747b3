//! # Consumption Aggregator
//!
//! Validates normalized sales, rolls them into one daily consumption record
//! and persists it through a [`ConsumptionStore`].
//!
//! ## Write Path
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  sales[] ──► validate ──✗──► Err(Validation), nothing written          │
//! │                  │ ok                                                   │
//! │                  ▼                                                      │
//! │            aggregate (tupa_core::aggregation)                           │
//! │                  │                                                      │
//! │                  ▼                                                      │
//! │  select (client, date, location) ──found──► update: full replace,      │
//! │                  │                           updated_at bumped          │
//! │                  └──none──► insert                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Derived fields are always recomputed from the complete input set, so
//! aggregating the same sales twice yields the same record. Writes for
//! different days are independent; there is no transaction across them.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::orchestrator::{BatchContext, BatchOutcome, BatchProcessor};
use crate::store::ConsumptionStore;
use crate::{system_clock, Clock};
use tupa_core::aggregation;
use tupa_core::validation::{ensure_valid, validate_sales};
use tupa_core::{
    ConsumptionDraft, ConsumptionRecord, ConsumptionUpdate, DaySpan, NormalizedSale,
    ValidationReport,
};

/// Whether an upsert created or replaced the day's record.
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    Created(ConsumptionRecord),
    Updated(ConsumptionRecord),
}

impl UpsertOutcome {
    pub fn record(&self) -> &ConsumptionRecord {
        match self {
            UpsertOutcome::Created(record) | UpsertOutcome::Updated(record) => record,
        }
    }
}

#[derive(Clone)]
pub struct ConsumptionAggregator {
    store: Arc<dyn ConsumptionStore>,
    clock: Clock,
}

impl ConsumptionAggregator {
    pub fn new(store: Arc<dyn ConsumptionStore>) -> Self {
        ConsumptionAggregator {
            store,
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Classifies a batch. Callers must not persist when `is_valid` is false.
    pub fn validate(&self, sales: &[NormalizedSale]) -> ValidationReport {
        validate_sales(sales, (self.clock)())
    }

    /// Builds today's draft for a valid batch.
    pub fn aggregate(
        &self,
        client_id: &str,
        sales: &[NormalizedSale],
        location_id: Option<&str>,
    ) -> SyncResult<ConsumptionDraft> {
        let now = (self.clock)();
        self.check(client_id, sales, now)?;
        Ok(aggregation::aggregate(client_id, sales, location_id, now))
    }

    /// Inserts a new record built from `draft`.
    pub async fn store(&self, draft: ConsumptionDraft) -> SyncResult<ConsumptionRecord> {
        let record = ConsumptionRecord::new(draft, (self.clock)());
        self.store.insert(&record).await?;

        info!(
            client_id = %record.client_id(),
            date = %record.date(),
            external_id = %record.external_id(),
            "Consumption record created"
        );
        Ok(record)
    }

    /// Re-aggregates `sales` into record `id`, replacing its derived fields.
    ///
    /// ## Errors
    /// - `Validation` if the batch is invalid (nothing is written)
    /// - `Storage` if the record does not exist or the write fails
    pub async fn update(&self, id: &str, sales: &[NormalizedSale]) -> SyncResult<ConsumptionRecord> {
        let mut record = self
            .store
            .get_by_id(id)
            .await?
            .ok_or_else(|| SyncError::Storage(format!("ConsumptionRecord not found: {}", id)))?;

        let now = (self.clock)();
        self.check(record.client_id(), sales, now)?;

        let update = ConsumptionUpdate {
            totals: aggregation::summarize(sales, now),
            updated_at: now,
        };
        self.store.update(id, &update).await?;
        record.apply(update);

        debug!(id, external_id = %record.external_id(), "Consumption record replaced");
        Ok(record)
    }

    /// Creates or replaces the record for `(client, location, today)`.
    pub async fn upsert_for_day(
        &self,
        client_id: &str,
        sales: &[NormalizedSale],
        location_id: Option<&str>,
    ) -> SyncResult<UpsertOutcome> {
        let draft = self.aggregate(client_id, sales, location_id)?;

        let existing = self
            .store
            .select_by_client(client_id, Some(DaySpan::single(draft.date)), location_id)
            .await?
            .into_iter()
            .find(|r| r.location_id() == location_id);

        match existing {
            Some(mut record) => {
                // updated_at never moves behind created_at
                let update = ConsumptionUpdate {
                    totals: draft.totals,
                    updated_at: (self.clock)().max(record.created_at),
                };
                self.store.update(&record.id, &update).await?;
                record.apply(update);
                debug!(
                    client_id,
                    external_id = %record.external_id(),
                    sales = sales.len(),
                    "Consumption record replaced"
                );
                Ok(UpsertOutcome::Updated(record))
            }
            None => Ok(UpsertOutcome::Created(self.store(draft).await?)),
        }
    }

    fn check(&self, client_id: &str, sales: &[NormalizedSale], now: DateTime<Utc>) -> SyncResult<()> {
        let report = validate_sales(sales, now);
        for warning in &report.warnings {
            debug!(client_id, record_id = ?warning.record_id, message = %warning.message, "Sale warning");
        }
        if let Err(e) = ensure_valid(&report) {
            for issue in &report.errors {
                warn!(client_id, record_id = ?issue.record_id, message = %issue.message, "Invalid sale");
            }
            return Err(e.into());
        }
        Ok(())
    }
}

// =============================================================================
// Batch Processor
// =============================================================================

/// Per-batch step that keeps the day's consumption record current.
///
/// Invalid sales are dropped from the batch (counted as skipped). The record
/// is then rebuilt from every sale the run has accepted so far, so each batch
/// replaces the record rather than adding to it.
pub struct ConsumptionProcessor {
    aggregator: ConsumptionAggregator,
}

impl ConsumptionProcessor {
    pub fn new(aggregator: ConsumptionAggregator) -> Self {
        ConsumptionProcessor { aggregator }
    }
}

#[async_trait]
impl BatchProcessor for ConsumptionProcessor {
    async fn process(&self, ctx: BatchContext<'_>, batch: &[NormalizedSale]) -> SyncResult<BatchOutcome> {
        let mut accepted = Vec::with_capacity(batch.len());
        let mut skipped = 0;

        for sale in batch {
            let report = self.aggregator.validate(std::slice::from_ref(sale));
            if report.is_valid {
                accepted.push(sale.clone());
            } else {
                skipped += 1;
                let reasons: Vec<&str> = report.errors.iter().map(|e| e.message.as_str()).collect();
                warn!(
                    client_id = ctx.client_id,
                    batch = ctx.index,
                    sale_id = %sale.id,
                    reasons = %reasons.join("; "),
                    "Skipping invalid sale"
                );
            }
        }

        let mut outcome = BatchOutcome {
            skipped,
            ..BatchOutcome::default()
        };
        if accepted.is_empty() {
            return Ok(outcome);
        }

        let mut day: Vec<NormalizedSale> = ctx.accepted.to_vec();
        day.extend(accepted.iter().cloned());

        match self
            .aggregator
            .upsert_for_day(ctx.client_id, &day, ctx.location_id)
            .await?
        {
            UpsertOutcome::Created(_) => outcome.created = 1,
            UpsertOutcome::Updated(_) => outcome.updated = 1,
        }
        outcome.accepted = accepted;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::tests::{fixed_clock, registry_with, FakeProvider};
    use crate::orchestrator::{SyncOrchestrator, SyncRequest};
    use crate::store::testing::{at, invalid_sale, sale};
    use crate::store::MemoryConsumptionStore;
    use serde_json::Value;
    use std::time::Duration;
    use tupa_core::Money;
    use tupa_db::{Database, DbConfig};

    fn clock_at(t: DateTime<Utc>) -> Clock {
        Arc::new(move || t)
    }

    fn aggregator(store: Arc<dyn ConsumptionStore>) -> ConsumptionAggregator {
        ConsumptionAggregator::new(store).with_clock(fixed_clock())
    }

    #[test]
    fn test_aggregate_example() {
        let aggregator = aggregator(Arc::new(MemoryConsumptionStore::new()));
        let sales = vec![sale("a", 10_000, 2.0), sale("b", 5_000, 1.0)];

        let draft = aggregator.aggregate("c1", &sales, None).unwrap();
        assert_eq!(draft.totals.total_amount, Money::from_cents(15_000));
        assert_eq!(draft.totals.total_items, 3.0);
        assert_eq!(draft.totals.average_order_value, Money::from_cents(7_500));
        assert_eq!(draft.date, at(18).date_naive());
        assert_eq!(draft.external_id(), "tupa_consumption_c1_2024-03-10_main");
    }

    #[test]
    fn test_invalid_batch_blocks_aggregation() {
        let aggregator = aggregator(Arc::new(MemoryConsumptionStore::new()));
        let sales = vec![sale("a", 100, 1.0), invalid_sale("b")];

        let report = aggregator.validate(&sales);
        assert!(!report.is_valid);
        assert_eq!(report.records_valid, 1);

        assert!(matches!(
            aggregator.aggregate("c1", &sales, None),
            Err(SyncError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_replace() {
        let store = Arc::new(MemoryConsumptionStore::new());
        let sales = vec![sale("a", 300, 1.0), sale("b", 200, 2.0)];

        let first = ConsumptionAggregator::new(store.clone())
            .with_clock(clock_at(at(9)))
            .upsert_for_day("c1", &sales, Some("L1"))
            .await
            .unwrap();
        assert!(matches!(first, UpsertOutcome::Created(_)));

        let second = ConsumptionAggregator::new(store.clone())
            .with_clock(clock_at(at(17)))
            .upsert_for_day("c1", &sales, Some("L1"))
            .await
            .unwrap();
        let UpsertOutcome::Updated(record) = second else {
            panic!("expected the second upsert to update");
        };

        assert_eq!(store.len().await, 1);
        assert_eq!(record.id, first.record().id);
        assert_eq!(record.created_at, at(9));
        assert_eq!(record.updated_at, at(17));

        let mut before = first.record().totals().clone();
        let mut after = record.totals().clone();
        assert_eq!(after.metadata.sync_timestamp, at(17));
        before.metadata.sync_timestamp = at(0);
        after.metadata.sync_timestamp = at(0);
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_locations_are_separate_records() {
        let store = Arc::new(MemoryConsumptionStore::new());
        let aggregator = aggregator(store.clone());
        let sales = vec![sale("a", 300, 1.0)];

        aggregator.upsert_for_day("c1", &sales, None).await.unwrap();
        aggregator.upsert_for_day("c1", &sales, Some("L1")).await.unwrap();
        let again = aggregator.upsert_for_day("c1", &sales, None).await.unwrap();

        assert!(matches!(again, UpsertOutcome::Updated(ref r) if r.location_id().is_none()));
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_update_replaces_derived_fields() {
        let store = Arc::new(MemoryConsumptionStore::new());
        let aggregator = aggregator(store.clone());

        let draft = aggregator
            .aggregate("c1", &[sale("a", 300, 1.0), sale("b", 300, 1.0)], None)
            .unwrap();
        let record = aggregator.store(draft).await.unwrap();
        assert_eq!(record.totals().metadata.sales_count, 2);

        let updated = aggregator.update(&record.id, &[sale("c", 900, 3.0)]).await.unwrap();
        assert_eq!(updated.totals().total_amount, Money::from_cents(900));
        assert_eq!(updated.totals().metadata.sales_count, 1);

        let stored = store.get_by_id(&record.id).await.unwrap().unwrap();
        assert_eq!(stored, updated);
    }

    #[tokio::test]
    async fn test_update_errors() {
        let store = Arc::new(MemoryConsumptionStore::new());
        let aggregator = aggregator(store.clone());

        assert!(matches!(
            aggregator.update("missing", &[sale("a", 100, 1.0)]).await,
            Err(SyncError::Storage(_))
        ));

        let draft = aggregator.aggregate("c1", &[sale("a", 100, 1.0)], None).unwrap();
        let record = aggregator.store(draft).await.unwrap();
        assert!(matches!(
            aggregator.update(&record.id, &[invalid_sale("x")]).await,
            Err(SyncError::Validation(_))
        ));
        let stored = store.get_by_id(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.totals().total_amount, Money::from_cents(100));
    }

    #[tokio::test]
    async fn test_sqlite_backed_upsert() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let aggregator = aggregator(Arc::new(db.consumption()));
        let sales = vec![sale("a", 250, 1.0)];

        aggregator.upsert_for_day("c1", &sales, None).await.unwrap();
        let outcome = aggregator.upsert_for_day("c1", &sales, None).await.unwrap();

        assert!(matches!(outcome, UpsertOutcome::Updated(_)));
        assert_eq!(db.consumption().count_for_client("c1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_processor_through_orchestrator() {
        let store = Arc::new(MemoryConsumptionStore::new());
        let provider = Arc::new(FakeProvider {
            connected: true,
            sales: vec![
                sale("a", 100, 1.0),
                invalid_sale("b"),
                sale("c", 200, 2.0),
                sale("d", 300, 3.0),
            ],
            ..FakeProvider::default()
        });
        let processor = Arc::new(ConsumptionProcessor::new(aggregator(store.clone())));
        let orchestrator = SyncOrchestrator::new(registry_with(provider, 1000), processor)
            .with_clock(fixed_clock())
            .with_settings(crate::orchestrator::OrchestratorSettings {
                batch_delay: Duration::ZERO,
                ..Default::default()
            });

        let request = SyncRequest {
            client_id: "c1".to_string(),
            pos_type: "fake".to_string(),
            pos_config: Value::Null,
            location_id: Some("L1".to_string()),
            date_range: None,
            batch_size: Some(2),
        };
        let report = orchestrator.run(&request).await;

        assert!(report.success);
        assert_eq!(report.records_processed, 4);
        assert_eq!(report.records_created, 1);
        assert_eq!(report.records_updated, 1);
        assert_eq!(report.records_skipped, 1);

        let records = store.select_by_client("c1", None, Some("L1")).await.unwrap();
        assert_eq!(records.len(), 1);
        let totals = records[0].totals();
        assert_eq!(totals.metadata.sales_count, 3);
        assert_eq!(totals.total_amount, Money::from_cents(600));
        assert_eq!(totals.total_items, 6.0);
    }

    #[tokio::test]
    async fn test_processor_all_invalid_writes_nothing() {
        let store = Arc::new(MemoryConsumptionStore::new());
        let processor = ConsumptionProcessor::new(aggregator(store.clone()));
        let ctx = BatchContext {
            client_id: "c1",
            location_id: None,
            provider: "fake",
            index: 1,
            total: 1,
            accepted: &[],
        };

        let outcome = processor
            .process(ctx, &[invalid_sale("a"), invalid_sale("b")])
            .await
            .unwrap();
        assert_eq!(outcome.skipped, 2);
        assert_eq!(outcome.created, 0);
        assert!(store.is_empty().await);
    }
}
