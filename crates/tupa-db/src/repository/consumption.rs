//! # Consumption Repository
//!
//! Persistence of daily consumption records.
//!
//! ## Storage Shape
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  ConsumptionRecord                      consumption_records             │
//! │  ─────────────────                      ───────────────────             │
//! │  total_amount (Money)          ───►     total_amount_cents  INTEGER     │
//! │  top_categories (Vec)          ───►     top_categories      TEXT (JSON) │
//! │  payment_methods (BTreeMap)    ───►     payment_methods     TEXT (JSON) │
//! │  metadata.peak_hour (Option)   ───►     peak_hour           INTEGER NULL│
//! │                                                                         │
//! │  UNIQUE (client_id, IFNULL(location_id, ''), date)                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Writes are single statements; nothing here spans records in a transaction.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use tupa_core::{
    ConsumptionDraft, ConsumptionMetadata, ConsumptionRecord, ConsumptionTotals,
    ConsumptionUpdate, DaySpan, Money,
};

const SELECT_COLUMNS: &str = r#"
    SELECT
        id, client_id, location_id, date,
        total_amount_cents, total_items, average_order_value_cents,
        top_categories, payment_methods,
        provider, sync_timestamp, sales_count, peak_hour, customer_count,
        created_at, updated_at
    FROM consumption_records
"#;

/// Raw row as stored in SQLite.
#[derive(Debug, sqlx::FromRow)]
struct ConsumptionRow {
    id: String,
    client_id: String,
    location_id: Option<String>,
    date: NaiveDate,
    total_amount_cents: i64,
    total_items: f64,
    average_order_value_cents: i64,
    top_categories: String,
    payment_methods: String,
    provider: String,
    sync_timestamp: DateTime<Utc>,
    sales_count: i64,
    peak_hour: Option<i64>,
    customer_count: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ConsumptionRow> for ConsumptionRecord {
    type Error = DbError;

    fn try_from(row: ConsumptionRow) -> DbResult<Self> {
        Ok(ConsumptionRecord {
            id: row.id,
            draft: ConsumptionDraft {
                client_id: row.client_id,
                location_id: row.location_id,
                date: row.date,
                totals: ConsumptionTotals {
                    total_amount: Money::from_cents(row.total_amount_cents),
                    total_items: row.total_items,
                    average_order_value: Money::from_cents(row.average_order_value_cents),
                    top_categories: serde_json::from_str(&row.top_categories)?,
                    payment_methods: serde_json::from_str(&row.payment_methods)?,
                    metadata: ConsumptionMetadata {
                        provider: row.provider,
                        sync_timestamp: row.sync_timestamp,
                        sales_count: row.sales_count.max(0) as usize,
                        peak_hour: row.peak_hour.map(|h| h.clamp(0, 23) as u32),
                        customer_count: row.customer_count.max(0) as usize,
                    },
                },
            },
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Repository for consumption records.
#[derive(Debug, Clone)]
pub struct ConsumptionRepository {
    pool: SqlitePool,
}

impl ConsumptionRepository {
    /// Creates a new ConsumptionRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ConsumptionRepository { pool }
    }

    /// Inserts a new record and returns its id.
    ///
    /// ## Errors
    /// `DbError::UniqueViolation` if the (client, location, date) key exists.
    pub async fn insert(&self, record: &ConsumptionRecord) -> DbResult<String> {
        let totals = record.totals();
        let meta = &totals.metadata;

        debug!(
            client_id = %record.client_id(),
            date = %record.date(),
            "Inserting consumption record"
        );

        sqlx::query(
            r#"
            INSERT INTO consumption_records (
                id, client_id, location_id, date,
                total_amount_cents, total_items, average_order_value_cents,
                top_categories, payment_methods,
                provider, sync_timestamp, sales_count, peak_hour, customer_count,
                created_at, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4,
                ?5, ?6, ?7,
                ?8, ?9,
                ?10, ?11, ?12, ?13, ?14,
                ?15, ?16
            )
            "#,
        )
        .bind(&record.id)
        .bind(record.client_id())
        .bind(record.location_id())
        .bind(record.date())
        .bind(totals.total_amount.cents())
        .bind(totals.total_items)
        .bind(totals.average_order_value.cents())
        .bind(serde_json::to_string(&totals.top_categories)?)
        .bind(serde_json::to_string(&totals.payment_methods)?)
        .bind(&meta.provider)
        .bind(meta.sync_timestamp)
        .bind(meta.sales_count as i64)
        .bind(meta.peak_hour.map(i64::from))
        .bind(meta.customer_count as i64)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(record.id.clone())
    }

    /// Gets a record by id.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<ConsumptionRecord>> {
        let sql = format!("{} WHERE id = ?1", SELECT_COLUMNS);
        let row: Option<ConsumptionRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(ConsumptionRecord::try_from).transpose()
    }

    /// Lists a client's records, oldest date first.
    ///
    /// ## Arguments
    /// * `span` - Only dates inside this span (inclusive), when given
    /// * `location_id` - Only this location, when given
    pub async fn select_by_client(
        &self,
        client_id: &str,
        span: Option<DaySpan>,
        location_id: Option<&str>,
    ) -> DbResult<Vec<ConsumptionRecord>> {
        let sql = format!(
            r#"{}
            WHERE client_id = ?1
              AND (?2 IS NULL OR date >= ?2)
              AND (?3 IS NULL OR date <= ?3)
              AND (?4 IS NULL OR location_id = ?4)
            ORDER BY date ASC, IFNULL(location_id, '') ASC
            "#,
            SELECT_COLUMNS
        );

        let rows: Vec<ConsumptionRow> = sqlx::query_as(&sql)
            .bind(client_id)
            .bind(span.map(|s| s.from))
            .bind(span.map(|s| s.to))
            .bind(location_id)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(ConsumptionRecord::try_from).collect()
    }

    /// Replaces every derived field of a record and bumps `updated_at`.
    ///
    /// ## Errors
    /// `DbError::NotFound` if no record has this id.
    pub async fn update(&self, id: &str, update: &ConsumptionUpdate) -> DbResult<()> {
        let totals = &update.totals;
        let meta = &totals.metadata;

        debug!(id = %id, "Updating consumption record");

        let result = sqlx::query(
            r#"
            UPDATE consumption_records SET
                total_amount_cents = ?2,
                total_items = ?3,
                average_order_value_cents = ?4,
                top_categories = ?5,
                payment_methods = ?6,
                provider = ?7,
                sync_timestamp = ?8,
                sales_count = ?9,
                peak_hour = ?10,
                customer_count = ?11,
                updated_at = ?12
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(totals.total_amount.cents())
        .bind(totals.total_items)
        .bind(totals.average_order_value.cents())
        .bind(serde_json::to_string(&totals.top_categories)?)
        .bind(serde_json::to_string(&totals.payment_methods)?)
        .bind(&meta.provider)
        .bind(meta.sync_timestamp)
        .bind(meta.sales_count as i64)
        .bind(meta.peak_hour.map(i64::from))
        .bind(meta.customer_count as i64)
        .bind(update.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("ConsumptionRecord", id));
        }

        Ok(())
    }

    /// Counts a client's records.
    pub async fn count_for_client(&self, client_id: &str) -> DbResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM consumption_records WHERE client_id = ?1")
                .bind(client_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
