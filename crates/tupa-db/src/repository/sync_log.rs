//! # Sync Log Repository
//!
//! One row per orchestrator run.
//!
//! ## Window Seeding
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  run #1  [08:00 ─────────── 09:00]  success  ──┐                        │
//! │  run #2  [09:00 ─────────── 10:00]  failed     │                        │
//! │                                                ▼                        │
//! │  run #3  from = last_successful_sync() = 09:00 (range_to of run #1)     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use tupa_core::{DateRange, SyncLogEntry, SyncReport};

#[derive(Debug, sqlx::FromRow)]
struct SyncLogRow {
    id: String,
    client_id: String,
    provider: String,
    success: bool,
    records_processed: i64,
    records_created: i64,
    records_updated: i64,
    records_skipped: i64,
    errors: String,
    duration_ms: i64,
    range_from: Option<DateTime<Utc>>,
    range_to: Option<DateTime<Utc>>,
    failed_phase: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<SyncLogRow> for SyncLogEntry {
    type Error = DbError;

    fn try_from(row: SyncLogRow) -> DbResult<Self> {
        let range = match (row.range_from, row.range_to) {
            (Some(from), Some(to)) => Some(DateRange { from, to }),
            _ => None,
        };

        Ok(SyncLogEntry {
            id: row.id,
            report: SyncReport {
                client_id: row.client_id,
                provider: row.provider,
                success: row.success,
                records_processed: row.records_processed.max(0) as usize,
                records_created: row.records_created.max(0) as usize,
                records_updated: row.records_updated.max(0) as usize,
                records_skipped: row.records_skipped.max(0) as usize,
                errors: serde_json::from_str(&row.errors)?,
                duration_ms: row.duration_ms.max(0) as u64,
                timestamp: row.created_at,
                range,
                failed_phase: row.failed_phase,
            },
        })
    }
}

/// Repository for sync run logs.
#[derive(Debug, Clone)]
pub struct SyncLogRepository {
    pool: SqlitePool,
}

impl SyncLogRepository {
    /// Creates a new SyncLogRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SyncLogRepository { pool }
    }

    /// Stores a run report and returns the log id.
    pub async fn record(&self, report: &SyncReport) -> DbResult<String> {
        let id = Uuid::new_v4().to_string();

        debug!(
            client_id = %report.client_id,
            provider = %report.provider,
            success = report.success,
            "Recording sync log"
        );

        sqlx::query(
            r#"
            INSERT INTO sync_logs (
                id, client_id, provider, success,
                records_processed, records_created, records_updated, records_skipped,
                errors, duration_ms, range_from, range_to, failed_phase, created_at
            ) VALUES (
                ?1, ?2, ?3, ?4,
                ?5, ?6, ?7, ?8,
                ?9, ?10, ?11, ?12, ?13, ?14
            )
            "#,
        )
        .bind(&id)
        .bind(&report.client_id)
        .bind(&report.provider)
        .bind(report.success)
        .bind(report.records_processed as i64)
        .bind(report.records_created as i64)
        .bind(report.records_updated as i64)
        .bind(report.records_skipped as i64)
        .bind(serde_json::to_string(&report.errors)?)
        .bind(report.duration_ms as i64)
        .bind(report.range.map(|r| r.from))
        .bind(report.range.map(|r| r.to))
        .bind(report.failed_phase.as_deref())
        .bind(report.timestamp)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    /// End of the range of the latest successful run for this client and
    /// provider.
    pub async fn last_successful_sync(
        &self,
        client_id: &str,
        provider: &str,
    ) -> DbResult<Option<DateTime<Utc>>> {
        let last: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            SELECT range_to
            FROM sync_logs
            WHERE client_id = ?1
              AND provider = ?2
              AND success = 1
              AND range_to IS NOT NULL
            ORDER BY range_to DESC
            LIMIT 1
            "#,
        )
        .bind(client_id)
        .bind(provider)
        .fetch_optional(&self.pool)
        .await?;

        Ok(last)
    }

    /// Latest runs for a client, newest first.
    pub async fn recent(&self, client_id: &str, limit: u32) -> DbResult<Vec<SyncLogEntry>> {
        let rows: Vec<SyncLogRow> = sqlx::query_as(
            r#"
            SELECT
                id, client_id, provider, success,
                records_processed, records_created, records_updated, records_skipped,
                errors, duration_ms, range_from, range_to, failed_phase, created_at
            FROM sync_logs
            WHERE client_id = ?1
            ORDER BY created_at DESC
            LIMIT ?2
            "#,
        )
        .bind(client_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SyncLogEntry::try_from).collect()
    }

    /// Deletes logs older than `days_old` days.
    ///
    /// ## Returns
    /// Number of deleted entries.
    pub async fn cleanup_old_entries(&self, days_old: u32) -> DbResult<u64> {
        let cutoff = Utc::now() - Duration::days(i64::from(days_old));

        let result = sqlx::query("DELETE FROM sync_logs WHERE created_at < ?1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use chrono::TimeZone;

    async fn repo() -> SyncLogRepository {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.sync_logs()
    }

    fn report(success: bool, to: DateTime<Utc>, timestamp: DateTime<Utc>) -> SyncReport {
        SyncReport {
            client_id: "c1".to_string(),
            provider: "square".to_string(),
            success,
            records_processed: 10,
            records_created: 1,
            records_updated: 0,
            records_skipped: 0,
            errors: if success {
                Vec::new()
            } else {
                vec!["batch 2: boom".to_string()]
            },
            duration_ms: 42,
            timestamp,
            range: Some(DateRange {
                from: to - Duration::hours(1),
                to,
            }),
            failed_phase: None,
        }
    }

    #[tokio::test]
    async fn test_last_successful_sync_ignores_failures() {
        let repo = repo().await;
        let nine = Utc.with_ymd_and_hms(2024, 3, 10, 9, 0, 0).unwrap();
        let ten = nine + Duration::hours(1);

        assert_eq!(repo.last_successful_sync("c1", "square").await.unwrap(), None);

        repo.record(&report(true, nine, nine)).await.unwrap();
        repo.record(&report(false, ten, ten)).await.unwrap();

        let last = repo.last_successful_sync("c1", "square").await.unwrap();
        assert_eq!(last, Some(nine));
        assert_eq!(repo.last_successful_sync("c1", "toast").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_recent_newest_first() {
        let repo = repo().await;
        let nine = Utc.with_ymd_and_hms(2024, 3, 10, 9, 0, 0).unwrap();
        let ten = nine + Duration::hours(1);

        repo.record(&report(true, nine, nine)).await.unwrap();
        repo.record(&report(false, ten, ten)).await.unwrap();

        let entries = repo.recent("c1", 10).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(!entries[0].report.success);
        assert_eq!(entries[0].report.errors, vec!["batch 2: boom".to_string()]);
        assert_eq!(entries[1].report, report(true, nine, nine));

        assert_eq!(repo.recent("c1", 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_phase_round_trips() {
        let repo = repo().await;
        let nine = Utc.with_ymd_and_hms(2024, 3, 10, 9, 0, 0).unwrap();

        let mut failed = SyncReport::failed("c1", "square", "Request timed out after 30 seconds", 5);
        failed.timestamp = nine;
        failed.failed_phase = Some("fetching".to_string());
        repo.record(&failed).await.unwrap();

        let entries = repo.recent("c1", 1).await.unwrap();
        assert_eq!(entries[0].report, failed);
        assert_eq!(entries[0].report.failed_phase.as_deref(), Some("fetching"));
    }

    #[tokio::test]
    async fn test_cleanup_old_entries() {
        let repo = repo().await;
        let now = Utc::now();
        let old = now - Duration::days(40);

        repo.record(&report(true, old, old)).await.unwrap();
        repo.record(&report(true, now, now)).await.unwrap();

        assert_eq!(repo.cleanup_old_entries(30).await.unwrap(), 1);
        assert_eq!(repo.recent("c1", 10).await.unwrap().len(), 1);
    }
}
