//! # Sync Orchestrator
//!
//! Drives one run: one client, one provider, one date range.
//!
//! ## Run State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Idle ──► ValidatingConnection ──► ResolvingRange ──► Fetching          │
//! │                │   false / unknown provider              │  error       │
//! │                ▼                                         ▼              │
//! │             Failed ◄──────────────────────────────────── Failed         │
//! │                                                          │ ok           │
//! │                                                          ▼              │
//! │                                Batching ──► ProcessingBatches           │
//! │                                                 │  batch 1 ─ pace ─►    │
//! │                                                 │  batch 2 ✗ (recorded) │
//! │                                                 │  batch 3 ─► ...       │
//! │                                                 ▼                       │
//! │                                             Completed                   │
//! │                                   success = no batch errors             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Failure Semantics
//! - Unknown provider, refused connection, failed fetch: the run fails with
//!   zero records processed.
//! - A failing batch is recorded as `"batch {n}: {error}"` and the run moves
//!   on to the next batch. Failed batches are not retried within the run.
//! - A failed report carries the phase the fatal error hit in
//!   `failed_phase`. Phase transitions themselves are only logged.
//!
//! Batches run one after another with a pacing delay between them. Runs for
//! different clients share nothing mutable except the read-only registry.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{ClientConfig, SyncSettings};
use crate::error::{SyncError, SyncResult};
use crate::provider::PosAdapter;
use crate::registry::AdapterRegistry;
use crate::store::SyncLogStore;
use crate::{system_clock, Clock};
use tupa_core::validation::clamp_batch_size;
use tupa_core::{DateRange, NormalizedSale, SyncReport, DEFAULT_BATCH_SIZE};

// =============================================================================
// Run Phases
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    ValidatingConnection,
    ResolvingRange,
    Fetching,
    Batching,
    ProcessingBatches,
    Completed,
    Failed,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Idle => "idle",
            RunPhase::ValidatingConnection => "validating_connection",
            RunPhase::ResolvingRange => "resolving_range",
            RunPhase::Fetching => "fetching",
            RunPhase::Batching => "batching",
            RunPhase::ProcessingBatches => "processing_batches",
            RunPhase::Completed => "completed",
            RunPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Requests and Batch Processing
// =============================================================================

/// Input of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncRequest {
    pub client_id: String,
    /// Must name a registered provider.
    pub pos_type: String,
    pub pos_config: Value,
    pub location_id: Option<String>,
    /// Explicit window; resolved from the last sync when absent.
    pub date_range: Option<DateRange>,
    pub batch_size: Option<usize>,
}

impl SyncRequest {
    pub fn from_client(client: &ClientConfig) -> Self {
        SyncRequest {
            client_id: client.client_id.clone(),
            pos_type: client.pos_type.clone(),
            pos_config: client.pos_config.clone(),
            location_id: client.location_id.clone(),
            date_range: None,
            batch_size: client.batch_size,
        }
    }

    pub fn with_range(mut self, range: DateRange) -> Self {
        self.date_range = Some(range);
        self
    }
}

/// What a batch processor sees besides the batch itself.
#[derive(Debug, Clone, Copy)]
pub struct BatchContext<'a> {
    pub client_id: &'a str,
    pub location_id: Option<&'a str>,
    pub provider: &'a str,
    /// 1-based batch number.
    pub index: usize,
    pub total: usize,
    /// Sales accepted by earlier batches of this run.
    pub accepted: &'a [NormalizedSale],
}

/// Result of processing one batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    /// Sales of this batch that were accepted.
    pub accepted: Vec<NormalizedSale>,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
}

/// Per-batch step of a run (aggregation, forwarding, ...).
#[async_trait]
pub trait BatchProcessor: Send + Sync {
    async fn process(&self, ctx: BatchContext<'_>, batch: &[NormalizedSale]) -> SyncResult<BatchOutcome>;
}

// =============================================================================
// Orchestrator
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorSettings {
    pub default_batch_size: usize,
    pub batch_delay: Duration,
    pub default_window_hours: i64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        OrchestratorSettings {
            default_batch_size: DEFAULT_BATCH_SIZE,
            batch_delay: Duration::from_millis(100),
            default_window_hours: 24,
        }
    }
}

impl From<&SyncSettings> for OrchestratorSettings {
    fn from(settings: &SyncSettings) -> Self {
        OrchestratorSettings {
            default_batch_size: settings.default_batch_size,
            batch_delay: settings.batch_delay(),
            default_window_hours: settings.default_window_hours,
        }
    }
}

/// A fatal failure and how far the run got.
struct RunFailure {
    error: SyncError,
    phase: RunPhase,
    range: Option<DateRange>,
}

impl RunFailure {
    fn at(phase: RunPhase, error: SyncError) -> Self {
        RunFailure {
            error,
            phase,
            range: None,
        }
    }
}

pub struct SyncOrchestrator {
    registry: Arc<AdapterRegistry>,
    processor: Arc<dyn BatchProcessor>,
    log_store: Option<Arc<dyn SyncLogStore>>,
    settings: OrchestratorSettings,
    clock: Clock,
}

impl SyncOrchestrator {
    pub fn new(registry: Arc<AdapterRegistry>, processor: Arc<dyn BatchProcessor>) -> Self {
        SyncOrchestrator {
            registry,
            processor,
            log_store: None,
            settings: OrchestratorSettings::default(),
            clock: system_clock(),
        }
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Records every report and seeds the window when the adapter has no
    /// last sync of its own.
    pub fn with_log_store(mut self, store: Arc<dyn SyncLogStore>) -> Self {
        self.log_store = Some(store);
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Runs to completion. Fatal errors become a failed report.
    pub async fn run(&self, request: &SyncRequest) -> SyncReport {
        self.run_inner(request).await.0
    }

    /// Like [`run`](Self::run), but fatal errors are returned as `Err`.
    /// The failed report is still recorded in the log store.
    pub async fn execute(&self, request: &SyncRequest) -> SyncResult<SyncReport> {
        match self.run_inner(request).await {
            (_, Some(error)) => Err(error),
            (report, None) => Ok(report),
        }
    }

    async fn run_inner(&self, request: &SyncRequest) -> (SyncReport, Option<SyncError>) {
        let started = Instant::now();
        info!(
            client_id = %request.client_id,
            provider = %request.pos_type,
            "Starting sync run"
        );

        let (report, fatal) = match self.drive(request, started).await {
            Ok(report) => (report, None),
            Err(failure) => {
                self.enter(request, RunPhase::Failed);
                error!(
                    client_id = %request.client_id,
                    provider = %request.pos_type,
                    phase = %failure.phase,
                    kind = failure.error.kind(),
                    error = %failure.error,
                    "Sync run failed"
                );
                let mut report = SyncReport::failed(
                    &request.client_id,
                    &request.pos_type,
                    failure.error.to_string(),
                    elapsed_ms(started),
                );
                report.timestamp = (self.clock)();
                report.range = failure.range;
                report.failed_phase = Some(failure.phase.to_string());
                (report, Some(failure.error))
            }
        };

        if let Some(store) = &self.log_store {
            if let Err(e) = store.record(&report).await {
                warn!(client_id = %request.client_id, error = %e, "Failed to record sync log");
            }
        }

        (report, fatal)
    }

    async fn drive(&self, request: &SyncRequest, started: Instant) -> Result<SyncReport, RunFailure> {
        let client_id = request.client_id.as_str();
        let provider = request.pos_type.as_str();
        self.enter(request, RunPhase::Idle);

        // Unknown providers fail here, before any I/O.
        let descriptor = self
            .registry
            .descriptor(provider)
            .map_err(|e| RunFailure::at(RunPhase::Idle, e))?
            .clone();
        let adapter = self
            .registry
            .create_adapter(provider, &request.pos_config)
            .map_err(|e| RunFailure::at(RunPhase::Idle, e))?;

        self.enter(request, RunPhase::ValidatingConnection);
        if !adapter.validate_connection().await {
            let error = SyncError::ConnectionFailed(format!(
                "{} connection check failed for client {}",
                provider, client_id
            ));
            return Err(RunFailure::at(RunPhase::ValidatingConnection, error));
        }

        self.enter(request, RunPhase::ResolvingRange);
        let range = match request.date_range {
            Some(range) => range,
            None => self.resolve_range(request, adapter.as_ref()).await,
        };
        debug!(client_id, from = %range.from, to = %range.to, "Resolved sync window");

        self.enter(request, RunPhase::Fetching);
        let sales = adapter
            .fetch_sales(client_id, range)
            .await
            .map_err(|error| RunFailure {
                range: Some(range),
                ..RunFailure::at(RunPhase::Fetching, error)
            })?;

        self.enter(request, RunPhase::Batching);
        let requested = request.batch_size.unwrap_or(self.settings.default_batch_size);
        let batch_size = clamp_batch_size(requested, descriptor.batch_size_limit);
        if batch_size != requested {
            debug!(client_id, requested, batch_size, "Batch size clamped to provider limit");
        }
        let batches: Vec<&[NormalizedSale]> = sales.chunks(batch_size).collect();
        let total = batches.len();
        info!(client_id, provider, sales = sales.len(), batches = total, "Processing sales");

        self.enter(request, RunPhase::ProcessingBatches);
        let mut report = SyncReport {
            client_id: client_id.to_string(),
            provider: provider.to_string(),
            success: false,
            records_processed: 0,
            records_created: 0,
            records_updated: 0,
            records_skipped: 0,
            errors: Vec::new(),
            duration_ms: 0,
            timestamp: (self.clock)(),
            range: Some(range),
            failed_phase: None,
        };
        let mut accepted: Vec<NormalizedSale> = Vec::new();

        for (i, batch) in batches.iter().enumerate() {
            let index = i + 1;
            let ctx = BatchContext {
                client_id,
                location_id: request.location_id.as_deref(),
                provider,
                index,
                total,
                accepted: &accepted,
            };

            match self.processor.process(ctx, batch).await {
                Ok(outcome) => {
                    debug!(
                        client_id,
                        batch = index,
                        created = outcome.created,
                        updated = outcome.updated,
                        skipped = outcome.skipped,
                        "Batch processed"
                    );
                    report.records_created += outcome.created;
                    report.records_updated += outcome.updated;
                    report.records_skipped += outcome.skipped;
                    accepted.extend(outcome.accepted);
                }
                Err(e) => {
                    warn!(client_id, batch = index, error = %e, "Batch failed, continuing");
                    report.errors.push(format!("batch {}: {}", index, e));
                }
            }
            report.records_processed += batch.len();

            if index < total && !self.settings.batch_delay.is_zero() {
                tokio::time::sleep(self.settings.batch_delay).await;
            }
        }

        self.enter(request, RunPhase::Completed);
        report.success = report.errors.is_empty();
        report.duration_ms = elapsed_ms(started);

        info!(
            client_id,
            provider,
            success = report.success,
            processed = report.records_processed,
            created = report.records_created,
            updated = report.records_updated,
            skipped = report.records_skipped,
            errors = report.errors.len(),
            duration_ms = report.duration_ms,
            "Sync run completed"
        );

        Ok(report)
    }

    /// `from = last sync (adapter, then log) ?? now − window`, `to = now`.
    async fn resolve_range(&self, request: &SyncRequest, adapter: &dyn PosAdapter) -> DateRange {
        let now = (self.clock)();

        let mut last = adapter.last_sync().await;
        if last.is_none() {
            if let Some(store) = &self.log_store {
                match store
                    .last_successful_sync(&request.client_id, &request.pos_type)
                    .await
                {
                    Ok(found) => last = found,
                    Err(e) => warn!(
                        client_id = %request.client_id,
                        error = %e,
                        "Could not read last sync, using default window"
                    ),
                }
            }
        }

        match last {
            Some(from) => DateRange {
                from: from.min(now),
                to: now,
            },
            None => DateRange::trailing(now, self.settings.default_window_hours),
        }
    }

    fn enter(&self, request: &SyncRequest, phase: RunPhase) {
        debug!(client_id = %request.client_id, provider = %request.pos_type, %phase, "Run phase");
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

// =============================================================================
// Unit Tests
// =============================================================================
