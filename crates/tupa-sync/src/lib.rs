//! # tupa-sync: Sync Engine for Tupa POS Sync
//!
//! Pulls sales from POS vendors, rolls them into daily consumption records
//! and pushes those records into the ERP.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          One Sync Run                                   │
//! │                                                                         │
//! │  SyncRequest ──► SyncOrchestrator                                       │
//! │                     │                                                   │
//! │                     │ 1. registry.create_adapter(pos_type, pos_config)  │
//! │                     │ 2. adapter.validate_connection()                  │
//! │                     │ 3. resolve range (last_sync / log / window)       │
//! │                     │ 4. adapter.fetch_sales(range)                     │
//! │                     ▼                                                   │
//! │  ┌──────────────────────────────┐                                       │
//! │  │ batches (size clamped to the │ ──► BatchProcessor                    │
//! │  │ provider limit, paced)       │       └─ ConsumptionProcessor         │
//! │  └──────────────────────────────┘            └─ ConsumptionAggregator   │
//! │                     │                              └─ ConsumptionStore  │
//! │                     ▼                                                   │
//! │                 SyncReport ──► SyncLogStore                             │
//! │                                                                         │
//! │  Afterwards (sync-runner):                                              │
//! │  ConsumptionStore ──► PushSyncService ──► ErpGateway (JSON-RPC)         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`config`] - Engine configuration (TOML file + `TUPA_*` env overrides)
//! - [`error`] - Sync error types
//! - [`provider`] - `PosAdapter` contract and the Square / Toast adapters
//! - [`registry`] - Provider slug → adapter factory
//! - [`orchestrator`] - Per-client sync run
//! - [`aggregator`] - Daily consumption records from validated sales
//! - [`store`] - Storage seams and the in-memory store
//! - [`retry`] - Linear backoff
//! - [`erp`] - ERP client and push service
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tupa_sync::{
//!     AdapterRegistry, ConsumptionAggregator, ConsumptionProcessor, EngineConfig,
//!     SyncOrchestrator, SyncRequest,
//! };
//!
//! let config = EngineConfig::load(None)?;
//! let aggregator = ConsumptionAggregator::new(Arc::new(database.consumption()));
//! let orchestrator = SyncOrchestrator::new(
//!     Arc::new(AdapterRegistry::builtin()),
//!     Arc::new(ConsumptionProcessor::new(aggregator)),
//! );
//!
//! let report = orchestrator.run(&SyncRequest::from_client(&config.clients[0])).await;
//! println!("created {} records", report.records_created);
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};

// =============================================================================
// Module Declarations
// =============================================================================

pub mod aggregator;
pub mod config;
pub mod erp;
pub mod error;
pub mod orchestrator;
pub mod provider;
pub mod registry;
pub mod retry;
pub mod store;

// =============================================================================
// Re-exports
// =============================================================================

pub use aggregator::{ConsumptionAggregator, ConsumptionProcessor, UpsertOutcome};
pub use config::{ClientConfig, DatabaseSettings, EngineConfig, ErpSettings, SyncSettings};
pub use erp::{ErpClient, ErpGateway, PushSettings, PushSyncService};
pub use error::{SyncError, SyncResult};
pub use orchestrator::{
    BatchContext, BatchOutcome, BatchProcessor, OrchestratorSettings, RunPhase, SyncOrchestrator,
    SyncRequest,
};
pub use provider::{PosAdapter, SquareAdapter, ToastAdapter};
pub use registry::AdapterRegistry;
pub use retry::LinearBackoff;
pub use store::{ConsumptionStore, MemoryConsumptionStore, SyncLogStore};

/// Source of "now", injectable so runs are reproducible in tests.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}
