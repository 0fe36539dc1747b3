//! # tupa-db: Database Layer for Tupa POS Sync
//!
//! Local SQLite storage for consumption records and sync run history.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Tupa POS Sync Data Flow                          │
//! │                                                                         │
//! │  ConsumptionAggregator (tupa-sync)                                     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     tupa-db (THIS CRATE)                        │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────┐   ┌───────────────┐  │   │
//! │  │   │   Database    │    │  Repositories  │   │  Migrations   │  │   │
//! │  │   │   (pool.rs)   │    │                │   │  (embedded)   │  │   │
//! │  │   │               │    │ Consumption    │   │ 001_consump.. │  │   │
//! │  │   │ SqlitePool    │◄───│ SyncLog        │   │ 002_sync_logs │  │   │
//! │  │   └───────────────┘    └────────────────┘   └───────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite file (EngineConfig.database.path)                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tupa_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("tupa.db")).await?;
//! let records = db.consumption().select_by_client("c1", None, None).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::consumption::ConsumptionRepository;
pub use repository::sync_log::SyncLogRepository;
