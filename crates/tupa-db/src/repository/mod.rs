//! # Repository Module
//!
//! Database repository implementations for the sync engine.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  ConsumptionAggregator / SyncOrchestrator                               │
//! │       │                                                                 │
//! │       │  db.consumption().select_by_client("c1", span, None)           │
//! │       ▼                                                                 │
//! │  ConsumptionRepository                  SyncLogRepository               │
//! │  ├── insert(record)                     ├── record(report)              │
//! │  ├── get_by_id(id)                      ├── last_successful_sync(..)    │
//! │  ├── select_by_client(..)               ├── recent(client, limit)       │
//! │  └── update(id, update)                 └── cleanup_old_entries(days)   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`consumption::ConsumptionRepository`] - Daily consumption records
//! - [`sync_log::SyncLogRepository`] - Sync run history

pub mod consumption;
pub mod sync_log;
