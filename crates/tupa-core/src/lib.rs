//! # tupa-core: Pure Business Logic for Tupa POS Sync
//!
//! This crate holds the rules of the sync engine as pure functions with zero
//! I/O dependencies: the normalized sale schema, batch validation, daily
//! consumption aggregation and the ERP dedup key.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Tupa POS Sync Architecture                       │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 apps/sync-runner (CLI)                          │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │   tupa-sync: adapters ──► orchestrator ──► aggregator ──► ERP   │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ tupa-core (THIS CRATE) ★                        │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌────────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │   money   │  │ aggregation│  │ validation│  │   │
//! │  │   │   Sale    │  │   Money   │  │  summarize │  │   rules   │  │   │
//! │  │   │  Record   │  │  (cents)  │  │  aggregate │  │  reports  │  │   │
//! │  │   └───────────┘  └───────────┘  └────────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    tupa-db (Database Layer)                     │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (NormalizedSale, ConsumptionRecord, reports)
//! - [`money`] - Money type with integer arithmetic
//! - [`error`] - Domain error types
//! - [`validation`] - Batch validation and field rules
//! - [`aggregation`] - Daily consumption rollups
//!
//! ## Example Usage
//!
//! ```rust
//! use chrono::Utc;
//! use tupa_core::aggregation::aggregate;
//! use tupa_core::validation::{ensure_valid, validate_sales};
//!
//! let sales = Vec::new();
//! let now = Utc::now();
//!
//! let report = validate_sales(&sales, now);
//! ensure_valid(&report).unwrap();
//!
//! let draft = aggregate("c1", &sales, None, now);
//! assert_eq!(draft.totals.metadata.sales_count, 0);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod aggregation;
pub mod error;
pub mod money;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Batch size used when neither the caller nor the config names one.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Number of entries kept in `top_categories`.
pub const MAX_TOP_CATEGORIES: usize = 5;

/// Payment method used when a sale reports none.
pub const UNKNOWN_PAYMENT_METHOD: &str = "unknown";

/// Category used for items without one.
pub const UNCATEGORIZED: &str = "uncategorized";

/// Provider recorded when no sale names one.
pub const UNKNOWN_PROVIDER: &str = "unknown";

/// Location segment of the dedup key when a record has no location.
pub const MAIN_LOCATION: &str = "main";

/// Prefix of every ERP dedup key.
pub const EXTERNAL_ID_PREFIX: &str = "tupa_consumption";

/// Sales older than this many days raise a warning.
pub const MAX_SALE_AGE_DAYS: i64 = 365;

/// Largest accepted gap between a sale's amount and its lines.
///
/// ## Business Reason
/// Vendors round tax per line and per ticket differently; a few cents of
/// drift is normal and not worth a warning.
pub const RECONCILIATION_TOLERANCE: Money = Money::from_cents(5);
