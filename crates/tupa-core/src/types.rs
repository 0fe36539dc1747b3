//! # Domain Types
//!
//! Core domain types shared by the adapters, the aggregator and the ERP push.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────────┐   ┌─────────────────┐   │
//! │  │ NormalizedSale  │   │  ConsumptionRecord  │   │   SyncReport    │   │
//! │  │  ─────────────  │   │  ─────────────────  │   │  ─────────────  │   │
//! │  │  id             │──►│  client_id          │   │  success        │   │
//! │  │  timestamp      │   │  location_id?       │   │  processed      │   │
//! │  │  amount (Money) │   │  date               │   │  errors[]       │   │
//! │  │  items[]        │   │  totals (derived)   │   │  duration_ms    │   │
//! │  └─────────────────┘   └─────────────────────┘   └─────────────────┘   │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────────┐   ┌─────────────────┐   │
//! │  │   DateRange     │   │  ValidationReport   │   │AdapterDescriptor│   │
//! │  │  from / to      │   │  is_valid, issues   │   │  limits, flags  │   │
//! │  └─────────────────┘   └─────────────────────┘   └─────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Lifecycle
//! A `NormalizedSale` is produced by a provider mapper from one raw vendor
//! record and is never mutated afterwards. A `ConsumptionRecord` is created on
//! the first aggregation of a `(client, location, date)` key and fully
//! replaced on every later aggregation of the same key.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::{EXTERNAL_ID_PREFIX, MAIN_LOCATION};

// =============================================================================
// Normalized Sale
// =============================================================================

/// Customer attached to a sale, when the vendor knows one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    /// Vendor-side customer identifier.
    pub id: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
}

/// A line item of a normalized sale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleLine {
    /// Item name as shown on the ticket.
    pub name: String,

    /// Quantity sold. Fractional for weighed items.
    pub quantity: f64,

    /// Price of one unit.
    pub unit_price: Money,

    /// Line total as reported by the vendor.
    pub total_price: Money,

    pub category: Option<String>,

    pub sku: Option<String>,

    /// Modifier names (e.g. "extra cheese").
    #[serde(default)]
    pub modifiers: Vec<String>,
}

/// Provenance of a normalized sale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SaleMetadata {
    /// Provider slug the sale was fetched from (e.g. "square").
    pub provider: String,

    /// Vendor location / store the sale happened at.
    pub location_id: Option<String>,

    /// Vendor-specific leftovers kept for diagnosis.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A POS transaction translated into the engine's common schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedSale {
    /// Engine-side identifier (stable per vendor transaction).
    pub id: String,

    /// When the sale happened.
    pub timestamp: DateTime<Utc>,

    /// Amount actually charged (after discounts, including tax).
    pub amount: Money,

    /// Discounts applied to the ticket.
    #[serde(default)]
    pub discount: Money,

    /// Tax included in `amount`.
    #[serde(default)]
    pub tax: Money,

    pub items: Vec<SaleLine>,

    pub customer: Option<Customer>,

    /// Payment method slug; absent when the vendor does not report one.
    pub payment_method: Option<String>,

    /// The vendor's own transaction identifier.
    pub pos_transaction_id: String,

    pub metadata: SaleMetadata,
}

impl NormalizedSale {
    /// Sum of all line totals.
    pub fn items_total(&self) -> Money {
        self.items.iter().map(|item| item.total_price).sum()
    }

    /// Sum of all line quantities.
    pub fn item_count(&self) -> f64 {
        self.items.iter().map(|item| item.quantity).sum()
    }

    /// Difference between the charged amount and what the lines explain
    /// (`items - discount + tax`). Advisory only.
    pub fn reconciliation_gap(&self) -> Money {
        let expected = self.items_total() - self.discount + self.tax;
        Money::from_cents((self.amount - expected).cents().abs())
    }

    /// Customer identifier, if the vendor reported one.
    pub fn customer_id(&self) -> Option<&str> {
        self.customer
            .as_ref()
            .and_then(|c| c.id.as_deref())
            .filter(|id| !id.trim().is_empty())
    }
}

// =============================================================================
// Date Ranges
// =============================================================================

/// A closed window of instants used to fetch sales from a vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DateRange {
    #[ts(as = "String")]
    pub from: DateTime<Utc>,
    #[ts(as = "String")]
    pub to: DateTime<Utc>,
}

impl DateRange {
    /// Creates a range, rejecting `from > to`.
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> CoreResult<Self> {
        if from > to {
            return Err(CoreError::InvalidDateRange {
                from: from.to_rfc3339(),
                to: to.to_rfc3339(),
            });
        }
        Ok(DateRange { from, to })
    }

    /// The `hours` leading up to `now`.
    pub fn trailing(now: DateTime<Utc>, hours: i64) -> Self {
        DateRange {
            from: now - Duration::hours(hours),
            to: now,
        }
    }

    /// Checks whether an instant falls inside the range (inclusive).
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.from && instant <= self.to
    }

    /// Calendar days touched by this range.
    pub fn days(&self) -> DaySpan {
        DaySpan {
            from: self.from.date_naive(),
            to: self.to.date_naive(),
        }
    }
}

/// A closed span of calendar dates used to query stored consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaySpan {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DaySpan {
    /// A span covering exactly one day.
    pub fn single(date: NaiveDate) -> Self {
        DaySpan {
            from: date,
            to: date,
        }
    }

    /// The `days` days ending at (and including) `today`.
    pub fn last_days(today: NaiveDate, days: u32) -> Self {
        let back = i64::from(days.saturating_sub(1));
        DaySpan {
            from: today - Duration::days(back),
            to: today,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.from && date <= self.to
    }
}

// =============================================================================
// Consumption
// =============================================================================

/// One entry of the top-categories ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CategoryTotal {
    pub category: String,
    /// Summed item quantity for the category.
    pub quantity: f64,
}

/// Provenance and secondary statistics of a consumption record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ConsumptionMetadata {
    pub provider: String,
    #[ts(as = "String")]
    pub sync_timestamp: DateTime<Utc>,
    pub sales_count: usize,
    /// Hour of day (0-23, UTC) with the most sales.
    pub peak_hour: Option<u32>,
    /// Distinct identified customers.
    pub customer_count: usize,
}

/// Fields derived from a batch of sales.
///
/// Always recomputed from the full input set; never incremented.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ConsumptionTotals {
    pub total_amount: Money,
    pub total_items: f64,
    pub average_order_value: Money,
    /// At most five entries, highest quantity first.
    pub top_categories: Vec<CategoryTotal>,
    /// Payment method -> summed sale amount.
    pub payment_methods: BTreeMap<String, Money>,
    pub metadata: ConsumptionMetadata,
}

/// A consumption record that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ConsumptionDraft {
    pub client_id: String,
    pub location_id: Option<String>,
    #[ts(as = "String")]
    pub date: NaiveDate,
    #[serde(flatten)]
    pub totals: ConsumptionTotals,
}

impl ConsumptionDraft {
    /// Deterministic dedup key used by the ERP push.
    pub fn external_id(&self) -> String {
        consumption_external_id(&self.client_id, self.date, self.location_id.as_deref())
    }
}

/// A persisted daily consumption summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ConsumptionRecord {
    pub id: String,
    #[serde(flatten)]
    pub draft: ConsumptionDraft,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl ConsumptionRecord {
    /// Materializes a draft under a fresh UUID v4.
    pub fn new(draft: ConsumptionDraft, now: DateTime<Utc>) -> Self {
        ConsumptionRecord {
            id: uuid::Uuid::new_v4().to_string(),
            draft,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replaces every derived field and bumps `updated_at`.
    pub fn apply(&mut self, update: ConsumptionUpdate) {
        self.draft.totals = update.totals;
        self.updated_at = update.updated_at;
    }

    pub fn client_id(&self) -> &str {
        &self.draft.client_id
    }

    pub fn location_id(&self) -> Option<&str> {
        self.draft.location_id.as_deref()
    }

    pub fn date(&self) -> NaiveDate {
        self.draft.date
    }

    pub fn totals(&self) -> &ConsumptionTotals {
        &self.draft.totals
    }

    pub fn external_id(&self) -> String {
        self.draft.external_id()
    }
}

/// Replacement of a record's derived fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumptionUpdate {
    pub totals: ConsumptionTotals,
    pub updated_at: DateTime<Utc>,
}

/// Builds the dedup key `tupa_consumption_{client}_{date}_{location|main}`.
///
/// ## Example
/// ```rust
/// use chrono::NaiveDate;
/// use tupa_core::consumption_external_id;
///
/// let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
/// assert_eq!(
///     consumption_external_id("c1", date, None),
///     "tupa_consumption_c1_2024-03-09_main"
/// );
/// ```
pub fn consumption_external_id(client_id: &str, date: NaiveDate, location_id: Option<&str>) -> String {
    format!(
        "{}_{}_{}_{}",
        EXTERNAL_ID_PREFIX,
        client_id,
        date.format("%Y-%m-%d"),
        location_id.unwrap_or(MAIN_LOCATION)
    )
}

// =============================================================================
// Validation Report
// =============================================================================

/// One problem found while validating a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RecordIssue {
    /// Sale id, when the sale had one.
    pub record_id: Option<String>,
    pub message: String,
}

/// Advisory classification of a batch of sales.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ValidationReport {
    /// False when any record carries a blocking error.
    pub is_valid: bool,
    pub errors: Vec<RecordIssue>,
    pub warnings: Vec<RecordIssue>,
    pub records_processed: usize,
    pub records_valid: usize,
}

// =============================================================================
// Adapter Descriptor
// =============================================================================

/// Capabilities a provider can advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum ProviderFeature {
    Sales,
    Customers,
    Categories,
    Modifiers,
    Locations,
    Pagination,
}

impl ProviderFeature {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderFeature::Sales => "sales",
            ProviderFeature::Customers => "customers",
            ProviderFeature::Categories => "categories",
            ProviderFeature::Modifiers => "modifiers",
            ProviderFeature::Locations => "locations",
            ProviderFeature::Pagination => "pagination",
        }
    }
}

impl std::fmt::Display for ProviderFeature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static registry metadata for a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AdapterDescriptor {
    /// Fixed slug the provider is registered under (case-sensitive).
    pub provider_id: String,
    pub display_name: String,
    pub version: String,
    pub features: Vec<String>,
    /// Upper bound for orchestrator batch sizes.
    pub batch_size_limit: usize,
    pub real_time_supported: bool,
    pub pagination_supported: bool,
}

impl AdapterDescriptor {
    pub fn supports(&self, feature: &str) -> bool {
        self.features.iter().any(|f| f == feature)
    }

    /// Renders a feature list into the descriptor's string form.
    pub fn feature_names(features: &[ProviderFeature]) -> Vec<String> {
        features.iter().map(|f| f.as_str().to_string()).collect()
    }
}

// =============================================================================
// Reports
// =============================================================================

/// Terminal report of one orchestration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SyncReport {
    pub client_id: String,
    pub provider: String,
    pub success: bool,
    pub records_processed: usize,
    pub records_created: usize,
    pub records_updated: usize,
    pub records_skipped: usize,
    pub errors: Vec<String>,
    pub duration_ms: u64,
    #[ts(as = "String")]
    pub timestamp: DateTime<Utc>,
    /// Window the run fetched, once resolved.
    pub range: Option<DateRange>,
    /// Run phase a fatal error stopped the run in (`"fetching"`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_phase: Option<String>,
}

impl SyncReport {
    /// A report for a run that failed before any batch was processed.
    pub fn failed(
        client_id: impl Into<String>,
        provider: impl Into<String>,
        error: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        SyncReport {
            client_id: client_id.into(),
            provider: provider.into(),
            success: false,
            records_processed: 0,
            records_created: 0,
            records_updated: 0,
            records_skipped: 0,
            errors: vec![error.into()],
            duration_ms,
            timestamp: Utc::now(),
            range: None,
            failed_phase: None,
        }
    }
}

/// A persisted sync report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SyncLogEntry {
    pub id: String,
    #[serde(flatten)]
    pub report: SyncReport,
}

/// Result of pushing consumption records to the ERP.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PushReport {
    /// False only when the run itself failed (e.g. ERP unreachable).
    pub success: bool,
    pub records_processed: usize,
    pub records_created: usize,
    pub records_updated: usize,
    pub records_skipped: usize,
    pub errors: Vec<String>,
    pub duration_ms: u64,
    #[ts(as = "Option<String>")]
    pub last_sync_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Unit Tests
// =============================================================================
