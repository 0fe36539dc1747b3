//! # Validation Module
//!
//! Business-rule validation of normalized sales before aggregation.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Provider Mapper                                               │
//! │  ├── Structural checks (shape, types, parsable timestamps)             │
//! │  └── Failure → SchemaError, record never becomes a NormalizedSale      │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE                                                   │
//! │  ├── Errors: missing ids, negative amounts, empty tickets, bad lines   │
//! │  └── Warnings: future / stale timestamps, amount not reconciling       │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                             │
//! │  ├── NOT NULL constraints                                               │
//! │  └── UNIQUE (client, location, date)                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Gating Rule
//! One blocking error anywhere marks the whole batch invalid. Callers must not
//! aggregate or persist an invalid batch; [`ensure_valid`] turns that rule
//! into a typed error.

use chrono::{DateTime, Duration, Utc};

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::types::{NormalizedSale, RecordIssue, SaleLine, ValidationReport};
use crate::{MAX_SALE_AGE_DAYS, RECONCILIATION_TOLERANCE};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Field Validators
// =============================================================================

/// Validates an item quantity.
///
/// ## Rules
/// - Must be a finite number
/// - Must be positive (> 0); fractional quantities are allowed
///
/// ## Example
/// ```rust
/// use tupa_core::validation::validate_quantity;
///
/// assert!(validate_quantity(2.0).is_ok());
/// assert!(validate_quantity(0.5).is_ok());
/// assert!(validate_quantity(0.0).is_err());
/// ```
pub fn validate_quantity(qty: f64) -> ValidationResult<()> {
    if !qty.is_finite() {
        return Err(ValidationError::InvalidFormat {
            field: "quantity".to_string(),
            reason: "must be a finite number".to_string(),
        });
    }

    if qty <= 0.0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    Ok(())
}

/// Validates an item price.
///
/// ## Rules
/// - Must be non-negative (>= 0)
/// - Zero is allowed (comped items)
pub fn validate_price(price: Money) -> ValidationResult<()> {
    if price.is_negative() {
        return Err(ValidationError::MustNotBeNegative {
            field: "price".to_string(),
        });
    }

    Ok(())
}

/// Validates a sale amount. Refunds arrive negative and are rejected.
pub fn validate_amount(amount: Money) -> ValidationResult<()> {
    if amount.is_negative() {
        return Err(ValidationError::MustNotBeNegative {
            field: "amount".to_string(),
        });
    }

    Ok(())
}

/// Clamps a requested batch size into `1..=limit`.
///
/// ## Example
/// ```rust
/// use tupa_core::validation::clamp_batch_size;
///
/// assert_eq!(clamp_batch_size(1001, 1000), 1000);
/// assert_eq!(clamp_batch_size(50, 1000), 50);
/// assert_eq!(clamp_batch_size(0, 1000), 1);
/// ```
pub fn clamp_batch_size(requested: usize, limit: usize) -> usize {
    requested.min(limit).max(1)
}

fn validate_required(value: &str, field: &str) -> ValidationResult<()> {
    if value.trim().is_empty() {
        return Err(ValidationError::required(field));
    }
    Ok(())
}

fn validate_line(line: &SaleLine) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if let Err(e) = validate_required(&line.name, "name") {
        errors.push(e);
    }
    if let Err(e) = validate_quantity(line.quantity) {
        errors.push(e);
    }
    if let Err(e) = validate_price(line.unit_price) {
        errors.push(e);
    }
    if let Err(e) = validate_price(line.total_price) {
        errors.push(e);
    }

    errors
}

// =============================================================================
// Batch Validation
// =============================================================================

/// Classifies a batch of sales into errors and warnings.
///
/// ## Blocking errors
/// - missing `id` or `pos_transaction_id`
/// - negative `amount`
/// - no items
/// - an item without a name, with a non-positive quantity or a negative price
///
/// ## Warnings
/// - timestamp in the future, or older than one year
/// - `amount` not reconciling with `items - discount + tax`
pub fn validate_sales(sales: &[NormalizedSale], now: DateTime<Utc>) -> ValidationReport {
    let mut report = ValidationReport {
        is_valid: true,
        records_processed: sales.len(),
        ..ValidationReport::default()
    };

    let oldest = now - Duration::days(MAX_SALE_AGE_DAYS);

    for (index, sale) in sales.iter().enumerate() {
        let record_id = if sale.id.trim().is_empty() {
            None
        } else {
            Some(sale.id.clone())
        };
        let mut blocking = Vec::new();

        if record_id.is_none() {
            blocking.push(format!("sale {}: {}", index, ValidationError::required("id")));
        }
        if let Err(e) = validate_required(&sale.pos_transaction_id, "pos_transaction_id") {
            blocking.push(e.to_string());
        }
        if let Err(e) = validate_amount(sale.amount) {
            blocking.push(e.to_string());
        }
        if sale.items.is_empty() {
            blocking.push("sale must contain at least one item".to_string());
        }
        for (line_no, line) in sale.items.iter().enumerate() {
            for e in validate_line(line) {
                blocking.push(format!("item {}: {}", line_no, e));
            }
        }

        if sale.timestamp > now {
            report.warnings.push(RecordIssue {
                record_id: record_id.clone(),
                message: format!("timestamp {} is in the future", sale.timestamp.to_rfc3339()),
            });
        } else if sale.timestamp < oldest {
            report.warnings.push(RecordIssue {
                record_id: record_id.clone(),
                message: format!(
                    "timestamp {} is older than {} days",
                    sale.timestamp.to_rfc3339(),
                    MAX_SALE_AGE_DAYS
                ),
            });
        }

        if !sale.items.is_empty() {
            let gap = sale.reconciliation_gap();
            if gap > RECONCILIATION_TOLERANCE {
                report.warnings.push(RecordIssue {
                    record_id: record_id.clone(),
                    message: format!("amount differs from item totals by {}", gap),
                });
            }
        }

        if blocking.is_empty() {
            report.records_valid += 1;
        } else {
            report.is_valid = false;
            report
                .errors
                .extend(blocking.into_iter().map(|message| RecordIssue {
                    record_id: record_id.clone(),
                    message,
                }));
        }
    }

    report
}

/// Turns an invalid report into [`CoreError::InvalidBatch`].
pub fn ensure_valid(report: &ValidationReport) -> CoreResult<()> {
    if report.is_valid {
        return Ok(());
    }
    Err(CoreError::InvalidBatch {
        total: report.records_processed,
        invalid: report.records_processed - report.records_valid,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
