//! # ERP Field Mapping
//!
//! ```text
//! ConsumptionRecord                 ERP values
//! ─────────────────                 ──────────────────────────────
//! external_id()                ──►  external_id
//! client_id / location_id      ──►  client_id / location_id
//! date                         ──►  date ("YYYY-MM-DD")
//! total_amount (cents)         ──►  total_amount (decimal)
//! top_categories, payments     ──►  JSON strings
//! metadata.*                   ──►  sales_count, peak_hour, ...
//!                                   sync_source = "tupa"
//!                                   sync_timestamp (push time)
//!                                   state = "draft"   (create only)
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;

use super::ErpValues;
use crate::error::SyncResult;
use tupa_core::ConsumptionRecord;

pub const SYNC_SOURCE: &str = "tupa";
pub const STATE_DRAFT: &str = "draft";
pub const STATE_PROCESSED: &str = "processed";

/// The ERP's datetime format (UTC, no offset).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DATE_FORMAT: &str = "%Y-%m-%d";

const REQUIRED_TEXT: [&str; 3] = ["external_id", "client_id", "date"];
const NON_NEGATIVE: [&str; 3] = ["total_amount", "total_items", "average_order_value"];

/// Values for both create and write. Never contains `state`.
pub fn to_erp_values(record: &ConsumptionRecord, pushed_at: DateTime<Utc>) -> SyncResult<ErpValues> {
    let totals = record.totals();
    let payment_methods: BTreeMap<&str, f64> = totals
        .payment_methods
        .iter()
        .map(|(method, amount)| (method.as_str(), amount.to_decimal()))
        .collect();

    let mut values = ErpValues::new();
    values.insert("external_id".into(), record.external_id().into());
    values.insert("client_id".into(), record.client_id().into());
    values.insert(
        "location_id".into(),
        record.location_id().map_or(Value::Bool(false), Value::from),
    );
    values.insert("date".into(), record.date().format(DATE_FORMAT).to_string().into());
    values.insert("total_amount".into(), totals.total_amount.to_decimal().into());
    values.insert("total_items".into(), totals.total_items.into());
    values.insert(
        "average_order_value".into(),
        totals.average_order_value.to_decimal().into(),
    );
    values.insert(
        "top_categories".into(),
        serde_json::to_string(&totals.top_categories)?.into(),
    );
    values.insert(
        "payment_methods".into(),
        serde_json::to_string(&payment_methods)?.into(),
    );
    values.insert("sales_count".into(), totals.metadata.sales_count.into());
    values.insert(
        "peak_hour".into(),
        totals.metadata.peak_hour.map_or(Value::Bool(false), Value::from),
    );
    values.insert("customer_count".into(), totals.metadata.customer_count.into());
    values.insert("provider".into(), totals.metadata.provider.clone().into());
    values.insert("sync_source".into(), SYNC_SOURCE.into());
    values.insert(
        "sync_timestamp".into(),
        pushed_at.format(TIMESTAMP_FORMAT).to_string().into(),
    );
    Ok(values)
}

/// [`to_erp_values`] plus the initial workflow state.
pub fn creation_values(values: &ErpValues) -> ErpValues {
    let mut create = values.clone();
    create.insert("state".into(), STATE_DRAFT.into());
    create
}

/// Pre-flight checks run before any network call.
///
/// Returns every problem found, joined into one reason.
pub fn validate(values: &ErpValues) -> Result<(), String> {
    let mut problems = Vec::new();

    for field in REQUIRED_TEXT {
        match values.get(field).and_then(Value::as_str) {
            Some(text) if !text.trim().is_empty() => {}
            _ => problems.push(format!("{} is required", field)),
        }
    }

    if let Some(date) = values.get("date").and_then(Value::as_str) {
        if NaiveDate::parse_from_str(date, DATE_FORMAT).is_err() {
            problems.push(format!("date '{}' is not YYYY-MM-DD", date));
        }
    }

    for field in NON_NEGATIVE {
        match values.get(field).and_then(Value::as_f64) {
            Some(number) if number >= 0.0 => {}
            Some(number) => problems.push(format!("{} is negative ({})", field, number)),
            None => problems.push(format!("{} is required", field)),
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(problems.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::{at, sale};
    use serde_json::json;
    use tupa_core::aggregation::aggregate;
    use tupa_core::Money;

    fn record(location: Option<&str>) -> ConsumptionRecord {
        let mut card = sale("s1", 1000, 2.0);
        card.timestamp = at(9);
        let mut cash = sale("s2", 500, 1.0);
        cash.payment_method = Some("cash".to_string());
        let draft = aggregate("c1", &[card, cash], location, at(18));
        ConsumptionRecord::new(draft, at(18))
    }

    #[test]
    fn test_values_shape() {
        let values = to_erp_values(&record(Some("L1")), at(20)).unwrap();

        assert_eq!(values["external_id"], "tupa_consumption_c1_2024-03-10_L1");
        assert_eq!(values["location_id"], "L1");
        assert_eq!(values["date"], "2024-03-10");
        assert_eq!(values["total_amount"], 15.0);
        assert_eq!(values["total_items"], 3.0);
        assert_eq!(values["average_order_value"], 7.5);
        assert_eq!(values["sales_count"], 2);
        assert_eq!(values["customer_count"], 2);
        assert_eq!(values["provider"], "square");
        assert_eq!(values["sync_source"], "tupa");
        assert_eq!(values["sync_timestamp"], "2024-03-10 20:00:00");
        assert!(!values.contains_key("state"));

        let payments: Value =
            serde_json::from_str(values["payment_methods"].as_str().unwrap()).unwrap();
        assert_eq!(payments, json!({"card": 10.0, "cash": 5.0}));

        let categories: Value =
            serde_json::from_str(values["top_categories"].as_str().unwrap()).unwrap();
        assert_eq!(categories[0]["category"], "Coffee");
    }

    #[test]
    fn test_main_location_and_draft_state() {
        let values = to_erp_values(&record(None), at(20)).unwrap();
        assert_eq!(values["external_id"], "tupa_consumption_c1_2024-03-10_main");
        assert_eq!(values["location_id"], false);

        let create = creation_values(&values);
        assert_eq!(create["state"], STATE_DRAFT);
        assert!(!values.contains_key("state"));
    }

    #[test]
    fn test_validate() {
        let values = to_erp_values(&record(None), at(20)).unwrap();
        assert!(validate(&values).is_ok());

        let mut negative = values.clone();
        negative.insert("total_amount".into(), (-1.5).into());
        let reason = validate(&negative).unwrap_err();
        assert!(reason.contains("total_amount is negative"));

        let mut broken = values.clone();
        broken.insert("date".into(), "10/03/2024".into());
        broken.insert("client_id".into(), " ".into());
        let reason = validate(&broken).unwrap_err();
        assert!(reason.contains("date '10/03/2024'"));
        assert!(reason.contains("client_id is required"));
    }

    #[test]
    fn test_refund_day_fails_validation() {
        let mut refunds = record(None);
        refunds.draft.totals.total_amount = Money::from_cents(-250);
        let values = to_erp_values(&refunds, at(20)).unwrap();
        assert!(validate(&values).is_err());
    }
}
