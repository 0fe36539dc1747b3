//! Square order → [`NormalizedSale`].
//!
//! Square reports money as integer minor units (`{"amount": 1250,
//! "currency": "USD"}`), so amounts map to cents without rounding.
//! Orders whose `state` is anything other than `COMPLETED` are dropped.

use serde_json::{Map, Value};

use crate::error::SyncResult;
use crate::provider::raw::{
    opt_array, opt_number, opt_str, present, req_str, req_timestamp, schema, unwrap_envelope,
};
use tupa_core::{Customer, Money, NormalizedSale, SaleLine, SaleMetadata};

use super::PROVIDER_ID;

const COMPLETED: &str = "COMPLETED";

/// Maps a `{ "orders": [...] }` envelope or a bare order array.
pub fn map_payload(raw: &Value) -> SyncResult<Vec<NormalizedSale>> {
    map_orders(unwrap_envelope(raw, "orders")?)
}

pub fn map_orders(orders: &[Value]) -> SyncResult<Vec<NormalizedSale>> {
    let mut sales = Vec::with_capacity(orders.len());
    for order in orders {
        if let Some(sale) = map_order(order)? {
            sales.push(sale);
        }
    }
    Ok(sales)
}

fn map_order(order: &Value) -> SyncResult<Option<NormalizedSale>> {
    if !order.is_object() {
        return Err(schema("order", "expected an object"));
    }
    let order_id = req_str(order, "id", "order")?;
    let ctx = format!("order {}", order_id);

    if let Some(state) = opt_str(order, "state") {
        if state != COMPLETED {
            return Ok(None);
        }
    }

    let timestamp = match present(order, "closed_at") {
        Some(_) => req_timestamp(order, "closed_at", &ctx)?,
        None => req_timestamp(order, "created_at", &ctx)?,
    };

    let amount = money(order, "total_money", &ctx)?
        .ok_or_else(|| schema(&ctx, "missing 'total_money'"))?;

    let mut items = Vec::new();
    for (index, line) in opt_array(order, "line_items", &ctx)?.iter().enumerate() {
        items.push(map_line(line, &format!("{} line {}", ctx, index))?);
    }

    let customer = opt_str(order, "customer_id").map(|id| Customer {
        id: Some(id),
        name: None,
        email: None,
    });

    let payment_method = opt_array(order, "tenders", &ctx)?
        .first()
        .and_then(|tender| opt_str(tender, "type"))
        .map(|kind| kind.to_lowercase());

    let mut extra = Map::new();
    if let Some(state) = opt_str(order, "state") {
        extra.insert("state".into(), Value::String(state));
    }
    if let Some(source) = present(order, "source").and_then(|s| opt_str(s, "name")) {
        extra.insert("source".into(), Value::String(source));
    }

    Ok(Some(NormalizedSale {
        id: format!("{}_{}", PROVIDER_ID, order_id),
        timestamp,
        amount,
        discount: money(order, "total_discount_money", &ctx)?.unwrap_or_default(),
        tax: money(order, "total_tax_money", &ctx)?.unwrap_or_default(),
        items,
        customer,
        payment_method,
        pos_transaction_id: order_id,
        metadata: SaleMetadata {
            provider: PROVIDER_ID.to_string(),
            location_id: opt_str(order, "location_id"),
            extra,
        },
    }))
}

fn map_line(line: &Value, ctx: &str) -> SyncResult<SaleLine> {
    let quantity = opt_number(line, "quantity", ctx)?
        .ok_or_else(|| schema(ctx, "missing 'quantity'"))?;
    let unit_price = money(line, "base_price_money", ctx)?.unwrap_or_default();
    let total_price = match money(line, "total_money", ctx)? {
        Some(total) => total,
        None => Money::from_decimal(unit_price.to_decimal() * quantity),
    };

    let modifiers = opt_array(line, "modifiers", ctx)?
        .iter()
        .filter_map(|m| opt_str(m, "name"))
        .collect();

    Ok(SaleLine {
        name: opt_str(line, "name").unwrap_or_default(),
        quantity,
        unit_price,
        total_price,
        category: opt_str(line, "category_name"),
        sku: opt_str(line, "catalog_object_id"),
        modifiers,
    })
}

/// Reads a Square money object (`{"amount": <minor units>}`).
fn money(value: &Value, key: &str, ctx: &str) -> SyncResult<Option<Money>> {
    let Some(obj) = present(value, key) else {
        return Ok(None);
    };
    let cents = opt_number(obj, "amount", ctx)?
        .ok_or_else(|| schema(ctx, format!("'{}' has no amount", key)))?;
    Ok(Some(Money::from_cents(cents.round() as i64)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn order() -> Value {
        json!({
            "id": "ORD1",
            "location_id": "L1",
            "state": "COMPLETED",
            "created_at": "2024-03-10T11:58:00Z",
            "closed_at": "2024-03-10T12:00:00Z",
            "customer_id": "CUST9",
            "total_money": {"amount": 1100, "currency": "USD"},
            "total_discount_money": {"amount": 100, "currency": "USD"},
            "total_tax_money": {"amount": 0, "currency": "USD"},
            "line_items": [
                {
                    "name": "Latte",
                    "quantity": "2",
                    "base_price_money": {"amount": 450},
                    "total_money": {"amount": 900},
                    "category_name": "Coffee",
                    "catalog_object_id": "SKU-LATTE",
                    "modifiers": [{"name": "Oat milk"}]
                },
                {
                    "name": "Cookie",
                    "quantity": "1",
                    "base_price_money": {"amount": 300}
                }
            ],
            "tenders": [{"type": "CARD"}],
            "source": {"name": "Register"}
        })
    }

    #[test]
    fn test_map_completed_order() {
        let sales = map_payload(&json!({"orders": [order()]})).unwrap();
        assert_eq!(sales.len(), 1);

        let sale = &sales[0];
        assert_eq!(sale.id, "square_ORD1");
        assert_eq!(sale.pos_transaction_id, "ORD1");
        assert_eq!(sale.timestamp, Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap());
        assert_eq!(sale.amount, Money::from_cents(1100));
        assert_eq!(sale.discount, Money::from_cents(100));
        assert_eq!(sale.payment_method.as_deref(), Some("card"));
        assert_eq!(sale.customer_id(), Some("CUST9"));
        assert_eq!(sale.metadata.provider, "square");
        assert_eq!(sale.metadata.location_id.as_deref(), Some("L1"));
        assert_eq!(sale.metadata.extra["source"], "Register");

        assert_eq!(sale.items.len(), 2);
        assert_eq!(sale.items[0].quantity, 2.0);
        assert_eq!(sale.items[0].unit_price, Money::from_cents(450));
        assert_eq!(sale.items[0].category.as_deref(), Some("Coffee"));
        assert_eq!(sale.items[0].modifiers, vec!["Oat milk".to_string()]);
        // total_money missing: unit × quantity
        assert_eq!(sale.items[1].total_price, Money::from_cents(300));
        assert_eq!(sale.reconciliation_gap(), Money::zero());
    }

    #[test]
    fn test_open_and_canceled_orders_dropped() {
        let mut open = order();
        open["state"] = json!("OPEN");
        let mut canceled = order();
        canceled["state"] = json!("CANCELED");
        let mut stateless = order();
        stateless.as_object_mut().unwrap().remove("state");

        let sales = map_orders(&[open, canceled, stateless]).unwrap();
        assert_eq!(sales.len(), 1);
    }

    #[test]
    fn test_bare_array_accepted() {
        assert_eq!(map_payload(&json!([order(), order()])).unwrap().len(), 2);
    }

    #[test]
    fn test_schema_errors() {
        let mut no_total = order();
        no_total.as_object_mut().unwrap().remove("total_money");
        assert!(matches!(map_orders(&[no_total]), Err(SyncError::Schema(_))));

        let mut bad_time = order();
        bad_time["closed_at"] = json!("last tuesday");
        let err = map_orders(&[bad_time]).unwrap_err();
        assert!(err.to_string().contains("order ORD1"));

        let mut bad_qty = order();
        bad_qty["line_items"][0]["quantity"] = json!("two");
        assert!(map_orders(&[bad_qty]).is_err());

        assert!(map_orders(&[json!("ORD1")]).is_err());
    }
}
