//! Toast order → [`NormalizedSale`].
//!
//! A Toast order splits into checks; one sale is produced per order by
//! summing its live checks. Amounts are decimal currency and are converted
//! to cents here. Voided or deleted orders, checks and selections are skipped.

use serde_json::{Map, Value};

use crate::error::SyncResult;
use crate::provider::raw::{
    opt_array, opt_number, opt_str, present, req_str, req_timestamp, schema, unwrap_envelope,
};
use tupa_core::{Customer, Money, NormalizedSale, SaleLine, SaleMetadata};

use super::PROVIDER_ID;

/// Maps a bare order array, or `{ "orders": [...] }`.
pub fn map_payload(raw: &Value) -> SyncResult<Vec<NormalizedSale>> {
    map_orders(unwrap_envelope(raw, "orders")?, None)
}

/// `restaurant_guid` is stamped as the sale location.
pub fn map_orders(orders: &[Value], restaurant_guid: Option<&str>) -> SyncResult<Vec<NormalizedSale>> {
    let mut sales = Vec::with_capacity(orders.len());
    for order in orders {
        if let Some(sale) = map_order(order, restaurant_guid)? {
            sales.push(sale);
        }
    }
    Ok(sales)
}

fn is_dead(value: &Value) -> bool {
    let flag = |key| present(value, key).and_then(Value::as_bool).unwrap_or(false);
    flag("voided") || flag("deleted")
}

fn decimal(value: &Value, key: &str, ctx: &str) -> SyncResult<Money> {
    Ok(opt_number(value, key, ctx)?
        .map(Money::from_decimal)
        .unwrap_or_default())
}

fn map_order(order: &Value, restaurant_guid: Option<&str>) -> SyncResult<Option<NormalizedSale>> {
    if !order.is_object() {
        return Err(schema("order", "expected an object"));
    }
    let guid = req_str(order, "guid", "order")?;
    if is_dead(order) {
        return Ok(None);
    }
    let ctx = format!("order {}", guid);

    let timestamp = match present(order, "closedDate") {
        Some(_) => req_timestamp(order, "closedDate", &ctx)?,
        None => req_timestamp(order, "openedDate", &ctx)?,
    };

    let mut amount = Money::zero();
    let mut tax = Money::zero();
    let mut discount = Money::zero();
    let mut items = Vec::new();
    let mut customer = None;
    let mut payment_method = None;

    for (check_no, check) in opt_array(order, "checks", &ctx)?.iter().enumerate() {
        if is_dead(check) {
            continue;
        }
        let check_ctx = format!("{} check {}", ctx, check_no);

        amount += decimal(check, "totalAmount", &check_ctx)?;
        tax += decimal(check, "taxAmount", &check_ctx)?;
        for applied in opt_array(check, "appliedDiscounts", &check_ctx)? {
            discount += decimal(applied, "discountAmount", &check_ctx)?;
        }

        for (sel_no, selection) in opt_array(check, "selections", &check_ctx)?.iter().enumerate() {
            if is_dead(selection) {
                continue;
            }
            items.push(map_selection(selection, &format!("{} selection {}", check_ctx, sel_no))?);
        }

        if customer.is_none() {
            customer = present(check, "customer").map(map_customer);
        }
        if payment_method.is_none() {
            payment_method = opt_array(check, "payments", &check_ctx)?
                .first()
                .and_then(|p| opt_str(p, "type"))
                .map(|kind| kind.to_lowercase());
        }
    }

    let mut extra = Map::new();
    if let Some(number) = present(order, "displayNumber") {
        extra.insert("display_number".into(), number.clone());
    }
    if let Some(source) = opt_str(order, "source") {
        extra.insert("source".into(), Value::String(source));
    }

    Ok(Some(NormalizedSale {
        id: format!("{}_{}", PROVIDER_ID, guid),
        timestamp,
        amount,
        discount,
        tax,
        items,
        customer,
        payment_method,
        pos_transaction_id: guid,
        metadata: SaleMetadata {
            provider: PROVIDER_ID.to_string(),
            location_id: restaurant_guid.map(str::to_string),
            extra,
        },
    }))
}

fn map_selection(selection: &Value, ctx: &str) -> SyncResult<SaleLine> {
    let quantity = opt_number(selection, "quantity", ctx)?.unwrap_or(1.0);
    // Toast `price` is the line total after quantity.
    let total_price = decimal(selection, "price", ctx)?;
    let unit_price = if quantity > 0.0 {
        Money::from_decimal(total_price.to_decimal() / quantity)
    } else {
        total_price
    };

    let category = present(selection, "salesCategory")
        .and_then(|c| opt_str(c, "name"))
        .or_else(|| present(selection, "itemGroup").and_then(|g| opt_str(g, "name")));

    let modifiers = opt_array(selection, "modifiers", ctx)?
        .iter()
        .filter(|m| !is_dead(m))
        .filter_map(|m| opt_str(m, "displayName"))
        .collect();

    Ok(SaleLine {
        name: opt_str(selection, "displayName").unwrap_or_default(),
        quantity,
        unit_price,
        total_price,
        category,
        sku: present(selection, "item").and_then(|i| opt_str(i, "guid")),
        modifiers,
    })
}

fn map_customer(raw: &Value) -> Customer {
    let name = [opt_str(raw, "firstName"), opt_str(raw, "lastName")]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ");

    Customer {
        id: opt_str(raw, "guid"),
        name: Some(name).filter(|n| !n.is_empty()),
        email: opt_str(raw, "email"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn order() -> Value {
        json!({
            "guid": "o-1",
            "displayNumber": "42",
            "openedDate": "2024-03-10T11:30:00.000+0000",
            "closedDate": "2024-03-10T12:15:00.000+0000",
            "checks": [
                {
                    "totalAmount": 21.6,
                    "taxAmount": 1.6,
                    "appliedDiscounts": [{"discountAmount": 2.0}],
                    "customer": {"guid": "cust-1", "firstName": "Ana", "lastName": "Lima", "email": "ana@x.io"},
                    "selections": [
                        {
                            "displayName": "Burger",
                            "quantity": 2,
                            "price": 18.0,
                            "salesCategory": {"name": "Food"},
                            "item": {"guid": "item-burger"},
                            "modifiers": [{"displayName": "No onion"}, {"displayName": "Bacon", "voided": true}]
                        },
                        {"displayName": "Soda", "quantity": 1, "price": 4.0, "itemGroup": {"name": "Drinks"}},
                        {"displayName": "Fries", "quantity": 1, "price": 3.5, "voided": true}
                    ],
                    "payments": [{"type": "CREDIT"}]
                },
                {"totalAmount": 99.0, "voided": true}
            ]
        })
    }

    #[test]
    fn test_map_order_sums_live_checks() {
        let sales = map_orders(&[order()], Some("rest-1")).unwrap();
        assert_eq!(sales.len(), 1);
        let sale = &sales[0];

        assert_eq!(sale.id, "toast_o-1");
        assert_eq!(sale.pos_transaction_id, "o-1");
        assert_eq!(sale.timestamp, Utc.with_ymd_and_hms(2024, 3, 10, 12, 15, 0).unwrap());
        assert_eq!(sale.amount, Money::from_cents(2160));
        assert_eq!(sale.tax, Money::from_cents(160));
        assert_eq!(sale.discount, Money::from_cents(200));
        assert_eq!(sale.payment_method.as_deref(), Some("credit"));
        assert_eq!(sale.metadata.location_id.as_deref(), Some("rest-1"));
        assert_eq!(sale.metadata.extra["display_number"], "42");

        let customer = sale.customer.as_ref().unwrap();
        assert_eq!(customer.id.as_deref(), Some("cust-1"));
        assert_eq!(customer.name.as_deref(), Some("Ana Lima"));

        assert_eq!(sale.items.len(), 2);
        let burger = &sale.items[0];
        assert_eq!(burger.total_price, Money::from_cents(1800));
        assert_eq!(burger.unit_price, Money::from_cents(900));
        assert_eq!(burger.category.as_deref(), Some("Food"));
        assert_eq!(burger.sku.as_deref(), Some("item-burger"));
        assert_eq!(burger.modifiers, vec!["No onion".to_string()]);
        assert_eq!(sale.items[1].category.as_deref(), Some("Drinks"));

        // 18 + 4 - 2 + 1.6 = 21.6
        assert_eq!(sale.reconciliation_gap(), Money::zero());
    }

    #[test]
    fn test_voided_and_deleted_orders_skipped() {
        let mut voided = order();
        voided["voided"] = json!(true);
        let mut deleted = order();
        deleted["deleted"] = json!(true);
        assert!(map_payload(&json!([voided, deleted])).unwrap().is_empty());
    }

    #[test]
    fn test_opened_date_fallback() {
        let mut open = order();
        open.as_object_mut().unwrap().remove("closedDate");
        let sales = map_payload(&json!([open])).unwrap();
        assert_eq!(sales[0].timestamp, Utc.with_ymd_and_hms(2024, 3, 10, 11, 30, 0).unwrap());
    }

    #[test]
    fn test_schema_errors() {
        let mut no_guid = order();
        no_guid.as_object_mut().unwrap().remove("guid");
        assert!(matches!(map_payload(&json!([no_guid])), Err(SyncError::Schema(_))));

        let mut bad_amount = order();
        bad_amount["checks"][0]["totalAmount"] = json!("lots");
        let err = map_payload(&json!([bad_amount])).unwrap_err();
        assert!(err.to_string().contains("order o-1 check 0"));

        let mut bad_checks = order();
        bad_checks["checks"] = json!({"not": "an array"});
        assert!(map_payload(&json!([bad_checks])).is_err());
    }
}
