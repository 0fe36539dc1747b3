//! # Aggregation Module
//!
//! Rolls a batch of normalized sales into one daily consumption summary.
//!
//! ## Data Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  sales[] (validated)                                                    │
//! │       │                                                                 │
//! │       ├──► total_amount        Σ amount                                 │
//! │       ├──► total_items         Σ item quantity                          │
//! │       ├──► average_order_value total / count (half away from zero)      │
//! │       ├──► top_categories      5 highest Σ quantity, first-seen ties    │
//! │       ├──► payment_methods     method → Σ amount ("unknown" default)    │
//! │       ├──► peak_hour           UTC hour with most sales, first-seen ties│
//! │       └──► customer_count      distinct customer ids                    │
//! │                                                                         │
//! │  Output depends only on the input set and `now`.                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The record date is the date of `now`, not of the sales themselves.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Timelike, Utc};

use crate::money::Money;
use crate::types::{
    CategoryTotal, ConsumptionDraft, ConsumptionMetadata, ConsumptionTotals, NormalizedSale,
};
use crate::{MAX_TOP_CATEGORIES, UNCATEGORIZED, UNKNOWN_PAYMENT_METHOD, UNKNOWN_PROVIDER};

/// Computes the derived fields of a consumption record.
///
/// ## Example
/// ```rust
/// use chrono::Utc;
/// use tupa_core::aggregation::summarize;
///
/// let totals = summarize(&[], Utc::now());
/// assert!(totals.total_amount.is_zero());
/// assert!(totals.average_order_value.is_zero());
/// assert_eq!(totals.metadata.peak_hour, None);
/// ```
pub fn summarize(sales: &[NormalizedSale], now: DateTime<Utc>) -> ConsumptionTotals {
    let total_amount: Money = sales.iter().map(|s| s.amount).sum();
    let total_items: f64 = sales.iter().map(NormalizedSale::item_count).sum();

    ConsumptionTotals {
        total_amount,
        total_items,
        average_order_value: total_amount.average_over(sales.len()),
        top_categories: top_categories(sales),
        payment_methods: payment_methods(sales),
        metadata: ConsumptionMetadata {
            provider: provider_of(sales),
            sync_timestamp: now,
            sales_count: sales.len(),
            peak_hour: peak_hour(sales),
            customer_count: customer_count(sales),
        },
    }
}

/// Builds the consumption draft for `client_id` dated at `now`.
pub fn aggregate(
    client_id: &str,
    sales: &[NormalizedSale],
    location_id: Option<&str>,
    now: DateTime<Utc>,
) -> ConsumptionDraft {
    ConsumptionDraft {
        client_id: client_id.to_string(),
        location_id: location_id.map(str::to_string),
        date: now.date_naive(),
        totals: summarize(sales, now),
    }
}

fn top_categories(sales: &[NormalizedSale]) -> Vec<CategoryTotal> {
    // Insertion order is first-seen order; the stable sort keeps it for ties.
    let mut ranked: Vec<CategoryTotal> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for item in sales.iter().flat_map(|s| s.items.iter()) {
        let category = item
            .category
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(UNCATEGORIZED);

        match index.get(category) {
            Some(&i) => ranked[i].quantity += item.quantity,
            None => {
                index.insert(category.to_string(), ranked.len());
                ranked.push(CategoryTotal {
                    category: category.to_string(),
                    quantity: item.quantity,
                });
            }
        }
    }

    ranked.sort_by(|a, b| b.quantity.total_cmp(&a.quantity));
    ranked.truncate(MAX_TOP_CATEGORIES);
    ranked
}

fn payment_methods(sales: &[NormalizedSale]) -> BTreeMap<String, Money> {
    let mut methods: BTreeMap<String, Money> = BTreeMap::new();
    for sale in sales {
        let method = sale
            .payment_method
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(UNKNOWN_PAYMENT_METHOD);
        *methods.entry(method.to_string()).or_default() += sale.amount;
    }
    methods
}

fn peak_hour(sales: &[NormalizedSale]) -> Option<u32> {
    let mut counts: Vec<(u32, usize)> = Vec::new();
    for sale in sales {
        let hour = sale.timestamp.hour();
        match counts.iter_mut().find(|(h, _)| *h == hour) {
            Some((_, count)) => *count += 1,
            None => counts.push((hour, 1)),
        }
    }

    let mut best: Option<(u32, usize)> = None;
    for (hour, count) in counts {
        if best.map_or(true, |(_, top)| count > top) {
            best = Some((hour, count));
        }
    }
    best.map(|(hour, _)| hour)
}

fn customer_count(sales: &[NormalizedSale]) -> usize {
    sales
        .iter()
        .filter_map(NormalizedSale::customer_id)
        .collect::<HashSet<_>>()
        .len()
}

fn provider_of(sales: &[NormalizedSale]) -> String {
    sales
        .iter()
        .map(|s| s.metadata.provider.as_str())
        .find(|p| !p.is_empty())
        .unwrap_or(UNKNOWN_PROVIDER)
        .to_string()
}

// =============================================================================
// Unit Tests
// =============================================================================
