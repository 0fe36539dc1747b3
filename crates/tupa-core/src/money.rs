//! # Money Module
//!
//! Provides the `Money` type for handling monetary values safely.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │  Summing a day of vendor amounts as f64:                                │
//! │    0.1 + 0.2 = 0.30000000000000004  ❌ WRONG!                           │
//! │                                                                         │
//! │  OUR SOLUTION: Integer Cents                                            │
//! │    Vendors hand us cents (Square) or decimals (Toast).                  │
//! │    Both are converted ONCE at the mapper boundary, summed as i64,       │
//! │    and converted back to decimals ONCE at the ERP boundary.             │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use tupa_core::money::Money;
//!
//! let ticket = Money::from_cents(1099); // 10.99
//! let day = ticket + Money::from_cents(500);
//! assert_eq!(day.cents(), 1599);
//! assert_eq!(day.to_decimal(), 15.99);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};
use ts_rs::TS;

// =============================================================================
// Money Type
// =============================================================================

/// Represents a monetary value in the smallest currency unit (cents).
///
/// ## Design Decisions
/// - **i64 (signed)**: vendors report refunds as negative amounts; validation
///   rejects them, but the type must be able to hold them to say so
/// - **Single field tuple struct**: Zero-cost abstraction over i64
/// - **Serialized as cents**: the SQLite store and report DTOs carry integers
///
/// ## Where Money is Used
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │  Vendor payload ──► Mapper ──► NormalizedSale.amount                    │
/// │                                     │                                   │
/// │                                     ▼                                   │
/// │                          ConsumptionTotals.total_amount                 │
/// │                                     │                                   │
/// │                                     ▼                                   │
/// │                         ERP values (to_decimal, 2 places)               │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from cents (the smallest currency unit).
    ///
    /// ## Example
    /// ```rust
    /// use tupa_core::money::Money;
    ///
    /// let price = Money::from_cents(1099); // Represents 10.99
    /// assert_eq!(price.cents(), 1099);
    /// ```
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Creates a Money value from a decimal currency amount.
    ///
    /// Only for vendor payloads that report decimals. Rounds half away from
    /// zero to the nearest cent.
    ///
    /// ## Example
    /// ```rust
    /// use tupa_core::money::Money;
    ///
    /// assert_eq!(Money::from_decimal(10.99).cents(), 1099);
    /// assert_eq!(Money::from_decimal(0.125).cents(), 13);
    /// assert_eq!(Money::from_decimal(-5.5).cents(), -550);
    /// ```
    pub fn from_decimal(amount: f64) -> Self {
        Money((amount * 100.0).round() as i64)
    }

    /// Returns the value in cents (smallest currency unit).
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns the value as a decimal amount with two places.
    ///
    /// Only for outbound payloads (ERP values) that require decimals.
    #[inline]
    pub fn to_decimal(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Returns the major unit portion.
    #[inline]
    pub const fn major(&self) -> i64 {
        self.0 / 100
    }

    /// Returns the minor unit portion (always 0-99).
    #[inline]
    pub const fn minor(&self) -> i64 {
        (self.0 % 100).abs()
    }

    /// Returns zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    /// Checks if the value is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checks if the value is negative (less than zero).
    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Divides the amount evenly across `count` parts, rounding half away
    /// from zero to the cent. Returns zero when `count` is zero.
    ///
    /// ## Example
    /// ```rust
    /// use tupa_core::money::Money;
    ///
    /// // Average order value of 150.00 over 2 orders
    /// assert_eq!(Money::from_cents(15000).average_over(2).cents(), 7500);
    /// // 10.00 over 3 orders = 3.33
    /// assert_eq!(Money::from_cents(1000).average_over(3).cents(), 333);
    /// // 0.05 over 2 orders = 0.025 -> 0.03
    /// assert_eq!(Money::from_cents(5).average_over(2).cents(), 3);
    /// assert_eq!(Money::from_cents(5).average_over(0).cents(), 0);
    /// ```
    pub fn average_over(&self, count: usize) -> Money {
        if count == 0 {
            return Money::zero();
        }

        // i128 keeps `2 * cents` from overflowing on extreme totals
        let total = self.0 as i128;
        let count = count as i128;
        let rounded = if total >= 0 {
            (2 * total + count) / (2 * count)
        } else {
            -((2 * -total + count) / (2 * count))
        };

        Money(rounded as i64)
    }

    /// Multiplies money by a quantity.
    #[inline]
    pub const fn multiply_quantity(&self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Display implementation shows money as a plain two-place decimal.
///
/// ## Note
/// Currency symbols are the dashboard's job; logs just need the number.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}{}.{:02}", sign, self.major().abs(), self.minor())
    }
}

/// Default money is zero.
impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

/// Multiplication by i64 (for quantity calculations).
impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), Add::add)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_cents() {
        let money = Money::from_cents(1099);
        assert_eq!(money.cents(), 1099);
        assert_eq!(money.major(), 10);
        assert_eq!(money.minor(), 99);
    }

    #[test]
    fn test_from_decimal_rounds_to_cent() {
        assert_eq!(Money::from_decimal(12.346).cents(), 1235);
        assert_eq!(Money::from_decimal(0.1 + 0.2).cents(), 30);
        assert_eq!(Money::from_decimal(0.0).cents(), 0);
    }

    #[test]
    fn test_display() {
        assert_eq!(Money::from_cents(1099).to_string(), "10.99");
        assert_eq!(Money::from_cents(500).to_string(), "5.00");
        assert_eq!(Money::from_cents(-550).to_string(), "-5.50");
        assert_eq!(Money::from_cents(0).to_string(), "0.00");
    }

    #[test]
    fn test_arithmetic() {
        let a = Money::from_cents(1000);
        let b = Money::from_cents(500);

        assert_eq!((a + b).cents(), 1500);
        assert_eq!((a - b).cents(), 500);
        assert_eq!((a * 3).cents(), 3000);
    }

    #[test]
    fn test_sum() {
        let amounts = vec![Money::from_cents(10000), Money::from_cents(5000)];
        let total: Money = amounts.iter().sum();
        assert_eq!(total.cents(), 15000);

        let empty: Vec<Money> = Vec::new();
        assert!(empty.into_iter().sum::<Money>().is_zero());
    }

    #[test]
    fn test_average_over_rounding() {
        assert_eq!(Money::from_cents(15000).average_over(2).cents(), 7500);
        assert_eq!(Money::from_cents(1000).average_over(3).cents(), 333);
        assert_eq!(Money::from_cents(2000).average_over(3).cents(), 667);
        assert_eq!(Money::from_cents(-5).average_over(2).cents(), -3);
    }

    #[test]
    fn test_to_decimal() {
        assert_eq!(Money::from_cents(7500).to_decimal(), 75.0);
        assert_eq!(Money::from_cents(1).to_decimal(), 0.01);
    }
}
