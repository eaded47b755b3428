//! # Money Module
//!
//! Provides the `Money` type for rupiah amounts.
//!
//! ## Why Integer Rupiah?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  IDR HAS NO MINOR UNIT IN PRACTICE                                      │
//! │                                                                         │
//! │  Every price, discount, balance and ledger amount is a whole number    │
//! │  of rupiah stored as i64. Fractions only appear while computing a      │
//! │  percentage, and those are always FLOORED:                             │
//! │                                                                         │
//! │    99,999 × 15% = 14,999.85  →  14,999                                 │
//! │                                                                         │
//! │  Flooring means a discount is never larger than the exact value, so    │
//! │  the buyer can never be charged less than the posted rules allow.      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use lapak_core::money::Money;
//!
//! let price = Money::from_idr(100_000);
//! let line = price.multiply_quantity(2);
//! assert_eq!(line.idr(), 200_000);
//! assert_eq!(line.percent_floor(10).idr(), 20_000);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};
use ts_rs::TS;

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in whole rupiah.
///
/// ## Design Decisions
/// - **i64 (signed)**: ledger amounts are signed (debits are negative)
/// - **Single field tuple struct**: zero-cost abstraction over i64
/// - **Transparent serde**: serialises as a plain number
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(transparent)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from whole rupiah.
    #[inline]
    pub const fn from_idr(idr: i64) -> Self {
        Money(idr)
    }

    /// Returns the value in whole rupiah.
    #[inline]
    pub const fn idr(&self) -> i64 {
        self.0
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

    /// Checks if the value is positive (greater than zero).
    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Checks if the value is negative (less than zero).
    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Returns the absolute value.
    #[inline]
    pub const fn abs(&self) -> Self {
        Money(self.0.abs())
    }

    /// Multiplies money by a quantity.
    ///
    /// ## Example
    /// ```rust
    /// use lapak_core::money::Money;
    ///
    /// let unit_price = Money::from_idr(25_000);
    /// assert_eq!(unit_price.multiply_quantity(3).idr(), 75_000);
    /// ```
    #[inline]
    pub const fn multiply_quantity(&self, qty: i64) -> Self {
        Money(self.0 * qty)
    }

    /// Like [`Money::multiply_quantity`], but `None` on i64 overflow.
    #[inline]
    pub const fn checked_multiply_quantity(&self, qty: i64) -> Option<Self> {
        match self.0.checked_mul(qty) {
            Some(value) => Some(Money(value)),
            None => None,
        }
    }

    /// Checked addition. `None` on i64 overflow.
    #[inline]
    pub const fn checked_add(&self, other: Money) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(value) => Some(Money(value)),
            None => None,
        }
    }

    /// Returns `floor(self × percent / 100)`.
    ///
    /// Computed in i128 so large carts cannot overflow the intermediate
    /// product. Only meaningful for non-negative amounts and percentages,
    /// which is all the pricing and promo rules ever pass in.
    ///
    /// ## Example
    /// ```rust
    /// use lapak_core::money::Money;
    ///
    /// assert_eq!(Money::from_idr(99_999).percent_floor(15).idr(), 14_999);
    /// ```
    pub fn percent_floor(&self, percent: i64) -> Money {
        let value = (self.0 as i128 * percent as i128).div_euclid(100);
        Money(value as i64)
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Displays amounts the way Indonesian receipts do: `Rp 1.250.000`.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.0.unsigned_abs().to_string();
        let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
        for (i, ch) in digits.chars().enumerate() {
            if i > 0 && (digits.len() - i) % 3 == 0 {
                grouped.push('.');
            }
            grouped.push(ch);
        }
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}Rp {}", sign, grouped)
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

impl Neg for Money {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Money(-self.0)
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
    fn test_from_idr() {
        let money = Money::from_idr(150_000);
        assert_eq!(money.idr(), 150_000);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Money::from_idr(0)), "Rp 0");
        assert_eq!(format!("{}", Money::from_idr(999)), "Rp 999");
        assert_eq!(format!("{}", Money::from_idr(1_000)), "Rp 1.000");
        assert_eq!(format!("{}", Money::from_idr(1_250_000)), "Rp 1.250.000");
        assert_eq!(format!("{}", Money::from_idr(-50_000)), "-Rp 50.000");
    }

    #[test]
    fn test_arithmetic() {
        let a = Money::from_idr(1000);
        let b = Money::from_idr(500);

        assert_eq!((a + b).idr(), 1500);
        assert_eq!((a - b).idr(), 500);
        assert_eq!((-a).idr(), -1000);
        let result: Money = a * 3;
        assert_eq!(result.idr(), 3000);
    }

    #[test]
    fn test_percent_floor_rounds_down() {
        assert_eq!(Money::from_idr(200_000).percent_floor(10).idr(), 20_000);
        assert_eq!(Money::from_idr(99_999).percent_floor(15).idr(), 14_999);
        assert_eq!(Money::from_idr(1).percent_floor(99).idr(), 0);
        assert_eq!(Money::from_idr(12_345).percent_floor(100).idr(), 12_345);
    }

    #[test]
    fn test_percent_floor_large_values_do_not_overflow() {
        let big = Money::from_idr(i64::MAX / 2);
        assert_eq!(big.percent_floor(100), big);
    }

    #[test]
    fn test_default_is_zero() {
        assert_eq!(Money::default(), Money::zero());
    }

    #[test]
    fn test_checked_arithmetic_reports_overflow() {
        let unit = Money::from_idr(25_000);
        assert_eq!(unit.checked_multiply_quantity(3), Some(Money::from_idr(75_000)));
        assert_eq!(unit.checked_add(unit), Some(Money::from_idr(50_000)));

        let huge = Money::from_idr(i64::MAX / 10);
        assert_eq!(huge.checked_multiply_quantity(20), None);
        assert_eq!(Money::from_idr(i64::MAX).checked_add(Money::from_idr(1)), None);
    }

    #[test]
    fn test_sum() {
        let total: Money = [Money::from_idr(1), Money::from_idr(2), Money::from_idr(3)]
            .iter()
            .sum();
        assert_eq!(total.idr(), 6);
    }

    #[test]
    fn test_zero_and_checks() {
        let zero = Money::zero();
        assert!(zero.is_zero());
        assert!(!zero.is_positive());
        assert!(!zero.is_negative());

        let negative = Money::from_idr(-100);
        assert!(negative.is_negative());
        assert_eq!(negative.abs().idr(), 100);
    }
}
