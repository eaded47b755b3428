//! # Promo Engine
//!
//! Validates promo codes and computes their discount over a priced cart.
//!
//! ## Check Order
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  validate(promo, subtotal, cart, now, usage)                            │
//! │                                                                         │
//! │   1. is_active?                      ──no──► Inactive                  │
//! │   2. now >= starts_at?               ──no──► NotStarted                │
//! │   3. now <  ends_at?                 ──no──► Expired                   │
//! │   4. subtotal >= min_subtotal?       ──no──► BelowMinimum              │
//! │   5. usage.global < usage_limit?     ──no──► UsageLimitReached         │
//! │   6. usage.by_user < per_user_limit? ──no──► PerUserLimitReached       │
//! │   7. scope → applicable subtotal                                        │
//! │        ORDER    : whole subtotal                                        │
//! │        CATEGORY : lines whose category is in the set                    │
//! │        PRODUCT  : lines whose product is in the set                     │
//! │      applicable == 0?                ──yes─► NotApplicable             │
//! │   8. PERCENT : floor(applicable × value / 100), capped                 │
//! │      FIXED   : min(value, applicable)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The first failing check wins. The engine is pure: redemption counts are
//! read by the storage layer and passed in.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;

use crate::money::Money;
use crate::pricing::PricedCart;

// =============================================================================
// Promo Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PromoKind {
    /// `value` is a percentage (0-100).
    Percent,
    /// `value` is a fixed rupiah amount.
    Fixed,
}

/// Which part of the cart a promo is computed against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "ids", rename_all = "snake_case")]
pub enum PromoScope {
    Order,
    Category(BTreeSet<String>),
    Product(BTreeSet<String>),
}

/// A promo code definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromoCode {
    pub id: String,
    /// Stored upper-case.
    pub code: String,
    pub kind: PromoKind,
    pub value: i64,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub min_subtotal: Option<Money>,
    /// Only meaningful for PERCENT promos.
    pub max_discount: Option<Money>,
    pub usage_limit: Option<i64>,
    pub per_user_limit: Option<i64>,
    pub is_active: bool,
    pub scope: PromoScope,
}

/// Prior redemptions of a promo.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RedemptionCounts {
    /// Across all users.
    pub global: i64,
    /// By the user checking out.
    pub by_user: i64,
}

/// A successful promo evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PromoApplication {
    pub code: String,
    pub discount: Money,
    /// The part of the subtotal the discount was computed against.
    pub applicable_subtotal: Money,
    /// Product ids of the lines the promo applied to (reporting only).
    pub applied_product_ids: Vec<String>,
}

/// Why a promo code does not apply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PromoRejection {
    #[error("promo code is not active")]
    Inactive,

    #[error("promo code is not valid yet")]
    NotStarted,

    #[error("promo code has expired")]
    Expired,

    #[error("order subtotal must be at least {minimum}")]
    BelowMinimum { minimum: Money },

    #[error("promo code usage limit reached")]
    UsageLimitReached,

    #[error("you have already used this promo code the maximum number of times")]
    PerUserLimitReached,

    #[error("does not apply to any item in cart")]
    NotApplicable,
}

// =============================================================================
// Validation
// =============================================================================

/// Validates `promo` for a cart and computes its discount.
///
/// ## Example
/// ```rust
/// use lapak_core::money::Money;
/// use lapak_core::pricing::PricedCart;
/// use lapak_core::promo::{validate, PromoCode, PromoKind, PromoScope, RedemptionCounts};
///
/// let promo = PromoCode {
///     id: "promo-1".into(),
///     code: "SAVE10".into(),
///     kind: PromoKind::Percent,
///     value: 10,
///     starts_at: None,
///     ends_at: None,
///     min_subtotal: None,
///     max_discount: None,
///     usage_limit: None,
///     per_user_limit: None,
///     is_active: true,
///     scope: PromoScope::Order,
/// };
/// let cart = PricedCart { lines: vec![], subtotal: Money::from_idr(200_000) };
/// let applied = validate(&promo, &cart, chrono::Utc::now(), RedemptionCounts::default()).unwrap();
/// assert_eq!(applied.discount.idr(), 20_000);
/// ```
pub fn validate(
    promo: &PromoCode,
    cart: &PricedCart,
    now: DateTime<Utc>,
    usage: RedemptionCounts,
) -> Result<PromoApplication, PromoRejection> {
    check_eligibility(promo, cart.subtotal, now, usage)?;

    let (applicable, applied_product_ids) = applicable_subtotal(&promo.scope, cart);
    if !applicable.is_positive() {
        return Err(PromoRejection::NotApplicable);
    }

    Ok(PromoApplication {
        code: promo.code.clone(),
        discount: compute_discount(promo, applicable),
        applicable_subtotal: applicable,
        applied_product_ids,
    })
}

/// Runs checks 1-6 (everything except scope).
pub fn check_eligibility(
    promo: &PromoCode,
    subtotal: Money,
    now: DateTime<Utc>,
    usage: RedemptionCounts,
) -> Result<(), PromoRejection> {
    if !promo.is_active {
        return Err(PromoRejection::Inactive);
    }
    if promo.starts_at.is_some_and(|start| now < start) {
        return Err(PromoRejection::NotStarted);
    }
    if promo.ends_at.is_some_and(|end| now >= end) {
        return Err(PromoRejection::Expired);
    }
    if let Some(minimum) = promo.min_subtotal {
        if subtotal < minimum {
            return Err(PromoRejection::BelowMinimum { minimum });
        }
    }
    check_limits(promo, usage)
}

/// Checks the global and per-user redemption limits.
///
/// Settlement calls this again after inserting its own redemption, with the
/// counts seen inside the atomic unit.
pub fn check_limits(promo: &PromoCode, usage: RedemptionCounts) -> Result<(), PromoRejection> {
    if promo.usage_limit.is_some_and(|limit| usage.global >= limit) {
        return Err(PromoRejection::UsageLimitReached);
    }
    if promo.per_user_limit.is_some_and(|limit| usage.by_user >= limit) {
        return Err(PromoRejection::PerUserLimitReached);
    }
    Ok(())
}

/// Sums the lines a scope covers.
fn applicable_subtotal(scope: &PromoScope, cart: &PricedCart) -> (Money, Vec<String>) {
    let covers = |line: &crate::pricing::PricedLine| match scope {
        PromoScope::Order => true,
        PromoScope::Category(ids) => line
            .category_id
            .as_ref()
            .is_some_and(|category| ids.contains(category)),
        PromoScope::Product(ids) => ids.contains(&line.product_id),
    };

    if matches!(scope, PromoScope::Order) {
        let ids = cart.lines.iter().map(|l| l.product_id.clone()).collect();
        return (cart.subtotal, ids);
    }

    let mut total = Money::zero();
    let mut ids = Vec::new();
    for line in cart.lines.iter().filter(|line| covers(line)) {
        total += line.line_total;
        ids.push(line.product_id.clone());
    }
    (total, ids)
}

/// Computes the discount for an applicable subtotal. Never negative, never
/// above the applicable subtotal, never above the cap.
pub fn compute_discount(promo: &PromoCode, applicable: Money) -> Money {
    let raw = match promo.kind {
        PromoKind::Percent => {
            let discount = applicable.percent_floor(promo.value.clamp(0, 100));
            match promo.max_discount {
                Some(cap) => discount.min(cap),
                None => discount,
            }
        }
        PromoKind::Fixed => Money::from_idr(promo.value).min(applicable),
    };
    raw.max(Money::zero()).min(applicable)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::PricedLine;
    use crate::types::{ContentKind, InventoryKind};
    use chrono::Duration;

    fn promo(kind: PromoKind, value: i64) -> PromoCode {
        PromoCode {
            id: "promo-1".to_string(),
            code: "SAVE".to_string(),
            kind,
            value,
            starts_at: None,
            ends_at: None,
            min_subtotal: None,
            max_discount: None,
            usage_limit: None,
            per_user_limit: None,
            is_active: true,
            scope: PromoScope::Order,
        }
    }

    fn line(product_id: &str, category: &str, total: i64) -> PricedLine {
        PricedLine {
            product_id: product_id.to_string(),
            name: product_id.to_string(),
            category_id: Some(category.to_string()),
            content_kind: ContentKind::Keys,
            inventory_kind: InventoryKind::StockBased,
            quantity: 1,
            unit_price: Money::from_idr(total),
            on_sale: false,
            line_total: Money::from_idr(total),
        }
    }

    fn cart(lines: Vec<PricedLine>) -> PricedCart {
        let subtotal = lines.iter().map(|l| l.line_total).sum();
        PricedCart { lines, subtotal }
    }

    #[test]
    fn test_percent_order_scope() {
        let c = cart(vec![line("a", "games", 200_000)]);
        let applied = validate(&promo(PromoKind::Percent, 10), &c, Utc::now(), Default::default())
            .unwrap();
        assert_eq!(applied.discount.idr(), 20_000);
        assert_eq!(applied.applied_product_ids, vec!["a".to_string()]);
    }

    #[test]
    fn test_percent_cap() {
        let mut p = promo(PromoKind::Percent, 50);
        p.max_discount = Some(Money::from_idr(30_000));
        let c = cart(vec![line("a", "games", 200_000)]);
        let applied = validate(&p, &c, Utc::now(), Default::default()).unwrap();
        assert_eq!(applied.discount.idr(), 30_000);
    }

    #[test]
    fn test_fixed_never_exceeds_applicable() {
        let c = cart(vec![line("a", "games", 15_000)]);
        let applied =
            validate(&promo(PromoKind::Fixed, 50_000), &c, Utc::now(), Default::default()).unwrap();
        assert_eq!(applied.discount.idr(), 15_000);
    }

    #[test]
    fn test_category_scope_sums_matching_lines() {
        let mut p = promo(PromoKind::Percent, 10);
        p.scope = PromoScope::Category(BTreeSet::from(["games".to_string()]));
        let c = cart(vec![
            line("a", "games", 100_000),
            line("b", "software", 300_000),
            line("c", "games", 50_000),
        ]);
        let applied = validate(&p, &c, Utc::now(), Default::default()).unwrap();
        assert_eq!(applied.applicable_subtotal.idr(), 150_000);
        assert_eq!(applied.discount.idr(), 15_000);
        assert_eq!(applied.applied_product_ids, vec!["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_product_scope_not_applicable() {
        let mut p = promo(PromoKind::Fixed, 5_000);
        p.scope = PromoScope::Product(BTreeSet::from(["zzz".to_string()]));
        let c = cart(vec![line("a", "games", 100_000)]);
        let err = validate(&p, &c, Utc::now(), Default::default()).unwrap_err();
        assert_eq!(err, PromoRejection::NotApplicable);
        assert_eq!(err.to_string(), "does not apply to any item in cart");
    }

    #[test]
    fn test_checks_short_circuit_in_order() {
        let now = Utc::now();
        let c = cart(vec![line("a", "games", 10_000)]);

        let mut p = promo(PromoKind::Percent, 10);
        p.is_active = false;
        p.ends_at = Some(now - Duration::days(1));
        assert_eq!(validate(&p, &c, now, Default::default()), Err(PromoRejection::Inactive));

        p.is_active = true;
        assert_eq!(validate(&p, &c, now, Default::default()), Err(PromoRejection::Expired));

        p.ends_at = None;
        p.starts_at = Some(now + Duration::days(1));
        assert_eq!(validate(&p, &c, now, Default::default()), Err(PromoRejection::NotStarted));

        p.starts_at = None;
        p.min_subtotal = Some(Money::from_idr(50_000));
        assert!(matches!(
            validate(&p, &c, now, Default::default()),
            Err(PromoRejection::BelowMinimum { .. })
        ));
    }

    #[test]
    fn test_window_end_is_exclusive() {
        let now = Utc::now();
        let mut p = promo(PromoKind::Percent, 10);
        p.starts_at = Some(now);
        p.ends_at = Some(now);
        let c = cart(vec![line("a", "games", 10_000)]);
        assert_eq!(validate(&p, &c, now, Default::default()), Err(PromoRejection::Expired));
    }

    #[test]
    fn test_usage_limits() {
        let mut p = promo(PromoKind::Percent, 10);
        p.usage_limit = Some(5);
        p.per_user_limit = Some(1);
        let c = cart(vec![line("a", "games", 10_000)]);

        let fresh = RedemptionCounts { global: 4, by_user: 0 };
        assert!(validate(&p, &c, Utc::now(), fresh).is_ok());

        let global = RedemptionCounts { global: 5, by_user: 0 };
        assert_eq!(
            validate(&p, &c, Utc::now(), global),
            Err(PromoRejection::UsageLimitReached)
        );

        let user = RedemptionCounts { global: 1, by_user: 1 };
        assert_eq!(
            validate(&p, &c, Utc::now(), user),
            Err(PromoRejection::PerUserLimitReached)
        );
    }

    #[test]
    fn test_discount_bounds_hold_across_values() {
        for value in [-10, 0, 1, 33, 99, 100, 150] {
            for applicable in [1, 999, 100_000, 1_234_567] {
                let applicable = Money::from_idr(applicable);
                for kind in [PromoKind::Percent, PromoKind::Fixed] {
                    let mut p = promo(kind, value);
                    p.max_discount = Some(Money::from_idr(50_000));
                    let discount = compute_discount(&p, applicable);
                    assert!(!discount.is_negative());
                    assert!(discount <= applicable);
                    if kind == PromoKind::Percent {
                        assert!(discount <= Money::from_idr(50_000));
                    }
                }
            }
        }
    }
}
