//! # Pricing
//!
//! Effective unit prices and cart pricing.
//!
//! ## Sale Resolution
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  effective_price(product, now)                                          │
//! │                                                                         │
//! │  sale configured? ──no──► base price                                   │
//! │        │ yes                                                            │
//! │        ▼                                                                │
//! │  start unset or now >= start?  ──no──► base price                      │
//! │        │ yes                                                            │
//! │        ▼                                                                │
//! │  end unset or now < end?       ──no──► base price                      │
//! │        │ yes                                                            │
//! │        ▼                                                                │
//! │  Price(p)    → p                                                        │
//! │  Percent(n)  → floor(base × (100 - n) / 100)                           │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  min(discounted, base)                                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A sale with neither bound set never ends.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::types::{ContentKind, InventoryKind, Product, SaleDiscount};
use crate::validation::{validate_cart_size, validate_quantity, ValidationResult};

// =============================================================================
// Effective Price
// =============================================================================

/// A resolved unit price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PriceQuote {
    pub unit_price: Money,
    pub on_sale: bool,
}

/// Checks whether the product's sale applies at `now`.
pub fn is_sale_active(product: &Product, now: DateTime<Utc>) -> bool {
    if product.sale.is_none() {
        return false;
    }
    let started = product.sale_start_at.map_or(true, |start| now >= start);
    let not_ended = product.sale_end_at.map_or(true, |end| now < end);
    started && not_ended
}

/// Resolves the unit price of a product at `now`.
pub fn effective_price(product: &Product, now: DateTime<Utc>) -> PriceQuote {
    let base = product.base_price;
    let sale = match product.sale {
        Some(sale) if is_sale_active(product, now) => sale,
        _ => {
            return PriceQuote {
                unit_price: base,
                on_sale: false,
            }
        }
    };

    let discounted = match sale {
        SaleDiscount::Price(price) => price,
        SaleDiscount::Percent(percent) => {
            base.percent_floor(100 - i64::from(percent.min(100)))
        }
    };

    PriceQuote {
        unit_price: discounted.min(base),
        on_sale: true,
    }
}

// =============================================================================
// Cart Pricing
// =============================================================================

/// A cart line as submitted by the buyer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CartRequestLine {
    pub product_id: String,
    pub quantity: i64,
}

impl CartRequestLine {
    pub fn new(product_id: impl Into<String>, quantity: i64) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
        }
    }
}

/// A cart line with its resolved price. Ephemeral; never persisted on its own.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PricedLine {
    pub product_id: String,
    pub name: String,
    pub category_id: Option<String>,
    pub content_kind: ContentKind,
    pub inventory_kind: InventoryKind,
    pub quantity: i64,
    pub unit_price: Money,
    pub on_sale: bool,
    pub line_total: Money,
}

/// A fully priced cart.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PricedCart {
    pub lines: Vec<PricedLine>,
    pub subtotal: Money,
}

impl PricedCart {
    /// Total number of units across all lines.
    pub fn unit_count(&self) -> i64 {
        self.lines.iter().map(|line| line.quantity).sum()
    }
}

/// Merges duplicate product lines, preserving first-seen order, and
/// validates the result.
pub fn merge_lines(lines: &[CartRequestLine]) -> ValidationResult<Vec<CartRequestLine>> {
    let mut merged: Vec<CartRequestLine> = Vec::with_capacity(lines.len());

    for line in lines {
        validate_quantity(line.quantity)?;
        match merged.iter_mut().find(|m| m.product_id == line.product_id) {
            Some(existing) => existing.quantity += line.quantity,
            None => merged.push(line.clone()),
        }
    }

    validate_cart_size(merged.len())?;
    for line in &merged {
        validate_quantity(line.quantity)?;
    }

    Ok(merged)
}

/// Prices a cart against a product snapshot.
///
/// ## Errors
/// - Validation errors for empty/oversized carts and bad quantities
/// - `ProductNotFound` when a line references a product missing from `products`
/// - `ProductUnavailable` when a product is unpublished or soft deleted
/// - `OutOfRange` on "order total" when a line or the subtotal overflows
pub fn price_cart(
    lines: &[CartRequestLine],
    products: &HashMap<String, Product>,
    now: DateTime<Utc>,
) -> CoreResult<PricedCart> {
    let merged = merge_lines(lines)?;

    let mut priced = Vec::with_capacity(merged.len());
    for line in merged {
        let product = products
            .get(&line.product_id)
            .ok_or_else(|| CoreError::ProductNotFound(line.product_id.clone()))?;

        if !product.is_purchasable() {
            return Err(CoreError::ProductUnavailable(product.id.clone()));
        }

        let quote = effective_price(product, now);
        let line_total = quote
            .unit_price
            .checked_multiply_quantity(line.quantity)
            .ok_or_else(total_overflow)?;
        priced.push(PricedLine {
            product_id: product.id.clone(),
            name: product.name.clone(),
            category_id: product.category_id.clone(),
            content_kind: product.content_kind,
            inventory_kind: product.inventory_kind,
            quantity: line.quantity,
            unit_price: quote.unit_price,
            on_sale: quote.on_sale,
            line_total,
        });
    }

    let subtotal = priced
        .iter()
        .try_fold(Money::zero(), |acc, line| acc.checked_add(line.line_total))
        .ok_or_else(total_overflow)?;
    Ok(PricedCart {
        lines: priced,
        subtotal,
    })
}

fn total_overflow() -> CoreError {
    ValidationError::OutOfRange {
        field: "order total".to_string(),
        min: 0,
        max: i64::MAX,
    }
    .into()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContentKind, InventoryKind};
    use chrono::Duration;

    fn product(id: &str, base: i64) -> Product {
        let now = Utc::now();
        Product {
            id: id.to_string(),
            name: format!("Product {}", id),
            category_id: Some("software".to_string()),
            base_price: Money::from_idr(base),
            sale: None,
            sale_start_at: None,
            sale_end_at: None,
            content_kind: ContentKind::Keys,
            inventory_kind: InventoryKind::StockBased,
            stock: 10,
            delivered_count: 0,
            has_shared_content: false,
            is_published: true,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_no_sale_returns_base_price() {
        let p = product("a", 100_000);
        let quote = effective_price(&p, Utc::now());
        assert_eq!(quote.unit_price.idr(), 100_000);
        assert!(!quote.on_sale);
    }

    #[test]
    fn test_dates_without_sale_are_ignored() {
        let mut p = product("a", 100_000);
        p.sale_start_at = Some(Utc::now() - Duration::days(1));
        assert!(!is_sale_active(&p, Utc::now()));
    }

    #[test]
    fn test_dateless_sale_never_ends() {
        let mut p = product("a", 100_000);
        p.sale = Some(SaleDiscount::Percent(25));
        let far_future = Utc::now() + Duration::days(3650);
        let quote = effective_price(&p, far_future);
        assert_eq!(quote.unit_price.idr(), 75_000);
        assert!(quote.on_sale);
    }

    #[test]
    fn test_sale_window_is_half_open() {
        let now = Utc::now();
        let mut p = product("a", 100_000);
        p.sale = Some(SaleDiscount::Price(Money::from_idr(80_000)));
        p.sale_start_at = Some(now);
        p.sale_end_at = Some(now + Duration::hours(1));

        assert!(is_sale_active(&p, now));
        assert!(!is_sale_active(&p, now - Duration::seconds(1)));
        assert!(!is_sale_active(&p, now + Duration::hours(1)));
        assert_eq!(effective_price(&p, now).unit_price.idr(), 80_000);
    }

    #[test]
    fn test_percent_sale_floors() {
        let mut p = product("a", 99_999);
        p.sale = Some(SaleDiscount::Percent(15));
        // 99,999 × 85 / 100 = 84,999.15
        assert_eq!(effective_price(&p, Utc::now()).unit_price.idr(), 84_999);
    }

    #[test]
    fn test_sale_price_above_base_is_clamped() {
        let mut p = product("a", 50_000);
        p.sale = Some(SaleDiscount::Price(Money::from_idr(70_000)));
        assert_eq!(effective_price(&p, Utc::now()).unit_price.idr(), 50_000);
    }

    #[test]
    fn test_price_cart_merges_duplicates() {
        let mut products = HashMap::new();
        products.insert("a".to_string(), product("a", 100_000));
        products.insert("b".to_string(), product("b", 25_000));

        let lines = vec![
            CartRequestLine::new("a", 1),
            CartRequestLine::new("b", 2),
            CartRequestLine::new("a", 1),
        ];
        let cart = price_cart(&lines, &products, Utc::now()).unwrap();

        assert_eq!(cart.lines.len(), 2);
        assert_eq!(cart.lines[0].product_id, "a");
        assert_eq!(cart.lines[0].quantity, 2);
        assert_eq!(cart.subtotal.idr(), 250_000);
        assert_eq!(cart.unit_count(), 4);
    }

    #[test]
    fn test_price_cart_rejects_unknown_and_unpurchasable() {
        let mut products = HashMap::new();
        let mut hidden = product("hidden", 10_000);
        hidden.is_published = false;
        products.insert("hidden".to_string(), hidden);

        let missing = price_cart(&[CartRequestLine::new("nope", 1)], &products, Utc::now());
        assert!(matches!(missing, Err(CoreError::ProductNotFound(_))));

        let unavailable = price_cart(&[CartRequestLine::new("hidden", 1)], &products, Utc::now());
        assert!(matches!(unavailable, Err(CoreError::ProductUnavailable(_))));
    }

    #[test]
    fn test_price_cart_rejects_overflowing_totals() {
        let mut products = HashMap::new();
        products.insert("a".to_string(), product("a", i64::MAX / 10));
        products.insert("b".to_string(), product("b", i64::MAX / 2));
        products.insert("c".to_string(), product("c", i64::MAX / 2));

        let line = price_cart(&[CartRequestLine::new("a", 20)], &products, Utc::now());
        assert!(matches!(
            line,
            Err(CoreError::Validation(ValidationError::OutOfRange { .. }))
        ));

        let lines = vec![
            CartRequestLine::new("b", 1),
            CartRequestLine::new("c", 1),
            CartRequestLine::new("a", 1),
        ];
        let subtotal = price_cart(&lines, &products, Utc::now());
        assert!(matches!(
            subtotal,
            Err(CoreError::Validation(ValidationError::OutOfRange { .. }))
        ));
    }

    #[test]
    fn test_price_cart_rejects_bad_input() {
        let products = HashMap::new();
        assert!(matches!(
            price_cart(&[], &products, Utc::now()),
            Err(CoreError::Validation(_))
        ));
        assert!(matches!(
            price_cart(&[CartRequestLine::new("a", 0)], &products, Utc::now()),
            Err(CoreError::Validation(_))
        ));
    }
}
