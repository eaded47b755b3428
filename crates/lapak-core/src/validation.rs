//! # Validation Module
//!
//! Input validation utilities for Lapak.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: HTTP layer (out of this workspace)                           │
//! │  └── DTO shape checks                                                   │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: CheckoutService (Rust)                                       │
//! │  └── THIS MODULE: cart, quantity, promo code, amount rules             │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── CHECK constraints (stock >= 0, balance >= 0)                      │
//! │  ├── UNIQUE constraints (promo code, redemption per order)             │
//! │  └── Foreign key constraints                                           │
//! │                                                                         │
//! │  Everything here runs before any row is touched.                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use lapak_core::validation::{normalize_promo_code, validate_quantity};
//!
//! assert_eq!(normalize_promo_code(" save10 ").unwrap(), "SAVE10");
//! assert!(validate_quantity(5).is_ok());
//! ```

use crate::error::ValidationError;
use crate::{MAX_AMOUNT_IDR, MAX_CART_LINES, MAX_ITEM_QUANTITY};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Longest accepted promo code.
pub const MAX_PROMO_CODE_LEN: usize = 32;

// =============================================================================
// String Validators
// =============================================================================

/// Validates and normalises a promo code.
///
/// ## Rules
/// - Must not be empty after trimming
/// - At most 32 characters
/// - Only ASCII letters, digits, hyphens and underscores
///
/// Codes are case-insensitive; the returned value is upper-cased, which is
/// how codes are stored.
pub fn normalize_promo_code(code: &str) -> ValidationResult<String> {
    let code = code.trim();

    if code.is_empty() {
        return Err(ValidationError::Required {
            field: "promo code".to_string(),
        });
    }

    if code.len() > MAX_PROMO_CODE_LEN {
        return Err(ValidationError::TooLong {
            field: "promo code".to_string(),
            max: MAX_PROMO_CODE_LEN,
        });
    }

    if !code
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: "promo code".to_string(),
            reason: "must contain only letters, numbers, hyphens, and underscores".to_string(),
        });
    }

    Ok(code.to_ascii_uppercase())
}

/// Validates a user id handed over by the authentication layer.
///
/// Ids are opaque to this workspace, so only emptiness and length are checked.
pub fn validate_user_id(user_id: &str) -> ValidationResult<()> {
    let user_id = user_id.trim();

    if user_id.is_empty() {
        return Err(ValidationError::Required {
            field: "user id".to_string(),
        });
    }

    if user_id.len() > 128 {
        return Err(ValidationError::TooLong {
            field: "user id".to_string(),
            max: 128,
        });
    }

    Ok(())
}

/// Validates a product name.
///
/// ## Rules
/// - Must not be empty
/// - Must be between 1 and 200 characters
pub fn validate_product_name(name: &str) -> ValidationResult<()> {
    let name = name.trim();

    if name.is_empty() {
        return Err(ValidationError::Required {
            field: "name".to_string(),
        });
    }

    if name.len() > 200 {
        return Err(ValidationError::TooLong {
            field: "name".to_string(),
            max: 200,
        });
    }

    Ok(())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a quantity value.
///
/// ## Rules
/// - Must be positive (> 0)
/// - Must not exceed MAX_ITEM_QUANTITY
///
/// ```text
/// validate_quantity(qty)
///      │
///      ├── qty <= 0?   → "quantity must be positive"
///      ├── qty > 100?  → "quantity must be between 1 and 100"
///      └── OK
/// ```
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if qty > MAX_ITEM_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_ITEM_QUANTITY,
        });
    }

    Ok(())
}

/// Validates a price in rupiah. Zero is allowed (free items).
pub fn validate_price_idr(idr: i64) -> ValidationResult<()> {
    if !(0..=MAX_AMOUNT_IDR).contains(&idr) {
        return Err(ValidationError::OutOfRange {
            field: "price".to_string(),
            min: 0,
            max: MAX_AMOUNT_IDR,
        });
    }

    Ok(())
}

/// Validates a top-up or refund amount in rupiah. Must be positive.
pub fn validate_credit_amount(idr: i64) -> ValidationResult<()> {
    if idr <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "amount".to_string(),
        });
    }

    if idr > MAX_AMOUNT_IDR {
        return Err(ValidationError::OutOfRange {
            field: "amount".to_string(),
            min: 1,
            max: MAX_AMOUNT_IDR,
        });
    }

    Ok(())
}

/// Validates a percentage (sale percent, promo percent).
pub fn validate_percent(field: &str, percent: i64) -> ValidationResult<()> {
    if !(0..=100).contains(&percent) {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min: 0,
            max: 100,
        });
    }

    Ok(())
}

// =============================================================================
// Collection Validators
// =============================================================================

/// Validates cart size (number of distinct lines).
pub fn validate_cart_size(lines: usize) -> ValidationResult<()> {
    if lines == 0 {
        return Err(ValidationError::EmptyCart);
    }

    if lines > MAX_CART_LINES {
        return Err(ValidationError::CartTooLarge {
            max: MAX_CART_LINES,
        });
    }

    Ok(())
}

// =============================================================================
// UUID Validators
// =============================================================================

/// Validates a UUID string format.
///
/// ## Example
/// ```rust
/// use lapak_core::validation::validate_uuid;
///
/// assert!(validate_uuid("550e8400-e29b-41d4-a716-446655440000").is_ok());
/// assert!(validate_uuid("not-a-uuid").is_err());
/// ```
pub fn validate_uuid(id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "id".to_string(),
        });
    }

    uuid::Uuid::parse_str(id).map_err(|_| ValidationError::InvalidFormat {
        field: "id".to_string(),
        reason: "must be a valid UUID".to_string(),
    })?;

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_promo_code() {
        assert_eq!(normalize_promo_code("save10").unwrap(), "SAVE10");
        assert_eq!(normalize_promo_code("  Ramadan_25 ").unwrap(), "RAMADAN_25");

        assert!(normalize_promo_code("").is_err());
        assert!(normalize_promo_code("   ").is_err());
        assert!(normalize_promo_code("has space").is_err());
        assert!(normalize_promo_code("DISKON%").is_err());
        assert!(normalize_promo_code(&"A".repeat(33)).is_err());
    }

    #[test]
    fn test_validate_user_id() {
        assert!(validate_user_id("user-1").is_ok());
        assert!(validate_user_id(" ").is_err());
        assert!(validate_user_id(&"u".repeat(129)).is_err());
    }

    #[test]
    fn test_validate_product_name() {
        assert!(validate_product_name("Windows 11 Pro Key").is_ok());
        assert!(validate_product_name("").is_err());
        assert!(validate_product_name(&"A".repeat(300)).is_err());
    }

    #[test]
    fn test_validate_quantity() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(MAX_ITEM_QUANTITY).is_ok());

        assert!(validate_quantity(0).is_err());
        assert!(validate_quantity(-1).is_err());
        assert!(validate_quantity(MAX_ITEM_QUANTITY + 1).is_err());
    }

    #[test]
    fn test_validate_amounts() {
        assert!(validate_price_idr(0).is_ok());
        assert!(validate_price_idr(-1).is_err());
        assert!(validate_price_idr(MAX_AMOUNT_IDR).is_ok());
        assert!(validate_price_idr(MAX_AMOUNT_IDR + 1).is_err());
        assert!(validate_price_idr(i64::MAX / 10).is_err());
        assert!(validate_credit_amount(1).is_ok());
        assert!(validate_credit_amount(0).is_err());
        assert!(validate_credit_amount(MAX_AMOUNT_IDR + 1).is_err());
        assert!(validate_percent("sale percent", 100).is_ok());
        assert!(validate_percent("sale percent", 101).is_err());
        assert!(validate_percent("sale percent", -1).is_err());
    }

    #[test]
    fn test_validate_cart_size() {
        assert!(matches!(validate_cart_size(0), Err(ValidationError::EmptyCart)));
        assert!(validate_cart_size(1).is_ok());
        assert!(validate_cart_size(MAX_CART_LINES).is_ok());
        assert!(matches!(
            validate_cart_size(MAX_CART_LINES + 1),
            Err(ValidationError::CartTooLarge { .. })
        ));
    }

    #[test]
    fn test_validate_uuid() {
        assert!(validate_uuid("550e8400-e29b-41d4-a716-446655440000").is_ok());
        assert!(validate_uuid("").is_err());
        assert!(validate_uuid("123").is_err());
    }
}
