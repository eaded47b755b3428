//! # Error Types
//!
//! Domain-specific error types for lapak-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  lapak-core errors (this file)                                         │
//! │  ├── CoreError        - Business rule violations                       │
//! │  ├── ValidationError  - Input validation failures                      │
//! │  └── PromoRejection   - Why a promo code does not apply (promo.rs)     │
//! │                                                                         │
//! │  lapak-db errors (separate crate)                                      │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  lapak-checkout errors                                                 │
//! │  └── CheckoutError    - What callers see, with an ErrorCategory        │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → CheckoutError           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::allocation::{CipherError, LinkError};
use crate::money::Money;
use crate::promo::PromoRejection;

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
///
/// These errors represent business rule violations or detected corruption.
/// Checkout sorts them into user-facing and operator-facing categories.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Product cannot be found.
    ///
    /// ## When This Occurs
    /// - Product ID doesn't exist in database
    /// - Product was soft deleted
    #[error("Product not found: {0}")]
    ProductNotFound(String),

    /// Product exists but cannot be bought (unpublished or deleted).
    #[error("Product {0} is not available for purchase")]
    ProductUnavailable(String),

    /// Not enough stock to deliver the requested quantity.
    ///
    /// ## When This Occurs
    /// - Two buyers raced for the last keys and this one lost
    /// - A source-code product has no file configured (available 0)
    ///
    /// ```text
    /// Checkout (qty: 5)
    ///      │
    ///      ▼
    /// UPDATE ... SET stock = stock - 5 WHERE stock >= 5   → 0 rows
    ///      │
    ///      ▼
    /// InsufficientStock { product_id, available: 3, requested: 5 }
    /// ```
    #[error("Insufficient stock for {product_id}: available {available}, requested {requested}")]
    InsufficientStock {
        product_id: String,
        available: i64,
        requested: i64,
    },

    /// Wallet balance does not cover the order total.
    #[error("Insufficient balance: available {available}, required {required}")]
    InsufficientBalance { available: Money, required: Money },

    /// Account was frozen after a ledger mismatch; debits are blocked.
    #[error("Balance account {0} is frozen pending reconciliation")]
    AccountFrozen(String),

    /// Cached balance disagrees with the ledger sum.
    ///
    /// ## When This Occurs
    /// Only on data corruption or an out-of-band write. The account is frozen
    /// and an operator must reconcile it.
    #[error("Ledger mismatch for {user_id}: cached {cached}, ledger {ledger}")]
    LedgerMismatch {
        user_id: String,
        cached: Money,
        ledger: Money,
    },

    /// Stock counter disagrees with the stored item list.
    #[error("Stock mismatch for {product_id}: counter {counter}, items {items}")]
    StockMismatch {
        product_id: String,
        counter: i64,
        items: i64,
    },

    /// Promo code was found but does not apply.
    #[error("Promo code rejected: {0}")]
    Promo(#[from] PromoRejection),

    /// Promo code does not exist.
    #[error("Promo code not found: {0}")]
    PromoNotFound(String),

    /// Order not found.
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    /// Order is not in a state that allows the requested operation.
    ///
    /// ## When This Occurs
    /// - Cancelling an order that was already settled
    /// - Refunding an order that never delivered
    #[error("Order {order_id} is {current_status}, cannot perform operation")]
    InvalidOrderStatus {
        order_id: String,
        current_status: String,
    },

    /// Secret storage could not encrypt or decrypt a stored value.
    #[error("Secret storage failure: {0}")]
    Secret(#[from] CipherError),

    /// The download-link issuer failed.
    #[error("Download link failure: {0}")]
    DownloadLink(#[from] LinkError),

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Whether the error reflects a detected data inconsistency.
    pub fn is_consistency_violation(&self) -> bool {
        matches!(
            self,
            CoreError::LedgerMismatch { .. } | CoreError::StockMismatch { .. }
        )
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These errors occur when caller input doesn't meet requirements.
/// Used for early validation before any storage is touched.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., invalid UUID, invalid promo code characters).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },

    /// Cart has too many distinct lines.
    #[error("Cart cannot have more than {max} lines")]
    CartTooLarge { max: usize },

    /// Cart has no lines.
    #[error("Cart is empty")]
    EmptyCart,
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
