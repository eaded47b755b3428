//! # Checkout Error Types
//!
//! Error types surfaced to callers of the checkout service.
//!
//! ## Error Categories
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Checkout Error Categories                           │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │   Validation    │  │  Business Rule  │  │  External Dependency    │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  bad cart       │  │  promo rejected │  │  gateway down           │ │
//! │  │  unknown promo  │  │  out of stock   │  │  gateway timeout        │ │
//! │  │  unknown product│  │  low balance    │  │  (order marked FAILED)  │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐                              │
//! │  │   Consistency   │  │    Internal     │   not user facing:           │
//! │  │                 │  │                 │   log, alert, reconcile      │
//! │  │  ledger mismatch│  │  database       │                              │
//! │  │  stock mismatch │  │  cipher / links │                              │
//! │  └─────────────────┘  └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//! Every category except the last two leaves no partial effect behind.

use lapak_core::{CoreError, ValidationError};
use lapak_db::DbError;
use serde::Serialize;
use thiserror::Error;

use crate::gateway::GatewayError;

/// Result type alias for checkout operations.
pub type CheckoutResult<T> = Result<T, CheckoutError>;

/// Caller-facing error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    BusinessRule,
    ExternalDependency,
    Consistency,
    Internal,
}

#[derive(Debug, Error)]
pub enum CheckoutError {
    /// A rule from the domain layer (stock, balance, promo, validation).
    #[error(transparent)]
    Domain(#[from] CoreError),

    /// The payment gateway failed, rejected the request, or timed out.
    #[error("Payment gateway failure: {0}")]
    Gateway(#[from] GatewayError),

    /// Database failure not caused by a domain rule.
    #[error("Database error: {0}")]
    Database(DbError),

    /// Download link could not be verified or used.
    #[error("Download link rejected: {0}")]
    LinkRejected(String),

    /// Too many attempts on one download link in the current window.
    #[error("Too many download attempts, try again later")]
    TooManyAttempts,
}

impl From<DbError> for CheckoutError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Domain(core) => CheckoutError::Domain(core),
            other => CheckoutError::Database(other),
        }
    }
}

impl From<ValidationError> for CheckoutError {
    fn from(err: ValidationError) -> Self {
        CheckoutError::Domain(CoreError::Validation(err))
    }
}

impl CheckoutError {
    /// Maps the error onto the caller-facing taxonomy.
    pub fn category(&self) -> ErrorCategory {
        match self {
            CheckoutError::Domain(core) => match core {
                CoreError::Validation(_)
                | CoreError::ProductNotFound(_)
                | CoreError::PromoNotFound(_)
                | CoreError::OrderNotFound(_) => ErrorCategory::Validation,
                CoreError::ProductUnavailable(_)
                | CoreError::InsufficientStock { .. }
                | CoreError::InsufficientBalance { .. }
                | CoreError::AccountFrozen(_)
                | CoreError::Promo(_)
                | CoreError::InvalidOrderStatus { .. } => ErrorCategory::BusinessRule,
                CoreError::LedgerMismatch { .. } | CoreError::StockMismatch { .. } => {
                    ErrorCategory::Consistency
                }
                CoreError::Secret(_) | CoreError::DownloadLink(_) => ErrorCategory::Internal,
            },
            CheckoutError::Gateway(_) => ErrorCategory::ExternalDependency,
            CheckoutError::Database(_) => ErrorCategory::Internal,
            CheckoutError::LinkRejected(_) => ErrorCategory::Validation,
            CheckoutError::TooManyAttempts => ErrorCategory::BusinessRule,
        }
    }

    /// Whether the message can be shown to the buyer as-is.
    pub fn is_user_facing(&self) -> bool {
        !matches!(
            self.category(),
            ErrorCategory::Consistency | ErrorCategory::Internal
        )
    }

    /// Returns the domain error, if this is one.
    pub fn as_domain(&self) -> Option<&CoreError> {
        match self {
            CheckoutError::Domain(core) => Some(core),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lapak_core::{Money, PromoRejection};

    #[test]
    fn test_categories() {
        let cases: Vec<(CheckoutError, ErrorCategory)> = vec![
            (ValidationError::EmptyCart.into(), ErrorCategory::Validation),
            (
                CoreError::PromoNotFound("NOPE".into()).into(),
                ErrorCategory::Validation,
            ),
            (
                CoreError::Promo(PromoRejection::Expired).into(),
                ErrorCategory::BusinessRule,
            ),
            (
                CoreError::InsufficientBalance {
                    available: Money::from_idr(50_000),
                    required: Money::from_idr(100_000),
                }
                .into(),
                ErrorCategory::BusinessRule,
            ),
            (
                GatewayError::Timeout(10).into(),
                ErrorCategory::ExternalDependency,
            ),
            (
                CoreError::LedgerMismatch {
                    user_id: "u".into(),
                    cached: Money::from_idr(1),
                    ledger: Money::zero(),
                }
                .into(),
                ErrorCategory::Consistency,
            ),
            (
                CheckoutError::from(DbError::PoolExhausted),
                ErrorCategory::Internal,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(err.category(), expected, "{}", err);
        }
    }

    #[test]
    fn test_domain_errors_unwrap_from_db() {
        let err: CheckoutError = DbError::Domain(CoreError::AccountFrozen("u".into())).into();
        assert!(matches!(err, CheckoutError::Domain(CoreError::AccountFrozen(_))));
        assert!(err.is_user_facing());
    }

    #[test]
    fn test_consistency_is_not_user_facing() {
        let err: CheckoutError = CoreError::StockMismatch {
            product_id: "p".into(),
            counter: 2,
            items: 0,
        }
        .into();
        assert!(!err.is_user_facing());
    }
}
