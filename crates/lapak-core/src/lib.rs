//! # lapak-core: Pure Settlement Logic for Lapak
//!
//! This crate is the **heart** of Lapak's checkout. It contains the pricing,
//! promo and allocation rules as pure functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Lapak Architecture                               │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    HTTP layer (external)                        │   │
//! │  │    apply-promo ──► checkout ──► order-status ──► webhooks      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    lapak-checkout                               │   │
//! │  │    CheckoutService, PaymentGateway, SignedLinkIssuer           │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ lapak-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │  pricing  │  │   promo   │  │allocation │  │   │
//! │  │   │  Product  │  │ effective │  │ validate  │  │ strategy  │  │   │
//! │  │   │   Order   │  │  price    │  │ discount  │  │  ciphers  │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    lapak-db (Database Layer)                    │   │
//! │  │        SQLite, ledger, inventory, orders, InventoryAllocator    │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Product, Order, LedgerEntry, etc.)
//! - [`money`] - Whole-rupiah Money type
//! - [`pricing`] - Sale resolution and cart pricing
//! - [`promo`] - Promo validation and discount computation
//! - [`allocation`] - Allocation strategy and delivery collaborators
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation
//!
//! ## Example Usage
//!
//! ```rust
//! use lapak_core::money::Money;
//!
//! let price = Money::from_idr(100_000);
//! let subtotal = price.multiply_quantity(2);
//! let discount = subtotal.percent_floor(10);
//!
//! assert_eq!((subtotal - discount).idr(), 180_000);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod allocation;
pub mod error;
pub mod money;
pub mod pricing;
pub mod promo;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use allocation::{
    AllocationStrategy, CipherError, DeliveryContext, DownloadLink, DownloadLinkIssuer,
    LinkError, PlaintextCipher, SecretCipher,
};
pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use pricing::{CartRequestLine, PriceQuote, PricedCart, PricedLine};
pub use promo::{PromoApplication, PromoCode, PromoKind, PromoRejection, PromoScope, RedemptionCounts};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum distinct products in a single cart.
pub const MAX_CART_LINES: usize = 50;

/// Maximum quantity of a single product in one order.
///
/// Keeps one buyer from draining a key list through a typo.
pub const MAX_ITEM_QUANTITY: i64 = 100;

/// Largest single price or top-up accepted, in rupiah.
///
/// `MAX_AMOUNT_IDR × MAX_ITEM_QUANTITY × MAX_CART_LINES` still fits in i64.
pub const MAX_AMOUNT_IDR: i64 = 1_000_000_000_000;

/// Prefix of human-readable order numbers.
pub const ORDER_NUMBER_PREFIX: &str = "INV";
