//! # Domain Types
//!
//! Core domain types used throughout Lapak.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Product      │   │      Order      │   │  LedgerEntry    │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (UUID)      │   │  id (UUID)      │   │  id (UUID)      │       │
//! │  │  base_price     │   │  order_number   │   │  user_id        │       │
//! │  │  sale           │   │  status         │   │  amount (±)     │       │
//! │  │  content_kind   │   │  total          │   │  kind           │       │
//! │  │  inventory_kind │   │  items[]        │   │  reference      │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  ContentKind    │   │  OrderStatus    │   │  LedgerKind     │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  Keys           │   │  Pending        │   │  Topup          │       │
//! │  │  AccessLink     │   │  Paid           │   │  Debit          │       │
//! │  │  DigitalAccount │   │  Delivered      │   │  Adjust         │       │
//! │  │  SourceCode     │   │  Failed/...     │   │  Refund         │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Snapshot Pattern
//! Order items freeze the product name, unit price and the delivered content
//! at settlement time, so what a buyer received stays reproducible even if
//! the product is later edited, restocked or deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::allocation::AllocationStrategy;
use crate::money::Money;

// =============================================================================
// Content & Inventory Kinds
// =============================================================================

/// The shape of what a product delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    /// License keys / serial numbers.
    Keys,
    /// Invite or access URLs.
    AccessLink,
    /// Account credentials (login + password blob).
    DigitalAccount,
    /// A downloadable source archive behind a signed link.
    SourceCode,
}

impl ContentKind {
    /// Whether this kind is delivered from a per-unit item list when stock based.
    pub fn is_itemized(&self) -> bool {
        !matches!(self, ContentKind::SourceCode)
    }
}

/// Whether a product's content is a finite consumable list or effectively infinite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum InventoryKind {
    /// Finite stock; each sale consumes items.
    StockBased,
    /// No stock limit; each sale bumps the delivered counter.
    Unlimited,
}

// =============================================================================
// Product
// =============================================================================

/// A configured sale. Price and percent are mutually exclusive by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum SaleDiscount {
    /// Fixed sale price.
    Price(Money),
    /// Percentage off the base price (0-100).
    Percent(u8),
}

/// How many units a product can currently deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Availability {
    /// At most this many units.
    Limited(i64),
    /// No upper bound.
    Unbounded,
}

impl Availability {
    /// Checks whether `quantity` units can be delivered.
    pub fn covers(&self, quantity: i64) -> bool {
        match self {
            Availability::Limited(available) => *available >= quantity,
            Availability::Unbounded => true,
        }
    }
}

/// A digital product available for sale.
///
/// The encrypted content payload itself lives in storage (the item list or
/// the shared content reference); this struct carries the counters that
/// describe it.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Product {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Display name, frozen into order items at purchase.
    pub name: String,

    /// Category used by CATEGORY-scoped promos.
    pub category_id: Option<String>,

    /// Base price in rupiah.
    pub base_price: Money,

    /// Optional sale; inactive outside its window.
    pub sale: Option<SaleDiscount>,

    /// Sale start (inclusive). Unset = unbounded.
    #[ts(as = "Option<String>")]
    pub sale_start_at: Option<DateTime<Utc>>,

    /// Sale end (exclusive). Unset = unbounded.
    #[ts(as = "Option<String>")]
    pub sale_end_at: Option<DateTime<Utc>>,

    pub content_kind: ContentKind,

    pub inventory_kind: InventoryKind,

    /// Number of items in the encrypted item list (stock-based item kinds).
    pub stock: i64,

    /// Total units delivered through the shared content path.
    pub delivered_count: i64,

    /// Whether a shared content reference (file or repeated item) is configured.
    pub has_shared_content: bool,

    /// Unpublished products cannot be bought.
    pub is_published: bool,

    /// Soft-delete marker.
    #[ts(as = "Option<String>")]
    pub deleted_at: Option<DateTime<Utc>>,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Checks if the product is in a purchasable state.
    pub fn is_purchasable(&self) -> bool {
        self.is_published && self.deleted_at.is_none()
    }

    /// Returns the allocation strategy for this product's kind pair.
    #[inline]
    pub fn allocation_strategy(&self) -> AllocationStrategy {
        AllocationStrategy::for_kinds(self.content_kind, self.inventory_kind)
    }

    /// Current availability as seen by this snapshot.
    ///
    /// This is advisory only: the authoritative check happens in the same
    /// atomic unit that decrements stock.
    pub fn availability(&self) -> Availability {
        match self.allocation_strategy() {
            AllocationStrategy::ConsumeItems => Availability::Limited(self.stock),
            AllocationStrategy::SharedArtifact => {
                if self.has_shared_content {
                    Availability::Unbounded
                } else {
                    Availability::Limited(0)
                }
            }
            AllocationStrategy::RepeatContent | AllocationStrategy::UnlimitedArtifact => {
                Availability::Unbounded
            }
        }
    }
}

// =============================================================================
// Delivered Content
// =============================================================================

/// One unit of content handed to a buyer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeliveredContent {
    /// A license key.
    Key { value: String },
    /// An access URL.
    AccessLink { url: String },
    /// An account credential blob.
    Account { credentials: String },
    /// A signed, time-boxed download link.
    Download {
        url: String,
        #[ts(as = "String")]
        expires_at: DateTime<Utc>,
    },
    /// Unlimited product without configured content: access is the deliverable.
    AccessGranted,
}

impl DeliveredContent {
    /// Wraps a decrypted item according to the product's content kind.
    pub fn from_plaintext(kind: ContentKind, plaintext: String) -> Self {
        match kind {
            ContentKind::Keys => DeliveredContent::Key { value: plaintext },
            ContentKind::AccessLink => DeliveredContent::AccessLink { url: plaintext },
            ContentKind::DigitalAccount => DeliveredContent::Account {
                credentials: plaintext,
            },
            // Source code is never delivered as plaintext; it is minted into links.
            ContentKind::SourceCode => DeliveredContent::AccessLink { url: plaintext },
        }
    }

    /// Returns the secret part of the content, if any.
    pub fn secret(&self) -> Option<&str> {
        match self {
            DeliveredContent::Key { value } => Some(value),
            DeliveredContent::AccessLink { url } => Some(url),
            DeliveredContent::Account { credentials } => Some(credentials),
            DeliveredContent::Download { url, .. } => Some(url),
            DeliveredContent::AccessGranted => None,
        }
    }
}

// =============================================================================
// Order Status
// =============================================================================

/// The status of an order.
///
/// ## Transitions
/// ```text
///   Pending ──► Paid ──► Delivered ──► Refunded
///      │          └──────────────────────┘
///      ├──► Failed
///      └──► Cancelled
/// ```
/// Every transition is one-directional; terminal states never re-open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Paid,
    Delivered,
    Failed,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    /// Returns the stored/wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Failed => "failed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Refunded => "refunded",
        }
    }

    /// Checks whether moving to `next` is allowed.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Paid)
                | (Pending, Delivered)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Paid, Delivered)
                | (Paid, Refunded)
                | (Delivered, Refunded)
        )
    }

    /// Whether delivered content may be shown to the buyer.
    pub fn exposes_delivery(&self) -> bool {
        matches!(self, OrderStatus::Paid | OrderStatus::Delivered)
    }

    /// Whether no further transition (other than refund) can happen.
    pub fn is_settled(&self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Payment Method
// =============================================================================

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Prepaid wallet balance.
    Balance,
    /// External payment gateway invoice.
    Gateway,
}

impl std::str::FromStr for PaymentMethod {
    type Err = crate::error::ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "balance" | "wallet" => Ok(PaymentMethod::Balance),
            "gateway" | "external" | "external_gateway" => Ok(PaymentMethod::Gateway),
            _ => Err(crate::error::ValidationError::NotAllowed {
                field: "payment method".to_string(),
                allowed: vec!["balance".to_string(), "gateway".to_string()],
            }),
        }
    }
}

// =============================================================================
// Order
// =============================================================================

/// An order and its frozen line items.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Order {
    pub id: String,
    /// Human-readable invoice number, e.g. `INV-20261016-3F9A1C2B`.
    pub order_number: String,
    pub user_id: String,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub subtotal: Money,
    pub discount: Money,
    pub total: Money,
    pub promo_code: Option<String>,
    /// Why the order ended up FAILED, if it did.
    pub failure_reason: Option<String>,
    pub items: Vec<OrderItem>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub paid_at: Option<DateTime<Utc>>,
}

/// A line item in an order.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OrderItem {
    pub id: String,
    pub order_id: String,
    pub product_id: String,
    /// Product name at time of purchase (frozen).
    pub name_snapshot: String,
    pub content_kind: ContentKind,
    /// Effective unit price at time of purchase (frozen).
    pub unit_price: Money,
    pub quantity: i64,
    /// unit_price × quantity.
    pub line_total: Money,
    /// Empty until the order is settled.
    pub delivered: Vec<DeliveredContent>,
}

// =============================================================================
// Ledger
// =============================================================================

/// Kind of balance-affecting event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum LedgerKind {
    Topup,
    Debit,
    Adjust,
    Refund,
}

/// What a ledger entry refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerReference {
    /// A purchase or refund of an order.
    Order { order_id: String },
    /// Funds received from the payment gateway for an order.
    GatewayPayment { order_id: String, provider_id: String },
    /// Operator action (manual top-up, adjustment).
    Manual { note: String },
}

impl LedgerReference {
    /// Returns the id used to look entries up by what they refer to.
    pub fn reference_id(&self) -> Option<&str> {
        match self {
            LedgerReference::Order { order_id } => Some(order_id),
            LedgerReference::GatewayPayment { order_id, .. } => Some(order_id),
            LedgerReference::Manual { .. } => None,
        }
    }
}

/// An append-only ledger entry. Never mutated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LedgerEntry {
    pub id: String,
    pub user_id: String,
    /// Signed: debits negative, top-ups and refunds positive.
    pub amount: Money,
    pub kind: LedgerKind,
    pub reference: LedgerReference,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// A user's wallet. `balance` caches the sum of the user's ledger entries.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct BalanceAccount {
    pub user_id: String,
    pub balance: Money,
    /// Set when a ledger mismatch was detected; blocks debits.
    pub frozen: bool,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Payment Intent
// =============================================================================

/// Normalised payment gateway status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Settled,
    Expired,
    Failed,
}

/// A pending external payment for a GATEWAY order.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PaymentIntent {
    pub id: String,
    pub order_id: String,
    /// The gateway's id for the invoice.
    pub provider_id: String,
    pub invoice_url: String,
    pub amount: Money,
    pub status: PaymentStatus,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub settled_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Unit Tests
// =============================================================================
