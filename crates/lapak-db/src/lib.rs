//! # lapak-db: Database Layer for Lapak
//!
//! This crate provides database access for the Lapak digital storefront.
//! It uses SQLite with sqlx for async operations.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Lapak Data Flow                                │
//! │                                                                         │
//! │  CheckoutService::checkout / handle_gateway_status                     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     lapak-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │               │    │  (embedded)  │  │   │
//! │  │   │               │    │ ProductRepo   │    │              │  │   │
//! │  │   │ SqlitePool    │◄───│ LedgerRepo    │    │ 001_initial  │  │   │
//! │  │   │ begin() units │    │ OrderRepo ... │    │ _schema.sql  │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │            ▲                                                    │   │
//! │  │            │           ┌──────────────────────┐                │   │
//! │  │            └───────────│  InventoryAllocator  │                │   │
//! │  │                        │   (allocator.rs)     │                │   │
//! │  │                        └──────────────────────┘                │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite Database (WAL)                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations
//! - [`allocator`] - Inventory allocation inside an atomic unit
//!
//! ## Usage
//!
//! ```rust,ignore
//! use lapak_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("path/to/lapak.db")).await?;
//!
//! let balance = db.ledger().balance("user-1").await?;
//! let products = db.products().get_many(&ids).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod allocator;
pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use allocator::InventoryAllocator;
pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::download::DownloadCounterRepository;
pub use repository::ledger::LedgerRepository;
pub use repository::order::{generate_order_number, OrderRepository};
pub use repository::payment::PaymentRepository;
pub use repository::product::{NewProduct, ProductRepository};
pub use repository::promo::PromoRepository;
