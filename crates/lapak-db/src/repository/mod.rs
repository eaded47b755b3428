//! # Repository Module
//!
//! Database repository implementations for Lapak.
//!
//! ## Two Ways In
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Pool methods (&self)            Unit functions (conn, ...)             │
//! │                                                                         │
//! │  db.orders().get(id)             OrderRepository::transition_in(        │
//! │  db.ledger().balance(user)           &mut tx, id, from, to, None)       │
//! │       │                                   │                             │
//! │       │ acquires its own                  │ runs on the caller's        │
//! │       │ connection                        │ open transaction            │
//! │       ▼                                   ▼                             │
//! │  SQLite Database  ◄───────────────────────┘                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//! Settlement composes the `*_in` functions inside one transaction; reads
//! and admin writes use the pool methods.
//!
//! ## Available Repositories
//!
//! - [`product::ProductRepository`] - Catalog, inventory items, shared content
//! - [`promo::PromoRepository`] - Promo codes and redemptions
//! - [`ledger::LedgerRepository`] - Wallet balance and append-only ledger
//! - [`order::OrderRepository`] - Orders, items, status transitions
//! - [`payment::PaymentRepository`] - Gateway payment intents
//! - [`download::DownloadCounterRepository`] - Shared download attempt counters

pub mod download;
pub mod ledger;
pub mod order;
pub mod payment;
pub mod product;
pub mod promo;
