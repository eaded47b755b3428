//! # lapak-checkout: Checkout Orchestration for Lapak
//!
//! Composes pricing, promos, the balance ledger and inventory allocation
//! into checkout operations callable from any transport.
//!
//! ## Operations
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       CheckoutService                                   │
//! │                                                                         │
//! │   preview_promo ─── read only                                           │
//! │   checkout ──────── BALANCE: one atomic unit                            │
//! │                     GATEWAY: pending order + invoice                    │
//! │   handle_gateway_status / refresh_payment ── deferred settlement        │
//! │   order_status ──── decrypts content once PAID or DELIVERED             │
//! │   refund_order, cancel_order, top_up, balance                           │
//! │                                                                         │
//! │   DownloadGuard ─── verifies signed links, limits attempts             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wiring
//! ```rust,ignore
//! let config = CheckoutConfig::load(Some(Path::new("lapak.toml")))?;
//! let db = Database::new(config.db_config()).await?;
//! let links = Arc::new(SignedLinkIssuer::from_settings(&config.downloads));
//! let service = CheckoutService::new(db, gateway, cipher, links, &config);
//! ```

pub mod checkout;
pub mod config;
pub mod error;
pub mod gateway;
pub mod links;


pub use checkout::{
    CheckoutOutcome, CheckoutRequest, CheckoutService, GatewayOutcome, OrderLineView, OrderView,
    PromoPreview,
};
pub use config::{CheckoutConfig, ConfigError, DatabaseSettings, DownloadSettings, GatewaySettings};
pub use error::{CheckoutError, CheckoutResult, ErrorCategory};
pub use gateway::{map_gateway_status, GatewayError, Invoice, InvoiceRequest, PaymentGateway};
pub use links::{DownloadGuard, SignedLinkIssuer, VerifiedLink};

use tracing_subscriber::EnvFilter;

/// Default log filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info,lapak=debug,sqlx=warn";

/// Installs the global tracing subscriber.
///
/// Respects `RUST_LOG`. Calling it again is a no-op.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
