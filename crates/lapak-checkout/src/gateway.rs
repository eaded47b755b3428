//! # Payment Gateway
//!
//! The seam to the external invoice provider.
//!
//! ## Gateway Checkout Flow
//! ```text
//! checkout(GATEWAY)                      gateway
//!      │                                    │
//!      ├── order PENDING                    │
//!      ├── create_invoice ─────────────────►│
//!      │◄──────────── {invoice_url, id} ────┤
//!      │                                    │
//!      ▼                                    │   buyer pays
//!  redirect buyer                           │
//!                                           │
//! handle_gateway_status(id, "PAID") ◄───────┤   webhook
//!      │                                    │
//!      └── map_gateway_status ──► Settled ──► deferred settlement unit
//! ```

use async_trait::async_trait;
use lapak_core::{Money, PaymentStatus};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Network failure or 5xx from the provider.
    #[error("gateway unavailable: {0}")]
    Unavailable(String),

    /// The provider refused the request.
    #[error("gateway rejected request: {0}")]
    Rejected(String),

    #[error("gateway call timed out after {0} seconds")]
    Timeout(u64),
}

/// What the provider needs to issue an invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceRequest {
    /// Our order id; used as the provider's external reference.
    pub order_id: String,
    pub order_number: String,
    pub amount: Money,
    pub customer_id: String,
    pub success_redirect_url: Option<String>,
}

/// An issued invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    /// The provider's id for the invoice; webhooks carry it.
    pub provider_id: String,
    pub invoice_url: String,
}

/// External payment provider.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_invoice(&self, request: &InvoiceRequest) -> Result<Invoice, GatewayError>;

    /// Returns the provider's raw status string for an invoice.
    async fn get_status(&self, provider_id: &str) -> Result<String, GatewayError>;
}

/// Normalises a provider status string. Case-insensitive; unknown values
/// are treated as still pending.
pub fn map_gateway_status(raw: &str) -> PaymentStatus {
    match raw.trim().to_ascii_uppercase().as_str() {
        "PAID" | "SETTLED" | "SUCCEEDED" => PaymentStatus::Settled,
        "EXPIRED" => PaymentStatus::Expired,
        "FAILED" | "VOIDED" | "CANCELLED" => PaymentStatus::Failed,
        _ => PaymentStatus::Pending,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        for raw in ["PAID", "paid", "Settled", "SUCCEEDED", " paid "] {
            assert_eq!(map_gateway_status(raw), PaymentStatus::Settled, "{}", raw);
        }
        assert_eq!(map_gateway_status("expired"), PaymentStatus::Expired);
        for raw in ["FAILED", "voided", "Cancelled"] {
            assert_eq!(map_gateway_status(raw), PaymentStatus::Failed, "{}", raw);
        }
        for raw in ["PENDING", "", "AWAITING_CAPTURE", "CANCELED"] {
            assert_eq!(map_gateway_status(raw), PaymentStatus::Pending, "{}", raw);
        }
    }
}
