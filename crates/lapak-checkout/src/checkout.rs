//! # Checkout Service
//!
//! Turns a cart into a settled order.
//!
//! ## Settlement Paths
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  checkout(request)                                                      │
//! │     │                                                                   │
//! │     ├── price cart ── promo validate ── (reject here: nothing written)  │
//! │     │                                                                   │
//! │     ├── BALANCE ───► BEGIN                                              │
//! │     │                  debit_if_sufficient      (first write: lock)     │
//! │     │                  verify ledger            (mismatch: freeze)      │
//! │     │                  allocate every line      (conditional decrement) │
//! │     │                  insert order DELIVERED   (sealed content)        │
//! │     │                  record redemption + re-check limits              │
//! │     │                COMMIT  ─ any error rolls back all of it           │
//! │     │                                                                   │
//! │     └── GATEWAY ───► insert order PENDING                               │
//! │                      create_invoice (timeout) ─ error: order FAILED     │
//! │                      record payment intent                              │
//! │                      return invoice URL                                 │
//! │                                                                         │
//! │  handle_gateway_status(provider_id, "PAID")                             │
//! │     BEGIN                                                               │
//! │       UPDATE orders SET delivered WHERE pending  ── 0 rows: no-op       │
//! │       TOPUP +total (gateway funds), DEBIT -total (purchase)             │
//! │       allocate, write sealed content, record redemption                 │
//! │     COMMIT  ─ allocation impossible: roll back, order FAILED,           │
//! │               TOPUP +total stays in the wallet                          │
//! │     order no longer PENDING, intent unsettled: settle intent + TOPUP    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::{debug, error, info, warn};
use ts_rs::TS;
use uuid::Uuid;

use crate::config::CheckoutConfig;
use crate::error::{CheckoutError, CheckoutResult};
use crate::gateway::{map_gateway_status, GatewayError, InvoiceRequest, PaymentGateway};
use lapak_core::allocation::{seal, unseal};
use lapak_core::pricing::price_cart;
use lapak_core::promo::{self, PromoApplication, PromoCode, RedemptionCounts};
use lapak_core::validation::{validate_credit_amount, validate_user_id};
use lapak_core::{
    CartRequestLine, ContentKind, CoreError, DeliveredContent, DeliveryContext,
    DownloadLinkIssuer, LedgerEntry, LedgerKind, LedgerReference, Money, Order, OrderItem,
    OrderStatus, PaymentIntent, PaymentMethod, PaymentStatus, PricedCart, Product, SecretCipher,
    ValidationError,
};
use lapak_db::{
    generate_order_number, Database, DbError, InventoryAllocator, LedgerRepository,
    OrderRepository, PaymentRepository, ProductRepository, PromoRepository,
};

// =============================================================================
// Requests and Views
// =============================================================================

/// A checkout submitted by a buyer.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CheckoutRequest {
    pub user_id: String,
    pub lines: Vec<CartRequestLine>,
    pub promo_code: Option<String>,
    pub payment_method: PaymentMethod,
}

/// One order line as shown to the buyer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OrderLineView {
    pub product_id: String,
    pub name: String,
    pub content_kind: ContentKind,
    pub unit_price: Money,
    pub quantity: i64,
    pub line_total: Money,
    /// Plaintext; empty unless the order is PAID or DELIVERED.
    pub delivered: Vec<DeliveredContent>,
}

/// Result of a checkout.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CheckoutOutcome {
    /// Paid from the wallet; content is ready.
    Delivered {
        order_id: String,
        order_number: String,
        total: Money,
        lines: Vec<OrderLineView>,
    },
    /// Buyer must pay the invoice; content follows the gateway webhook.
    AwaitingPayment {
        order_id: String,
        order_number: String,
        total: Money,
        invoice_url: String,
    },
}

impl CheckoutOutcome {
    pub fn order_id(&self) -> &str {
        match self {
            CheckoutOutcome::Delivered { order_id, .. }
            | CheckoutOutcome::AwaitingPayment { order_id, .. } => order_id,
        }
    }
}

/// Discount preview for a cart and code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PromoPreview {
    pub code: String,
    pub subtotal: Money,
    pub discount: Money,
    pub total: Money,
    pub applied_product_ids: Vec<String>,
}

/// An order as shown to the buyer.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OrderView {
    pub order_id: String,
    pub order_number: String,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub subtotal: Money,
    pub discount: Money,
    pub total: Money,
    pub promo_code: Option<String>,
    pub failure_reason: Option<String>,
    /// Present while a gateway order is pending.
    pub invoice_url: Option<String>,
    pub lines: Vec<OrderLineView>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub paid_at: Option<DateTime<Utc>>,
}

/// What a gateway status report did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum GatewayOutcome {
    /// This report settled the order and delivered its content.
    Settled { order_id: String },
    /// The order had already left PENDING; nothing changed.
    AlreadyProcessed { order_id: String },
    /// Paid after the order was cancelled or expired. The total went to the
    /// buyer's wallet.
    Credited { order_id: String },
    /// The order is now FAILED.
    Failed { order_id: String, reason: String },
    /// Not final yet.
    StillPending { order_id: String },
}

/// A priced cart with its promo applied.
struct Quote {
    cart: PricedCart,
    products: HashMap<String, Product>,
    promo: Option<(PromoCode, PromoApplication)>,
    discount: Money,
    total: Money,
}

// =============================================================================
// Checkout Service
// =============================================================================

/// The checkout orchestrator.
///
/// Stateless apart from its collaborators: run as many as needed against
/// the same database.
#[derive(Clone)]
pub struct CheckoutService {
    db: Database,
    gateway: Arc<dyn PaymentGateway>,
    cipher: Arc<dyn SecretCipher>,
    links: Arc<dyn DownloadLinkIssuer>,
    gateway_timeout: Duration,
    success_redirect_url: Option<String>,
}

impl CheckoutService {
    pub fn new(
        db: Database,
        gateway: Arc<dyn PaymentGateway>,
        cipher: Arc<dyn SecretCipher>,
        links: Arc<dyn DownloadLinkIssuer>,
        config: &CheckoutConfig,
    ) -> Self {
        CheckoutService {
            db,
            gateway,
            cipher,
            links,
            gateway_timeout: config.gateway_timeout(),
            success_redirect_url: config.gateway.success_redirect_url.clone(),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn delivery_context<'a>(&'a self, buyer_id: &'a str, order_id: &'a str) -> DeliveryContext<'a> {
        DeliveryContext {
            buyer_id,
            order_id,
            cipher: self.cipher.as_ref(),
            links: self.links.as_ref(),
        }
    }

    // =========================================================================
    // Quoting
    // =========================================================================

    async fn quote(
        &self,
        user_id: &str,
        lines: &[CartRequestLine],
        promo_code: Option<&str>,
        now: DateTime<Utc>,
    ) -> CheckoutResult<Quote> {
        validate_user_id(user_id)?;

        let ids: Vec<String> = lines.iter().map(|l| l.product_id.clone()).collect();
        let products = self.db.products().get_many(&ids).await?;
        let cart = price_cart(lines, &products, now)?;

        let promo = match promo_code.map(str::trim).filter(|c| !c.is_empty()) {
            Some(code) => {
                let promo = self
                    .db
                    .promos()
                    .find_by_code(code)
                    .await?
                    .ok_or_else(|| CoreError::PromoNotFound(code.to_string()))?;
                let usage = self.db.promos().redemption_counts(&promo.id, user_id).await?;

                match promo::validate(&promo, &cart, now, usage) {
                    Ok(applied) => Some((promo, applied)),
                    Err(rejection) => {
                        warn!(user_id = %user_id, code = %promo.code, reason = %rejection, "Promo rejected");
                        return Err(CoreError::Promo(rejection).into());
                    }
                }
            }
            None => None,
        };

        let discount = promo
            .as_ref()
            .map(|(_, applied)| applied.discount)
            .unwrap_or_default();
        let total = cart.subtotal - discount;

        Ok(Quote {
            cart,
            products,
            promo,
            discount,
            total,
        })
    }

    /// Previews a promo code against a cart. Writes nothing.
    pub async fn preview_promo(
        &self,
        user_id: &str,
        lines: &[CartRequestLine],
        code: &str,
    ) -> CheckoutResult<PromoPreview> {
        let quote = self.quote(user_id, lines, Some(code), Utc::now()).await?;
        let Some((promo, applied)) = quote.promo else {
            return Err(ValidationError::Required {
                field: "promo code".to_string(),
            }
            .into());
        };

        Ok(PromoPreview {
            code: promo.code,
            subtotal: quote.cart.subtotal,
            discount: quote.discount,
            total: quote.total,
            applied_product_ids: applied.applied_product_ids,
        })
    }

    // =========================================================================
    // Checkout
    // =========================================================================

    /// Prices, validates, and settles (or starts settling) a cart.
    ///
    /// ## Errors
    /// Validation and business-rule errors leave nothing behind. A gateway
    /// failure leaves a FAILED order. A ledger mismatch freezes the buyer's
    /// account.
    pub async fn checkout(&self, request: &CheckoutRequest) -> CheckoutResult<CheckoutOutcome> {
        let now = Utc::now();
        let quote = self
            .quote(
                &request.user_id,
                &request.lines,
                request.promo_code.as_deref(),
                now,
            )
            .await?;

        debug!(
            user_id = %request.user_id,
            subtotal = %quote.cart.subtotal,
            discount = %quote.discount,
            total = %quote.total,
            method = ?request.payment_method,
            "Cart quoted"
        );

        match request.payment_method {
            PaymentMethod::Balance => self.settle_from_balance(&request.user_id, quote, now).await,
            PaymentMethod::Gateway => self.start_gateway_payment(&request.user_id, quote, now).await,
        }
    }

    fn new_order(
        &self,
        user_id: &str,
        quote: &Quote,
        method: PaymentMethod,
        status: OrderStatus,
        now: DateTime<Utc>,
    ) -> Order {
        let order_id = Uuid::new_v4().to_string();
        let items = quote
            .cart
            .lines
            .iter()
            .map(|line| OrderItem {
                id: Uuid::new_v4().to_string(),
                order_id: order_id.clone(),
                product_id: line.product_id.clone(),
                name_snapshot: line.name.clone(),
                content_kind: line.content_kind,
                unit_price: line.unit_price,
                quantity: line.quantity,
                line_total: line.line_total,
                delivered: Vec::new(),
            })
            .collect();

        Order {
            id: order_id,
            order_number: generate_order_number(now),
            user_id: user_id.to_string(),
            status,
            payment_method: method,
            subtotal: quote.cart.subtotal,
            discount: quote.discount,
            total: quote.total,
            promo_code: quote.promo.as_ref().map(|(promo, _)| promo.code.clone()),
            failure_reason: None,
            items,
            created_at: now,
            updated_at: now,
            paid_at: matches!(status, OrderStatus::Delivered).then_some(now),
        }
    }

    async fn settle_from_balance(
        &self,
        user_id: &str,
        quote: Quote,
        now: DateTime<Utc>,
    ) -> CheckoutResult<CheckoutOutcome> {
        let mut order = self.new_order(user_id, &quote, PaymentMethod::Balance, OrderStatus::Delivered, now);

        let mut tx = self.db.begin().await?;
        let result = self.settle_from_balance_in(&mut tx, &mut order, &quote).await;

        match result {
            Ok(lines) => {
                tx.commit().await.map_err(DbError::from)?;
                info!(
                    order_id = %order.id,
                    order_number = %order.order_number,
                    user_id = %user_id,
                    total = %order.total,
                    "Order settled from balance"
                );
                Ok(CheckoutOutcome::Delivered {
                    order_id: order.id,
                    order_number: order.order_number,
                    total: order.total,
                    lines,
                })
            }
            Err(err) => {
                tx.rollback().await.map_err(DbError::from)?;
                if let CheckoutError::Domain(CoreError::LedgerMismatch { .. }) = &err {
                    error!(user_id = %user_id, error = %err, "Freezing balance account");
                    self.db.ledger().freeze(user_id).await?;
                } else {
                    warn!(user_id = %user_id, error = %err, "Balance checkout rejected");
                }
                Err(err)
            }
        }
    }

    async fn settle_from_balance_in(
        &self,
        conn: &mut SqliteConnection,
        order: &mut Order,
        quote: &Quote,
    ) -> CheckoutResult<Vec<OrderLineView>> {
        let reference = LedgerReference::Order {
            order_id: order.id.clone(),
        };

        LedgerRepository::debit_if_sufficient(conn, &order.user_id, order.total, &reference).await?;
        LedgerRepository::verify_account_in(conn, &order.user_id).await?;

        let ctx = self.delivery_context(&order.user_id, &order.id);
        let allocator = InventoryAllocator::new(ctx);
        let mut views = Vec::with_capacity(order.items.len());
        let mut sealed_items = Vec::with_capacity(order.items.len());

        for item in &order.items {
            let product = quote
                .products
                .get(&item.product_id)
                .ok_or_else(|| CoreError::ProductNotFound(item.product_id.clone()))?;

            let delivered = allocator.allocate(conn, product, item.quantity).await?;
            sealed_items.push(seal(&delivered, self.cipher.as_ref()).map_err(CoreError::from)?);
            views.push(line_view(item, delivered));
        }

        for (item, sealed) in order.items.iter_mut().zip(sealed_items) {
            item.delivered = sealed;
        }
        OrderRepository::insert_in(conn, order).await?;

        if let Some((promo, applied)) = &quote.promo {
            PromoRepository::record_redemption_in(conn, &promo.id, &order.user_id, &order.id, applied.discount)
                .await?;
            let counts = PromoRepository::redemption_counts_in(conn, &promo.id, &order.user_id).await?;
            promo::check_limits(promo, excluding_own(counts)).map_err(CoreError::from)?;
        }

        Ok(views)
    }

    async fn start_gateway_payment(
        &self,
        user_id: &str,
        quote: Quote,
        now: DateTime<Utc>,
    ) -> CheckoutResult<CheckoutOutcome> {
        if !quote.total.is_positive() {
            return Err(ValidationError::MustBePositive {
                field: "gateway payment total".to_string(),
            }
            .into());
        }

        let order = self.new_order(user_id, &quote, PaymentMethod::Gateway, OrderStatus::Pending, now);
        self.db.orders().insert(&order).await?;

        let request = InvoiceRequest {
            order_id: order.id.clone(),
            order_number: order.order_number.clone(),
            amount: order.total,
            customer_id: user_id.to_string(),
            success_redirect_url: self.success_redirect_url.clone(),
        };

        let invoice = match self.call_gateway(self.gateway.create_invoice(&request)).await {
            Ok(invoice) => invoice,
            Err(gateway_err) => {
                warn!(order_id = %order.id, error = %gateway_err, "Invoice creation failed");
                self.db
                    .orders()
                    .transition(
                        &order.id,
                        &[OrderStatus::Pending],
                        OrderStatus::Failed,
                        Some(&gateway_err.to_string()),
                    )
                    .await?;
                return Err(gateway_err.into());
            }
        };

        self.db
            .payments()
            .insert(&PaymentIntent {
                id: Uuid::new_v4().to_string(),
                order_id: order.id.clone(),
                provider_id: invoice.provider_id.clone(),
                invoice_url: invoice.invoice_url.clone(),
                amount: order.total,
                status: PaymentStatus::Pending,
                created_at: now,
                settled_at: None,
            })
            .await?;

        info!(
            order_id = %order.id,
            provider_id = %invoice.provider_id,
            total = %order.total,
            "Awaiting gateway payment"
        );

        Ok(CheckoutOutcome::AwaitingPayment {
            order_id: order.id,
            order_number: order.order_number,
            total: order.total,
            invoice_url: invoice.invoice_url,
        })
    }

    /// Runs a gateway call under the configured timeout.
    async fn call_gateway<T, F>(&self, call: F) -> Result<T, GatewayError>
    where
        F: std::future::Future<Output = Result<T, GatewayError>>,
    {
        match tokio::time::timeout(self.gateway_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout(self.gateway_timeout.as_secs())),
        }
    }

    // =========================================================================
    // Gateway Continuation
    // =========================================================================

    /// Applies a gateway status report (webhook). Safe to call any number of
    /// times for the same payment.
    pub async fn handle_gateway_status(
        &self,
        provider_id: &str,
        raw_status: &str,
    ) -> CheckoutResult<GatewayOutcome> {
        let intent = self
            .db
            .payments()
            .find_by_provider_id(provider_id)
            .await?
            .ok_or_else(|| CoreError::OrderNotFound(format!("payment {}", provider_id)))?;

        let status = map_gateway_status(raw_status);
        debug!(provider_id = %provider_id, raw = %raw_status, status = ?status, "Gateway status received");

        match status {
            PaymentStatus::Pending => Ok(GatewayOutcome::StillPending {
                order_id: intent.order_id,
            }),
            PaymentStatus::Settled => self.settle_gateway_payment(&intent).await,
            PaymentStatus::Expired | PaymentStatus::Failed => {
                let reason = if status == PaymentStatus::Expired {
                    "payment expired"
                } else {
                    "payment failed"
                };

                let mut tx = self.db.begin().await?;
                let moved = OrderRepository::transition_in(
                    &mut tx,
                    &intent.order_id,
                    &[OrderStatus::Pending],
                    OrderStatus::Failed,
                    Some(reason),
                )
                .await?;
                PaymentRepository::set_status_in(&mut tx, provider_id, status, None).await?;
                tx.commit().await.map_err(DbError::from)?;

                if moved {
                    info!(order_id = %intent.order_id, reason = reason, "Gateway order failed");
                    Ok(GatewayOutcome::Failed {
                        order_id: intent.order_id,
                        reason: reason.to_string(),
                    })
                } else {
                    Ok(GatewayOutcome::AlreadyProcessed {
                        order_id: intent.order_id,
                    })
                }
            }
        }
    }

    async fn settle_gateway_payment(&self, intent: &PaymentIntent) -> CheckoutResult<GatewayOutcome> {
        let order = self
            .db
            .orders()
            .get(&intent.order_id)
            .await?
            .ok_or_else(|| CoreError::OrderNotFound(intent.order_id.clone()))?;

        let mut tx = self.db.begin().await?;
        let moved = OrderRepository::transition_in(
            &mut tx,
            &order.id,
            &[OrderStatus::Pending],
            OrderStatus::Delivered,
            None,
        )
        .await?;

        if !moved {
            // Cancelled or expired before the money came in.
            let credited = Self::credit_gateway_funds_in(&mut tx, &order, intent).await?;
            tx.commit().await.map_err(DbError::from)?;

            if credited {
                warn!(
                    order_id = %order.id,
                    status = %order.status,
                    total = %order.total,
                    "Late payment credited to wallet"
                );
                return Ok(GatewayOutcome::Credited { order_id: order.id });
            }
            debug!(order_id = %order.id, "Duplicate settlement ignored");
            return Ok(GatewayOutcome::AlreadyProcessed { order_id: order.id });
        }

        match self.settle_gateway_payment_in(&mut tx, &order, intent).await {
            Ok(ledger_consistent) => {
                tx.commit().await.map_err(DbError::from)?;
                info!(
                    order_id = %order.id,
                    provider_id = %intent.provider_id,
                    total = %order.total,
                    "Gateway order settled"
                );
                if !ledger_consistent {
                    error!(user_id = %order.user_id, order_id = %order.id, "Freezing balance account");
                    self.db.ledger().freeze(&order.user_id).await?;
                }
                Ok(GatewayOutcome::Settled { order_id: order.id })
            }
            Err(CheckoutError::Domain(core)) => {
                tx.rollback().await.map_err(DbError::from)?;
                let reason = core.to_string();
                error!(order_id = %order.id, reason = %reason, "Paid order could not be delivered");

                let mut tx = self.db.begin().await?;
                OrderRepository::transition_in(
                    &mut tx,
                    &order.id,
                    &[OrderStatus::Pending],
                    OrderStatus::Failed,
                    Some(&reason),
                )
                .await?;
                Self::credit_gateway_funds_in(&mut tx, &order, intent).await?;
                tx.commit().await.map_err(DbError::from)?;

                Ok(GatewayOutcome::Failed {
                    order_id: order.id,
                    reason,
                })
            }
            Err(other) => {
                tx.rollback().await.map_err(DbError::from)?;
                Err(other)
            }
        }
    }

    /// Marks the intent settled and tops the buyer's wallet up by the order
    /// total, for money that arrived but bought nothing.
    ///
    /// Returns `false` (and writes nothing) when the intent was already
    /// settled, so a repeated report never credits twice.
    async fn credit_gateway_funds_in(
        conn: &mut SqliteConnection,
        order: &Order,
        intent: &PaymentIntent,
    ) -> CheckoutResult<bool> {
        let settled =
            PaymentRepository::set_status_in(conn, &intent.provider_id, PaymentStatus::Settled, Some(Utc::now()))
                .await?;
        if !settled || !order.total.is_positive() {
            return Ok(settled);
        }

        LedgerRepository::post_in(
            conn,
            &order.user_id,
            order.total,
            LedgerKind::Topup,
            &LedgerReference::GatewayPayment {
                order_id: order.id.clone(),
                provider_id: intent.provider_id.clone(),
            },
        )
        .await?;
        Ok(true)
    }

    /// Books the gateway funds, delivers and closes the intent.
    ///
    /// The DEBIT is posted with `post_in`, not `debit_if_sufficient`: it is
    /// paid for by the TOPUP just above it, so a frozen account still
    /// receives what it bought through the gateway. The account is verified
    /// afterwards and `Ok(false)` means the ledger disagrees with the cached
    /// balance; the caller freezes the account once the unit commits.
    async fn settle_gateway_payment_in(
        &self,
        conn: &mut SqliteConnection,
        order: &Order,
        intent: &PaymentIntent,
    ) -> CheckoutResult<bool> {
        LedgerRepository::post_in(
            conn,
            &order.user_id,
            order.total,
            LedgerKind::Topup,
            &LedgerReference::GatewayPayment {
                order_id: order.id.clone(),
                provider_id: intent.provider_id.clone(),
            },
        )
        .await?;
        LedgerRepository::post_in(
            conn,
            &order.user_id,
            -order.total,
            LedgerKind::Debit,
            &LedgerReference::Order {
                order_id: order.id.clone(),
            },
        )
        .await?;

        let ledger_consistent = match LedgerRepository::verify_account_in(conn, &order.user_id).await {
            Ok(_) => true,
            Err(DbError::Domain(CoreError::LedgerMismatch { .. })) => false,
            Err(other) => return Err(other.into()),
        };

        let allocator = InventoryAllocator::new(self.delivery_context(&order.user_id, &order.id));
        for item in &order.items {
            let product = ProductRepository::get_in(conn, &item.product_id)
                .await?
                .ok_or_else(|| CoreError::ProductNotFound(item.product_id.clone()))?;

            let delivered = allocator.allocate(conn, &product, item.quantity).await?;
            let sealed = seal(&delivered, self.cipher.as_ref()).map_err(CoreError::from)?;
            OrderRepository::set_item_delivered_in(conn, &item.id, &sealed).await?;
        }

        if let Some(code) = &order.promo_code {
            match PromoRepository::find_by_code_in(conn, code).await? {
                Some(promo) => {
                    PromoRepository::record_redemption_in(conn, &promo.id, &order.user_id, &order.id, order.discount)
                        .await?;
                    let counts = PromoRepository::redemption_counts_in(conn, &promo.id, &order.user_id).await?;
                    if let Err(rejection) = promo::check_limits(&promo, excluding_own(counts)) {
                        // The buyer already paid the discounted total.
                        warn!(order_id = %order.id, code = %code, reason = %rejection, "Promo limit exceeded at settlement");
                    }
                }
                None => warn!(order_id = %order.id, code = %code, "Promo code vanished before settlement"),
            }
        }

        PaymentRepository::set_status_in(conn, &intent.provider_id, PaymentStatus::Settled, Some(Utc::now()))
            .await?;
        Ok(ledger_consistent)
    }

    /// Polls the gateway for an order's payment and applies the result.
    pub async fn refresh_payment(&self, order_id: &str) -> CheckoutResult<GatewayOutcome> {
        let intent = match self.db.payments().find_by_order(order_id).await? {
            Some(intent) => intent,
            None => {
                let order = self
                    .db
                    .orders()
                    .get(order_id)
                    .await?
                    .ok_or_else(|| CoreError::OrderNotFound(order_id.to_string()))?;
                return Err(CoreError::InvalidOrderStatus {
                    order_id: order.id,
                    current_status: format!("{} ({:?} payment)", order.status, order.payment_method),
                }
                .into());
            }
        };

        let raw = self.call_gateway(self.gateway.get_status(&intent.provider_id)).await?;
        self.handle_gateway_status(&intent.provider_id, &raw).await
    }

    // =========================================================================
    // Order Lookup and Operator Actions
    // =========================================================================

    /// Looks up an order. Delivered content is decrypted only once the order
    /// is PAID or DELIVERED.
    pub async fn order_status(&self, order_id: &str) -> CheckoutResult<OrderView> {
        let order = self
            .db
            .orders()
            .get(order_id)
            .await?
            .ok_or_else(|| CoreError::OrderNotFound(order_id.to_string()))?;

        let invoice_url = if order.status == OrderStatus::Pending {
            self.db
                .payments()
                .find_by_order(&order.id)
                .await?
                .map(|intent| intent.invoice_url)
        } else {
            None
        };

        let mut lines = Vec::with_capacity(order.items.len());
        for item in &order.items {
            let delivered = if order.status.exposes_delivery() {
                unseal(&item.delivered, self.cipher.as_ref()).map_err(CoreError::from)?
            } else {
                Vec::new()
            };
            lines.push(line_view(item, delivered));
        }

        Ok(OrderView {
            order_id: order.id,
            order_number: order.order_number,
            status: order.status,
            payment_method: order.payment_method,
            subtotal: order.subtotal,
            discount: order.discount,
            total: order.total,
            promo_code: order.promo_code,
            failure_reason: order.failure_reason,
            invoice_url,
            lines,
            created_at: order.created_at,
            paid_at: order.paid_at,
        })
    }

    /// Refunds a settled order to the buyer's wallet. Inventory is not
    /// returned.
    pub async fn refund_order(&self, order_id: &str, reason: &str) -> CheckoutResult<LedgerEntry> {
        let mut tx = self.db.begin().await?;
        let moved = OrderRepository::transition_in(
            &mut tx,
            order_id,
            &[OrderStatus::Paid, OrderStatus::Delivered],
            OrderStatus::Refunded,
            None,
        )
        .await?;

        if !moved {
            tx.rollback().await.map_err(DbError::from)?;
            return Err(self.status_conflict(order_id).await);
        }

        let order = OrderRepository::get_in(&mut tx, order_id)
            .await?
            .ok_or_else(|| CoreError::OrderNotFound(order_id.to_string()))?;
        let entry = LedgerRepository::post_in(
            &mut tx,
            &order.user_id,
            order.total,
            LedgerKind::Refund,
            &LedgerReference::Order {
                order_id: order.id.clone(),
            },
        )
        .await?;
        tx.commit().await.map_err(DbError::from)?;

        info!(order_id = %order_id, amount = %order.total, reason = %reason, "Order refunded");
        Ok(entry)
    }

    /// Cancels a pending order.
    pub async fn cancel_order(&self, order_id: &str) -> CheckoutResult<()> {
        let moved = self
            .db
            .orders()
            .transition(order_id, &[OrderStatus::Pending], OrderStatus::Cancelled, None)
            .await?;

        if !moved {
            return Err(self.status_conflict(order_id).await);
        }
        info!(order_id = %order_id, "Order cancelled");
        Ok(())
    }

    async fn status_conflict(&self, order_id: &str) -> CheckoutError {
        match self.db.orders().get(order_id).await {
            Ok(Some(order)) => CoreError::InvalidOrderStatus {
                order_id: order.id,
                current_status: order.status.to_string(),
            }
            .into(),
            Ok(None) => CoreError::OrderNotFound(order_id.to_string()).into(),
            Err(err) => err.into(),
        }
    }

    // =========================================================================
    // Wallet
    // =========================================================================

    /// Credits a user's wallet.
    pub async fn top_up(&self, user_id: &str, amount: Money, note: &str) -> CheckoutResult<LedgerEntry> {
        validate_user_id(user_id)?;
        validate_credit_amount(amount.idr())?;

        let entry = self
            .db
            .ledger()
            .post(
                user_id,
                amount,
                LedgerKind::Topup,
                &LedgerReference::Manual {
                    note: note.to_string(),
                },
            )
            .await?;

        info!(user_id = %user_id, amount = %amount, "Wallet topped up");
        Ok(entry)
    }

    /// Current wallet balance.
    pub async fn balance(&self, user_id: &str) -> CheckoutResult<Money> {
        Ok(self.db.ledger().balance(user_id).await?)
    }
}

fn line_view(item: &OrderItem, delivered: Vec<DeliveredContent>) -> OrderLineView {
    OrderLineView {
        product_id: item.product_id.clone(),
        name: item.name_snapshot.clone(),
        content_kind: item.content_kind,
        unit_price: item.unit_price,
        quantity: item.quantity,
        line_total: item.line_total,
        delivered,
    }
}

/// Counts as they were before this order's redemption was inserted.
fn excluding_own(counts: RedemptionCounts) -> RedemptionCounts {
    RedemptionCounts {
        global: (counts.global - 1).max(0),
        by_user: (counts.by_user - 1).max(0),
    }
}
