//! # Order Repository
//!
//! Orders, their frozen line items, and status transitions.
//!
//! ## Status Writes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  transition_in(order, from = [pending], to = delivered)                 │
//! │                                                                         │
//! │    UPDATE orders SET status = 'delivered'                               │
//! │    WHERE id = ? AND status IN ('pending')                               │
//! │         │                                                               │
//! │         ├── 1 row  ──► this caller owns the transition                  │
//! │         └── 0 rows ──► someone else already moved it (or never existed) │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//! Every status change goes through this compare-and-set, so two webhook
//! deliveries for the same payment can never both settle the order.
//!
//! `order_items.delivered` stores sealed content: secrets are encrypted by
//! the caller before they reach this module.

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use lapak_core::{
    ContentKind, DeliveredContent, Money, Order, OrderItem, OrderStatus, PaymentMethod,
    ORDER_NUMBER_PREFIX,
};

const ORDER_COLUMNS: &str = r#"
    id, order_number, user_id, status, payment_method,
    subtotal_idr, discount_idr, total_idr, promo_code, failure_reason,
    created_at, updated_at, paid_at
"#;

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: String,
    order_number: String,
    user_id: String,
    status: OrderStatus,
    payment_method: PaymentMethod,
    subtotal_idr: i64,
    discount_idr: i64,
    total_idr: i64,
    promo_code: Option<String>,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    paid_at: Option<DateTime<Utc>>,
}

impl OrderRow {
    fn into_order(self, items: Vec<OrderItem>) -> Order {
        Order {
            id: self.id,
            order_number: self.order_number,
            user_id: self.user_id,
            status: self.status,
            payment_method: self.payment_method,
            subtotal: Money::from_idr(self.subtotal_idr),
            discount: Money::from_idr(self.discount_idr),
            total: Money::from_idr(self.total_idr),
            promo_code: self.promo_code,
            failure_reason: self.failure_reason,
            items,
            created_at: self.created_at,
            updated_at: self.updated_at,
            paid_at: self.paid_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OrderItemRow {
    id: String,
    order_id: String,
    product_id: String,
    name_snapshot: String,
    content_kind: ContentKind,
    unit_price_idr: i64,
    quantity: i64,
    line_total_idr: i64,
    delivered: String,
}

impl OrderItemRow {
    fn into_item(self) -> DbResult<OrderItem> {
        Ok(OrderItem {
            id: self.id,
            order_id: self.order_id,
            product_id: self.product_id,
            name_snapshot: self.name_snapshot,
            content_kind: self.content_kind,
            unit_price: Money::from_idr(self.unit_price_idr),
            quantity: self.quantity,
            line_total: Money::from_idr(self.line_total_idr),
            delivered: serde_json::from_str(&self.delivered)?,
        })
    }
}

/// Generates an invoice number: `INV-YYYYMMDD-XXXXXXXX`.
///
/// The suffix is the first 8 hex digits of a v4 UUID, upper-cased.
pub fn generate_order_number(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string()[..8].to_uppercase();
    format!("{}-{}-{}", ORDER_NUMBER_PREFIX, now.format("%Y%m%d"), suffix)
}

/// Repository for order operations.
#[derive(Debug, Clone)]
pub struct OrderRepository {
    pool: SqlitePool,
}

impl OrderRepository {
    /// Creates a new OrderRepository.
    pub fn new(pool: SqlitePool) -> Self {
        OrderRepository { pool }
    }

    /// Inserts an order with its items inside an open unit.
    ///
    /// Items keep the order they have in `order.items`.
    pub async fn insert_in(conn: &mut SqliteConnection, order: &Order) -> DbResult<()> {
        debug!(order_id = %order.id, number = %order.order_number, status = %order.status, "Inserting order");

        sqlx::query(
            r#"
            INSERT INTO orders (
                id, order_number, user_id, status, payment_method,
                subtotal_idr, discount_idr, total_idr, promo_code, failure_reason,
                created_at, updated_at, paid_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&order.id)
        .bind(&order.order_number)
        .bind(&order.user_id)
        .bind(order.status)
        .bind(order.payment_method)
        .bind(order.subtotal.idr())
        .bind(order.discount.idr())
        .bind(order.total.idr())
        .bind(&order.promo_code)
        .bind(&order.failure_reason)
        .bind(order.created_at)
        .bind(order.updated_at)
        .bind(order.paid_at)
        .execute(&mut *conn)
        .await?;

        for (position, item) in order.items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO order_items (
                    id, order_id, product_id, position, name_snapshot, content_kind,
                    unit_price_idr, quantity, line_total_idr, delivered
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&item.id)
            .bind(&order.id)
            .bind(&item.product_id)
            .bind(position as i64)
            .bind(&item.name_snapshot)
            .bind(item.content_kind)
            .bind(item.unit_price.idr())
            .bind(item.quantity)
            .bind(item.line_total.idr())
            .bind(serde_json::to_string(&item.delivered)?)
            .execute(&mut *conn)
            .await?;
        }

        Ok(())
    }

    /// Inserts an order in its own unit.
    pub async fn insert(&self, order: &Order) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;
        Self::insert_in(&mut tx, order).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Gets an order with its items.
    pub async fn get(&self, order_id: &str) -> DbResult<Option<Order>> {
        let mut conn = self.pool.acquire().await?;
        Self::get_in(&mut conn, order_id).await
    }

    /// Gets an order with its items inside an open unit.
    pub async fn get_in(conn: &mut SqliteConnection, order_id: &str) -> DbResult<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE id = ?",
            ORDER_COLUMNS
        ))
        .bind(order_id)
        .fetch_optional(&mut *conn)
        .await?;

        match row {
            Some(row) => {
                let items = Self::items_in(conn, &row.id).await?;
                Ok(Some(row.into_order(items)))
            }
            None => Ok(None),
        }
    }

    /// Gets an order by its invoice number.
    pub async fn get_by_number(&self, order_number: &str) -> DbResult<Option<Order>> {
        let mut conn = self.pool.acquire().await?;
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE order_number = ?",
            ORDER_COLUMNS
        ))
        .bind(order_number)
        .fetch_optional(&mut *conn)
        .await?;

        match row {
            Some(row) => {
                let items = Self::items_in(&mut conn, &row.id).await?;
                Ok(Some(row.into_order(items)))
            }
            None => Ok(None),
        }
    }

    /// Lists a user's orders, newest first, without items.
    pub async fn list_for_user(&self, user_id: &str, limit: i64) -> DbResult<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE user_id = ? ORDER BY created_at DESC, rowid DESC LIMIT ?",
            ORDER_COLUMNS
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into_order(Vec::new())).collect())
    }

    async fn items_in(conn: &mut SqliteConnection, order_id: &str) -> DbResult<Vec<OrderItem>> {
        let rows = sqlx::query_as::<_, OrderItemRow>(
            r#"
            SELECT id, order_id, product_id, name_snapshot, content_kind,
                   unit_price_idr, quantity, line_total_idr, delivered
            FROM order_items
            WHERE order_id = ?
            ORDER BY position
            "#,
        )
        .bind(order_id)
        .fetch_all(&mut *conn)
        .await?;

        rows.into_iter().map(OrderItemRow::into_item).collect()
    }

    /// Moves an order to `to` if its current status is one of `from`.
    ///
    /// ## Returns
    /// `true` if this call made the transition, `false` if the order was not
    /// in any of the `from` states.
    ///
    /// Moving to PAID or DELIVERED stamps `paid_at` if unset. A
    /// `failure_reason` is written only when given.
    pub async fn transition_in(
        conn: &mut SqliteConnection,
        order_id: &str,
        from: &[OrderStatus],
        to: OrderStatus,
        failure_reason: Option<&str>,
    ) -> DbResult<bool> {
        if from.is_empty() || !from.iter().all(|f| f.can_transition_to(to)) {
            return Err(DbError::Internal(format!(
                "illegal order transition {:?} -> {}",
                from, to
            )));
        }

        let now = Utc::now();
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE orders SET status = ");
        qb.push_bind(to);
        qb.push(", updated_at = ");
        qb.push_bind(now);
        if matches!(to, OrderStatus::Paid | OrderStatus::Delivered) {
            qb.push(", paid_at = COALESCE(paid_at, ");
            qb.push_bind(now);
            qb.push(")");
        }
        if let Some(reason) = failure_reason {
            qb.push(", failure_reason = ");
            qb.push_bind(reason);
        }
        qb.push(" WHERE id = ");
        qb.push_bind(order_id);
        qb.push(" AND status IN (");
        let mut separated = qb.separated(", ");
        for status in from {
            separated.push_bind(*status);
        }
        separated.push_unseparated(")");

        let result = qb.build().execute(&mut *conn).await?;
        let moved = result.rows_affected() == 1;

        debug!(order_id = %order_id, to = %to, moved = moved, "Order transition");
        Ok(moved)
    }

    /// Transitions an order in its own unit.
    pub async fn transition(
        &self,
        order_id: &str,
        from: &[OrderStatus],
        to: OrderStatus,
        failure_reason: Option<&str>,
    ) -> DbResult<bool> {
        let mut tx = self.pool.begin().await?;
        let moved = Self::transition_in(&mut tx, order_id, from, to, failure_reason).await?;
        tx.commit().await?;
        Ok(moved)
    }

    /// Writes an item's sealed delivered content.
    pub async fn set_item_delivered_in(
        conn: &mut SqliteConnection,
        item_id: &str,
        sealed: &[DeliveredContent],
    ) -> DbResult<()> {
        let result = sqlx::query("UPDATE order_items SET delivered = ? WHERE id = ?")
            .bind(serde_json::to_string(sealed)?)
            .bind(item_id)
            .execute(&mut *conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Order item", item_id));
        }
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::product::NewProduct;
    use crate::{Database, DbConfig};
    use lapak_core::InventoryKind;

    async fn seed_product(db: &Database) -> String {
        let product = db
            .products()
            .insert(&NewProduct::new(
                "Game Key",
                Money::from_idr(100_000),
                ContentKind::Keys,
                InventoryKind::StockBased,
            ))
            .await
            .unwrap();
        product.id
    }

    fn pending_order(product_id: &str) -> Order {
        let now = Utc::now();
        let order_id = Uuid::new_v4().to_string();
        Order {
            id: order_id.clone(),
            order_number: generate_order_number(now),
            user_id: "u-1".to_string(),
            status: OrderStatus::Pending,
            payment_method: PaymentMethod::Gateway,
            subtotal: Money::from_idr(200_000),
            discount: Money::zero(),
            total: Money::from_idr(200_000),
            promo_code: None,
            failure_reason: None,
            items: vec![OrderItem {
                id: Uuid::new_v4().to_string(),
                order_id,
                product_id: product_id.to_string(),
                name_snapshot: "Game Key".to_string(),
                content_kind: ContentKind::Keys,
                unit_price: Money::from_idr(100_000),
                quantity: 2,
                line_total: Money::from_idr(200_000),
                delivered: Vec::new(),
            }],
            created_at: now,
            updated_at: now,
            paid_at: None,
        }
    }

    #[test]
    fn test_order_number_format() {
        let now = chrono::TimeZone::with_ymd_and_hms(&Utc, 2026, 10, 16, 8, 0, 0).unwrap();
        let number = generate_order_number(now);
        assert!(number.starts_with("INV-20261016-"));
        let suffix = &number["INV-20261016-".len()..];
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)));
    }

    #[tokio::test]
    async fn test_insert_and_get_roundtrip() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let product_id = seed_product(&db).await;
        let order = pending_order(&product_id);
        db.orders().insert(&order).await.unwrap();

        let loaded = db.orders().get(&order.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, OrderStatus::Pending);
        assert_eq!(loaded.total.idr(), 200_000);
        assert_eq!(loaded.items.len(), 1);
        assert_eq!(loaded.items[0].quantity, 2);
        assert!(loaded.items[0].delivered.is_empty());

        let by_number = db.orders().get_by_number(&order.order_number).await.unwrap();
        assert_eq!(by_number.unwrap().id, order.id);
        assert_eq!(db.orders().list_for_user("u-1", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_transition_is_compare_and_set() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let product_id = seed_product(&db).await;
        let order = pending_order(&product_id);
        db.orders().insert(&order).await.unwrap();

        let first = db
            .orders()
            .transition(&order.id, &[OrderStatus::Pending], OrderStatus::Delivered, None)
            .await
            .unwrap();
        let second = db
            .orders()
            .transition(&order.id, &[OrderStatus::Pending], OrderStatus::Delivered, None)
            .await
            .unwrap();
        assert!(first);
        assert!(!second);

        let loaded = db.orders().get(&order.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, OrderStatus::Delivered);
        assert!(loaded.paid_at.is_some());
    }

    #[tokio::test]
    async fn test_illegal_transition_is_rejected() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let result = db
            .orders()
            .transition("any", &[OrderStatus::Failed], OrderStatus::Pending, None)
            .await;
        assert!(matches!(result, Err(DbError::Internal(_))));
    }

    #[tokio::test]
    async fn test_failure_reason_and_delivered_content() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let product_id = seed_product(&db).await;
        let order = pending_order(&product_id);
        db.orders().insert(&order).await.unwrap();

        let mut tx = db.begin().await.unwrap();
        OrderRepository::set_item_delivered_in(
            &mut tx,
            &order.items[0].id,
            &[DeliveredContent::Key {
                value: "plain:K1".to_string(),
            }],
        )
        .await
        .unwrap();
        OrderRepository::transition_in(
            &mut tx,
            &order.id,
            &[OrderStatus::Pending],
            OrderStatus::Failed,
            Some("gateway expired"),
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let loaded = db.orders().get(&order.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, OrderStatus::Failed);
        assert_eq!(loaded.failure_reason.as_deref(), Some("gateway expired"));
        assert!(loaded.paid_at.is_none());
        assert_eq!(loaded.items[0].delivered.len(), 1);
    }
}
