//! # Payment Repository
//!
//! Gateway payment intents. One intent per GATEWAY order; the gateway's
//! invoice id (`provider_id`) is unique and is what webhooks carry.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use lapak_core::{Money, PaymentIntent, PaymentStatus};

#[derive(Debug, sqlx::FromRow)]
struct PaymentRow {
    id: String,
    order_id: String,
    provider_id: String,
    invoice_url: String,
    amount_idr: i64,
    status: PaymentStatus,
    created_at: DateTime<Utc>,
    settled_at: Option<DateTime<Utc>>,
}

impl From<PaymentRow> for PaymentIntent {
    fn from(row: PaymentRow) -> Self {
        PaymentIntent {
            id: row.id,
            order_id: row.order_id,
            provider_id: row.provider_id,
            invoice_url: row.invoice_url,
            amount: Money::from_idr(row.amount_idr),
            status: row.status,
            created_at: row.created_at,
            settled_at: row.settled_at,
        }
    }
}

const PAYMENT_COLUMNS: &str =
    "id, order_id, provider_id, invoice_url, amount_idr, status, created_at, settled_at";

/// Repository for payment intents.
#[derive(Debug, Clone)]
pub struct PaymentRepository {
    pool: SqlitePool,
}

impl PaymentRepository {
    /// Creates a new PaymentRepository.
    pub fn new(pool: SqlitePool) -> Self {
        PaymentRepository { pool }
    }

    /// Records a payment intent.
    pub async fn insert(&self, intent: &PaymentIntent) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO payment_intents (
                id, order_id, provider_id, invoice_url, amount_idr, status, created_at, settled_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&intent.id)
        .bind(&intent.order_id)
        .bind(&intent.provider_id)
        .bind(&intent.invoice_url)
        .bind(intent.amount.idr())
        .bind(intent.status)
        .bind(intent.created_at)
        .bind(intent.settled_at)
        .execute(&self.pool)
        .await?;

        debug!(order_id = %intent.order_id, provider_id = %intent.provider_id, "Payment intent recorded");
        Ok(())
    }

    /// Finds an intent by the gateway's invoice id.
    pub async fn find_by_provider_id(&self, provider_id: &str) -> DbResult<Option<PaymentIntent>> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {} FROM payment_intents WHERE provider_id = ?",
            PAYMENT_COLUMNS
        ))
        .bind(provider_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(PaymentIntent::from))
    }

    /// Finds the intent for an order.
    pub async fn find_by_order(&self, order_id: &str) -> DbResult<Option<PaymentIntent>> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {} FROM payment_intents WHERE order_id = ?",
            PAYMENT_COLUMNS
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(PaymentIntent::from))
    }

    /// Updates an intent's status inside an open unit.
    ///
    /// A settled intent keeps its status; later EXPIRED or FAILED reports for
    /// it are ignored.
    pub async fn set_status_in(
        conn: &mut SqliteConnection,
        provider_id: &str,
        status: PaymentStatus,
        settled_at: Option<DateTime<Utc>>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE payment_intents
            SET status = ?1, settled_at = COALESCE(settled_at, ?2)
            WHERE provider_id = ?3 AND status != 'settled'
            "#,
        )
        .bind(status)
        .bind(settled_at)
        .bind(provider_id)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Updates an intent's status in its own unit.
    pub async fn set_status(
        &self,
        provider_id: &str,
        status: PaymentStatus,
        settled_at: Option<DateTime<Utc>>,
    ) -> DbResult<bool> {
        let updated = {
            let mut conn = self.pool.acquire().await?;
            Self::set_status_in(&mut conn, provider_id, status, settled_at).await?
        };
        if !updated && self.find_by_provider_id(provider_id).await?.is_none() {
            return Err(DbError::not_found("Payment intent", provider_id));
        }
        Ok(updated)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::order::generate_order_number;
    use crate::{Database, DbConfig};
    use lapak_core::{Order, OrderStatus, PaymentMethod};
    use uuid::Uuid;

    async fn seed_order(db: &Database) -> String {
        let now = Utc::now();
        let order = Order {
            id: Uuid::new_v4().to_string(),
            order_number: generate_order_number(now),
            user_id: "u-1".to_string(),
            status: OrderStatus::Pending,
            payment_method: PaymentMethod::Gateway,
            subtotal: Money::from_idr(10_000),
            discount: Money::zero(),
            total: Money::from_idr(10_000),
            promo_code: None,
            failure_reason: None,
            items: Vec::new(),
            created_at: now,
            updated_at: now,
            paid_at: None,
        };
        db.orders().insert(&order).await.unwrap();
        order.id
    }

    fn intent(order_id: &str, provider_id: &str) -> PaymentIntent {
        PaymentIntent {
            id: Uuid::new_v4().to_string(),
            order_id: order_id.to_string(),
            provider_id: provider_id.to_string(),
            invoice_url: format!("https://pay.example/{}", provider_id),
            amount: Money::from_idr(10_000),
            status: PaymentStatus::Pending,
            created_at: Utc::now(),
            settled_at: None,
        }
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let order_id = seed_order(&db).await;
        db.payments().insert(&intent(&order_id, "inv_1")).await.unwrap();

        let by_provider = db.payments().find_by_provider_id("inv_1").await.unwrap().unwrap();
        assert_eq!(by_provider.order_id, order_id);
        assert_eq!(by_provider.status, PaymentStatus::Pending);

        let by_order = db.payments().find_by_order(&order_id).await.unwrap().unwrap();
        assert_eq!(by_order.provider_id, "inv_1");
    }

    #[tokio::test]
    async fn test_settled_status_is_sticky() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let order_id = seed_order(&db).await;
        db.payments().insert(&intent(&order_id, "inv_1")).await.unwrap();

        assert!(db
            .payments()
            .set_status("inv_1", PaymentStatus::Settled, Some(Utc::now()))
            .await
            .unwrap());
        assert!(!db
            .payments()
            .set_status("inv_1", PaymentStatus::Expired, None)
            .await
            .unwrap());

        let stored = db.payments().find_by_provider_id("inv_1").await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Settled);
        assert!(stored.settled_at.is_some());
    }

    #[tokio::test]
    async fn test_unknown_provider_id() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let result = db.payments().set_status("nope", PaymentStatus::Failed, None).await;
        assert!(matches!(result, Err(DbError::NotFound { .. })));
    }
}
