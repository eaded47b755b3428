//! # Promo Repository
//!
//! Promo codes, their scope targets, and redemptions.
//!
//! ## Redemption Lifecycle
//! ```text
//! preview_promo ──► find_by_code + redemption_counts   (no writes)
//!
//! settle unit   ──► ... order row written ...
//!                   record_redemption_in(order)        ← same unit
//!                   redemption_counts_in               ← re-check limits
//!                   COMMIT (or roll everything back)
//! ```
//! `promo_redemptions.order_id` is UNIQUE: an order redeems at most once.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::DbResult;
use lapak_core::validation::normalize_promo_code;
use lapak_core::{CoreError, Money, PromoCode, PromoKind, PromoScope, RedemptionCounts};

#[derive(Debug, sqlx::FromRow)]
struct PromoRow {
    id: String,
    code: String,
    kind: PromoKind,
    value: i64,
    starts_at: Option<DateTime<Utc>>,
    ends_at: Option<DateTime<Utc>>,
    min_subtotal_idr: Option<i64>,
    max_discount_idr: Option<i64>,
    usage_limit: Option<i64>,
    per_user_limit: Option<i64>,
    is_active: bool,
    scope: String,
}

impl PromoRow {
    fn into_promo(self, targets: BTreeSet<String>) -> PromoCode {
        let scope = match self.scope.as_str() {
            "category" => PromoScope::Category(targets),
            "product" => PromoScope::Product(targets),
            _ => PromoScope::Order,
        };

        PromoCode {
            id: self.id,
            code: self.code,
            kind: self.kind,
            value: self.value,
            starts_at: self.starts_at,
            ends_at: self.ends_at,
            min_subtotal: self.min_subtotal_idr.map(Money::from_idr),
            max_discount: self.max_discount_idr.map(Money::from_idr),
            usage_limit: self.usage_limit,
            per_user_limit: self.per_user_limit,
            is_active: self.is_active,
            scope,
        }
    }
}

fn scope_parts(scope: &PromoScope) -> (&'static str, Option<&BTreeSet<String>>) {
    match scope {
        PromoScope::Order => ("order", None),
        PromoScope::Category(ids) => ("category", Some(ids)),
        PromoScope::Product(ids) => ("product", Some(ids)),
    }
}

/// Repository for promo code operations.
#[derive(Debug, Clone)]
pub struct PromoRepository {
    pool: SqlitePool,
}

impl PromoRepository {
    /// Creates a new PromoRepository.
    pub fn new(pool: SqlitePool) -> Self {
        PromoRepository { pool }
    }

    /// Inserts a promo code with its scope targets.
    ///
    /// The code is normalised (trimmed, upper-cased) before storage; the
    /// returned promo carries the stored form.
    pub async fn insert(&self, promo: &PromoCode) -> DbResult<PromoCode> {
        let code = normalize_promo_code(&promo.code).map_err(CoreError::from)?;
        let (scope, targets) = scope_parts(&promo.scope);

        debug!(code = %code, scope = scope, "Inserting promo code");

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO promo_codes (
                id, code, kind, value, starts_at, ends_at,
                min_subtotal_idr, max_discount_idr, usage_limit, per_user_limit,
                is_active, scope, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&promo.id)
        .bind(&code)
        .bind(promo.kind)
        .bind(promo.value)
        .bind(promo.starts_at)
        .bind(promo.ends_at)
        .bind(promo.min_subtotal.map(|m| m.idr()))
        .bind(promo.max_discount.map(|m| m.idr()))
        .bind(promo.usage_limit)
        .bind(promo.per_user_limit)
        .bind(promo.is_active)
        .bind(scope)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        for target in targets.into_iter().flatten() {
            sqlx::query("INSERT INTO promo_targets (promo_id, target_id) VALUES (?, ?)")
                .bind(&promo.id)
                .bind(target)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        Ok(PromoCode {
            code,
            ..promo.clone()
        })
    }

    /// Finds a promo by code (case-insensitive).
    pub async fn find_by_code(&self, code: &str) -> DbResult<Option<PromoCode>> {
        let mut conn = self.pool.acquire().await?;
        Self::find_by_code_in(&mut conn, code).await
    }

    /// Finds a promo by code inside an open unit.
    pub async fn find_by_code_in(
        conn: &mut SqliteConnection,
        code: &str,
    ) -> DbResult<Option<PromoCode>> {
        let code = normalize_promo_code(code).map_err(CoreError::from)?;

        let row = sqlx::query_as::<_, PromoRow>(
            r#"
            SELECT id, code, kind, value, starts_at, ends_at,
                   min_subtotal_idr, max_discount_idr, usage_limit, per_user_limit,
                   is_active, scope
            FROM promo_codes
            WHERE code = ?
            "#,
        )
        .bind(&code)
        .fetch_optional(&mut *conn)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let targets: Vec<String> =
            sqlx::query_scalar("SELECT target_id FROM promo_targets WHERE promo_id = ?")
                .bind(&row.id)
                .fetch_all(&mut *conn)
                .await?;

        Ok(Some(row.into_promo(targets.into_iter().collect())))
    }

    /// Prior redemptions of a promo, globally and by one user.
    pub async fn redemption_counts(
        &self,
        promo_id: &str,
        user_id: &str,
    ) -> DbResult<RedemptionCounts> {
        let mut conn = self.pool.acquire().await?;
        Self::redemption_counts_in(&mut conn, promo_id, user_id).await
    }

    /// Redemption counts inside an open unit.
    pub async fn redemption_counts_in(
        conn: &mut SqliteConnection,
        promo_id: &str,
        user_id: &str,
    ) -> DbResult<RedemptionCounts> {
        let (global, by_user): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   COALESCE(SUM(CASE WHEN user_id = ?1 THEN 1 ELSE 0 END), 0)
            FROM promo_redemptions
            WHERE promo_id = ?2
            "#,
        )
        .bind(user_id)
        .bind(promo_id)
        .fetch_one(&mut *conn)
        .await?;

        Ok(RedemptionCounts { global, by_user })
    }

    /// Records a redemption for an order written in the same unit.
    pub async fn record_redemption_in(
        conn: &mut SqliteConnection,
        promo_id: &str,
        user_id: &str,
        order_id: &str,
        discount: Money,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO promo_redemptions (id, promo_id, user_id, order_id, discount_idr, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(promo_id)
        .bind(user_id)
        .bind(order_id)
        .bind(discount.idr())
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;

        debug!(promo_id = %promo_id, order_id = %order_id, "Promo redemption recorded");
        Ok(())
    }

    /// Enables or disables a promo.
    pub async fn set_active(&self, promo_id: &str, active: bool) -> DbResult<()> {
        let result = sqlx::query("UPDATE promo_codes SET is_active = ? WHERE id = ?")
            .bind(active)
            .bind(promo_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(crate::DbError::not_found("Promo code", promo_id));
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
    use crate::{Database, DbConfig, DbError};

    fn promo(code: &str, scope: PromoScope) -> PromoCode {
        PromoCode {
            id: Uuid::new_v4().to_string(),
            code: code.to_string(),
            kind: PromoKind::Percent,
            value: 10,
            starts_at: None,
            ends_at: None,
            min_subtotal: Some(Money::from_idr(50_000)),
            max_discount: None,
            usage_limit: Some(100),
            per_user_limit: Some(1),
            is_active: true,
            scope,
        }
    }

    #[tokio::test]
    async fn test_insert_and_find_case_insensitive() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let scope = PromoScope::Category(BTreeSet::from(["games".to_string(), "tools".to_string()]));
        let stored = db.promos().insert(&promo("gamer15", scope.clone())).await.unwrap();
        assert_eq!(stored.code, "GAMER15");

        let found = db.promos().find_by_code(" Gamer15 ").await.unwrap().unwrap();
        assert_eq!(found.scope, scope);
        assert_eq!(found.min_subtotal, Some(Money::from_idr(50_000)));
        assert_eq!(found.per_user_limit, Some(1));

        assert!(db.promos().find_by_code("OTHER").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_code_is_rejected() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.promos().insert(&promo("SAVE10", PromoScope::Order)).await.unwrap();
        let dup = db.promos().insert(&promo("save10", PromoScope::Order)).await;
        assert!(matches!(dup, Err(DbError::UniqueViolation { .. })));
    }

    #[tokio::test]
    async fn test_redemption_counts_start_at_zero() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let stored = db.promos().insert(&promo("SAVE10", PromoScope::Order)).await.unwrap();
        let counts = db.promos().redemption_counts(&stored.id, "u-1").await.unwrap();
        assert_eq!(counts, RedemptionCounts::default());
    }
}
