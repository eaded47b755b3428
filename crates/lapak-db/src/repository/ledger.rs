//! # Ledger Repository
//!
//! Append-only wallet ledger with a cached balance per user.
//!
//! ## Invariant
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  balance_accounts.balance_idr == SUM(ledger_entries.amount_idr)         │
//! │                                                  for every user         │
//! │                                                                         │
//! │  post(user, +50.000, TOPUP)                                             │
//! │     ├── UPSERT balance_accounts   balance += 50.000                     │
//! │     └── INSERT ledger_entries     amount   = +50.000                    │
//! │                                   (same unit, both or neither)          │
//! │                                                                         │
//! │  debit_if_sufficient(user, 30.000)                                      │
//! │     ├── UPDATE balance_accounts SET balance = balance - 30.000          │
//! │     │      WHERE frozen = 0 AND balance >= 30.000   ── 0 rows? reject   │
//! │     └── INSERT ledger_entries     amount   = -30.000                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Entries are never updated or deleted; triggers in the schema abort any
//! attempt. A detected mismatch freezes the account instead of overwriting
//! the cached balance.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::DbResult;
use lapak_core::{BalanceAccount, CoreError, LedgerEntry, LedgerKind, LedgerReference, Money};

#[derive(Debug, sqlx::FromRow)]
struct LedgerRow {
    id: String,
    user_id: String,
    amount_idr: i64,
    kind: LedgerKind,
    reference: String,
    created_at: DateTime<Utc>,
}

impl LedgerRow {
    fn into_entry(self) -> DbResult<LedgerEntry> {
        Ok(LedgerEntry {
            id: self.id,
            user_id: self.user_id,
            amount: Money::from_idr(self.amount_idr),
            kind: self.kind,
            reference: serde_json::from_str(&self.reference)?,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AccountRow {
    user_id: String,
    balance_idr: i64,
    frozen: bool,
    updated_at: DateTime<Utc>,
}

impl From<AccountRow> for BalanceAccount {
    fn from(row: AccountRow) -> Self {
        BalanceAccount {
            user_id: row.user_id,
            balance: Money::from_idr(row.balance_idr),
            frozen: row.frozen,
            updated_at: row.updated_at,
        }
    }
}

/// Repository for the wallet ledger.
#[derive(Debug, Clone)]
pub struct LedgerRepository {
    pool: SqlitePool,
}

impl LedgerRepository {
    /// Creates a new LedgerRepository.
    pub fn new(pool: SqlitePool) -> Self {
        LedgerRepository { pool }
    }

    /// Posts an entry and adjusts the cached balance in its own unit.
    ///
    /// Does not check the resulting balance; callers that spend use
    /// [`LedgerRepository::debit_if_sufficient`] inside their unit instead.
    pub async fn post(
        &self,
        user_id: &str,
        amount: Money,
        kind: LedgerKind,
        reference: &LedgerReference,
    ) -> DbResult<LedgerEntry> {
        let mut tx = self.pool.begin().await?;
        let entry = Self::post_in(&mut tx, user_id, amount, kind, reference).await?;
        tx.commit().await?;
        Ok(entry)
    }

    /// Posts an entry inside an open unit.
    ///
    /// The balance upsert is the first statement, so when this opens a unit
    /// it also takes the write lock.
    pub async fn post_in(
        conn: &mut SqliteConnection,
        user_id: &str,
        amount: Money,
        kind: LedgerKind,
        reference: &LedgerReference,
    ) -> DbResult<LedgerEntry> {
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO balance_accounts (user_id, balance_idr, frozen, updated_at)
            VALUES (?1, ?2, 0, ?3)
            ON CONFLICT (user_id) DO UPDATE
            SET balance_idr = balance_idr + excluded.balance_idr,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(amount.idr())
        .bind(now)
        .execute(&mut *conn)
        .await?;

        let entry = Self::insert_entry(conn, user_id, amount, kind, reference, now).await?;
        debug!(user_id = %user_id, amount = %amount, kind = ?kind, "Ledger entry posted");
        Ok(entry)
    }

    /// Debits `amount` only if the account exists, is not frozen, and holds
    /// at least `amount`. Inserts the DEBIT entry in the same unit.
    ///
    /// ## Errors
    /// - `AccountFrozen` when the account is frozen
    /// - `InsufficientBalance` otherwise when the condition fails
    pub async fn debit_if_sufficient(
        conn: &mut SqliteConnection,
        user_id: &str,
        amount: Money,
        reference: &LedgerReference,
    ) -> DbResult<LedgerEntry> {
        let now = Utc::now();

        // A zero-total order needs an account row to hang its entry on.
        sqlx::query(
            r#"
            INSERT INTO balance_accounts (user_id, balance_idr, frozen, updated_at)
            VALUES (?1, 0, 0, ?2)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        let result = sqlx::query(
            r#"
            UPDATE balance_accounts
            SET balance_idr = balance_idr - ?1, updated_at = ?2
            WHERE user_id = ?3 AND frozen = 0 AND balance_idr >= ?1
            "#,
        )
        .bind(amount.idr())
        .bind(now)
        .bind(user_id)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            let account = Self::account_in(conn, user_id).await?;
            return Err(match account {
                Some(account) if account.frozen => CoreError::AccountFrozen(user_id.to_string()),
                other => CoreError::InsufficientBalance {
                    available: other.map(|a| a.balance).unwrap_or_default(),
                    required: amount,
                },
            }
            .into());
        }

        Self::insert_entry(conn, user_id, -amount, LedgerKind::Debit, reference, now).await
    }

    /// Compares the cached balance with the ledger sum.
    ///
    /// ## Returns
    /// The verified balance.
    ///
    /// ## Errors
    /// `LedgerMismatch` when they differ. The caller must roll back and
    /// [`LedgerRepository::freeze`] the account.
    pub async fn verify_account_in(conn: &mut SqliteConnection, user_id: &str) -> DbResult<Money> {
        let (cached, ledger): (Option<i64>, i64) = sqlx::query_as(
            r#"
            SELECT
                (SELECT balance_idr FROM balance_accounts WHERE user_id = ?1),
                (SELECT COALESCE(SUM(amount_idr), 0) FROM ledger_entries WHERE user_id = ?1)
            "#,
        )
        .bind(user_id)
        .fetch_one(&mut *conn)
        .await?;

        let cached = Money::from_idr(cached.unwrap_or(0));
        let ledger = Money::from_idr(ledger);
        if cached != ledger {
            error!(
                user_id = %user_id,
                cached = %cached,
                ledger = %ledger,
                "Ledger mismatch detected"
            );
            return Err(CoreError::LedgerMismatch {
                user_id: user_id.to_string(),
                cached,
                ledger,
            }
            .into());
        }
        Ok(cached)
    }

    /// Verifies an account outside any unit.
    pub async fn verify_account(&self, user_id: &str) -> DbResult<Money> {
        let mut conn = self.pool.acquire().await?;
        Self::verify_account_in(&mut conn, user_id).await
    }

    /// Freezes an account so no further debits succeed.
    ///
    /// Unfreezing is a manual reconciliation step and is not offered here.
    pub async fn freeze(&self, user_id: &str) -> DbResult<()> {
        sqlx::query("UPDATE balance_accounts SET frozen = 1, updated_at = ? WHERE user_id = ?")
            .bind(Utc::now())
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        info!(user_id = %user_id, "Balance account frozen");
        Ok(())
    }

    /// Gets a balance account.
    pub async fn account(&self, user_id: &str) -> DbResult<Option<BalanceAccount>> {
        let mut conn = self.pool.acquire().await?;
        Self::account_in(&mut conn, user_id).await
    }

    async fn account_in(
        conn: &mut SqliteConnection,
        user_id: &str,
    ) -> DbResult<Option<BalanceAccount>> {
        let row = sqlx::query_as::<_, AccountRow>(
            "SELECT user_id, balance_idr, frozen, updated_at FROM balance_accounts WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(row.map(BalanceAccount::from))
    }

    /// Cached balance; zero for users without an account.
    pub async fn balance(&self, user_id: &str) -> DbResult<Money> {
        Ok(self
            .account(user_id)
            .await?
            .map(|a| a.balance)
            .unwrap_or_default())
    }

    /// Sum of the user's ledger entries.
    pub async fn ledger_sum(&self, user_id: &str) -> DbResult<Money> {
        let sum: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount_idr), 0) FROM ledger_entries WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(Money::from_idr(sum))
    }

    /// All entries for a user, oldest first.
    pub async fn entries(&self, user_id: &str) -> DbResult<Vec<LedgerEntry>> {
        let rows = sqlx::query_as::<_, LedgerRow>(
            r#"
            SELECT id, user_id, amount_idr, kind, reference, created_at
            FROM ledger_entries
            WHERE user_id = ?
            ORDER BY created_at, rowid
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(LedgerRow::into_entry).collect()
    }

    /// All entries referring to an order, oldest first.
    pub async fn entries_for_reference(&self, reference_id: &str) -> DbResult<Vec<LedgerEntry>> {
        let rows = sqlx::query_as::<_, LedgerRow>(
            r#"
            SELECT id, user_id, amount_idr, kind, reference, created_at
            FROM ledger_entries
            WHERE reference_id = ?
            ORDER BY created_at, rowid
            "#,
        )
        .bind(reference_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(LedgerRow::into_entry).collect()
    }

    async fn insert_entry(
        conn: &mut SqliteConnection,
        user_id: &str,
        amount: Money,
        kind: LedgerKind,
        reference: &LedgerReference,
        now: DateTime<Utc>,
    ) -> DbResult<LedgerEntry> {
        let entry = LedgerEntry {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            amount,
            kind,
            reference: reference.clone(),
            created_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO ledger_entries (id, user_id, amount_idr, kind, reference_id, reference, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.user_id)
        .bind(amount.idr())
        .bind(kind)
        .bind(reference.reference_id())
        .bind(serde_json::to_string(reference)?)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Ok(entry)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig, DbError};

    fn manual(note: &str) -> LedgerReference {
        LedgerReference::Manual {
            note: note.to_string(),
        }
    }

    fn order_ref(id: &str) -> LedgerReference {
        LedgerReference::Order {
            order_id: id.to_string(),
        }
    }

    #[tokio::test]
    async fn test_post_keeps_balance_equal_to_ledger() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let ledger = db.ledger();

        ledger
            .post("u-1", Money::from_idr(100_000), LedgerKind::Topup, &manual("bank transfer"))
            .await
            .unwrap();
        ledger
            .post("u-1", Money::from_idr(-5_000), LedgerKind::Adjust, &manual("fee"))
            .await
            .unwrap();

        assert_eq!(ledger.balance("u-1").await.unwrap().idr(), 95_000);
        assert_eq!(ledger.ledger_sum("u-1").await.unwrap().idr(), 95_000);
        assert_eq!(ledger.verify_account("u-1").await.unwrap().idr(), 95_000);
        assert_eq!(ledger.entries("u-1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_debit_if_sufficient() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.ledger()
            .post("u-1", Money::from_idr(50_000), LedgerKind::Topup, &manual("seed"))
            .await
            .unwrap();

        let mut tx = db.begin().await.unwrap();
        let result =
            LedgerRepository::debit_if_sufficient(&mut tx, "u-1", Money::from_idr(100_000), &order_ref("o-1"))
                .await;
        match result {
            Err(DbError::Domain(CoreError::InsufficientBalance { available, required })) => {
                assert_eq!(available.idr(), 50_000);
                assert_eq!(required.idr(), 100_000);
            }
            other => panic!("expected insufficient balance, got {:?}", other),
        }

        let entry =
            LedgerRepository::debit_if_sufficient(&mut tx, "u-1", Money::from_idr(30_000), &order_ref("o-2"))
                .await
                .unwrap();
        assert_eq!(entry.amount.idr(), -30_000);
        assert_eq!(entry.kind, LedgerKind::Debit);
        tx.commit().await.unwrap();

        assert_eq!(db.ledger().verify_account("u-1").await.unwrap().idr(), 20_000);
        let for_order = db.ledger().entries_for_reference("o-2").await.unwrap();
        assert_eq!(for_order.len(), 1);
        assert_eq!(for_order[0].reference, order_ref("o-2"));
    }

    #[tokio::test]
    async fn test_debit_without_account() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut tx = db.begin().await.unwrap();

        let err = LedgerRepository::debit_if_sufficient(&mut tx, "new", Money::from_idr(1), &order_ref("o"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::Domain(CoreError::InsufficientBalance { .. })
        ));

        // Zero-total orders go through.
        LedgerRepository::debit_if_sufficient(&mut tx, "new", Money::zero(), &order_ref("o"))
            .await
            .unwrap();
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_mismatch_is_detected_and_freeze_blocks_debits() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.ledger()
            .post("u-1", Money::from_idr(10_000), LedgerKind::Topup, &manual("seed"))
            .await
            .unwrap();

        // Out-of-band write to the cache.
        sqlx::query("UPDATE balance_accounts SET balance_idr = balance_idr + 1 WHERE user_id = 'u-1'")
            .execute(db.pool())
            .await
            .unwrap();

        let err = db.ledger().verify_account("u-1").await.unwrap_err();
        assert!(matches!(
            err,
            DbError::Domain(CoreError::LedgerMismatch { .. })
        ));

        db.ledger().freeze("u-1").await.unwrap();
        assert!(db.ledger().account("u-1").await.unwrap().unwrap().frozen);

        let mut tx = db.begin().await.unwrap();
        let err = LedgerRepository::debit_if_sufficient(&mut tx, "u-1", Money::from_idr(1), &order_ref("o"))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::AccountFrozen(_))));
    }

    #[tokio::test]
    async fn test_entries_are_append_only() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.ledger()
            .post("u-1", Money::from_idr(10_000), LedgerKind::Topup, &manual("seed"))
            .await
            .unwrap();

        let update = sqlx::query("UPDATE ledger_entries SET amount_idr = 0")
            .execute(db.pool())
            .await;
        assert!(update.is_err());

        let delete = sqlx::query("DELETE FROM ledger_entries").execute(db.pool()).await;
        assert!(delete.is_err());
    }
}
