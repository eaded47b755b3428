//! # Inventory Allocator
//!
//! Takes content out of a product for one order line, inside the caller's
//! atomic unit.
//!
//! ## Strategies
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  ConsumeItems        UPDATE products SET stock = stock - n              │
//! │                        WHERE id = ? AND stock >= n     ── 0 rows? short │
//! │                      SELECT first n inventory_items ORDER BY id         │
//! │                      DELETE those n rows                                │
//! │                      decrypt ──► [Key, Key, ...]                        │
//! │                                                                         │
//! │  SharedArtifact      UPDATE products SET delivered_count += n           │
//! │                        WHERE id = ? AND shared_content IS NOT NULL      │
//! │                        RETURNING shared_content        ── none? short   │
//! │                      mint n links to the same file                      │
//! │                                                                         │
//! │  RepeatContent       UPDATE products SET delivered_count += n           │
//! │  UnlimitedArtifact     WHERE id = ? RETURNING shared_content            │
//! │                      one decrypted copy / n links / AccessGranted       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every path starts with a conditional write, so the availability check and
//! the decrement are the same statement.

use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::{debug, error, warn};

use crate::error::DbResult;
use lapak_core::allocation::{render_items, render_shared};
use lapak_core::{AllocationStrategy, CoreError, DeliveredContent, DeliveryContext, Product};

/// Allocates inventory for one buyer and order.
#[derive(Clone, Copy)]
pub struct InventoryAllocator<'a> {
    ctx: DeliveryContext<'a>,
}

impl<'a> InventoryAllocator<'a> {
    pub fn new(ctx: DeliveryContext<'a>) -> Self {
        InventoryAllocator { ctx }
    }

    /// Allocates `quantity` units of `product`.
    ///
    /// ## Returns
    /// Delivered content in plaintext. Sealing it for storage is the
    /// caller's job.
    ///
    /// ## Errors
    /// - `InsufficientStock` when the product cannot cover `quantity`
    /// - `StockMismatch` when the stock counter disagrees with the item rows
    /// - `ProductNotFound` when the product row is gone
    pub async fn allocate(
        &self,
        conn: &mut SqliteConnection,
        product: &Product,
        quantity: i64,
    ) -> DbResult<Vec<DeliveredContent>> {
        let strategy = product.allocation_strategy();
        debug!(
            product_id = %product.id,
            quantity = quantity,
            strategy = ?strategy,
            order_id = %self.ctx.order_id,
            "Allocating inventory"
        );

        match strategy {
            AllocationStrategy::ConsumeItems => self.consume_items(conn, product, quantity).await,
            AllocationStrategy::SharedArtifact => {
                let shared: Option<Option<String>> = sqlx::query_scalar(
                    r#"
                    UPDATE products
                    SET delivered_count = delivered_count + ?1, updated_at = ?2
                    WHERE id = ?3 AND shared_content IS NOT NULL
                    RETURNING shared_content
                    "#,
                )
                .bind(quantity)
                .bind(Utc::now())
                .bind(&product.id)
                .fetch_optional(&mut *conn)
                .await?;

                let Some(shared) = shared.flatten() else {
                    warn!(product_id = %product.id, "Source code product has no file configured");
                    return Err(CoreError::InsufficientStock {
                        product_id: product.id.clone(),
                        available: 0,
                        requested: quantity,
                    }
                    .into());
                };

                Ok(render_shared(
                    strategy,
                    product.content_kind,
                    &product.id,
                    Some(&shared),
                    quantity,
                    &self.ctx,
                )?)
            }
            AllocationStrategy::RepeatContent | AllocationStrategy::UnlimitedArtifact => {
                let shared: Option<Option<String>> = sqlx::query_scalar(
                    r#"
                    UPDATE products
                    SET delivered_count = delivered_count + ?1, updated_at = ?2
                    WHERE id = ?3
                    RETURNING shared_content
                    "#,
                )
                .bind(quantity)
                .bind(Utc::now())
                .bind(&product.id)
                .fetch_optional(&mut *conn)
                .await?;

                let Some(shared) = shared else {
                    return Err(CoreError::ProductNotFound(product.id.clone()).into());
                };

                Ok(render_shared(
                    strategy,
                    product.content_kind,
                    &product.id,
                    shared.as_deref(),
                    quantity,
                    &self.ctx,
                )?)
            }
        }
    }

    async fn consume_items(
        &self,
        conn: &mut SqliteConnection,
        product: &Product,
        quantity: i64,
    ) -> DbResult<Vec<DeliveredContent>> {
        let result = sqlx::query(
            r#"
            UPDATE products
            SET stock = stock - ?1, delivered_count = delivered_count + ?1, updated_at = ?2
            WHERE id = ?3 AND stock >= ?1
            "#,
        )
        .bind(quantity)
        .bind(Utc::now())
        .bind(&product.id)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            let available: Option<i64> =
                sqlx::query_scalar("SELECT stock FROM products WHERE id = ?")
                    .bind(&product.id)
                    .fetch_optional(&mut *conn)
                    .await?;

            let Some(available) = available else {
                return Err(CoreError::ProductNotFound(product.id.clone()).into());
            };

            warn!(
                product_id = %product.id,
                available = available,
                requested = quantity,
                "Insufficient stock"
            );
            return Err(CoreError::InsufficientStock {
                product_id: product.id.clone(),
                available,
                requested: quantity,
            }
            .into());
        }

        let rows: Vec<(i64, String)> = sqlx::query_as(
            "SELECT id, ciphertext FROM inventory_items WHERE product_id = ? ORDER BY id LIMIT ?",
        )
        .bind(&product.id)
        .bind(quantity)
        .fetch_all(&mut *conn)
        .await?;

        let max_id = rows.last().map(|(id, _)| *id).unwrap_or(0);
        let deleted = if rows.is_empty() {
            0
        } else {
            sqlx::query("DELETE FROM inventory_items WHERE product_id = ? AND id <= ?")
                .bind(&product.id)
                .bind(max_id)
                .execute(&mut *conn)
                .await?
                .rows_affected()
        };

        if rows.len() as i64 != quantity || deleted != quantity as u64 {
            error!(
                product_id = %product.id,
                requested = quantity,
                found = rows.len(),
                "Stock counter disagrees with item list"
            );
            return Err(CoreError::StockMismatch {
                product_id: product.id.clone(),
                counter: product.stock,
                items: rows.len() as i64,
            }
            .into());
        }

        let ciphertexts: Vec<String> = rows.into_iter().map(|(_, c)| c).collect();
        Ok(render_items(product.content_kind, &ciphertexts, self.ctx.cipher)?)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::product::NewProduct;
    use crate::{Database, DbConfig, DbError};
    use chrono::Duration;
    use lapak_core::{
        ContentKind, DownloadLink, DownloadLinkIssuer, InventoryKind, LinkError, Money,
        PlaintextCipher,
    };
    use uuid::Uuid;

    struct TestLinks;

    impl DownloadLinkIssuer for TestLinks {
        fn mint(&self, file_ref: &str, buyer_id: &str, order_id: &str) -> Result<DownloadLink, LinkError> {
            Ok(DownloadLink {
                url: format!("https://dl.test/{}?b={}&o={}&n={}", file_ref, buyer_id, order_id, Uuid::new_v4()),
                expires_at: Utc::now() + Duration::hours(1),
            })
        }
    }

    static CIPHER: PlaintextCipher = PlaintextCipher;
    static LINKS: TestLinks = TestLinks;

    fn ctx<'a>(buyer: &'a str, order: &'a str) -> DeliveryContext<'a> {
        DeliveryContext {
            buyer_id: buyer,
            order_id: order,
            cipher: &CIPHER,
            links: &LINKS,
        }
    }

    async fn product(db: &Database, content: ContentKind, inventory: InventoryKind) -> Product {
        db.products()
            .insert(&NewProduct::new("Item", Money::from_idr(100_000), content, inventory))
            .await
            .unwrap()
    }

    async fn allocate(db: &Database, product: &Product, qty: i64) -> DbResult<Vec<DeliveredContent>> {
        let mut tx = db.begin().await?;
        let delivered = InventoryAllocator::new(ctx("u-1", "o-1"))
            .allocate(&mut tx, product, qty)
            .await?;
        tx.commit().await?;
        Ok(delivered)
    }

    #[tokio::test]
    async fn test_consume_items_is_fifo() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let p = product(&db, ContentKind::Keys, InventoryKind::StockBased).await;
        db.products()
            .restock(&p.id, &["K1".into(), "K2".into(), "K3".into()], &CIPHER)
            .await
            .unwrap();

        let delivered = allocate(&db, &p, 2).await.unwrap();
        assert_eq!(
            delivered,
            vec![
                DeliveredContent::Key { value: "K1".into() },
                DeliveredContent::Key { value: "K2".into() },
            ]
        );

        let after = db.products().get_by_id(&p.id).await.unwrap().unwrap();
        assert_eq!(after.stock, 1);
        assert_eq!(after.delivered_count, 2);
        db.products().verify_stock(&p.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_insufficient_stock_changes_nothing() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let p = product(&db, ContentKind::DigitalAccount, InventoryKind::StockBased).await;
        db.products().restock(&p.id, &["acc-1".into()], &CIPHER).await.unwrap();

        let err = allocate(&db, &p, 2).await.unwrap_err();
        match err {
            DbError::Domain(CoreError::InsufficientStock { available, requested, .. }) => {
                assert_eq!(available, 1);
                assert_eq!(requested, 2);
            }
            other => panic!("expected insufficient stock, got {:?}", other),
        }
        assert_eq!(db.products().count_items(&p.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_counter_without_items_is_a_mismatch() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let p = product(&db, ContentKind::Keys, InventoryKind::StockBased).await;
        sqlx::query("UPDATE products SET stock = 2 WHERE id = ?")
            .bind(&p.id)
            .execute(db.pool())
            .await
            .unwrap();

        let err = allocate(&db, &p, 1).await.unwrap_err();
        assert!(err.as_domain().map(CoreError::is_consistency_violation).unwrap_or(false));
    }

    #[tokio::test]
    async fn test_shared_artifact_mints_links_without_touching_stock() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let p = product(&db, ContentKind::SourceCode, InventoryKind::StockBased).await;

        let err = allocate(&db, &p, 1).await.unwrap_err();
        assert!(matches!(
            err,
            DbError::Domain(CoreError::InsufficientStock { available: 0, .. })
        ));

        db.products()
            .set_shared_content(&p.id, Some("files/app.zip"), &CIPHER)
            .await
            .unwrap();
        let delivered = allocate(&db, &p, 2).await.unwrap();
        assert_eq!(delivered.len(), 2);
        assert!(delivered.iter().all(|d| matches!(d, DeliveredContent::Download { .. })));
        assert_ne!(delivered[0], delivered[1]);

        let after = db.products().get_by_id(&p.id).await.unwrap().unwrap();
        assert_eq!(after.stock, 0);
        assert_eq!(after.delivered_count, 2);
    }

    #[tokio::test]
    async fn test_repeat_content_and_access_granted() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let p = product(&db, ContentKind::AccessLink, InventoryKind::Unlimited).await;

        let granted = allocate(&db, &p, 3).await.unwrap();
        assert_eq!(granted, vec![DeliveredContent::AccessGranted]);

        db.products()
            .set_shared_content(&p.id, Some("https://course.example/join"), &CIPHER)
            .await
            .unwrap();
        let repeated = allocate(&db, &p, 2).await.unwrap();
        assert_eq!(
            repeated,
            vec![DeliveredContent::AccessLink {
                url: "https://course.example/join".into()
            }]
        );

        let after = db.products().get_by_id(&p.id).await.unwrap().unwrap();
        assert_eq!(after.delivered_count, 5);
    }

    fn temp_db_path() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("lapak-test-{}.db", Uuid::new_v4()))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_buyers_never_oversell() {
        let db = Database::new(DbConfig::new(temp_db_path()).max_connections(8))
            .await
            .unwrap();
        let p = product(&db, ContentKind::Keys, InventoryKind::StockBased).await;
        let keys: Vec<String> = (0..5).map(|i| format!("KEY-{}", i)).collect();
        db.products().restock(&p.id, &keys, &CIPHER).await.unwrap();

        let mut handles = Vec::new();
        for buyer in 0..12 {
            let db = db.clone();
            let p = p.clone();
            handles.push(tokio::spawn(async move {
                let buyer = format!("u-{}", buyer);
                let mut tx = db.begin().await?;
                let delivered = InventoryAllocator::new(ctx(&buyer, "o"))
                    .allocate(&mut tx, &p, 1)
                    .await?;
                tx.commit().await?;
                Ok::<_, DbError>(delivered)
            }));
        }

        let mut delivered: Vec<DeliveredContent> = Vec::new();
        let mut short = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(items) => delivered.extend(items),
                Err(DbError::Domain(CoreError::InsufficientStock { .. })) => short += 1,
                Err(other) => panic!("unexpected error: {:?}", other),
            }
        }

        assert_eq!(delivered.len(), 5);
        assert_eq!(short, 7);
        let mut values: Vec<_> = delivered.iter().filter_map(|d| d.secret()).collect();
        values.sort();
        values.dedup();
        assert_eq!(values.len(), 5);

        let after = db.products().get_by_id(&p.id).await.unwrap().unwrap();
        assert_eq!(after.stock, 0);
        db.products().verify_stock(&p.id).await.unwrap();
    }
}
