//! # Product Repository
//!
//! Database operations for products and their encrypted content.
//!
//! ## Content Storage
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  products                               inventory_items                 │
//! │  ┌──────────────────────────────┐       ┌──────────────────────────┐   │
//! │  │ id           p-1             │       │ id  product  ciphertext  │   │
//! │  │ stock        3  ◄────────────┼───────│ 17  p-1      enc(KEY-A)  │   │
//! │  │ shared_content NULL          │ count │ 18  p-1      enc(KEY-B)  │   │
//! │  │ delivered_count 0            │       │ 21  p-1      enc(KEY-C)  │   │
//! │  └──────────────────────────────┘       └──────────────────────────┘   │
//! │                                                                         │
//! │  Item kinds (stock based): stock == number of item rows, always.       │
//! │  Source code / unlimited:  shared_content holds the one encrypted      │
//! │                            file reference or repeated item.            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Items only ever enter through [`ProductRepository::restock`] and only
//! ever leave through the allocator.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use lapak_core::validation::{validate_percent, validate_price_idr, validate_product_name};
use lapak_core::{
    ContentKind, CoreError, InventoryKind, Money, Product, SaleDiscount, SecretCipher,
    ValidationError,
};

/// Columns selected for every product read.
pub(crate) const PRODUCT_COLUMNS: &str = r#"
    id, name, category_id, base_price_idr, sale_price_idr, sale_percent,
    sale_start_at, sale_end_at, content_kind, inventory_kind, stock,
    delivered_count, (shared_content IS NOT NULL) AS has_shared_content,
    is_published, deleted_at, created_at, updated_at
"#;

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ProductRow {
    id: String,
    name: String,
    category_id: Option<String>,
    base_price_idr: i64,
    sale_price_idr: Option<i64>,
    sale_percent: Option<i64>,
    sale_start_at: Option<DateTime<Utc>>,
    sale_end_at: Option<DateTime<Utc>>,
    content_kind: ContentKind,
    inventory_kind: InventoryKind,
    stock: i64,
    delivered_count: i64,
    has_shared_content: i64,
    is_published: bool,
    deleted_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
        // The table CHECK keeps price and percent mutually exclusive.
        let sale = match (row.sale_price_idr, row.sale_percent) {
            (Some(price), _) => Some(SaleDiscount::Price(Money::from_idr(price))),
            (None, Some(percent)) => Some(SaleDiscount::Percent(percent.clamp(0, 100) as u8)),
            (None, None) => None,
        };

        Product {
            id: row.id,
            name: row.name,
            category_id: row.category_id,
            base_price: Money::from_idr(row.base_price_idr),
            sale,
            sale_start_at: row.sale_start_at,
            sale_end_at: row.sale_end_at,
            content_kind: row.content_kind,
            inventory_kind: row.inventory_kind,
            stock: row.stock,
            delivered_count: row.delivered_count,
            has_shared_content: row.has_shared_content != 0,
            is_published: row.is_published,
            deleted_at: row.deleted_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Fields needed to create a product.
#[derive(Debug, Clone)]
pub struct NewProduct {
    pub name: String,
    pub category_id: Option<String>,
    pub base_price: Money,
    pub sale: Option<SaleDiscount>,
    pub sale_start_at: Option<DateTime<Utc>>,
    pub sale_end_at: Option<DateTime<Utc>>,
    pub content_kind: ContentKind,
    pub inventory_kind: InventoryKind,
    pub is_published: bool,
}

impl NewProduct {
    pub fn new(
        name: impl Into<String>,
        base_price: Money,
        content_kind: ContentKind,
        inventory_kind: InventoryKind,
    ) -> Self {
        NewProduct {
            name: name.into(),
            category_id: None,
            base_price,
            sale: None,
            sale_start_at: None,
            sale_end_at: None,
            content_kind,
            inventory_kind,
            is_published: true,
        }
    }

    pub fn category(mut self, category_id: impl Into<String>) -> Self {
        self.category_id = Some(category_id.into());
        self
    }

    pub fn sale(
        mut self,
        sale: SaleDiscount,
        starts_at: Option<DateTime<Utc>>,
        ends_at: Option<DateTime<Utc>>,
    ) -> Self {
        self.sale = Some(sale);
        self.sale_start_at = starts_at;
        self.sale_end_at = ends_at;
        self
    }

    pub fn unpublished(mut self) -> Self {
        self.is_published = false;
        self
    }

    fn validate(&self) -> Result<(), ValidationError> {
        validate_product_name(&self.name)?;
        validate_price_idr(self.base_price.idr())?;
        match self.sale {
            Some(SaleDiscount::Price(price)) => validate_price_idr(price.idr()),
            Some(SaleDiscount::Percent(percent)) => {
                validate_percent("sale percent", i64::from(percent))
            }
            None => Ok(()),
        }
    }
}

/// Repository for product and inventory operations.
#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

impl ProductRepository {
    /// Creates a new ProductRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ProductRepository { pool }
    }

    /// Inserts a new product with empty content.
    pub async fn insert(&self, new: &NewProduct) -> DbResult<Product> {
        new.validate().map_err(CoreError::from)?;

        let id = generate_product_id();
        let now = Utc::now();
        let (sale_price, sale_percent) = match new.sale {
            Some(SaleDiscount::Price(price)) => (Some(price.idr()), None),
            Some(SaleDiscount::Percent(percent)) => (None, Some(i64::from(percent))),
            None => (None, None),
        };

        debug!(id = %id, name = %new.name, "Inserting product");

        sqlx::query(
            r#"
            INSERT INTO products (
                id, name, category_id, base_price_idr, sale_price_idr, sale_percent,
                sale_start_at, sale_end_at, content_kind, inventory_kind,
                stock, delivered_count, shared_content, is_published,
                deleted_at, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, 0, NULL, ?, NULL, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&new.name)
        .bind(&new.category_id)
        .bind(new.base_price.idr())
        .bind(sale_price)
        .bind(sale_percent)
        .bind(new.sale_start_at)
        .bind(new.sale_end_at)
        .bind(new.content_kind)
        .bind(new.inventory_kind)
        .bind(new.is_published)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_by_id(&id)
            .await?
            .ok_or_else(|| DbError::not_found("Product", id))
    }

    /// Gets a product by its ID (soft-deleted products included).
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Product>> {
        let mut conn = self.pool.acquire().await?;
        Self::get_in(&mut conn, id).await
    }

    /// Gets a product inside an open unit.
    pub async fn get_in(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Product>> {
        let row = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {} FROM products WHERE id = ?",
            PRODUCT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(row.map(Product::from))
    }

    /// Loads several products at once, keyed by id. Missing ids are absent.
    pub async fn get_many(&self, ids: &[String]) -> DbResult<HashMap<String, Product>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM products WHERE id IN (",
            PRODUCT_COLUMNS
        ));
        let mut separated = qb.separated(", ");
        for id in ids {
            separated.push_bind(id.clone());
        }
        separated.push_unseparated(")");

        let rows = qb
            .build_query_as::<ProductRow>()
            .fetch_all(&self.pool)
            .await?;

        debug!(requested = ids.len(), found = rows.len(), "Loaded products");
        Ok(rows
            .into_iter()
            .map(|row| (row.id.clone(), Product::from(row)))
            .collect())
    }

    /// Appends encrypted items to a stock-based item product.
    ///
    /// Stock counter and item rows change in one unit, keeping
    /// `stock == number of items`.
    ///
    /// ## Returns
    /// The new stock level.
    pub async fn restock(
        &self,
        product_id: &str,
        items: &[String],
        cipher: &dyn SecretCipher,
    ) -> DbResult<i64> {
        if items.is_empty() {
            return Err(CoreError::from(ValidationError::Required {
                field: "items".to_string(),
            })
            .into());
        }

        let ciphertexts = items
            .iter()
            .map(|item| cipher.encrypt(item))
            .collect::<Result<Vec<_>, _>>()
            .map_err(CoreError::from)?;

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let new_stock: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE products
            SET stock = stock + ?1, updated_at = ?2
            WHERE id = ?3
              AND inventory_kind = 'stock_based'
              AND content_kind != 'source_code'
            RETURNING stock
            "#,
        )
        .bind(ciphertexts.len() as i64)
        .bind(now)
        .bind(product_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(new_stock) = new_stock else {
            tx.rollback().await?;
            return Err(match self.get_by_id(product_id).await? {
                None => DbError::not_found("Product", product_id),
                Some(_) => CoreError::from(ValidationError::NotAllowed {
                    field: "restock target".to_string(),
                    allowed: vec!["stock-based keys, access links or accounts".to_string()],
                })
                .into(),
            });
        };

        for ciphertext in &ciphertexts {
            sqlx::query(
                "INSERT INTO inventory_items (product_id, ciphertext, created_at) VALUES (?, ?, ?)",
            )
            .bind(product_id)
            .bind(ciphertext)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        info!(product_id = %product_id, added = items.len(), stock = new_stock, "Product restocked");
        Ok(new_stock)
    }

    /// Sets (or clears) the shared content: the file reference of a
    /// source-code product, or the repeated item of an unlimited product.
    pub async fn set_shared_content(
        &self,
        product_id: &str,
        plaintext: Option<&str>,
        cipher: &dyn SecretCipher,
    ) -> DbResult<()> {
        let ciphertext = plaintext
            .map(|value| cipher.encrypt(value))
            .transpose()
            .map_err(CoreError::from)?;

        let result = sqlx::query(
            "UPDATE products SET shared_content = ?1, updated_at = ?2 WHERE id = ?3",
        )
        .bind(ciphertext)
        .bind(Utc::now())
        .bind(product_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Product", product_id));
        }

        debug!(product_id = %product_id, configured = plaintext.is_some(), "Shared content set");
        Ok(())
    }

    /// Publishes or unpublishes a product.
    pub async fn set_published(&self, product_id: &str, published: bool) -> DbResult<()> {
        let result =
            sqlx::query("UPDATE products SET is_published = ?1, updated_at = ?2 WHERE id = ?3")
                .bind(published)
                .bind(Utc::now())
                .bind(product_id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Product", product_id));
        }
        Ok(())
    }

    /// Soft-deletes a product.
    ///
    /// Order items keep referencing it, so the row stays.
    pub async fn soft_delete(&self, product_id: &str) -> DbResult<()> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE products SET deleted_at = ?1, updated_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
        )
        .bind(now)
        .bind(product_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Product", product_id));
        }
        Ok(())
    }

    /// Number of item rows still stored for a product.
    pub async fn count_items(&self, product_id: &str) -> DbResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM inventory_items WHERE product_id = ?")
                .bind(product_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// Checks that the stock counter matches the stored item list.
    pub async fn verify_stock(&self, product_id: &str) -> DbResult<()> {
        let product = self
            .get_by_id(product_id)
            .await?
            .ok_or_else(|| DbError::not_found("Product", product_id))?;

        if !product.allocation_strategy().consumes_stock() {
            return Ok(());
        }

        let items = self.count_items(product_id).await?;
        if items != product.stock {
            return Err(CoreError::StockMismatch {
                product_id: product_id.to_string(),
                counter: product.stock,
                items,
            }
            .into());
        }
        Ok(())
    }

    /// Counts products that are not soft-deleted (for diagnostics).
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products WHERE deleted_at IS NULL")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

/// Helper to generate a new product ID.
pub fn generate_product_id() -> String {
    Uuid::new_v4().to_string()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use chrono::Duration;
    use lapak_core::PlaintextCipher;

    async fn db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_read_back() {
        let db = db().await;
        let start = Utc::now() - Duration::days(1);
        let new = NewProduct::new(
            "Office 2021 Key",
            Money::from_idr(150_000),
            ContentKind::Keys,
            InventoryKind::StockBased,
        )
        .category("software")
        .sale(SaleDiscount::Percent(20), Some(start), None);

        let product = db.products().insert(&new).await.unwrap();

        assert_eq!(product.name, "Office 2021 Key");
        assert_eq!(product.category_id.as_deref(), Some("software"));
        assert_eq!(product.sale, Some(SaleDiscount::Percent(20)));
        assert_eq!(product.stock, 0);
        assert!(!product.has_shared_content);
        assert!(product.is_purchasable());
    }

    #[tokio::test]
    async fn test_insert_rejects_bad_input() {
        let db = db().await;
        let new = NewProduct::new("", Money::from_idr(1), ContentKind::Keys, InventoryKind::Unlimited);
        assert!(matches!(
            db.products().insert(&new).await,
            Err(DbError::Domain(CoreError::Validation(_)))
        ));
    }

    #[tokio::test]
    async fn test_restock_keeps_counter_and_list_equal() {
        let db = db().await;
        let cipher = PlaintextCipher;
        let product = db
            .products()
            .insert(&NewProduct::new(
                "Steam Wallet 60K",
                Money::from_idr(60_000),
                ContentKind::Keys,
                InventoryKind::StockBased,
            ))
            .await
            .unwrap();

        let items = vec!["K1".to_string(), "K2".to_string()];
        assert_eq!(db.products().restock(&product.id, &items, &cipher).await.unwrap(), 2);
        assert_eq!(db.products().restock(&product.id, &items[..1], &cipher).await.unwrap(), 3);

        assert_eq!(db.products().count_items(&product.id).await.unwrap(), 3);
        db.products().verify_stock(&product.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_restock_rejects_shared_content_products() {
        let db = db().await;
        let product = db
            .products()
            .insert(&NewProduct::new(
                "Starter Kit Source",
                Money::from_idr(250_000),
                ContentKind::SourceCode,
                InventoryKind::StockBased,
            ))
            .await
            .unwrap();

        let result = db
            .products()
            .restock(&product.id, &["x".to_string()], &PlaintextCipher)
            .await;
        assert!(matches!(result, Err(DbError::Domain(CoreError::Validation(_)))));

        let missing = db
            .products()
            .restock("nope", &["x".to_string()], &PlaintextCipher)
            .await;
        assert!(matches!(missing, Err(DbError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_get_many_and_shared_content() {
        let db = db().await;
        let repo = db.products();
        let a = repo
            .insert(&NewProduct::new(
                "A",
                Money::from_idr(1_000),
                ContentKind::SourceCode,
                InventoryKind::Unlimited,
            ))
            .await
            .unwrap();
        repo.set_shared_content(&a.id, Some("files/a.zip"), &PlaintextCipher)
            .await
            .unwrap();

        let found = repo
            .get_many(&[a.id.clone(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[&a.id].has_shared_content);
    }

    #[tokio::test]
    async fn test_soft_delete_and_unpublish() {
        let db = db().await;
        let repo = db.products();
        let p = repo
            .insert(&NewProduct::new(
                "Netflix 1 Month",
                Money::from_idr(45_000),
                ContentKind::DigitalAccount,
                InventoryKind::StockBased,
            ))
            .await
            .unwrap();

        repo.set_published(&p.id, false).await.unwrap();
        assert!(!repo.get_by_id(&p.id).await.unwrap().unwrap().is_purchasable());

        repo.set_published(&p.id, true).await.unwrap();
        repo.soft_delete(&p.id).await.unwrap();
        assert!(!repo.get_by_id(&p.id).await.unwrap().unwrap().is_purchasable());
        assert_eq!(repo.count().await.unwrap(), 0);
        assert!(repo.soft_delete(&p.id).await.is_err());
    }
}
