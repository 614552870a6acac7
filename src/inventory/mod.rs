//! Exclusive reservation engine. The conditional `UPDATE ... WHERE
//! available = 1 AND reserved = 0` is the same "zero rows affected means
//! contended" idiom used for idempotency elsewhere in this crate
//! (`ON CONFLICT DO NOTHING` on a unique key there; a conditional flag
//! flip here).

use chrono::Utc;
use sqlx::{Row, SqlitePool};
use thiserror::Error;

use crate::catalogue::ProductRepository;
use crate::models::{BasketHoldView, BasketItemSnapshot, ProductId, UserId};

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
    Reserved,
    NotAvailable,
    AlreadyReserved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    NotHeldByUser,
}

pub struct InventoryEngine;

impl InventoryEngine {
    /// Conditional write: flips `reserved: 0 -> 1` only if the row is
    /// available and unheld, then inserts the hold in the same
    /// transaction. This single statement is the entire exclusivity
    /// guarantee: no other code path sets `reserved = 1`.
    pub async fn reserve(
        pool: &SqlitePool,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<ReserveOutcome, InventoryError> {
        let mut tx = pool.begin_with("BEGIN IMMEDIATE").await?;

        let result = sqlx::query(
            "UPDATE products SET reserved = 1 WHERE id = ?1 AND available = 1 AND reserved = 0",
        )
        .bind(product_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            // Either the row is gone/unavailable, or another holder won
            // the race. Distinguish the two for a better user message.
            let exists: Option<i64> = sqlx::query("SELECT 1 FROM products WHERE id = ?1 AND available = 1")
                .bind(product_id)
                .fetch_optional(&mut *tx)
                .await?
                .map(|r| r.get(0));
            tx.rollback().await?;
            return Ok(if exists.is_some() {
                ReserveOutcome::AlreadyReserved
            } else {
                ReserveOutcome::NotAvailable
            });
        }

        sqlx::query("INSERT INTO basket_holds (user_id, product_id, inserted_at) VALUES (?1, ?2, ?3)")
            .bind(user_id)
            .bind(product_id)
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(ReserveOutcome::Reserved)
    }

    /// Releases a hold only if it belongs to `user_id`. Idempotent: a
    /// hold that doesn't exist or belongs to someone else is reported as
    /// `NotHeldByUser` without side effects.
    pub async fn release(
        pool: &SqlitePool,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<ReleaseOutcome, InventoryError> {
        let mut tx = pool.begin_with("BEGIN IMMEDIATE").await?;

        let deleted = sqlx::query("DELETE FROM basket_holds WHERE product_id = ?1 AND user_id = ?2")
            .bind(product_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        if deleted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(ReleaseOutcome::NotHeldByUser);
        }

        sqlx::query("UPDATE products SET reserved = 0 WHERE id = ?1")
            .bind(product_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(ReleaseOutcome::Released)
    }

    pub async fn release_all_for_user(pool: &SqlitePool, user_id: UserId) -> Result<u64, InventoryError> {
        let mut tx = pool.begin_with("BEGIN IMMEDIATE").await?;
        let product_ids = Self::product_ids_for_user(&mut tx, user_id).await?;
        for product_id in &product_ids {
            sqlx::query("UPDATE products SET reserved = 0 WHERE id = ?1")
                .bind(product_id)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query("DELETE FROM basket_holds WHERE user_id = ?1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(product_ids.len() as u64)
    }

    /// Releases the specific product ids passed in, used when a pending
    /// payment is abandoned or underpaid and only those snapshot items
    /// should be freed rather than the user's whole basket.
    pub async fn release_products(
        pool: &SqlitePool,
        product_ids: &[ProductId],
    ) -> Result<(), InventoryError> {
        if product_ids.is_empty() {
            return Ok(());
        }
        let mut tx = pool.begin_with("BEGIN IMMEDIATE").await?;
        for product_id in product_ids {
            sqlx::query("DELETE FROM basket_holds WHERE product_id = ?1")
                .bind(product_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("UPDATE products SET reserved = 0 WHERE id = ?1")
                .bind(product_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn product_ids_for_user(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        user_id: UserId,
    ) -> Result<Vec<ProductId>, InventoryError> {
        let rows = sqlx::query("SELECT product_id FROM basket_holds WHERE user_id = ?1")
            .bind(user_id)
            .fetch_all(&mut **tx)
            .await?;
        Ok(rows.into_iter().map(|r| r.get(0)).collect())
    }

    /// Releases every hold older than `ttl`. Called by the basket
    /// sweeper every 60 seconds.
    pub async fn sweep_expired(
        pool: &SqlitePool,
        now: chrono::DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Result<u64, InventoryError> {
        let cutoff = now - ttl;
        let mut tx = pool.begin_with("BEGIN IMMEDIATE").await?;
        let expired: Vec<ProductId> = sqlx::query("SELECT product_id FROM basket_holds WHERE inserted_at < ?1")
            .bind(cutoff.to_rfc3339())
            .fetch_all(&mut *tx)
            .await?
            .into_iter()
            .map(|r| r.get(0))
            .collect();

        for product_id in &expired {
            sqlx::query("DELETE FROM basket_holds WHERE product_id = ?1")
                .bind(product_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("UPDATE products SET reserved = 0 WHERE id = ?1")
                .bind(product_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(expired.len() as u64)
    }

    /// Ordered view of a user's current basket, with enough fields to
    /// finalise a purchase even if the live row is later deleted.
    pub async fn snapshot_basket(
        pool: &SqlitePool,
        user_id: UserId,
    ) -> Result<Vec<BasketHoldView>, InventoryError> {
        let rows = sqlx::query(
            "SELECT product_id, inserted_at FROM basket_holds WHERE user_id = ?1 ORDER BY inserted_at ASC",
        )
        .bind(user_id)
        .fetch_all(pool)
        .await?;

        let mut views = Vec::with_capacity(rows.len());
        for row in rows {
            let product_id: ProductId = row.get(0);
            let inserted_at: String = row.get(1);
            if let Some(product) = ProductRepository::get(pool, product_id).await.ok().flatten() {
                views.push(BasketHoldView {
                    user_id,
                    product,
                    inserted_at: chrono::DateTime::parse_from_rfc3339(&inserted_at)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                });
            }
        }
        Ok(views)
    }

    pub fn basket_to_snapshot(basket: &[BasketHoldView]) -> Vec<BasketItemSnapshot> {
        basket
            .iter()
            .map(|view| BasketItemSnapshot {
                product_id: view.product.id,
                original_price: view.product.unit_price,
                product_type: view.product.product_type.clone(),
                city: view.product.city.clone(),
                district: view.product.district.clone(),
                size: view.product.size.clone(),
                name: format!("{} {}", view.product.product_type, view.product.size),
                original_text: view.product.description.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::ProductRepository;
    use crate::db::Database;
    use rust_decimal::Decimal;

    async fn seed_product(db: &Database) -> ProductId {
        ProductRepository::insert(
            db.pool(),
            "Berlin",
            "Mitte",
            "widget",
            "M",
            Decimal::new(1000, 2),
            "desc",
            &[],
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn reserve_is_exclusive() {
        let db = Database::connect(":memory:").await.unwrap();
        let product_id = seed_product(&db).await;

        let first = InventoryEngine::reserve(db.pool(), 1, product_id).await.unwrap();
        let second = InventoryEngine::reserve(db.pool(), 2, product_id).await.unwrap();

        assert_eq!(first, ReserveOutcome::Reserved);
        assert_eq!(second, ReserveOutcome::AlreadyReserved);
    }

    #[tokio::test]
    async fn release_is_idempotent_and_scoped_to_holder() {
        let db = Database::connect(":memory:").await.unwrap();
        let product_id = seed_product(&db).await;
        InventoryEngine::reserve(db.pool(), 1, product_id).await.unwrap();

        let wrong_user = InventoryEngine::release(db.pool(), 2, product_id).await.unwrap();
        assert_eq!(wrong_user, ReleaseOutcome::NotHeldByUser);

        let released = InventoryEngine::release(db.pool(), 1, product_id).await.unwrap();
        assert_eq!(released, ReleaseOutcome::Released);

        let again = InventoryEngine::reserve(db.pool(), 2, product_id).await.unwrap();
        assert_eq!(again, ReserveOutcome::Reserved);
    }

    #[tokio::test]
    async fn sweep_releases_only_expired_holds() {
        let db = Database::connect(":memory:").await.unwrap();
        let product_id = seed_product(&db).await;
        InventoryEngine::reserve(db.pool(), 1, product_id).await.unwrap();

        let future = Utc::now() + chrono::Duration::minutes(20);
        let count = InventoryEngine::sweep_expired(db.pool(), future, chrono::Duration::minutes(15))
            .await
            .unwrap();
        assert_eq!(count, 1);

        let basket = InventoryEngine::snapshot_basket(db.pool(), 1).await.unwrap();
        assert!(basket.is_empty());
    }

    #[tokio::test]
    async fn reserve_reports_not_available_for_missing_row() {
        let db = Database::connect(":memory:").await.unwrap();
        let outcome = InventoryEngine::reserve(db.pool(), 1, 999).await.unwrap();
        assert_eq!(outcome, ReserveOutcome::NotAvailable);
    }
}
