//! Review submission, one per purchase record. Uniqueness is enforced by
//! a DB constraint rather than a pre-check, the same avoid-TOCTOU shape
//! the rest of the crate uses for exclusivity.

use chrono::Utc;
use sqlx::SqlitePool;
use thiserror::Error;

use crate::models::UserId;

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("rating must be between 1 and 5")]
    InvalidRating,
    #[error("a review already exists for this purchase")]
    AlreadyReviewed,
}

pub struct ReviewRepository;

impl ReviewRepository {
    pub async fn submit(
        pool: &SqlitePool,
        purchase_record_id: i64,
        user_id: UserId,
        rating: i64,
        text: &str,
    ) -> Result<(), ReviewError> {
        if !(1..=5).contains(&rating) {
            return Err(ReviewError::InvalidRating);
        }
        let result = sqlx::query(
            "INSERT INTO reviews (purchase_record_id, user_id, rating, text, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT (purchase_record_id) DO NOTHING",
        )
        .bind(purchase_record_id)
        .bind(user_id)
        .bind(rating)
        .bind(text)
        .bind(Utc::now().to_rfc3339())
        .execute(pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ReviewError::AlreadyReviewed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::ProductRepository;
    use crate::db::Database;
    use crate::inventory::InventoryEngine;
    use crate::purchase::{LoggingReceiptSink, PurchaseFinaliser};
    use rust_decimal::Decimal;

    async fn seed_purchase(db: &Database) -> i64 {
        let product_id =
            ProductRepository::insert(db.pool(), "Berlin", "Mitte", "widget", "M", Decimal::from(10), "d", &[])
                .await
                .unwrap();
        crate::user::UserRepository::get_or_create(db.pool(), 1).await.unwrap();
        crate::user::UserRepository::credit_balance(db.pool(), 1, Decimal::from(10)).await.unwrap();
        InventoryEngine::reserve(db.pool(), 1, product_id).await.unwrap();
        let basket = InventoryEngine::snapshot_basket(db.pool(), 1).await.unwrap();
        let snapshot = InventoryEngine::basket_to_snapshot(&basket);
        let (alerts, _rx) = crate::alert::channel();
        PurchaseFinaliser::checkout_with_balance(db.pool(), &alerts, &LoggingReceiptSink, 1, &snapshot, None, Decimal::from(10))
            .await
            .unwrap();
        sqlx::query_scalar::<_, i64>("SELECT id FROM purchase_records WHERE user_id = 1")
            .fetch_one(db.pool())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn submit_rejects_a_second_review_for_the_same_purchase() {
        let db = Database::connect(":memory:").await.unwrap();
        let purchase_record_id = seed_purchase(&db).await;
        ReviewRepository::submit(db.pool(), purchase_record_id, 1, 5, "great").await.unwrap();
        let err = ReviewRepository::submit(db.pool(), purchase_record_id, 1, 4, "again").await.unwrap_err();
        assert!(matches!(err, ReviewError::AlreadyReviewed));
    }

    #[tokio::test]
    async fn submit_rejects_out_of_range_rating() {
        let db = Database::connect(":memory:").await.unwrap();
        let purchase_record_id = seed_purchase(&db).await;
        let err = ReviewRepository::submit(db.pool(), purchase_record_id, 1, 9, "x").await.unwrap_err();
        assert!(matches!(err, ReviewError::InvalidRating));
    }
}
