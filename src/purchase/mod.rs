//! Purchase Finaliser: the only path that consumes a reservation.
//! Transactional body grounded on `funding::service::TransferService::execute`'s
//! lock-check-mutate-commit shape; exact step ordering (stock decrement,
//! purchase log, discount-code CAS, basket clear, then post-commit
//! media-then-text delivery and row deletion) follows
//! `original_source/payment.py::_finalize_purchase`.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::{Row, SqlitePool};
use thiserror::Error;

use crate::alert::{AlertSender, OperatorAlert};
use crate::catalogue::ProductRepository;
use crate::discount::DiscountRepository;
use crate::inventory::InventoryEngine;
use crate::models::{BasketItemSnapshot, MediaDescriptor, ProductId, UserId};
use crate::pricing;
use crate::user::UserRepository;

#[derive(Debug, Error)]
pub enum FinaliseError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<crate::user::UserError> for FinaliseError {
    fn from(err: crate::user::UserError) -> Self {
        match err {
            crate::user::UserError::Database(e) => FinaliseError::Database(e),
            other => FinaliseError::Database(sqlx::Error::Protocol(other.to_string())),
        }
    }
}

impl From<crate::discount::DiscountError> for FinaliseError {
    fn from(err: crate::discount::DiscountError) -> Self {
        match err {
            crate::discount::DiscountError::Database(e) => FinaliseError::Database(e),
            other => FinaliseError::Database(sqlx::Error::Protocol(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("insufficient balance")]
    InsufficientBalance,
    #[error(transparent)]
    Finalise(#[from] FinaliseError),
}

#[derive(Debug, Clone)]
pub struct FinaliseOutcome {
    pub fulfilled_product_ids: Vec<ProductId>,
    pub skipped_product_ids: Vec<ProductId>,
    pub total_paid: Decimal,
}

/// Delivers the post-commit receipt. The gateway supplies the real
/// implementation (talking to the messaging platform); a logging no-op
/// is used where no live chat session backs the purchase (e.g. tests).
#[async_trait]
pub trait ReceiptSink: Send + Sync {
    async fn deliver_media(&self, user_id: UserId, media: &[MediaDescriptor]);
    async fn deliver_text(&self, user_id: UserId, text: &str);
}

pub struct LoggingReceiptSink;

#[async_trait]
impl ReceiptSink for LoggingReceiptSink {
    async fn deliver_media(&self, user_id: UserId, media: &[MediaDescriptor]) {
        tracing::info!(user_id, count = media.len(), "would deliver media receipt");
    }
    async fn deliver_text(&self, user_id: UserId, text: &str) {
        tracing::info!(user_id, len = text.len(), "would deliver text receipt");
    }
}

pub struct PurchaseFinaliser;

impl PurchaseFinaliser {
    /// The transactional body plus post-commit delivery. Called from two
    /// sites: the balance-checkout wrapper below, and the orchestrator's
    /// paid-in-full purchase branch.
    pub async fn finalize(
        pool: &SqlitePool,
        alerts: &AlertSender,
        receipts: &dyn ReceiptSink,
        user_id: UserId,
        snapshot: &[BasketItemSnapshot],
        discount_code: Option<&str>,
    ) -> Result<FinaliseOutcome, FinaliseError> {
        let discount = match discount_code {
            Some(code) => DiscountRepository::get(pool, code).await.ok().flatten(),
            None => None,
        };

        let mut tx = pool.begin_with("BEGIN IMMEDIATE").await?;

        // Redeem the code once, up front: whether this purchase is the
        // one that observes it as applied is decided here, before any
        // price is computed, so a buyer who loses the CAS race is logged
        // at full price rather than at a discount the cap never granted.
        let code_applied = match discount_code {
            Some(code) => {
                let redeemed = DiscountRepository::try_redeem(&mut *tx, code).await?;
                if !redeemed {
                    tracing::warn!(code, "discount code cap reached at finalisation; purchase honoured at full price");
                }
                redeemed
            }
            None => false,
        };

        let mut fulfilled = Vec::new();
        let mut skipped = Vec::new();
        let mut total_paid = Decimal::ZERO;

        for item in snapshot {
            let result = sqlx::query("UPDATE products SET available = available - 1 WHERE id = ?1 AND available > 0")
                .bind(item.product_id)
                .execute(&mut *tx)
                .await?;

            if result.rows_affected() == 0 {
                tracing::warn!(product_id = item.product_id, user_id, "skipping already-unavailable item at finalisation");
                skipped.push(item.product_id);
                continue;
            }

            let reseller_pct = sqlx::query(
                "SELECT percentage FROM reseller_discount_rules WHERE reseller_user_id = ?1 AND product_type = ?2",
            )
            .bind(user_id)
            .bind(&item.product_type)
            .fetch_optional(&mut *tx)
            .await?
            .map(|r| r.get::<String, _>(0).parse().unwrap_or(Decimal::ZERO))
            .unwrap_or(Decimal::ZERO);

            let mut paid_price = pricing::reseller_adjusted_price(item.original_price, reseller_pct);
            if code_applied {
                if let Some(code) = &discount {
                    paid_price = pricing::apply_code_to_item(paid_price, code, snapshot.len());
                }
            }

            sqlx::query(
                "INSERT INTO purchase_records (user_id, product_id, product_type, city, district, size, name, paid_price_cents, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )
            .bind(user_id)
            .bind(item.product_id)
            .bind(&item.product_type)
            .bind(&item.city)
            .bind(&item.district)
            .bind(&item.size)
            .bind(&item.name)
            .bind(crate::money::to_minor_units(paid_price))
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await?;

            total_paid += paid_price;
            fulfilled.push(item.product_id);
        }

        if !fulfilled.is_empty() {
            UserRepository::increment_lifetime_purchases(&mut *tx, user_id, fulfilled.len() as i64).await?;
        }

        sqlx::query("DELETE FROM basket_holds WHERE user_id = ?1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        // Post-commit, and only post-commit: deliver media before text
        // (large uploads may fail; text is the fallback receipt), then
        // delete the fulfilled rows.
        for product_id in &fulfilled {
            if let Ok(Some(product)) = ProductRepository::get(pool, *product_id).await {
                receipts.deliver_media(user_id, &product.media).await;
                receipts.deliver_text(user_id, &product.description).await;
            }
        }
        for product_id in &fulfilled {
            if let Err(err) = ProductRepository::delete(pool, *product_id).await {
                alerts
                    .send(OperatorAlert::InventoryInconsistency {
                        product_id: *product_id,
                        detail: format!("failed to delete fulfilled row after delivery: {err}"),
                    })
                    .ok();
            }
        }

        Ok(FinaliseOutcome {
            fulfilled_product_ids: fulfilled,
            skipped_product_ids: skipped,
            total_paid,
        })
    }

    /// Balance-based checkout: a separate atomic pre-step that debits
    /// the user's balance before calling `finalize`. On finaliser
    /// failure after a successful debit, attempts a compensating credit
    /// and alerts if that also fails.
    pub async fn checkout_with_balance(
        pool: &SqlitePool,
        alerts: &AlertSender,
        receipts: &dyn ReceiptSink,
        user_id: UserId,
        snapshot: &[BasketItemSnapshot],
        discount_code: Option<&str>,
        final_total: Decimal,
    ) -> Result<FinaliseOutcome, CheckoutError> {
        let debited = UserRepository::debit_balance_if_sufficient(pool, user_id, final_total)
            .await
            .map_err(FinaliseError::from)?;

        if !debited {
            let product_ids: Vec<ProductId> = snapshot.iter().map(|i| i.product_id).collect();
            InventoryEngine::release_products(pool, &product_ids).await.ok();
            return Err(CheckoutError::InsufficientBalance);
        }

        match Self::finalize(pool, alerts, receipts, user_id, snapshot, discount_code).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                if let Err(credit_err) = UserRepository::credit_balance(pool, user_id, final_total).await {
                    alerts
                        .send(OperatorAlert::CompensationFailed {
                            user_id,
                            amount: final_total.to_string(),
                            detail: credit_err.to_string(),
                        })
                        .ok();
                }
                alerts
                    .send(OperatorAlert::FinaliseFailedAfterPayment {
                        payment_id: None,
                        user_id,
                        detail: err.to_string(),
                    })
                    .ok();
                Err(CheckoutError::Finalise(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::ProductRepository;
    use crate::db::Database;
    use crate::discount::DiscountRepository;
    use crate::inventory::InventoryEngine;
    use crate::models::DiscountKind;
    use crate::user::UserRepository;

    struct NoopSink;
    #[async_trait]
    impl ReceiptSink for NoopSink {
        async fn deliver_media(&self, _user_id: UserId, _media: &[MediaDescriptor]) {}
        async fn deliver_text(&self, _user_id: UserId, _text: &str) {}
    }

    async fn setup_two_products(db: &Database) -> (ProductId, ProductId) {
        let p1 = ProductRepository::insert(db.pool(), "Berlin", "Mitte", "widget", "M", Decimal::from(10), "d1", &[])
            .await
            .unwrap();
        let p2 = ProductRepository::insert(db.pool(), "Berlin", "Mitte", "widget", "M", Decimal::from(10), "d2", &[])
            .await
            .unwrap();
        (p1, p2)
    }

    #[tokio::test]
    async fn basket_purchase_with_capped_discount_code() {
        let db = Database::connect(":memory:").await.unwrap();
        let (p1, p2) = setup_two_products(&db).await;
        UserRepository::get_or_create(db.pool(), 1).await.unwrap();
        UserRepository::credit_balance(db.pool(), 1, Decimal::from(20)).await.unwrap();
        DiscountRepository::create(db.pool(), "X10", DiscountKind::Percentage, Decimal::TEN, Some(1))
            .await
            .unwrap();

        InventoryEngine::reserve(db.pool(), 1, p1).await.unwrap();
        InventoryEngine::reserve(db.pool(), 1, p2).await.unwrap();
        let basket = InventoryEngine::snapshot_basket(db.pool(), 1).await.unwrap();
        let snapshot = InventoryEngine::basket_to_snapshot(&basket);

        let (alerts, _rx) = crate::alert::channel();
        let outcome = PurchaseFinaliser::checkout_with_balance(
            db.pool(),
            &alerts,
            &NoopSink,
            1,
            &snapshot,
            Some("X10"),
            Decimal::from(18),
        )
        .await
        .unwrap();

        assert_eq!(outcome.fulfilled_product_ids.len(), 2);
        assert_eq!(outcome.total_paid, Decimal::from(18));

        let user = UserRepository::get_or_create(db.pool(), 1).await.unwrap();
        assert_eq!(user.balance, Decimal::from(2));

        let code = DiscountRepository::get(db.pool(), "X10").await.unwrap().unwrap();
        assert_eq!(code.uses_count, 1);

        assert!(ProductRepository::get(db.pool(), p1).await.unwrap().is_none());
        assert!(ProductRepository::get(db.pool(), p2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn insufficient_balance_releases_reservation() {
        let db = Database::connect(":memory:").await.unwrap();
        let (p1, _p2) = setup_two_products(&db).await;
        UserRepository::get_or_create(db.pool(), 1).await.unwrap();

        InventoryEngine::reserve(db.pool(), 1, p1).await.unwrap();
        let basket = InventoryEngine::snapshot_basket(db.pool(), 1).await.unwrap();
        let snapshot = InventoryEngine::basket_to_snapshot(&basket);

        let (alerts, _rx) = crate::alert::channel();
        let err = PurchaseFinaliser::checkout_with_balance(
            db.pool(),
            &alerts,
            &NoopSink,
            1,
            &snapshot,
            None,
            Decimal::from(10),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, CheckoutError::InsufficientBalance));
        let product = ProductRepository::get(db.pool(), p1).await.unwrap().unwrap();
        assert!(!product.reserved);
    }

    #[tokio::test]
    async fn skips_item_deleted_mid_flight_without_aborting() {
        let db = Database::connect(":memory:").await.unwrap();
        let (p1, p2) = setup_two_products(&db).await;
        UserRepository::get_or_create(db.pool(), 1).await.unwrap();
        UserRepository::credit_balance(db.pool(), 1, Decimal::from(20)).await.unwrap();

        InventoryEngine::reserve(db.pool(), 1, p1).await.unwrap();
        InventoryEngine::reserve(db.pool(), 1, p2).await.unwrap();
        let basket = InventoryEngine::snapshot_basket(db.pool(), 1).await.unwrap();
        let snapshot = InventoryEngine::basket_to_snapshot(&basket);

        // Admin deletes p2 mid-flight.
        ProductRepository::delete(db.pool(), p2).await.unwrap();

        let (alerts, _rx) = crate::alert::channel();
        let outcome = PurchaseFinaliser::checkout_with_balance(
            db.pool(),
            &alerts,
            &NoopSink,
            1,
            &snapshot,
            None,
            Decimal::from(10),
        )
        .await
        .unwrap();

        assert_eq!(outcome.fulfilled_product_ids, vec![p1]);
        assert_eq!(outcome.skipped_product_ids, vec![p2]);
    }
}
