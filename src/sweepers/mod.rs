//! Background Sweepers. Three independent `tokio::spawn`ed interval
//! loops, directly generalising `sentinel::worker::SentinelWorker::run`'s
//! `loop { ...; sleep(interval).await }` shape — one loop per job since
//! the jobs run on different periods, rather than one shared loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::{Row, SqlitePool};
use tokio::task::JoinHandle;

use crate::config::SweeperConfig;
use crate::inventory::InventoryEngine;
use crate::payment::PendingPaymentRepository;

/// Notified when a sweeper resolves something that affects a live user
/// (a basket expired, a pending payment timed out). The gateway supplies
/// the real outbound-send implementation.
pub trait SweepNotifier: Send + Sync {
    fn notify_basket_expired(&self, user_id: i64);
    fn notify_payment_timed_out(&self, user_id: i64, payment_id: String);
}

pub struct LoggingNotifier;

impl SweepNotifier for LoggingNotifier {
    fn notify_basket_expired(&self, user_id: i64) {
        tracing::info!(user_id, "basket expired");
    }
    fn notify_payment_timed_out(&self, user_id: i64, payment_id: String) {
        tracing::info!(user_id, payment_id, "pending payment timed out");
    }
}

pub struct Sweepers {
    handles: Vec<JoinHandle<()>>,
}

impl Sweepers {
    /// Spawns all three jobs. Keep the returned value alive for the
    /// process lifetime; dropping it aborts all three loops.
    pub fn spawn(pool: SqlitePool, config: SweeperConfig, notifier: Arc<dyn SweepNotifier>) -> Self {
        let basket_handle = tokio::spawn(basket_sweep_loop(
            pool.clone(),
            config.basket_interval(),
            config.basket_interval(),
        ));
        let pending_handle = tokio::spawn(pending_payment_sweep_loop(
            pool.clone(),
            config.pending_payment_interval(),
            config.pending_payment_ttl(),
            notifier.clone(),
        ));
        let abandoned_handle = tokio::spawn(abandoned_reservation_sweep_loop(
            pool,
            config.abandoned_reservation_interval(),
            config.abandoned_reservation_grace(),
        ));

        Self { handles: vec![basket_handle, pending_handle, abandoned_handle] }
    }
}

impl Drop for Sweepers {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

async fn basket_sweep_loop(pool: SqlitePool, interval: Duration, ttl: Duration) {
    let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::seconds(900));
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        match InventoryEngine::sweep_expired(&pool, Utc::now(), ttl).await {
            Ok(count) if count > 0 => tracing::info!(count, "basket sweep released expired holds"),
            Ok(_) => {}
            Err(err) => tracing::warn!(%err, "basket sweep failed"),
        }
    }
}

async fn pending_payment_sweep_loop(
    pool: SqlitePool,
    interval: Duration,
    ttl: Duration,
    notifier: Arc<dyn SweepNotifier>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let cutoff = Utc::now() - chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::hours(2));
        let stale = match PendingPaymentRepository::list_older_than(&pool, cutoff).await {
            Ok(rows) => rows,
            Err(err) => {
                tracing::warn!(%err, "pending payment sweep failed to list rows");
                continue;
            }
        };

        for payment in stale {
            if payment.kind == crate::models::PendingPaymentKind::Purchase {
                if let Some(snapshot) = &payment.basket_snapshot {
                    let ids: Vec<_> = snapshot.iter().map(|i| i.product_id).collect();
                    if let Err(err) = InventoryEngine::release_products(&pool, &ids).await {
                        tracing::warn!(%err, payment_id = payment.provider_payment_id, "failed to release items for stale pending payment");
                    }
                }
            }
            if let Err(err) = PendingPaymentRepository::remove(&pool, &payment.provider_payment_id).await {
                tracing::warn!(%err, payment_id = payment.provider_payment_id, "failed to remove stale pending payment");
                continue;
            }
            notifier.notify_payment_timed_out(payment.user_id, payment.provider_payment_id);
        }
    }
}

async fn abandoned_reservation_sweep_loop(pool: SqlitePool, interval: Duration, grace: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        match sweep_abandoned_once(&pool, grace).await {
            Ok(count) if count > 0 => tracing::info!(count, "abandoned reservation sweep released holds"),
            Ok(_) => {}
            Err(err) => tracing::warn!(%err, "abandoned reservation sweep failed"),
        }
    }
}

/// A hold is "abandoned" if it is older than `grace` and the holding
/// user has no pending payment whose basket snapshot references that
/// product id.
async fn sweep_abandoned_once(pool: &SqlitePool, grace: Duration) -> Result<u64, sqlx::Error> {
    let cutoff = Utc::now() - chrono::Duration::from_std(grace).unwrap_or(chrono::Duration::minutes(20));
    let rows = sqlx::query("SELECT user_id, product_id FROM basket_holds WHERE inserted_at < ?1")
        .bind(cutoff.to_rfc3339())
        .fetch_all(pool)
        .await?;

    let mut released = 0u64;
    for row in rows {
        let user_id: i64 = row.get(0);
        let product_id: i64 = row.get(1);

        let pending = sqlx::query(
            "SELECT 1 FROM pending_payments WHERE user_id = ?1 AND basket_snapshot_json LIKE '%\"product_id\":' || ?2 || ',%'",
        )
        .bind(user_id)
        .bind(product_id)
        .fetch_optional(pool)
        .await?;

        if pending.is_none() {
            InventoryEngine::release(pool, user_id, product_id).await.ok();
            released += 1;
        }
    }
    Ok(released)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::ProductRepository;
    use crate::db::Database;
    use crate::inventory::InventoryEngine;
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn abandoned_sweep_ignores_holds_with_pending_payment() {
        let db = Database::connect(":memory:").await.unwrap();
        let product_id = ProductRepository::insert(db.pool(), "Berlin", "Mitte", "widget", "M", Decimal::TEN, "d", &[])
            .await
            .unwrap();
        InventoryEngine::reserve(db.pool(), 1, product_id).await.unwrap();
        sqlx::query("UPDATE basket_holds SET inserted_at = ?1 WHERE product_id = ?2")
            .bind((Utc::now() - chrono::Duration::minutes(30)).to_rfc3339())
            .bind(product_id)
            .execute(db.pool())
            .await
            .unwrap();

        let snapshot_json = format!(
            r#"[{{"product_id":{product_id},"original_price":"10","product_type":"widget","city":"Berlin","district":"Mitte","size":"M","name":"widget M","original_text":"d"}}]"#
        );
        sqlx::query(
            "INSERT INTO pending_payments (provider_payment_id, user_id, target_eur_cents, expected_crypto_amount, crypto_currency, created_at, kind, basket_snapshot_json) \
             VALUES ('p1', 1, 1000, '0.001', 'btc', ?1, 'purchase', ?2)",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(snapshot_json)
        .execute(db.pool())
        .await
        .unwrap();

        let released = sweep_abandoned_once(db.pool(), Duration::from_secs(20 * 60)).await.unwrap();
        assert_eq!(released, 0);
    }

    #[tokio::test]
    async fn abandoned_sweep_releases_holds_without_pending_payment() {
        let db = Database::connect(":memory:").await.unwrap();
        let product_id = ProductRepository::insert(db.pool(), "Berlin", "Mitte", "widget", "M", Decimal::TEN, "d", &[])
            .await
            .unwrap();
        InventoryEngine::reserve(db.pool(), 1, product_id).await.unwrap();
        sqlx::query("UPDATE basket_holds SET inserted_at = ?1 WHERE product_id = ?2")
            .bind((Utc::now() - chrono::Duration::minutes(30)).to_rfc3339())
            .bind(product_id)
            .execute(db.pool())
            .await
            .unwrap();

        let released = sweep_abandoned_once(db.pool(), Duration::from_secs(20 * 60)).await.unwrap();
        assert_eq!(released, 1);
    }
}
