//! Pending payment persistence. The provider payment id is the
//! idempotency key for callback dispatch; removal of the row is the
//! linearisation point other readers rely on.

use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::{Row, SqlitePool};

use crate::models::{BasketItemSnapshot, PendingPayment, PendingPaymentKind, UserId};

pub struct PendingPaymentRepository;

fn kind_to_str(kind: PendingPaymentKind) -> &'static str {
    match kind {
        PendingPaymentKind::Purchase => "purchase",
        PendingPaymentKind::Refill => "refill",
    }
}

fn str_to_kind(s: &str) -> PendingPaymentKind {
    match s {
        "purchase" => PendingPaymentKind::Purchase,
        _ => PendingPaymentKind::Refill,
    }
}

impl PendingPaymentRepository {
    pub async fn insert(pool: &SqlitePool, payment: &PendingPayment) -> Result<(), sqlx::Error> {
        let snapshot_json = payment
            .basket_snapshot
            .as_ref()
            .map(|s| serde_json::to_string(s).unwrap_or_default());

        sqlx::query(
            "INSERT INTO pending_payments \
             (provider_payment_id, user_id, target_eur_cents, expected_crypto_amount, crypto_currency, \
              created_at, kind, basket_snapshot_json, discount_code) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(&payment.provider_payment_id)
        .bind(payment.user_id)
        .bind(crate::money::to_minor_units(payment.target_eur))
        .bind(payment.expected_crypto_amount.to_string())
        .bind(&payment.crypto_currency)
        .bind(payment.created_at.to_rfc3339())
        .bind(kind_to_str(payment.kind))
        .bind(snapshot_json)
        .bind(&payment.discount_code)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn get(pool: &SqlitePool, provider_payment_id: &str) -> Result<Option<PendingPayment>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT provider_payment_id, user_id, target_eur_cents, expected_crypto_amount, crypto_currency, \
             created_at, kind, basket_snapshot_json, discount_code \
             FROM pending_payments WHERE provider_payment_id = ?1",
        )
        .bind(provider_payment_id)
        .fetch_optional(pool)
        .await?;

        Ok(row.map(|row| {
            let snapshot_json: Option<String> = row.get(7);
            let basket_snapshot: Option<Vec<BasketItemSnapshot>> =
                snapshot_json.and_then(|s| serde_json::from_str(&s).ok());
            PendingPayment {
                provider_payment_id: row.get(0),
                user_id: row.get(1),
                target_eur: crate::money::from_minor_units(row.get(2)),
                expected_crypto_amount: row.get::<String, _>(3).parse().unwrap_or(Decimal::ZERO),
                crypto_currency: row.get(4),
                created_at: chrono::DateTime::parse_from_rfc3339(&row.get::<String, _>(5))
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
                kind: str_to_kind(&row.get::<String, _>(6)),
                basket_snapshot,
                discount_code: row.get(8),
            }
        }))
    }

    /// Removal is the linearisation point: once this returns, any
    /// concurrent reader that observes the record absent is guaranteed
    /// the side effects already committed.
    pub async fn remove(pool: &SqlitePool, provider_payment_id: &str) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM pending_payments WHERE provider_payment_id = ?1")
            .bind(provider_payment_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn list_older_than(
        pool: &SqlitePool,
        cutoff: chrono::DateTime<Utc>,
    ) -> Result<Vec<PendingPayment>, sqlx::Error> {
        let rows = sqlx::query("SELECT provider_payment_id FROM pending_payments WHERE created_at < ?1")
            .bind(cutoff.to_rfc3339())
            .fetch_all(pool)
            .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get(0);
            if let Some(payment) = Self::get(pool, &id).await? {
                out.push(payment);
            }
        }
        Ok(out)
    }

    pub async fn list_by_user(pool: &SqlitePool, user_id: UserId) -> Result<Vec<PendingPayment>, sqlx::Error> {
        let rows = sqlx::query("SELECT provider_payment_id FROM pending_payments WHERE user_id = ?1")
            .bind(user_id)
            .fetch_all(pool)
            .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get(0);
            if let Some(payment) = Self::get(pool, &id).await? {
                out.push(payment);
            }
        }
        Ok(out)
    }
}
