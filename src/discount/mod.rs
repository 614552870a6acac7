//! Discount code and reseller discount repositories. The uses-count cap
//! is enforced with the same single-statement CAS idiom the inventory
//! engine uses for exclusivity (`funding::service`'s conditional-update
//! style, generalised to a counter instead of a balance).

use rust_decimal::Decimal;
use sqlx::{Row, SqlitePool};
use thiserror::Error;

use crate::models::{DiscountCode, DiscountKind, ResellerDiscountRule, UserId};

#[derive(Debug, Error)]
pub enum DiscountError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("discount code not found or inactive")]
    Invalid,
    #[error("discount code amount does not match recomputed total")]
    Mismatch,
}

pub struct DiscountRepository;

fn kind_to_str(kind: DiscountKind) -> &'static str {
    match kind {
        DiscountKind::Percentage => "percentage",
        DiscountKind::FixedEur => "fixed_eur",
    }
}

fn str_to_kind(s: &str) -> DiscountKind {
    match s {
        "fixed_eur" => DiscountKind::FixedEur,
        _ => DiscountKind::Percentage,
    }
}

impl DiscountRepository {
    pub async fn get(pool: &SqlitePool, code: &str) -> Result<Option<DiscountCode>, DiscountError> {
        let row = sqlx::query(
            "SELECT code, kind, value, max_uses, uses_count, expires_at, active \
             FROM discount_codes WHERE code = ?1",
        )
        .bind(code)
        .fetch_optional(pool)
        .await?;

        Ok(row.map(|row| DiscountCode {
            code: row.get(0),
            kind: str_to_kind(&row.get::<String, _>(1)),
            value: row.get::<String, _>(2).parse().unwrap_or(Decimal::ZERO),
            max_uses: row.get(3),
            uses_count: row.get(4),
            expires_at: row
                .get::<Option<String>, _>(5)
                .and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok())
                .map(|dt| dt.with_timezone(&chrono::Utc)),
            active: row.get::<i64, _>(6) != 0,
        }))
    }

    pub async fn create(
        pool: &SqlitePool,
        code: &str,
        kind: DiscountKind,
        value: Decimal,
        max_uses: Option<i64>,
    ) -> Result<(), DiscountError> {
        sqlx::query(
            "INSERT INTO discount_codes (code, kind, value, max_uses, uses_count, active) \
             VALUES (?1, ?2, ?3, ?4, 0, 1)",
        )
        .bind(code)
        .bind(kind_to_str(kind))
        .bind(value.to_string())
        .bind(max_uses)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Conditionally increments `uses_count`, the single statement that
    /// prevents over-redemption under concurrent finalisation. A
    /// zero-row result means the cap was already reached.
    pub async fn try_redeem(
        executor: impl sqlx::SqliteExecutor<'_>,
        code: &str,
    ) -> Result<bool, DiscountError> {
        let result = sqlx::query(
            "UPDATE discount_codes SET uses_count = uses_count + 1 \
             WHERE code = ?1 AND (max_uses IS NULL OR uses_count < max_uses)",
        )
        .bind(code)
        .execute(executor)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

pub struct ResellerDiscountRepository;

impl ResellerDiscountRepository {
    pub async fn get_percentage(
        pool: &SqlitePool,
        reseller_user_id: UserId,
        product_type: &str,
    ) -> Result<Decimal, DiscountError> {
        let row = sqlx::query(
            "SELECT percentage FROM reseller_discount_rules \
             WHERE reseller_user_id = ?1 AND product_type = ?2",
        )
        .bind(reseller_user_id)
        .bind(product_type)
        .fetch_optional(pool)
        .await?;
        Ok(row
            .map(|r| r.get::<String, _>(0).parse().unwrap_or(Decimal::ZERO))
            .unwrap_or(Decimal::ZERO))
    }

    pub async fn set_rule(
        pool: &SqlitePool,
        rule: &ResellerDiscountRule,
    ) -> Result<(), DiscountError> {
        sqlx::query(
            "INSERT INTO reseller_discount_rules (reseller_user_id, product_type, percentage) \
             VALUES (?1, ?2, ?3) \
             ON CONFLICT (reseller_user_id, product_type) DO UPDATE SET percentage = excluded.percentage",
        )
        .bind(rule.reseller_user_id)
        .bind(&rule.product_type)
        .bind(rule.percentage.to_string())
        .execute(pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[tokio::test]
    async fn redeem_is_capped() {
        let db = Database::connect(":memory:").await.unwrap();
        DiscountRepository::create(db.pool(), "X10", DiscountKind::Percentage, Decimal::TEN, Some(1))
            .await
            .unwrap();
        let first = DiscountRepository::try_redeem(db.pool(), "X10").await.unwrap();
        let second = DiscountRepository::try_redeem(db.pool(), "X10").await.unwrap();
        assert!(first);
        assert!(!second);
        let code = DiscountRepository::get(db.pool(), "X10").await.unwrap().unwrap();
        assert_eq!(code.uses_count, 1);
    }
}
