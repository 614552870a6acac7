//! User account repository. Generalises `account::repository::UserRepository`'s
//! static-struct-of-async-fns pattern, with balance mutation expressed as
//! conditional updates the way `funding::service::TransferService` debits
//! and credits balances.

use rust_decimal::Decimal;
use sqlx::{Row, SqlitePool};
use thiserror::Error;

use crate::money;
use crate::models::{User, UserId};

#[derive(Debug, Error)]
pub enum UserError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("insufficient balance")]
    InsufficientBalance,
    #[error("user is banned")]
    Banned,
}

pub struct UserRepository;

struct UserRow {
    id: i64,
    language: String,
    balance_cents: i64,
    lifetime_purchases: i64,
    is_reseller: i64,
    is_banned: i64,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            language: row.language,
            balance: money::from_minor_units(row.balance_cents),
            lifetime_purchases: row.lifetime_purchases,
            is_reseller: row.is_reseller != 0,
            is_banned: row.is_banned != 0,
        }
    }
}

impl UserRepository {
    /// Returns the user, creating a fresh row (balance 0, language "en")
    /// on first contact. Users are never destroyed; banning is a flag.
    pub async fn get_or_create(pool: &SqlitePool, user_id: UserId) -> Result<User, UserError> {
        sqlx::query("INSERT INTO users (id) VALUES (?1) ON CONFLICT (id) DO NOTHING")
            .bind(user_id)
            .execute(pool)
            .await?;

        let row = sqlx::query(
            "SELECT id, language, balance_cents, lifetime_purchases, is_reseller, is_banned FROM users WHERE id = ?1",
        )
        .bind(user_id)
        .fetch_one(pool)
        .await?;

        let user_row = UserRow {
            id: row.get(0),
            language: row.get(1),
            balance_cents: row.get(2),
            lifetime_purchases: row.get(3),
            is_reseller: row.get(4),
            is_banned: row.get(5),
        };
        Ok(User::from(user_row))
    }

    pub async fn set_language(pool: &SqlitePool, user_id: UserId, language: &str) -> Result<(), UserError> {
        sqlx::query("UPDATE users SET language = ?1 WHERE id = ?2")
            .bind(language)
            .bind(user_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn set_banned(pool: &SqlitePool, user_id: UserId, banned: bool) -> Result<(), UserError> {
        sqlx::query("UPDATE users SET is_banned = ?1 WHERE id = ?2")
            .bind(banned as i64)
            .bind(user_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Credits `amount` to the user's balance. Amount must be
    /// non-negative; this is an accumulation, not a transfer.
    pub async fn credit_balance(
        executor: impl sqlx::SqliteExecutor<'_>,
        user_id: UserId,
        amount: Decimal,
    ) -> Result<(), UserError> {
        sqlx::query("UPDATE users SET balance_cents = balance_cents + ?1 WHERE id = ?2")
            .bind(money::to_minor_units(amount))
            .bind(user_id)
            .execute(executor)
            .await?;
        Ok(())
    }

    /// Debits `amount` from the user's balance only if sufficient funds
    /// exist, via a single conditional update (the same CAS idiom the
    /// reservation engine uses on `products.reserved`).
    pub async fn debit_balance_if_sufficient(
        executor: impl sqlx::SqliteExecutor<'_>,
        user_id: UserId,
        amount: Decimal,
    ) -> Result<bool, UserError> {
        let cents = money::to_minor_units(amount);
        let result = sqlx::query(
            "UPDATE users SET balance_cents = balance_cents - ?1 \
             WHERE id = ?2 AND balance_cents >= ?1",
        )
        .bind(cents)
        .bind(user_id)
        .execute(executor)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn increment_lifetime_purchases(
        executor: impl sqlx::SqliteExecutor<'_>,
        user_id: UserId,
        by: i64,
    ) -> Result<(), UserError> {
        sqlx::query("UPDATE users SET lifetime_purchases = lifetime_purchases + ?1 WHERE id = ?2")
            .bind(by)
            .bind(user_id)
            .execute(executor)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let db = Database::connect(":memory:").await.unwrap();
        let u1 = UserRepository::get_or_create(db.pool(), 1).await.unwrap();
        let u2 = UserRepository::get_or_create(db.pool(), 1).await.unwrap();
        assert_eq!(u1.id, u2.id);
        assert_eq!(u1.balance, Decimal::ZERO);
    }

    #[tokio::test]
    async fn debit_fails_when_insufficient() {
        let db = Database::connect(":memory:").await.unwrap();
        UserRepository::get_or_create(db.pool(), 1).await.unwrap();
        let ok = UserRepository::debit_balance_if_sufficient(db.pool(), 1, Decimal::from(5))
            .await
            .unwrap();
        assert!(!ok);
    }

    #[tokio::test]
    async fn credit_then_debit_round_trips() {
        let db = Database::connect(":memory:").await.unwrap();
        UserRepository::get_or_create(db.pool(), 1).await.unwrap();
        UserRepository::credit_balance(db.pool(), 1, Decimal::from(20)).await.unwrap();
        let ok = UserRepository::debit_balance_if_sufficient(db.pool(), 1, Decimal::from(18))
            .await
            .unwrap();
        assert!(ok);
        let user = UserRepository::get_or_create(db.pool(), 1).await.unwrap();
        assert_eq!(user.balance, Decimal::from(2));
    }
}
