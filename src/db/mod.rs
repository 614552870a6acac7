//! Embedded storage connection. Generalises `account::db::Database`:
//! a `PgPool`-shaped wrapper becomes a `SqlitePool`-shaped one with the
//! same `connect`/`pool`/`health_check` surface.

pub mod schema;

use sqlx::sqlite::{SqlitePoolOptions, SqliteConnectOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn connect(database_path: &str) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{database_path}"))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(1) // single-writer embedded store
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.init_schema().await?;
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(&self) -> anyhow::Result<()> {
        for statement in schema::STATEMENTS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    /// Opens a transaction with SQLite's write-lock-at-start semantics,
    /// required for any body that touches stock or balance so the
    /// critical section can't interleave with a concurrent writer. The
    /// pool is additionally capped at one connection, so in this process
    /// the two mechanisms are redundant but the explicit `BEGIN
    /// IMMEDIATE` keeps the invariant correct even if the pool size is
    /// ever raised.
    pub async fn begin_immediate(&self) -> Result<sqlx::Transaction<'_, sqlx::Sqlite>, sqlx::Error> {
        self.pool.begin_with("BEGIN IMMEDIATE").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connects_and_initialises_schema() {
        let db = Database::connect(":memory:").await.expect("connect");
        assert!(db.health_check().await);
    }
}
