//! Admin action log. The in-chat admin CRUD dialogs themselves are an
//! external collaborator; this just records the fixed, already-decoded
//! commands the gateway dispatches (`AdminDeleteProduct`, `AdminBroadcast`)
//! the same way the rest of the crate records state changes: one append
//! per action, never mutated afterwards.

use chrono::Utc;
use sqlx::SqlitePool;

pub struct AdminActionLogRepository;

impl AdminActionLogRepository {
    pub async fn record(
        pool: &SqlitePool,
        admin_user_id: i64,
        action: &str,
        detail: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO admin_action_log (admin_user_id, action, detail, created_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(admin_user_id)
        .bind(action)
        .bind(detail)
        .bind(Utc::now().to_rfc3339())
        .execute(pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use sqlx::Row;

    #[tokio::test]
    async fn record_appends_a_row() {
        let db = Database::connect(":memory:").await.unwrap();
        AdminActionLogRepository::record(db.pool(), 1, "delete_product", "id=5").await.unwrap();
        let row = sqlx::query("SELECT admin_user_id, action, detail FROM admin_action_log")
            .fetch_one(db.pool())
            .await
            .unwrap();
        let admin_user_id: i64 = row.get(0);
        let action: String = row.get(1);
        assert_eq!(admin_user_id, 1);
        assert_eq!(action, "delete_product");
    }
}
