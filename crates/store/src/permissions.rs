//! `(userId, chatId) → role` lookups. The broker only reads `may`; the
//! grant/revoke surface is exposed over HTTP for the permission manager.

use {async_trait::async_trait, sqlx::SqlitePool};

use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionEntry {
    pub user_id: String,
    pub chat_id: String,
    pub role: String,
}

/// Permission tuples. Absent key means deny.
#[async_trait]
pub trait PermissionStore: Send + Sync {
    async fn may(&self, user_id: &str, chat_id: &str) -> Result<bool>;
    async fn grant(&self, user_id: &str, chat_id: &str, role: &str) -> Result<()>;
    /// Returns whether an entry existed.
    async fn revoke(&self, user_id: &str, chat_id: &str) -> Result<bool>;
    async fn list(&self, user_id: &str) -> Result<Vec<PermissionEntry>>;
}

/// Initialize the permissions table schema (usable with in-memory databases
/// in tests).
pub async fn init(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS permissions (
            user_id    TEXT    NOT NULL,
            chat_id    TEXT    NOT NULL,
            role       TEXT    NOT NULL,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (user_id, chat_id)
        )",
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub struct SqlitePermissions {
    pool: SqlitePool,
}

impl SqlitePermissions {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PermissionStore for SqlitePermissions {
    async fn may(&self, user_id: &str, chat_id: &str) -> Result<bool> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM permissions WHERE user_id = ? AND chat_id = ?")
                .bind(user_id)
                .bind(chat_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    async fn grant(&self, user_id: &str, chat_id: &str, role: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO permissions (user_id, chat_id, role, created_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT (user_id, chat_id) DO UPDATE SET role = excluded.role",
        )
        .bind(user_id)
        .bind(chat_id)
        .bind(role)
        .bind(relay_common::time::now_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn revoke(&self, user_id: &str, chat_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM permissions WHERE user_id = ? AND chat_id = ?")
            .bind(user_id)
            .bind(chat_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, user_id: &str) -> Result<Vec<PermissionEntry>> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            "SELECT user_id, chat_id, role FROM permissions
             WHERE user_id = ? ORDER BY chat_id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(user_id, chat_id, role)| PermissionEntry {
                user_id,
                chat_id,
                role,
            })
            .collect())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> SqlitePermissions {
        let pool = crate::open("sqlite::memory:").await.unwrap();
        SqlitePermissions::new(pool)
    }

    #[tokio::test]
    async fn absent_entry_denies() {
        let store = test_store().await;
        assert!(!store.may("user-1", "c1").await.unwrap());
    }

    #[tokio::test]
    async fn grant_then_may_then_revoke() {
        let store = test_store().await;
        store.grant("user-1", "c1", "member").await.unwrap();
        assert!(store.may("user-1", "c1").await.unwrap());
        assert!(!store.may("user-1", "c2").await.unwrap());
        assert!(!store.may("user-2", "c1").await.unwrap());

        assert!(store.revoke("user-1", "c1").await.unwrap());
        assert!(!store.may("user-1", "c1").await.unwrap());
        assert!(!store.revoke("user-1", "c1").await.unwrap());
    }

    #[tokio::test]
    async fn grant_is_an_upsert() {
        let store = test_store().await;
        store.grant("user-1", "c1", "member").await.unwrap();
        store.grant("user-1", "c1", "admin").await.unwrap();
        let entries = store.list("user-1").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].role, "admin");
    }
}
