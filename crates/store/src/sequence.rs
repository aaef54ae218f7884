//! Per-scope gapless counters.
//!
//! The increment is a single linearizable statement against the database, so
//! two workers racing on the same scope can never observe the same value.
//! The ordered lane already serializes calls per group; the storage-level
//! guarantee covers accidental concurrency anyway.

use {async_trait::async_trait, sqlx::SqlitePool};

use crate::Result;

/// Monotonic counter producing consecutive integers starting at 1.
#[async_trait]
pub trait SequenceService: Send + Sync {
    async fn next(&self, scope: &str) -> Result<i64>;
}

/// Initialize the sequences table schema.
pub async fn init(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS sequences (
            scope TEXT    PRIMARY KEY,
            value INTEGER NOT NULL
        )",
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub struct SqliteSequences {
    pool: SqlitePool,
}

impl SqliteSequences {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SequenceService for SqliteSequences {
    async fn next(&self, scope: &str) -> Result<i64> {
        let value: i64 = sqlx::query_scalar(
            "INSERT INTO sequences (scope, value) VALUES (?, 1)
             ON CONFLICT (scope) DO UPDATE SET value = value + 1
             RETURNING value",
        )
        .bind(scope)
        .fetch_one(&self.pool)
        .await?;
        Ok(value)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Arc};

    use super::*;

    async fn test_service() -> SqliteSequences {
        let pool = crate::open("sqlite::memory:").await.unwrap();
        SqliteSequences::new(pool)
    }

    #[tokio::test]
    async fn starts_at_one_and_counts_up() {
        let seq = test_service().await;
        assert_eq!(seq.next("c1").await.unwrap(), 1);
        assert_eq!(seq.next("c1").await.unwrap(), 2);
        assert_eq!(seq.next("c1").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn scopes_are_independent() {
        let seq = test_service().await;
        assert_eq!(seq.next("c1").await.unwrap(), 1);
        assert_eq!(seq.next("c2").await.unwrap(), 1);
        assert_eq!(seq.next("c1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn concurrent_callers_never_share_a_value() {
        let seq = Arc::new(test_service().await);
        let mut tasks = Vec::new();
        for _ in 0..20 {
            let seq = Arc::clone(&seq);
            tasks.push(tokio::spawn(async move { seq.next("c1").await.unwrap() }));
        }
        let mut values = HashSet::new();
        for task in tasks {
            assert!(values.insert(task.await.unwrap()));
        }
        let expected: HashSet<i64> = (1..=20).collect();
        assert_eq!(values, expected);
    }
}
