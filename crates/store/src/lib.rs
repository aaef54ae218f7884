//! Durable state: permission tuples, per-chat sequence counters, and the
//! 30-day message history. All three live in SQLite behind async-trait
//! seams so tests can run against `sqlite::memory:`.

pub mod history;
pub mod permissions;
pub mod sequence;

pub use {
    history::{HistoryPage, HistoryStore, ListQuery, SqliteHistory},
    permissions::{PermissionEntry, PermissionStore, SqlitePermissions},
    sequence::{SequenceService, SqliteSequences},
};

/// Crate-wide result type for store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed store errors shared across the storage traits.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A history cursor that did not come from this store.
    #[error("malformed history cursor")]
    BadCursor,

    /// The backing database failed; callers treat this as retryable.
    #[error(transparent)]
    Database(#[from] sqlx::Error),

    /// JSON (de)serialization of a stored envelope failed.
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

/// Open a SQLite pool and initialize every table.
///
/// An in-memory database exists per connection, so the pool is pinned to a
/// single connection for `:memory:` URLs; file-backed databases pool
/// normally.
pub async fn open(database_url: &str) -> Result<sqlx::SqlitePool> {
    let pool = if database_url.contains(":memory:") {
        sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await?
    } else {
        sqlx::SqlitePool::connect(database_url).await?
    };
    permissions::init(&pool).await?;
    sequence::init(&pool).await?;
    history::init(&pool).await?;
    Ok(pool)
}
