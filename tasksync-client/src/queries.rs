use sqlx::{sqlite::SqliteRow, Row};
use tasksync_core::StorageError;

/// SQL queries for the client key/value store
pub struct Queries;

impl Queries {
    pub const GET_ITEM: &'static str = r#"
        SELECT value FROM kv_store WHERE key = ?1
    "#;

    /// Replaces the whole value of a key in one statement.
    pub const UPSERT_ITEM: &'static str = r#"
        INSERT INTO kv_store (key, value, updated_at)
        VALUES (?1, ?2, CURRENT_TIMESTAMP)
        ON CONFLICT(key) DO UPDATE SET
            value = excluded.value,
            updated_at = excluded.updated_at
    "#;

    pub const DELETE_ITEM: &'static str = r#"
        DELETE FROM kv_store WHERE key = ?1
    "#;

    pub const COUNT_ITEMS: &'static str = r#"
        SELECT COUNT(*) AS count FROM kv_store
    "#;
}

pub struct DbHelpers;

impl DbHelpers {
    pub fn parse_value(row: &SqliteRow) -> Result<String, StorageError> {
        row.try_get("value").map_err(DbHelpers::backend)
    }

    pub fn backend(err: sqlx::Error) -> StorageError {
        StorageError::Backend(err.to_string())
    }
}
