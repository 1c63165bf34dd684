use crate::queries::{DbHelpers, Queries};
use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use tasksync_core::StorageError;

/// Durable string key/value store underneath the local cache.
///
/// `set_item` must replace a key atomically: after a failed write the previous
/// value is still readable.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

    async fn remove_items(&self, keys: &[&str]) -> Result<(), StorageError>;
}

pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (creating if needed) the database at `database_url` and apply the
    /// embedded migrations.
    pub async fn new(database_url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(DbHelpers::backend)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(DbHelpers::backend)?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// A private in-memory database. The pool keeps its single connection
    /// alive for the lifetime of the storage.
    pub async fn in_memory() -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(DbHelpers::backend)?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))
    }

    pub async fn item_count(&self) -> Result<i64, StorageError> {
        let row = sqlx::query(Queries::COUNT_ITEMS)
            .fetch_one(&self.pool)
            .await
            .map_err(DbHelpers::backend)?;
        row.try_get("count").map_err(DbHelpers::backend)
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let row = sqlx::query(Queries::GET_ITEM)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbHelpers::backend)?;

        row.as_ref().map(DbHelpers::parse_value).transpose()
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        sqlx::query(Queries::UPSERT_ITEM)
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await
            .map_err(DbHelpers::backend)?;
        Ok(())
    }

    async fn remove_items(&self, keys: &[&str]) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(DbHelpers::backend)?;
        for key in keys {
            sqlx::query(Queries::DELETE_ITEM)
                .bind(*key)
                .execute(&mut *tx)
                .await
                .map_err(DbHelpers::backend)?;
        }
        tx.commit().await.map_err(DbHelpers::backend)
    }
}

/// Volatile storage with switches to simulate a failing backend.
#[derive(Default)]
pub struct MemoryStorage {
    items: Mutex<HashMap<String, String>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("simulated read failure".to_string()));
        }
        Ok(self.items.lock().get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("simulated write failure".to_string()));
        }
        self.items.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove_items(&self, keys: &[&str]) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("simulated write failure".to_string()));
        }
        let mut items = self.items.lock();
        for key in keys {
            items.remove(*key);
        }
        Ok(())
    }
}
