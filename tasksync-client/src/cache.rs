//! Local cache of the logical collections.
//!
//! Each collection is stored as one JSON value under a fixed key and written
//! back whole. Reads never fail: a missing value or a storage error yields the
//! collection's default. Every read-modify-write of a collection runs under
//! that collection's async mutex so concurrent writers cannot lose updates.

use crate::storage::Storage;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tasksync_core::{default_tags, PendingChange, PendingTask, Settings, StorageError, Task};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Tasks,
    Tags,
    Settings,
    PendingTasks,
    PendingChanges,
}

impl Collection {
    pub const ALL: [Collection; 5] = [
        Collection::Tasks,
        Collection::Tags,
        Collection::Settings,
        Collection::PendingTasks,
        Collection::PendingChanges,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Collection::Tasks => "@tasks",
            Collection::Tags => "@tags",
            Collection::Settings => "@settings",
            Collection::PendingTasks => "@pendingTasks",
            Collection::PendingChanges => "@pendingChanges",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Ties a collection to the type stored under its key.
pub trait CollectionKind: Send + Sync + 'static {
    const COLLECTION: Collection;
    type Value: Serialize + DeserializeOwned + Send + Sync;

    fn default_value() -> Self::Value;
}

pub struct TasksCollection;
pub struct TagsCollection;
pub struct SettingsCollection;
pub struct PendingTasksCollection;
pub struct PendingChangesCollection;

impl CollectionKind for TasksCollection {
    const COLLECTION: Collection = Collection::Tasks;
    type Value = Vec<Task>;

    fn default_value() -> Self::Value {
        Vec::new()
    }
}

impl CollectionKind for TagsCollection {
    const COLLECTION: Collection = Collection::Tags;
    type Value = Vec<String>;

    fn default_value() -> Self::Value {
        default_tags()
    }
}

impl CollectionKind for SettingsCollection {
    const COLLECTION: Collection = Collection::Settings;
    type Value = Settings;

    fn default_value() -> Self::Value {
        Settings::default()
    }
}

impl CollectionKind for PendingTasksCollection {
    const COLLECTION: Collection = Collection::PendingTasks;
    type Value = Vec<PendingTask>;

    fn default_value() -> Self::Value {
        Vec::new()
    }
}

impl CollectionKind for PendingChangesCollection {
    const COLLECTION: Collection = Collection::PendingChanges;
    type Value = Vec<PendingChange>;

    fn default_value() -> Self::Value {
        Vec::new()
    }
}

pub struct LocalCache {
    storage: Arc<dyn Storage>,
    locks: [Mutex<()>; 5],
}

impl LocalCache {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            locks: [(); 5].map(|_| Mutex::new(())),
        }
    }

    async fn read<C: CollectionKind>(&self) -> Result<Option<C::Value>, StorageError> {
        let key = C::COLLECTION.key();
        match self.storage.get_item(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn write<C: CollectionKind>(&self, value: &C::Value) -> Result<(), StorageError> {
        let raw = serde_json::to_string(value)?;
        self.storage.set_item(C::COLLECTION.key(), &raw).await
    }

    /// Current value of a collection, or its default when missing or unreadable.
    pub async fn get<C: CollectionKind>(&self) -> C::Value {
        match self.read::<C>().await {
            Ok(Some(value)) => value,
            Ok(None) => C::default_value(),
            Err(e) => {
                tracing::error!(
                    "CACHE: Failed to read {}, using default: {}",
                    C::COLLECTION.key(),
                    e
                );
                C::default_value()
            }
        }
    }

    /// Replace a collection. On failure the previously persisted value stays.
    pub async fn set<C: CollectionKind>(&self, value: &C::Value) -> Result<(), StorageError> {
        let _guard = self.locks[C::COLLECTION.index()].lock().await;
        self.write::<C>(value).await.inspect_err(|e| {
            tracing::error!("CACHE: Failed to write {}: {}", C::COLLECTION.key(), e);
        })
    }

    /// Read-modify-write a collection under its lock.
    ///
    /// If the current value cannot be read, `f` is not called and nothing is
    /// written, so an unreadable collection is never overwritten with a
    /// modified default.
    pub async fn modify<C, F, R>(&self, f: F) -> Result<R, StorageError>
    where
        C: CollectionKind,
        F: FnOnce(&mut C::Value) -> R,
    {
        let key = C::COLLECTION.key();
        let _guard = self.locks[C::COLLECTION.index()].lock().await;

        let mut value = match self.read::<C>().await {
            Ok(value) => value.unwrap_or_else(C::default_value),
            Err(e) => {
                tracing::error!("CACHE: Failed to read {} for update: {}", key, e);
                return Err(e);
            }
        };

        let result = f(&mut value);

        if let Err(e) = self.write::<C>(&value).await {
            tracing::error!("CACHE: Failed to write {}: {}", key, e);
            return Err(e);
        }
        Ok(result)
    }

    /// Remove every collection. Takes all collection locks in a fixed order.
    pub async fn clear(&self) -> Result<(), StorageError> {
        let mut guards = Vec::with_capacity(self.locks.len());
        for lock in &self.locks {
            guards.push(lock.lock().await);
        }
        let keys: Vec<&str> = Collection::ALL.iter().map(|c| c.key()).collect();
        self.storage.remove_items(&keys).await.inspect_err(|e| {
            tracing::error!("CACHE: Failed to clear local data: {}", e);
        })?;
        tracing::info!("CACHE: Cleared all collections");
        Ok(())
    }

    pub async fn tasks(&self) -> Vec<Task> {
        self.get::<TasksCollection>().await
    }

    pub async fn save_tasks(&self, tasks: Vec<Task>) -> Result<(), StorageError> {
        self.set::<TasksCollection>(&tasks).await
    }

    pub async fn pending_tasks(&self) -> Vec<PendingTask> {
        self.get::<PendingTasksCollection>().await
    }

    pub async fn pending_changes(&self) -> Vec<PendingChange> {
        self.get::<PendingChangesCollection>().await
    }

    pub async fn tags(&self) -> Vec<String> {
        self.get::<TagsCollection>().await
    }

    /// Add a tag unless it is already present. Returns whether it was added.
    pub async fn add_tag(&self, tag: &str) -> Result<bool, StorageError> {
        let tag = tag.trim().to_string();
        if tag.is_empty() {
            return Ok(false);
        }
        self.modify::<TagsCollection, _, _>(|tags| {
            if tags.contains(&tag) {
                false
            } else {
                tags.push(tag);
                true
            }
        })
        .await
    }

    pub async fn delete_tag(&self, tag: &str) -> Result<bool, StorageError> {
        self.modify::<TagsCollection, _, _>(|tags| {
            let before = tags.len();
            tags.retain(|t| t != tag);
            tags.len() != before
        })
        .await
    }

    pub async fn settings(&self) -> Settings {
        self.get::<SettingsCollection>().await
    }

    pub async fn save_settings(&self, settings: &Settings) -> Result<(), StorageError> {
        self.set::<SettingsCollection>(settings).await
    }
}
