//! Feature store abstraction used by the SDK to keep flag and segment data.
//!
//! The event pipeline does not read flags. It only asks the configured store for its component
//! type name, which is reported in the diagnostic init event. [`InMemoryFeatureStore`] is the
//! default implementation.
use std::{
    collections::HashMap,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use crate::{Error, Result};

/// Kind of data kept in a feature store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataKind {
    Features,
    Segments,
}

/// A flag or segment, stored as raw JSON together with its key and version.
///
/// Deleted items are kept as tombstones (`deleted == true`) so that an out-of-order upsert of an
/// older version cannot resurrect them.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedItem {
    pub key: String,
    pub version: u64,
    pub deleted: bool,
    pub data: serde_json::Value,
}

impl VersionedItem {
    pub fn new(key: impl Into<String>, version: u64, data: serde_json::Value) -> VersionedItem {
        VersionedItem {
            key: key.into(),
            version,
            deleted: false,
            data,
        }
    }

    fn tombstone(key: &str, version: u64) -> VersionedItem {
        VersionedItem {
            key: key.to_owned(),
            version,
            deleted: true,
            data: serde_json::Value::Null,
        }
    }
}

/// Storage of flags and segments shared by the evaluation engine and the update source.
///
/// Implementations must be thread-safe.
pub trait FeatureStore: Send + Sync {
    /// Replace all data in the store.
    fn init(&self, all_data: HashMap<DataKind, HashMap<String, VersionedItem>>) -> Result<()>;

    /// Get an item. Deleted items are reported as missing.
    fn get(&self, kind: DataKind, key: &str) -> Result<Option<VersionedItem>>;

    /// Get all non-deleted items of the given kind.
    fn all(&self, kind: DataKind) -> Result<HashMap<String, VersionedItem>>;

    /// Insert or update an item. The update is ignored unless `item` has a newer version.
    fn upsert(&self, kind: DataKind, item: VersionedItem) -> Result<()>;

    /// Delete an item, unless the stored item has the same or newer version.
    fn delete(&self, kind: DataKind, key: &str, version: u64) -> Result<()>;

    /// Whether [`FeatureStore::init`] has been called.
    fn initialized(&self) -> bool;

    /// Name reported in diagnostic events. `None` is reported as `"custom"`.
    fn diagnostic_component_type_name(&self) -> Option<&str> {
        None
    }
}

#[derive(Default)]
struct StoreData {
    items: HashMap<DataKind, HashMap<String, VersionedItem>>,
    initialized: bool,
}

/// A thread-safe in-memory feature store.
#[derive(Default)]
pub struct InMemoryFeatureStore {
    data: RwLock<StoreData>,
}

impl InMemoryFeatureStore {
    /// Create a new empty feature store.
    pub fn new() -> Self {
        InMemoryFeatureStore::default()
    }

    // A poisoned lock means a writer panicked mid-update. Report it instead of crashing the
    // application.
    fn read(&self) -> Result<RwLockReadGuard<'_, StoreData>> {
        self.data
            .read()
            .map_err(|_| Error::FeatureStore("feature store lock is poisoned".to_owned()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreData>> {
        self.data
            .write()
            .map_err(|_| Error::FeatureStore("feature store lock is poisoned".to_owned()))
    }

    fn put_if_newer(&self, kind: DataKind, item: VersionedItem) -> Result<()> {
        let mut data = self.write()?;
        let items = data.items.entry(kind).or_default();
        match items.get(&item.key) {
            Some(existing) if existing.version >= item.version => {}
            _ => {
                items.insert(item.key.clone(), item);
            }
        }
        Ok(())
    }
}

impl FeatureStore for InMemoryFeatureStore {
    fn init(&self, all_data: HashMap<DataKind, HashMap<String, VersionedItem>>) -> Result<()> {
        let mut data = self.write()?;
        data.items = all_data;
        data.initialized = true;
        Ok(())
    }

    fn get(&self, kind: DataKind, key: &str) -> Result<Option<VersionedItem>> {
        let data = self.read()?;
        Ok(data
            .items
            .get(&kind)
            .and_then(|items| items.get(key))
            .filter(|item| !item.deleted)
            .cloned())
    }

    fn all(&self, kind: DataKind) -> Result<HashMap<String, VersionedItem>> {
        let data = self.read()?;
        Ok(data
            .items
            .get(&kind)
            .map(|items| {
                items
                    .iter()
                    .filter(|(_, item)| !item.deleted)
                    .map(|(key, item)| (key.clone(), item.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn upsert(&self, kind: DataKind, item: VersionedItem) -> Result<()> {
        self.put_if_newer(kind, item)
    }

    fn delete(&self, kind: DataKind, key: &str, version: u64) -> Result<()> {
        self.put_if_newer(kind, VersionedItem::tombstone(key, version))
    }

    fn initialized(&self) -> bool {
        self.read().map(|data| data.initialized).unwrap_or(false)
    }

    fn diagnostic_component_type_name(&self) -> Option<&str> {
        Some("memory")
    }
}
