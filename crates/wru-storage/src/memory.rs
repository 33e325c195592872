//! In-memory document store backend.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;

use crate::error::StorageError;
use crate::traits::DocumentStore;

/// Composite map key, formatted as `"collection/id"`.
type StorageKey = String;

fn make_storage_key(collection: &str, id: &str) -> StorageKey {
    format!("{collection}/{id}")
}

/// In-memory storage backend over a concurrent hash map.
///
/// The map entry API gives the conditional-create semantics the session store
/// relies on; everything else is a plain keyed read or write. This backend is
/// the default when no external store is configured and the one the test
/// suites run against.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    data: DashMap<StorageKey, Value>,
}

impl MemoryDocumentStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of documents across all collections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` when no documents are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn create(&self, collection: &str, id: &str, doc: &Value) -> Result<(), StorageError> {
        match self.data.entry(make_storage_key(collection, id)) {
            Entry::Occupied(_) => Err(StorageError::already_exists(collection, id)),
            Entry::Vacant(slot) => {
                slot.insert(doc.clone());
                Ok(())
            }
        }
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StorageError> {
        Ok(self
            .data
            .get(&make_storage_key(collection, id))
            .map(|doc| doc.clone()))
    }

    async fn replace(&self, collection: &str, id: &str, doc: &Value) -> Result<(), StorageError> {
        match self.data.entry(make_storage_key(collection, id)) {
            Entry::Occupied(mut slot) => {
                slot.insert(doc.clone());
                Ok(())
            }
            Entry::Vacant(_) => Err(StorageError::not_found(collection, id)),
        }
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StorageError> {
        self.data.remove(&make_storage_key(collection, id));
        Ok(())
    }

    async fn find_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<Value>, StorageError> {
        let prefix = format!("{collection}/");
        Ok(self
            .data
            .iter()
            .filter(|entry| entry.key().starts_with(&prefix))
            .filter(|entry| entry.value().get(field).and_then(Value::as_str) == Some(value))
            .map(|entry| entry.value().clone())
            .collect())
    }
}
