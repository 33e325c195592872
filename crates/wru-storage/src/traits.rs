//! The storage contract all backends implement.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StorageError;

/// Shared handle to a document store implementation.
pub type DynDocumentStore = Arc<dyn DocumentStore>;

/// A key-addressable JSON document store.
///
/// Documents are JSON objects addressed by `(collection, id)`. Each single-key
/// operation must be linearizable with respect to other operations on the same
/// key; nothing is assumed across keys. The session store builds its token
/// rotation guarantees on top of the conditional `create` below.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Creates a document.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::AlreadyExists`] when a document with the same
    /// id is present in the collection.
    async fn create(&self, collection: &str, id: &str, doc: &Value) -> Result<(), StorageError>;

    /// Reads a document, or `None` when absent.
    ///
    /// # Errors
    ///
    /// Returns an error only for infrastructure failures, never for a missing
    /// document.
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StorageError>;

    /// Replaces an existing document.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] when the document does not exist.
    async fn replace(&self, collection: &str, id: &str, doc: &Value) -> Result<(), StorageError>;

    /// Deletes a document. Deleting an absent document is not an error.
    async fn delete(&self, collection: &str, id: &str) -> Result<(), StorageError>;

    /// Returns all documents in `collection` whose string field `field`
    /// equals `value`.
    async fn find_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<Value>, StorageError>;
}
