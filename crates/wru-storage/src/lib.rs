//! # wru-storage
//!
//! Document store abstraction used by the wru session store.
//!
//! The proxy keeps its session state in a key-addressable document store.
//! This crate defines the storage contract ([`DocumentStore`]) and ships the
//! in-memory backend used by default and in tests. Other backends only need
//! per-key linearizable create/replace/delete/get plus a simple equality
//! query; no cross-key transactions are required.

pub mod error;
pub mod memory;
pub mod traits;

pub use error::StorageError;
pub use memory::MemoryDocumentStore;
pub use traits::{DocumentStore, DynDocumentStore};

/// Type alias for storage results.
pub type StorageResult<T> = Result<T, StorageError>;
