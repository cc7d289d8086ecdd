//! Client-side key-value persistence for cart state.
//!
//! # Stores
//!
//! - [`FileStore`] - one JSON object on disk, rewritten atomically on every
//!   write (the default for the storefront binary)
//! - [`MemoryStore`] - process-local map for tests and ephemeral runs
//!
//! Values are opaque strings; callers own their encoding. The cart stores
//! its JSON-encoded entry list under a single key.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use thiserror::Error;

/// Errors that can occur when reading or writing persisted values.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backing document could not be encoded.
    #[error("Serialize error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A string key-value store.
///
/// Implementations must make `set` durable before returning: once it
/// succeeds, a fresh `get` (in this process or the next) sees the value.
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backing store cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Replace the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the value could not be persisted. The
    /// previous value is left in place.
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Verify the backing store is reachable (readiness check).
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if a subsequent write would certainly fail.
    fn check(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
