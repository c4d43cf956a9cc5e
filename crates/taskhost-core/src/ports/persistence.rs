//! PersistenceStore port - durable string→string map (one entry per tenant).
//!
//! The registry is the source of truth in memory; the store only has to give
//! the same rows back after a restart.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt store: {0}")]
    Corrupt(String),

    #[error("{0}")]
    Other(String),
}

/// Opaque durable key/value store.
///
/// Writes are synchronous: when `put` returns, the value must be visible to a
/// later `get` in this process. Durability across crashes is the
/// implementation's business (`flush` is called on shutdown).
pub trait PersistenceStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), StoreError>;

    fn keys(&self) -> Result<Vec<String>, StoreError>;

    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
