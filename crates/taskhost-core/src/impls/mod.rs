//! Impls - port implementations shipped with the crate.
//!
//! - **InMemoryStore**: 開発用・テスト用の PersistenceStore
//! - **JsonFileStore**: single-file durable store for small hosts
//!
//! The OS scheduler, the tenant loader and the consumers are always provided
//! by the embedding host.

pub mod file_store;
pub mod memory_store;

pub use self::file_store::JsonFileStore;
pub use self::memory_store::InMemoryStore;
