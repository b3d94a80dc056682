//! Storage abstraction and implementations for certrack.
//!
//! This crate provides a trait-based storage interface with an in-memory
//! backend, a JSON-file reference implementation and an optional SQLite
//! backend (feature `sqlite`).

#![warn(missing_docs)]

pub mod trait_;
pub mod memory;
pub mod locks;
#[cfg(feature = "json")]
pub mod json_storage;

#[cfg(feature = "sqlite")]
pub mod sqlite_storage;

pub use trait_::{Storage, CompletionHistory, ComponentChanges, StorageError, Result};
pub use memory::MemoryStorage;
pub use locks::{KeyedLocks, KeyGuard};
#[cfg(feature = "json")]
pub use json_storage::JsonStorage;

#[cfg(feature = "sqlite")]
pub use sqlite_storage::SqliteStorage;
