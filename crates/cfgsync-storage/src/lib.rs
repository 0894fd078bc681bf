//! Hierarchical key-value transports for cfgsync.
//!
//! Provides the [`KvTransport`] trait defining the contract all backends
//! implement, plus [`InMemoryStore`] and [`SqliteStore`] as first-class
//! backends with identical keyspace semantics.
//!
//! # Architecture
//!
//! The keyspace follows the etcd v2 model: `/`-separated keys, directories
//! and leaves, a store-wide index advanced by every write, TTLs, guarded
//! writes and watches. Backends only store rows; the rules live in one
//! shared module so both backends behave the same.
//!
//! # Modules
//!
//! - [`error`]: StorageError and the numeric ErrorCode table
//! - [`types`]: StoreNode, request options, watch events
//! - [`traits`]: KvTransport trait definition
//! - [`watch`]: Subscription, WatchCanceller, watch_until
//! - [`memory`]: InMemoryStore implementation
//! - [`schema`]: SQLite migration setup
//! - [`sqlite`]: SqliteStore implementation

pub mod error;
mod keyspace;
pub mod memory;
pub mod schema;
pub mod sqlite;
pub mod traits;
pub mod types;
pub mod watch;

// Re-export key types for ergonomic use.
pub use error::{ErrorCode, StorageError};
pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;
pub use traits::KvTransport;
pub use types::{
    Action, DeleteOptions, PrevExist, SetOptions, StoreNode, TransportConfig, WatchEvent,
    WatchOptions,
};
pub use watch::{watch_until, Subscription, WatchCanceller};
