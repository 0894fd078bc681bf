//! Structured configuration synchronization.
//!
//! [`ConfigSync`] maps a typed configuration tree onto a hierarchical
//! key-value store and back. Every mapped struct field becomes a path
//! segment; scalars become leaves, sequences and mappings become
//! directories. The synchronizer remembers which store path and version
//! each part of the tree was last saved or loaded with, so a single field
//! can be saved on its own and checked for staleness.
//!
//! ```
//! use cfgsync_core::{Schema, StructSchema};
//! use cfgsync_engine::ConfigSync;
//! use cfgsync_storage::{InMemoryStore, KvTransport};
//!
//! let schema = StructSchema::new("Server")
//!     .field("Host", "host", Schema::string())
//!     .field("Port", "port", Schema::integer());
//! let mut sync = ConfigSync::new(InMemoryStore::new(), "web", schema).unwrap();
//!
//! let port = sync.handle("Port").unwrap();
//! sync.set(port, 8080_i64).unwrap();
//! sync.save().unwrap();
//! assert_eq!(sync.transport().get_value("/web/port").unwrap(), "8080");
//! assert_eq!(sync.version(port).unwrap(), 2);
//! ```
//!
//! # Modules
//!
//! - [`client`]: the ConfigSync facade
//! - [`registry`]: path, handle and version bookkeeping
//! - [`config`]: SyncConfig (TOML + environment)
//! - [`error`]: SyncError

pub mod client;
pub mod config;
pub mod error;
mod load;
pub mod registry;
mod save;

pub use client::ConfigSync;
pub use config::{Backend, SyncConfig};
pub use error::SyncError;
pub use registry::{Registry, RegistryEntry};
