//! Schema and value model for structured configuration synchronization.
//!
//! # Modules
//!
//! - [`schema`]: the static shape of a configuration tree
//! - [`value`]: the live value tree that is saved and loaded
//! - [`locator`]: node identity inside a value tree
//! - [`handle`]: stable field handles
//! - [`layout`]: statically addressable fields of a schema
//! - [`path`]: store path derivation
//! - [`error`]: CoreError

pub mod error;
pub mod handle;
pub mod layout;
pub mod locator;
pub mod path;
pub mod schema;
pub mod value;

// Re-export commonly used types
pub use error::CoreError;
pub use handle::FieldHandle;
pub use layout::{Layout, LayoutEntry};
pub use locator::{Locator, Step};
pub use schema::{FieldDef, Kind, ScalarKind, Schema, StructSchema};
pub use value::Value;
