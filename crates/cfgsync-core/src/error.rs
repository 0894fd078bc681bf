//! Core error types for cfgsync-core.
//!
//! Uses `thiserror` for structured, matchable error variants covering
//! schema validation, field-name lookup, and value/schema disagreement.

use thiserror::Error;

use crate::schema::Kind;

/// Core errors produced by the cfgsync-core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The schema cannot be synchronized (wrong root kind, unsupported
    /// element kind, malformed segment).
    #[error("invalid schema: {reason}")]
    InvalidSchema { reason: String },

    /// A dotted field name does not name a statically addressable field.
    #[error("unknown field: '{name}'")]
    UnknownField { name: String },

    /// A value does not have the kind its schema declares.
    #[error("kind mismatch: expected {expected}, found {found}")]
    KindMismatch { expected: Kind, found: Kind },

    /// A JSON document could not be converted into a value tree.
    #[error("invalid document at '{at}': {reason}")]
    InvalidDocument { at: String, reason: String },

    /// JSON text could not be parsed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
