//! Errors of the synchronization engine.
//!
//! Every operation aborts at the first failure and returns it unchanged:
//! nothing is aggregated, retried or rolled back.

use std::path::PathBuf;

use cfgsync_core::{CoreError, FieldHandle, Kind};
use cfgsync_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// The schema cannot be synchronized.
    #[error("invalid schema: {reason}")]
    InvalidSchema { reason: String },

    /// No completed save or load has recorded this field, or the field now
    /// holds a different kind than was recorded.
    #[error("{handle} is not mapped to a store path")]
    FieldNotMapped { handle: FieldHandle },

    /// The recorded location no longer exists in the live value
    /// (e.g. the sequence holding it shrank).
    #[error("{handle} does not address a live value")]
    FieldNotAddressable { handle: FieldHandle },

    /// The transport reported an error.
    #[error("transport error: {0}")]
    Transport(#[from] StorageError),

    /// Stored scalar text does not parse as its declared kind.
    #[error("cannot parse '{value}' at {path} as {kind}")]
    Parse {
        path: String,
        value: String,
        kind: Kind,
    },

    /// A directory was found where a scalar was expected.
    #[error("expected a value at {path}, found a directory")]
    UnexpectedDirectory { path: String },

    /// A mapping key cannot be used as a path segment.
    #[error("mapping key '{key}' cannot be used as a path segment")]
    InvalidMappingKey { key: String },

    /// Schema or value model error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Configuration could not be read or is invalid.
    #[error("config error in {origin}: {message}", origin = config_origin(.path))]
    Config {
        path: Option<PathBuf>,
        message: String,
    },
}

fn config_origin(path: &Option<PathBuf>) -> String {
    match path {
        Some(path) => path.display().to_string(),
        None => "<inline>".to_string(),
    }
}

impl SyncError {
    /// Returns the transport error, if this is one.
    pub fn transport(&self) -> Option<&StorageError> {
        match self {
            SyncError::Transport(err) => Some(err),
            _ => None,
        }
    }
}
