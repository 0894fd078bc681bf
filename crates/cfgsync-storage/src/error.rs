//! Storage error types for cfgsync-storage.
//!
//! [`StorageError`] covers every failure a transport can report. Keyspace
//! rejections carry an [`ErrorCode`] whose numeric values follow the etcd v2
//! error table, so callers can classify them with the `is_*` predicates
//! instead of matching on messages.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Classified keyspace error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    KeyNotFound,
    /// A guarded write or delete found a different value or index.
    CompareFailed,
    NotFile,
    NotDir,
    NodeExist,
    RootReadOnly,
    DirNotEmpty,
    /// The requested watch index is older than the retained history.
    WatchExpired,
}

impl ErrorCode {
    /// Numeric code as used on the etcd v2 wire.
    pub fn code(self) -> u16 {
        match self {
            ErrorCode::KeyNotFound => 100,
            ErrorCode::CompareFailed => 101,
            ErrorCode::NotFile => 102,
            ErrorCode::NotDir => 104,
            ErrorCode::NodeExist => 105,
            ErrorCode::RootReadOnly => 107,
            ErrorCode::DirNotEmpty => 108,
            ErrorCode::WatchExpired => 401,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            100 => Some(ErrorCode::KeyNotFound),
            101 => Some(ErrorCode::CompareFailed),
            102 => Some(ErrorCode::NotFile),
            104 => Some(ErrorCode::NotDir),
            105 => Some(ErrorCode::NodeExist),
            107 => Some(ErrorCode::RootReadOnly),
            108 => Some(ErrorCode::DirNotEmpty),
            401 => Some(ErrorCode::WatchExpired),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            ErrorCode::KeyNotFound => "key not found",
            ErrorCode::CompareFailed => "compare failed",
            ErrorCode::NotFile => "not a file",
            ErrorCode::NotDir => "not a directory",
            ErrorCode::NodeExist => "key already exists",
            ErrorCode::RootReadOnly => "root is read only",
            ErrorCode::DirNotEmpty => "directory not empty",
            ErrorCode::WatchExpired => "the event in requested index is outdated and cleared",
        };
        f.write_str(message)
    }
}

/// Errors produced by transport operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The keyspace rejected the request.
    #[error("{code} ({num}) [{key}]", num = .code.code())]
    Store { code: ErrorCode, key: String },

    /// The request could not be served within the configured timeout.
    #[error("request timed out after {after:?}")]
    Timeout { after: Duration },

    /// No member of the cluster could be reached.
    #[error("cluster is unreachable")]
    Unreachable,

    /// The transport was closed; no further requests are served.
    #[error("transport is closed")]
    Closed,

    /// SQLite operation failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Schema migration failed.
    #[error("migration error: {0}")]
    Migration(String),

    /// A persisted row could not be interpreted.
    #[error("corrupt entry at '{key}': {reason}")]
    Corrupt { key: String, reason: String },
}

impl StorageError {
    pub(crate) fn store(code: ErrorCode, key: impl Into<String>) -> Self {
        StorageError::Store {
            code,
            key: key.into(),
        }
    }

    /// Returns the keyspace error code, if this is a keyspace rejection.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            StorageError::Store { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_key_not_found(&self) -> bool {
        self.code() == Some(ErrorCode::KeyNotFound)
    }

    pub fn is_compare_failed(&self) -> bool {
        self.code() == Some(ErrorCode::CompareFailed)
    }

    pub fn is_not_file(&self) -> bool {
        self.code() == Some(ErrorCode::NotFile)
    }

    pub fn is_not_dir(&self) -> bool {
        self.code() == Some(ErrorCode::NotDir)
    }

    pub fn is_node_exist(&self) -> bool {
        self.code() == Some(ErrorCode::NodeExist)
    }

    pub fn is_dir_not_empty(&self) -> bool {
        self.code() == Some(ErrorCode::DirNotEmpty)
    }

    pub fn is_watch_expired(&self) -> bool {
        self.code() == Some(ErrorCode::WatchExpired)
    }

    pub fn is_unreachable(&self) -> bool {
        matches!(self, StorageError::Unreachable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_roundtrip() {
        for code in [
            ErrorCode::KeyNotFound,
            ErrorCode::CompareFailed,
            ErrorCode::NotFile,
            ErrorCode::NotDir,
            ErrorCode::NodeExist,
            ErrorCode::RootReadOnly,
            ErrorCode::DirNotEmpty,
            ErrorCode::WatchExpired,
        ] {
            assert_eq!(ErrorCode::from_code(code.code()), Some(code));
        }
        assert_eq!(ErrorCode::from_code(103), None);
    }

    #[test]
    fn store_error_message() {
        let err = StorageError::store(ErrorCode::NodeExist, "/ns/key3");
        assert_eq!(err.to_string(), "key already exists (105) [/ns/key3]");
        assert!(err.is_node_exist());
        assert!(!err.is_key_not_found());
    }

    #[test]
    fn non_keyspace_errors_have_no_code() {
        assert_eq!(StorageError::Closed.code(), None);
        assert!(StorageError::Unreachable.is_unreachable());
        assert!(!StorageError::Closed.is_unreachable());
    }
}
