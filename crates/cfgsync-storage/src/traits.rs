//! The [`KvTransport`] trait defining the contract of a hierarchical store.
//!
//! Two-layer API design:
//! - **Primitive** methods are implemented by every backend. Each call is
//!   one round trip and, for writes, advances the store index exactly once.
//! - **Convenience** methods (`make_dir`, `get_value`, `list`, `create`,
//!   `update`, `update_dir`) are provided on top of the primitives.
//!
//! Backends take `&self` and serialize requests internally, so one transport
//! can be shared between threads behind an `Arc`.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{ErrorCode, StorageError};
use crate::types::{DeleteOptions, PrevExist, SetOptions, StoreNode, WatchOptions};
use crate::watch::Subscription;

/// A hierarchical key-value store with directories, TTLs and watches.
pub trait KvTransport: Send + Sync {
    // -------------------------------------------------------------------
    // Primitives
    // -------------------------------------------------------------------

    /// Reads a key. Directories include their children; with `recursive`
    /// the whole sub-tree is included.
    fn get(&self, key: &str, recursive: bool) -> Result<StoreNode, StorageError>;

    /// Writes a leaf value, creating missing parent directories.
    fn set(&self, key: &str, value: &str, options: &SetOptions) -> Result<StoreNode, StorageError>;

    /// Creates or refreshes a directory subject to an existence precondition.
    fn set_dir(
        &self,
        key: &str,
        ttl: Option<Duration>,
        prev_exist: PrevExist,
    ) -> Result<StoreNode, StorageError>;

    /// Deletes a leaf or directory. Returns the removed node.
    fn delete(&self, key: &str, options: &DeleteOptions) -> Result<StoreNode, StorageError>;

    /// Appends a leaf beneath `dir` under a store-assigned, ordered key.
    fn create_in_order(
        &self,
        dir: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<StoreNode, StorageError>;

    /// Subscribes to changes of `key`.
    fn watch(&self, key: &str, options: &WatchOptions) -> Result<Subscription, StorageError>;

    /// Current store index (the index of the most recent write).
    fn index(&self) -> Result<u64, StorageError>;

    /// Ends all subscriptions and rejects further requests with `Closed`.
    fn close(&self);

    // -------------------------------------------------------------------
    // Convenience methods
    // -------------------------------------------------------------------

    /// Creates a directory; `NodeExist` if the key is already present.
    fn make_dir(&self, key: &str, ttl: Option<Duration>) -> Result<StoreNode, StorageError> {
        self.set_dir(key, ttl, PrevExist::NoExist)
    }

    /// Refreshes the TTL of an existing directory.
    fn update_dir(&self, key: &str, ttl: Option<Duration>) -> Result<StoreNode, StorageError> {
        self.set_dir(key, ttl, PrevExist::Exist)
    }

    /// Reads the value of a leaf; `NotFile` for directories.
    fn get_value(&self, key: &str) -> Result<String, StorageError> {
        let node = self.get(key, false)?;
        if node.dir {
            return Err(StorageError::store(ErrorCode::NotFile, node.key));
        }
        Ok(node.value)
    }

    /// Keys of every node beneath `key`, depth-first in store order.
    fn list(&self, key: &str) -> Result<Vec<String>, StorageError> {
        Ok(self.get(key, true)?.descendant_keys())
    }

    /// Writes a leaf that must not exist yet.
    fn create(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<StoreNode, StorageError> {
        let options = SetOptions {
            ttl,
            prev_exist: PrevExist::NoExist,
            ..Default::default()
        };
        self.set(key, value, &options)
    }

    /// Overwrites a leaf that must already exist.
    fn update(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<StoreNode, StorageError> {
        let options = SetOptions {
            ttl,
            prev_exist: PrevExist::Exist,
            ..Default::default()
        };
        self.set(key, value, &options)
    }
}

macro_rules! forward_transport {
    ($($ty:ty),*) => {$(
        impl<T: KvTransport + ?Sized> KvTransport for $ty {
            fn get(&self, key: &str, recursive: bool) -> Result<StoreNode, StorageError> {
                (**self).get(key, recursive)
            }

            fn set(
                &self,
                key: &str,
                value: &str,
                options: &SetOptions,
            ) -> Result<StoreNode, StorageError> {
                (**self).set(key, value, options)
            }

            fn set_dir(
                &self,
                key: &str,
                ttl: Option<Duration>,
                prev_exist: PrevExist,
            ) -> Result<StoreNode, StorageError> {
                (**self).set_dir(key, ttl, prev_exist)
            }

            fn delete(
                &self,
                key: &str,
                options: &DeleteOptions,
            ) -> Result<StoreNode, StorageError> {
                (**self).delete(key, options)
            }

            fn create_in_order(
                &self,
                dir: &str,
                value: &str,
                ttl: Option<Duration>,
            ) -> Result<StoreNode, StorageError> {
                (**self).create_in_order(dir, value, ttl)
            }

            fn watch(
                &self,
                key: &str,
                options: &WatchOptions,
            ) -> Result<Subscription, StorageError> {
                (**self).watch(key, options)
            }

            fn index(&self) -> Result<u64, StorageError> {
                (**self).index()
            }

            fn close(&self) {
                (**self).close()
            }
        }
    )*};
}

forward_transport!(&T, Box<T>, Arc<T>);
