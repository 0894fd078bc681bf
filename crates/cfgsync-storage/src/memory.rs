//! In-memory implementation of [`KvTransport`].
//!
//! [`InMemoryStore`] is a first-class backend for tests, single-process
//! deployments, and anywhere persistence isn't needed. Its keyspace lives in
//! a `BTreeMap` with identical semantics to the SQLite backend.

use std::collections::BTreeMap;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

use crate::error::StorageError;
use crate::keyspace::{self, subtree_prefix, Entry, NodeTable};
use crate::traits::KvTransport;
use crate::types::{
    DeleteOptions, PrevExist, SetOptions, StoreNode, TransportConfig, WatchEvent, WatchOptions,
};
use crate::watch::{Subscription, WatchHub};

/// Keyspace rows ordered by key.
#[derive(Debug, Default)]
pub(crate) struct MemoryTable {
    entries: BTreeMap<String, Entry>,
    index: u64,
}

impl MemoryTable {
    fn subtree<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (&'a String, &'a Entry)> {
        self.entries
            .range(prefix.to_string()..)
            .take_while(move |(key, _)| key.starts_with(prefix))
    }
}

impl NodeTable for MemoryTable {
    fn entry(&self, key: &str) -> Result<Option<Entry>, StorageError> {
        Ok(self.entries.get(key).cloned())
    }

    fn put(&mut self, key: &str, entry: &Entry) -> Result<(), StorageError> {
        self.entries.insert(key.to_string(), entry.clone());
        Ok(())
    }

    fn remove_tree(&mut self, key: &str) -> Result<(), StorageError> {
        let prefix = subtree_prefix(key);
        let doomed: Vec<String> = self.subtree(&prefix).map(|(k, _)| k.clone()).collect();
        for k in doomed {
            self.entries.remove(&k);
        }
        self.entries.remove(key);
        Ok(())
    }

    fn children(&self, key: &str) -> Result<Vec<(String, Entry)>, StorageError> {
        let prefix = subtree_prefix(key);
        Ok(self
            .subtree(&prefix)
            .filter(|(k, _)| !k[prefix.len()..].contains('/'))
            .map(|(k, e)| (k.clone(), e.clone()))
            .collect())
    }

    fn expired(&self, now: u64) -> Result<Vec<String>, StorageError> {
        Ok(self
            .entries
            .iter()
            .filter(|(_, e)| e.expires_at.is_some_and(|at| at <= now))
            .map(|(k, _)| k.clone())
            .collect())
    }

    fn index(&self) -> Result<u64, StorageError> {
        Ok(self.index)
    }

    fn set_index(&mut self, index: u64) -> Result<(), StorageError> {
        self.index = index;
        Ok(())
    }
}

#[derive(Debug)]
struct MemoryState {
    table: MemoryTable,
    hub: WatchHub,
    closed: bool,
}

/// In-memory keyspace backend.
#[derive(Debug)]
pub struct InMemoryStore {
    state: Mutex<MemoryState>,
    config: TransportConfig,
}

impl InMemoryStore {
    /// Creates an empty store with default settings.
    pub fn new() -> Self {
        Self::with_config(TransportConfig::default())
    }

    pub fn with_config(config: TransportConfig) -> Self {
        InMemoryStore {
            state: Mutex::new(MemoryState {
                table: MemoryTable::default(),
                hub: WatchHub::new(config.history),
                closed: false,
            }),
            config,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StorageError> {
        let state = self
            .state
            .try_lock_for(self.config.timeout)
            .ok_or(StorageError::Timeout {
                after: self.config.timeout,
            })?;
        if state.closed {
            return Err(StorageError::Closed);
        }
        Ok(state)
    }

    /// Locks the store and drops expired entries before serving a request.
    fn fresh(&self) -> Result<(MutexGuard<'_, MemoryState>, u64), StorageError> {
        let mut state = self.lock()?;
        let now = keyspace::now_millis();
        let state_ref = &mut *state;
        for event in keyspace::purge_expired(&mut state_ref.table, now)? {
            state_ref.hub.publish(event);
        }
        Ok((state, now))
    }

    fn write<F>(&self, op: F) -> Result<StoreNode, StorageError>
    where
        F: FnOnce(&mut MemoryTable, u64) -> Result<WatchEvent, StorageError>,
    {
        let (mut state, now) = self.fresh()?;
        let state = &mut *state;
        let event = op(&mut state.table, now)?;
        let node = event.node.clone();
        state.hub.publish(event);
        Ok(node)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KvTransport for InMemoryStore {
    fn get(&self, key: &str, recursive: bool) -> Result<StoreNode, StorageError> {
        let (state, now) = self.fresh()?;
        keyspace::get(&state.table, key, recursive, now)
    }

    fn set(&self, key: &str, value: &str, options: &SetOptions) -> Result<StoreNode, StorageError> {
        self.write(|table, now| keyspace::set(table, key, value, options, now))
    }

    fn set_dir(
        &self,
        key: &str,
        ttl: Option<Duration>,
        prev_exist: PrevExist,
    ) -> Result<StoreNode, StorageError> {
        self.write(|table, now| keyspace::set_dir(table, key, ttl, prev_exist, now))
    }

    fn delete(&self, key: &str, options: &DeleteOptions) -> Result<StoreNode, StorageError> {
        self.write(|table, now| keyspace::delete(table, key, options, now))
    }

    fn create_in_order(
        &self,
        dir: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<StoreNode, StorageError> {
        self.write(|table, now| keyspace::create_in_order(table, dir, value, ttl, now))
    }

    fn watch(&self, key: &str, options: &WatchOptions) -> Result<Subscription, StorageError> {
        let (mut state, _) = self.fresh()?;
        state.hub.subscribe(&keyspace::clean_key(key), options)
    }

    fn index(&self) -> Result<u64, StorageError> {
        let state = self.lock()?;
        state.table.index()
    }

    fn close(&self) {
        let mut state = self.state.lock();
        if !state.closed {
            state.closed = true;
            state.hub.close();
        }
    }
}
