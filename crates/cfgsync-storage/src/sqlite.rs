//! SQLite implementation of [`KvTransport`].
//!
//! [`SqliteStore`] persists the keyspace in a SQLite database with WAL mode,
//! one transaction per request, and automatic schema migrations. The store
//! index lives in the `meta` table so it survives a reopen; watch history
//! does not.

use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};

use crate::error::StorageError;
use crate::keyspace::{self, subtree_prefix, Entry, NodeTable};
use crate::traits::KvTransport;
use crate::types::{
    DeleteOptions, PrevExist, SetOptions, StoreNode, TransportConfig, WatchEvent, WatchOptions,
};
use crate::watch::{Subscription, WatchHub};

/// Rows of the `nodes` table seen through one transaction.
struct SqlTable<'a> {
    tx: &'a Transaction<'a>,
}

fn to_i64(key: &str, value: u64) -> Result<i64, StorageError> {
    i64::try_from(value).map_err(|_| StorageError::Corrupt {
        key: key.to_string(),
        reason: format!("{value} does not fit in an INTEGER column"),
    })
}

fn read_entry(row: &Row<'_>) -> rusqlite::Result<Entry> {
    let created: i64 = row.get("created_index")?;
    let modified: i64 = row.get("modified_index")?;
    let expires_at: Option<i64> = row.get("expires_at")?;
    Ok(Entry {
        value: row.get("value")?,
        dir: row.get("dir")?,
        created_index: created as u64,
        modified_index: modified as u64,
        expires_at: expires_at.map(|at| at as u64),
    })
}

impl NodeTable for SqlTable<'_> {
    fn entry(&self, key: &str) -> Result<Option<Entry>, StorageError> {
        let entry = self
            .tx
            .query_row(
                "SELECT value, dir, created_index, modified_index, expires_at
                 FROM nodes WHERE key = ?1",
                params![key],
                read_entry,
            )
            .optional()?;
        Ok(entry)
    }

    fn put(&mut self, key: &str, entry: &Entry) -> Result<(), StorageError> {
        let expires_at = entry.expires_at.map(|at| to_i64(key, at)).transpose()?;
        self.tx.execute(
            "INSERT INTO nodes (key, parent, value, dir, created_index, modified_index, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                dir = excluded.dir,
                created_index = excluded.created_index,
                modified_index = excluded.modified_index,
                expires_at = excluded.expires_at",
            params![
                key,
                keyspace::parent_of(key),
                entry.value,
                entry.dir,
                to_i64(key, entry.created_index)?,
                to_i64(key, entry.modified_index)?,
                expires_at,
            ],
        )?;
        Ok(())
    }

    fn remove_tree(&mut self, key: &str) -> Result<(), StorageError> {
        let prefix = subtree_prefix(key);
        self.tx.execute(
            "DELETE FROM nodes WHERE key = ?1 OR substr(key, 1, length(?2)) = ?2",
            params![key, prefix],
        )?;
        Ok(())
    }

    fn children(&self, key: &str) -> Result<Vec<(String, Entry)>, StorageError> {
        let mut stmt = self.tx.prepare_cached(
            "SELECT key, value, dir, created_index, modified_index, expires_at
             FROM nodes WHERE parent = ?1",
        )?;
        let rows = stmt.query_map(params![key], |row| {
            Ok((row.get::<_, String>("key")?, read_entry(row)?))
        })?;
        let mut children = Vec::new();
        for row in rows {
            children.push(row?);
        }
        Ok(children)
    }

    fn expired(&self, now: u64) -> Result<Vec<String>, StorageError> {
        let mut stmt = self.tx.prepare_cached(
            "SELECT key FROM nodes
             WHERE expires_at IS NOT NULL AND expires_at <= ?1
             ORDER BY key",
        )?;
        let rows = stmt.query_map(params![to_i64("/", now)?], |row| row.get(0))?;
        let mut keys = Vec::new();
        for row in rows {
            keys.push(row?);
        }
        Ok(keys)
    }

    fn index(&self) -> Result<u64, StorageError> {
        let index: i64 =
            self.tx
                .query_row("SELECT value FROM meta WHERE name = 'index'", [], |row| {
                    row.get(0)
                })?;
        Ok(index as u64)
    }

    fn set_index(&mut self, index: u64) -> Result<(), StorageError> {
        self.tx.execute(
            "UPDATE meta SET value = ?1 WHERE name = 'index'",
            params![to_i64("/", index)?],
        )?;
        Ok(())
    }
}

struct SqliteState {
    conn: Connection,
    hub: WatchHub,
    closed: bool,
}

/// SQLite-backed keyspace.
///
/// Every request runs in its own transaction, which also drops entries whose
/// TTL has passed.
pub struct SqliteStore {
    state: Mutex<SqliteState>,
    config: TransportConfig,
}

impl SqliteStore {
    /// Opens (or creates) a SQLite database at `path`.
    pub fn open(path: &str) -> Result<Self, StorageError> {
        Self::open_with_config(path, TransportConfig::default())
    }

    pub fn open_with_config(path: &str, config: TransportConfig) -> Result<Self, StorageError> {
        let conn = crate::schema::open_database(path, config.timeout)?;
        Ok(Self::from_connection(conn, config))
    }

    /// Opens an in-memory SQLite database (for testing).
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = crate::schema::open_in_memory()?;
        Ok(Self::from_connection(conn, TransportConfig::default()))
    }

    fn from_connection(conn: Connection, config: TransportConfig) -> Self {
        SqliteStore {
            state: Mutex::new(SqliteState {
                conn,
                hub: WatchHub::new(config.history),
                closed: false,
            }),
            config,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, SqliteState>, StorageError> {
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

    /// Runs `op` in one transaction after purging expired entries, then
    /// publishes the produced events once the transaction has committed.
    fn transact<R, F>(&self, op: F) -> Result<R, StorageError>
    where
        F: FnOnce(&mut SqlTable<'_>, u64) -> Result<(R, Option<WatchEvent>), StorageError>,
    {
        let mut guard = self.lock()?;
        let state = &mut *guard;
        let now = keyspace::now_millis();
        let tx = state.conn.transaction()?;
        let (result, mut events) = {
            let mut table = SqlTable { tx: &tx };
            let events = keyspace::purge_expired(&mut table, now)?;
            let (result, event) = op(&mut table, now)?;
            (result, events.into_iter().chain(event).collect::<Vec<_>>())
        };
        tx.commit()?;
        for event in events.drain(..) {
            state.hub.publish(event);
        }
        Ok(result)
    }

    fn write<F>(&self, op: F) -> Result<StoreNode, StorageError>
    where
        F: FnOnce(&mut SqlTable<'_>, u64) -> Result<WatchEvent, StorageError>,
    {
        self.transact(|table, now| {
            let event = op(table, now)?;
            Ok((event.node.clone(), Some(event)))
        })
    }
}

impl KvTransport for SqliteStore {
    fn get(&self, key: &str, recursive: bool) -> Result<StoreNode, StorageError> {
        self.transact(|table, now| Ok((keyspace::get(&*table, key, recursive, now)?, None)))
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
        // Publish pending expirations before the subscription starts.
        self.transact(|_, _| Ok(((), None)))?;
        let mut state = self.lock()?;
        state.hub.subscribe(&keyspace::clean_key(key), options)
    }

    fn index(&self) -> Result<u64, StorageError> {
        self.transact(|table, _| Ok((table.index()?, None)))
    }

    fn close(&self) {
        let mut state = self.state.lock();
        if !state.closed {
            state.closed = true;
            state.hub.close();
        }
    }
}
