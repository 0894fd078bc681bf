//! Keyspace semantics shared by every local backend.
//!
//! Backends only provide a [`NodeTable`]: a flat map from cleaned keys to
//! [`Entry`] rows plus the store index. Everything else lives here: implicit
//! parent directories, file/directory conflicts, guarded writes, TTL expiry,
//! in-order keys and the watch events each write produces.
//!
//! The root `/` is never stored. It is an implicit directory that cannot be
//! written or deleted.

use std::cmp::Ordering;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{ErrorCode, StorageError};
use crate::types::{Action, DeleteOptions, PrevExist, SetOptions, StoreNode, WatchEvent};

pub(crate) const ROOT: &str = "/";

/// One stored key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Entry {
    pub value: String,
    pub dir: bool,
    pub created_index: u64,
    pub modified_index: u64,
    /// Expiry deadline in milliseconds since the Unix epoch.
    pub expires_at: Option<u64>,
}

/// Row storage of a backend.
pub(crate) trait NodeTable {
    fn entry(&self, key: &str) -> Result<Option<Entry>, StorageError>;

    fn put(&mut self, key: &str, entry: &Entry) -> Result<(), StorageError>;

    /// Removes `key` and everything beneath it.
    fn remove_tree(&mut self, key: &str) -> Result<(), StorageError>;

    /// Immediate children of `key`, in any order.
    fn children(&self, key: &str) -> Result<Vec<(String, Entry)>, StorageError>;

    /// Keys whose deadline is at or before `now`, in ascending key order.
    fn expired(&self, now: u64) -> Result<Vec<String>, StorageError>;

    fn index(&self) -> Result<u64, StorageError>;

    fn set_index(&mut self, index: u64) -> Result<(), StorageError>;
}

/// Normalizes a key: leading slash, no trailing or doubled slashes.
pub(crate) fn clean_key(key: &str) -> String {
    let mut cleaned = String::with_capacity(key.len() + 1);
    for segment in key.split('/').filter(|s| !s.is_empty()) {
        cleaned.push('/');
        cleaned.push_str(segment);
    }
    if cleaned.is_empty() {
        cleaned.push('/');
    }
    cleaned
}

pub(crate) fn parent_of(key: &str) -> String {
    match key.rfind('/') {
        Some(0) | None => ROOT.to_string(),
        Some(pos) => key[..pos].to_string(),
    }
}

/// Prefix shared by all keys beneath `key`.
pub(crate) fn subtree_prefix(key: &str) -> String {
    if key == ROOT {
        ROOT.to_string()
    } else {
        format!("{key}/")
    }
}

fn child_key(parent: &str, segment: &str) -> String {
    format!("{}{segment}", subtree_prefix(parent))
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

fn deadline(now: u64, ttl: Duration) -> u64 {
    now.saturating_add(ttl.as_millis() as u64)
}

/// Orders keys by their last segment, numerically when both are numbers.
pub(crate) fn natural_cmp(a: &str, b: &str) -> Ordering {
    let last_a = a.rsplit('/').next().unwrap_or(a);
    let last_b = b.rsplit('/').next().unwrap_or(b);
    match (last_a.parse::<u64>(), last_b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y).then_with(|| last_a.cmp(last_b)),
        _ => last_a.cmp(last_b),
    }
}

fn node_of(key: &str, entry: &Entry, now: u64) -> StoreNode {
    StoreNode {
        key: key.to_string(),
        value: if entry.dir {
            String::new()
        } else {
            entry.value.clone()
        },
        dir: entry.dir,
        nodes: Vec::new(),
        created_index: entry.created_index,
        modified_index: entry.modified_index,
        ttl: entry
            .expires_at
            .map(|at| (at.saturating_sub(now).div_ceil(1000)) as i64),
    }
}

fn not_found(key: &str) -> StorageError {
    StorageError::store(ErrorCode::KeyNotFound, key)
}

fn advance<T: NodeTable + ?Sized>(table: &mut T) -> Result<u64, StorageError> {
    let index = table.index()? + 1;
    table.set_index(index)?;
    Ok(index)
}

/// Ancestors of `key` that do not exist yet, outermost first.
fn missing_parents<T: NodeTable + ?Sized>(
    table: &T,
    key: &str,
) -> Result<Vec<String>, StorageError> {
    let mut missing = Vec::new();
    let mut parent = parent_of(key);
    while parent != ROOT {
        match table.entry(&parent)? {
            Some(entry) if !entry.dir => {
                return Err(StorageError::store(ErrorCode::NotDir, parent));
            }
            // An existing directory implies its own ancestors exist.
            Some(_) => break,
            None => missing.push(parent.clone()),
        }
        parent = parent_of(&parent);
    }
    missing.reverse();
    Ok(missing)
}

fn create_dirs<T: NodeTable + ?Sized>(
    table: &mut T,
    keys: &[String],
    index: u64,
) -> Result<(), StorageError> {
    for key in keys {
        table.put(
            key,
            &Entry {
                value: String::new(),
                dir: true,
                created_index: index,
                modified_index: index,
                expires_at: None,
            },
        )?;
    }
    Ok(())
}

fn check_guards(
    key: &str,
    prev: &Entry,
    prev_value: Option<&str>,
    prev_index: Option<u64>,
) -> Result<(), StorageError> {
    let value_differs = prev_value.is_some_and(|value| value != prev.value);
    let index_differs = prev_index.is_some_and(|index| index != prev.modified_index);
    if value_differs || index_differs {
        return Err(StorageError::store(ErrorCode::CompareFailed, key));
    }
    Ok(())
}

fn list_children<T: NodeTable + ?Sized>(
    table: &T,
    key: &str,
    recursive: bool,
    now: u64,
) -> Result<Vec<StoreNode>, StorageError> {
    let mut children = table.children(key)?;
    children.sort_by(|(a, _), (b, _)| natural_cmp(a, b));
    children
        .into_iter()
        .map(|(child, entry)| {
            let mut node = node_of(&child, &entry, now);
            if entry.dir && recursive {
                node.nodes = list_children(table, &child, true, now)?;
            }
            Ok(node)
        })
        .collect()
}

/// Reads a key. Directories list their children; grandchildren only when
/// `recursive` is set.
pub(crate) fn get<T: NodeTable + ?Sized>(
    table: &T,
    key: &str,
    recursive: bool,
    now: u64,
) -> Result<StoreNode, StorageError> {
    let key = clean_key(key);
    let mut node = if key == ROOT {
        StoreNode {
            key: key.clone(),
            value: String::new(),
            dir: true,
            nodes: Vec::new(),
            created_index: 0,
            modified_index: 0,
            ttl: None,
        }
    } else {
        let entry = table.entry(&key)?.ok_or_else(|| not_found(&key))?;
        let node = node_of(&key, &entry, now);
        if !entry.dir {
            return Ok(node);
        }
        node
    };
    node.nodes = list_children(table, &key, recursive, now)?;
    Ok(node)
}

/// Writes a leaf value.
pub(crate) fn set<T: NodeTable + ?Sized>(
    table: &mut T,
    key: &str,
    value: &str,
    options: &SetOptions,
    now: u64,
) -> Result<WatchEvent, StorageError> {
    let key = clean_key(key);
    if key == ROOT {
        return Err(StorageError::store(ErrorCode::RootReadOnly, key));
    }
    let missing = missing_parents(table, &key)?;
    let prev = table.entry(&key)?;
    if prev.as_ref().is_some_and(|entry| entry.dir) {
        return Err(StorageError::store(ErrorCode::NotFile, key));
    }

    match (options.prev_exist, &prev) {
        (PrevExist::Exist, None) => return Err(not_found(&key)),
        (PrevExist::NoExist, Some(_)) => {
            return Err(StorageError::store(ErrorCode::NodeExist, key));
        }
        _ => {}
    }
    let action = if options.is_guarded() {
        let current = prev.as_ref().ok_or_else(|| not_found(&key))?;
        check_guards(
            &key,
            current,
            options.prev_value.as_deref(),
            options.prev_index,
        )?;
        Action::CompareAndSwap
    } else {
        match options.prev_exist {
            PrevExist::Ignore => Action::Set,
            PrevExist::Exist => Action::Update,
            PrevExist::NoExist => Action::Create,
        }
    };

    let index = advance(table)?;
    create_dirs(table, &missing, index)?;
    let created_index = match (&prev, action) {
        (Some(entry), Action::Update | Action::CompareAndSwap) => entry.created_index,
        _ => index,
    };
    let entry = Entry {
        value: value.to_string(),
        dir: false,
        created_index,
        modified_index: index,
        expires_at: options.ttl.map(|ttl| deadline(now, ttl)),
    };
    table.put(&key, &entry)?;
    Ok(WatchEvent {
        action,
        node: node_of(&key, &entry, now),
        prev_node: prev.map(|entry| node_of(&key, &entry, now)),
        index,
    })
}

/// Creates a directory or refreshes the TTL of an existing one.
pub(crate) fn set_dir<T: NodeTable + ?Sized>(
    table: &mut T,
    key: &str,
    ttl: Option<Duration>,
    prev_exist: PrevExist,
    now: u64,
) -> Result<WatchEvent, StorageError> {
    let key = clean_key(key);
    if key == ROOT {
        return Err(StorageError::store(ErrorCode::RootReadOnly, key));
    }
    let missing = missing_parents(table, &key)?;
    let prev = table.entry(&key)?;
    let action = match (prev_exist, &prev) {
        (PrevExist::NoExist, Some(_)) => {
            return Err(StorageError::store(ErrorCode::NodeExist, key));
        }
        (PrevExist::Exist, None) => return Err(not_found(&key)),
        (_, Some(entry)) if !entry.dir => {
            return Err(StorageError::store(ErrorCode::NotDir, key));
        }
        (PrevExist::NoExist, None) => Action::Create,
        (PrevExist::Exist, Some(_)) => Action::Update,
        (PrevExist::Ignore, _) => Action::Set,
    };

    let index = advance(table)?;
    create_dirs(table, &missing, index)?;
    let entry = Entry {
        value: String::new(),
        dir: true,
        created_index: prev.as_ref().map_or(index, |entry| entry.created_index),
        modified_index: index,
        expires_at: ttl.map(|ttl| deadline(now, ttl)),
    };
    table.put(&key, &entry)?;
    Ok(WatchEvent {
        action,
        node: node_of(&key, &entry, now),
        prev_node: prev.map(|entry| node_of(&key, &entry, now)),
        index,
    })
}

/// Deletes a leaf, an empty directory, or a whole sub-tree.
pub(crate) fn delete<T: NodeTable + ?Sized>(
    table: &mut T,
    key: &str,
    options: &DeleteOptions,
    now: u64,
) -> Result<WatchEvent, StorageError> {
    let key = clean_key(key);
    if key == ROOT {
        return Err(StorageError::store(ErrorCode::RootReadOnly, key));
    }
    let prev = table.entry(&key)?.ok_or_else(|| not_found(&key))?;
    if prev.dir {
        if !options.dir && !options.recursive {
            return Err(StorageError::store(ErrorCode::NotFile, key));
        }
        if !options.recursive && !table.children(&key)?.is_empty() {
            return Err(StorageError::store(ErrorCode::DirNotEmpty, key));
        }
    }
    let action = if options.is_guarded() {
        if prev.dir {
            return Err(StorageError::store(ErrorCode::NotFile, key));
        }
        check_guards(
            &key,
            &prev,
            options.prev_value.as_deref(),
            options.prev_index,
        )?;
        Action::CompareAndDelete
    } else {
        Action::Delete
    };

    let index = advance(table)?;
    table.remove_tree(&key)?;
    Ok(removal_event(action, &key, &prev, index, now))
}

fn removal_event(action: Action, key: &str, prev: &Entry, index: u64, now: u64) -> WatchEvent {
    let prev_node = node_of(key, prev, now);
    let node = StoreNode {
        value: String::new(),
        modified_index: index,
        ttl: None,
        ..prev_node.clone()
    };
    WatchEvent {
        action,
        node,
        prev_node: Some(prev_node),
        index,
    }
}

/// Appends a leaf beneath `dir` under a key derived from the store index.
pub(crate) fn create_in_order<T: NodeTable + ?Sized>(
    table: &mut T,
    dir: &str,
    value: &str,
    ttl: Option<Duration>,
    now: u64,
) -> Result<WatchEvent, StorageError> {
    let dir = clean_key(dir);
    let mut missing = Vec::new();
    if dir != ROOT {
        missing = missing_parents(table, &dir)?;
        match table.entry(&dir)? {
            Some(entry) if !entry.dir => {
                return Err(StorageError::store(ErrorCode::NotDir, dir));
            }
            Some(_) => {}
            None => missing.push(dir.clone()),
        }
    }

    let index = advance(table)?;
    create_dirs(table, &missing, index)?;
    let key = child_key(&dir, &format!("{index:020}"));
    let entry = Entry {
        value: value.to_string(),
        dir: false,
        created_index: index,
        modified_index: index,
        expires_at: ttl.map(|ttl| deadline(now, ttl)),
    };
    table.put(&key, &entry)?;
    Ok(WatchEvent {
        action: Action::Create,
        node: node_of(&key, &entry, now),
        prev_node: None,
        index,
    })
}

/// Removes every entry whose deadline has passed, one event per removal.
pub(crate) fn purge_expired<T: NodeTable + ?Sized>(
    table: &mut T,
    now: u64,
) -> Result<Vec<WatchEvent>, StorageError> {
    let mut events = Vec::new();
    for key in table.expired(now)? {
        // Already gone with an expired ancestor.
        let Some(prev) = table.entry(&key)? else {
            continue;
        };
        let index = advance(table)?;
        table.remove_tree(&key)?;
        events.push(removal_event(Action::Expire, &key, &prev, index, now));
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTable;

    const NOW: u64 = 1_000_000;

    fn table() -> MemoryTable {
        MemoryTable::default()
    }

    fn put(table: &mut MemoryTable, key: &str, value: &str) -> WatchEvent {
        set(table, key, value, &SetOptions::default(), NOW).unwrap()
    }

    #[test]
    fn clean_key_normalizes_slashes() {
        assert_eq!(clean_key(""), "/");
        assert_eq!(clean_key("/"), "/");
        assert_eq!(clean_key("a/b/"), "/a/b");
        assert_eq!(clean_key("//a//b"), "/a/b");
    }

    #[test]
    fn parent_of_stops_at_root() {
        assert_eq!(parent_of("/a/b"), "/a");
        assert_eq!(parent_of("/a"), "/");
    }

    #[test]
    fn natural_order_compares_numbers_numerically() {
        let mut keys = vec!["/s/10", "/s/2", "/s/1", "/s/b", "/s/a"];
        keys.sort_by(|a, b| natural_cmp(a, b));
        assert_eq!(keys, vec!["/s/1", "/s/2", "/s/10", "/s/a", "/s/b"]);
    }

    #[test]
    fn set_creates_parent_directories() {
        let mut t = table();
        let event = put(&mut t, "/ns/key1/subkey1", "abc");
        assert_eq!(event.action, Action::Set);
        assert_eq!(event.index, 1);

        let dir = get(&t, "/ns", true, NOW).unwrap();
        assert!(dir.dir);
        assert_eq!(dir.created_index, 1);
        assert_eq!(dir.nodes[0].key, "/ns/key1");
        assert_eq!(dir.nodes[0].nodes[0].value, "abc");
    }

    #[test]
    fn index_advances_once_per_write() {
        let mut t = table();
        put(&mut t, "/a", "1");
        put(&mut t, "/b", "2");
        let event = put(&mut t, "/a", "3");
        assert_eq!(event.index, 3);
        assert_eq!(event.prev_node.unwrap().value, "1");
        assert_eq!(get(&t, "/a", false, NOW).unwrap().modified_index, 3);
    }

    #[test]
    fn leaf_ancestor_is_not_a_directory() {
        let mut t = table();
        put(&mut t, "/a", "1");
        let err = set(&mut t, "/a/b", "2", &SetOptions::default(), NOW).unwrap_err();
        assert!(err.is_not_dir());
        assert_eq!(t.index().unwrap(), 1);
    }

    #[test]
    fn value_onto_directory_is_not_a_file() {
        let mut t = table();
        put(&mut t, "/a/b", "1");
        let err = set(&mut t, "/a", "2", &SetOptions::default(), NOW).unwrap_err();
        assert!(err.is_not_file());
    }

    #[test]
    fn root_is_read_only() {
        let mut t = table();
        let err = set(&mut t, "/", "x", &SetOptions::default(), NOW).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::RootReadOnly));
        let err = delete(&mut t, "/", &DeleteOptions::tree(), NOW).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::RootReadOnly));
    }

    #[test]
    fn guarded_set() {
        let mut t = table();
        put(&mut t, "/k", "old");

        let err = set(&mut t, "/k", "new", &SetOptions::if_value("nope"), NOW).unwrap_err();
        assert!(err.is_compare_failed());

        let event = set(&mut t, "/k", "new", &SetOptions::if_index(1), NOW).unwrap();
        assert_eq!(event.action, Action::CompareAndSwap);
        assert_eq!(event.node.created_index, 1);
        assert_eq!(event.node.modified_index, 2);

        let err = set(&mut t, "/missing", "v", &SetOptions::if_index(1), NOW).unwrap_err();
        assert!(err.is_key_not_found());
    }

    #[test]
    fn prev_exist_preconditions() {
        let mut t = table();
        let create = SetOptions {
            prev_exist: PrevExist::NoExist,
            ..Default::default()
        };
        let update = SetOptions {
            prev_exist: PrevExist::Exist,
            ..Default::default()
        };
        assert!(set(&mut t, "/k", "1", &update, NOW)
            .unwrap_err()
            .is_key_not_found());
        assert_eq!(set(&mut t, "/k", "1", &create, NOW).unwrap().action, Action::Create);
        assert!(set(&mut t, "/k", "2", &create, NOW)
            .unwrap_err()
            .is_node_exist());
        assert_eq!(set(&mut t, "/k", "2", &update, NOW).unwrap().action, Action::Update);
    }

    #[test]
    fn make_dir_twice_reports_node_exist() {
        let mut t = table();
        set_dir(&mut t, "/d", None, PrevExist::NoExist, NOW).unwrap();
        let err = set_dir(&mut t, "/d", None, PrevExist::NoExist, NOW).unwrap_err();
        assert!(err.is_node_exist());
        assert_eq!(err.to_string(), "key already exists (105) [/d]");
    }

    #[test]
    fn update_dir_keeps_children() {
        let mut t = table();
        put(&mut t, "/d/x", "1");
        let event = set_dir(
            &mut t,
            "/d",
            Some(Duration::from_secs(30)),
            PrevExist::Exist,
            NOW,
        )
        .unwrap();
        assert_eq!(event.action, Action::Update);
        assert_eq!(event.node.ttl, Some(30));
        assert_eq!(get(&t, "/d", false, NOW).unwrap().nodes.len(), 1);
    }

    #[test]
    fn delete_rules() {
        let mut t = table();
        put(&mut t, "/d/x", "1");

        assert!(delete(&mut t, "/d", &DeleteOptions::default(), NOW)
            .unwrap_err()
            .is_not_file());
        let dir_only = DeleteOptions {
            dir: true,
            ..Default::default()
        };
        assert!(delete(&mut t, "/d", &dir_only, NOW)
            .unwrap_err()
            .is_dir_not_empty());

        let event = delete(&mut t, "/d", &DeleteOptions::tree(), NOW).unwrap();
        assert_eq!(event.action, Action::Delete);
        assert!(event.node.dir);
        assert!(get(&t, "/d/x", false, NOW).unwrap_err().is_key_not_found());
    }

    #[test]
    fn compare_and_delete() {
        let mut t = table();
        put(&mut t, "/k", "v");
        let guarded = DeleteOptions {
            prev_value: Some("other".into()),
            ..Default::default()
        };
        assert!(delete(&mut t, "/k", &guarded, NOW)
            .unwrap_err()
            .is_compare_failed());
        let guarded = DeleteOptions {
            prev_value: Some("v".into()),
            ..Default::default()
        };
        let event = delete(&mut t, "/k", &guarded, NOW).unwrap();
        assert_eq!(event.action, Action::CompareAndDelete);
    }

    #[test]
    fn in_order_keys_are_zero_padded_indices() {
        let mut t = table();
        put(&mut t, "/other", "x");
        let first = create_in_order(&mut t, "/q", "a", None, NOW).unwrap();
        let second = create_in_order(&mut t, "/q", "b", None, NOW).unwrap();
        assert_eq!(first.node.key, "/q/00000000000000000002");
        assert_eq!(second.node.key, "/q/00000000000000000003");

        let listing = get(&t, "/q", false, NOW).unwrap();
        let values: Vec<_> = listing.nodes.iter().map(|n| n.value.as_str()).collect();
        assert_eq!(values, vec!["a", "b"]);
    }

    #[test]
    fn in_order_under_a_leaf_fails() {
        let mut t = table();
        put(&mut t, "/leaf", "x");
        let err = create_in_order(&mut t, "/leaf", "a", None, NOW).unwrap_err();
        assert!(err.is_not_dir());
    }

    #[test]
    fn non_recursive_get_omits_grandchildren() {
        let mut t = table();
        put(&mut t, "/a/b/c", "1");
        let shallow = get(&t, "/a", false, NOW).unwrap();
        assert_eq!(shallow.nodes.len(), 1);
        assert!(shallow.nodes[0].dir);
        assert!(shallow.nodes[0].nodes.is_empty());
    }

    #[test]
    fn expired_entries_are_purged_with_events() {
        let mut t = table();
        set(
            &mut t,
            "/tmp/k",
            "v",
            &SetOptions::with_ttl(Duration::from_secs(2)),
            NOW,
        )
        .unwrap();
        assert_eq!(get(&t, "/tmp/k", false, NOW).unwrap().ttl, Some(2));

        assert!(purge_expired(&mut t, NOW + 1_999).unwrap().is_empty());
        let events = purge_expired(&mut t, NOW + 2_000).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, Action::Expire);
        assert_eq!(events[0].node.key, "/tmp/k");
        assert!(get(&t, "/tmp/k", false, NOW).unwrap_err().is_key_not_found());
        assert!(get(&t, "/tmp", false, NOW).unwrap().dir);
    }

    #[test]
    fn expiring_directory_takes_its_children() {
        let mut t = table();
        set_dir(
            &mut t,
            "/d",
            Some(Duration::from_secs(1)),
            PrevExist::Ignore,
            NOW,
        )
        .unwrap();
        set(
            &mut t,
            "/d/x",
            "1",
            &SetOptions::with_ttl(Duration::from_secs(1)),
            NOW,
        )
        .unwrap();
        let events = purge_expired(&mut t, NOW + 5_000).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].node.key, "/d");
        assert!(get(&t, "/", true, NOW).unwrap().nodes.is_empty());
    }
}
