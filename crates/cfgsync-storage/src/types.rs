//! Request and response types shared by all transports.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A node of the hierarchical keyspace as returned by a transport.
///
/// Directories carry an empty `value` and, depending on the request, their
/// children in `nodes`. Leaves carry their value and no children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreNode {
    pub key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
    #[serde(default)]
    pub dir: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<StoreNode>,
    pub created_index: u64,
    pub modified_index: u64,
    /// Remaining time to live in whole seconds, if the node expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<i64>,
}

impl StoreNode {
    /// Returns the immediate child with the given key.
    pub fn child(&self, key: &str) -> Option<&StoreNode> {
        self.nodes.iter().find(|node| node.key == key)
    }

    /// Returns the keys of every descendant, depth-first.
    pub fn descendant_keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        collect_keys(&self.nodes, &mut keys);
        keys
    }
}

fn collect_keys(nodes: &[StoreNode], keys: &mut Vec<String>) {
    for node in nodes {
        keys.push(node.key.clone());
        collect_keys(&node.nodes, keys);
    }
}

/// Existence precondition of a write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PrevExist {
    /// Write whether or not the key exists.
    #[default]
    Ignore,
    /// Only overwrite an existing key.
    Exist,
    /// Only create a missing key.
    NoExist,
}

/// Options of a leaf write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetOptions {
    pub ttl: Option<Duration>,
    /// Guard: the current value must equal this.
    pub prev_value: Option<String>,
    /// Guard: the current modification index must equal this.
    pub prev_index: Option<u64>,
    pub prev_exist: PrevExist,
}

impl SetOptions {
    pub fn with_ttl(ttl: Duration) -> Self {
        SetOptions {
            ttl: Some(ttl),
            ..Default::default()
        }
    }

    /// Compare-and-swap on the current value.
    pub fn if_value(value: impl Into<String>) -> Self {
        SetOptions {
            prev_value: Some(value.into()),
            ..Default::default()
        }
    }

    /// Compare-and-swap on the current modification index.
    pub fn if_index(index: u64) -> Self {
        SetOptions {
            prev_index: Some(index),
            ..Default::default()
        }
    }

    pub(crate) fn is_guarded(&self) -> bool {
        self.prev_value.is_some() || self.prev_index.is_some()
    }
}

/// Options of a delete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    /// Delete a directory together with everything beneath it.
    pub recursive: bool,
    /// Allow deleting an empty directory.
    pub dir: bool,
    pub prev_value: Option<String>,
    pub prev_index: Option<u64>,
}

impl DeleteOptions {
    /// Recursive directory delete.
    pub fn tree() -> Self {
        DeleteOptions {
            recursive: true,
            dir: true,
            ..Default::default()
        }
    }

    pub(crate) fn is_guarded(&self) -> bool {
        self.prev_value.is_some() || self.prev_index.is_some()
    }
}

/// Options of a watch subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchOptions {
    /// Also report changes beneath the watched key.
    pub recursive: bool,
    /// Replay retained events with an index greater than this.
    pub after_index: Option<u64>,
}

/// Kind of change reported by a watch event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    Set,
    Create,
    Update,
    CompareAndSwap,
    Delete,
    CompareAndDelete,
    Expire,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Set => "set",
            Action::Create => "create",
            Action::Update => "update",
            Action::CompareAndSwap => "compareAndSwap",
            Action::Delete => "delete",
            Action::CompareAndDelete => "compareAndDelete",
            Action::Expire => "expire",
        };
        f.write_str(name)
    }
}

/// One change of the keyspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchEvent {
    pub action: Action,
    pub node: StoreNode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_node: Option<StoreNode>,
    /// Store index at which the change happened.
    pub index: u64,
}

/// Per-transport settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportConfig {
    /// Upper bound on a single request, including waiting for the connection.
    pub timeout: Duration,
    /// Number of events retained for watch replay.
    pub history: usize,
}

impl TransportConfig {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
    pub const DEFAULT_HISTORY: usize = 1000;
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            timeout: Self::DEFAULT_TIMEOUT,
            history: Self::DEFAULT_HISTORY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(key: &str, value: &str) -> StoreNode {
        StoreNode {
            key: key.into(),
            value: value.into(),
            dir: false,
            nodes: vec![],
            created_index: 1,
            modified_index: 1,
            ttl: None,
        }
    }

    #[test]
    fn descendant_keys_are_depth_first() {
        let tree = StoreNode {
            key: "/ns".into(),
            value: String::new(),
            dir: true,
            nodes: vec![
                StoreNode {
                    key: "/ns/a".into(),
                    dir: true,
                    nodes: vec![leaf("/ns/a/x", "1")],
                    ..leaf("/ns/a", "")
                },
                leaf("/ns/b", "2"),
            ],
            created_index: 1,
            modified_index: 1,
            ttl: None,
        };
        assert_eq!(tree.descendant_keys(), vec!["/ns/a", "/ns/a/x", "/ns/b"]);
        assert_eq!(tree.child("/ns/b").map(|n| n.value.as_str()), Some("2"));
        assert!(tree.child("/ns/a/x").is_none());
    }

    #[test]
    fn event_json_uses_etcd_action_names() {
        let event = WatchEvent {
            action: Action::CompareAndSwap,
            node: leaf("/k", "v"),
            prev_node: None,
            index: 7,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["action"], "compareAndSwap");
        assert_eq!(json["node"]["value"], "v");
        assert!(json.get("prev_node").is_none());
    }

    #[test]
    fn guarded_options() {
        assert!(SetOptions::if_value("a").is_guarded());
        assert!(SetOptions::if_index(3).is_guarded());
        assert!(!SetOptions::with_ttl(Duration::from_secs(1)).is_guarded());
        assert!(!DeleteOptions::tree().is_guarded());
    }
}
