//! Store path derivation.
//!
//! Paths are `/`-separated strings. A child path is its parent path, a `/`,
//! and the child's segment, with segments used verbatim. The root of a tree
//! is `/<namespace>`, or the empty prefix when no namespace is configured
//! (children of an empty prefix land directly under `/`).

/// Derives the path of a child from its parent prefix and its segment.
///
/// ```
/// use cfgsync_core::path::derive;
///
/// assert_eq!(derive("/ns", "key1"), "/ns/key1");
/// assert_eq!(derive("", "key1"), "/key1");
/// ```
pub fn derive(prefix: &str, segment: &str) -> String {
    let mut path = String::with_capacity(prefix.len() + segment.len() + 1);
    path.push_str(prefix);
    path.push('/');
    path.push_str(segment);
    path
}

/// Derives the path of a sequence element from its position.
pub fn index(prefix: &str, position: usize) -> String {
    derive(prefix, &position.to_string())
}

/// Returns the derivation prefix for a namespace.
///
/// Empty segments are dropped, the same way the store cleans keys, so that
/// `"apps/web/"`, `"/apps/web"` and `"apps//web"` name the same tree.
pub fn root_prefix(namespace: &str) -> String {
    namespace
        .split('/')
        .filter(|segment| !segment.is_empty())
        .fold(String::new(), |prefix, segment| derive(&prefix, segment))
}

/// Returns the key under which a prefix is tracked; the empty prefix is `/`.
pub fn registry_key(prefix: &str) -> String {
    if prefix.is_empty() {
        "/".to_string()
    } else {
        prefix.to_string()
    }
}

/// Returns the final segment of a path.
pub fn last_segment(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Returns true if `path` is `ancestor` or lies beneath it.
pub fn is_within(path: &str, ancestor: &str) -> bool {
    if ancestor == "/" {
        return path.starts_with('/');
    }
    path == ancestor
        || (path.starts_with(ancestor) && path.as_bytes().get(ancestor.len()) == Some(&b'/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_joins_with_slash() {
        assert_eq!(derive("/ns/key1", "subkey1"), "/ns/key1/subkey1");
    }

    #[test]
    fn derive_from_empty_prefix() {
        assert_eq!(derive("", "key1"), "/key1");
    }

    #[test]
    fn derive_keeps_segments_verbatim() {
        assert_eq!(derive("/ns", "a-b.c"), "/ns/a-b.c");
    }

    #[test]
    fn index_uses_position() {
        assert_eq!(index("/ns/key2", 0), "/ns/key2/0");
        assert_eq!(index("/ns/key2", 12), "/ns/key2/12");
    }

    #[test]
    fn root_prefix_drops_empty_segments() {
        assert_eq!(root_prefix("ns"), "/ns");
        assert_eq!(root_prefix("/apps/web/"), "/apps/web");
        assert_eq!(root_prefix(""), "");
        assert_eq!(root_prefix("/"), "");
        assert_eq!(root_prefix("x//y"), "/x/y");
        assert_eq!(root_prefix("//apps///web//"), "/apps/web");
    }

    #[test]
    fn registry_key_of_empty_prefix_is_root() {
        assert_eq!(registry_key(""), "/");
        assert_eq!(registry_key("/ns"), "/ns");
    }

    #[test]
    fn last_segment_of_paths() {
        assert_eq!(last_segment("/ns/key3/m1"), "m1");
        assert_eq!(last_segment("m1"), "m1");
        assert_eq!(last_segment("/"), "");
    }

    #[test]
    fn within_checks_segment_boundaries() {
        assert!(is_within("/ns/key1", "/ns"));
        assert!(is_within("/ns", "/ns"));
        assert!(!is_within("/nsx/key1", "/ns"));
        assert!(is_within("/anything", "/"));
    }
}
