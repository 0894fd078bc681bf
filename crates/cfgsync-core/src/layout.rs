//! Static field layout of a configuration schema.
//!
//! The [`Layout`] enumerates every location whose path is known before any
//! data is read: the root and every mapped field reachable from it through
//! struct fields alone. Sequence and mapping fields are included themselves,
//! but their elements are not (their paths depend on runtime contents).
//!
//! Handles are assigned depth-first in declaration order, starting with
//! [`FieldHandle::ROOT`].

use std::collections::HashMap;

use crate::handle::FieldHandle;
use crate::locator::{Locator, Step};
use crate::path;
use crate::schema::{Kind, Schema, StructSchema};

/// One statically addressable field.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutEntry {
    pub handle: FieldHandle,
    /// Dotted field names from the root (`""` for the root itself).
    pub name: String,
    pub path: String,
    pub locator: Locator,
    pub kind: Kind,
}

/// Handles, names and paths of all statically addressable fields.
#[derive(Debug, Clone)]
pub struct Layout {
    entries: Vec<LayoutEntry>,
    by_name: HashMap<String, FieldHandle>,
    by_path: HashMap<String, FieldHandle>,
}

impl Layout {
    /// Builds the layout of `root` stored under the derivation `prefix`.
    pub fn new(root: &StructSchema, prefix: &str) -> Self {
        let mut layout = Layout {
            entries: Vec::new(),
            by_name: HashMap::new(),
            by_path: HashMap::new(),
        };
        layout.push(String::new(), path::registry_key(prefix), Locator::root(), Kind::Struct);
        layout.collect(root, prefix, "", &Locator::root());
        layout
    }

    fn collect(&mut self, schema: &StructSchema, prefix: &str, name_prefix: &str, at: &Locator) {
        for (name, segment, field) in schema.mapped_fields() {
            let field_path = path::derive(prefix, segment);
            let dotted = if name_prefix.is_empty() {
                name.to_string()
            } else {
                format!("{name_prefix}.{name}")
            };
            let locator = at.child(Step::Field(name.to_string()));
            self.push(dotted.clone(), field_path.clone(), locator.clone(), field.kind());
            if let Schema::Struct(nested) = field {
                self.collect(nested, &field_path, &dotted, &locator);
            }
        }
    }

    fn push(&mut self, name: String, path: String, locator: Locator, kind: Kind) {
        let handle = FieldHandle(self.entries.len() as u32);
        self.by_name.insert(name.clone(), handle);
        self.by_path.insert(path.clone(), handle);
        self.entries.push(LayoutEntry {
            handle,
            name,
            path,
            locator,
            kind,
        });
    }

    /// Looks up a handle by dotted field names, e.g. `"Key1.Subkey1"`.
    pub fn handle(&self, name: &str) -> Option<FieldHandle> {
        self.by_name.get(name).copied()
    }

    /// Looks up a handle by store path.
    pub fn handle_at(&self, path: &str) -> Option<FieldHandle> {
        self.by_path.get(path).copied()
    }

    pub fn entry(&self, handle: FieldHandle) -> Option<&LayoutEntry> {
        self.entries.get(handle.0 as usize)
    }

    pub fn entries(&self) -> &[LayoutEntry] {
        &self.entries
    }

    /// Number of static handles; dynamic handles are numbered from here.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
