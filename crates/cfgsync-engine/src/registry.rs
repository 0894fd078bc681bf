//! The field registry: which store path each live location was last
//! synchronized with, and at which store version.
//!
//! Paths and handles form a bijection. Static handles come from the
//! [`Layout`]; every other path (sequence elements, mapping entries and their
//! sub-fields) gets a dynamic handle the first time it is recorded and keeps
//! it for the registry's lifetime, even if its entry is later dropped.
//!
//! Every static field starts with an entry at version 0, so only dynamic
//! handles can be unmapped. Entries are keyed by handle. At most one entry
//! holds a given locator: recording a path for a locator evicts whichever
//! other path held it.

use std::collections::HashMap;

use cfgsync_core::{FieldHandle, Kind, Layout, Locator, Value};
use tracing::debug;

use crate::error::SyncError;

/// One synchronized location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    pub handle: FieldHandle,
    pub path: String,
    pub locator: Locator,
    pub kind: Kind,
    /// Store modification index at the last confirmed read or write; 0 if
    /// none was confirmed.
    pub version: u64,
}

#[derive(Debug)]
pub struct Registry {
    layout: Layout,
    dynamic_paths: Vec<String>,
    dynamic_handles: HashMap<String, FieldHandle>,
    entries: HashMap<FieldHandle, RegistryEntry>,
    by_locator: HashMap<Locator, FieldHandle>,
}

impl Registry {
    pub fn new(layout: Layout) -> Self {
        let mut registry = Registry {
            layout,
            dynamic_paths: Vec::new(),
            dynamic_handles: HashMap::new(),
            entries: HashMap::new(),
            by_locator: HashMap::new(),
        };
        registry.seed();
        registry
    }

    fn seed(&mut self) {
        for static_entry in self.layout.entries() {
            self.by_locator
                .insert(static_entry.locator.clone(), static_entry.handle);
            self.entries.insert(
                static_entry.handle,
                RegistryEntry {
                    handle: static_entry.handle,
                    path: static_entry.path.clone(),
                    locator: static_entry.locator.clone(),
                    kind: static_entry.kind,
                    version: 0,
                },
            );
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Returns the handle bound to `path`, if any.
    pub fn handle_at(&self, path: &str) -> Option<FieldHandle> {
        self.layout
            .handle_at(path)
            .or_else(|| self.dynamic_handles.get(path).copied())
    }

    /// Returns the path bound to `handle`, if any.
    pub fn path_of(&self, handle: FieldHandle) -> Option<&str> {
        if let Some(entry) = self.layout.entry(handle) {
            return Some(&entry.path);
        }
        let offset = (handle.0 as usize).checked_sub(self.layout.len())?;
        self.dynamic_paths.get(offset).map(String::as_str)
    }

    fn bind(&mut self, path: &str) -> FieldHandle {
        if let Some(handle) = self.handle_at(path) {
            return handle;
        }
        let handle = FieldHandle((self.layout.len() + self.dynamic_paths.len()) as u32);
        self.dynamic_paths.push(path.to_string());
        self.dynamic_handles.insert(path.to_string(), handle);
        handle
    }

    /// Records that `path` was synchronized with the value at `locator`.
    ///
    /// A `version` of `None` keeps the previously recorded version (0 for a
    /// new entry).
    pub fn record(
        &mut self,
        path: &str,
        locator: &Locator,
        kind: Kind,
        version: Option<u64>,
    ) -> FieldHandle {
        let handle = self.bind(path);

        if let Some(previous) = self.by_locator.get(locator).copied() {
            if previous != handle {
                self.entries.remove(&previous);
            }
        }
        let last_version = match self.entries.get(&handle) {
            Some(entry) => {
                if entry.locator != *locator {
                    self.by_locator.remove(&entry.locator);
                }
                entry.version
            }
            None => 0,
        };
        let version = version.unwrap_or(last_version);

        debug!(%handle, path, %locator, version, "registry record");
        self.by_locator.insert(locator.clone(), handle);
        self.entries.insert(
            handle,
            RegistryEntry {
                handle,
                path: path.to_string(),
                locator: locator.clone(),
                kind,
                version,
            },
        );
        handle
    }

    /// Drops every entry located strictly beneath `locator`.
    pub fn forget_below(&mut self, locator: &Locator) {
        let doomed: Vec<FieldHandle> = self
            .entries
            .values()
            .filter(|entry| entry.locator.is_below(locator))
            .map(|entry| entry.handle)
            .collect();
        if doomed.is_empty() {
            return;
        }
        debug!(%locator, count = doomed.len(), "registry forget");
        for handle in doomed {
            if let Some(entry) = self.entries.remove(&handle) {
                self.by_locator.remove(&entry.locator);
            }
        }
    }

    /// Drops every dynamic entry and resets static ones to version 0.
    /// Handle bindings are kept.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_locator.clear();
        self.seed();
    }

    pub fn entry(&self, handle: FieldHandle) -> Option<&RegistryEntry> {
        self.entries.get(&handle)
    }

    pub fn entries(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.entries.values()
    }

    /// Resolves a handle against the live value.
    ///
    /// Fails with `FieldNotMapped` if nothing was recorded for a dynamic
    /// handle or the live node has a different kind, and with `FieldNotAddressable` if
    /// the recorded location no longer exists.
    pub fn resolve(&self, handle: FieldHandle, root: &Value) -> Result<&RegistryEntry, SyncError> {
        let entry = self
            .entries
            .get(&handle)
            .ok_or(SyncError::FieldNotMapped { handle })?;
        let live = root
            .resolve(&entry.locator)
            .ok_or(SyncError::FieldNotAddressable { handle })?;
        if live.kind() != entry.kind {
            return Err(SyncError::FieldNotMapped { handle });
        }
        Ok(entry)
    }
}
