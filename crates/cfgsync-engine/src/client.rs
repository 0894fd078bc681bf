//! The synchronization facade.
//!
//! A [`ConfigSync`] owns one live configuration tree, the schema it follows,
//! and the registry of which store path each part of the tree was last
//! synchronized with. All mutating operations take `&mut self`, so a tree is
//! never saved and loaded concurrently.

use cfgsync_core::{
    path, CoreError, FieldHandle, Kind, Layout, Locator, Schema, Step, StructSchema, Value,
};
use cfgsync_storage::{DeleteOptions, KvTransport, Subscription, WatchOptions};
use tracing::{debug, info};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::load::Loader;
use crate::registry::Registry;
use crate::save::Saver;

fn root_of(schema: &Schema) -> Result<&StructSchema, SyncError> {
    schema.as_struct().ok_or_else(|| SyncError::InvalidSchema {
        reason: "root is not a struct".to_string(),
    })
}

/// Keeps a typed configuration tree in sync with a hierarchical store.
pub struct ConfigSync<T: KvTransport> {
    transport: T,
    namespace: String,
    prefix: String,
    schema: Schema,
    value: Value,
    registry: Registry,
}

impl<T: KvTransport> ConfigSync<T> {
    /// Creates a synchronizer whose tree starts at the schema's zero value.
    pub fn new(transport: T, namespace: &str, schema: StructSchema) -> Result<Self, SyncError> {
        let value = Value::zero(&Schema::Struct(schema.clone()));
        Self::with_value(transport, namespace, schema, value)
    }

    /// Creates a synchronizer around an existing tree.
    pub fn with_value(
        transport: T,
        namespace: &str,
        schema: StructSchema,
        value: Value,
    ) -> Result<Self, SyncError> {
        let prefix = path::root_prefix(namespace);
        let layout = Layout::new(&schema, &prefix);
        let schema = Schema::Struct(schema);
        schema.validate().map_err(|err| match err {
            CoreError::InvalidSchema { reason } => SyncError::InvalidSchema { reason },
            other => other.into(),
        })?;
        value.check(&schema)?;

        debug!(namespace, fields = layout.len(), "config sync created");
        Ok(ConfigSync {
            transport,
            namespace: prefix.trim_start_matches('/').to_string(),
            prefix,
            schema,
            value,
            registry: Registry::new(layout),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Store path of the root (`/` for an empty namespace).
    pub fn root_path(&self) -> String {
        path::registry_key(&self.prefix)
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Mutable access to the live tree.
    ///
    /// Changing the shape of the tree (e.g. shrinking a sequence) can leave
    /// recorded handles pointing at locations that no longer exist.
    pub fn value_mut(&mut self) -> &mut Value {
        &mut self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    // -------------------------------------------------------------------
    // Handles
    // -------------------------------------------------------------------

    /// Handle of a statically addressable field by dotted field names,
    /// e.g. `"Key1.Subkey1"`; `""` is the root.
    pub fn handle(&self, name: &str) -> Result<FieldHandle, SyncError> {
        self.registry
            .layout()
            .handle(name)
            .ok_or_else(|| {
                CoreError::UnknownField {
                    name: name.to_string(),
                }
                .into()
            })
    }

    /// Handle bound to a store path, static or recorded by a save or load.
    pub fn handle_at(&self, path: &str) -> Option<FieldHandle> {
        self.registry.handle_at(path)
    }

    pub fn path_of(&self, handle: FieldHandle) -> Option<&str> {
        self.registry.path_of(handle)
    }

    /// Path, locator and kind of a handle: its registry entry if one was
    /// recorded, otherwise its static layout entry.
    fn locate(&self, handle: FieldHandle) -> Result<(String, Locator, Kind), SyncError> {
        if let Some(entry) = self.registry.entry(handle) {
            return Ok((entry.path.clone(), entry.locator.clone(), entry.kind));
        }
        self.registry
            .layout()
            .entry(handle)
            .map(|entry| (entry.path.clone(), entry.locator.clone(), entry.kind))
            .ok_or(SyncError::FieldNotMapped { handle })
    }

    fn schema_at(&self, handle: FieldHandle, locator: &Locator) -> Result<&Schema, SyncError> {
        self.schema
            .resolve(locator)
            .ok_or(SyncError::FieldNotAddressable { handle })
    }

    /// Live value of a field.
    pub fn get(&self, handle: FieldHandle) -> Result<&Value, SyncError> {
        let (_, locator, _) = self.locate(handle)?;
        self.value
            .resolve(&locator)
            .ok_or(SyncError::FieldNotAddressable { handle })
    }

    /// Replaces the live value of a field. The new value must fit the
    /// field's schema.
    pub fn set(&mut self, handle: FieldHandle, value: impl Into<Value>) -> Result<(), SyncError> {
        let value = value.into();
        let (_, locator, _) = self.locate(handle)?;
        value.check(self.schema_at(handle, &locator)?)?;
        let slot = self
            .value
            .resolve_mut(&locator)
            .ok_or(SyncError::FieldNotAddressable { handle })?;
        *slot = value;
        Ok(())
    }

    // -------------------------------------------------------------------
    // Synchronization
    // -------------------------------------------------------------------

    /// Writes the whole tree.
    pub fn save(&mut self) -> Result<(), SyncError> {
        let mut saver = Saver::new(&self.transport, &mut self.registry);
        saver.save(&self.schema, &self.value, &Locator::root(), &self.prefix)?;
        info!(path = %path::registry_key(&self.prefix), writes = saver.writes, "saved");
        Ok(())
    }

    /// Writes only the sub-tree of one recorded field.
    pub fn save_field(&mut self, handle: FieldHandle) -> Result<(), SyncError> {
        let entry = self.registry.resolve(handle, &self.value)?;
        let (path, locator) = (entry.path.clone(), entry.locator.clone());
        let schema = self
            .schema
            .resolve(&locator)
            .ok_or(SyncError::FieldNotAddressable { handle })?;
        let value = self
            .value
            .resolve(&locator)
            .ok_or(SyncError::FieldNotAddressable { handle })?;

        let mut saver = Saver::new(&self.transport, &mut self.registry);
        // The root is saved under its prefix; every other entry under its path.
        let target = if locator.is_root() { &self.prefix } else { &path };
        saver.save(schema, value, &locator, target)?;
        info!(%handle, path = %path, writes = saver.writes, "saved field");
        Ok(())
    }

    /// Reads every mapped top-level field, aborting at the first error.
    pub fn load(&mut self) -> Result<(), SyncError> {
        let root = root_of(&self.schema)?;
        let Value::Struct(fields) = &mut self.value else {
            return Err(CoreError::KindMismatch {
                expected: Kind::Struct,
                found: self.value.kind(),
            }
            .into());
        };

        let mut loader = Loader::new(&mut self.registry);
        for (name, segment, schema) in root.mapped_fields() {
            let field_path = path::derive(&self.prefix, segment);
            let node = self.transport.get(&field_path, true)?;
            let slot = fields.get_mut(name).ok_or_else(|| CoreError::InvalidDocument {
                at: root.name.clone(),
                reason: format!("missing field '{name}'"),
            })?;
            let at = Locator::root().child(Step::Field(name.to_string()));
            loader.fill(schema, slot, &node, &at)?;
        }
        let filled = loader.filled;
        self.registry.record(
            &path::registry_key(&self.prefix),
            &Locator::root(),
            Kind::Struct,
            None,
        );
        info!(path = %path::registry_key(&self.prefix), filled, "loaded");
        Ok(())
    }

    /// Re-reads one field's sub-tree from the store.
    pub fn reload(&mut self, handle: FieldHandle) -> Result<(), SyncError> {
        let (path, locator, _) = self.locate(handle)?;
        if locator.is_root() {
            return self.load();
        }
        let schema = self
            .schema
            .resolve(&locator)
            .ok_or(SyncError::FieldNotAddressable { handle })?;
        let node = self.transport.get(&path, true)?;
        let slot = self
            .value
            .resolve_mut(&locator)
            .ok_or(SyncError::FieldNotAddressable { handle })?;
        let mut loader = Loader::new(&mut self.registry);
        loader.fill(schema, slot, &node, &locator)?;
        info!(%handle, path = %path, filled = loader.filled, "reloaded field");
        Ok(())
    }

    /// Last store version confirmed for a field, without contacting the
    /// store. 0 for a static field no save or load has confirmed yet.
    pub fn version(&self, handle: FieldHandle) -> Result<u64, SyncError> {
        Ok(self.registry.resolve(handle, &self.value)?.version)
    }

    /// Subscribes to changes at or beneath a field's path.
    pub fn watch(&self, handle: FieldHandle) -> Result<Subscription, SyncError> {
        let (path, _, _) = self.locate(handle)?;
        let options = WatchOptions {
            recursive: true,
            after_index: None,
        };
        Ok(self.transport.watch(&path, &options)?)
    }

    /// Deletes the whole tree from the store, forgets every dynamic handle's
    /// entry and resets static fields to version 0. A tree that is not stored
    /// counts as purged.
    pub fn purge(&mut self) -> Result<(), SyncError> {
        let targets: Vec<String> = if self.prefix.is_empty() {
            // The store root itself cannot be deleted.
            root_of(&self.schema)?
                .mapped_fields()
                .map(|(_, segment, _)| path::derive("", segment))
                .collect()
        } else {
            vec![self.prefix.clone()]
        };
        for target in &targets {
            match self.transport.delete(target, &DeleteOptions::tree()) {
                Ok(_) => {}
                Err(err) if err.is_key_not_found() => {}
                Err(err) => return Err(err.into()),
            }
        }
        self.registry.clear();
        info!(path = %self.root_path(), "purged");
        Ok(())
    }
}

impl ConfigSync<Box<dyn KvTransport>> {
    /// Creates a synchronizer over the transport a config describes.
    pub fn from_config(config: &SyncConfig, schema: StructSchema) -> Result<Self, SyncError> {
        let transport = config.open_store()?;
        ConfigSync::new(transport, &config.namespace, schema)
    }
}
