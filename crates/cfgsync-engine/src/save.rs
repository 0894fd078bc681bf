//! Save direction of the structure walker.
//!
//! Walks a value tree alongside its schema and writes every mapped node:
//! scalars become leaves, mappings and sequences become directories, and
//! structs become the implicit parents of their fields. The first error
//! aborts the walk; whatever was already written stays written.

use cfgsync_core::{path, CoreError, Locator, Schema, Step, Value};
use cfgsync_storage::{KvTransport, SetOptions};
use tracing::debug;

use crate::error::SyncError;
use crate::registry::Registry;

/// Store text of a scalar value.
pub(crate) fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Integer(i) => Some(i.to_string()),
        Value::Boolean(b) => Some(b.to_string()),
        _ => None,
    }
}

fn mismatch(schema: &Schema, value: &Value) -> SyncError {
    CoreError::KindMismatch {
        expected: schema.kind(),
        found: value.kind(),
    }
    .into()
}

pub(crate) struct Saver<'a, T: KvTransport + ?Sized> {
    transport: &'a T,
    registry: &'a mut Registry,
    /// Number of store writes issued.
    pub writes: usize,
}

impl<'a, T: KvTransport + ?Sized> Saver<'a, T> {
    pub(crate) fn new(transport: &'a T, registry: &'a mut Registry) -> Self {
        Saver {
            transport,
            registry,
            writes: 0,
        }
    }

    pub(crate) fn save(
        &mut self,
        schema: &Schema,
        value: &Value,
        at: &Locator,
        path: &str,
    ) -> Result<(), SyncError> {
        match (schema, value) {
            (Schema::Struct(s), Value::Struct(fields)) => {
                for (name, segment, field_schema) in s.mapped_fields() {
                    let field = fields.get(name).ok_or_else(|| CoreError::InvalidDocument {
                        at: at.to_string(),
                        reason: format!("missing field '{name}'"),
                    })?;
                    let child = at.child(Step::Field(name.to_string()));
                    self.save(field_schema, field, &child, &path::derive(path, segment))?;
                }
                self.registry
                    .record(&path::registry_key(path), at, schema.kind(), None);
                Ok(())
            }
            (Schema::Mapping(element), Value::Mapping(entries)) => {
                self.ensure_dir(schema, at, path)?;
                for (key, entry) in entries {
                    if key.is_empty() || key.contains('/') {
                        return Err(SyncError::InvalidMappingKey { key: key.clone() });
                    }
                    let child = at.child(Step::Key(key.clone()));
                    self.save(element, entry, &child, &path::derive(path, key))?;
                }
                Ok(())
            }
            (Schema::Sequence(element), Value::Sequence(items)) => {
                self.ensure_dir(schema, at, path)?;
                for (position, item) in items.iter().enumerate() {
                    let child = at.child(Step::Index(position));
                    match element.as_ref() {
                        Schema::Scalar(_) => self.append(element, item, &child, path)?,
                        _ => self.save(element, item, &child, &path::index(path, position))?,
                    }
                }
                Ok(())
            }
            (Schema::Scalar(_), _) => {
                let text = self.text_of(schema, value)?;
                let node = self.transport.set(path, &text, &SetOptions::default())?;
                self.writes += 1;
                debug!(path, index = node.modified_index, "set");
                self.registry
                    .record(path, at, schema.kind(), Some(node.modified_index));
                Ok(())
            }
            _ => Err(mismatch(schema, value)),
        }
    }

    fn text_of(&self, schema: &Schema, value: &Value) -> Result<String, SyncError> {
        if schema.kind() != value.kind() {
            return Err(mismatch(schema, value));
        }
        scalar_text(value).ok_or_else(|| mismatch(schema, value))
    }

    /// Appends a scalar sequence element under a store-assigned key.
    fn append(
        &mut self,
        schema: &Schema,
        value: &Value,
        at: &Locator,
        dir: &str,
    ) -> Result<(), SyncError> {
        let text = self.text_of(schema, value)?;
        let node = self.transport.create_in_order(dir, &text, None)?;
        self.writes += 1;
        debug!(path = %node.key, index = node.modified_index, "append");
        self.registry
            .record(&node.key, at, schema.kind(), Some(node.modified_index));
        Ok(())
    }

    /// Creates the directory of a container; an existing one is fine.
    fn ensure_dir(&mut self, schema: &Schema, at: &Locator, path: &str) -> Result<(), SyncError> {
        let version = match self.transport.make_dir(path, None) {
            Ok(node) => {
                self.writes += 1;
                debug!(path, index = node.modified_index, "make dir");
                Some(node.modified_index)
            }
            Err(err) if err.is_node_exist() => None,
            Err(err) => return Err(err.into()),
        };
        self.registry.record(path, at, schema.kind(), version);
        Ok(())
    }
}
