//! Load direction of the structure walker.
//!
//! Fills a value tree from a recursive store listing. Struct fields absent
//! from the listing keep their current value; mappings and sequences are
//! rebuilt from scratch. Every filled node is recorded under the key the
//! store reported for it, with that node's modification index.

use std::collections::BTreeMap;

use cfgsync_core::{path, CoreError, Kind, Locator, ScalarKind, Schema, Step, Value};
use cfgsync_storage::StoreNode;

use crate::error::SyncError;
use crate::registry::Registry;

/// Parses store text as a scalar of the given kind.
pub(crate) fn parse_scalar(kind: ScalarKind, text: &str, path: &str) -> Result<Value, SyncError> {
    let parse_error = || SyncError::Parse {
        path: path.to_string(),
        value: text.to_string(),
        kind: kind.into(),
    };
    match kind {
        ScalarKind::String => Ok(Value::String(text.to_string())),
        ScalarKind::Integer => text
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|_| parse_error()),
        ScalarKind::Boolean => match text {
            "true" => Ok(Value::Boolean(true)),
            "false" => Ok(Value::Boolean(false)),
            _ => Err(parse_error()),
        },
    }
}

fn child_path(parent: &str, segment: &str) -> String {
    if parent == "/" {
        path::derive("", segment)
    } else {
        path::derive(parent, segment)
    }
}

pub(crate) struct Loader<'a> {
    registry: &'a mut Registry,
    /// Number of nodes filled.
    pub filled: usize,
}

impl<'a> Loader<'a> {
    pub(crate) fn new(registry: &'a mut Registry) -> Self {
        Loader {
            registry,
            filled: 0,
        }
    }

    pub(crate) fn fill(
        &mut self,
        schema: &Schema,
        value: &mut Value,
        node: &StoreNode,
        at: &Locator,
    ) -> Result<(), SyncError> {
        match schema {
            Schema::Struct(s) => {
                let Value::Struct(fields) = &mut *value else {
                    return Err(mismatch(Kind::Struct, value));
                };
                for (name, segment, field_schema) in s.mapped_fields() {
                    let expected = child_path(&node.key, segment);
                    let Some(child) = node.child(&expected) else {
                        continue;
                    };
                    let slot = fields.get_mut(name).ok_or_else(|| CoreError::InvalidDocument {
                        at: at.to_string(),
                        reason: format!("missing field '{name}'"),
                    })?;
                    self.fill(field_schema, slot, child, &at.child(Step::Field(name.to_string())))?;
                }
            }
            Schema::Mapping(element) => {
                self.registry.forget_below(at);
                *value = Value::Mapping(BTreeMap::new());
                for child in &node.nodes {
                    let key = path::last_segment(&child.key).to_string();
                    let mut entry = Value::zero(element);
                    self.fill(element, &mut entry, child, &at.child(Step::Key(key.clone())))?;
                    if let Value::Mapping(entries) = &mut *value {
                        entries.insert(key, entry);
                    }
                }
            }
            Schema::Sequence(element) => {
                self.registry.forget_below(at);
                *value = Value::Sequence(Vec::new());
                for (position, child) in node.nodes.iter().enumerate() {
                    let mut item = Value::zero(element);
                    self.fill(element, &mut item, child, &at.child(Step::Index(position)))?;
                    if let Value::Sequence(items) = &mut *value {
                        items.push(item);
                    }
                }
            }
            Schema::Scalar(kind) => {
                if node.dir {
                    return Err(SyncError::UnexpectedDirectory {
                        path: node.key.clone(),
                    });
                }
                *value = parse_scalar(*kind, &node.value, &node.key)?;
            }
        }
        self.filled += 1;
        self.registry
            .record(&node.key, at, schema.kind(), Some(node.modified_index));
        Ok(())
    }
}

fn mismatch(expected: Kind, value: &Value) -> SyncError {
    CoreError::KindMismatch {
        expected,
        found: value.kind(),
    }
    .into()
}
