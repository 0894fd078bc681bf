//! Live configuration values.
//!
//! A [`Value`] tree is the in-memory object graph that a synchronizer saves
//! to and loads from the store. Its shape is described by a
//! [`Schema`](crate::schema::Schema): [`Value::zero`] builds the zero value of
//! a schema and [`Value::check`] verifies that a tree conforms to one.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::locator::{Locator, Step};
use crate::schema::{Kind, ScalarKind, Schema};

/// A node of a live configuration tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Struct fields by field name, in schema declaration order.
    Struct(IndexMap<String, Value>),
    Sequence(Vec<Value>),
    Mapping(BTreeMap<String, Value>),
    String(String),
    Integer(i64),
    Boolean(bool),
}

impl Value {
    /// Builds the zero value of a schema.
    ///
    /// Scalars are `""`, `0` and `false`; sequences and mappings are empty;
    /// structs hold the zero value of every field, mapped or not.
    pub fn zero(schema: &Schema) -> Value {
        match schema {
            Schema::Struct(s) => Value::Struct(
                s.fields
                    .iter()
                    .map(|(name, def)| (name.clone(), Value::zero(&def.schema)))
                    .collect(),
            ),
            Schema::Sequence(_) => Value::Sequence(Vec::new()),
            Schema::Mapping(_) => Value::Mapping(BTreeMap::new()),
            Schema::Scalar(ScalarKind::String) => Value::String(String::new()),
            Schema::Scalar(ScalarKind::Integer) => Value::Integer(0),
            Schema::Scalar(ScalarKind::Boolean) => Value::Boolean(false),
        }
    }

    pub fn kind(&self) -> Kind {
        match self {
            Value::Struct(_) => Kind::Struct,
            Value::Sequence(_) => Kind::Sequence,
            Value::Mapping(_) => Kind::Mapping,
            Value::String(_) => Kind::String,
            Value::Integer(_) => Kind::Integer,
            Value::Boolean(_) => Kind::Boolean,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns a struct field by name.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Struct(fields) => fields.get(name),
            _ => None,
        }
    }

    /// Returns the node a locator points at.
    pub fn resolve(&self, locator: &Locator) -> Option<&Value> {
        let mut current = self;
        for step in locator.steps() {
            current = match (step, current) {
                (Step::Field(name), Value::Struct(fields)) => fields.get(name)?,
                (Step::Index(index), Value::Sequence(items)) => items.get(*index)?,
                (Step::Key(key), Value::Mapping(entries)) => entries.get(key)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Returns the node a locator points at, mutably.
    pub fn resolve_mut(&mut self, locator: &Locator) -> Option<&mut Value> {
        let mut current = self;
        for step in locator.steps() {
            current = match (step, current) {
                (Step::Field(name), Value::Struct(fields)) => fields.get_mut(name)?,
                (Step::Index(index), Value::Sequence(items)) => items.get_mut(*index)?,
                (Step::Key(key), Value::Mapping(entries)) => entries.get_mut(key)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Verifies that this tree has the shape `schema` describes.
    ///
    /// Structs must carry exactly the schema's fields.
    pub fn check(&self, schema: &Schema) -> Result<(), CoreError> {
        match (schema, self) {
            (Schema::Struct(s), Value::Struct(fields)) => {
                if fields.len() != s.fields.len() {
                    return Err(CoreError::InvalidDocument {
                        at: s.name.clone(),
                        reason: format!(
                            "expected {} fields, found {}",
                            s.fields.len(),
                            fields.len()
                        ),
                    });
                }
                for (name, def) in &s.fields {
                    let field = fields.get(name).ok_or_else(|| CoreError::InvalidDocument {
                        at: s.name.clone(),
                        reason: format!("missing field '{name}'"),
                    })?;
                    field.check(&def.schema)?;
                }
                Ok(())
            }
            (Schema::Sequence(element), Value::Sequence(items)) => {
                items.iter().try_for_each(|item| item.check(element))
            }
            (Schema::Mapping(element), Value::Mapping(entries)) => {
                entries.values().try_for_each(|entry| entry.check(element))
            }
            (Schema::Scalar(kind), value) if Kind::from(*kind) == value.kind() => Ok(()),
            (schema, value) => Err(CoreError::KindMismatch {
                expected: schema.kind(),
                found: value.kind(),
            }),
        }
    }

    /// Converts a JSON document into a value tree of the given schema.
    ///
    /// Struct fields absent from the document take their zero value; keys
    /// that name no field are rejected.
    pub fn from_json(schema: &Schema, json: &serde_json::Value) -> Result<Value, CoreError> {
        from_json_at(schema, json, "<root>")
    }

    /// Parses JSON text into a value tree of the given schema.
    pub fn from_json_str(schema: &Schema, text: &str) -> Result<Value, CoreError> {
        let json: serde_json::Value = serde_json::from_str(text)?;
        Value::from_json(schema, &json)
    }

    /// Renders this tree as plain JSON (structs and mappings become objects).
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Struct(fields) => serde_json::Value::Object(
                fields
                    .iter()
                    .map(|(name, value)| (name.clone(), value.to_json()))
                    .collect(),
            ),
            Value::Sequence(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Mapping(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Boolean(b) => serde_json::Value::Bool(*b),
        }
    }
}

fn from_json_at(schema: &Schema, json: &serde_json::Value, at: &str) -> Result<Value, CoreError> {
    let invalid = |reason: String| CoreError::InvalidDocument {
        at: at.to_string(),
        reason,
    };

    match (schema, json) {
        (Schema::Struct(s), serde_json::Value::Object(object)) => {
            if let Some(unknown) = object.keys().find(|key| s.get(key).is_none()) {
                return Err(invalid(format!("unknown field '{unknown}' for {}", s.name)));
            }
            let mut fields = IndexMap::with_capacity(s.fields.len());
            for (name, def) in &s.fields {
                let value = match object.get(name) {
                    Some(field) => from_json_at(&def.schema, field, &format!("{at}.{name}"))?,
                    None => Value::zero(&def.schema),
                };
                fields.insert(name.clone(), value);
            }
            Ok(Value::Struct(fields))
        }
        (Schema::Sequence(element), serde_json::Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, item)| from_json_at(element, item, &format!("{at}[{i}]")))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Sequence),
        (Schema::Mapping(element), serde_json::Value::Object(object)) => object
            .iter()
            .map(|(key, item)| {
                from_json_at(element, item, &format!("{at}[{key:?}]")).map(|v| (key.clone(), v))
            })
            .collect::<Result<BTreeMap<_, _>, _>>()
            .map(Value::Mapping),
        (Schema::Scalar(ScalarKind::String), serde_json::Value::String(s)) => {
            Ok(Value::String(s.clone()))
        }
        (Schema::Scalar(ScalarKind::Integer), serde_json::Value::Number(n)) => n
            .as_i64()
            .map(Value::Integer)
            .ok_or_else(|| invalid(format!("{n} is not a 64-bit integer"))),
        (Schema::Scalar(ScalarKind::Boolean), serde_json::Value::Bool(b)) => Ok(Value::Boolean(*b)),
        (schema, other) => Err(invalid(format!("expected {}, found {other}", schema.kind()))),
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}
