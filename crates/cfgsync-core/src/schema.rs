//! The configuration schema model.
//!
//! A [`Schema`] describes the static shape of a configuration tree: structs
//! with insertion-ordered named fields, homogeneous sequences, string-keyed
//! mappings, and three scalar kinds. Each struct field carries an optional
//! store-path segment; a field without a segment (or with an empty one) is
//! excluded from synchronization.
//!
//! Schemas are built once, validated with [`Schema::validate`], and walked
//! by ordinary recursive functions.

use std::collections::HashSet;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::locator::{Locator, Step};

/// Scalar leaf kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarKind {
    String,
    Integer,
    Boolean,
}

/// Flattened node kind, used for diagnostics and identity checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kind {
    Struct,
    Sequence,
    Mapping,
    String,
    Integer,
    Boolean,
}

impl From<ScalarKind> for Kind {
    fn from(kind: ScalarKind) -> Self {
        match kind {
            ScalarKind::String => Kind::String,
            ScalarKind::Integer => Kind::Integer,
            ScalarKind::Boolean => Kind::Boolean,
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Kind::Struct => "struct",
            Kind::Sequence => "sequence",
            Kind::Mapping => "mapping",
            Kind::String => "string",
            Kind::Integer => "integer",
            Kind::Boolean => "boolean",
        };
        f.write_str(name)
    }
}

/// Shape of one node of a configuration tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Schema {
    /// Named struct with ordered, optionally annotated fields.
    Struct(StructSchema),
    /// Ordered list of homogeneous elements.
    Sequence(Box<Schema>),
    /// Unordered string-keyed entries of homogeneous values.
    Mapping(Box<Schema>),
    /// Leaf value.
    Scalar(ScalarKind),
}

impl Schema {
    pub fn string() -> Self {
        Schema::Scalar(ScalarKind::String)
    }

    pub fn integer() -> Self {
        Schema::Scalar(ScalarKind::Integer)
    }

    pub fn boolean() -> Self {
        Schema::Scalar(ScalarKind::Boolean)
    }

    pub fn sequence(element: Schema) -> Self {
        Schema::Sequence(Box::new(element))
    }

    pub fn mapping(element: Schema) -> Self {
        Schema::Mapping(Box::new(element))
    }

    /// Returns the flattened kind of this node.
    pub fn kind(&self) -> Kind {
        match self {
            Schema::Struct(_) => Kind::Struct,
            Schema::Sequence(_) => Kind::Sequence,
            Schema::Mapping(_) => Kind::Mapping,
            Schema::Scalar(scalar) => (*scalar).into(),
        }
    }

    /// Returns the struct schema if this node is a struct.
    pub fn as_struct(&self) -> Option<&StructSchema> {
        match self {
            Schema::Struct(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the element schema of a sequence or mapping.
    pub fn element(&self) -> Option<&Schema> {
        match self {
            Schema::Sequence(element) | Schema::Mapping(element) => Some(element),
            _ => None,
        }
    }

    /// Follows a locator through the schema.
    ///
    /// `Field` steps descend into struct fields, `Index` steps into sequence
    /// elements, and `Key` steps into mapping values. Returns `None` when a
    /// step does not fit the node it is applied to.
    pub fn resolve(&self, locator: &Locator) -> Option<&Schema> {
        let mut current = self;
        for step in locator.steps() {
            current = match (step, current) {
                (Step::Field(name), Schema::Struct(s)) => &s.get(name)?.schema,
                (Step::Index(_), Schema::Sequence(element)) => element,
                (Step::Key(_), Schema::Mapping(element)) => element,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Checks that every node of this schema can be synchronized.
    ///
    /// Sequence elements must be structs or scalars, mapping values must be
    /// structs or strings, segments must not contain `/`, and no two mapped
    /// fields of one struct may share a segment.
    pub fn validate(&self) -> Result<(), CoreError> {
        self.validate_at("<root>")
    }

    fn validate_at(&self, at: &str) -> Result<(), CoreError> {
        match self {
            Schema::Struct(s) => s.validate_at(at),
            Schema::Sequence(element) => match element.as_ref() {
                Schema::Struct(s) => s.validate_at(&format!("{at}[]")),
                Schema::Scalar(_) => Ok(()),
                other => Err(CoreError::InvalidSchema {
                    reason: format!("{at}: sequence of {} is not supported", other.kind()),
                }),
            },
            Schema::Mapping(element) => match element.as_ref() {
                Schema::Struct(s) => s.validate_at(&format!("{at}{{}}")),
                Schema::Scalar(ScalarKind::String) => Ok(()),
                other => Err(CoreError::InvalidSchema {
                    reason: format!("{at}: mapping of {} is not supported", other.kind()),
                }),
            },
            Schema::Scalar(_) => Ok(()),
        }
    }
}

impl From<StructSchema> for Schema {
    fn from(s: StructSchema) -> Self {
        Schema::Struct(s)
    }
}

/// One field of a struct schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Store-path segment; `None` or empty excludes the field.
    pub segment: Option<String>,
    pub schema: Schema,
}

impl FieldDef {
    /// Returns the segment if the field takes part in synchronization.
    pub fn mapped_segment(&self) -> Option<&str> {
        self.segment.as_deref().filter(|segment| !segment.is_empty())
    }
}

/// Named struct schema with insertion-ordered fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructSchema {
    pub name: String,
    pub fields: IndexMap<String, FieldDef>,
}

impl StructSchema {
    pub fn new(name: impl Into<String>) -> Self {
        StructSchema {
            name: name.into(),
            fields: IndexMap::new(),
        }
    }

    /// Adds a field stored under `segment`.
    pub fn field(
        mut self,
        name: impl Into<String>,
        segment: impl Into<String>,
        schema: impl Into<Schema>,
    ) -> Self {
        self.fields.insert(
            name.into(),
            FieldDef {
                segment: Some(segment.into()),
                schema: schema.into(),
            },
        );
        self
    }

    /// Adds a field that is never synchronized.
    pub fn unmapped(mut self, name: impl Into<String>, schema: impl Into<Schema>) -> Self {
        self.fields.insert(
            name.into(),
            FieldDef {
                segment: None,
                schema: schema.into(),
            },
        );
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldDef> {
        self.fields.get(name)
    }

    /// Iterates `(name, segment, schema)` over mapped fields in declaration order.
    pub fn mapped_fields(&self) -> impl Iterator<Item = (&str, &str, &Schema)> {
        self.fields.iter().filter_map(|(name, def)| {
            def.mapped_segment()
                .map(|segment| (name.as_str(), segment, &def.schema))
        })
    }

    fn validate_at(&self, at: &str) -> Result<(), CoreError> {
        let mut seen = HashSet::new();
        for (name, segment, schema) in self.mapped_fields() {
            let field_at = if at == "<root>" {
                name.to_string()
            } else {
                format!("{at}.{name}")
            };
            if segment.contains('/') {
                return Err(CoreError::InvalidSchema {
                    reason: format!("{field_at}: segment '{segment}' contains '/'"),
                });
            }
            if !seen.insert(segment) {
                return Err(CoreError::InvalidSchema {
                    reason: format!("{field_at}: segment '{segment}' is used twice in {}", self.name),
                });
            }
            schema.validate_at(&field_at)?;
        }
        Ok(())
    }
}

impl From<ScalarKind> for Schema {
    fn from(kind: ScalarKind) -> Self {
        Schema::Scalar(kind)
    }
}
