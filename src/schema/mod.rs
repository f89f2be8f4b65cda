//! Instruction payload schemas.
//!
//! A [`Schema`] is a recursive description of a JSON value. Nodes may carry a
//! `name`, and a `reference` node re-validates against the nearest enclosing
//! node of that name, which is how self-similar shapes such as nested
//! condition trees are described. Schemas deserialize from the same JSON form
//! they serialize to, e.g. `{"type": "string", "minLength": 1}`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Single-pass validator over sentence trees.
pub mod validator;

pub use validator::{
    LabelPool, SchemaLookup, ValidationError, ValidationErrorKind, ValidationReport,
    ValidationWarning, Validator, validate,
};

/// Named field schemas, used both for object contents and for whole
/// instruction payloads.
pub type SchemaMap = BTreeMap<String, Schema>;

/// Payload description registered alongside a script.
pub type ScriptSchema = SchemaMap;

/// One node of a schema tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    /// Whether the described value may be absent.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub optional: bool,
    /// Name that `reference` nodes can resolve to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Type tag and type-specific constraints.
    #[serde(flatten)]
    pub kind: SchemaKind,
}

/// Type-specific part of a schema node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SchemaKind {
    /// Accepts every value.
    Any,
    /// A string, optionally bounded in length or required to name a label.
    String {
        /// Minimum length in characters.
        #[serde(rename = "minLength", default, skip_serializing_if = "Option::is_none")]
        min_length: Option<usize>,
        /// Maximum length in characters.
        #[serde(rename = "maxLength", default, skip_serializing_if = "Option::is_none")]
        max_length: Option<usize>,
        /// The string must match a label already collected by the validator.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        label_reference: bool,
    },
    /// A number with optional inclusive bounds.
    Number {
        /// Inclusive lower bound.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        /// Inclusive upper bound.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
    },
    /// `true` or `false`.
    Boolean,
    /// Exactly `null`.
    Null,
    /// A list whose every element matches `content`.
    Array {
        /// Element schema.
        content: Box<Schema>,
    },
    /// A map with named fields and an optional schema for the remaining keys.
    Object {
        /// Schemas for named keys.
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        content: SchemaMap,
        /// Schema applied to keys not listed in `content`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Box<Schema>>,
        /// Accept unlisted keys without checking them when `value` is unset.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        allow_dynamic_keys: bool,
    },
    /// A nested program; triggers full sentence analysis.
    Sentences,
    /// The first candidate that validates wins.
    Alternatives {
        /// Candidate schemas in priority order.
        #[serde(default)]
        schema: Vec<Schema>,
    },
    /// Re-validate against the nearest enclosing node called `reference_name`.
    Reference {
        /// Name of the enclosing node to resolve.
        reference_name: String,
    },
}

impl SchemaKind {
    /// The `type` tag of this kind.
    pub fn label(&self) -> &'static str {
        match self {
            SchemaKind::Any => "any",
            SchemaKind::String { .. } => "string",
            SchemaKind::Number { .. } => "number",
            SchemaKind::Boolean => "boolean",
            SchemaKind::Null => "null",
            SchemaKind::Array { .. } => "array",
            SchemaKind::Object { .. } => "object",
            SchemaKind::Sentences => "sentences",
            SchemaKind::Alternatives { .. } => "alternatives",
            SchemaKind::Reference { .. } => "reference",
        }
    }
}

impl From<SchemaKind> for Schema {
    fn from(kind: SchemaKind) -> Self {
        Self {
            optional: false,
            name: None,
            kind,
        }
    }
}

// Constructors and builder-style modifiers. Modifiers that do not apply to a
// node's kind leave it unchanged.
impl Schema {
    /// Schema accepting any value.
    pub fn any() -> Self {
        SchemaKind::Any.into()
    }

    /// Unconstrained string schema.
    pub fn string() -> Self {
        SchemaKind::String {
            min_length: None,
            max_length: None,
            label_reference: false,
        }
        .into()
    }

    /// Unbounded number schema.
    pub fn number() -> Self {
        SchemaKind::Number {
            min: None,
            max: None,
        }
        .into()
    }

    /// Boolean schema.
    pub fn boolean() -> Self {
        SchemaKind::Boolean.into()
    }

    /// Null schema.
    pub fn null() -> Self {
        SchemaKind::Null.into()
    }

    /// List schema with the given element schema.
    pub fn array(content: Schema) -> Self {
        SchemaKind::Array {
            content: Box::new(content),
        }
        .into()
    }

    /// Object schema with no named fields that rejects unlisted keys.
    pub fn object() -> Self {
        SchemaKind::Object {
            content: SchemaMap::new(),
            value: None,
            allow_dynamic_keys: false,
        }
        .into()
    }

    /// Nested program schema.
    pub fn sentences() -> Self {
        SchemaKind::Sentences.into()
    }

    /// Alternatives over the given candidates.
    pub fn alternatives(candidates: impl IntoIterator<Item = Schema>) -> Self {
        SchemaKind::Alternatives {
            schema: candidates.into_iter().collect(),
        }
        .into()
    }

    /// Back-reference to an enclosing named node.
    pub fn reference(name: impl Into<String>) -> Self {
        SchemaKind::Reference {
            reference_name: name.into(),
        }
        .into()
    }

    /// Mark the node optional.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Name the node so `reference` nodes can point at it.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Minimum string length.
    pub fn min_length(mut self, len: usize) -> Self {
        if let SchemaKind::String { min_length, .. } = &mut self.kind {
            *min_length = Some(len);
        }
        self
    }

    /// Maximum string length.
    pub fn max_length(mut self, len: usize) -> Self {
        if let SchemaKind::String { max_length, .. } = &mut self.kind {
            *max_length = Some(len);
        }
        self
    }

    /// Require the string to name a collected label.
    pub fn label_reference(mut self) -> Self {
        if let SchemaKind::String {
            label_reference, ..
        } = &mut self.kind
        {
            *label_reference = true;
        }
        self
    }

    /// Inclusive numeric lower bound.
    pub fn min(mut self, bound: f64) -> Self {
        if let SchemaKind::Number { min, .. } = &mut self.kind {
            *min = Some(bound);
        }
        self
    }

    /// Inclusive numeric upper bound.
    pub fn max(mut self, bound: f64) -> Self {
        if let SchemaKind::Number { max, .. } = &mut self.kind {
            *max = Some(bound);
        }
        self
    }

    /// Add a named object field.
    pub fn field(mut self, key: impl Into<String>, schema: Schema) -> Self {
        if let SchemaKind::Object { content, .. } = &mut self.kind {
            content.insert(key.into(), schema);
        }
        self
    }

    /// Schema for object keys not listed as fields.
    pub fn values(mut self, schema: Schema) -> Self {
        if let SchemaKind::Object { value, .. } = &mut self.kind {
            *value = Some(Box::new(schema));
        }
        self
    }

    /// Accept unlisted object keys.
    pub fn allow_dynamic_keys(mut self) -> Self {
        if let SchemaKind::Object {
            allow_dynamic_keys, ..
        } = &mut self.kind
        {
            *allow_dynamic_keys = true;
        }
        self
    }
}
