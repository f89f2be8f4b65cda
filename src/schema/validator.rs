//! Static validation of sentence trees against script schemas.
//!
//! Validation is one depth-first, left-to-right pass. At every sequence the
//! direct label children are collected into the shared [`LabelPool`] before
//! any child is descended into, so sibling labels are visible to each other
//! regardless of order while labels inside a not-yet-visited scope are not.
//! `label_reference` strings are resolved against the pool as it stands when
//! they are reached.

use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use thiserror::Error;
use tracing::warn;

use super::{Schema, SchemaKind, ScriptSchema};
use crate::program::{Instruction, ProgramError, Sentence};
use crate::util::json::kind_name;

/// Nesting limit for schema resolution, guarding against reference cycles
/// that do not consume any of the validated value.
const MAX_SCHEMA_DEPTH: usize = 256;

/// Source of script schemas, keyed by handler name.
pub trait SchemaLookup {
    /// Schema registered for `handler`, if any.
    fn lookup(&self, handler: &str) -> Option<&ScriptSchema>;
}

impl SchemaLookup for HashMap<String, ScriptSchema> {
    fn lookup(&self, handler: &str) -> Option<&ScriptSchema> {
        self.get(handler)
    }
}

/// Labels collected during one validation pass.
pub type LabelPool = HashSet<String>;

/// Why a node failed validation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationErrorKind {
    /// The value has the wrong JSON kind.
    #[error("expected {expected}, found {found}")]
    TypeMismatch {
        /// Kind the schema requires.
        expected: &'static str,
        /// Kind of the offending value.
        found: &'static str,
    },

    /// String shorter than `minLength`.
    #[error("string of length {len} is shorter than {min}")]
    TooShort {
        /// Required minimum.
        min: usize,
        /// Actual length.
        len: usize,
    },

    /// String longer than `maxLength`.
    #[error("string of length {len} is longer than {max}")]
    TooLong {
        /// Allowed maximum.
        max: usize,
        /// Actual length.
        len: usize,
    },

    /// Number below `min`.
    #[error("{value} is below the minimum {min}")]
    BelowMinimum {
        /// Inclusive bound.
        min: f64,
        /// Actual value.
        value: f64,
    },

    /// Number above `max`.
    #[error("{value} is above the maximum {max}")]
    AboveMaximum {
        /// Inclusive bound.
        max: f64,
        /// Actual value.
        value: f64,
    },

    /// A required field is absent.
    #[error("required field is missing")]
    MissingField,

    /// An object key not covered by the schema.
    #[error("unexpected key '{0}'")]
    UnexpectedKey(String),

    /// A `label_reference` string naming no collected label.
    #[error("label '{0}' is not declared")]
    UnresolvedLabel(String),

    /// A `reference` node with no enclosing node of that name.
    #[error("schema reference '{0}' does not resolve")]
    UnresolvedReference(String),

    /// None of the alternatives validated.
    #[error("no alternative matched (tried {})", .tried.join(", "))]
    NoAlternative {
        /// Kinds of the attempted candidates, in order.
        tried: Vec<&'static str>,
    },

    /// Schema resolution nested beyond the supported depth.
    #[error("schema nesting exceeds {MAX_SCHEMA_DEPTH} levels")]
    TooDeep,

    /// A `sentences` value that is not a sentence tree.
    #[error(transparent)]
    InvalidSentence(#[from] ProgramError),

    /// An instruction whose handler has no registered schema.
    #[error("no script is registered as '{0}'")]
    UnknownHandler(String),
}

fn in_handler(handler: &Option<String>) -> String {
    handler
        .as_ref()
        .map(|handler| format!(" in '{handler}' instruction"))
        .unwrap_or_default()
}

/// A validation failure, located by a JSON-path-like string.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind} at {path}{}", in_handler(.handler))]
pub struct ValidationError {
    /// Location of the offending node, e.g. `$[1].where.@and[0]`.
    pub path: String,
    /// Handler of the innermost enclosing instruction.
    pub handler: Option<String>,
    /// What went wrong.
    pub kind: ValidationErrorKind,
}

/// Non-fatal findings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationWarning {
    /// A label string seen more than once in the pass.
    DuplicateLabel {
        /// The repeated label.
        label: String,
        /// Location of the repeat.
        path: String,
    },
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationWarning::DuplicateLabel { label, path } => {
                write!(f, "label '{}' at {} is already declared", label, path)
            }
        }
    }
}

/// Outcome of a successful pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    /// Every label collected, sorted.
    pub labels: Vec<String>,
    /// Warnings raised along the way.
    pub warnings: Vec<ValidationWarning>,
}

/// Validate `program` against the schemas provided by `lookup`.
pub fn validate<L>(program: &Sentence, lookup: &L) -> Result<ValidationReport, ValidationError>
where
    L: SchemaLookup + ?Sized,
{
    Validator::new(lookup).validate(program)
}

/// Recursive-descent checker holding the label pool for one pass.
pub struct Validator<'s, L: SchemaLookup + ?Sized> {
    lookup: &'s L,
    labels: LabelPool,
    warnings: Vec<ValidationWarning>,
}

struct Checkpoint {
    labels: LabelPool,
    warnings: usize,
}

impl<'s, L: SchemaLookup + ?Sized> Validator<'s, L> {
    /// Start a pass with an empty label pool.
    pub fn new(lookup: &'s L) -> Self {
        Self {
            lookup,
            labels: LabelPool::new(),
            warnings: Vec::new(),
        }
    }

    /// Run the pass over `program` and produce the report.
    pub fn validate(mut self, program: &Sentence) -> Result<ValidationReport, ValidationError> {
        self.analyze(program, "$")?;
        let mut labels: Vec<String> = self.labels.into_iter().collect();
        labels.sort();
        Ok(ValidationReport {
            labels,
            warnings: self.warnings,
        })
    }

    fn analyze(&mut self, sentence: &Sentence, path: &str) -> Result<(), ValidationError> {
        match sentence {
            Sentence::Label(label) => {
                self.declare(label, path);
                Ok(())
            }
            Sentence::Instruction(instruction) => self.check_instruction(instruction, path),
            Sentence::Sequence(items) => self.analyze_sequence(items, path),
        }
    }

    fn analyze_sequence(&mut self, items: &[Sentence], path: &str) -> Result<(), ValidationError> {
        for (index, item) in items.iter().enumerate() {
            if let Sentence::Label(label) = item {
                self.declare(label, &format!("{path}[{index}]"));
            }
        }

        for (index, item) in items.iter().enumerate() {
            let item_path = format!("{path}[{index}]");
            match item {
                Sentence::Label(_) => {}
                Sentence::Instruction(instruction) => {
                    self.check_instruction(instruction, &item_path)?
                }
                Sentence::Sequence(inner) => self.analyze_sequence(inner, &item_path)?,
            }
        }
        Ok(())
    }

    fn declare(&mut self, label: &str, path: &str) {
        if !self.labels.insert(label.to_string()) {
            warn!(label, path, "duplicate label");
            self.warnings.push(ValidationWarning::DuplicateLabel {
                label: label.to_string(),
                path: path.to_string(),
            });
        }
    }

    fn check_instruction(
        &mut self,
        instruction: &Instruction,
        path: &str,
    ) -> Result<(), ValidationError> {
        let lookup = self.lookup;
        let handler = instruction.handler.as_str();
        let schema = lookup.lookup(handler).ok_or_else(|| ValidationError {
            path: path.to_string(),
            handler: Some(handler.to_string()),
            kind: ValidationErrorKind::UnknownHandler(handler.to_string()),
        })?;

        for (field, field_schema) in schema {
            let mut ancestors = Vec::new();
            self.check(
                field_schema,
                instruction.params.get(field),
                &format!("{path}.{field}"),
                handler,
                &mut ancestors,
            )?;
        }
        Ok(())
    }

    fn check(
        &mut self,
        schema: &'s Schema,
        value: Option<&Value>,
        path: &str,
        handler: &str,
        ancestors: &mut Vec<&'s Schema>,
    ) -> Result<(), ValidationError> {
        let Some(value) = value else {
            return if schema.optional {
                Ok(())
            } else {
                Err(failure(path, handler, ValidationErrorKind::MissingField))
            };
        };
        if ancestors.len() >= MAX_SCHEMA_DEPTH {
            return Err(failure(path, handler, ValidationErrorKind::TooDeep));
        }

        ancestors.push(schema);
        let result = self.check_kind(schema, value, path, handler, ancestors);
        ancestors.pop();
        result
    }

    fn check_kind(
        &mut self,
        schema: &'s Schema,
        value: &Value,
        path: &str,
        handler: &str,
        ancestors: &mut Vec<&'s Schema>,
    ) -> Result<(), ValidationError> {
        let fail = |kind| Err(failure(path, handler, kind));
        let mismatch = |expected| {
            Err(failure(
                path,
                handler,
                ValidationErrorKind::TypeMismatch {
                    expected,
                    found: kind_name(value),
                },
            ))
        };

        match &schema.kind {
            SchemaKind::Any => Ok(()),

            SchemaKind::String {
                min_length,
                max_length,
                label_reference,
            } => {
                let Value::String(text) = value else {
                    return mismatch("string");
                };
                let len = text.chars().count();
                if let Some(min) = *min_length {
                    if len < min {
                        return fail(ValidationErrorKind::TooShort { min, len });
                    }
                }
                if let Some(max) = *max_length {
                    if len > max {
                        return fail(ValidationErrorKind::TooLong { max, len });
                    }
                }
                if *label_reference && !self.labels.contains(text) {
                    return fail(ValidationErrorKind::UnresolvedLabel(text.clone()));
                }
                Ok(())
            }

            SchemaKind::Number { min, max } => {
                let Some(number) = value.as_f64() else {
                    return mismatch("number");
                };
                if let Some(min) = *min {
                    if number < min {
                        return fail(ValidationErrorKind::BelowMinimum { min, value: number });
                    }
                }
                if let Some(max) = *max {
                    if number > max {
                        return fail(ValidationErrorKind::AboveMaximum { max, value: number });
                    }
                }
                Ok(())
            }

            SchemaKind::Boolean if value.is_boolean() => Ok(()),
            SchemaKind::Boolean => mismatch("boolean"),

            SchemaKind::Null if value.is_null() => Ok(()),
            SchemaKind::Null => mismatch("null"),

            SchemaKind::Array { content } => {
                let Value::Array(items) = value else {
                    return mismatch("array");
                };
                for (index, item) in items.iter().enumerate() {
                    self.check(
                        content,
                        Some(item),
                        &format!("{path}[{index}]"),
                        handler,
                        ancestors,
                    )?;
                }
                Ok(())
            }

            SchemaKind::Object {
                content,
                value: rest,
                allow_dynamic_keys,
            } => {
                let Value::Object(map) = value else {
                    return mismatch("object");
                };
                for (key, field_schema) in content {
                    self.check(
                        field_schema,
                        map.get(key),
                        &format!("{path}.{key}"),
                        handler,
                        ancestors,
                    )?;
                }
                for (key, item) in map.iter().filter(|(key, _)| !content.contains_key(*key)) {
                    match rest {
                        Some(rest) => self.check(
                            rest,
                            Some(item),
                            &format!("{path}.{key}"),
                            handler,
                            ancestors,
                        )?,
                        None if *allow_dynamic_keys => {}
                        None => return fail(ValidationErrorKind::UnexpectedKey(key.clone())),
                    }
                }
                Ok(())
            }

            SchemaKind::Sentences => {
                let sentence = Sentence::from_value(value)
                    .map_err(|err| failure(path, handler, err.into()))?;
                self.analyze(&sentence, path)
            }

            SchemaKind::Alternatives { schema: candidates } => {
                if candidates.is_empty() {
                    return Ok(());
                }
                for candidate in candidates {
                    let checkpoint = self.checkpoint();
                    match self.check(candidate, Some(value), path, handler, ancestors) {
                        Ok(()) => return Ok(()),
                        Err(_) => self.rollback(checkpoint),
                    }
                }
                fail(ValidationErrorKind::NoAlternative {
                    tried: candidates.iter().map(|c| c.kind.label()).collect(),
                })
            }

            SchemaKind::Reference { reference_name } => {
                // The reference node itself sits on top of the stack.
                let enclosing = &ancestors[..ancestors.len().saturating_sub(1)];
                let Some(target) = enclosing
                    .iter()
                    .rev()
                    .find(|node| node.name.as_deref() == Some(reference_name.as_str()))
                    .copied()
                else {
                    return fail(ValidationErrorKind::UnresolvedReference(
                        reference_name.clone(),
                    ));
                };
                self.check(target, Some(value), path, handler, ancestors)
            }
        }
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            labels: self.labels.clone(),
            warnings: self.warnings.len(),
        }
    }

    fn rollback(&mut self, checkpoint: Checkpoint) {
        self.labels = checkpoint.labels;
        self.warnings.truncate(checkpoint.warnings);
    }
}

fn failure(path: &str, handler: &str, kind: ValidationErrorKind) -> ValidationError {
    ValidationError {
        path: path.to_string(),
        handler: Some(handler.to_string()),
        kind,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn lookup(entries: Vec<(&str, ScriptSchema)>) -> HashMap<String, ScriptSchema> {
        entries
            .into_iter()
            .map(|(name, schema)| (name.to_string(), schema))
            .collect()
    }

    fn fields(entries: Vec<(&str, Schema)>) -> ScriptSchema {
        entries
            .into_iter()
            .map(|(name, schema)| (name.to_string(), schema))
            .collect()
    }

    fn program(value: Value) -> Sentence {
        Sentence::from_value(&value).unwrap()
    }

    fn check_one(schema: Schema, value: Value) -> Result<ValidationReport, ValidationError> {
        let schemas = lookup(vec![("sample", fields(vec![("value", schema)]))]);
        validate(&program(json!([{"handler": "sample", "value": value}])), &schemas)
    }

    fn jump_and_branch() -> HashMap<String, ScriptSchema> {
        lookup(vec![
            ("jump", fields(vec![("target", Schema::string().label_reference())])),
            (
                "branch",
                fields(vec![
                    ("then", Schema::sentences()),
                    ("else", Schema::sentences().optional()),
                ]),
            ),
        ])
    }

    #[test]
    fn scalar_kinds() {
        assert!(check_one(Schema::any(), json!({"x": [1]})).is_ok());
        assert!(check_one(Schema::boolean(), json!(false)).is_ok());
        assert!(check_one(Schema::null(), json!(null)).is_ok());
        assert!(check_one(Schema::number().min(1.0).max(3.0), json!(2.5)).is_ok());

        let err = check_one(Schema::boolean(), json!("yes")).unwrap_err();
        assert_eq!(err.path, "$[0].value");
        assert_eq!(err.handler.as_deref(), Some("sample"));
        assert_eq!(
            err.kind,
            ValidationErrorKind::TypeMismatch {
                expected: "boolean",
                found: "string"
            }
        );
    }

    #[test]
    fn bounds() {
        let kind = |schema, value| check_one(schema, value).unwrap_err().kind;
        assert_eq!(
            kind(Schema::string().min_length(2), json!("a")),
            ValidationErrorKind::TooShort { min: 2, len: 1 }
        );
        assert_eq!(
            kind(Schema::string().max_length(2), json!("héé")),
            ValidationErrorKind::TooLong { max: 2, len: 3 }
        );
        assert_eq!(
            kind(Schema::number().min(0.0), json!(-1)),
            ValidationErrorKind::BelowMinimum { min: 0.0, value: -1.0 }
        );
        assert_eq!(
            kind(Schema::number().max(10.0), json!(11)),
            ValidationErrorKind::AboveMaximum { max: 10.0, value: 11.0 }
        );
    }

    #[test]
    fn missing_and_optional_fields() {
        let schemas = lookup(vec![(
            "sample",
            fields(vec![
                ("required", Schema::string()),
                ("extra", Schema::number().optional()),
            ]),
        )]);
        let err = validate(&program(json!([{"handler": "sample"}])), &schemas).unwrap_err();
        assert_eq!(err.path, "$[0].required");
        assert_eq!(err.kind, ValidationErrorKind::MissingField);

        let filled = program(json!([{"handler": "sample", "required": ""}]));
        assert!(validate(&filled, &schemas).is_ok());
    }

    #[test]
    fn object_keys() {
        let closed = Schema::object().field("a", Schema::number());
        assert!(check_one(closed.clone(), json!({"a": 1})).is_ok());
        assert_eq!(
            check_one(closed.clone(), json!({"a": 1, "b": 2})).unwrap_err().kind,
            ValidationErrorKind::UnexpectedKey("b".into())
        );
        assert!(check_one(closed.clone().allow_dynamic_keys(), json!({"a": 1, "b": 2})).is_ok());

        let typed_rest = closed.values(Schema::string()).allow_dynamic_keys();
        let err = check_one(typed_rest, json!({"a": 1, "b": 2})).unwrap_err();
        assert_eq!(err.path, "$[0].value.b");

        assert_eq!(
            check_one(Schema::object(), json!([])).unwrap_err().kind,
            ValidationErrorKind::TypeMismatch {
                expected: "object",
                found: "array"
            }
        );
    }

    #[test]
    fn arrays_check_every_element() {
        let err = check_one(Schema::array(Schema::number()), json!([1, 2, "3"])).unwrap_err();
        assert_eq!(err.path, "$[0].value[2]");
    }

    #[test]
    fn alternatives_first_match_wins() {
        let schema = Schema::alternatives([Schema::number(), Schema::string()]);
        assert!(check_one(schema.clone(), json!("5")).is_ok());
        assert_eq!(
            check_one(schema, json!(true)).unwrap_err().kind,
            ValidationErrorKind::NoAlternative {
                tried: vec!["number", "string"]
            }
        );
        assert!(check_one(Schema::alternatives([]), json!(true)).is_ok());
    }

    #[test]
    fn failed_alternative_does_not_leak_labels() {
        let schemas = lookup(vec![
            (
                "pick",
                fields(vec![(
                    "body",
                    Schema::alternatives([
                        Schema::array(Schema::string().max_length(1)),
                        Schema::number(),
                        Schema::sentences(),
                    ]),
                )]),
            ),
            ("jump", fields(vec![("target", Schema::string().label_reference())])),
        ]);

        // `body` only matches as sentences, so its labels are declared.
        let ok = program(json!([
            {"handler": "pick", "body": ["long-label"]},
            {"handler": "jump", "target": "long-label"}
        ]));
        assert!(validate(&ok, &schemas).is_ok());

        // The array candidate matches first; sentences are never analysed.
        let report = validate(&program(json!([{"handler": "pick", "body": ["x"]}])), &schemas)
            .unwrap();
        assert!(report.labels.is_empty());
    }

    #[test]
    fn references_resolve_to_nearest_named_ancestor() {
        let tree = Schema::object()
            .named("node")
            .field("value", Schema::number())
            .field("children", Schema::array(Schema::reference("node")).optional());
        assert!(
            check_one(
                tree.clone(),
                json!({"value": 1, "children": [{"value": 2, "children": [{"value": 3}]}]})
            )
            .is_ok()
        );
        let err = check_one(tree, json!({"value": 1, "children": [{"value": "two"}]})).unwrap_err();
        assert_eq!(err.path, "$[0].value.children[0].value");

        assert_eq!(
            check_one(Schema::reference("nowhere"), json!(1)).unwrap_err().kind,
            ValidationErrorKind::UnresolvedReference("nowhere".into())
        );
    }

    #[test]
    fn self_referencing_cycle_is_bounded() {
        let looping = Schema::alternatives([Schema::reference("loop")]).named("loop");
        assert_eq!(
            check_one(looping, json!(1)).unwrap_err().kind,
            ValidationErrorKind::NoAlternative {
                tried: vec!["reference"]
            }
        );
    }

    #[test]
    fn sibling_labels_are_visible_in_any_order() {
        let schemas = jump_and_branch();
        let report = validate(
            &program(json!([{"handler": "jump", "target": "L1"}, "L1"])),
            &schemas,
        )
        .unwrap();
        assert_eq!(report.labels, vec!["L1".to_string()]);
    }

    #[test]
    fn nested_labels_are_visible_only_after_their_scope() {
        let schemas = jump_and_branch();

        let err = validate(
            &program(json!([
                {"handler": "jump", "target": "L2"},
                {"handler": "branch", "then": ["L2"]}
            ])),
            &schemas,
        )
        .unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::UnresolvedLabel("L2".into()));
        assert_eq!(err.path, "$[0].target");

        assert!(
            validate(
                &program(json!([
                    {"handler": "branch", "then": ["L2"]},
                    {"handler": "jump", "target": "L2"}
                ])),
                &schemas,
            )
            .is_ok()
        );

        // Inline scopes behave the same way.
        assert!(
            validate(
                &program(json!([
                    {"handler": "jump", "target": "L3"},
                    ["L3"]
                ])),
                &schemas,
            )
            .is_err()
        );
    }

    #[test]
    fn duplicate_labels_warn() {
        let report = validate(&program(json!(["a", ["a"], "b"])), &jump_and_branch()).unwrap();
        assert_eq!(
            report.warnings,
            vec![ValidationWarning::DuplicateLabel {
                label: "a".into(),
                path: "$[1][0]".into()
            }]
        );
        assert_eq!(report.labels, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn unknown_handler_and_bad_sentences() {
        let schemas = jump_and_branch();
        let err = validate(&program(json!([{"handler": "missing"}])), &schemas).unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::UnknownHandler("missing".into()));

        let err = validate(
            &program(json!([{"handler": "branch", "then": [1]}])),
            &schemas,
        )
        .unwrap_err();
        assert_eq!(err.path, "$[0].then");
        assert_eq!(
            err.kind,
            ValidationErrorKind::InvalidSentence(ProgramError::InvalidSentence("number"))
        );

        // Instructions nested in a sentences field are checked too.
        let err = validate(
            &program(json!([{"handler": "branch", "then": [{"handler": "jump"}]}])),
            &schemas,
        )
        .unwrap_err();
        assert_eq!(err.path, "$[0].then[0].target");
        assert_eq!(err.handler.as_deref(), Some("jump"));
    }
}
