//! `where` condition trees
//!
//! A condition is an object whose keys are combined with a conjunction.
//! `@and` and `@or` nest a condition (or a list of conditions); every other
//! key names a thread variable matched against an expected value.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::schema::Schema;
use crate::util::json::{is_truthy, kind_name, loose_eq};

/// Conjunction key.
pub const AND: &str = "@and";
/// Disjunction key.
pub const OR: &str = "@or";
/// Expected value that matches any truthy variable.
pub const WILDCARD: &str = "*";

/// Malformed condition trees.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConditionError {
    /// `@and`/`@or` holds something other than an object or a list.
    #[error("Condition '{0}' is not a valid array or object")]
    InvalidGroup(&'static str),

    /// A list of conditions held a non-object item.
    #[error("Condition list item is a {0}, expected an object")]
    InvalidItem(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    All,
    Any,
}

/// Evaluate `condition` with variables read through `lookup`.
pub fn evaluate<F>(condition: &Value, lookup: &F) -> Result<bool, ConditionError>
where
    F: Fn(&str) -> Value,
{
    group(condition, Mode::All, lookup)
}

fn group<F>(condition: &Value, mode: Mode, lookup: &F) -> Result<bool, ConditionError>
where
    F: Fn(&str) -> Value,
{
    match condition {
        Value::Array(items) => {
            // Items of a list are conjunctions themselves.
            for item in items {
                let Value::Object(_) = item else {
                    return Err(ConditionError::InvalidItem(kind_name(item)));
                };
                let hit = group(item, Mode::All, lookup)?;
                match mode {
                    Mode::All if !hit => return Ok(false),
                    Mode::Any if hit => return Ok(true),
                    _ => {}
                }
            }
            Ok(mode == Mode::All)
        }
        Value::Object(keys) => object(keys, mode, lookup),
        _ => Err(ConditionError::InvalidGroup(match mode {
            Mode::All => AND,
            Mode::Any => OR,
        })),
    }
}

fn object<F>(keys: &Map<String, Value>, mode: Mode, lookup: &F) -> Result<bool, ConditionError>
where
    F: Fn(&str) -> Value,
{
    for (key, expected) in keys {
        let hit = match key.as_str() {
            AND => nested(expected, AND, Mode::All, lookup)?,
            OR => nested(expected, OR, Mode::Any, lookup)?,
            name => matches(&lookup(name), expected),
        };
        match mode {
            Mode::All if !hit => return Ok(false),
            Mode::Any if hit => return Ok(true),
            _ => {}
        }
    }
    Ok(mode == Mode::All)
}

fn nested<F>(
    value: &Value,
    key: &'static str,
    mode: Mode,
    lookup: &F,
) -> Result<bool, ConditionError>
where
    F: Fn(&str) -> Value,
{
    match value {
        Value::Array(_) | Value::Object(_) => group(value, mode, lookup),
        _ => Err(ConditionError::InvalidGroup(key)),
    }
}

/// Match one variable against an expected value.
///
/// A list matches if any element does; an object matches member-wise against
/// an object (or a list, by index); `"*"` matches any truthy value.
pub fn matches(value: &Value, expected: &Value) -> bool {
    match expected {
        Value::Array(options) => options.iter().any(|option| matches(value, option)),
        Value::Object(members) => {
            let member = |key: &str| -> Value {
                match value {
                    Value::Object(map) => map.get(key).cloned().unwrap_or(Value::Null),
                    Value::Array(items) => key
                        .parse::<usize>()
                        .ok()
                        .and_then(|index| items.get(index).cloned())
                        .unwrap_or(Value::Null),
                    _ => Value::Null,
                }
            };
            matches!(value, Value::Object(_) | Value::Array(_))
                && members
                    .iter()
                    .all(|(key, expected)| matches(&member(key), expected))
        }
        Value::String(text) if text == WILDCARD => is_truthy(value),
        _ => loose_eq(expected, value),
    }
}

/// Self-referential schema describing a condition tree.
pub fn schema() -> Schema {
    let group = || {
        Schema::alternatives([
            Schema::array(Schema::reference("where_base")),
            Schema::reference("where_base"),
        ])
        .optional()
    };
    let value = Schema::alternatives([
        Schema::array(Schema::reference("value_base")),
        Schema::object()
            .allow_dynamic_keys()
            .values(Schema::reference("value_base")),
        Schema::string(),
        Schema::number(),
        Schema::null(),
        Schema::boolean(),
    ])
    .named("value_base");

    Schema::object()
        .named("where_base")
        .allow_dynamic_keys()
        .field(AND, group())
        .field(OR, group())
        .values(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(condition: Value, vars: Value) -> Result<bool, ConditionError> {
        let vars = vars.as_object().cloned().unwrap_or_default();
        evaluate(&condition, &|name: &str| vars.get(name).cloned().unwrap_or(Value::Null))
    }

    #[test]
    fn keys_are_a_conjunction() {
        assert!(eval(json!({"x": 1, "y": "a"}), json!({"x": 1, "y": "a"})).unwrap());
        assert!(!eval(json!({"x": 1, "y": "b"}), json!({"x": 1, "y": "a"})).unwrap());
        assert!(eval(json!({}), json!({})).unwrap());
    }

    #[test]
    fn numbers_compare_numerically() {
        assert!(eval(json!({"x": 1.0}), json!({"x": 1})).unwrap());
    }

    #[test]
    fn or_groups() {
        let condition = json!({"@or": {"x": 1, "y": 2}});
        assert!(eval(condition.clone(), json!({"y": 2})).unwrap());
        assert!(!eval(condition, json!({"x": 2})).unwrap());

        let list = json!({"@or": [{"x": 1, "y": 1}, {"z": true}]});
        assert!(eval(list.clone(), json!({"z": true})).unwrap());
        assert!(!eval(list, json!({"x": 1})).unwrap());
    }

    #[test]
    fn and_list_requires_every_item() {
        let condition = json!({"@and": [{"x": 1}, {"y": 2}]});
        assert!(eval(condition.clone(), json!({"x": 1, "y": 2})).unwrap());
        assert!(!eval(condition, json!({"x": 1})).unwrap());
    }

    #[test]
    fn list_expected_value_is_membership() {
        assert!(eval(json!({"c": ["red", "blue"]}), json!({"c": "blue"})).unwrap());
        assert!(!eval(json!({"c": ["red", "blue"]}), json!({"c": "green"})).unwrap());
    }

    #[test]
    fn object_expected_value_matches_members() {
        let vars = json!({"user": {"name": "ana", "roles": ["admin"]}});
        assert!(eval(json!({"user": {"name": "ana"}}), vars.clone()).unwrap());
        assert!(eval(json!({"user": {"roles": {"0": "admin"}}}), vars.clone()).unwrap());
        assert!(!eval(json!({"user": {"name": "bob"}}), vars).unwrap());
        assert!(!eval(json!({"user": {}}), json!({"user": "ana"})).unwrap());
    }

    #[test]
    fn wildcard_matches_truthy() {
        assert!(eval(json!({"x": "*"}), json!({"x": "yes"})).unwrap());
        assert!(!eval(json!({"x": "*"}), json!({"x": 0})).unwrap());
        assert!(!eval(json!({"x": "*"}), json!({})).unwrap());
    }

    #[test]
    fn absent_variables_are_null() {
        assert!(eval(json!({"missing": null}), json!({})).unwrap());
    }

    #[test]
    fn rejects_scalar_groups() {
        assert_eq!(
            eval(json!({"@or": 3}), json!({})),
            Err(ConditionError::InvalidGroup(OR))
        );
        assert_eq!(
            eval(json!({"@and": [1]}), json!({})),
            Err(ConditionError::InvalidItem("number"))
        );
    }
}
