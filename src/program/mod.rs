//! Sentence tree data model.
//!
//! Programs arrive as JSON-compatible trees: a string is a label, an object
//! carrying a `handler` name is an instruction, and a list is a nested
//! sequence. This module converts between that boundary representation and
//! the typed [`Sentence`] tree the validator and the engine walk.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::util::json::kind_name;

/// Name of the instruction field selecting the handler script.
pub const HANDLER_FIELD: &str = "handler";

/// An ordered list of sentences forming one scope.
pub type Sequence = Vec<Sentence>;

/// Errors raised while converting boundary JSON into sentences.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProgramError {
    /// The value is neither a string, an object, nor a list.
    #[error("expected a label, instruction or sequence, found {0}")]
    InvalidSentence(&'static str),

    /// An object sentence without a string `handler` field.
    #[error("instruction is missing a string '{HANDLER_FIELD}' field")]
    MissingHandler,

    /// The instruction payload does not fit the shape a script expects.
    #[error("instruction '{handler}' has an invalid payload: {detail}")]
    InvalidPayload {
        /// Handler name of the offending instruction.
        handler: String,
        /// Deserializer message.
        detail: String,
    },
}

/// One element of a program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum Sentence {
    /// Jump-target marker; a no-op at runtime.
    Label(String),
    /// Unit of work dispatched to a handler script.
    Instruction(Instruction),
    /// Nested scope.
    Sequence(Sequence),
}

impl Sentence {
    /// Convert a boundary JSON value into a sentence tree.
    pub fn from_value(value: &Value) -> Result<Self, ProgramError> {
        match value {
            Value::String(label) => Ok(Sentence::Label(label.clone())),
            Value::Object(map) => Instruction::from_map(map).map(Sentence::Instruction),
            Value::Array(items) => items
                .iter()
                .map(Sentence::from_value)
                .collect::<Result<Sequence, _>>()
                .map(Sentence::Sequence),
            other => Err(ProgramError::InvalidSentence(kind_name(other))),
        }
    }

    /// Convert the sentence back into its boundary JSON form.
    pub fn to_value(&self) -> Value {
        match self {
            Sentence::Label(label) => Value::String(label.clone()),
            Sentence::Instruction(instruction) => Value::Object(instruction.to_map()),
            Sentence::Sequence(items) => {
                Value::Array(items.iter().map(Sentence::to_value).collect())
            }
        }
    }

    /// Wrap the sentence into a sequence unless it already is one.
    pub fn into_sequence(self) -> Sequence {
        match self {
            Sentence::Sequence(items) => items,
            other => vec![other],
        }
    }

    /// Label text, if this is a label.
    pub fn as_label(&self) -> Option<&str> {
        match self {
            Sentence::Label(label) => Some(label),
            _ => None,
        }
    }
}

impl TryFrom<Value> for Sentence {
    type Error = ProgramError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Sentence::from_value(&value)
    }
}

impl From<Sentence> for Value {
    fn from(sentence: Sentence) -> Self {
        sentence.to_value()
    }
}

impl From<Sequence> for Sentence {
    fn from(items: Sequence) -> Self {
        Sentence::Sequence(items)
    }
}

/// A named, parameterised unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Registered script name.
    pub handler: String,
    /// Handler-specific parameters (everything except the `handler` field).
    pub params: Map<String, Value>,
}

impl Instruction {
    /// Create an instruction with no parameters.
    pub fn new(handler: impl Into<String>) -> Self {
        Self {
            handler: handler.into(),
            params: Map::new(),
        }
    }

    /// Builder-style parameter insertion.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    fn from_map(map: &Map<String, Value>) -> Result<Self, ProgramError> {
        let handler = map
            .get(HANDLER_FIELD)
            .and_then(Value::as_str)
            .ok_or(ProgramError::MissingHandler)?
            .to_string();
        let params = map
            .iter()
            .filter(|(key, _)| key.as_str() != HANDLER_FIELD)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        Ok(Self { handler, params })
    }

    fn to_map(&self) -> Map<String, Value> {
        let mut map = self.params.clone();
        map.insert(HANDLER_FIELD.to_string(), Value::String(self.handler.clone()));
        map
    }

    /// Look up a single parameter.
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    /// Deserialize the parameters into a typed payload.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ProgramError> {
        serde_json::from_value(Value::Object(self.params.clone())).map_err(|err| {
            ProgramError::InvalidPayload {
                handler: self.handler.clone(),
                detail: err.to_string(),
            }
        })
    }
}

/// Find the index of a direct label child of `sequence`.
///
/// The lookup is shallow: labels inside nested scopes are not considered.
pub fn find_label(sequence: &[Sentence], label: &str) -> Option<usize> {
    sequence
        .iter()
        .position(|sentence| sentence.as_label() == Some(label))
}
