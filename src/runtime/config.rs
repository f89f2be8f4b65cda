//! Core and thread configuration.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

use crate::program::Sentence;
use crate::util::json::merge_into;

/// Initial settings of the engine core.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Defaults applied to every thread.
    #[serde(default)]
    pub thread: ThreadConfig,
}

impl CoreConfig {
    /// Load a configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config = serde_json::from_slice(&data)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        Ok(config)
    }
}

/// Program and variables a thread starts with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreadConfig {
    /// Initial variables.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vars: Option<Map<String, Value>>,
    /// Program to run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentences: Option<Sentence>,
    /// Direct label of the program to start at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_label: Option<String>,
}

impl ThreadConfig {
    /// Configuration with just a program.
    pub fn program(sentences: Sentence) -> Self {
        Self {
            sentences: Some(sentences),
            ..Self::default()
        }
    }

    /// Builder-style variable insertion.
    pub fn with_var(mut self, name: impl Into<String>, value: Value) -> Self {
        self.vars
            .get_or_insert_with(Map::new)
            .insert(name.into(), value);
        self
    }

    /// Builder-style entry label.
    pub fn with_entry_label(mut self, label: impl Into<String>) -> Self {
        self.entry_label = Some(label.into());
        self
    }

    /// Overlay `overrides` on `self`: variables merge key-wise, the program
    /// and entry label are replaced when supplied.
    pub fn merge(&mut self, overrides: &ThreadConfig) {
        if let Some(vars) = &overrides.vars {
            merge_into(self.vars.get_or_insert_with(Map::new), vars);
        }
        if let Some(sentences) = &overrides.sentences {
            self.sentences = Some(sentences.clone());
        }
        if let Some(label) = &overrides.entry_label {
            self.entry_label = Some(label.clone());
        }
    }
}
