//! Small shared helpers.

/// Helpers for working with `serde_json` values.
pub mod json;
