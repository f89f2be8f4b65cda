//! Strand – an asynchronous interpreter for sentence-tree programs
//!
//! This crate implements:
//! - A JSON sentence grammar of labels, instructions and nested sequences
//! - A schema model and validator that checks instruction payloads and label
//!   references before anything runs
//! - Logical threads that walk a program with an explicit frame stack, one
//!   asynchronous script at a time, with cooperative cancellation
//! - An engine core holding the script registry, lifecycle services and the
//!   set of active threads

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Sentence tree data model
pub mod program;

/// Engine core, registry and logical threads
pub mod runtime;

/// Payload schemas and static validation
pub mod schema;

/// Built-in scripts
pub mod scripts;

/// Shared helpers
pub mod util;

// Re-export key types for convenience
pub use program::{Instruction, Sentence, Sequence};
pub use runtime::{Core, CoreConfig, Script, ScriptContext, Service, Thread, ThreadConfig};
pub use schema::{Schema, ScriptSchema};

/// Current version of the crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
