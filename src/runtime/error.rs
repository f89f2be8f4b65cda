//! Error types for the engine
//!
//! Each subsystem has its own `thiserror` enum; [`EngineError`] wraps them
//! for callers of the orchestrator.

use thiserror::Error;

use crate::program::ProgramError;
use crate::schema::ValidationError;

/// Top-level engine error
#[derive(Debug, Error)]
pub enum EngineError {
    /// Script or service registration errors
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Logical thread errors
    #[error("Thread error: {0}")]
    Thread(#[from] ThreadError),

    /// Program failed static validation
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Program is not a well-formed sentence tree
    #[error("Program error: {0}")]
    Program(#[from] ProgramError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Registry-specific errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A script with this name already exists
    #[error("Script '{0}' is already registered")]
    DuplicateScript(String),

    /// The factory does not describe its payload
    #[error("Script '{0}' does not expose a schema")]
    MissingSchema(String),

    /// The very same service instance was registered before
    #[error("Service is already registered")]
    DuplicateService,

    /// No script with this name exists
    #[error("No script is registered as '{0}'")]
    UnknownScript(String),
}

/// Convenience result alias for registry operations
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

/// Logical thread errors
#[derive(Debug, Error)]
pub enum ThreadError {
    /// Program has no sentences
    #[error("Program is empty")]
    EmptyProgram,

    /// Entry label is not a direct label of the sequence
    #[error("Entry label '{0}' not found")]
    UnknownEntryLabel(String),

    /// Thread was already destroyed
    #[error("Thread is not running")]
    NotRunning,

    /// A script that is no longer in flight tried to transfer control
    #[error("Script '{0}' is no longer the running instruction")]
    Superseded(String),

    /// Threads need a Tokio runtime to schedule scripts on
    #[error("No Tokio runtime is available: {0}")]
    NoRuntime(String),

    /// Script could not be instantiated at dispatch time
    #[error("Dispatch failed: {0}")]
    Dispatch(#[from] RegistryError),

    /// A script's execution settled with a failure
    #[error("Script '{handler}' failed: {error:#}")]
    Script {
        /// Handler name of the failed instruction
        handler: String,
        /// Failure reported by the script
        error: anyhow::Error,
    },
}

/// Convenience result alias for thread operations
pub type ThreadResult<T> = std::result::Result<T, ThreadError>;

/// Result type using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;
