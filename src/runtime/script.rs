//! Script plugin interface
//!
//! A script implements one instruction's behaviour. The engine creates a fresh
//! instance per dispatch, awaits its [`Script::on_execute`] future on the Tokio
//! runtime, and calls [`Script::on_abort`] if the thread cancels it while the
//! future is still pending.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::Core;
use super::error::ThreadResult;
use super::thread::Thread;
use crate::program::{Instruction, Sequence};
use crate::schema::ScriptSchema;

/// Behaviour behind one instruction handler name.
///
/// Scripts must be `Sync` because the abort hook can be called while
/// `on_execute` is still running.
#[async_trait]
pub trait Script: Send + Sync {
    /// Execute the instruction. Settling with an error is fatal to the thread
    /// unless the script was aborted first.
    async fn on_execute(&self, ctx: &ScriptContext) -> anyhow::Result<()>;

    /// Called at most once when the thread no longer waits for this script.
    fn on_abort(&self) {}
}

/// A script type that describes its own payload and can be default-constructed.
pub trait ScriptDefinition: Script + Default + 'static {
    /// Payload schema used for static validation.
    fn schema() -> ScriptSchema;
}

/// Everything a script instance can reach while executing.
#[derive(Clone)]
pub struct ScriptContext {
    pub(crate) name: String,
    pub(crate) instruction: Arc<Instruction>,
    pub(crate) thread: Thread,
    pub(crate) ticket: u64,
    pub(crate) cancel: CancellationToken,
}

impl ScriptContext {
    /// Name the script was registered (and dispatched) under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Instruction payload being executed.
    pub fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    /// Owning logical thread.
    pub fn thread(&self) -> &Thread {
        &self.thread
    }

    /// Owning orchestrator, if it is still alive.
    pub fn core(&self) -> Option<Core> {
        self.thread.core()
    }

    /// Read a thread variable; absent variables read as `null`.
    pub fn get_var(&self, name: &str) -> Value {
        self.thread.get_var(name)
    }

    /// Write a thread variable; `null` removes it.
    pub fn set_var(&self, name: impl Into<String>, value: Value) {
        self.thread.set_var(name, value)
    }

    /// Transfer control into `program`, optionally starting at a direct label.
    ///
    /// The transfer is one-way: once the sub-program starts, this script's own
    /// completion no longer advances the thread, and the instruction after it
    /// runs when the sub-program is exhausted. Fails with
    /// [`ThreadError::Superseded`](super::error::ThreadError::Superseded) if
    /// this script is no longer the thread's in-flight instruction.
    pub fn execute(&self, program: Sequence, entry_label: Option<&str>) -> ThreadResult<()> {
        self.thread
            .transfer(Some((self.ticket, &self.name)), program, entry_label)
    }

    /// Token cancelled when the thread aborts this script.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the thread has aborted this script.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
