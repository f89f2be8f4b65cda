//! Service (observer) plugin interface
//!
//! Services are passive listeners. Every hook is optional and has no say over
//! execution: a hook that returns an error is logged and otherwise ignored.

use super::Core;
use super::error::ThreadError;
use super::script::Script;
use super::thread::Thread;
use crate::program::Instruction;

/// Lifecycle listener registered on a [`Core`].
pub trait Service: Send + Sync {
    /// The core was initialized.
    fn on_core_initialize(&self, _core: &Core) -> anyhow::Result<()> {
        Ok(())
    }

    /// The core was destroyed, after all of its threads.
    fn on_core_destroy(&self, _core: &Core) -> anyhow::Result<()> {
        Ok(())
    }

    /// A thread was created and is about to start.
    fn on_thread_created(&self, _thread: &Thread) -> anyhow::Result<()> {
        Ok(())
    }

    /// A thread is terminating; its variables are still readable.
    fn on_thread_will_destroy(&self, _thread: &Thread) -> anyhow::Result<()> {
        Ok(())
    }

    /// A script instance is about to execute.
    fn on_before_script(
        &self,
        _script: &dyn Script,
        _thread: &Thread,
        _instruction: &Instruction,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// A script instance finished executing successfully.
    fn on_after_script(
        &self,
        _script: &dyn Script,
        _thread: &Thread,
        _instruction: &Instruction,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// A thread hit a fatal error and is about to be destroyed.
    fn on_thread_error(&self, _thread: &Thread, _error: &ThreadError) -> anyhow::Result<()> {
        Ok(())
    }
}
