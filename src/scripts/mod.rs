//! Built-in scripts
//!
//! - `log`: write a message to the log
//! - `set`: assign thread variables
//! - `if`: run `then` or `else` depending on a `where` condition

pub mod condition;
mod conditional;
mod log;
mod set;

pub use conditional::IfScript;
pub use log::LogScript;
pub use set::SetScript;

use crate::runtime::{Core, Result};

/// Register every built-in script on `core` under its usual name.
pub fn register_builtin(core: &Core) -> Result<()> {
    core.register_script_type::<LogScript>("log")?;
    core.register_script_type::<SetScript>("set")?;
    core.register_script_type::<IfScript>("if")?;
    Ok(())
}
