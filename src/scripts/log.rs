//! `log` script: emit a message.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use crate::runtime::{Script, ScriptContext, ScriptDefinition};
use crate::schema::{Schema, ScriptSchema};

#[derive(Debug, Deserialize)]
struct LogPayload {
    message: String,
}

/// Writes `message` to the `info` log of the running thread.
#[derive(Debug, Default)]
pub struct LogScript;

#[async_trait]
impl Script for LogScript {
    async fn on_execute(&self, ctx: &ScriptContext) -> anyhow::Result<()> {
        let payload: LogPayload = ctx.instruction().decode()?;
        info!(thread = %ctx.thread().id(), script = ctx.name(), "{}", payload.message);
        Ok(())
    }
}

impl ScriptDefinition for LogScript {
    fn schema() -> ScriptSchema {
        ScriptSchema::from([("message".to_string(), Schema::string())])
    }
}
