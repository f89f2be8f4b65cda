//! `set` script: assign thread variables.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::runtime::{Script, ScriptContext, ScriptDefinition};
use crate::schema::{Schema, ScriptSchema};

#[derive(Debug, Deserialize)]
struct SetPayload {
    variables: Map<String, Value>,
}

/// Copies every entry of `variables` into the thread; `null` entries delete.
#[derive(Debug, Default)]
pub struct SetScript;

#[async_trait]
impl Script for SetScript {
    async fn on_execute(&self, ctx: &ScriptContext) -> anyhow::Result<()> {
        let payload: SetPayload = ctx.instruction().decode()?;
        for (name, value) in payload.variables {
            ctx.set_var(name, value);
        }
        Ok(())
    }
}

impl ScriptDefinition for SetScript {
    fn schema() -> ScriptSchema {
        ScriptSchema::from([(
            "variables".to_string(),
            Schema::object().allow_dynamic_keys(),
        )])
    }
}
