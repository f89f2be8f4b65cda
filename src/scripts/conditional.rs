//! `if` script: branch on a condition over thread variables.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::condition;
use crate::program::Sentence;
use crate::runtime::{Script, ScriptContext, ScriptDefinition};
use crate::schema::{Schema, ScriptSchema};

#[derive(Debug, Deserialize)]
struct IfPayload {
    #[serde(rename = "where")]
    condition: Value,
    then: Sentence,
    #[serde(rename = "else", default)]
    otherwise: Option<Sentence>,
}

/// Evaluates `where` and transfers control into `then` or `else`.
///
/// With no `else` and a false condition the thread simply moves on.
#[derive(Debug, Default)]
pub struct IfScript;

#[async_trait]
impl Script for IfScript {
    async fn on_execute(&self, ctx: &ScriptContext) -> anyhow::Result<()> {
        let payload: IfPayload = ctx.instruction().decode()?;
        let holds = condition::evaluate(&payload.condition, &|name: &str| ctx.get_var(name))?;
        debug!(thread = %ctx.thread().id(), holds, "condition evaluated");

        let branch = if holds { Some(payload.then) } else { payload.otherwise };
        if let Some(branch) = branch {
            ctx.execute(branch.into_sequence(), None)?;
        }
        Ok(())
    }
}

impl ScriptDefinition for IfScript {
    fn schema() -> ScriptSchema {
        ScriptSchema::from([
            ("where".to_string(), condition::schema()),
            ("then".to_string(), Schema::sentences()),
            ("else".to_string(), Schema::sentences().optional()),
        ])
    }
}
