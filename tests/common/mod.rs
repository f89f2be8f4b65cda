//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use strand::program::{Instruction, Sentence};
use strand::runtime::{Core, Script, ScriptContext, Service, Thread, ThreadConfig, ThreadError};
use strand::schema::{Schema, ScriptSchema};
use tokio::sync::Notify;

/// Ordered log shared between fixtures and assertions.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

fn tag(ctx: &ScriptContext) -> String {
    ctx.instruction()
        .param("tag")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Appends its `tag` to the journal and settles.
pub struct Record {
    journal: Journal,
}

#[async_trait]
impl Script for Record {
    async fn on_execute(&self, ctx: &ScriptContext) -> anyhow::Result<()> {
        self.journal.push(tag(ctx));
        Ok(())
    }
}

/// Transfers into `body`, optionally trying a second time.
pub struct Transfer {
    journal: Journal,
    aborts: Arc<AtomicUsize>,
}

#[async_trait]
impl Script for Transfer {
    async fn on_execute(&self, ctx: &ScriptContext) -> anyhow::Result<()> {
        let body = ctx.instruction().param("body").cloned().unwrap_or(Value::Null);
        let body = Sentence::from_value(&body)?.into_sequence();
        ctx.execute(body.clone(), None)?;
        if ctx.instruction().param("twice").is_some() {
            match ctx.execute(body, None) {
                Err(ThreadError::Superseded(name)) => {
                    self.journal.push(format!("superseded:{name}"))
                }
                other => self.journal.push(format!("unexpected:{other:?}")),
            }
        }
        Ok(())
    }

    fn on_abort(&self) {
        self.aborts.fetch_add(1, Ordering::SeqCst);
    }
}

/// Waits until aborted, then settles with a failure that must be ignored.
pub struct Gate {
    started: Arc<Notify>,
    aborts: Arc<AtomicUsize>,
}

#[async_trait]
impl Script for Gate {
    async fn on_execute(&self, ctx: &ScriptContext) -> anyhow::Result<()> {
        self.started.notify_one();
        ctx.cancellation().cancelled().await;
        anyhow::bail!("gate was cancelled")
    }

    fn on_abort(&self) {
        self.aborts.fetch_add(1, Ordering::SeqCst);
    }
}

/// Waits until aborted, then settles successfully.
pub struct Hold {
    started: Arc<Notify>,
}

#[async_trait]
impl Script for Hold {
    async fn on_execute(&self, ctx: &ScriptContext) -> anyhow::Result<()> {
        self.started.notify_one();
        ctx.cancellation().cancelled().await;
        Ok(())
    }
}

/// Always fails.
pub struct Fail;

#[async_trait]
impl Script for Fail {
    async fn on_execute(&self, _ctx: &ScriptContext) -> anyhow::Result<()> {
        anyhow::bail!("boom")
    }
}

/// Records every lifecycle hook as a short string.
#[derive(Default)]
pub struct Recorder {
    pub events: Journal,
    pub final_vars: Mutex<Vec<Map<String, Value>>>,
    pub errors: Mutex<Vec<String>>,
}

impl Service for Recorder {
    fn on_core_initialize(&self, _core: &Core) -> anyhow::Result<()> {
        self.events.push("core_initialize");
        Ok(())
    }

    fn on_core_destroy(&self, _core: &Core) -> anyhow::Result<()> {
        self.events.push("core_destroy");
        Ok(())
    }

    fn on_thread_created(&self, _thread: &Thread) -> anyhow::Result<()> {
        self.events.push("created");
        Ok(())
    }

    fn on_thread_will_destroy(&self, thread: &Thread) -> anyhow::Result<()> {
        self.final_vars.lock().push(thread.get_all_vars());
        self.events.push("will_destroy");
        Ok(())
    }

    fn on_before_script(
        &self,
        _script: &dyn Script,
        _thread: &Thread,
        instruction: &Instruction,
    ) -> anyhow::Result<()> {
        self.events.push(format!("before:{}", instruction.handler));
        Ok(())
    }

    fn on_after_script(
        &self,
        _script: &dyn Script,
        _thread: &Thread,
        instruction: &Instruction,
    ) -> anyhow::Result<()> {
        self.events.push(format!("after:{}", instruction.handler));
        Ok(())
    }

    fn on_thread_error(&self, _thread: &Thread, error: &ThreadError) -> anyhow::Result<()> {
        self.errors.lock().push(error.to_string());
        Ok(())
    }
}

/// A core with the fixture scripts and the built-ins registered.
pub struct Fixture {
    pub core: Core,
    pub journal: Journal,
    pub recorder: Arc<Recorder>,
    pub started: Arc<Notify>,
    pub gate_aborts: Arc<AtomicUsize>,
    pub transfer_aborts: Arc<AtomicUsize>,
}

impl Fixture {
    pub fn new() -> Self {
        let core = Core::default();
        let journal = Journal::default();
        let recorder = Arc::new(Recorder::default());
        let started = Arc::new(Notify::new());
        let gate_aborts = Arc::new(AtomicUsize::new(0));
        let transfer_aborts = Arc::new(AtomicUsize::new(0));

        strand::scripts::register_builtin(&core).unwrap();

        let record_journal = journal.clone();
        core.register_script_fn(
            "record",
            ScriptSchema::from([("tag".to_string(), Schema::string())]),
            move || {
                Arc::new(Record {
                    journal: record_journal.clone(),
                })
            },
        )
        .unwrap();

        let transfer_journal = journal.clone();
        let aborts = transfer_aborts.clone();
        core.register_script_fn(
            "transfer",
            ScriptSchema::from([
                ("body".to_string(), Schema::sentences()),
                ("twice".to_string(), Schema::boolean().optional()),
            ]),
            move || {
                Arc::new(Transfer {
                    journal: transfer_journal.clone(),
                    aborts: aborts.clone(),
                })
            },
        )
        .unwrap();

        let gate_started = started.clone();
        let aborts = gate_aborts.clone();
        core.register_script_fn("gate", ScriptSchema::new(), move || {
            Arc::new(Gate {
                started: gate_started.clone(),
                aborts: aborts.clone(),
            })
        })
        .unwrap();

        let hold_started = started.clone();
        core.register_script_fn("hold", ScriptSchema::new(), move || {
            Arc::new(Hold {
                started: hold_started.clone(),
            })
        })
        .unwrap();

        core.register_script_fn("fail", ScriptSchema::new(), || Arc::new(Fail))
            .unwrap();

        core.register_service(recorder.clone()).unwrap();

        Self {
            core,
            journal,
            recorder,
            started,
            gate_aborts,
            transfer_aborts,
        }
    }

    /// Start a thread running `program`.
    pub fn spawn(&self, program: Value) -> Thread {
        self.spawn_with(ThreadConfig::program(sentence(program)))
    }

    pub fn spawn_with(&self, config: ThreadConfig) -> Thread {
        self.core.create_thread(Some(config)).unwrap()
    }
}

pub fn sentence(value: Value) -> Sentence {
    Sentence::from_value(&value).unwrap()
}

pub fn record(tag: &str) -> Value {
    json!({"handler": "record", "tag": tag})
}

/// Wait for `thread` to terminate, failing the test if it hangs.
pub async fn finish(thread: &Thread) {
    tokio::time::timeout(Duration::from_secs(5), thread.finished())
        .await
        .expect("thread did not terminate");
}

/// Let spawned tasks run for a while.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
