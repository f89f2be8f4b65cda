//! Logical threads
//!
//! A [`Thread`] walks one program with an explicit frame stack. Cursor moves
//! over labels and scopes run synchronously in a loop; the only suspension
//! point is the settlement of the one script instance in flight. Scripts run
//! as Tokio tasks and report back through a ticket: every dispatch takes a
//! fresh ticket, and a settlement whose ticket is no longer the in-flight one
//! (superseded by a control transfer, or aborted by destruction) is ignored.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};
use uuid::Uuid;

use super::error::{ThreadError, ThreadResult};
use super::frame::{Frame, FrameSnapshot, Position};
use super::registry::{ScriptRegistry, ServiceSet};
use super::script::{Script, ScriptContext};
use super::{Core, CoreShared};
use crate::program::{Instruction, Sentence, Sequence, find_label};

/// Logical thread identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadId(pub Uuid);

impl ThreadId {
    /// Create a new random ThreadId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ThreadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a thread is bound to for its whole life.
pub(crate) struct ThreadEnv {
    pub(crate) scripts: ScriptRegistry,
    pub(crate) services: ServiceSet,
    pub(crate) core: Weak<CoreShared>,
    pub(crate) runtime: Handle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    /// Observers are being told; state is still readable.
    Destroying,
    Destroyed,
}

struct InFlight {
    ticket: u64,
    handler: String,
    script: Arc<dyn Script>,
    cancel: CancellationToken,
}

struct Dispatch {
    ticket: u64,
    instruction: Arc<Instruction>,
    script: Arc<dyn Script>,
    cancel: CancellationToken,
}

enum Step {
    Dispatch(Dispatch),
    Exhausted,
    Fatal(ThreadError),
    Idle,
}

/// Result of running the cursor machine under the state lock; applied after
/// the lock is released.
struct Advance {
    aborted: Option<InFlight>,
    step: Step,
}

impl Advance {
    fn idle() -> Self {
        Self {
            aborted: None,
            step: Step::Idle,
        }
    }
}

struct ThreadState {
    phase: Phase,
    frames: Vec<Frame>,
    vars: Map<String, Value>,
    ticket: u64,
    in_flight: Option<InFlight>,
    started: bool,
    start: Option<JoinHandle<()>>,
}

impl ThreadState {
    fn is_current(&self, ticket: u64) -> bool {
        self.phase == Phase::Running
            && self
                .in_flight
                .as_ref()
                .is_some_and(|in_flight| in_flight.ticket == ticket)
    }

    /// Move the cursor until an instruction is reached or the program ends.
    fn run(&mut self, scripts: &ScriptRegistry, lifetime: &CancellationToken) -> Advance {
        if self.phase != Phase::Running {
            return Advance::idle();
        }

        loop {
            let Some(frame) = self.frames.last_mut() else {
                return Advance {
                    aborted: None,
                    step: Step::Exhausted,
                };
            };

            match frame.position() {
                Position::Label => frame.advance(),
                Position::Scope => frame.descend(),
                Position::End => {
                    if frame.ascend() {
                        continue;
                    }
                    if self.frames.len() == 1 {
                        return Advance {
                            aborted: None,
                            step: Step::Exhausted,
                        };
                    }
                    // The instruction that entered the popped frame is done.
                    let popped = self.frames.pop();
                    if popped.is_some_and(|frame| frame.steps_caller()) {
                        if let Some(parent) = self.frames.last_mut() {
                            parent.advance();
                        }
                    }
                }
                Position::Instruction(instruction) => {
                    let instruction = Arc::new(instruction.clone());
                    let aborted = self.in_flight.take();
                    let script = match scripts.create(&instruction.handler) {
                        Ok(script) => script,
                        Err(err) => {
                            return Advance {
                                aborted,
                                step: Step::Fatal(err.into()),
                            };
                        }
                    };

                    self.ticket += 1;
                    let cancel = lifetime.child_token();
                    self.in_flight = Some(InFlight {
                        ticket: self.ticket,
                        handler: instruction.handler.clone(),
                        script: script.clone(),
                        cancel: cancel.clone(),
                    });
                    return Advance {
                        aborted,
                        step: Step::Dispatch(Dispatch {
                            ticket: self.ticket,
                            instruction,
                            script,
                            cancel,
                        }),
                    };
                }
            }
        }
    }
}

struct ThreadInner {
    id: ThreadId,
    created_at: DateTime<Utc>,
    env: ThreadEnv,
    lifetime: CancellationToken,
    state: Mutex<ThreadState>,
}

/// Handle to one logical thread. Cloning shares the thread.
#[derive(Clone)]
pub struct Thread {
    inner: Arc<ThreadInner>,
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.inner.id)
            .field("running", &self.is_running())
            .finish()
    }
}

fn entry_index(sequence: &[Sentence], label: Option<&str>) -> ThreadResult<usize> {
    match label {
        None => Ok(0),
        Some(label) => find_label(sequence, label)
            .ok_or_else(|| ThreadError::UnknownEntryLabel(label.to_string())),
    }
}

impl Thread {
    /// Build a thread positioned at the start of `program` (or at
    /// `entry_label`). The thread does not move until [`Thread::start`].
    pub(crate) fn create(
        program: Sequence,
        vars: Map<String, Value>,
        entry_label: Option<&str>,
        env: ThreadEnv,
    ) -> ThreadResult<Self> {
        if program.is_empty() {
            return Err(ThreadError::EmptyProgram);
        }
        let start = entry_index(&program, entry_label)?;

        Ok(Self {
            inner: Arc::new(ThreadInner {
                id: ThreadId::new(),
                created_at: Utc::now(),
                env,
                lifetime: CancellationToken::new(),
                state: Mutex::new(ThreadState {
                    phase: Phase::Running,
                    frames: vec![Frame::new(program, start)],
                    vars,
                    ticket: 0,
                    in_flight: None,
                    started: false,
                    start: None,
                }),
            }),
        })
    }

    /// Schedule the first run of the cursor machine.
    pub(crate) fn start(&self) {
        let thread = self.clone();
        let handle = self.inner.env.runtime.spawn(async move {
            thread.resume();
        });
        let mut state = self.inner.state.lock();
        if state.phase == Phase::Running && !state.started {
            state.start = Some(handle);
        }
    }

    /// First run of the cursor machine. A no-op once anything else has moved
    /// the machine, such as an early [`Thread::execute`].
    fn resume(&self) {
        let advance = {
            let mut state = self.inner.state.lock();
            state.start = None;
            if state.started || state.in_flight.is_some() {
                return;
            }
            state.started = true;
            state.run(&self.inner.env.scripts, &self.inner.lifetime)
        };
        self.apply(advance);
    }

    /// Thread identifier.
    pub fn id(&self) -> &ThreadId {
        &self.inner.id
    }

    /// When the thread was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    /// Owning orchestrator, if it is still alive.
    pub fn core(&self) -> Option<Core> {
        self.inner.env.core.upgrade().map(Core::from_shared)
    }

    /// Whether the thread is still running.
    pub fn is_running(&self) -> bool {
        self.inner.state.lock().phase == Phase::Running
    }

    /// Wait until the thread has terminated.
    pub async fn finished(&self) {
        self.inner.lifetime.cancelled().await
    }

    /// Read a variable; absent variables read as `null`.
    pub fn get_var(&self, name: &str) -> Value {
        self.inner
            .state
            .lock()
            .vars
            .get(name)
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// Write a variable; `null` removes it. Ignored once the thread is gone.
    pub fn set_var(&self, name: impl Into<String>, value: Value) {
        let mut state = self.inner.state.lock();
        if state.phase == Phase::Destroyed {
            return;
        }
        let name = name.into();
        if value.is_null() {
            state.vars.remove(&name);
        } else {
            state.vars.insert(name, value);
        }
    }

    /// Snapshot of every variable.
    pub fn get_all_vars(&self) -> Map<String, Value> {
        self.inner.state.lock().vars.clone()
    }

    /// Number of frames on the stack.
    pub fn frame_depth(&self) -> usize {
        self.inner.state.lock().frames.len()
    }

    /// Cursor of every frame, bottom first.
    pub fn position(&self) -> Vec<FrameSnapshot> {
        self.inner
            .state
            .lock()
            .frames
            .iter()
            .map(Frame::snapshot)
            .collect()
    }

    /// Push a frame for `program`, optionally positioned at a direct label,
    /// and resume the cursor machine in it.
    ///
    /// Any script still in flight is aborted as soon as the sub-program
    /// dispatches; when the sub-program is exhausted, the thread continues
    /// after the instruction that was current when the frame was pushed.
    pub fn execute(&self, program: Sequence, entry_label: Option<&str>) -> ThreadResult<()> {
        self.transfer(None, program, entry_label)
    }

    pub(crate) fn transfer(
        &self,
        caller: Option<(u64, &str)>,
        program: Sequence,
        entry_label: Option<&str>,
    ) -> ThreadResult<()> {
        let (pending_start, advance) = {
            let mut state = self.inner.state.lock();
            if state.phase != Phase::Running {
                return Err(ThreadError::NotRunning);
            }
            if let Some((ticket, name)) = caller {
                if !state.is_current(ticket) {
                    return Err(ThreadError::Superseded(name.to_string()));
                }
            }
            let start = entry_index(&program, entry_label)?;
            debug!(
                thread = %self.inner.id,
                depth = state.frames.len() + 1,
                "entering sub-program"
            );
            // Before the first run nothing under the parent cursor has been
            // dispatched, so the parent resumes at it rather than past it.
            let step_caller = state.in_flight.is_some();
            state.started = true;
            state.frames.push(Frame::nested(program, start, step_caller));
            let advance = state.run(&self.inner.env.scripts, &self.inner.lifetime);
            (state.start.take(), advance)
        };
        if let Some(pending_start) = pending_start {
            pending_start.abort();
        }
        self.apply(advance);
        Ok(())
    }

    /// Terminate the thread: abort the script in flight, drop the program and
    /// variables, and leave the owning core's active set.
    pub fn destroy(&self) -> ThreadResult<()> {
        {
            let mut state = self.inner.state.lock();
            if state.phase != Phase::Running {
                return Err(ThreadError::NotRunning);
            }
            state.phase = Phase::Destroying;
        }

        self.inner
            .env
            .services
            .notify("on_thread_will_destroy", |service| {
                service.on_thread_will_destroy(self)
            });

        let (in_flight, start) = {
            let mut state = self.inner.state.lock();
            state.phase = Phase::Destroyed;
            state.frames.clear();
            state.vars.clear();
            (state.in_flight.take(), state.start.take())
        };
        if let Some(start) = start {
            start.abort();
        }
        if let Some(in_flight) = in_flight {
            abort_script(in_flight);
        }
        self.inner.lifetime.cancel();

        if let Some(core) = self.inner.env.core.upgrade() {
            core.forget(&self.inner.id);
        }
        info!(thread = %self.inner.id, "thread destroyed");
        Ok(())
    }

    fn apply(&self, advance: Advance) {
        if let Some(aborted) = advance.aborted {
            abort_script(aborted);
        }
        match advance.step {
            Step::Idle => {}
            Step::Exhausted => {
                debug!(thread = %self.inner.id, "program exhausted");
                // A concurrent destroy may have won; either way it is gone.
                let _ = self.destroy();
            }
            Step::Fatal(err) => self.fail(err),
            Step::Dispatch(dispatch) => self.dispatch(dispatch),
        }
    }

    fn dispatch(&self, dispatch: Dispatch) {
        let Dispatch {
            ticket,
            instruction,
            script,
            cancel,
        } = dispatch;
        debug!(thread = %self.inner.id, ticket, handler = %instruction.handler, "dispatching");

        self.inner
            .env
            .services
            .notify("on_before_script", |service| {
                service.on_before_script(script.as_ref(), self, &instruction)
            });

        let ctx = ScriptContext {
            name: instruction.handler.clone(),
            instruction,
            thread: self.clone(),
            ticket,
            cancel,
        };
        self.inner.env.runtime.spawn(async move {
            let result = script.on_execute(&ctx).await;
            ctx.thread.settle(ticket, script, &ctx.instruction, result);
        });
    }

    fn settle(
        &self,
        ticket: u64,
        script: Arc<dyn Script>,
        instruction: &Instruction,
        result: anyhow::Result<()>,
    ) {
        match result {
            Ok(()) => {
                // Settlements arriving after destroy are not reported.
                if self.inner.state.lock().phase != Phase::Running {
                    trace!(thread = %self.inner.id, ticket, "ignoring settlement after destroy");
                    return;
                }
                self.inner
                    .env
                    .services
                    .notify("on_after_script", |service| {
                        service.on_after_script(script.as_ref(), self, instruction)
                    });

                let advance = {
                    let mut state = self.inner.state.lock();
                    if !state.is_current(ticket) {
                        trace!(thread = %self.inner.id, ticket, "ignoring stale settlement");
                        return;
                    }
                    debug!(
                        thread = %self.inner.id,
                        ticket,
                        handler = %instruction.handler,
                        "settled"
                    );
                    state.in_flight = None;
                    if let Some(frame) = state.frames.last_mut() {
                        frame.advance();
                    }
                    state.run(&self.inner.env.scripts, &self.inner.lifetime)
                };
                self.apply(advance);
            }
            Err(error) => {
                let current = {
                    let mut state = self.inner.state.lock();
                    let current = state.is_current(ticket);
                    if current {
                        state.in_flight = None;
                    }
                    current
                };
                if !current {
                    trace!(
                        thread = %self.inner.id,
                        ticket,
                        error = %format!("{error:#}"),
                        "suppressing failure of aborted script"
                    );
                    return;
                }
                self.fail(ThreadError::Script {
                    handler: instruction.handler.clone(),
                    error,
                });
            }
        }
    }

    fn fail(&self, err: ThreadError) {
        error!(thread = %self.inner.id, error = %err, "thread failed");
        self.inner
            .env
            .services
            .notify("on_thread_error", |service| service.on_thread_error(self, &err));
        let _ = self.destroy();
    }
}

fn abort_script(in_flight: InFlight) {
    debug!(ticket = in_flight.ticket, handler = %in_flight.handler, "aborting script");
    in_flight.cancel.cancel();
    in_flight.script.on_abort();
}
