//! Engine core and public API
//!
//! This module provides the [`Core`] orchestrator that owns the script
//! registry, the registered services, the default thread configuration and
//! the set of active logical threads.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::runtime::Handle;
use tracing::{debug, info};

// Submodules
pub mod config;
pub mod error;
pub mod frame;
pub mod registry;
pub mod script;
pub mod service;
pub mod thread;

use crate::program::Sentence;
use crate::schema::{ValidationReport, validate};
use error::EngineError;
use thread::ThreadEnv;

pub use config::{CoreConfig, ThreadConfig};
pub use error::{RegistryError, Result, ThreadError, ThreadResult};
pub use frame::FrameSnapshot;
pub use registry::{FnFactory, ScriptFactory, ScriptRegistry, ServiceSet, TypeFactory};
pub use script::{Script, ScriptContext, ScriptDefinition};
pub use service::Service;
pub use thread::{Thread, ThreadId};

struct Defaults {
    config: ThreadConfig,
    /// Whether `config.sentences` passed validation against the registry.
    validated: bool,
}

pub(crate) struct CoreShared {
    scripts: RwLock<ScriptRegistry>,
    services: RwLock<ServiceSet>,
    defaults: RwLock<Defaults>,
    threads: Mutex<HashMap<ThreadId, Thread>>,
    initialized: AtomicBool,
}

impl CoreShared {
    /// Drop a terminated thread from the active set.
    pub(crate) fn forget(&self, id: &ThreadId) {
        self.threads.lock().remove(id);
    }
}

/// The engine orchestrator
///
/// Cloning a `Core` shares it. Threads hold only a weak reference back, so
/// dropping every `Core` handle does not keep the registry alive.
#[derive(Clone)]
pub struct Core {
    shared: Arc<CoreShared>,
}

impl Default for Core {
    fn default() -> Self {
        Self::new(CoreConfig::default())
    }
}

impl Core {
    /// Create a core with the given defaults. The default program is
    /// validated lazily, at the first thread creation that uses it.
    pub fn new(config: CoreConfig) -> Self {
        Self {
            shared: Arc::new(CoreShared {
                scripts: RwLock::new(ScriptRegistry::new()),
                services: RwLock::new(ServiceSet::new()),
                defaults: RwLock::new(Defaults {
                    config: config.thread,
                    validated: false,
                }),
                threads: Mutex::new(HashMap::new()),
                initialized: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn from_shared(shared: Arc<CoreShared>) -> Self {
        Self { shared }
    }

    /// Register a script factory under `name`.
    pub fn register_script<F: ScriptFactory>(
        &self,
        name: impl Into<String>,
        factory: F,
    ) -> Result<()> {
        let name = name.into();
        self.shared.scripts.write().register(name.clone(), factory)?;
        debug!(script = %name, "script registered");
        Ok(())
    }

    /// Register a self-describing script type under `name`.
    pub fn register_script_type<T: ScriptDefinition>(&self, name: impl Into<String>) -> Result<()> {
        self.register_script(name, TypeFactory::<T>::new())
    }

    /// Register a closure factory with an explicit schema.
    pub fn register_script_fn<F>(
        &self,
        name: impl Into<String>,
        schema: crate::schema::ScriptSchema,
        create: F,
    ) -> Result<()>
    where
        F: Fn() -> Arc<dyn Script> + Send + Sync + 'static,
    {
        self.register_script(name, FnFactory::new(Some(schema), create))
    }

    /// Register a service. The same instance cannot be registered twice.
    pub fn register_service(&self, service: Arc<dyn Service>) -> Result<()> {
        self.shared.services.write().register(service)?;
        Ok(())
    }

    /// Snapshot of the script registry.
    pub fn scripts(&self) -> ScriptRegistry {
        self.shared.scripts.read().clone()
    }

    /// Merge `config` into the thread defaults. Supplied sentences are
    /// validated first; on failure the defaults are left untouched.
    pub fn configure(&self, config: ThreadConfig) -> Result<()> {
        let report = match &config.sentences {
            Some(sentences) => Some(self.validate(sentences)?),
            None => None,
        };

        let mut defaults = self.shared.defaults.write();
        defaults.config.merge(&config);
        if let Some(report) = report {
            defaults.validated = true;
            debug!(labels = report.labels.len(), "default program validated");
        }
        Ok(())
    }

    /// Validate `program` against the registered script schemas.
    pub fn validate(&self, program: &Sentence) -> Result<ValidationReport> {
        let scripts = self.scripts();
        Ok(validate(program, &scripts)?)
    }

    /// Notify services that the core is ready. Fails on a second call.
    pub fn initialize(&self) -> Result<()> {
        if self.shared.initialized.swap(true, Ordering::SeqCst) {
            return Err(EngineError::Config("core is already initialized".into()));
        }
        let services = self.shared.services.read().clone();
        services.notify("on_core_initialize", |service| service.on_core_initialize(self));
        info!(
            scripts = self.shared.scripts.read().names().len(),
            services = services.len(),
            "core initialized"
        );
        Ok(())
    }

    /// Create and start a thread from the defaults merged with `overrides`.
    ///
    /// The program is validated when the overrides replace it (or when the
    /// defaults have not been validated yet). A single non-sequence sentence
    /// is run as a one-element sequence. Must be called within a Tokio
    /// runtime.
    pub fn create_thread(&self, overrides: Option<ThreadConfig>) -> Result<Thread> {
        let runtime = Handle::try_current().map_err(|err| ThreadError::NoRuntime(err.to_string()))?;

        let (config, replaced, validated) = {
            let defaults = self.shared.defaults.read();
            let mut config = defaults.config.clone();
            let replaced = overrides
                .as_ref()
                .is_some_and(|overrides| overrides.sentences.is_some());
            if let Some(overrides) = &overrides {
                config.merge(overrides);
            }
            (config, replaced, defaults.validated)
        };

        let ThreadConfig {
            vars,
            sentences,
            entry_label,
        } = config;
        let program = sentences.ok_or(ThreadError::EmptyProgram)?;

        let scripts = self.scripts();
        if replaced || !validated {
            validate(&program, &scripts)?;
            if !replaced {
                self.shared.defaults.write().validated = true;
            }
        }

        let services = self.shared.services.read().clone();
        let thread = Thread::create(
            program.into_sequence(),
            vars.unwrap_or_default(),
            entry_label.as_deref(),
            ThreadEnv {
                scripts,
                services: services.clone(),
                core: Arc::downgrade(&self.shared),
                runtime,
            },
        )?;

        self.shared
            .threads
            .lock()
            .insert(thread.id().clone(), thread.clone());
        services.notify("on_thread_created", |service| service.on_thread_created(&thread));
        info!(thread = %thread.id(), "thread created");

        thread.start();
        Ok(thread)
    }

    /// Active threads, oldest first.
    pub fn threads(&self) -> Vec<Thread> {
        let mut threads: Vec<Thread> = self.shared.threads.lock().values().cloned().collect();
        threads.sort_by_key(|thread| thread.created_at());
        threads
    }

    /// Look up an active thread.
    pub fn thread(&self, id: &ThreadId) -> Option<Thread> {
        self.shared.threads.lock().get(id).cloned()
    }

    /// Destroy every active thread.
    pub fn destroy_all(&self) {
        // Destroying a thread removes it from the set.
        for thread in self.threads() {
            if let Err(err) = thread.destroy() {
                debug!(thread = %thread.id(), error = %err, "thread already gone");
            }
        }
    }

    /// Destroy every thread, then notify services that the core is gone.
    pub fn destroy(&self) {
        self.destroy_all();
        let services = self.shared.services.read().clone();
        services.notify("on_core_destroy", |service| service.on_core_destroy(self));
        self.shared.initialized.store(false, Ordering::SeqCst);
        info!("core destroyed");
    }

    /// Wait for every currently active thread to terminate.
    pub async fn join_all(&self) {
        let threads = self.threads();
        futures::future::join_all(threads.iter().map(|thread| thread.finished())).await;
    }
}
