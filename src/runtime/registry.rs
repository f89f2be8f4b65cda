//! Script and service registry
//!
//! Scripts are registered by name together with a factory that produces a
//! fresh instance per dispatch. The registry is a cheap-to-clone snapshot:
//! every logical thread captures the registry as it stood at creation, so
//! later registrations never affect running threads.

use std::any::TypeId;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::warn;

use super::error::{RegistryError, RegistryResult};
use super::script::{Script, ScriptDefinition};
use super::service::Service;
use crate::schema::{SchemaLookup, ScriptSchema};

/// Produces script instances for one handler name.
pub trait ScriptFactory: Send + Sync + 'static {
    /// Payload schema; a factory without one cannot be registered.
    fn schema(&self) -> Option<ScriptSchema>;

    /// Create a fresh instance for one dispatch.
    fn create(&self) -> Arc<dyn Script>;
}

/// Factory for a [`ScriptDefinition`] type.
pub struct TypeFactory<T>(PhantomData<fn() -> T>);

impl<T> TypeFactory<T> {
    /// Create the factory.
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for TypeFactory<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ScriptDefinition> ScriptFactory for TypeFactory<T> {
    fn schema(&self) -> Option<ScriptSchema> {
        Some(T::schema())
    }

    fn create(&self) -> Arc<dyn Script> {
        Arc::new(T::default())
    }
}

/// Factory backed by a closure.
pub struct FnFactory<F> {
    schema: Option<ScriptSchema>,
    create: F,
}

impl<F> FnFactory<F>
where
    F: Fn() -> Arc<dyn Script> + Send + Sync + 'static,
{
    /// Wrap `create`, describing its payload with `schema`.
    pub fn new(schema: Option<ScriptSchema>, create: F) -> Self {
        Self { schema, create }
    }
}

impl<F> ScriptFactory for FnFactory<F>
where
    F: Fn() -> Arc<dyn Script> + Send + Sync + 'static,
{
    fn schema(&self) -> Option<ScriptSchema> {
        self.schema.clone()
    }

    fn create(&self) -> Arc<dyn Script> {
        (self.create)()
    }
}

#[derive(Clone)]
struct ScriptEntry {
    factory: Arc<dyn ScriptFactory>,
    schema: ScriptSchema,
    origin: TypeId,
}

/// Name-to-factory table.
#[derive(Clone, Default)]
pub struct ScriptRegistry {
    scripts: Arc<HashMap<String, ScriptEntry>>,
}

impl ScriptRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `name`.
    ///
    /// Fails if the name is taken or the factory has no schema. Registering
    /// the same factory type under a second name is allowed but logged.
    pub fn register<F: ScriptFactory>(
        &mut self,
        name: impl Into<String>,
        factory: F,
    ) -> RegistryResult<()> {
        let name = name.into();
        if self.scripts.contains_key(&name) {
            return Err(RegistryError::DuplicateScript(name));
        }
        let schema = factory
            .schema()
            .ok_or_else(|| RegistryError::MissingSchema(name.clone()))?;

        let origin = TypeId::of::<F>();
        if let Some(existing) = self.names_of(origin).first() {
            warn!(
                name = %name,
                existing = %existing,
                "script factory registered under another name"
            );
        }

        Arc::make_mut(&mut self.scripts).insert(
            name,
            ScriptEntry {
                factory: Arc::new(factory),
                schema,
                origin,
            },
        );
        Ok(())
    }

    /// Register a self-describing script type.
    pub fn register_type<T: ScriptDefinition>(
        &mut self,
        name: impl Into<String>,
    ) -> RegistryResult<()> {
        self.register(name, TypeFactory::<T>::new())
    }

    /// Other names registered with the same factory type as `name`, sorted.
    ///
    /// Each closure passed to [`ScriptRegistry::register_fn`] is its own
    /// factory type, so closures never alias one another.
    pub fn aliases(&self, name: &str) -> Vec<String> {
        let Some(entry) = self.scripts.get(name) else {
            return Vec::new();
        };
        self.names_of(entry.origin)
            .into_iter()
            .filter(|other| other != name)
            .collect()
    }

    fn names_of(&self, origin: TypeId) -> Vec<String> {
        let mut names: Vec<String> = self
            .scripts
            .iter()
            .filter(|(_, entry)| entry.origin == origin)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Register a closure factory with an explicit schema.
    pub fn register_fn<F>(
        &mut self,
        name: impl Into<String>,
        schema: ScriptSchema,
        create: F,
    ) -> RegistryResult<()>
    where
        F: Fn() -> Arc<dyn Script> + Send + Sync + 'static,
    {
        self.register(name, FnFactory::new(Some(schema), create))
    }

    /// Instantiate the script registered as `name`.
    pub fn create(&self, name: &str) -> RegistryResult<Arc<dyn Script>> {
        self.scripts
            .get(name)
            .map(|entry| entry.factory.create())
            .ok_or_else(|| RegistryError::UnknownScript(name.to_string()))
    }

    /// Schema of the script registered as `name`.
    pub fn schema(&self, name: &str) -> Option<&ScriptSchema> {
        self.scripts.get(name).map(|entry| &entry.schema)
    }

    /// Whether a script is registered as `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.scripts.contains_key(name)
    }

    /// All registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.scripts.keys().cloned().collect();
        names.sort();
        names
    }
}

impl SchemaLookup for ScriptRegistry {
    fn lookup(&self, handler: &str) -> Option<&ScriptSchema> {
        self.schema(handler)
    }
}

/// Registered services, in registration order.
#[derive(Clone, Default)]
pub struct ServiceSet {
    services: Arc<Vec<Arc<dyn Service>>>,
}

impl ServiceSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a service. The same instance cannot be added twice.
    pub fn register(&mut self, service: Arc<dyn Service>) -> RegistryResult<()> {
        let duplicate = self
            .services
            .iter()
            .any(|existing| std::ptr::addr_eq(Arc::as_ptr(existing), Arc::as_ptr(&service)));
        if duplicate {
            return Err(RegistryError::DuplicateService);
        }
        Arc::make_mut(&mut self.services).push(service);
        Ok(())
    }

    /// Number of registered services.
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Whether no services are registered.
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Invoke `hook` on every service, logging failures.
    pub(crate) fn notify<F>(&self, hook: &'static str, call: F)
    where
        F: Fn(&dyn Service) -> anyhow::Result<()>,
    {
        for service in self.services.iter() {
            if let Err(err) = call(service.as_ref()) {
                warn!(hook, error = %format!("{err:#}"), "service hook failed");
            }
        }
    }
}
