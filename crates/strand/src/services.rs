//! Service container.
//!
//! A [`ServiceCollection`] is a type-keyed registry filled by configure
//! callbacks; building it yields a read-only [`ServiceProvider`]. Values are
//! keyed by their type, so there is at most one service per type, and a
//! later registration of a type replaces the earlier one.
//!
//! Factories run once, at build time, in registration order. A factory sees
//! every plain value and the result of every factory registered before it.
//!
//! # Example
//!
//! ```rust
//! use strand::services::ServiceCollection;
//!
//! struct Pool { size: usize }
//! struct Repo { pool_size: usize }
//!
//! let mut services = ServiceCollection::new();
//! services.add_singleton(Pool { size: 4 });
//! services.add_factory(|sp| {
//!     let pool = sp.get_required::<Pool>()?;
//!     Ok(Repo { pool_size: pool.size })
//! });
//!
//! let provider = services.build()?;
//! assert_eq!(provider.get_required::<Repo>()?.pool_size, 4);
//! # Ok::<(), anyhow::Error>(())
//! ```

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use strand_dispatch::{
    get_instance, get_instance_from_node, CommandNode, Composer, ParseResult, Registration,
};

use crate::configuration::Configuration;

type AnyArc = Arc<dyn Any + Send + Sync>;
type ServiceFactory = Arc<dyn Fn(&ServiceProvider) -> anyhow::Result<AnyArc> + Send + Sync>;

#[derive(Clone)]
enum Entry {
    Value(AnyArc),
    Factory(ServiceFactory),
}

#[derive(Clone)]
struct Descriptor {
    type_id: TypeId,
    type_name: &'static str,
    entry: Entry,
}

/// Mutable set of service registrations.
#[derive(Clone, Default)]
pub struct ServiceCollection {
    descriptors: Vec<Descriptor>,
}

impl ServiceCollection {
    /// Creates an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a value.
    ///
    /// If a service of this type already exists, it is replaced in place.
    pub fn add_singleton<T: Send + Sync + 'static>(&mut self, value: T) -> &mut Self {
        self.add_shared(Arc::new(value))
    }

    /// Registers an already shared value.
    pub fn add_shared<T: Send + Sync + 'static>(&mut self, value: Arc<T>) -> &mut Self {
        self.put::<T>(Entry::Value(value))
    }

    /// Registers a factory run once when the collection is built.
    pub fn add_factory<T, F>(&mut self, factory: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(&ServiceProvider) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.put::<T>(Entry::Factory(Arc::new(move |sp: &ServiceProvider| {
            factory(sp).map(|v| Arc::new(v) as AnyArc)
        })))
    }

    /// Registers `T` only if no service of that type exists yet.
    pub fn try_add_singleton<T: Send + Sync + 'static>(&mut self, value: T) -> &mut Self {
        if !self.contains::<T>() {
            self.add_singleton(value);
        }
        self
    }

    /// Removes the registration for `T`. Returns true if there was one.
    pub fn remove<T: 'static>(&mut self) -> bool {
        let before = self.descriptors.len();
        self.descriptors.retain(|d| d.type_id != TypeId::of::<T>());
        before != self.descriptors.len()
    }

    /// Returns `true` if a service of the specified type is registered.
    pub fn contains<T: 'static>(&self) -> bool {
        self.descriptors
            .iter()
            .any(|d| d.type_id == TypeId::of::<T>())
    }

    /// Returns the number of registered services.
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Returns `true` if no services are registered.
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Resolves every factory and freezes the collection.
    pub fn build(&self) -> anyhow::Result<ServiceProvider> {
        let mut provider = ServiceProvider::default();
        for descriptor in &self.descriptors {
            if let Entry::Value(value) = &descriptor.entry {
                provider.insert(descriptor, Arc::clone(value));
            }
        }
        for descriptor in &self.descriptors {
            if let Entry::Factory(factory) = &descriptor.entry {
                let value = factory(&provider).map_err(|e| {
                    e.context(format!("failed to construct service {}", descriptor.type_name))
                })?;
                provider.insert(descriptor, value);
            }
        }
        tracing::debug!(services = provider.len(), "service provider built");
        Ok(provider)
    }

    fn put<T: 'static>(&mut self, entry: Entry) -> &mut Self {
        let descriptor = Descriptor {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            entry,
        };
        match self
            .descriptors
            .iter_mut()
            .find(|d| d.type_id == descriptor.type_id)
        {
            Some(existing) => *existing = descriptor,
            None => self.descriptors.push(descriptor),
        }
        self
    }
}

impl fmt::Debug for ServiceCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.descriptors.iter().map(|d| d.type_name))
            .finish()
    }
}

/// Read-only, resolved services.
#[derive(Clone, Default)]
pub struct ServiceProvider {
    map: HashMap<TypeId, AnyArc>,
    names: Vec<&'static str>,
}

impl ServiceProvider {
    /// Gets the service of the specified type.
    ///
    /// Returns `None` if no service of this type exists.
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|value| Arc::clone(value).downcast::<T>().ok())
    }

    /// Gets a required service of the specified type.
    ///
    /// Returns an error if no service of this type exists.
    pub fn get_required<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, anyhow::Error> {
        self.get::<T>().ok_or_else(|| {
            anyhow::anyhow!(
                "Service missing: type {} not registered",
                std::any::type_name::<T>()
            )
        })
    }

    /// Returns `true` if a service of the specified type exists.
    pub fn contains<T: 'static>(&self) -> bool {
        self.map.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn insert(&mut self, descriptor: &Descriptor, value: AnyArc) {
        self.map.insert(descriptor.type_id, value);
        self.names.push(descriptor.type_name);
    }
}

impl fmt::Debug for ServiceProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceProvider")
            .field("services", &self.names)
            .finish()
    }
}

/// A collection seeded with what every command's services can rely on:
/// the [`ParseResult`] and, when one is registered on the invoked command,
/// its [`Configuration`].
pub fn seeded_collection(pr: &ParseResult) -> anyhow::Result<ServiceCollection> {
    let mut services = ServiceCollection::new();
    services.add_singleton(pr.clone());
    if let Some(config) = get_instance_from_node::<Configuration>(pr.command(), pr)? {
        services.add_shared(config);
    }
    Ok(services)
}

/// Registers a configure callback for the node's service provider.
pub fn register<F>(composer: &Composer, node: &CommandNode, configure: F) -> Registration
where
    F: Fn(&mut ServiceCollection, &ParseResult) -> anyhow::Result<()> + Send + Sync + 'static,
{
    composer.register::<ServiceCollection, ServiceProvider, _, _, _>(
        node,
        seeded_collection,
        |services, _| services.build(),
        configure,
    )
}

/// The service provider of the invoked command, if one is registered.
pub fn services(pr: &ParseResult) -> anyhow::Result<Option<Arc<ServiceProvider>>> {
    get_instance::<ServiceProvider>(pr)
}
