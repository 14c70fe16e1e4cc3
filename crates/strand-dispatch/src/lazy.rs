//! Exactly-once lazy construction of shared instances.
//!
//! A [`LazyInstanceCell`] holds a factory and, once it has succeeded, the
//! value it produced. It is reachable from two directions: the action chain
//! ensures it at the start of every invocation, and out-of-band callers
//! (argument default providers, help renderers) can [`get`] it before the
//! handler runs.
//!
//! Construction is first-writer-wins: concurrent callers block while one of
//! them runs the factory, then all observe the same `Arc`. A failing factory
//! leaves the cell empty, so a later call tries again.
//!
//! [`get`]: LazyInstanceCell::get

use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::context::ParseResult;

/// Factory producing the instance from the invocation's parse result.
pub type InstanceFactory<T> = Arc<dyn Fn(&ParseResult) -> anyhow::Result<T> + Send + Sync>;

/// A single-assignment, thread-safe memo cell.
///
/// # Example
///
/// ```rust
/// use strand_dispatch::{dispatch, CommandNode, LazyInstanceCell};
///
/// let cell = LazyInstanceCell::new(|_pr| Ok(vec![1, 2, 3]));
/// let pr = dispatch::parse(&CommandNode::named("app"), ["app"])?;
///
/// assert!(cell.peek().is_none());
/// let first = cell.get(&pr)?;
/// let second = cell.get(&pr)?;
/// assert!(std::sync::Arc::ptr_eq(&first, &second));
/// # Ok::<(), anyhow::Error>(())
/// ```
pub struct LazyInstanceCell<T> {
    value: OnceCell<Arc<T>>,
    factory: InstanceFactory<T>,
}

impl<T: Send + Sync + 'static> LazyInstanceCell<T> {
    /// Creates an empty cell with the given factory.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(&ParseResult) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self::from_factory(Arc::new(factory))
    }

    /// Creates an empty cell sharing an existing factory.
    pub fn from_factory(factory: InstanceFactory<T>) -> Self {
        Self {
            value: OnceCell::new(),
            factory,
        }
    }

    /// Builds the instance if it does not exist yet.
    pub fn ensure(&self, pr: &ParseResult) -> anyhow::Result<()> {
        self.get(pr).map(|_| ())
    }

    /// Returns the instance, building it first if needed.
    pub fn get(&self, pr: &ParseResult) -> anyhow::Result<Arc<T>> {
        self.value
            .get_or_try_init(|| {
                tracing::debug!(
                    instance = type_name::<T>(),
                    command = pr.command().name(),
                    "constructing lazy instance"
                );
                match (self.factory)(pr) {
                    Ok(value) => Ok(Arc::new(value)),
                    Err(e) => {
                        tracing::debug!(
                            instance = type_name::<T>(),
                            error = %e,
                            "lazy instance construction failed; cell left empty"
                        );
                        Err(e)
                    }
                }
            })
            .cloned()
    }

    /// Returns the instance only if it has already been built.
    pub fn peek(&self) -> Option<Arc<T>> {
        self.value.get().cloned()
    }

    /// Returns true once the factory has succeeded.
    pub fn is_built(&self) -> bool {
        self.value.get().is_some()
    }
}

impl<T> fmt::Debug for LazyInstanceCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyInstanceCell")
            .field("type", &type_name::<T>())
            .field("built", &self.value.get().is_some())
            .finish()
    }
}

/// Type-erased view of a [`LazyInstanceCell`], as stored on an action chain.
pub trait InstanceSlot: Send + Sync {
    /// `TypeId` of the instance the slot produces.
    fn instance_type(&self) -> TypeId;

    /// Type name of the instance, for diagnostics.
    fn type_name(&self) -> &'static str;

    /// Builds the instance if needed.
    fn ensure(&self, pr: &ParseResult) -> anyhow::Result<()>;

    /// Returns the instance, building it if needed.
    fn get_any(&self, pr: &ParseResult) -> anyhow::Result<Arc<dyn Any + Send + Sync>>;

    /// Returns the instance if it is already built.
    fn peek_any(&self) -> Option<Arc<dyn Any + Send + Sync>>;
}

impl<T: Any + Send + Sync> InstanceSlot for LazyInstanceCell<T> {
    fn instance_type(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn type_name(&self) -> &'static str {
        type_name::<T>()
    }

    fn ensure(&self, pr: &ParseResult) -> anyhow::Result<()> {
        LazyInstanceCell::ensure(self, pr)
    }

    fn get_any(&self, pr: &ParseResult) -> anyhow::Result<Arc<dyn Any + Send + Sync>> {
        let value: Arc<dyn Any + Send + Sync> = self.get(pr)?;
        Ok(value)
    }

    fn peek_any(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.peek().map(|value| value as Arc<dyn Any + Send + Sync>)
    }
}
