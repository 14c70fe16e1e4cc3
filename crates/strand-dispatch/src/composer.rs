//! Composing independently registered extensions onto command nodes.
//!
//! Many extensions want a shared object on the same command: configuration,
//! a service provider, a host. Each of them contributes one *configure
//! callback* for a builder, without knowing who else does. The [`Composer`]
//! collects those callbacks per key `(node, builder type, instance type)`.
//!
//! The first registration for a key installs an [`ActionChain`] carrying a
//! [`LazyInstanceCell`] on the node and on every current descendant. When the
//! command runs, the cell builds the instance exactly once:
//!
//! 1. create a fresh builder
//! 2. run every callback registered for the key, in registration order
//! 3. turn the builder into the instance
//!
//! Later registrations for the same key only append their callback; the
//! installed chains, and their cells, are left alone.
//!
//! # Layer order
//!
//! Each newly registered key wraps whatever handler the node has at that
//! moment, so **the most recently registered key is the outermost layer**.
//! Its before step runs first and its after step runs last:
//!
//! ```text
//! register(config) ; register(host)
//!
//! host.before → config.before → handler → config.after → host.after
//! ```
//!
//! Instances are always ensured by their own layer before its before step,
//! so an inner layer's instance is not yet built when an outer before step
//! runs. Outer layers that depend on inner instances resolve them through
//! [`get_instance`], which builds on demand.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::BoxFuture;
use futures::FutureExt;
use once_cell::sync::Lazy;

use crate::cancel::CancellationSignal;
use crate::chain::ActionChain;
use crate::context::ParseResult;
use crate::handler::Handler;
use crate::lazy::{InstanceFactory, LazyInstanceCell};
use crate::node::{CommandNode, NodeId};
use crate::propagate::propagate;
use crate::step::Step;

/// Creates a fresh builder for one construction.
pub type CreateBuilderFn<B> = Arc<dyn Fn(&ParseResult) -> anyhow::Result<B> + Send + Sync>;

/// Turns a configured builder into the instance.
pub type BuildInstanceFn<B, T> = Arc<dyn Fn(B, &ParseResult) -> anyhow::Result<T> + Send + Sync>;

/// One extension's contribution to a builder.
pub type ConfigureFn<B> = Arc<dyn Fn(&mut B, &ParseResult) -> anyhow::Result<()> + Send + Sync>;

/// A before or after step that receives the built instance.
pub enum InstanceStep<T> {
    /// Runs on the calling thread
    Sync(Arc<dyn Fn(&T, &ParseResult) -> anyhow::Result<()> + Send + Sync>),
    /// Must be awaited; makes the installed chain asynchronous
    Async(
        Arc<
            dyn Fn(Arc<T>, ParseResult, CancellationSignal) -> BoxFuture<'static, anyhow::Result<()>>
                + Send
                + Sync,
        >,
    ),
}

impl<T: Send + Sync + 'static> InstanceStep<T> {
    /// Creates a synchronous instance step.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&T, &ParseResult) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        InstanceStep::Sync(Arc::new(f))
    }

    /// Creates an asynchronous instance step.
    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(Arc<T>, ParseResult, CancellationSignal) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        InstanceStep::Async(Arc::new(move |instance, pr, cancel| {
            f(instance, pr, cancel).boxed()
        }))
    }

    /// Binds the step to one node's cell, producing a chain step.
    fn bind(&self, cell: Arc<LazyInstanceCell<T>>) -> Step {
        match self {
            InstanceStep::Sync(f) => {
                let f = Arc::clone(f);
                Step::sync(move |pr| {
                    let instance = cell.get(pr)?;
                    f(&instance, pr)
                })
            }
            InstanceStep::Async(f) => {
                let f = Arc::clone(f);
                Step::from_async(move |pr, cancel| {
                    let f = Arc::clone(&f);
                    let cell = Arc::clone(&cell);
                    async move {
                        let instance = cell.get(&pr)?;
                        f(instance, pr, cancel).await
                    }
                })
            }
        }
    }
}

impl<T> Clone for InstanceStep<T> {
    fn clone(&self) -> Self {
        match self {
            InstanceStep::Sync(f) => InstanceStep::Sync(Arc::clone(f)),
            InstanceStep::Async(f) => InstanceStep::Async(Arc::clone(f)),
        }
    }
}

/// Everything needed to install a chain for one `(builder, instance)` key.
///
/// Only the first registration's composition is used; later ones for the
/// same key contribute their configure callback and are otherwise dropped.
pub struct Composition<B, T> {
    create_builder: CreateBuilderFn<B>,
    build_instance: BuildInstanceFn<B, T>,
    before: Option<InstanceStep<T>>,
    after: Option<InstanceStep<T>>,
}

impl<B: 'static, T: Send + Sync + 'static> Composition<B, T> {
    /// Creates a composition from a builder constructor and a build function.
    pub fn new<C, F>(create_builder: C, build_instance: F) -> Self
    where
        C: Fn(&ParseResult) -> anyhow::Result<B> + Send + Sync + 'static,
        F: Fn(B, &ParseResult) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self {
            create_builder: Arc::new(create_builder),
            build_instance: Arc::new(build_instance),
            before: None,
            after: None,
        }
    }

    /// Sets the step run before the wrapped handler.
    pub fn before(mut self, step: InstanceStep<T>) -> Self {
        self.before = Some(step);
        self
    }

    /// Sets the step run after the wrapped handler.
    pub fn after(mut self, step: InstanceStep<T>) -> Self {
        self.after = Some(step);
        self
    }
}

impl<B: Default + 'static, T: Send + Sync + 'static> Composition<B, T> {
    /// Creates a composition whose builder starts from `B::default()`.
    pub fn with_default_builder<F>(build_instance: F) -> Self
    where
        F: Fn(B, &ParseResult) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self::new(|_| Ok(B::default()), build_instance)
    }
}

impl<T: Send + Sync + 'static> Composition<(), T> {
    /// Creates a composition with no builder stage.
    pub fn from_factory<F>(factory: F) -> Self
    where
        F: Fn(&ParseResult) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self::new(|_| Ok(()), move |(), pr| factory(pr))
    }
}

/// What a registration call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// First registration for the key: chains were installed on the node
    /// and its descendants.
    Installed,
    /// The key already existed: only the callback was appended.
    Appended,
}

/// The ordered callbacks for one registry key.
struct Configurer<B> {
    callbacks: Mutex<Vec<ConfigureFn<B>>>,
}

impl<B> Configurer<B> {
    fn new() -> Self {
        Self {
            callbacks: Mutex::new(Vec::new()),
        }
    }

    fn push(&self, callback: ConfigureFn<B>) {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(callback);
    }

    fn snapshot(&self) -> Vec<ConfigureFn<B>> {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn len(&self) -> usize {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct RegistryKey {
    node: NodeId,
    builder: TypeId,
    instance: TypeId,
}

impl RegistryKey {
    fn of<B: 'static, T: 'static>(node: &CommandNode) -> Self {
        Self {
            node: node.id(),
            builder: TypeId::of::<B>(),
            instance: TypeId::of::<T>(),
        }
    }
}

/// Registry of configure callbacks and installer of action chains.
///
/// Use [`Composer::new`] for an explicitly scoped registry (tests, embedded
/// apps) or [`Composer::global`] for the process-wide one. Entries live as
/// long as the composer.
///
/// # Example
///
/// ```rust
/// use strand_dispatch::{dispatch, get_instance, CommandNode, Composer, Handler};
///
/// #[derive(Default)]
/// struct Greeting(Vec<String>);
///
/// let composer = Composer::new();
/// let root = CommandNode::named("app").with_handler(Handler::sync(|pr| {
///     let words = get_instance::<String>(pr)?.expect("registered");
///     assert_eq!(words.as_str(), "hello world");
///     Ok(0)
/// }));
///
/// composer.register_default::<Greeting, String, _, _>(
///     &root,
///     |b, _| Ok(b.0.join(" ")),
///     |b, _| { b.0.push("hello".into()); Ok(()) },
/// );
/// composer.register_default::<Greeting, String, _, _>(
///     &root,
///     |b, _| Ok(b.0.join(" ")),
///     |b, _| { b.0.push("world".into()); Ok(()) },
/// );
///
/// assert_eq!(dispatch::invoke(&root, ["app"])?, 0);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub struct Composer {
    entries: Mutex<HashMap<RegistryKey, Arc<dyn Any + Send + Sync>>>,
}

static GLOBAL: Lazy<Composer> = Lazy::new(Composer::new);

impl Composer {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// The process-wide registry.
    pub fn global() -> &'static Composer {
        &GLOBAL
    }

    /// Registers a configure callback for `(B, T)` on `node`.
    pub fn register<B, T, C, F, G>(
        &self,
        node: &CommandNode,
        create_builder: C,
        build_instance: F,
        configure: G,
    ) -> Registration
    where
        B: 'static,
        T: Send + Sync + 'static,
        C: Fn(&ParseResult) -> anyhow::Result<B> + Send + Sync + 'static,
        F: Fn(B, &ParseResult) -> anyhow::Result<T> + Send + Sync + 'static,
        G: Fn(&mut B, &ParseResult) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.compose(
            node,
            Composition::new(create_builder, build_instance),
            Some(Arc::new(configure)),
        )
    }

    /// Like [`register`](Self::register), with the builder created by
    /// `B::default()`.
    pub fn register_default<B, T, F, G>(
        &self,
        node: &CommandNode,
        build_instance: F,
        configure: G,
    ) -> Registration
    where
        B: Default + 'static,
        T: Send + Sync + 'static,
        F: Fn(B, &ParseResult) -> anyhow::Result<T> + Send + Sync + 'static,
        G: Fn(&mut B, &ParseResult) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.compose(
            node,
            Composition::with_default_builder(build_instance),
            Some(Arc::new(configure)),
        )
    }

    /// Registers a lazily built `T` with before/after steps and no builder
    /// stage.
    ///
    /// Keyed by `((), T)`; a second call for the same node and `T` keeps the
    /// first call's factory and steps.
    pub fn register_steps<T, F>(
        &self,
        node: &CommandNode,
        build_instance: F,
        before: Option<InstanceStep<T>>,
        after: Option<InstanceStep<T>>,
    ) -> Registration
    where
        T: Send + Sync + 'static,
        F: Fn(&ParseResult) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        let mut composition = Composition::from_factory(build_instance);
        composition.before = before;
        composition.after = after;
        self.compose(node, composition, None)
    }

    /// The general form behind every `register*` method.
    pub fn compose<B, T>(
        &self,
        node: &CommandNode,
        composition: Composition<B, T>,
        configure: Option<ConfigureFn<B>>,
    ) -> Registration
    where
        B: 'static,
        T: Send + Sync + 'static,
    {
        let key = RegistryKey::of::<B, T>(node);
        // Held across installation so check-then-install is atomic per key.
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = entries.get(&key) {
            if let (Some(callback), Ok(configurer)) =
                (configure, Arc::clone(existing).downcast::<Configurer<B>>())
            {
                configurer.push(callback);
            }
            tracing::debug!(
                command = node.name(),
                builder = type_name::<B>(),
                instance = type_name::<T>(),
                "appended configure callback"
            );
            return Registration::Appended;
        }

        let configurer = Arc::new(Configurer::<B>::new());
        if let Some(callback) = configure {
            configurer.push(callback);
        }
        entries.insert(key, Arc::clone(&configurer) as Arc<dyn Any + Send + Sync>);

        let factory = instance_factory(
            configurer,
            composition.create_builder,
            composition.build_instance,
        );
        let before = composition.before;
        let after = composition.after;
        propagate(node, &mut |target: &CommandNode| {
            let cell = Arc::new(LazyInstanceCell::from_factory(Arc::clone(&factory)));
            target.wrap_handler(|current| {
                let mut chain = ActionChain::new(current).with_instance(Arc::clone(&cell));
                if let Some(step) = &before {
                    chain = chain.before(step.bind(Arc::clone(&cell)));
                }
                if let Some(step) = &after {
                    chain = chain.after(step.bind(Arc::clone(&cell)));
                }
                chain.into_handler()
            });
            tracing::debug!(
                command = target.name(),
                instance = type_name::<T>(),
                "installed action chain"
            );
        });

        Registration::Installed
    }

    /// Returns true if `(B, T)` has been registered directly on `node`.
    pub fn is_registered<B: 'static, T: 'static>(&self, node: &CommandNode) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&RegistryKey::of::<B, T>(node))
    }

    /// Number of configure callbacks registered for `(B, T)` on `node`.
    pub fn callback_count<B: 'static, T: 'static>(&self, node: &CommandNode) -> usize {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(&RegistryKey::of::<B, T>(node))
            .and_then(|entry| Arc::clone(entry).downcast::<Configurer<B>>().ok())
            .map_or(0, |configurer| configurer.len())
    }
}

impl Default for Composer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Composer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("Composer").field("entries", &len).finish()
    }
}

fn instance_factory<B, T>(
    configurer: Arc<Configurer<B>>,
    create_builder: CreateBuilderFn<B>,
    build_instance: BuildInstanceFn<B, T>,
) -> InstanceFactory<T>
where
    B: 'static,
    T: Send + Sync + 'static,
{
    Arc::new(move |pr: &ParseResult| {
        let mut builder = create_builder(pr)?;
        for callback in configurer.snapshot() {
            callback(&mut builder, pr)?;
        }
        build_instance(builder, pr)
    })
}

/// Retrieves the `T` instance visible to the invoked command.
///
/// Walks the invoked node's handler chain from the outermost layer and
/// returns the first instance of type `T`, building it if necessary.
/// Returns `Ok(None)` if no layer provides `T`.
pub fn get_instance<T: Any + Send + Sync>(pr: &ParseResult) -> anyhow::Result<Option<Arc<T>>> {
    get_instance_from_node(pr.command(), pr)
}

/// Retrieves a `T` instance starting from `node`'s current handler.
pub fn get_instance_from_node<T: Any + Send + Sync>(
    node: &CommandNode,
    pr: &ParseResult,
) -> anyhow::Result<Option<Arc<T>>> {
    match node.handler() {
        Some(handler) => get_instance_from_handler(&handler, pr),
        None => Ok(None),
    }
}

/// Retrieves a `T` instance by unwrapping `handler`.
pub fn get_instance_from_handler<T: Any + Send + Sync>(
    handler: &Handler,
    pr: &ParseResult,
) -> anyhow::Result<Option<Arc<T>>> {
    let Some(slot) = handler.find_slot::<T>() else {
        return Ok(None);
    };
    let value = slot.get_any(pr)?;
    Ok(value.downcast::<T>().ok())
}

/// Returns the `T` instance for the invoked command only if already built.
pub fn peek_instance<T: Any + Send + Sync>(pr: &ParseResult) -> Option<Arc<T>> {
    peek_instance_from_node(pr.command())
}

/// Returns `node`'s `T` instance only if already built.
pub fn peek_instance_from_node<T: Any + Send + Sync>(node: &CommandNode) -> Option<Arc<T>> {
    let handler = node.handler()?;
    handler
        .find_slot::<T>()?
        .peek_any()
        .and_then(|value| value.downcast::<T>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{invoke, parse};
    use clap::Command;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct ListBuilder(Vec<&'static str>);

    fn joined(b: ListBuilder, _: &ParseResult) -> anyhow::Result<String> {
        Ok(b.0.join(","))
    }

    #[test]
    fn test_first_registration_installs_then_appends() {
        let composer = Composer::new();
        let root = CommandNode::named("app");

        let first = composer.register_default::<ListBuilder, String, _, _>(&root, joined, |b, _| {
            b.0.push("a");
            Ok(())
        });
        let depth = root.handler().unwrap().depth();
        let second = composer.register_default::<ListBuilder, String, _, _>(&root, joined, |b, _| {
            b.0.push("b");
            Ok(())
        });

        assert_eq!(first, Registration::Installed);
        assert_eq!(second, Registration::Appended);
        assert_eq!(root.handler().unwrap().depth(), depth);
        assert_eq!(composer.callback_count::<ListBuilder, String>(&root), 2);
        assert!(composer.is_registered::<ListBuilder, String>(&root));
        assert!(!composer.is_registered::<ListBuilder, u8>(&root));
    }

    #[test]
    fn test_callbacks_run_in_registration_order() {
        let composer = Composer::new();
        let root = CommandNode::named("app");
        for item in ["one", "two", "three"] {
            composer.register_default::<ListBuilder, String, _, _>(&root, joined, move |b, _| {
                b.0.push(item);
                Ok(())
            });
        }

        let pr = parse(&root, ["app"]).unwrap();
        let value = get_instance::<String>(&pr).unwrap().unwrap();
        assert_eq!(value.as_str(), "one,two,three");
    }

    #[test]
    fn test_callbacks_do_not_run_at_registration() {
        let composer = Composer::new();
        let root = CommandNode::named("app");
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        composer.register_default::<ListBuilder, String, _, _>(&root, joined, move |_, _| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        invoke(&root, ["app"]).unwrap();
        invoke(&root, ["app"]).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_distinct_keys_stack_layers() {
        let composer = Composer::new();
        let root = CommandNode::named("app");
        composer.register_default::<ListBuilder, String, _, _>(&root, joined, |_, _| Ok(()));
        composer.register_steps::<u64, _>(&root, |_| Ok(7), None, None);

        assert_eq!(root.handler().unwrap().depth(), 2);
        let pr = parse(&root, ["app"]).unwrap();
        assert_eq!(*get_instance::<u64>(&pr).unwrap().unwrap(), 7);
        assert!(get_instance::<String>(&pr).unwrap().is_some());
    }

    #[test]
    fn test_unregistered_type_is_none() {
        let composer = Composer::new();
        let root = CommandNode::named("app");
        composer.register_steps::<u64, _>(&root, |_| Ok(7), None, None);
        let pr = parse(&root, ["app"]).unwrap();
        assert!(get_instance::<i8>(&pr).unwrap().is_none());

        let bare = CommandNode::named("bare");
        let pr = parse(&bare, ["bare"]).unwrap();
        assert!(get_instance::<u64>(&pr).unwrap().is_none());
    }

    #[test]
    fn test_peek_does_not_build() {
        let composer = Composer::new();
        let root = CommandNode::named("app");
        composer.register_steps::<u64, _>(&root, |_| Ok(7), None, None);
        let pr = parse(&root, ["app"]).unwrap();

        assert!(peek_instance::<u64>(&pr).is_none());
        get_instance::<u64>(&pr).unwrap();
        assert_eq!(peek_instance::<u64>(&pr).as_deref(), Some(&7));
    }

    #[test]
    fn test_propagates_to_existing_children_with_separate_cells() {
        let composer = Composer::new();
        let root = CommandNode::new(Command::new("app").subcommand(Command::new("run")));
        let builds = Arc::new(AtomicUsize::new(0));
        let b = builds.clone();
        composer.register_steps::<usize, _>(
            &root,
            move |_| Ok(b.fetch_add(1, Ordering::SeqCst)),
            None,
            None,
        );

        let child = root.child("run").unwrap();
        assert_eq!(child.handler().unwrap().depth(), 1);

        let root_pr = parse(&root, ["app"]).unwrap();
        let child_pr = parse(&root, ["app", "run"]).unwrap();
        get_instance::<usize>(&root_pr).unwrap();
        get_instance::<usize>(&child_pr).unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_late_callbacks_reach_children() {
        let composer = Composer::new();
        let root = CommandNode::new(Command::new("app").subcommand(Command::new("run")));
        composer.register_default::<ListBuilder, String, _, _>(&root, joined, |b, _| {
            b.0.push("early");
            Ok(())
        });
        composer.register_default::<ListBuilder, String, _, _>(&root, joined, |b, _| {
            b.0.push("late");
            Ok(())
        });

        let pr = parse(&root, ["app", "run"]).unwrap();
        assert_eq!(get_instance::<String>(&pr).unwrap().unwrap().as_str(), "early,late");
    }

    #[test]
    fn test_construction_error_propagates_and_retries() {
        let composer = Composer::new();
        let root = CommandNode::named("app");
        let attempts = Arc::new(AtomicUsize::new(0));
        let a = attempts.clone();
        composer.register_default::<ListBuilder, String, _, _>(&root, joined, move |_, _| {
            if a.fetch_add(1, Ordering::SeqCst) == 0 {
                anyhow::bail!("config file unreadable");
            }
            Ok(())
        });

        let err = invoke(&root, ["app"]).unwrap_err();
        assert_eq!(err.to_string(), "config file unreadable");
        assert_eq!(invoke(&root, ["app"]).unwrap(), 0);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_instance_steps_receive_instance() {
        let composer = Composer::new();
        let root = CommandNode::named("app");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let before_seen = seen.clone();
        let after_seen = seen.clone();
        composer.register_steps::<u32, _>(
            &root,
            |_| Ok(11),
            Some(InstanceStep::sync(move |v: &u32, _| {
                before_seen.lock().unwrap().push(format!("before {v}"));
                Ok(())
            })),
            Some(InstanceStep::sync(move |v: &u32, _| {
                after_seen.lock().unwrap().push(format!("after {v}"));
                Ok(())
            })),
        );

        invoke(&root, ["app"]).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["before 11", "after 11"]);
    }

    #[test]
    fn test_later_registration_is_outer_layer() {
        let composer = Composer::new();
        let root = CommandNode::named("app");
        let log = Arc::new(Mutex::new(Vec::<String>::new()));

        for name in ["first", "second"] {
            let before = log.clone();
            let after = log.clone();
            let step_before = InstanceStep::sync(move |tag: &String, _| {
                before.lock().unwrap().push(format!("{tag}.before"));
                Ok(())
            });
            let step_after = InstanceStep::sync(move |tag: &String, _| {
                after.lock().unwrap().push(format!("{tag}.after"));
                Ok(())
            });
            // Distinct builder types give distinct keys for the same instance type.
            if name == "first" {
                composer.compose::<u8, String>(
                    &root,
                    Composition::new(|_| Ok(0u8), move |_, _| Ok(name.to_string()))
                        .before(step_before)
                        .after(step_after),
                    None,
                );
            } else {
                composer.compose::<u16, String>(
                    &root,
                    Composition::new(|_| Ok(0u16), move |_, _| Ok(name.to_string()))
                        .before(step_before)
                        .after(step_after),
                    None,
                );
            }
        }

        invoke(&root, ["app"]).unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["second.before", "first.before", "first.after", "second.after"]
        );
    }
}
