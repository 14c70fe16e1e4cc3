//! Composable action chains and lazily built instances for clap command trees.
//!
//! `strand-dispatch` lets independent extensions attach behavior to the same
//! command without knowing about each other. Each one registers a configure
//! callback; the first registration for a key installs an action chain on
//! the command and all of its current descendants, later ones just add
//! their callback to the list.
//!
//! # Features
//!
//! - **Command tree**: [`CommandNode`] wraps a clap `Command` with a mutable handler
//! - **Action chains**: before/after steps around a handler, cleanup always runs
//! - **Lazy instances**: built exactly once per command, on first use
//! - **Composition**: [`Composer`] merges callbacks from unrelated extensions
//! - **Sync and async**: async anywhere in a chain makes the whole chain async
//! - **Cancellation**: a [`CancellationSignal`] reaches every async step and handler
//!
//! # Example
//!
//! ```rust
//! use strand_dispatch::{dispatch, get_instance, CommandNode, Composer, Handler};
//!
//! #[derive(Default)]
//! struct SettingsBuilder(Vec<(String, String)>);
//! struct Settings(Vec<(String, String)>);
//!
//! let composer = Composer::new();
//! let root = CommandNode::named("app").with_handler(Handler::sync(|pr| {
//!     let settings = get_instance::<Settings>(pr)?.expect("settings registered");
//!     Ok(settings.0.len() as i32)
//! }));
//!
//! for (key, value) in [("x", "1"), ("y", "2")] {
//!     composer.register_default::<SettingsBuilder, Settings, _, _>(
//!         &root,
//!         |b, _| Ok(Settings(b.0)),
//!         move |b, _| {
//!             b.0.push((key.into(), value.into()));
//!             Ok(())
//!         },
//!     );
//! }
//!
//! assert_eq!(dispatch::invoke(&root, ["app"])?, 2);
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! Registration must finish before the first invocation. Children added to
//! the tree after a registration do not receive its chain.

mod cancel;
mod chain;
mod composer;
mod context;
pub mod dispatch;
mod error;
mod handler;
mod lazy;
mod node;
mod propagate;
mod step;

pub use cancel::{CancellationSignal, CancellationSource};
pub use chain::ActionChain;
pub use composer::{
    get_instance, get_instance_from_handler, get_instance_from_node, peek_instance,
    peek_instance_from_node, BuildInstanceFn, Composer, Composition, ConfigureFn,
    CreateBuilderFn, InstanceStep, Registration,
};
pub use context::{ExitCode, ParseResult};
pub use error::{BoxError, CleanupError, DispatchError, StepPhase};
pub use handler::{AsyncHandlerFn, Handler, Layers, SyncHandlerFn};
pub use lazy::{InstanceFactory, InstanceSlot, LazyInstanceCell};
pub use node::{CommandNode, NodeId};
pub use propagate::propagate;
pub use step::{AsyncStepFn, Step, SyncStepFn};
