//! Configuration, services, hosting and logging for clap command trees.
//!
//! `strand` composes small extensions onto the commands of a
//! [`CommandNode`] tree. Every extension is an action-chain layer from
//! [`strand_dispatch`]: it builds its object lazily, once per command, and
//! may run steps before and after the handler. Extensions do not know about
//! each other; they find each other's objects through the invoked command.
//!
//! # Modules
//!
//! - [`configuration`]: layered key/value configuration (memory, JSON, YAML, command line)
//! - [`services`]: a type-keyed service container
//! - [`hosting`]: hosted services started before and stopped after the handler
//! - [`logging`]: a `tracing` dispatcher owned by the command
//! - [`instrument`]: invocation timing
//! - [`runner`]: turns a tree into a program with an exit code
//!
//! # Example
//!
//! ```rust
//! use strand::{configuration, CommandExt, CommandNode, Handler, Runner};
//!
//! let root = CommandNode::named("app").with_handler(Handler::sync(|pr| {
//!     let config = configuration(pr)?.expect("configured");
//!     Ok(config.get_parsed::<i32>("exit")?.unwrap_or(0))
//! }));
//! root.use_configuration(|config, _| {
//!     config.add_in_memory([("exit", "4")]);
//!     Ok(())
//! });
//!
//! assert_eq!(Runner::new(root).run(["app"]), 4);
//! ```
//!
//! Extensions registered later wrap those registered earlier. Register
//! everything before the first run.

pub mod configuration;
mod ext;
pub mod hosting;
pub mod instrument;
pub mod logging;
pub mod runner;
pub mod services;

pub use configuration::{configuration, ConfigError, Configuration, ConfigurationBuilder};
pub use ext::CommandExt;
pub use hosting::{host, Host, HostBuilder, HostedService};
pub use instrument::{timer, InvocationTimer};
pub use logging::{logger_factory, Logger, LoggerFactory, LoggingBuilder};
pub use runner::Runner;
pub use services::{services, ServiceCollection, ServiceProvider};

// Re-export the composition core
pub use strand_dispatch::{
    dispatch, get_instance, ActionChain, CancellationSignal, CancellationSource, CommandNode,
    Composer, DispatchError, ExitCode, Handler, InstanceStep, ParseResult, Registration, Step,
};

// Re-export async_trait for implementing HostedService
pub use async_trait::async_trait;
