//! Extension methods on [`CommandNode`].
//!
//! Each method registers with [`Composer::global`], applies to the node and
//! its current children, and returns the node for chaining:
//!
//! ```rust
//! use strand::{CommandExt, CommandNode};
//!
//! let root = CommandNode::named("app");
//! root.use_configuration(|config, _| {
//!         config.add_in_memory([("logging.level", "warn")]);
//!         Ok(())
//!     })
//!     .use_logging(|_, _| Ok(()))
//!     .use_timing();
//! ```
//!
//! Use the `register` functions of each module to target an explicit
//! [`Composer`] instead.

use strand_dispatch::{CommandNode, Composer, ParseResult};

use crate::configuration::{self, ConfigurationBuilder};
use crate::hosting::{self, HostBuilder};
use crate::instrument;
use crate::logging::{self, LoggingBuilder};
use crate::services::{self, ServiceCollection};

/// Composes the strand extensions onto a command node.
pub trait CommandExt {
    /// Adds configuration sources.
    fn use_configuration<F>(&self, configure: F) -> &Self
    where
        F: Fn(&mut ConfigurationBuilder, &ParseResult) -> anyhow::Result<()>
            + Send
            + Sync
            + 'static;

    /// Adds service registrations.
    fn use_services<F>(&self, configure: F) -> &Self
    where
        F: Fn(&mut ServiceCollection, &ParseResult) -> anyhow::Result<()> + Send + Sync + 'static;

    /// Adds logging settings.
    fn use_logging<F>(&self, configure: F) -> &Self
    where
        F: Fn(&mut LoggingBuilder, &ParseResult) -> anyhow::Result<()> + Send + Sync + 'static;

    /// Adds hosted services. Makes the command asynchronous.
    ///
    /// The host is built once per command and starts at most once, so a
    /// second invocation of the same tree in one process fails with
    /// "host has already stopped". Build a fresh tree for each run.
    fn use_host<F>(&self, configure: F) -> &Self
    where
        F: Fn(&mut HostBuilder, &ParseResult) -> anyhow::Result<()> + Send + Sync + 'static;

    /// Times every invocation.
    fn use_timing(&self) -> &Self;
}

impl CommandExt for CommandNode {
    fn use_configuration<F>(&self, configure: F) -> &Self
    where
        F: Fn(&mut ConfigurationBuilder, &ParseResult) -> anyhow::Result<()>
            + Send
            + Sync
            + 'static,
    {
        configuration::register(Composer::global(), self, configure);
        self
    }

    fn use_services<F>(&self, configure: F) -> &Self
    where
        F: Fn(&mut ServiceCollection, &ParseResult) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        services::register(Composer::global(), self, configure);
        self
    }

    fn use_logging<F>(&self, configure: F) -> &Self
    where
        F: Fn(&mut LoggingBuilder, &ParseResult) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        logging::register(Composer::global(), self, configure);
        self
    }

    fn use_host<F>(&self, configure: F) -> &Self
    where
        F: Fn(&mut HostBuilder, &ParseResult) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        hosting::register(Composer::global(), self, configure);
        self
    }

    fn use_timing(&self) -> &Self {
        instrument::register_timing(Composer::global(), self);
        self
    }
}
