//! Structured logging scoped to a command.
//!
//! A [`LoggerFactory`] owns its own `tracing` dispatcher instead of installing
//! a global subscriber, so a library composed onto a command never fights
//! the application over `tracing::subscriber::set_global_default`.
//!
//! When a [`Configuration`] is registered on the same command, its
//! `logging.level` key sets the default level and `logging.levels.<target>`
//! keys add per-target directives. Configure callbacks run afterwards and
//! can override both.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tracing::level_filters::LevelFilter;
use tracing::{Dispatch, Level};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

use strand_dispatch::{
    get_instance, get_instance_from_node, CommandNode, Composer, ParseResult, Registration,
};

use crate::configuration::Configuration;

/// Logging settings collected from configure callbacks.
pub struct LoggingBuilder {
    level: LevelFilter,
    directives: Vec<String>,
    ansi: bool,
    with_target: bool,
    writer: Option<BoxMakeWriter>,
}

impl Default for LoggingBuilder {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            directives: Vec::new(),
            ansi: false,
            with_target: true,
            writer: None,
        }
    }
}

impl LoggingBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from the `logging` section of `config`.
    pub fn from_configuration(config: &Configuration) -> anyhow::Result<Self> {
        let mut builder = Self::new();
        if let Some(level) = config.get_str("logging.level") {
            builder.set_level_str(&level)?;
        }
        for (target, level) in config.section("logging.levels").iter() {
            let level = match level {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            builder.add_directive(format!("{target}={level}"));
        }
        Ok(builder)
    }

    /// Minimum level for events without a more specific directive.
    pub fn set_level(&mut self, level: impl Into<LevelFilter>) -> &mut Self {
        self.level = level.into();
        self
    }

    /// Parses a level name such as `warn` or `off`.
    pub fn set_level_str(&mut self, level: &str) -> anyhow::Result<&mut Self> {
        let level = LevelFilter::from_str(level.trim())
            .map_err(|_| anyhow::anyhow!("invalid log level: {level}"))?;
        Ok(self.set_level(level))
    }

    /// Adds an `EnvFilter` directive, e.g. `hyper=warn` or `app::db=trace`.
    pub fn add_directive(&mut self, directive: impl Into<String>) -> &mut Self {
        self.directives.push(directive.into());
        self
    }

    pub fn ansi(&mut self, enabled: bool) -> &mut Self {
        self.ansi = enabled;
        self
    }

    pub fn with_target(&mut self, enabled: bool) -> &mut Self {
        self.with_target = enabled;
        self
    }

    /// Sends output to `writer` instead of stderr.
    pub fn writer(&mut self, writer: BoxMakeWriter) -> &mut Self {
        self.writer = Some(writer);
        self
    }

    pub fn level(&self) -> LevelFilter {
        self.level
    }

    /// Builds the filter and subscriber.
    pub fn build(self) -> anyhow::Result<LoggerFactory> {
        let filter_str = std::iter::once(self.level.to_string().to_lowercase())
            .chain(self.directives.iter().cloned())
            .collect::<Vec<_>>()
            .join(",");
        let filter = EnvFilter::try_new(&filter_str)
            .map_err(|e| anyhow::anyhow!("invalid logging directives {filter_str:?}: {e}"))?;
        let writer = self
            .writer
            .unwrap_or_else(|| BoxMakeWriter::new(std::io::stderr));

        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(self.ansi)
            .with_target(self.with_target)
            .with_writer(writer)
            .finish();

        Ok(LoggerFactory {
            dispatch: Dispatch::new(subscriber),
            level: self.level,
        })
    }
}

impl fmt::Debug for LoggingBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggingBuilder")
            .field("level", &self.level)
            .field("directives", &self.directives)
            .field("ansi", &self.ansi)
            .finish()
    }
}

/// Creates [`Logger`]s that write through one dispatcher.
#[derive(Clone)]
pub struct LoggerFactory {
    dispatch: Dispatch,
    level: LevelFilter,
}

impl LoggerFactory {
    /// A logger whose events carry `category`.
    pub fn logger(&self, category: impl Into<String>) -> Logger {
        Logger {
            category: Arc::from(category.into()),
            dispatch: self.dispatch.clone(),
        }
    }

    /// Runs `f` with this factory's dispatcher as the thread's default, so
    /// plain `tracing` macros inside it are captured too.
    pub fn in_scope<R>(&self, f: impl FnOnce() -> R) -> R {
        tracing::dispatcher::with_default(&self.dispatch, f)
    }

    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    /// The default minimum level.
    pub fn level(&self) -> LevelFilter {
        self.level
    }
}

impl fmt::Debug for LoggerFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggerFactory")
            .field("level", &self.level)
            .finish()
    }
}

/// Leveled event writer bound to a category.
#[derive(Clone)]
pub struct Logger {
    category: Arc<str>,
    dispatch: Dispatch,
}

impl Logger {
    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn log(&self, level: Level, message: impl fmt::Display) {
        let category = &*self.category;
        tracing::dispatcher::with_default(&self.dispatch, || match level {
            Level::ERROR => tracing::error!(category, "{message}"),
            Level::WARN => tracing::warn!(category, "{message}"),
            Level::INFO => tracing::info!(category, "{message}"),
            Level::DEBUG => tracing::debug!(category, "{message}"),
            _ => tracing::trace!(category, "{message}"),
        });
    }

    pub fn error(&self, message: impl fmt::Display) {
        self.log(Level::ERROR, message);
    }

    pub fn warn(&self, message: impl fmt::Display) {
        self.log(Level::WARN, message);
    }

    pub fn info(&self, message: impl fmt::Display) {
        self.log(Level::INFO, message);
    }

    pub fn debug(&self, message: impl fmt::Display) {
        self.log(Level::DEBUG, message);
    }

    pub fn trace(&self, message: impl fmt::Display) {
        self.log(Level::TRACE, message);
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("category", &self.category)
            .finish()
    }
}

fn create_builder(pr: &ParseResult) -> anyhow::Result<LoggingBuilder> {
    match get_instance_from_node::<Configuration>(pr.command(), pr)? {
        Some(config) => LoggingBuilder::from_configuration(&config),
        None => Ok(LoggingBuilder::new()),
    }
}

/// Registers a configure callback for the node's logger factory.
pub fn register<F>(composer: &Composer, node: &CommandNode, configure: F) -> Registration
where
    F: Fn(&mut LoggingBuilder, &ParseResult) -> anyhow::Result<()> + Send + Sync + 'static,
{
    composer.register::<LoggingBuilder, LoggerFactory, _, _, _>(
        node,
        create_builder,
        |builder, _| builder.build(),
        configure,
    )
}

/// The logger factory of the invoked command, if one is registered.
pub fn logger_factory(pr: &ParseResult) -> anyhow::Result<Option<Arc<LoggerFactory>>> {
    get_instance::<LoggerFactory>(pr)
}

#[cfg(test)]
pub(crate) mod testing {
    use std::io;
    use std::sync::{Arc, Mutex};

    use tracing_subscriber::fmt::writer::BoxMakeWriter;

    /// In-memory log sink shared between the test and the subscriber.
    #[derive(Clone, Default)]
    pub struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Capture {
        pub fn writer(&self) -> BoxMakeWriter {
            let capture = self.clone();
            BoxMakeWriter::new(move || capture.clone())
        }

        pub fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}
