//! Error types for dispatch and chain execution.

use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

/// Boxed error used where an `anyhow::Error` must be carried as a source.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Programmer errors raised by the invocation driver.
///
/// These indicate a mismatch between how the tree was built and how it is
/// being used, as opposed to failures raised by handlers themselves.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The command line did not parse (includes `--help` and `--version`).
    #[error(transparent)]
    Parse(#[from] clap::Error),

    /// An asynchronous handler was invoked through the synchronous path.
    #[error("handler for '{command}' is asynchronous and must be invoked with invoke_async")]
    AsyncRequired {
        /// Name of the command whose handler was invoked
        command: String,
    },

    /// The parsed subcommand path has no matching node in the tree.
    #[error("no command node matches path '{0}'")]
    UnknownCommand(String),

    /// An argument was read that the invoked command never defined.
    #[error("argument '{id}' cannot be read from command '{command}': {source}")]
    Argument {
        /// The argument id that was requested
        id: String,
        /// Name of the invoked command
        command: String,
        /// clap's description of the mismatch
        #[source]
        source: clap::parser::MatchesError,
    },
}

/// Which step of an action chain produced an error.
///
/// Attached as `anyhow` context to errors returned by before/after steps so
/// callers can tell where a failure originated with `downcast_ref`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPhase {
    /// The step that runs before the wrapped handler
    Before,
    /// The step that runs after the wrapped handler
    After,
}

impl fmt::Display for StepPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepPhase::Before => write!(f, "before step failed"),
            StepPhase::After => write!(f, "after step failed"),
        }
    }
}

/// An after step failed while the chain was already unwinding a failure.
///
/// The cleanup failure is the `source`; the failure that triggered the
/// unwinding is kept in `original` so it is never lost.
#[derive(Debug, Error)]
#[error("cleanup failed while handling an earlier error: {original}")]
pub struct CleanupError {
    /// The error raised by the after step
    #[source]
    pub cleanup: BoxError,
    /// The error raised by the before step or the wrapped handler
    pub original: BoxError,
}

impl CleanupError {
    /// Creates a cleanup error from the two failures.
    pub fn new(cleanup: anyhow::Error, original: anyhow::Error) -> Self {
        Self {
            cleanup: cleanup.into(),
            original: original.into(),
        }
    }
}
