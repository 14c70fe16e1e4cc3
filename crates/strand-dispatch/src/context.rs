//! The parse result handed to handlers, steps and factories.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use clap::ArgMatches;

use crate::dispatch::{get_deepest_matches, path_to_string};
use crate::error::DispatchError;
use crate::node::CommandNode;

/// Exit code returned by handlers.
pub type ExitCode = i32;

struct ParseInner {
    root: CommandNode,
    command: CommandNode,
    command_path: Vec<String>,
    matches: ArgMatches,
}

/// The outcome of parsing a command line against a command tree.
///
/// Cheap to clone; clones share the same underlying matches. Besides clap's
/// [`ArgMatches`], it records which [`CommandNode`] was invoked so that
/// instance retrieval can start from that node's handler.
#[derive(Clone)]
pub struct ParseResult {
    inner: Arc<ParseInner>,
}

impl ParseResult {
    /// Creates a parse result for an already-resolved command.
    pub fn new(
        root: CommandNode,
        command: CommandNode,
        command_path: Vec<String>,
        matches: ArgMatches,
    ) -> Self {
        Self {
            inner: Arc::new(ParseInner {
                root,
                command,
                command_path,
                matches,
            }),
        }
    }

    /// The root of the tree that was parsed.
    pub fn root(&self) -> &CommandNode {
        &self.inner.root
    }

    /// The node that was invoked (the deepest matched subcommand).
    pub fn command(&self) -> &CommandNode {
        &self.inner.command
    }

    /// The subcommand path from the root, e.g. `["db", "migrate"]`.
    pub fn command_path(&self) -> &[String] {
        &self.inner.command_path
    }

    /// Matches for the whole command line, starting at the root.
    pub fn matches(&self) -> &ArgMatches {
        &self.inner.matches
    }

    /// Matches for the invoked command.
    pub fn command_matches(&self) -> &ArgMatches {
        get_deepest_matches(&self.inner.matches)
    }

    /// Reads a typed argument value of the invoked command.
    ///
    /// Returns `Ok(None)` when the argument exists but was not given, and an
    /// error when the command defines no such argument or the type differs.
    pub fn get_one<T>(&self, id: &str) -> Result<Option<T>, DispatchError>
    where
        T: Any + Clone + Send + Sync + 'static,
    {
        self.command_matches()
            .try_get_one::<T>(id)
            .map(|value| value.cloned())
            .map_err(|source| self.argument_error(id, source))
    }

    /// Reads a boolean flag of the invoked command.
    pub fn get_flag(&self, id: &str) -> Result<bool, DispatchError> {
        self.get_one::<bool>(id).map(|v| v.unwrap_or(false))
    }

    fn argument_error(&self, id: &str, source: clap::parser::MatchesError) -> DispatchError {
        DispatchError::Argument {
            id: id.to_string(),
            command: self.command().name().to_string(),
            source,
        }
    }
}

impl fmt::Debug for ParseResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParseResult")
            .field("command", &self.command().name())
            .field("command_path", &path_to_string(self.command_path()))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::parse;
    use clap::{Arg, ArgAction, Command};

    fn root() -> CommandNode {
        CommandNode::new(
            Command::new("app").subcommand(
                Command::new("greet")
                    .arg(Arg::new("name").long("name"))
                    .arg(Arg::new("loud").long("loud").action(ArgAction::SetTrue)),
            ),
        )
    }

    #[test]
    fn test_reads_invoked_command_arguments() {
        let pr = parse(&root(), ["app", "greet", "--name", "ada", "--loud"]).unwrap();
        assert_eq!(pr.command().name(), "greet");
        assert_eq!(pr.command_path(), &["greet".to_string()]);
        assert_eq!(pr.get_one::<String>("name").unwrap(), Some("ada".to_string()));
        assert!(pr.get_flag("loud").unwrap());
    }

    #[test]
    fn test_missing_optional_argument_is_none() {
        let pr = parse(&root(), ["app", "greet"]).unwrap();
        assert_eq!(pr.get_one::<String>("name").unwrap(), None);
        assert!(!pr.get_flag("loud").unwrap());
    }

    #[test]
    fn test_undefined_argument_is_an_error() {
        let pr = parse(&root(), ["app", "greet"]).unwrap();
        let err = pr.get_one::<String>("nope").unwrap_err();
        assert!(matches!(err, DispatchError::Argument { ref id, .. } if id == "nope"));
    }

    #[test]
    fn test_clones_share_matches() {
        let pr = parse(&root(), ["app", "greet"]).unwrap();
        let other = pr.clone();
        assert!(std::ptr::eq(pr.matches(), other.matches()));
    }
}
