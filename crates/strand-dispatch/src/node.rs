//! Command tree nodes.
//!
//! A [`CommandNode`] is one command in the tree: the caller's clap definition,
//! a replaceable handler, and child nodes.
//! Nodes are shared handles; cloning one clones the handle, not the command.
//!
//! The tree is owned by the caller. Composition only ever touches a node by
//! replacing its handler.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use clap::Command;

use crate::handler::Handler;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a [`CommandNode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    fn next() -> Self {
        NodeId(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct NodeInner {
    id: NodeId,
    definition: Command,
    handler: RwLock<Option<Handler>>,
    children: RwLock<Vec<CommandNode>>,
}

/// A command in the tree.
///
/// # Example
///
/// ```rust
/// use clap::{Arg, Command};
/// use strand_dispatch::{CommandNode, Handler};
///
/// let root = CommandNode::new(Command::new("app"))
///     .subcommand(
///         CommandNode::new(Command::new("greet").arg(Arg::new("name").long("name")))
///             .with_handler(Handler::sync(|_pr| Ok(0))),
///     );
///
/// assert_eq!(root.children().len(), 1);
/// ```
#[derive(Clone)]
pub struct CommandNode {
    inner: Arc<NodeInner>,
}

impl CommandNode {
    /// Creates a node from a clap command.
    ///
    /// Subcommands already present on `command` become child nodes
    /// (recursively). The command itself is kept whole, so aliases, groups
    /// and settings parse exactly as clap would parse them.
    pub fn new(command: Command) -> Self {
        let children = command
            .get_subcommands()
            .map(|sub| CommandNode::new(sub.clone()))
            .collect();
        Self {
            inner: Arc::new(NodeInner {
                id: NodeId::next(),
                definition: command,
                handler: RwLock::new(None),
                children: RwLock::new(children),
            }),
        }
    }

    /// Creates a node with no arguments.
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(Command::new(name.into()))
    }

    /// Returns this node's identity.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Returns the command name.
    pub fn name(&self) -> &str {
        self.inner.definition.get_name()
    }

    /// Returns the current handler, if any.
    pub fn handler(&self) -> Option<Handler> {
        self.inner
            .handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replaces the handler.
    pub fn set_handler(&self, handler: Handler) {
        *self
            .inner
            .handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    /// Replaces the handler with one computed from the current one.
    ///
    /// The read and the replacement happen under one write lock, so two
    /// concurrent wrappers never lose each other's layer.
    pub fn wrap_handler<F>(&self, wrap: F)
    where
        F: FnOnce(Option<Handler>) -> Handler,
    {
        let mut slot = self
            .inner
            .handler
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let current = slot.take();
        *slot = Some(wrap(current));
    }

    /// Builder-style [`set_handler`](Self::set_handler).
    pub fn with_handler(self, handler: Handler) -> Self {
        self.set_handler(handler);
        self
    }

    /// Returns a snapshot of the current children.
    pub fn children(&self) -> Vec<CommandNode> {
        self.inner
            .children
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Appends a child node.
    pub fn add_child(&self, child: CommandNode) {
        self.inner
            .children
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(child);
    }

    /// Builder-style [`add_child`](Self::add_child).
    pub fn subcommand(self, child: CommandNode) -> Self {
        self.add_child(child);
        self
    }

    /// Finds a direct child by name.
    pub fn child(&self, name: &str) -> Option<CommandNode> {
        self.children().into_iter().find(|c| c.name() == name)
    }

    /// Follows a path of subcommand names from this node.
    ///
    /// An empty path returns this node.
    pub fn find_path<S: AsRef<str>>(&self, path: &[S]) -> Option<CommandNode> {
        let mut current = self.clone();
        for name in path {
            current = current.child(name.as_ref())?;
        }
        Some(current)
    }

    /// Builds the clap command for this node and all current descendants.
    ///
    /// Children that came from the original definition replace their
    /// subcommand in place; children added later are appended.
    pub fn to_command(&self) -> Command {
        let definition = &self.inner.definition;
        self.children()
            .iter()
            .fold(definition.clone(), |cmd, child| {
                let declared = definition
                    .get_subcommands()
                    .any(|sub| sub.get_name() == child.name());
                if declared {
                    cmd.mut_subcommand(child.name(), |_| child.to_command())
                } else {
                    cmd.subcommand(child.to_command())
                }
            })
    }

    /// Returns true if both handles refer to the same node.
    pub fn ptr_eq(&self, other: &CommandNode) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for CommandNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandNode")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("handler", &self.handler())
            .field("children", &self.children().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::{Arg, ArgGroup};

    fn tree() -> CommandNode {
        CommandNode::new(
            Command::new("app")
                .about("demo")
                .arg(Arg::new("verbose").long("verbose").action(clap::ArgAction::SetTrue))
                .subcommand(Command::new("db").subcommand(Command::new("migrate")))
                .subcommand(Command::new("list")),
        )
    }

    #[test]
    fn test_new_lifts_subcommands_into_children() {
        let root = tree();
        let names: Vec<_> = root.children().iter().map(|c| c.name().to_string()).collect();
        assert_eq!(names, vec!["db", "list"]);
        assert_eq!(root.child("db").unwrap().children()[0].name(), "migrate");
    }

    #[test]
    fn test_ids_are_unique() {
        let a = CommandNode::named("a");
        let b = CommandNode::named("a");
        assert_ne!(a.id(), b.id());
        assert!(a.ptr_eq(&a.clone()));
        assert!(!a.ptr_eq(&b));
    }

    #[test]
    fn test_find_path() {
        let root = tree();
        assert_eq!(root.find_path(&["db", "migrate"]).unwrap().name(), "migrate");
        assert!(root.find_path(&["db", "rollback"]).is_none());
        let empty: [&str; 0] = [];
        assert!(root.find_path(&empty).unwrap().ptr_eq(&root));
    }

    #[test]
    fn test_to_command_round_trips_structure() {
        let root = tree();
        root.add_child(CommandNode::named("late"));
        let cmd = root.to_command();
        let matches = cmd
            .try_get_matches_from(["app", "--verbose", "db", "migrate"])
            .unwrap();
        assert!(matches.get_flag("verbose"));
        assert_eq!(matches.subcommand_name(), Some("db"));

        let cmd = root.to_command();
        assert!(cmd.try_get_matches_from(["app", "late"]).is_ok());
    }

    #[test]
    fn test_wrap_handler_sees_current() {
        let node = CommandNode::named("x");
        node.wrap_handler(|current| {
            assert!(current.is_none());
            Handler::sync(|_| Ok(1))
        });
        node.wrap_handler(|current| {
            assert!(current.is_some());
            Handler::sync(|_| Ok(2))
        });
        assert!(node.handler().is_some());
    }

    #[test]
    fn test_to_command_keeps_subcommand_aliases() {
        let root = CommandNode::new(
            Command::new("app").subcommand(Command::new("list").visible_alias("ls")),
        );
        let matches = root.to_command().try_get_matches_from(["app", "ls"]).unwrap();
        assert_eq!(matches.subcommand_name(), Some("list"));
    }

    #[test]
    fn test_to_command_keeps_required_groups() {
        let root = CommandNode::new(
            Command::new("app")
                .arg(Arg::new("a").long("a").action(clap::ArgAction::SetTrue))
                .arg(Arg::new("b").long("b").action(clap::ArgAction::SetTrue))
                .group(ArgGroup::new("mode").args(["a", "b"]).required(true)),
        );
        assert!(root.to_command().try_get_matches_from(["app"]).is_err());
        assert!(root.to_command().try_get_matches_from(["app", "--a"]).is_ok());
    }

    #[test]
    fn test_to_command_keeps_settings() {
        let root = CommandNode::new(
            Command::new("app")
                .subcommand_required(true)
                .subcommand(Command::new("list")),
        );
        assert!(root.to_command().try_get_matches_from(["app"]).is_err());
        assert!(root.to_command().try_get_matches_from(["app", "list"]).is_ok());
    }

    #[test]
    fn test_to_command_keeps_nested_definitions_and_late_children() {
        let root = CommandNode::new(
            Command::new("app").subcommand(
                Command::new("db")
                    .visible_alias("database")
                    .subcommand_required(true)
                    .subcommand(Command::new("migrate")),
            ),
        );
        root.child("db").unwrap().add_child(CommandNode::named("seed"));

        let cmd = root.to_command();
        let matches = cmd
            .clone()
            .try_get_matches_from(["app", "database", "seed"])
            .unwrap();
        assert_eq!(matches.subcommand_name(), Some("db"));
        assert!(cmd.try_get_matches_from(["app", "db"]).is_err());
    }
}
