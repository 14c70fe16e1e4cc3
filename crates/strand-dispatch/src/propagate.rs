//! Applying a transformation to a command and all of its descendants.

use crate::node::CommandNode;

/// Applies `transform` to `node`, then recursively to every current child.
///
/// Propagation is a snapshot: children added afterwards are not visited.
/// Nothing here deduplicates, so calling it twice for the same purpose
/// transforms every node twice; [`Composer`](crate::Composer) guards
/// against that per registry key.
pub fn propagate<F>(node: &CommandNode, transform: &mut F)
where
    F: FnMut(&CommandNode),
{
    transform(node);
    for child in node.children() {
        propagate(&child, transform);
    }
}
