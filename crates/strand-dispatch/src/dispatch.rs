//! The invocation driver.
//!
//! Parses a command line against a [`CommandNode`] tree, resolves the
//! invoked node and runs its handler through the sync or async path. This
//! is the thin engine the composition layer plugs into; it does not format
//! errors or print help, it only returns them.

use std::ffi::OsString;

use clap::ArgMatches;

use crate::cancel::CancellationSignal;
use crate::context::{ExitCode, ParseResult};
use crate::error::DispatchError;
use crate::node::CommandNode;

/// Parses `args` (including the program name) against the tree at `root`.
pub fn parse<I, T>(root: &CommandNode, args: I) -> Result<ParseResult, DispatchError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = root.to_command().try_get_matches_from(args)?;
    let path = extract_command_path(&matches);
    let command = root
        .find_path(&path)
        .ok_or_else(|| DispatchError::UnknownCommand(path_to_string(&path)))?;
    Ok(ParseResult::new(root.clone(), command, path, matches))
}

/// Parses and runs the invoked handler on the calling thread.
///
/// A command without a handler exits with 0.
pub fn invoke<I, T>(root: &CommandNode, args: I) -> anyhow::Result<ExitCode>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let pr = parse(root, args)?;
    invoke_parsed(&pr)
}

/// Runs the handler of an already parsed command on the calling thread.
pub fn invoke_parsed(pr: &ParseResult) -> anyhow::Result<ExitCode> {
    match pr.command().handler() {
        Some(handler) => handler.invoke(pr),
        None => Ok(0),
    }
}

/// Parses and runs the invoked handler through the async path.
pub async fn invoke_async<I, T>(
    root: &CommandNode,
    args: I,
    cancel: CancellationSignal,
) -> anyhow::Result<ExitCode>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let pr = parse(root, args)?;
    invoke_parsed_async(pr, cancel).await
}

/// Runs the handler of an already parsed command through the async path.
pub async fn invoke_parsed_async(
    pr: ParseResult,
    cancel: CancellationSignal,
) -> anyhow::Result<ExitCode> {
    match pr.command().handler() {
        Some(handler) => handler.invoke_async(pr, cancel).await,
        None => Ok(0),
    }
}

/// Extracts the command path from ArgMatches by following the subcommand chain.
///
/// For example, `myapp db migrate` produces `["db", "migrate"]`.
pub fn extract_command_path(matches: &ArgMatches) -> Vec<String> {
    let mut path = Vec::new();
    let mut current = matches;

    while let Some((name, sub)) = current.subcommand() {
        path.push(name.to_string());
        current = sub;
    }

    path
}

/// Gets the matches of the most deeply nested subcommand.
pub fn get_deepest_matches(matches: &ArgMatches) -> &ArgMatches {
    let mut current = matches;

    while let Some((_, sub)) = current.subcommand() {
        current = sub;
    }

    current
}

/// Converts a command path to a space-separated string, as typed.
///
/// For example, `["db", "migrate"]` becomes `"db migrate"`.
pub fn path_to_string(path: &[String]) -> String {
    path.join(" ")
}
