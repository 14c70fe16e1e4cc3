//! Before and after steps for action chains.
//!
//! Steps are the unit of cross-cutting behavior: an extension that wants to
//! run something around a command (start a host, open a log scope, time the
//! invocation) contributes a step to the chain it installs.
//!
//! ```text
//! parsed command line
//!   → ensure lazy instance
//!   → BEFORE STEP      (setup, may fail and skip the handler)
//!   → wrapped handler  (the next layer, or the user's handler)
//!   → AFTER STEP       (cleanup, always runs)
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::cancel::CancellationSignal;
use crate::context::ParseResult;

/// Synchronous step function.
pub type SyncStepFn = Arc<dyn Fn(&ParseResult) -> anyhow::Result<()> + Send + Sync>;

/// Asynchronous step function.
pub type AsyncStepFn = Arc<
    dyn Fn(ParseResult, CancellationSignal) -> BoxFuture<'static, anyhow::Result<()>>
        + Send
        + Sync,
>;

/// A function run before or after the wrapped handler.
#[derive(Clone)]
pub enum Step {
    /// Runs to completion on the calling thread
    Sync(SyncStepFn),
    /// Must be awaited; makes the enclosing chain asynchronous
    Async(AsyncStepFn),
}

impl Step {
    /// Creates a synchronous step.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&ParseResult) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Step::Sync(Arc::new(f))
    }

    /// Creates an asynchronous step from a function returning a future.
    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(ParseResult, CancellationSignal) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Step::Async(Arc::new(move |pr, cancel| f(pr, cancel).boxed()))
    }

    /// Returns true if this step must be awaited.
    pub fn is_async(&self) -> bool {
        matches!(self, Step::Async(_))
    }

    /// Runs a synchronous step. Only called on chains that are not async.
    pub(crate) fn run(&self, pr: &ParseResult) -> anyhow::Result<()> {
        match self {
            Step::Sync(f) => f(pr),
            Step::Async(_) => Err(anyhow::anyhow!(
                "asynchronous step reached the synchronous dispatch path"
            )),
        }
    }

    /// Runs the step on the async path. Sync steps run inline.
    pub(crate) async fn run_async(
        &self,
        pr: &ParseResult,
        cancel: &CancellationSignal,
    ) -> anyhow::Result<()> {
        match self {
            Step::Sync(f) => f(pr),
            Step::Async(f) => f(pr.clone(), cancel.clone()).await,
        }
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Sync(_) => f.write_str("Step::Sync"),
            Step::Async(_) => f.write_str("Step::Async"),
        }
    }
}
