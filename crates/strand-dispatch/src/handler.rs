//! Invocation handlers.
//!
//! A [`Handler`] is what runs when a command is invoked. It comes in three
//! shapes, and the shape decides which dispatch path may run it:
//!
//! | Shape | Sync path ([`Handler::invoke`]) | Async path ([`Handler::invoke_async`]) |
//! |-------|------|-------|
//! | [`Handler::Sync`] | yes | yes (runs inline) |
//! | [`Handler::Async`] | no | yes |
//! | [`Handler::Decorated`] | iff no layer is async | yes |
//!
//! Decoration never changes the shape it does not have to: wrapping a sync
//! handler with sync steps stays sync, and one async step anywhere makes the
//! whole chain async.

use std::any::{Any, TypeId};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::cancel::CancellationSignal;
use crate::chain::ActionChain;
use crate::context::{ExitCode, ParseResult};
use crate::error::DispatchError;
use crate::lazy::InstanceSlot;

/// Synchronous handler function.
pub type SyncHandlerFn = Arc<dyn Fn(&ParseResult) -> anyhow::Result<ExitCode> + Send + Sync>;

/// Asynchronous handler function.
pub type AsyncHandlerFn = Arc<
    dyn Fn(ParseResult, CancellationSignal) -> BoxFuture<'static, anyhow::Result<ExitCode>>
        + Send
        + Sync,
>;

/// A command's invocation behavior.
#[derive(Clone)]
pub enum Handler {
    /// Runs to completion on the calling thread
    Sync(SyncHandlerFn),
    /// Returns a future driven by the caller's runtime
    Async(AsyncHandlerFn),
    /// Another handler wrapped in an [`ActionChain`]
    Decorated(Arc<ActionChain>),
}

impl Handler {
    /// Creates a synchronous handler.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&ParseResult) -> anyhow::Result<ExitCode> + Send + Sync + 'static,
    {
        Handler::Sync(Arc::new(f))
    }

    /// Creates an asynchronous handler from a function returning a future.
    ///
    /// ```rust
    /// use strand_dispatch::Handler;
    ///
    /// let handler = Handler::from_async(|_pr, cancel| async move {
    ///     if cancel.is_cancelled() {
    ///         return Ok(130);
    ///     }
    ///     Ok(0)
    /// });
    /// assert!(handler.is_async());
    /// ```
    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(ParseResult, CancellationSignal) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<ExitCode>> + Send + 'static,
    {
        Handler::Async(Arc::new(move |pr, cancel| f(pr, cancel).boxed()))
    }

    /// The terminal handler used when a chain wraps nothing: exits with 0.
    pub fn noop() -> Self {
        Handler::sync(|_| Ok(0))
    }

    /// Returns true if this handler can only run through the async path.
    pub fn is_async(&self) -> bool {
        match self {
            Handler::Sync(_) => false,
            Handler::Async(_) => true,
            Handler::Decorated(chain) => chain.is_async(),
        }
    }

    /// Returns true if this handler can run through the sync path.
    pub fn is_sync(&self) -> bool {
        !self.is_async()
    }

    /// Runs the handler on the calling thread.
    ///
    /// Fails with [`DispatchError::AsyncRequired`] if the handler, or any
    /// layer it is wrapped in, is asynchronous.
    pub fn invoke(&self, pr: &ParseResult) -> anyhow::Result<ExitCode> {
        match self {
            Handler::Sync(f) => f(pr),
            Handler::Decorated(chain) if !chain.is_async() => chain.run(pr),
            Handler::Async(_) | Handler::Decorated(_) => Err(DispatchError::AsyncRequired {
                command: pr.command().name().to_string(),
            }
            .into()),
        }
    }

    /// Runs the handler through the async path. Accepts every shape.
    ///
    /// The cancellation signal is passed unmodified to every async layer.
    pub fn invoke_async(
        &self,
        pr: ParseResult,
        cancel: CancellationSignal,
    ) -> BoxFuture<'static, anyhow::Result<ExitCode>> {
        match self {
            Handler::Sync(f) => {
                let f = Arc::clone(f);
                async move { f(&pr) }.boxed()
            }
            Handler::Async(f) => f(pr, cancel),
            Handler::Decorated(chain) => Arc::clone(chain).run_async(pr, cancel),
        }
    }

    /// Returns the chain if this handler is decorated.
    pub fn as_chain(&self) -> Option<&ActionChain> {
        match self {
            Handler::Decorated(chain) => Some(chain),
            _ => None,
        }
    }

    /// Iterates over this handler and every handler it wraps, outermost
    /// first, ending with the undecorated terminal handler.
    pub fn layers(&self) -> Layers<'_> {
        Layers { next: Some(self) }
    }

    /// Returns the undecorated handler at the bottom of the chain.
    pub fn innermost(&self) -> &Handler {
        let mut current = self;
        while let Handler::Decorated(chain) = current {
            current = chain.inner();
        }
        current
    }

    /// Number of decoration layers above the terminal handler.
    pub fn depth(&self) -> usize {
        self.layers().filter(|h| h.as_chain().is_some()).count()
    }

    /// Finds the outermost layer whose lazy instance has type `T`.
    pub(crate) fn find_slot<T: Any>(&self) -> Option<&Arc<dyn InstanceSlot>> {
        let wanted = TypeId::of::<T>();
        self.layers()
            .filter_map(|h| h.as_chain().and_then(ActionChain::instance_slot))
            .find(|slot| slot.instance_type() == wanted)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Sync(_) => f.write_str("Handler::Sync"),
            Handler::Async(_) => f.write_str("Handler::Async"),
            Handler::Decorated(chain) => f.debug_tuple("Handler::Decorated").field(chain).finish(),
        }
    }
}

/// Iterator returned by [`Handler::layers`].
pub struct Layers<'a> {
    next: Option<&'a Handler>,
}

impl<'a> Iterator for Layers<'a> {
    type Item = &'a Handler;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;
        if let Handler::Decorated(chain) = current {
            self.next = Some(chain.inner());
        }
        Some(current)
    }
}
