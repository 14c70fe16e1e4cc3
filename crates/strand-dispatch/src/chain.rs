//! Action chains: handlers decorated with before/after steps.
//!
//! An [`ActionChain`] wraps exactly one inner handler. It may add a before
//! step, an after step, and a lazily built instance that is ensured before
//! anything else runs. The chain is itself exposed as a [`Handler`], so it
//! can be wrapped again; a fully composed command is a singly linked list of
//! chains ending in the user's handler (or [`Handler::noop`]).
//!
//! # Execution order
//!
//! For one layer:
//!
//! 1. ensure the lazy instance (a failure here propagates immediately)
//! 2. run the before step
//! 3. run the inner handler, only if the before step succeeded
//! 4. run the after step, whatever happened in 2 and 3
//! 5. return the inner handler's exit code
//!
//! Steps observe the exit code but never replace it. When the after step
//! fails while an earlier failure is already propagating, both are reported
//! through a [`CleanupError`].

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use anyhow::Context;
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::cancel::CancellationSignal;
use crate::context::{ExitCode, ParseResult};
use crate::error::{CleanupError, StepPhase};
use crate::handler::Handler;
use crate::lazy::{InstanceSlot, LazyInstanceCell};
use crate::step::Step;

/// A handler wrapped with optional steps and an optional lazy instance.
///
/// Immutable once converted into a handler.
///
/// # Example
///
/// ```rust
/// use strand_dispatch::{ActionChain, Handler, Step};
///
/// let handler = ActionChain::new(Some(Handler::sync(|_| Ok(0))))
///     .before(Step::sync(|_| Ok(())))
///     .after(Step::sync(|_| Ok(())))
///     .into_handler();
///
/// assert!(handler.is_sync());
/// assert_eq!(handler.depth(), 1);
/// ```
pub struct ActionChain {
    inner: Handler,
    before: Option<Step>,
    after: Option<Step>,
    instance: Option<Arc<dyn InstanceSlot>>,
}

impl ActionChain {
    /// Wraps `inner`, or the no-op terminal handler when there is none.
    pub fn new(inner: Option<Handler>) -> Self {
        Self {
            inner: inner.unwrap_or_else(Handler::noop),
            before: None,
            after: None,
            instance: None,
        }
    }

    /// Sets the before step.
    pub fn before(mut self, step: Step) -> Self {
        self.before = Some(step);
        self
    }

    /// Sets the after step.
    pub fn after(mut self, step: Step) -> Self {
        self.after = Some(step);
        self
    }

    /// Attaches a lazy instance, ensured at the start of every invocation.
    pub fn with_instance<T>(mut self, cell: Arc<LazyInstanceCell<T>>) -> Self
    where
        T: Any + Send + Sync,
    {
        self.instance = Some(cell);
        self
    }

    /// Converts the chain into a handler.
    pub fn into_handler(self) -> Handler {
        Handler::Decorated(Arc::new(self))
    }

    /// The handler this chain wraps.
    pub fn inner(&self) -> &Handler {
        &self.inner
    }

    /// True if the inner handler or either step is asynchronous.
    pub fn is_async(&self) -> bool {
        self.inner.is_async()
            || self.before.as_ref().is_some_and(Step::is_async)
            || self.after.as_ref().is_some_and(Step::is_async)
    }

    /// The type-erased lazy instance, if this layer carries one.
    pub fn instance_slot(&self) -> Option<&Arc<dyn InstanceSlot>> {
        self.instance.as_ref()
    }

    pub(crate) fn run(&self, pr: &ParseResult) -> anyhow::Result<ExitCode> {
        if let Some(slot) = &self.instance {
            slot.ensure(pr)?;
        }

        let before = match &self.before {
            Some(step) => step.run(pr).context(StepPhase::Before),
            None => Ok(()),
        };
        let outcome = before.and_then(|()| self.inner.invoke(pr));
        let cleanup = match &self.after {
            Some(step) => step.run(pr).context(StepPhase::After),
            None => Ok(()),
        };

        settle(outcome, cleanup)
    }

    pub(crate) fn run_async(
        self: Arc<Self>,
        pr: ParseResult,
        cancel: CancellationSignal,
    ) -> BoxFuture<'static, anyhow::Result<ExitCode>> {
        async move {
            if let Some(slot) = &self.instance {
                slot.ensure(&pr)?;
            }

            let before = match &self.before {
                Some(step) => step.run_async(&pr, &cancel).await.context(StepPhase::Before),
                None => Ok(()),
            };
            let outcome = match before {
                Ok(()) => self.inner.invoke_async(pr.clone(), cancel.clone()).await,
                Err(e) => Err(e),
            };
            let cleanup = match &self.after {
                Some(step) => step.run_async(&pr, &cancel).await.context(StepPhase::After),
                None => Ok(()),
            };

            settle(outcome, cleanup)
        }
        .boxed()
    }
}

impl fmt::Debug for ActionChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionChain")
            .field("before", &self.before)
            .field("after", &self.after)
            .field("instance", &self.instance.as_ref().map(|s| s.type_name()))
            .field("inner", &self.inner)
            .finish()
    }
}

/// Combines the handler outcome with the after step's outcome.
fn settle(outcome: anyhow::Result<ExitCode>, cleanup: anyhow::Result<()>) -> anyhow::Result<ExitCode> {
    match (outcome, cleanup) {
        (outcome, Ok(())) => outcome,
        (Ok(_), Err(cleanup)) => Err(cleanup),
        (Err(original), Err(cleanup)) => Err(CleanupError::new(cleanup, original).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::parse;
    use crate::node::CommandNode;
    use std::sync::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    fn pr() -> ParseResult {
        parse(&CommandNode::named("app"), ["app"]).unwrap()
    }

    fn record(log: &Log, entry: &str) -> Step {
        let log = log.clone();
        let entry = entry.to_string();
        Step::sync(move |_| {
            log.lock().unwrap().push(entry.clone());
            Ok(())
        })
    }

    fn handler(log: &Log, code: ExitCode) -> Handler {
        let log = log.clone();
        Handler::sync(move |_| {
            log.lock().unwrap().push("handler".into());
            Ok(code)
        })
    }

    #[test]
    fn test_absent_inner_defaults_to_noop() {
        let chain = ActionChain::new(None).into_handler();
        assert!(chain.is_sync());
        assert_eq!(chain.invoke(&pr()).unwrap(), 0);
    }

    #[test]
    fn test_before_handler_after_order() {
        let log = Log::default();
        let chain = ActionChain::new(Some(handler(&log, 5)))
            .before(record(&log, "before"))
            .after(record(&log, "after"))
            .into_handler();

        assert_eq!(chain.invoke(&pr()).unwrap(), 5);
        assert_eq!(*log.lock().unwrap(), vec!["before", "handler", "after"]);
    }

    #[test]
    fn test_nested_chains_run_outermost_first() {
        let log = Log::default();
        let inner = ActionChain::new(Some(handler(&log, 0)))
            .before(record(&log, "inner.before"))
            .after(record(&log, "inner.after"))
            .into_handler();
        let outer = ActionChain::new(Some(inner))
            .before(record(&log, "outer.before"))
            .after(record(&log, "outer.after"))
            .into_handler();

        outer.invoke(&pr()).unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "outer.before",
                "inner.before",
                "handler",
                "inner.after",
                "outer.after"
            ]
        );
        assert_eq!(outer.depth(), 2);
    }

    #[test]
    fn test_after_runs_when_handler_fails() {
        let log = Log::default();
        let chain = ActionChain::new(Some(Handler::sync(|_| Err(anyhow::anyhow!("boom")))))
            .after(record(&log, "after"))
            .into_handler();

        let err = chain.invoke(&pr()).unwrap_err();
        assert_eq!(err.to_string(), "boom");
        assert_eq!(*log.lock().unwrap(), vec!["after"]);
    }

    #[test]
    fn test_before_failure_skips_handler_but_not_after() {
        let log = Log::default();
        let chain = ActionChain::new(Some(handler(&log, 0)))
            .before(Step::sync(|_| Err(anyhow::anyhow!("denied"))))
            .after(record(&log, "after"))
            .into_handler();

        let err = chain.invoke(&pr()).unwrap_err();
        assert_eq!(err.downcast_ref::<StepPhase>(), Some(&StepPhase::Before));
        assert_eq!(*log.lock().unwrap(), vec!["after"]);
    }

    #[test]
    fn test_after_failure_is_reported() {
        let chain = ActionChain::new(Some(Handler::sync(|_| Ok(0))))
            .after(Step::sync(|_| Err(anyhow::anyhow!("flush failed"))))
            .into_handler();

        let err = chain.invoke(&pr()).unwrap_err();
        assert_eq!(err.downcast_ref::<StepPhase>(), Some(&StepPhase::After));
    }

    #[test]
    fn test_after_failure_chains_with_handler_failure() {
        let chain = ActionChain::new(Some(Handler::sync(|_| Err(anyhow::anyhow!("boom")))))
            .after(Step::sync(|_| Err(anyhow::anyhow!("flush failed"))))
            .into_handler();

        let err = chain.invoke(&pr()).unwrap_err();
        let cleanup = err.downcast_ref::<CleanupError>().unwrap();
        assert_eq!(cleanup.original.to_string(), "boom");
        assert_eq!(cleanup.cleanup.to_string(), "after step failed");
    }

    #[test]
    fn test_steps_cannot_change_exit_code() {
        let chain = ActionChain::new(Some(Handler::sync(|_| Ok(42))))
            .before(Step::sync(|_| Ok(())))
            .after(Step::sync(|_| Ok(())))
            .into_handler();
        assert_eq!(chain.invoke(&pr()).unwrap(), 42);
    }

    #[test]
    fn test_async_is_infectious() {
        let sync_chain = ActionChain::new(Some(Handler::noop()))
            .before(Step::sync(|_| Ok(())))
            .into_handler();
        assert!(sync_chain.is_sync());

        let async_step = ActionChain::new(Some(Handler::noop()))
            .after(Step::from_async(|_, _| async { Ok(()) }))
            .into_handler();
        assert!(async_step.is_async());

        let async_inner =
            ActionChain::new(Some(Handler::from_async(|_, _| async { Ok(0) }))).into_handler();
        assert!(async_inner.is_async());

        let wrapped_again = ActionChain::new(Some(async_step)).into_handler();
        assert!(wrapped_again.is_async());
    }

    #[tokio::test]
    async fn test_async_chain_runs_sync_steps_in_order() {
        let log = Log::default();
        let inner_log = log.clone();
        let chain = ActionChain::new(Some(Handler::from_async(move |_, _| {
            let log = inner_log.clone();
            async move {
                tokio::task::yield_now().await;
                log.lock().unwrap().push("handler".into());
                Ok(9)
            }
        })))
        .before(record(&log, "before"))
        .after(record(&log, "after"))
        .into_handler();

        let code = chain
            .invoke_async(pr(), CancellationSignal::never())
            .await
            .unwrap();
        assert_eq!(code, 9);
        assert_eq!(*log.lock().unwrap(), vec!["before", "handler", "after"]);
    }

    #[tokio::test]
    async fn test_async_after_runs_when_async_handler_fails() {
        let log = Log::default();
        let after_log = log.clone();
        let chain = ActionChain::new(Some(Handler::from_async(|_, _| async {
            Err(anyhow::anyhow!("async boom"))
        })))
        .after(Step::from_async(move |_, _| {
            let log = after_log.clone();
            async move {
                log.lock().unwrap().push("after".into());
                Ok(())
            }
        }))
        .into_handler();

        let err = chain
            .invoke_async(pr(), CancellationSignal::never())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "async boom");
        assert_eq!(*log.lock().unwrap(), vec!["after"]);
    }

    #[test]
    fn test_instance_is_ensured_before_steps() {
        let log = Log::default();
        let factory_log = log.clone();
        let cell = Arc::new(LazyInstanceCell::new(move |_| {
            factory_log.lock().unwrap().push("build".into());
            Ok(String::from("built"))
        }));
        let chain = ActionChain::new(Some(handler(&log, 0)))
            .with_instance(cell.clone())
            .before(record(&log, "before"))
            .into_handler();

        chain.invoke(&pr()).unwrap();
        chain.invoke(&pr()).unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["build", "before", "handler", "before", "handler"]
        );
        assert_eq!(cell.peek().as_deref().map(String::as_str), Some("built"));
    }
}
