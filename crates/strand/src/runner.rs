//! Process entry point.
//!
//! [`Runner`] parses the command line, runs the invoked command through the
//! sync or async path as its handler requires, and turns the outcome into a
//! process exit code. Parse errors (including `--help` and `--version`) are
//! printed by clap; handler errors are printed to stderr.

use std::ffi::OsString;

use strand_dispatch::{
    dispatch, CancellationSignal, CancellationSource, CommandNode, DispatchError, ExitCode,
    ParseResult,
};

/// Exit code used when a handler or step fails.
pub const FAILURE_EXIT_CODE: ExitCode = 1;

/// Runs a command tree as a program.
#[derive(Debug, Clone)]
pub struct Runner {
    root: CommandNode,
    handle_ctrl_c: bool,
}

impl Runner {
    pub fn new(root: CommandNode) -> Self {
        Self {
            root,
            handle_ctrl_c: true,
        }
    }

    /// Whether ctrl-c cancels the invocation on the async path. On by default.
    pub fn handle_ctrl_c(mut self, enabled: bool) -> Self {
        self.handle_ctrl_c = enabled;
        self
    }

    pub fn root(&self) -> &CommandNode {
        &self.root
    }

    /// Runs `args` and returns the exit code.
    ///
    /// Commands whose handler is asynchronous get a fresh multi-threaded
    /// tokio runtime for the duration of the call. Inside a running runtime
    /// such commands fail instead; use [`run_async`](Self::run_async) there.
    pub fn run<I, T>(&self, args: I) -> ExitCode
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        report(self.try_run(args))
    }

    /// Like [`run`](Self::run), from an async context.
    pub async fn run_async<I, T>(&self, args: I) -> ExitCode
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        report(self.try_run_async(args).await)
    }

    /// Runs `args` without reporting errors.
    ///
    /// Asynchronous commands are driven on a fresh multi-threaded tokio
    /// runtime. Called from inside a running runtime, an asynchronous command
    /// returns an error instead; use
    /// [`try_run_async`](Self::try_run_async) there.
    pub fn try_run<I, T>(&self, args: I) -> anyhow::Result<ExitCode>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let pr = dispatch::parse(&self.root, args)?;
        let needs_async = pr.command().handler().is_some_and(|h| h.is_async());
        if !needs_async {
            return dispatch::invoke_parsed(&pr);
        }
        if tokio::runtime::Handle::try_current().is_ok() {
            anyhow::bail!(
                "command '{}' is asynchronous and cannot start a runtime inside a running one; \
                 use try_run_async",
                pr.command().name()
            );
        }

        tracing::debug!(command = pr.command().name(), "starting runtime for async command");
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        runtime.block_on(self.invoke_with_signals(pr))
    }

    /// Runs `args` through the async path without reporting errors.
    pub async fn try_run_async<I, T>(&self, args: I) -> anyhow::Result<ExitCode>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let pr = dispatch::parse(&self.root, args)?;
        self.invoke_with_signals(pr).await
    }

    async fn invoke_with_signals(&self, pr: ParseResult) -> anyhow::Result<ExitCode> {
        if !self.handle_ctrl_c {
            return dispatch::invoke_parsed_async(pr, CancellationSignal::never()).await;
        }

        let source = CancellationSource::new();
        let signal = source.signal();
        let watcher = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::debug!("ctrl-c received, cancelling invocation");
                source.cancel();
            }
        });
        let outcome = dispatch::invoke_parsed_async(pr, signal).await;
        watcher.abort();
        outcome
    }
}

/// Prints an error and maps it to an exit code.
fn report(outcome: anyhow::Result<ExitCode>) -> ExitCode {
    match outcome {
        Ok(code) => code,
        Err(err) => match err.downcast_ref::<DispatchError>() {
            Some(DispatchError::Parse(clap_err)) => {
                let _ = clap_err.print();
                clap_err.exit_code()
            }
            _ => {
                eprintln!("Error: {:#}", err);
                FAILURE_EXIT_CODE
            }
        },
    }
}
