//! Invocation timing.
//!
//! [`register_timing`] adds a layer with no builder stage: its before step
//! marks the start, its after step records and logs how long everything
//! inside the layer took. Registered last, it is the outermost layer and
//! so times every other extension as well as the handler.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use strand_dispatch::{
    dispatch::path_to_string, get_instance, CommandNode, Composer, InstanceStep, ParseResult,
    Registration,
};

/// Start time and last measured duration of a command.
#[derive(Debug, Default)]
pub struct InvocationTimer {
    started: Mutex<Option<Instant>>,
    elapsed: Mutex<Option<Duration>>,
}

impl InvocationTimer {
    pub fn new() -> Self {
        Self::default()
    }

    fn mark_start(&self) {
        *self.started.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
    }

    fn mark_end(&self) -> Option<Duration> {
        let started = *self.started.lock().unwrap_or_else(PoisonError::into_inner);
        let elapsed = started.map(|s| s.elapsed());
        *self.elapsed.lock().unwrap_or_else(PoisonError::into_inner) = elapsed;
        elapsed
    }

    /// When the current or last invocation started.
    pub fn started(&self) -> Option<Instant> {
        *self.started.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Duration of the last completed invocation.
    pub fn elapsed(&self) -> Option<Duration> {
        *self.elapsed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn command_label(pr: &ParseResult) -> String {
    let path = path_to_string(pr.command_path());
    if path.is_empty() {
        pr.root().name().to_string()
    } else {
        path
    }
}

/// Registers the timing layer on `node` and its current descendants.
pub fn register_timing(composer: &Composer, node: &CommandNode) -> Registration {
    composer.register_steps::<InvocationTimer, _>(
        node,
        |_| Ok(InvocationTimer::new()),
        Some(InstanceStep::sync(|timer: &InvocationTimer, pr| {
            timer.mark_start();
            tracing::debug!(command = %command_label(pr), "invocation started");
            Ok(())
        })),
        Some(InstanceStep::sync(|timer: &InvocationTimer, pr| {
            if let Some(elapsed) = timer.mark_end() {
                tracing::info!(
                    command = %command_label(pr),
                    elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                    "invocation finished"
                );
            }
            Ok(())
        })),
    )
}

/// The timer of the invoked command, if timing is registered.
pub fn timer(pr: &ParseResult) -> anyhow::Result<Option<Arc<InvocationTimer>>> {
    get_instance::<InvocationTimer>(pr)
}
