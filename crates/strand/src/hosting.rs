//! Generic host lifecycle.
//!
//! A [`Host`] owns a [`ServiceProvider`] and an ordered list of
//! [`HostedService`]s. Composed onto a command, it is started by an async
//! before step and stopped by an async after step, so the handler runs with
//! every hosted service up:
//!
//! ```text
//! before:  start services in order, watch invocation cancellation
//! handler: typically `host.wait_for_shutdown().await`
//! after:   stop started services in reverse order, each bounded by the
//!          shutdown timeout
//! ```
//!
//! Cancelling the invocation requests a host stop. The reverse does not
//! hold: a host stopping on its own never cancels the invocation.
//!
//! A host is started at most once.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use strand_dispatch::{
    get_instance, get_instance_from_node, CancellationSignal, CancellationSource, CommandNode,
    Composer, Composition, InstanceStep, ParseResult, Registration,
};

use crate::logging::LoggerFactory;
use crate::services::{seeded_collection, ServiceCollection, ServiceProvider};

/// Default time each hosted service gets to stop.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// A long-running component managed by a [`Host`].
#[async_trait]
pub trait HostedService: Send + Sync + 'static {
    /// Name used in logs and errors.
    fn name(&self) -> &str {
        "hosted service"
    }

    /// Starts the service. Background work should be spawned and should
    /// end once `stopping` fires; this method itself should return promptly.
    async fn start(&self, stopping: CancellationSignal) -> anyhow::Result<()>;

    /// Stops the service.
    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

type HostedFactory =
    Arc<dyn Fn(&ServiceProvider) -> anyhow::Result<Arc<dyn HostedService>> + Send + Sync>;

enum HostedEntry {
    Instance(Arc<dyn HostedService>),
    Factory(HostedFactory),
}

/// Collects services and hosted services for a [`Host`].
pub struct HostBuilder {
    services: ServiceCollection,
    hosted: Vec<HostedEntry>,
    shutdown_timeout: Duration,
}

impl Default for HostBuilder {
    fn default() -> Self {
        Self::with_services(ServiceCollection::new())
    }
}

impl HostBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from an existing service collection.
    pub fn with_services(services: ServiceCollection) -> Self {
        Self {
            services,
            hosted: Vec::new(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// The services the host will provide.
    pub fn services_mut(&mut self) -> &mut ServiceCollection {
        &mut self.services
    }

    /// Adds a hosted service. Services start in the order they are added.
    pub fn add_hosted_service<S: HostedService>(&mut self, service: S) -> &mut Self {
        self.hosted.push(HostedEntry::Instance(Arc::new(service)));
        self
    }

    /// Adds a hosted service built from the host's services.
    pub fn add_hosted_factory<S, F>(&mut self, factory: F) -> &mut Self
    where
        S: HostedService,
        F: Fn(&ServiceProvider) -> anyhow::Result<S> + Send + Sync + 'static,
    {
        self.hosted.push(HostedEntry::Factory(Arc::new(
            move |sp: &ServiceProvider| {
                factory(sp).map(|s| Arc::new(s) as Arc<dyn HostedService>)
            },
        )));
        self
    }

    /// Time each hosted service gets to stop before it is abandoned.
    pub fn shutdown_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn build(&self) -> anyhow::Result<Host> {
        let services = self.services.build()?;
        let hosted = self
            .hosted
            .iter()
            .map(|entry| match entry {
                HostedEntry::Instance(service) => Ok(Arc::clone(service)),
                HostedEntry::Factory(factory) => factory(&services),
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Host {
            services,
            hosted,
            shutdown_timeout: self.shutdown_timeout,
            stopping: CancellationSource::new(),
            state: Mutex::new(HostState::Created),
            translator: Mutex::new(None),
        })
    }
}

impl fmt::Debug for HostBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostBuilder")
            .field("services", &self.services)
            .field("hosted", &self.hosted.len())
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HostState {
    Created,
    Starting,
    Running { started: usize },
    Stopped,
}

/// A started-once set of hosted services.
pub struct Host {
    services: ServiceProvider,
    hosted: Vec<Arc<dyn HostedService>>,
    shutdown_timeout: Duration,
    stopping: CancellationSource,
    state: Mutex<HostState>,
    translator: Mutex<Option<JoinHandle<()>>>,
}

impl Host {
    pub fn services(&self) -> &ServiceProvider {
        &self.services
    }

    /// Starts every hosted service in order.
    ///
    /// If one fails, those already started are stopped again and the error
    /// is returned.
    pub async fn start(&self) -> anyhow::Result<()> {
        {
            let mut state = lock(&self.state);
            match *state {
                HostState::Created => *state = HostState::Starting,
                HostState::Stopped => anyhow::bail!("host has already stopped"),
                HostState::Starting | HostState::Running { .. } => {
                    anyhow::bail!("host already started")
                }
            }
        }

        for (index, service) in self.hosted.iter().enumerate() {
            tracing::debug!(service = service.name(), "starting hosted service");
            if let Err(e) = service.start(self.stopping.signal()).await {
                *lock(&self.state) = HostState::Running { started: index };
                if let Err(stop_error) = self.stop().await {
                    tracing::warn!(error = %stop_error, "cleanup after failed start also failed");
                }
                return Err(e.context(format!("hosted service {} failed to start", service.name())));
            }
        }

        *lock(&self.state) = HostState::Running {
            started: self.hosted.len(),
        };
        tracing::info!(services = self.hosted.len(), "host started");
        Ok(())
    }

    /// Stops started services in reverse order. Idempotent.
    ///
    /// Every service gets a stop call even when an earlier one fails or
    /// times out; the first failure is returned.
    pub async fn stop(&self) -> anyhow::Result<()> {
        let started = {
            let mut state = lock(&self.state);
            let started = match *state {
                HostState::Running { started } => started,
                HostState::Created => 0,
                HostState::Starting => {
                    drop(state);
                    self.request_stop();
                    return Ok(());
                }
                HostState::Stopped => return Ok(()),
            };
            *state = HostState::Stopped;
            started
        };

        self.request_stop();
        if let Some(translator) = lock(&self.translator).take() {
            translator.abort();
        }

        let mut first_error = None;
        for service in self.hosted[..started].iter().rev() {
            let outcome = match tokio::time::timeout(self.shutdown_timeout, service.stop()).await {
                Ok(result) => result,
                Err(_) => Err(anyhow::anyhow!(
                    "hosted service {} did not stop within {:?}",
                    service.name(),
                    self.shutdown_timeout
                )),
            };
            if let Err(e) = outcome {
                tracing::warn!(service = service.name(), error = %e, "hosted service failed to stop");
                first_error.get_or_insert(e);
            }
        }

        tracing::info!("host stopped");
        first_error.map_or(Ok(()), Err)
    }

    /// Fires the stopping signal without waiting for services to stop.
    pub fn request_stop(&self) {
        self.stopping.cancel();
    }

    /// Fires once a stop has been requested.
    pub fn stopping(&self) -> CancellationSignal {
        self.stopping.signal()
    }

    /// Waits until a stop is requested, by [`request_stop`](Self::request_stop)
    /// or by cancellation of the invocation.
    pub async fn wait_for_shutdown(&self) {
        self.stopping.signal().cancelled().await;
    }

    /// Starts, waits for shutdown, then stops.
    pub async fn run(&self) -> anyhow::Result<()> {
        self.start().await?;
        self.wait_for_shutdown().await;
        self.stop().await
    }

    pub fn is_running(&self) -> bool {
        matches!(*lock(&self.state), HostState::Running { .. })
    }

    /// Requests a stop when `cancel` fires. Replaced on every call.
    pub(crate) fn watch_cancellation(self: &Arc<Self>, cancel: CancellationSignal) {
        let host = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            cancel.cancelled().await;
            if let Some(host) = host.upgrade() {
                tracing::debug!("invocation cancelled, stopping host");
                host.request_stop();
            }
        });
        if let Some(previous) = lock(&self.translator).replace(handle) {
            previous.abort();
        }
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.hosted.iter().map(|s| s.name()).collect();
        f.debug_struct("Host")
            .field("state", &*lock(&self.state))
            .field("hosted", &names)
            .field("services", &self.services)
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn create_builder(pr: &ParseResult) -> anyhow::Result<HostBuilder> {
    let mut services = seeded_collection(pr)?;
    if let Some(logging) = get_instance_from_node::<LoggerFactory>(pr.command(), pr)? {
        services.add_shared(logging);
    }
    Ok(HostBuilder::with_services(services))
}

/// Registers a configure callback for the node's host.
///
/// The installed layer is asynchronous; commands carrying it must be run
/// through the async dispatch path.
pub fn register<F>(composer: &Composer, node: &CommandNode, configure: F) -> Registration
where
    F: Fn(&mut HostBuilder, &ParseResult) -> anyhow::Result<()> + Send + Sync + 'static,
{
    let composition = Composition::new(create_builder, |builder: HostBuilder, _| builder.build())
        .before(InstanceStep::from_async(|host: Arc<Host>, _, cancel| async move {
            host.start().await?;
            host.watch_cancellation(cancel);
            Ok(())
        }))
        .after(InstanceStep::from_async(|host: Arc<Host>, _, _| async move {
            host.stop().await
        }));
    composer.compose(node, composition, Some(Arc::new(configure)))
}

/// The host of the invoked command, if one is registered.
pub fn host(pr: &ParseResult) -> anyhow::Result<Option<Arc<Host>>> {
    get_instance::<Host>(pr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_dispatch::{dispatch, DispatchError, Handler};

    type Log = Arc<Mutex<Vec<String>>>;

    struct Recorder {
        name: &'static str,
        log: Log,
        fail_start: bool,
        stop_delay: Option<Duration>,
    }

    impl Recorder {
        fn new(name: &'static str, log: &Log) -> Self {
            Self {
                name,
                log: log.clone(),
                fail_start: false,
                stop_delay: None,
            }
        }
    }

    #[async_trait]
    impl HostedService for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        async fn start(&self, _stopping: CancellationSignal) -> anyhow::Result<()> {
            if self.fail_start {
                anyhow::bail!("port in use");
            }
            self.log.lock().unwrap().push(format!("start {}", self.name));
            Ok(())
        }

        async fn stop(&self) -> anyhow::Result<()> {
            if let Some(delay) = self.stop_delay {
                tokio::time::sleep(delay).await;
            }
            self.log.lock().unwrap().push(format!("stop {}", self.name));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_services_stop_in_reverse_order() {
        let log = Log::default();
        let mut builder = HostBuilder::new();
        builder
            .add_hosted_service(Recorder::new("db", &log))
            .add_hosted_service(Recorder::new("http", &log));
        let host = builder.build().unwrap();

        host.start().await.unwrap();
        assert!(host.is_running());
        host.stop().await.unwrap();
        host.stop().await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["start db", "start http", "stop http", "stop db"]
        );
        assert!(host.stopping().is_cancelled());
    }

    #[tokio::test]
    async fn test_failed_start_stops_started_services() {
        let log = Log::default();
        let mut failing = Recorder::new("http", &log);
        failing.fail_start = true;
        let mut builder = HostBuilder::new();
        builder
            .add_hosted_service(Recorder::new("db", &log))
            .add_hosted_service(failing)
            .add_hosted_service(Recorder::new("cache", &log));
        let host = builder.build().unwrap();

        let err = host.start().await.unwrap_err();
        assert_eq!(err.to_string(), "hosted service http failed to start");
        assert_eq!(*log.lock().unwrap(), vec!["start db", "stop db"]);
        assert!(host.start().await.is_err());
    }

    #[tokio::test]
    async fn test_slow_stop_times_out_but_others_still_stop() {
        let log = Log::default();
        let mut slow = Recorder::new("slow", &log);
        slow.stop_delay = Some(Duration::from_secs(5));
        let mut builder = HostBuilder::new();
        builder
            .add_hosted_service(Recorder::new("db", &log))
            .add_hosted_service(slow)
            .shutdown_timeout(Duration::from_millis(20));
        let host = builder.build().unwrap();

        host.start().await.unwrap();
        let err = host.stop().await.unwrap_err();
        assert!(err.to_string().contains("did not stop within"));
        assert_eq!(log.lock().unwrap().last().map(String::as_str), Some("stop db"));
    }

    #[tokio::test]
    async fn test_hosted_factory_reads_services() {
        struct Port(u16);
        struct Listener(u16);

        #[async_trait]
        impl HostedService for Listener {
            async fn start(&self, _stopping: CancellationSignal) -> anyhow::Result<()> {
                anyhow::ensure!(self.0 == 8080, "wrong port");
                Ok(())
            }
        }

        let mut builder = HostBuilder::new();
        builder.services_mut().add_singleton(Port(8080));
        builder.add_hosted_factory(|sp| Ok(Listener(sp.get_required::<Port>()?.0)));
        builder.build().unwrap().start().await.unwrap();
    }

    #[tokio::test]
    async fn test_invocation_cancellation_stops_host() {
        let composer = Composer::new();
        let log = Log::default();
        let root = CommandNode::named("serve").with_handler(Handler::from_async(|pr, _| async move {
            let host = host(&pr)?.expect("host registered");
            assert!(host.is_running());
            host.wait_for_shutdown().await;
            Ok(0)
        }));
        let hosted_log = log.clone();
        register(&composer, &root, move |builder, _| {
            builder.add_hosted_service(Recorder::new("worker", &hosted_log));
            Ok(())
        });

        let source = CancellationSource::new();
        let signal = source.signal();
        let run = tokio::spawn(async move {
            dispatch::invoke_async(&root, ["serve"], signal).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        source.cancel();

        assert_eq!(run.await.unwrap().unwrap(), 0);
        assert_eq!(*log.lock().unwrap(), vec!["start worker", "stop worker"]);
    }

    #[tokio::test]
    async fn test_second_invocation_of_the_same_tree_fails() {
        let composer = Composer::new();
        let log = Log::default();
        let root = CommandNode::named("serve")
            .with_handler(Handler::from_async(|_, _| async { Ok(0) }));
        let hosted_log = log.clone();
        register(&composer, &root, move |builder, _| {
            builder.add_hosted_service(Recorder::new("worker", &hosted_log));
            Ok(())
        });

        let first = dispatch::invoke_async(&root, ["serve"], CancellationSignal::never()).await;
        assert_eq!(first.unwrap(), 0);

        let err = dispatch::invoke_async(&root, ["serve"], CancellationSignal::never())
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("host has already stopped"));
        assert_eq!(*log.lock().unwrap(), vec!["start worker", "stop worker"]);
    }

    #[test]
    fn test_host_layer_requires_async_dispatch() {
        let composer = Composer::new();
        let root = CommandNode::named("serve");
        register(&composer, &root, |_, _| Ok(()));

        let err = dispatch::invoke(&root, ["serve"]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DispatchError>(),
            Some(DispatchError::AsyncRequired { .. })
        ));
    }
}
