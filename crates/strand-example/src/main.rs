//! `strand-demo`: configuration, services and a host composed onto a small
//! command tree.
//!
//! ```text
//! strand-demo greet [--name NAME]
//! strand-demo serve [--interval-ms MS]   # runs until ctrl-c
//! ```
//!
//! Settings are read from `strand-demo.yaml` in the working directory when
//! it exists, then from the command line.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Arg, Command};
use serde::Deserialize;
use strand::{
    async_trait, configuration, host, services, CancellationSignal, CommandExt, CommandNode,
    Handler, HostedService, LoggerFactory, Runner,
};

#[derive(Debug, Deserialize)]
#[serde(default)]
struct Settings {
    name: String,
    interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            name: "world".into(),
            interval_ms: 1000,
        }
    }
}

/// Counts ticks until the host stops.
struct Ticker {
    interval: Duration,
    ticks: Arc<AtomicU64>,
    logger: strand::Logger,
}

#[async_trait]
impl HostedService for Ticker {
    fn name(&self) -> &str {
        "ticker"
    }

    async fn start(&self, stopping: CancellationSignal) -> anyhow::Result<()> {
        let interval = self.interval;
        let ticks = self.ticks.clone();
        let logger = self.logger.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stopping.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        let n = ticks.fetch_add(1, Ordering::Relaxed) + 1;
                        logger.info(format!("tick {n}"));
                    }
                }
            }
        });
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.logger
            .info(format!("stopped after {} ticks", self.ticks.load(Ordering::Relaxed)));
        Ok(())
    }
}

fn build_tree() -> CommandNode {
    let greet = CommandNode::new(
        Command::new("greet")
            .about("Print a greeting")
            .arg(Arg::new("name").long("name")),
    )
    .with_handler(Handler::sync(greet));
    let serve = CommandNode::new(
        Command::new("serve")
            .about("Run a ticking host until interrupted")
            .arg(Arg::new("interval_ms").long("interval-ms")),
    )
    .with_handler(Handler::from_async(|pr, _| async move {
        let host = host(&pr)?.ok_or_else(|| anyhow::anyhow!("no host registered"))?;
        host.wait_for_shutdown().await;
        Ok(0)
    }));

    let root = CommandNode::new(
        Command::new("strand-demo")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Composes configuration, services and a host onto commands"),
    )
    .subcommand(greet)
    .subcommand(serve.clone());

    root.use_configuration(|config, _| {
        config
            .add_optional_yaml_file("strand-demo.yaml")
            .add_command_line();
        Ok(())
    })
    .use_services(|services, pr| {
        let config = configuration(pr)?.unwrap_or_default();
        services.add_singleton(config.bind::<Settings>()?);
        Ok(())
    })
    .use_logging(|logging, _| {
        logging.with_target(false);
        Ok(())
    });

    serve.use_host(|host, pr| {
        let settings = services(pr)?
            .ok_or_else(|| anyhow::anyhow!("no services registered"))?
            .get_required::<Settings>()?;
        let interval = Duration::from_millis(settings.interval_ms.max(1));
        host.add_hosted_factory(move |sp| {
            Ok(Ticker {
                interval,
                ticks: Arc::new(AtomicU64::new(0)),
                logger: sp.get_required::<LoggerFactory>()?.logger("ticker"),
            })
        });
        Ok(())
    });

    root.use_timing();
    root
}

fn greet(pr: &strand::ParseResult) -> anyhow::Result<strand::ExitCode> {
    let settings = services(pr)?
        .ok_or_else(|| anyhow::anyhow!("no services registered"))?
        .get_required::<Settings>()?;
    println!("Hello, {}!", settings.name);
    Ok(0)
}

fn main() {
    let root = build_tree();
    std::process::exit(Runner::new(root).run(std::env::args_os()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greet_reads_command_line() {
        let root = build_tree();
        let code = Runner::new(root)
            .try_run(["strand-demo", "greet", "--name", "strand"])
            .unwrap();
        assert_eq!(code, 0);
    }

    #[test]
    fn test_greet_accepts_numeric_name() {
        let root = build_tree();
        let pr = strand::dispatch::parse(&root, ["strand-demo", "greet", "--name", "123"]).unwrap();
        let settings = services(&pr)
            .unwrap()
            .unwrap()
            .get_required::<Settings>()
            .unwrap();
        assert_eq!(settings.name, "123");
        assert_eq!(strand::dispatch::invoke_parsed(&pr).unwrap(), 0);
    }

    #[test]
    fn test_serve_is_async_and_greet_is_not() {
        let root = build_tree();
        assert!(root.child("serve").unwrap().handler().unwrap().is_async());
        assert!(root.child("greet").unwrap().handler().unwrap().is_sync());
    }
}
