//! Subcommand execution

use super::{Cli, CliResult, Commands, ListenArgs};
use crate::config::{BusConfig, ConfigError, LabConfig};
use crate::core::bus::{EventBus, LocalBus, RedisBus};
use crate::core::collector::Collector;
use crate::core::directory::{NodeKind, StaticDirectory};
use crate::core::relay::Relay;
use crate::core::services::Services;
use crate::core::store::MemoryStateStore;
use anyhow::Context;
use std::fmt::Write;
use std::sync::Arc;

/// Load the config file named on the command line, or the default one, and
/// apply the logging flags
pub fn load_config(cli: &Cli) -> Result<LabConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => LabConfig::load(path)?,
        None => LabConfig::load_default()?,
    };

    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    if cli.json {
        config.logging.json = true;
    }
    if let Some(url) = &cli.bus_url {
        config.bus.url = Some(url.clone());
        config.validate()?;
    }

    Ok(config)
}

/// In-process collaborators built from the config
pub fn services(config: &LabConfig, bus: Arc<dyn EventBus>) -> Services {
    Services::new(
        Arc::new(StaticDirectory::new(&config.nodes)),
        Arc::new(MemoryStateStore::new()),
        bus,
    )
}

/// Bus reaching the other processes of the deployment. A daemon running on
/// its own has nobody to talk to without one.
fn remote_bus(config: &BusConfig, daemon: &str) -> anyhow::Result<Arc<dyn EventBus>> {
    let Some(url) = &config.url else {
        return Err(ConfigError::Invalid(format!(
            "{} needs bus.url (or --bus-url); use `run` for an in-process bus",
            daemon
        ))
        .into());
    };
    tracing::info!("Using redis event bus");
    Ok(Arc::new(RedisBus::open(url)?))
}

/// Redis when configured, otherwise a bus private to this process
fn shared_bus(config: &BusConfig) -> anyhow::Result<Arc<dyn EventBus>> {
    match &config.url {
        Some(url) => {
            tracing::info!("Using redis event bus");
            Ok(Arc::new(RedisBus::open(url)?))
        }
        None => Ok(Arc::new(LocalBus::new(config.capacity))),
    }
}

fn apply_listen(config: &mut LabConfig, listen: &ListenArgs) {
    if let Some(address) = &listen.address {
        config.collector.address = address.clone();
    }
    if let Some(port) = listen.port {
        config.collector.port = port;
    }
}

/// Run a subcommand to completion
pub async fn execute(command: Commands, mut config: LabConfig) -> anyhow::Result<CliResult> {
    match command {
        Commands::Collect { listen } => {
            apply_listen(&mut config, &listen);
            let bus = remote_bus(&config.bus, "collect")?;
            let collector = Collector::new(config.collector.clone(), services(&config, bus))
                .with_pattern(&config.bus.pattern);
            collector.run().await.context("State collector failed")?;
        }
        Commands::Relay => {
            let bus = remote_bus(&config.bus, "relay")?;
            let relay = Relay::new(config.relay.clone(), services(&config, bus))
                .with_pattern(&config.bus.pattern);
            relay.run().await.context("Telnet relay failed")?;
        }
        Commands::Run { listen } => {
            apply_listen(&mut config, &listen);
            let shared = services(&config, shared_bus(&config.bus)?);

            let collector = Collector::new(config.collector.clone(), shared.clone())
                .with_pattern(&config.bus.pattern);
            let relay = Relay::new(config.relay.clone(), shared).with_pattern(&config.bus.pattern);

            // Bind before anything runs so a busy port fails fast
            let listener = collector.bind().context("State collector failed")?;
            tokio::try_join!(
                async { collector.serve(listener).await.context("State collector failed") },
                async { relay.run().await.context("Telnet relay failed") },
            )?;
        }
        Commands::CheckConfig => {
            return Ok(CliResult::success_with_message(summary(&config)));
        }
    }

    Ok(CliResult::success())
}

/// Human readable overview of a loaded config
pub fn summary(config: &LabConfig) -> String {
    let count = |kind: NodeKind| config.nodes.iter().filter(|node| node.kind == kind).count();
    let consoles = config.nodes.iter().filter(|node| node.console.is_some()).count();

    let mut out = String::new();
    let _ = writeln!(
        out,
        "collector: {}:{} (backlog {}, max line {} bytes)",
        config.collector.address,
        config.collector.port,
        config.collector.backlog,
        config.collector.max_line_length
    );
    let _ = writeln!(
        out,
        "relay:     connect timeout {} ms, read buffer {} bytes",
        config.relay.connect_timeout_ms, config.relay.read_buffer
    );
    let backend = if config.bus.url.is_some() { "redis" } else { "in-process" };
    let _ = writeln!(
        out,
        "bus:       {} {} (capacity {})",
        backend, config.bus.pattern, config.bus.capacity
    );
    let _ = write!(
        out,
        "nodes:     {} ({} work, {} monitor, {} irr, {} with console)",
        config.nodes.len(),
        count(NodeKind::Work),
        count(NodeKind::Monitor),
        count(NodeKind::Irr),
        consoles
    );
    out
}
