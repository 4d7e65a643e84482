//! Command-line interface for the Ohmni device bridge.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ohmni_core::config::env_vars;
use ohmni_core::{BridgeConfig, TelemetryMode};
use ohmni_devices::{DeviceBridge, DeviceBridgeBuilder, MqttTransport};
use ohmni_storage::RedbStore;
use tracing::info;

/// Ohmni - IoT device connectivity bridge over MQTT.
#[derive(Parser, Debug)]
#[command(name = "ohmni")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Configuration file (TOML).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Run the bridge until interrupted.
    Serve,
    /// Print the effective configuration and exit.
    CheckConfig,
    /// Send a connect command to one device and wait for its acknowledgement.
    Connect {
        /// Device ID.
        device: String,
        /// Seconds to wait for the acknowledgement.
        #[arg(short, long)]
        timeout: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = BridgeConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    match args.command {
        Command::Serve => run_serve(config).await,
        Command::CheckConfig => check_config(&config),
        Command::Connect { device, timeout } => {
            run_connect(config, &device, timeout.map(Duration::from_secs)).await
        }
    }
}

fn init_logging(verbose: bool) {
    // JSON logs for production/container environments
    let json_logging = std::env::var(env_vars::LOG_JSON)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let default_directive = if verbose { "ohmni=debug" } else { "ohmni=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .init();
    }
}

/// Build the bridge against the configured broker. In durable mode one redb
/// file serves as both telemetry store and device repository.
async fn start_bridge(config: BridgeConfig) -> Result<Arc<DeviceBridge>> {
    let (transport, events) =
        MqttTransport::connect(&config.mqtt).context("Failed to create MQTT client")?;

    let durable = match (config.telemetry.mode, config.telemetry.path.as_deref()) {
        (TelemetryMode::Durable, Some(path)) => Some(Arc::new(
            RedbStore::open(path).with_context(|| format!("Failed to open {}", path))?,
        )),
        _ => None,
    };

    let mut builder: DeviceBridgeBuilder = DeviceBridge::builder(config, Arc::new(transport));
    if let Some(store) = durable {
        builder = builder.telemetry_store(store.clone()).repository(store);
    }

    let bridge = Arc::new(builder.build()?);
    bridge.start(events).await?;
    Ok(bridge)
}

async fn run_serve(config: BridgeConfig) -> Result<()> {
    info!("Starting Ohmni bridge v{}", ohmni_core::VERSION);
    info!("Broker: {}", config.mqtt.broker_addr());

    let bridge = start_bridge(config).await?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("Shutting down");
    let stats = bridge.stats();
    info!(
        "Routed {} samples, {} acks, dropped {} messages, expired {} devices",
        stats.telemetry_routed, stats.acks_received, stats.messages_dropped, stats.devices_expired
    );
    bridge.shutdown().await;
    Ok(())
}

fn check_config(config: &BridgeConfig) -> Result<()> {
    let rendered = toml::to_string_pretty(config).context("Failed to render configuration")?;
    println!("{}", rendered);
    Ok(())
}

async fn run_connect(config: BridgeConfig, device: &str, timeout: Option<Duration>) -> Result<()> {
    let link_timeout = config.connect.timeout();
    let bridge = start_bridge(config).await?;

    if !bridge.wait_for_link(link_timeout).await {
        bridge.shutdown().await;
        anyhow::bail!("Broker not reachable within {:?}", link_timeout);
    }

    let outcome = bridge.request_connect(device, timeout).await;
    bridge.shutdown().await;

    let outcome = outcome?;
    println!("{}", serde_json::to_string(&outcome)?);
    if !outcome.is_connected() {
        anyhow::bail!("Device {} not connected: {}", device, outcome);
    }
    Ok(())
}
