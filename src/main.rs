//! CEC MQTT Bridge
//!
//! Opens the CEC adapter, scans the bus, then bridges it to MQTT until
//! interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use cec_mqtt_bridge::adapters::{CecClientAdapter, ADAPTER_EVENT_CAPACITY};
use cec_mqtt_bridge::bridge::run_refresh;
use cec_mqtt_bridge::config::{load_config, refresh_period};
use cec_mqtt_bridge::mqtt::MqttLink;
use cec_mqtt_bridge::{create_event_bus, CecBridge};
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "cec-mqtt-bridge", version, about = "HDMI-CEC to MQTT bridge")]
struct Cli {
    /// Increase log verbosity (-v for debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Configuration file (any format the config loader understands)
    #[arg(short = 'f', long = "configfile")]
    config_file: Option<PathBuf>,

    /// Seconds between refreshes, overrides cec.refresh (0 disables)
    #[arg(short = 't', long = "refreshtime")]
    refresh_time: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let fallback = if cli.verbose > 0 {
        "cec_mqtt_bridge=debug"
    } else {
        "cec_mqtt_bridge=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| fallback.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting CEC MQTT bridge {}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = load_config(cli.config_file.as_deref())?;
    tracing::info!(
        "Configuration loaded: broker {}:{}, CEC port {}, devices {:?}",
        config.mqtt.broker,
        config.mqtt.port,
        config.cec.port,
        config.cec.devices
    );

    let shutdown = CancellationToken::new();
    let events = create_event_bus();

    // Open the bus; nothing works without it
    let (adapter_tx, adapter_rx) = mpsc::channel(ADAPTER_EVENT_CAPACITY);
    let adapter = CecClientAdapter::spawn(&config.client_settings(), adapter_tx)
        .await
        .context("opening CEC adapter")?;

    let bridge = Arc::new(CecBridge::new(
        Box::new(adapter),
        config.bridge_settings(),
        events.clone(),
    ));
    let listener = bridge.spawn_listener(adapter_rx, shutdown.clone());

    // Publisher subscribes now so the startup scan reaches the broker
    let mqtt = MqttLink::new(&config.mqtt, bridge.clone(), &events, shutdown.clone());

    if let Err(e) = bridge.scan().await {
        tracing::warn!("Initial scan failed: {}", e);
    }

    let refresh = refresh_period(cli.refresh_time.unwrap_or(config.cec.refresh))
        .map(|period| tokio::spawn(run_refresh(bridge.clone(), period, shutdown.clone())));
    if refresh.is_none() {
        tracing::info!("Periodic refresh disabled");
    }

    let mqtt = tokio::spawn(mqtt.run());

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    shutdown.cancel();

    if let Some(refresh) = refresh {
        let _ = refresh.await;
    }
    match mqtt.await {
        Ok(Err(e)) => tracing::warn!("MQTT link error: {}", e),
        Err(e) => tracing::warn!("MQTT task failed: {}", e),
        Ok(Ok(())) => {}
    }
    let _ = listener.await;
    bridge.close().await?;

    tracing::info!("Stopped");
    Ok(())
}
