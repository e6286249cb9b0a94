use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use waav_flow::FlowConfig;
use waav_flow::flow::prelude::*;
use waav_flow::livekit::LiveKitTransport;

/// WaaV Flow - join a room and inspect the workflow graph
#[derive(Parser, Debug)]
#[command(name = "waav-flow")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Room URL (overrides configuration)
    #[arg(long)]
    url: Option<String>,

    /// Participant token (overrides configuration)
    #[arg(long)]
    token: Option<String>,

    /// Discovery protocol: metadata or push
    #[arg(long, value_name = "PROTOCOL")]
    discovery: Option<DiscoveryProtocol>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => FlowConfig::from_file(path).map_err(|e| anyhow!(e.to_string()))?,
        None => FlowConfig::from_env().map_err(|e| anyhow!(e.to_string()))?,
    };
    if cli.url.is_some() {
        config.url = cli.url;
    }
    if cli.token.is_some() {
        config.token = cli.token;
    }
    if let Some(discovery) = cli.discovery {
        config.discovery = discovery;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    let details = config
        .connection_details()
        .context(
            "Both a room URL and a token are required \
             (--url/--token or WAAV_FLOW_URL/WAAV_FLOW_TOKEN)",
        )?;

    let transport = Arc::new(LiveKitTransport::new(config.agent_identity_prefix.clone()));
    let engine = Engine::new(transport, config);

    let (discovered_tx, mut discovered_rx) = mpsc::unbounded_channel();
    engine.events().on(EngineEvent::NODES_DISCOVERED, move |_| {
        let _ = discovered_tx.send(());
    });
    engine.events().on(EngineEvent::ERROR, |event| {
        if let EngineEvent::Error(message) = event {
            warn!(error = %message, "Engine error");
        }
    });
    engine
        .events()
        .on(EngineEvent::CONNECTION_STATE_CHANGED, |event| {
            if let EngineEvent::ConnectionStateChanged(state) = event {
                info!(state = %state, "Connection state");
            }
        });

    engine.connect(details).await?;
    info!("Waiting for events, press Ctrl-C to leave");

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                break;
            }
            Some(()) = discovered_rx.recv() => log_graph(&engine),
        }
    }
    engine.disconnect().await;
    Ok(())
}

/// Log every node and pad, and subscribe to inbound pad traffic
fn log_graph(engine: &Engine) {
    for node in engine.nodes() {
        info!(node_id = %node.id(), node_type = %node.node_type(), pads = node.pad_count(), "Node");
        for pad in node.pads() {
            info!(
                node_id = %node.id(),
                pad_id = %pad.id(),
                direction = %pad.direction(),
                data_type = %pad.data_type(),
                "  Pad"
            );
            if pad.events().listener_count(PadEvent::TRIGGER_RECEIVED) > 0 {
                continue;
            }
            let pad_id = pad.id().to_string();
            pad.events().on(PadEvent::TRIGGER_RECEIVED, move |event| {
                info!(pad_id = %pad_id, event = ?event, "Trigger received");
            });
            let pad_id = pad.id().to_string();
            pad.events().on(PadEvent::DATA_RECEIVED, move |event| {
                info!(pad_id = %pad_id, event = ?event, "Data received");
            });
        }
    }
    if let Some(publisher) = engine.publisher_node() {
        info!(node_id = %publisher.id(), "Publisher node");
    }
}
