//! Fleet CLI - run workers and delegate missions over a relay

mod display;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fleet::config::{
    parse_plugin_list, DelegatorConfig, EligibilityPolicy, WorkerConfig, DEFAULT_CLAIM_TIMEOUT_MS,
    DEFAULT_TICK_MS,
};
use fleet::{DelegatorAgent, GraphEngine, Mission, MissionStatus, RelayTransport, WorkerAgent};

#[derive(Parser)]
#[command(name = "fleet")]
#[command(about = "Run fleet workers and delegate missions through a relay")]
#[command(version)]
struct Cli {
    /// Relay URL
    #[arg(
        short,
        long,
        env = "FLEET_RELAY_URL",
        default_value = "ws://localhost:3000/ws"
    )]
    relay: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a worker with the built-in graph engine until interrupted
    Worker {
        /// Worker id (random if not set)
        #[arg(long, env = "FLEET_WORKER_ID")]
        id: Option<String>,

        /// Capability tag matched against polled mission ids
        #[arg(short, long, env = "FLEET_CAPABILITY", default_value = "generic")]
        capability: String,

        /// Accept any mission id starting with this prefix instead of the tag
        #[arg(long)]
        prefix: Option<String>,

        #[arg(long, env = "FLEET_TICK_MS", default_value_t = DEFAULT_TICK_MS)]
        tick_ms: u64,

        /// How long a claim waits for its command
        #[arg(long, env = "FLEET_CLAIM_TIMEOUT_MS", default_value_t = DEFAULT_CLAIM_TIMEOUT_MS)]
        claim_timeout_ms: u64,

        /// Comma-separated plugins used when a command names none
        #[arg(short, long, env = "FLEET_PLUGINS", default_value = "")]
        plugins: String,

        /// Publish IDLE on every tick while not executing
        #[arg(long)]
        publish_idle: bool,
    },

    /// Delegate one mission and wait for its terminal status
    Delegate {
        /// Mission id workers match their capability against
        #[arg(short, long)]
        mission_id: String,

        /// Path to the JSON task graph
        #[arg(short, long)]
        graph: PathBuf,

        /// Comma-separated plugins the graph needs
        #[arg(short, long, default_value = "")]
        plugins: String,

        /// Give up if no worker claims within this window
        #[arg(long, env = "FLEET_CLAIM_TIMEOUT_MS", default_value_t = DEFAULT_CLAIM_TIMEOUT_MS)]
        claim_timeout_ms: u64,

        #[arg(long, env = "FLEET_TICK_MS", default_value_t = DEFAULT_TICK_MS)]
        tick_ms: u64,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fleet_cli=info,fleet=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Worker {
            id,
            capability,
            prefix,
            tick_ms,
            claim_timeout_ms,
            plugins,
            publish_idle,
        } => {
            let mut config = WorkerConfig {
                capability,
                tick_ms,
                claim_timeout_ms,
                plugins: parse_plugin_list(&plugins),
                publish_idle,
                ..WorkerConfig::default()
            };
            if let Some(id) = id {
                config.worker_id = id;
            }
            if let Some(prefix) = prefix {
                config.eligibility = EligibilityPolicy::Prefix(prefix);
            }
            run_worker(&cli.relay, config).await
        }
        Commands::Delegate {
            mission_id,
            graph,
            plugins,
            claim_timeout_ms,
            tick_ms,
            json,
        } => {
            let graph_definition = std::fs::read_to_string(&graph)
                .with_context(|| format!("reading graph {}", graph.display()))?;
            let mission = Mission::new(mission_id, graph_definition, parse_plugin_list(&plugins));
            let config = DelegatorConfig {
                tick_ms,
                claim_timeout_ms,
                ..DelegatorConfig::default()
            };
            run_delegate(&cli.relay, config, mission, json).await
        }
    }
}

async fn run_worker(relay: &str, config: WorkerConfig) -> Result<()> {
    let transport = Arc::new(RelayTransport::connect(relay).await?);
    let engine = Arc::new(GraphEngine::default());

    println!(
        "Worker {} ({}) connected to {}",
        config.worker_id, config.capability, relay
    );
    println!("Capabilities: {}", engine.registry().names().join(", "));

    let handle = WorkerAgent::spawn(config, engine, transport).await?;
    let mut events = handle.subscribe();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => println!("{}", display::event_line(&event)),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Dropped {} events", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!("Shutting down...");
                break;
            }
        }
    }

    handle.shutdown().await?;
    Ok(())
}

async fn run_delegate(
    relay: &str,
    config: DelegatorConfig,
    mission: Mission,
    json: bool,
) -> Result<()> {
    let transport = Arc::new(RelayTransport::connect(relay).await?);
    let agent = DelegatorAgent::new(config, transport)?;
    let mut events = agent.subscribe();

    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if json {
                match serde_json::to_string(&event) {
                    Ok(line) => println!("{}", line),
                    Err(e) => tracing::warn!("Failed to encode event: {}", e),
                }
            } else {
                println!("{}", display::event_line(&event));
            }
        }
    });

    let result = agent.delegate(mission).await;
    drop(agent);
    let _ = printer.await;

    match result {
        Ok(report) if report.status == MissionStatus::Success => {
            println!("{}", display::report_line(&report));
            Ok(())
        }
        Ok(report) => {
            println!("{}", display::report_line(&report));
            bail!("mission {} failed on {}", report.mission_id, report.worker_id)
        }
        Err(e) => Err(e.into()),
    }
}
