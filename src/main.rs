//! Fleet relay - topic fan-out over WebSocket for delegators and workers

use clap::Parser;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fleet::relay::{router, RelayState};

#[derive(Parser)]
#[command(name = "fleet-relay")]
#[command(about = "Relay envelopes between fleet delegators and workers")]
#[command(version)]
struct Args {
    /// Address to listen on
    #[arg(short, long, env = "FLEET_RELAY_ADDR", default_value = "0.0.0.0:3000")]
    addr: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fleet=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let state = RelayState::new();
    let app = router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&args.addr).await?;
    tracing::info!("Relay listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
