#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::uninlined_format_args)]

use anyhow::{Result, bail};
use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::{EnvFilter, fmt};

use wagate::config::Config;
use wagate::gateway::{self, AppState};
use wagate::session::SessionController;
use wagate::transport;

/// Authenticated HTTP gateway for a QR-linked outbound messaging channel.
#[derive(Parser, Debug)]
#[command(name = "wagate", version, about)]
struct Cli {
    /// Bind host (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Bind port (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Transport mode (overrides config)
    #[arg(long)]
    transport: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging - respects RUST_LOG env var, defaults to INFO
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting default subscriber failed");

    let cli = Cli::parse();

    let mut config = Config::load_or_init()?;
    if let Some(host) = cli.host {
        config.gateway.host = host;
    }
    if let Some(port) = cli.port {
        config.gateway.port = port;
    }
    if let Some(mode) = cli.transport {
        config.transport.mode = mode;
    }

    let Some(api_key) = config.api_key.clone() else {
        bail!(
            "No API key configured — set `api_key` in {} or export WAGATE_API_KEY / APIKEY",
            config.config_path.display()
        );
    };

    let (events_tx, events_rx) = mpsc::channel(64);
    let chat_transport = transport::create_transport(&config, events_tx)?;
    let (session, _event_loop) = SessionController::spawn(chat_transport.clone(), events_rx);
    session.initialize().await;

    let state = AppState::new(&api_key, session, chat_transport, &config.country_prefix);
    gateway::run_gateway(&config, state).await
}
