//! PeerBridge CLI
//!
//! Runs the bridge relay and provides a simple test peer.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use peerbridge_logging::init_logging;
use peerbridge_relay::{PeerSessionConfig, RelayConfig, RelayService};
use peerbridge_settings::{default_settings_path, Settings};

/// PeerBridge - HTTP to peer bridge relay
#[derive(Parser)]
#[command(name = "peerbridge")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file (defaults to the per-user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay (default)
    Serve(ServeArgs),

    /// Show or create the settings file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Connect as a peer and answer forwarded payloads (for testing)
    Peer {
        /// Peer listener URL
        #[arg(short, long, default_value = "ws://127.0.0.1:8000/")]
        url: String,

        /// Fixed reply; echoes each payload when omitted
        #[arg(short, long)]
        reply: Option<String>,
    },
}

#[derive(Args, Default)]
struct ServeArgs {
    /// HTTP listen address, overrides the settings file
    #[arg(long)]
    http_listen: Option<String>,

    /// Peer listen address, overrides the settings file
    #[arg(long)]
    peer_listen: Option<String>,

    /// Response timeout in seconds, overrides the settings file
    #[arg(short, long)]
    timeout: Option<u64>,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective settings
    Show,
    /// Write default settings to the settings file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config_path = cli.config.unwrap_or_else(default_settings_path);

    match cli.command.unwrap_or(Commands::Serve(ServeArgs::default())) {
        Commands::Serve(args) => {
            serve(&config_path, args).await?;
        }
        Commands::Config { action } => {
            config(&config_path, action)?;
        }
        Commands::Peer { url, reply } => {
            run_peer(&url, reply).await?;
        }
    }

    Ok(())
}

// ============================================================================
// Relay
// ============================================================================

async fn serve(config_path: &Path, args: ServeArgs) -> Result<()> {
    let mut settings = Settings::load_from(config_path)
        .with_context(|| format!("loading settings from {}", config_path.display()))?;

    if let Some(addr) = args.http_listen {
        settings.http.listen_addr = addr;
    }
    if let Some(addr) = args.peer_listen {
        settings.peer.listen_addr = addr;
    }
    if let Some(secs) = args.timeout {
        settings.relay.response_timeout_secs = secs;
    }

    let config = relay_config(&settings)?;
    info!(
        timeout = ?config.response_timeout,
        "Starting PeerBridge relay..."
    );

    let service = RelayService::bind(config).await?;
    println!("HTTP listening on http://{}", service.http_addr()?);
    println!("Peers connect to ws://{}", service.peer_addr()?);

    service
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Received shutdown signal");
        })
        .await?;

    info!("Relay stopped");
    Ok(())
}

fn relay_config(settings: &Settings) -> Result<RelayConfig> {
    settings.validate()?;

    Ok(RelayConfig {
        http_addr: settings.http.socket_addr()?,
        peer_addr: settings.peer.socket_addr()?,
        response_timeout: settings.relay.response_timeout(),
        max_body_bytes: settings.http.max_body_bytes,
        peer: PeerSessionConfig {
            max_message_bytes: settings.peer.max_message_bytes,
            keepalive: settings.peer.keepalive(),
            outbound_buffer: settings.peer.outbound_buffer,
        },
    })
}

// ============================================================================
// Settings
// ============================================================================

fn config(config_path: &Path, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let settings = Settings::load_from(config_path)?;
            println!("# {}", config_path.display());
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        ConfigAction::Init { force } => {
            if config_path.exists() && !force {
                bail!(
                    "{} already exists (use --force to overwrite)",
                    config_path.display()
                );
            }
            Settings::default().save_to(config_path)?;
            println!("Wrote default settings to {}", config_path.display());
        }
    }
    Ok(())
}

// ============================================================================
// Test peer
// ============================================================================

async fn run_peer(url: &str, reply: Option<String>) -> Result<()> {
    info!("Connecting to relay at {}...", url);

    let (mut ws, _response) = tokio_tungstenite::connect_async(url)
        .await
        .with_context(|| format!("connecting to {url}"))?;

    println!("Connected to {url}");
    match &reply {
        Some(text) => println!("Answering every payload with {:?}", text),
        None => println!("Echoing payloads"),
    }

    loop {
        tokio::select! {
            message = ws.next() => {
                let outgoing = match message {
                    Some(Ok(Message::Text(text))) => {
                        debug!(bytes = text.as_str().len(), "received text payload");
                        match &reply {
                            Some(fixed) => Message::Text(fixed.clone().into()),
                            None => Message::Text(text),
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        debug!(bytes = data.len(), "received binary payload");
                        match &reply {
                            Some(fixed) => Message::Text(fixed.clone().into()),
                            None => Message::Binary(data),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        println!("Relay closed the connection");
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(e).context("reading from relay"),
                };

                ws.send(outgoing).await.context("answering relay")?;
            }
            _ = tokio::signal::ctrl_c() => {
                let _ = tokio::time::timeout(Duration::from_secs(1), ws.close(None)).await;
                break;
            }
        }
    }

    Ok(())
}
