//! hostsync-daemon: Run a relay or a peer of a host-synchronized session.
//!
//! The relay is the shared broadcast channel; peers connect to it, elect a
//! host among themselves and replicate the host's state.

use anyhow::Result;
use clap::{Parser, Subcommand};
use hostsync_core::PeerId;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use hostsync_daemon::peer::spawn_stdin_inputs;
use hostsync_daemon::{Arena, PeerOptions, PeerRuntime, ReconnectConfig, Relay};

#[derive(Parser, Debug)]
#[command(name = "hostsync-daemon")]
#[command(about = "Host-authoritative session peer and relay")]
struct Args {
    /// Enable verbose logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the WebSocket broadcast relay
    Relay {
        /// Address to listen on
        #[arg(short, long, default_value = "0.0.0.0:8080")]
        listen: String,
    },

    /// Join a session as a peer
    Peer {
        /// Relay URL, e.g. ws://127.0.0.1:8080
        #[arg(short, long)]
        relay: String,

        /// Peer ID (generated if not provided)
        #[arg(long)]
        peer_id: Option<String>,

        /// Session to join (defaults to the persisted one)
        #[arg(long)]
        session: Option<String>,

        /// File to persist the session id in
        #[arg(long)]
        state_file: Option<PathBuf>,

        /// Simulation ticks per second
        #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u32).range(1..=1000))]
        tick_rate: u32,

        /// Maximum state publishes per second
        #[arg(long, default_value_t = 20, value_parser = clap::value_parser!(u32).range(1..=1000))]
        publish_rate: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,hostsync_daemon=debug,hostsync_core=debug"
    } else {
        "info,hostsync_daemon=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match args.command {
        Command::Relay { listen } => run_relay(&listen).await,
        Command::Peer {
            relay,
            peer_id,
            session,
            state_file,
            tick_rate,
            publish_rate,
        } => {
            let peer_id = match peer_id {
                Some(id) => id.parse::<PeerId>()?,
                None => {
                    let id = PeerId::generate();
                    info!("Generated peer ID: {}", id);
                    id
                }
            };
            let options = PeerOptions {
                relay_url: relay,
                peer_id,
                session,
                state_file,
                tick_rate,
                publish_rate,
                reconnect: ReconnectConfig::default(),
            };
            run_peer(options).await
        }
    }
}

async fn run_relay(listen: &str) -> Result<()> {
    info!("Starting relay");
    let listener = Relay::bind(listen).await?;

    tokio::select! {
        result = Relay::new().serve(listener) => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
    }

    info!("Shutting down");
    Ok(())
}

async fn run_peer(options: PeerOptions) -> Result<()> {
    info!("Starting peer {}", options.peer_id);
    info!("Relay: {}", options.relay_url);

    let session = options.open_session().await;
    info!("Session: {}", session.session_id());

    let runtime = PeerRuntime::connect(
        session,
        options.relay_url.clone(),
        options.reconnect.clone(),
        options.coordinator_config(),
        Arena::new(),
        options.tick_interval(),
    );

    info!("Peer running. Type JSON input lines (e.g. {{\"dx\":1}}). Press Ctrl+C to stop.");
    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    runtime.run(spawn_stdin_inputs(), shutdown).await?;

    info!("Shutting down");
    Ok(())
}
