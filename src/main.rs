//! Command line interface for operating the mixing relay. Supports
//! initialization, key generation, serving HTTP/WebSocket endpoints, and store
//! maintenance.

mod config;
mod error;
mod event;
mod fanout;
mod filter;
mod keys;
mod mixer;
mod pipeline;
mod policy;
mod rebroadcast;
mod server;
mod storage;
mod ws;

use std::{
    fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use config::Settings;
use fanout::LocalFanout;
use keys::RelayIdentity;
use pipeline::Pipeline;
use storage::{EventStore, Store};
use tracing::info;

/// Command line interface entry point.
#[derive(Parser)]
#[command(
    name = "notemix",
    author,
    version,
    about = "Nostr relay that republishes accepted events under its own key"
)]
struct Cli {
    /// Path to the `.env` configuration file.
    #[arg(long, default_value = ".env")]
    env: String,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Write a default `.env` with a fresh relay key if missing, then create
    /// the directory tree at `STORE_ROOT`.
    Init,
    /// Launch the HTTP and WebSocket services.
    Serve,
    /// Print a new relay secret key and its public key.
    Keygen,
    /// Rebuild indexes from stored events.
    Reindex,
    /// Verify a random sample of stored events against the relay key.
    Verify {
        #[arg(long, default_value_t = 1000)]
        sample: usize,
    },
    /// Delete a stored event by id.
    Delete {
        /// Hex id of the event to remove.
        id: String,
    },
}

/// Execute the selected CLI subcommand.
async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Keygen => {
            let identity = RelayIdentity::generate();
            println!("RELAY_PRIVATE_KEY={}", identity.secret_key_hex());
            println!("RELAY_PUBKEY={}", identity.public_key_hex());
            return Ok(());
        }
        Commands::Init => ensure_env_file(&cli.env)?,
        _ => {}
    }
    let cfg = Settings::from_env(&cli.env)?;
    let store = Store::new(cfg.store_root.clone());
    match cli.command {
        Commands::Init => {
            store.init()?;
            info!(root = %cfg.store_root.display(), pubkey = cfg.identity.public_key_hex(), "store initialized");
        }
        Commands::Serve => {
            store.init()?;
            let http_addr: SocketAddr = cfg.bind_http.parse().context("parsing BIND_HTTP")?;
            let ws_addr: SocketAddr = cfg.bind_ws.parse().context("parsing BIND_WS")?;
            let pipeline = Arc::new(Pipeline::new(&cfg, Arc::new(store), LocalFanout::new()));
            info!(
                pubkey = cfg.identity.public_key_hex(),
                kinds = ?cfg.allowed_kinds,
                allowlist = cfg.whitelisted_pubkeys.len(),
                peers = cfg.rebroadcast_relays.len(),
                "starting relay"
            );
            let settings = Arc::new(cfg);
            tokio::try_join!(
                server::serve_http(http_addr, settings, pipeline.clone(), shutdown_signal()),
                ws::serve_ws(ws_addr, pipeline, shutdown_signal())
            )?;
        }
        Commands::Reindex => {
            store.reindex()?;
        }
        Commands::Verify { sample } => {
            let checked = store.verify_sample(sample, Some(cfg.identity.public_key_hex()))?;
            println!("verified {checked} events");
        }
        Commands::Delete { id } => {
            if !store.delete(&id)? {
                bail!("event {id} not found");
            }
            println!("deleted {id}");
        }
        Commands::Keygen => {}
    }
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Create a default `.env` file if one is not already present at `path`.
fn ensure_env_file(path: &str) -> anyhow::Result<()> {
    let env_path = Path::new(path);
    if env_path.exists() {
        return Ok(());
    }
    if let Some(parent) = env_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let base_dir = match env_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir()?,
    };
    let store_root = base_dir.join("notemix-data");
    let identity = RelayIdentity::generate();
    let mut content = String::new();
    content.push_str(&format!("STORE_ROOT={}\n", display_path(&store_root)));
    content.push_str("BIND_HTTP=127.0.0.1:7777\n");
    content.push_str("BIND_WS=127.0.0.1:7778\n");
    content.push_str(&format!("RELAY_PRIVATE_KEY={}\n", identity.secret_key_hex()));
    content.push_str(&format!("RELAY_PUBKEY={}\n", identity.public_key_hex()));
    content.push_str("RELAY_NAME=notemix\n");
    content.push_str("RELAY_DESCRIPTION=\n");
    content.push_str("RELAY_ICON=\n");
    content.push_str(&format!("ALLOWED_KINDS={}\n", config::DEFAULT_ALLOWED_KINDS));
    content.push_str("WHITELISTED_PUBKEYS=\n");
    content.push_str("REBROADCAST_RELAYS=\n");
    content.push_str(&format!(
        "REBROADCAST_TIMEOUT_SECS={}\n",
        config::DEFAULT_REBROADCAST_TIMEOUT_SECS
    ));
    content.push_str("TOR_SOCKS=\n");
    fs::write(env_path, content)?;
    Ok(())
}

fn display_path(path: &PathBuf) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(not(test))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    run(cli).await
}
