//! HTTP bridge serving MIFARE Classic sector and block access on a PC/SC reader

mod config;
mod discovery;
mod routes;
mod server;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use mifare_classic::{Engine, TransportAdapter};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{Config, DEFAULT_CONFIG_FILE, Overrides};
use crate::discovery::Discovery;
use crate::routes::AppState;

#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// TOML configuration file; ignored when it does not exist
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Address to listen for HTTP requests
    #[arg(short, long, value_name = "ADDR")]
    listen: Option<SocketAddr>,

    /// Only bind a reader whose name contains this string
    #[arg(short, long)]
    reader: Option<String>,

    /// Serve a simulated MIFARE Classic 1K instead of a PC/SC reader
    #[arg(long)]
    simulate: bool,

    /// Trace level output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            listen: self.listen,
            reader: self.reader.clone(),
            simulate: self.simulate,
        }
    }
}

fn setup_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "trace" } else { "info" }));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(true)
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = Config::load(&cli.config, &cli.overrides())?;

    let adapter = Arc::new(TransportAdapter::new());
    let engine = Arc::new(Engine::new(adapter, config.engine.clone()));
    let discovery = if config.simulate {
        Discovery::simulated(&engine)
    } else {
        Discovery::pcsc(&engine, config.reader.clone(), config.pcsc.clone())?
    };

    let listener = TcpListener::bind(config.listen).await?;
    info!(addr = %listener.local_addr()?, "MIFARE bridge listening");

    server::run(listener, AppState::new(engine), shutdown_signal()).await;

    tokio::task::spawn_blocking(move || discovery.stop()).await?;
    Ok(())
}
