//! Standalone Modbus server: config, logging and signal handling around
//! the listener core.

mod bank;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use serde::Deserialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use bank::{BankConfig, RegisterBank};
use fieldbus_server::{ConnectionListener, HandlerRegistry, ServerConfig};

#[derive(Parser, Debug)]
#[command(name = "fieldbusd", version, about)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "config/fieldbusd.yaml")]
    config: PathBuf,

    /// Override the configured listen address
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Log filter when RUST_LOG is unset, e.g. "debug"
    #[arg(long, default_value = "info")]
    log: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Settings {
    server: ServerConfig,
    bank: BankConfig,
}

fn load_settings(path: &Path) -> anyhow::Result<Settings> {
    Figment::new()
        .merge(Yaml::file(path))
        .merge(Env::prefixed("FIELDBUSD_").split("__"))
        .extract()
        .with_context(|| format!("loading configuration from {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log)),
        )
        .init();

    let mut settings = load_settings(&args.config)?;
    if let Some(listen) = args.listen {
        settings.server.listen = listen;
    }

    let bank = Arc::new(RegisterBank::new(&settings.bank));
    let mut registry = HandlerRegistry::new();
    bank.install(&mut registry);

    let listener = Arc::new(ConnectionListener::new(settings.server, registry));
    let (socket, addr) = listener.bind().await?;
    info!("fieldbusd serving on {addr}");

    let accept_loop = tokio::spawn(Arc::clone(&listener).run(socket));

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutdown requested");
    listener.shutdown();
    accept_loop.await.context("accept loop panicked")?;
    Ok(())
}
