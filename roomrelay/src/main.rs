mod cipher;
mod client;
mod config;
mod connection_limiter;
mod liveness;
mod presence;
mod protocol;
mod room;
mod server;
mod session;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cipher::AesEcbCipher;
use config::Args;
use server::RelayServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .context("invalid log level")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    let addr = args.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to listen on {}", addr))?;

    info!("Room relay listening on {}", listener.local_addr()?);

    RelayServer::new(args.relay_config(), Arc::new(AesEcbCipher))
        .serve(listener)
        .await
}
