mod cli;
mod error;
mod loader;
mod output;

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use ticksweep_core::{
    normalize_proxy_list, CancelHandle, Dispatcher, ProxySource, ReqwestTransport, SymbolSource,
};

use crate::cli::Cli;
use crate::error::CliError;
use crate::loader::{FileProxySource, FileSymbolSource};

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("error: {error}");
        std::process::exit(error.exit_code());
    }
}

async fn run() -> Result<(), CliError> {
    let cli = Cli::parse();
    init_tracing();

    let mut symbols = FileSymbolSource::new(&cli.symbols).load()?;
    if let Some(limit) = cli.limit {
        symbols.truncate(limit);
    }

    let proxies = match &cli.proxies {
        Some(path) => normalize_proxy_list(FileProxySource::new(path).load()?),
        None => Vec::new(),
    };

    let dispatcher = Dispatcher::new(
        cli.engine_config(),
        Arc::new(ReqwestTransport::new()),
        proxies,
    );

    let cancel = CancelHandle::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received; draining in-flight work");
            shutdown.cancel();
        }
    });

    let outcome = dispatcher.run(symbols, cancel).await?;
    output::render(&outcome, cli.format)?;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .init();
}
