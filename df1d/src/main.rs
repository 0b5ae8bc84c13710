//! DF1 link layer service daemon.
//!
//! Reads the connection configuration, brings up one task per serial
//! line, and runs until told to stop. SIGTERM and SIGINT shut the
//! service down cleanly; SIGHUP tears all connections down, re-reads the
//! configuration and starts over.

mod logger;

use anyhow::Result;
use clap::Parser;
use df1_link::{Service, ServiceConfig};
use std::path::PathBuf;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Allen-Bradley DF1 link layer service.
#[derive(Parser)]
#[command(name = "df1d")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "DF1 link layer service", long_about = None)]
struct Cli {
    /// Enable debug log messages.
    #[arg(short, long)]
    debug: bool,

    /// Run in foreground, log to standard error.
    #[arg(short, long)]
    foreground: bool,

    /// Configuration file.
    config: PathBuf,
}

enum LoopExit {
    Shutdown,
    Reload,
    /// Every connection ended on its own (fatal line errors).
    Ended,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = logger::init(cli.foreground, cli.debug);
    info!(
        "Starting DF1 link layer service v{}.",
        env!("CARGO_PKG_VERSION")
    );

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sighup = signal(SignalKind::hangup())?;
    let config_path = cli.config.to_string_lossy().to_string();

    loop {
        let config = match ServiceConfig::load(&config_path) {
            Ok(c) => c,
            Err(e) => {
                error!("Unable to read configuration file: {}.", e);
                break;
            }
        };
        let cancel = CancellationToken::new();
        let service = match Service::start(&config, cancel.clone()).await {
            Ok(s) => s,
            Err(e) => {
                error!("{}, shutting down.", e);
                break;
            }
        };
        info!("{} connection(s) running.", service.len());

        let mut joined = Box::pin(service.join());
        let exit = tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down.");
                LoopExit::Shutdown
            }
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down.");
                LoopExit::Shutdown
            }
            _ = sighup.recv() => {
                info!("Received SIGHUP, restarting.");
                LoopExit::Reload
            }
            _ = &mut joined => {
                info!("No remaining connections, shutting down.");
                LoopExit::Ended
            }
        };

        match exit {
            LoopExit::Ended => break,
            LoopExit::Shutdown => {
                cancel.cancel();
                joined.await;
                break;
            }
            LoopExit::Reload => {
                cancel.cancel();
                joined.await;
            }
        }
    }
    Ok(())
}
