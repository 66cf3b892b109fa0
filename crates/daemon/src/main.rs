// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hindsight daemon entry point.
//!
//! One positional argument: the main configuration file. `SIGINT` and
//! `SIGTERM` (or a plugin configured with `shutdown_terminate`) initiate
//! an orderly shutdown. Exit code 0 on clean shutdown, nonzero on startup
//! failure.

use hs_core::Config;
use hs_daemon::{register_builtins, Daemon};
use hs_sandbox::NativeEngine;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let cfg_path = match args.next().as_deref() {
        Some("--version" | "-V") => {
            println!("hindsightd {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Some("--help" | "-h") => {
            println!("hindsightd {}", env!("CARGO_PKG_VERSION"));
            println!("Hindsight daemon - hosts the input/analysis/output plugin pipeline");
            println!();
            println!("USAGE:");
            println!("    hindsightd <config.toml>");
            println!();
            println!("OPTIONS:");
            println!("    -h, --help       Print help information");
            println!("    -V, --version    Print version information");
            return Ok(());
        }
        Some(path) => PathBuf::from(path),
        None => {
            eprintln!("usage: hindsightd <config.toml>");
            std::process::exit(1);
        }
    };
    if args.next().is_some() {
        eprintln!("usage: hindsightd <config.toml>");
        std::process::exit(1);
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cfg = Config::load(&cfg_path)?;
    let mut engine = NativeEngine::new();
    register_builtins(&mut engine);

    let mut daemon = Daemon::start(cfg, Arc::new(engine))?;
    let shutdown = daemon.shutdown_handle();

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let internal = tokio::task::spawn_blocking(move || shutdown.wait());
    tokio::select! {
        _ = sigint.recv() => info!("stop signal received (SIGINT)"),
        _ = sigterm.recv() => info!("stop signal received (SIGTERM)"),
        _ = internal => info!("shutdown requested from within"),
    }

    daemon.shutdown();
    Ok(())
}
