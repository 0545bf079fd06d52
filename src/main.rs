// src/main.rs

//! The main entry point for the beryl proxy.

use anyhow::Result;
use beryl::config::Config;
use beryl::server::Server;
use std::env;
use tracing::error;
use tracing_subscriber::filter::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().collect();
    if args.contains(&"--version".to_string()) {
        println!("beryl {VERSION}");
        return Ok(());
    }

    // Configuration precedence: file, then environment, then flags.
    let config_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1));
    let mut config = match config_path {
        Some(path) => match Config::from_file(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("{e:#}");
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };
    if let Err(e) = config.apply_env_overrides() {
        eprintln!("{e:#}");
        std::process::exit(1);
    }
    if let Some(port_index) = args.iter().position(|arg| arg == "--port") {
        match args.get(port_index + 1).map(|s| s.parse::<u16>()) {
            Some(Ok(port)) => config.port = port,
            _ => {
                eprintln!("--port flag requires a valid port number");
                std::process::exit(1);
            }
        }
    }

    let log_level = env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .compact()
        .with_ansi(true)
        .init();

    let server = Server::bind(&config).await?;
    if let Err(e) = server.run().await {
        error!("server runtime error: {e}");
        return Err(e);
    }
    Ok(())
}
