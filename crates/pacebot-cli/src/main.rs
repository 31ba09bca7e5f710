//! pacebot: runs the relay against a console transport.
//! Logs go to stderr; stdout carries only outbound replies.

mod console;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use pacebot_core::completion::OpenAiChat;
use pacebot_core::config::Config;
use pacebot_core::persistence::JsonFileRepository;
use pacebot_core::relay::Relay;

use console::{spawn_stdin_reader, ConsoleTransport};

#[tokio::main]
async fn main() -> Result<()> {
    // load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let work_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let config = match Config::load_from_dir(&work_dir) {
        Ok(config) => config,
        Err(e) => {
            warn!("Invalid config ({:#}), using defaults", e);
            Config::default()
        }
    };
    if config.api_key.is_none() {
        warn!("No API key configured; set OPENAI_API_KEY or api_key in config.yaml");
    }

    let memory_file = if config.memory_file.is_absolute() {
        config.memory_file.clone()
    } else {
        work_dir.join(&config.memory_file)
    };

    let completion = Arc::new(OpenAiChat::new(&config)?);
    let transport = Arc::new(ConsoleTransport::new(tokio::io::stdout()));
    let repository = Arc::new(JsonFileRepository::new(memory_file.clone()));

    // an unreadable memory file is left alone rather than overwritten by the flusher
    let relay = Relay::new(config, transport, completion, repository)
        .await
        .with_context(|| format!("Failed to load memory from {}", memory_file.display()))?;

    let (inbound_tx, inbound_rx) = mpsc::channel(64);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    spawn_stdin_reader(inbound_tx).context("Failed to start stdin reader")?;

    // Graceful shutdown on Ctrl+C
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received, finishing queued replies...");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                warn!(error = %e, "Could not install Ctrl+C handler");
                // dropping the sender would read as a shutdown
                std::future::pending::<()>().await;
                drop(shutdown_tx);
            }
        }
    });

    eprintln!("\n  pacebot is listening. Type `name: message` (or just a message) and press Enter.\n");

    relay.run(inbound_rx, shutdown_rx).await;

    info!("pacebot stopped.");
    Ok(())
}
