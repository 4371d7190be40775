//! Blackhole - a passive multi-port TCP sink
//!
//! Listens on a configurable set of ports, accepts any connection, and
//! records every chunk of data received:
//! - Raw bytes stored as hex plus a lossy text rendering
//! - Human-readable line output or a CSV table
//! - Every read answered with an empty write; nothing is ever echoed

mod config;
mod handlers;
mod record;
mod sink;

use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::handlers::{ListenerState, Server};

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_lowercase()));

    // Use LOG_FORMAT=gcp for structured GCP Cloud Logging
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "gcp" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (before any other initialization)
    let _ = dotenvy::dotenv();

    let config = config::Config::load()?;
    init_logging(&config.logging);
    info!("Starting Blackhole...");

    // One sink for every listener, prepared before any port opens
    let sink = sink::Sink::from_config(&config.collector)?;
    let writer = sink::start_writer(sink)?;

    let server = Arc::new(Server::new(&config.listener, writer.handle()));
    let mut serving = tokio::spawn({
        let server = server.clone();
        async move { server.start().await }
    });

    let started = server.wait_started().await;
    for listener in server.listeners() {
        if listener.state() != ListenerState::Serving {
            warn!("Port {} is not being served", listener.port());
        }
    }
    info!("{} of {} listeners serving", started, server.listeners().len());

    tokio::select! {
        result = &mut serving => {
            if let Err(e) = result {
                error!("Listener task failed: {}", e);
            } else {
                warn!("No listener is serving, shutting down");
            }
        }
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!("Failed to wait for shutdown signal: {}", e);
            }
            info!("Starting graceful shutdown");
            server.stop().await;
            if let Err(e) = serving.await {
                error!("Listener task failed: {}", e);
            }
        }
    }

    writer.shutdown().await;
    info!("Graceful shutdown finished");

    Ok(())
}
