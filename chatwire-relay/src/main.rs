//! `chatwire` relay server: real-time delivery for chat clients.
//!
//! An axum WebSocket server that relays typing indicators and new messages
//! between connected chat clients. It keeps no history; events for users
//! with no live connection are dropped.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:4000
//! cargo run --bin chatwire-relay
//!
//! # Run on custom address
//! cargo run --bin chatwire-relay -- --bind 127.0.0.1:8080
//!
//! # Or via environment variable
//! CHATWIRE_ADDR=127.0.0.1:8080 cargo run --bin chatwire-relay
//! ```

use std::sync::Arc;
use std::time::Duration;

use chatwire_relay::config::{RelayCliArgs, RelayConfig};
use chatwire_relay::relay::{self, RelayState};
use clap::Parser;

/// Time given to writer tasks to flush close frames on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

#[tokio::main]
async fn main() {
    let cli = RelayCliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match RelayConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing with the resolved log level.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(
        addr = %config.bind_addr,
        origins = ?config.allowed_origins,
        "starting chatwire relay server"
    );

    let state = Arc::new(RelayState::with_config(&config));

    let (bound_addr, mut handle) =
        match relay::start_server_with_state(&config.bind_addr, Arc::clone(&state)).await {
            Ok(started) => started,
            Err(e) => {
                tracing::error!(error = %e, "failed to start relay server");
                std::process::exit(1);
            }
        };
    tracing::info!(addr = %bound_addr, "relay server listening");

    tokio::select! {
        result = &mut handle => {
            if let Err(e) = result {
                tracing::error!(error = %e, "relay server task failed");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!(
                connections = state.connection_count(),
                "shutdown requested, closing connections"
            );
            state.close_all_connections();
            tokio::time::sleep(SHUTDOWN_GRACE).await;
            handle.abort();
        }
    }
}
