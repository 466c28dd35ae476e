// src/server/initialization.rs

//! Handles server initialization: state setup, the file storage directory
//! and the listening socket.

use super::context::ServerContext;
use crate::config::Config;
use crate::core::state::RelayState;
use anyhow::{Result, anyhow};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinSet;
use tracing::{info, warn};
use tracing_subscriber::{filter::EnvFilter, reload};

/// Initializes all server components before starting the main loop.
pub async fn setup(
    config: Config,
    log_reload_handle: Arc<reload::Handle<EnvFilter, tracing_subscriber::Registry>>,
) -> Result<ServerContext> {
    log_startup_info(&config);
    let (shutdown_tx, _) = broadcast::channel(1);

    prepare_storage_dir(&config).await?;

    let state = RelayState::initialize(config).await?;
    info!("Relay state initialized.");

    let listener = TcpListener::bind((state.config.host.as_str(), state.config.port))
        .await
        .map_err(|e| {
            anyhow!(
                "Failed to bind {}:{}: {}",
                state.config.host,
                state.config.port,
                e
            )
        })?;
    info!(
        "chatrelay listening on {}:{}",
        state.config.host, state.config.port
    );
    let connection_permits = Arc::new(Semaphore::new(state.config.max_clients));

    Ok(ServerContext {
        state,
        listener,
        shutdown_tx,
        background_tasks: JoinSet::new(),
        connection_permits,
        log_reload_handle,
    })
}

/// Creates the store-and-forward directory so the first offline file does not
/// have to.
async fn prepare_storage_dir(config: &Config) -> Result<()> {
    let path = std::path::Path::new(&config.files.storage_path);
    tokio::fs::create_dir_all(path).await.map_err(|e| {
        anyhow!(
            "Failed to create file storage directory '{}': {}",
            path.display(),
            e
        )
    })?;

    let mut leftovers = tokio::fs::read_dir(path).await?;
    let mut count = 0usize;
    while leftovers.next_entry().await?.is_some() {
        count += 1;
    }
    if count > 0 {
        warn!(
            "{} files from a previous run are left in '{}'. Their pending records were not persisted and they will not be delivered.",
            count,
            path.display()
        );
    }
    Ok(())
}

/// Logs key configuration parameters at startup.
fn log_startup_info(config: &Config) {
    info!(
        "Accepting up to {} concurrent clients; login timeout {:?}.",
        config.max_clients, config.login_timeout
    );
    match config.files.max_file_size {
        0 => info!("File transfers are not size-limited."),
        limit => info!(
            "File transfers are limited to {} bytes ({:.2} MB).",
            limit,
            limit as f64 / 1024.0 / 1024.0
        ),
    }
    if config.accounts_file.is_none() {
        warn!("No 'accounts_file' configured. Nobody will be able to log in.");
    }
}
