// src/server/connection_loop.rs

//! Contains the main server loop for accepting connections and handling graceful shutdown.

use super::context::ServerContext;
use crate::config::Config;
use crate::connection::ConnectionHandler;
use crate::core::errors::is_normal_disconnect;
use crate::core::metrics;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use tracing_subscriber::filter::EnvFilter;

/// The main server loop that accepts connections and handles graceful shutdown.
pub async fn run(mut ctx: ServerContext) {
    let mut session_id_counter: u64 = 0;
    let mut client_tasks = JoinSet::new();

    let (mut sigint, mut sigterm, mut sighup) = match (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
        signal(SignalKind::hangup()),
    ) {
        (Ok(int), Ok(term), Ok(hup)) => (int, term, hup),
        (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => {
            error!("Failed to register signal handlers: {}. Shutting down.", e);
            return;
        }
    };

    loop {
        tokio::select! {
            biased;

            _ = sigint.recv() => {
                info!("SIGINT received, initiating graceful shutdown.");
                break;
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received, initiating graceful shutdown.");
                break;
            }
            _ = sighup.recv() => {
                reload_log_level(&ctx);
            }

            Some(res) = ctx.background_tasks.join_next() => {
                match res {
                    Ok(Ok(())) => warn!("A background task finished unexpectedly without an error."),
                    Ok(Err(e)) => { error!("CRITICAL: Background task failed: {}. Shutting down.", e); break; }
                    Err(e) => { error!("CRITICAL: Background task panicked: {e:?}. Shutting down."); break; }
                }
            },

            res = ctx.listener.accept() => {
                let (socket, addr) = match res {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        continue;
                    }
                };

                let permit = match ctx.connection_permits.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        warn!("Rejecting connection from {}: max_clients reached.", addr);
                        drop(socket);
                        continue;
                    }
                };

                info!("Accepted new connection from: {}", addr);
                metrics::CONNECTIONS_RECEIVED_TOTAL.inc();
                if let Err(e) = socket.set_nodelay(true) {
                    debug!("Could not set TCP_NODELAY for {}: {}", addr, e);
                }

                session_id_counter = session_id_counter.wrapping_add(1);
                let session_id = session_id_counter;
                let state = ctx.state.clone();
                let global_shutdown_rx = ctx.shutdown_tx.subscribe();

                client_tasks.spawn(async move {
                    let _permit = permit;
                    let handler = ConnectionHandler::new(socket, addr, state, session_id, global_shutdown_rx);
                    if let Err(e) = handler.run().await
                        && !is_normal_disconnect(&e)
                    {
                        warn!("Connection from {} terminated: {}", addr, e);
                    }
                });
            },

            Some(res) = client_tasks.join_next() => {
                if let Err(e) = res
                    && e.is_panic()
                {
                    error!("A client handler panicked: {e:?}");
                }
            },
        }
    }

    info!("Shutting down. Sending signal to all tasks.");
    if ctx.shutdown_tx.send(()).is_err() {
        debug!("No task was listening for the shutdown signal.");
    }

    if tokio::time::timeout(Duration::from_secs(5), async {
        while client_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("Timed out waiting for connections to close; aborting the rest.");
        client_tasks.shutdown().await;
    }
    info!("All client connections closed.");

    info!("Waiting for background tasks to finish...");
    if tokio::time::timeout(Duration::from_secs(10), async {
        while ctx.background_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("Timed out waiting for background tasks to finish cleanly.");
    };
    info!("Server shutdown complete.");
}

/// Re-reads `log_level` from the configuration file and applies it.
fn reload_log_level(ctx: &ServerContext) {
    let Some(path) = ctx.state.config.source_path.as_deref() else {
        warn!("SIGHUP received, but the configuration was not loaded from a file.");
        return;
    };
    match Config::from_file(path) {
        Ok(config) => match ctx
            .log_reload_handle
            .reload(EnvFilter::new(&config.log_level))
        {
            Ok(()) => info!("SIGHUP: log level set to '{}'.", config.log_level),
            Err(e) => error!("SIGHUP: failed to apply log level: {}", e),
        },
        Err(e) => error!("SIGHUP: failed to reload '{}': {:#}", path, e),
    }
}
