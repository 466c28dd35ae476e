// src/server/context.rs

use crate::core::state::RelayState;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinSet;
use tracing_subscriber::{filter::EnvFilter, reload};

/// Holds all the initialized state required to run the server's main loop.
pub struct ServerContext {
    pub state: Arc<RelayState>,
    pub listener: TcpListener,
    pub shutdown_tx: broadcast::Sender<()>,
    pub background_tasks: JoinSet<Result<(), anyhow::Error>>,
    /// One permit per connection; caps concurrent clients at `max_clients`.
    pub connection_permits: Arc<Semaphore>,
    pub log_reload_handle: Arc<reload::Handle<EnvFilter, tracing_subscriber::Registry>>,
}
