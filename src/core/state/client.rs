// src/core/state/client.rs

//! Contains state definitions related to connected clients and the registry
//! that routes messages between them.

use crate::core::RelayError;
use crate::core::metrics;
use crate::core::protocol::{FriendInfo, ServerMessage};
use chrono::{DateTime, Local};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{MutexGuard, broadcast};

pub type ShutdownSender = broadcast::Sender<()>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
pub type ClientWriter = Arc<tokio::sync::Mutex<BoxedWriter>>;

/// A point-in-time description of a connected client.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ClientInfo {
    pub id: String,
    pub session_id: u64,
    pub ip: String,
    pub connected_at: DateTime<Local>,
    pub last_active: DateTime<Local>,
    pub friends: Vec<FriendInfo>,
}

/// One authenticated connection.
///
/// The read half of the socket stays with the connection's own worker. The
/// write half lives here behind an async mutex, so any worker that looked the
/// client up in the registry can write to it, and a file relay can hold it for
/// the whole transfer without other writes interleaving.
pub struct Client {
    info: Mutex<ClientInfo>,
    writer: ClientWriter,
    kill_tx: ShutdownSender,
}

impl Client {
    pub fn new(
        id: impl Into<String>,
        session_id: u64,
        ip: impl Into<String>,
        writer: ClientWriter,
        kill_tx: ShutdownSender,
    ) -> Self {
        let now = Local::now();
        Self {
            info: Mutex::new(ClientInfo {
                id: id.into(),
                session_id,
                ip: ip.into(),
                connected_at: now,
                last_active: now,
                friends: Vec::new(),
            }),
            writer,
            kill_tx,
        }
    }

    pub fn id(&self) -> String {
        self.info.lock().id.clone()
    }

    pub fn session_id(&self) -> u64 {
        self.info.lock().session_id
    }

    pub fn info(&self) -> ClientInfo {
        self.info.lock().clone()
    }

    pub fn touch(&self) {
        self.info.lock().last_active = Local::now();
    }

    pub fn set_friends(&self, friends: Vec<FriendInfo>) {
        self.info.lock().friends = friends;
    }

    /// Serializes and writes one message to this client.
    pub async fn send(&self, message: &ServerMessage) -> Result<(), RelayError> {
        let bytes = message.encode_to_bytes()?;
        self.send_raw(&bytes).await
    }

    /// Writes raw bytes to this client.
    pub async fn send_raw(&self, bytes: &[u8]) -> Result<(), RelayError> {
        let mut writer = self.writer.lock().await;
        writer.write_all(bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Takes exclusive hold of the client's write half.
    pub async fn lock_writer(&self) -> MutexGuard<'_, BoxedWriter> {
        self.writer.lock().await
    }

    /// Asks the owning worker to close the connection.
    pub fn kill(&self) {
        // No receivers means the worker is already gone.
        let _ = self.kill_tx.send(());
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client").field("info", &*self.info.lock()).finish()
    }
}

/// The live mapping from account identifier to connected client.
///
/// A single reader/writer lock guards the map. It is never held across an
/// await point, so every operation completes in bounded time.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: RwLock<HashMap<String, Arc<Client>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    /// Inserts or replaces the entry for `id`, returning the replaced client.
    pub fn register(&self, id: &str, client: Arc<Client>) -> Option<Arc<Client>> {
        let mut clients = self.clients.write();
        let replaced = clients.insert(id.to_string(), client);
        metrics::REGISTERED_CLIENTS.set(clients.len() as f64);
        replaced
    }

    pub fn lookup(&self, id: &str) -> Option<Arc<Client>> {
        self.clients.read().get(id).cloned()
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Client>> {
        let mut clients = self.clients.write();
        let removed = clients.remove(id);
        metrics::REGISTERED_CLIENTS.set(clients.len() as f64);
        removed
    }

    /// Removes the entry for `id` only if it still belongs to `session_id`.
    /// A newer login under the same id is left in place.
    pub fn remove_session(&self, id: &str, session_id: u64) -> bool {
        let mut clients = self.clients.write();
        match clients.get(id) {
            Some(client) if client.session_id() == session_id => {
                clients.remove(id);
                metrics::REGISTERED_CLIENTS.set(clients.len() as f64);
                true
            }
            _ => false,
        }
    }

    /// A consistent copy of every registered client.
    pub fn snapshot(&self) -> Vec<ClientInfo> {
        self.clients
            .read()
            .values()
            .map(|client| client.info())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }

    /// Force-disconnects a client: removes it and signals its worker to close.
    pub fn kick(&self, id: &str) -> bool {
        match self.remove(id) {
            Some(client) => {
                client.kill();
                true
            }
            None => false,
        }
    }

    /// Writes raw bytes into a connected client's stream.
    pub async fn inject(&self, id: &str, bytes: &[u8]) -> Result<(), RelayError> {
        let client = self
            .lookup(id)
            .ok_or_else(|| RelayError::Delivery(id.to_string(), "client not connected".into()))?;
        client.send_raw(bytes).await
    }
}
