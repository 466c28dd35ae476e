// src/core/state/core.rs

//! Defines `RelayState`, the shared server-wide state handed to every
//! connection worker.

use super::client::ClientRegistry;
use crate::config::Config;
use crate::core::auth::{CredentialPolicy, DefaultCredentialPolicy};
use crate::core::persistence::seed::AccountsFile;
use crate::core::persistence::{MemoryStore, Persistence};
use crate::core::transfer::FileTransferEngine;
use anyhow::Result;
use std::sync::Arc;
use tracing::info;

/// Everything a connection worker needs, behind one `Arc`.
///
/// The registry and the pending-file table are owned here rather than living
/// in globals, so tests can stand up as many independent relays as they like.
#[derive(Debug)]
pub struct RelayState {
    pub config: Config,
    pub registry: ClientRegistry,
    pub transfers: FileTransferEngine,
    pub store: Arc<dyn Persistence>,
    pub credentials: Arc<dyn CredentialPolicy>,
}

impl RelayState {
    /// Assembles the state around an existing persistence backend.
    pub fn new(
        config: Config,
        store: Arc<dyn Persistence>,
        credentials: Arc<dyn CredentialPolicy>,
    ) -> Self {
        let transfers = FileTransferEngine::new(
            config.files.storage_path.clone(),
            config.files.chunk_size,
            config.files.max_file_size,
        );
        Self {
            config,
            registry: ClientRegistry::new(),
            transfers,
            store,
            credentials,
        }
    }

    /// Builds the state from configuration with the bundled in-memory store,
    /// seeding it from `accounts_file` when one is configured.
    pub async fn initialize(config: Config) -> Result<Arc<Self>> {
        let store = MemoryStore::new(config.relation_bytes);
        if let Some(path) = &config.accounts_file {
            AccountsFile::from_file(path)?.apply(&store).await?;
        } else {
            info!("No accounts file configured; starting with an empty account store.");
        }

        let credentials = DefaultCredentialPolicy::new(config.credentials.hash_new_passwords);
        Ok(Arc::new(Self::new(
            config,
            Arc::new(store),
            Arc::new(credentials),
        )))
    }
}
