// src/core/persistence/mod.rs

//! The persistence collaborator consumed by the relay engine.
//!
//! The engine only ever talks to storage through the [`Persistence`] trait;
//! [`MemoryStore`] is the bundled implementation.

use crate::core::relation::RelationVector;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use thiserror::Error;

mod memory;
pub mod seed;

pub use memory::MemoryStore;

/// Numeric account identifier. Clients see its decimal string form.
pub type AccountId = u64;

/// Errors reported by a persistence backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("record already exists: {0}")]
    Conflict(String),

    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// An account record as seen by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    /// Opaque stored credential; see `core::auth` for how it is checked.
    pub password: String,
    pub ip: String,
    pub relation: RelationVector,
    pub online: bool,
    pub registered_at: DateTime<Local>,
    pub leave_at: Option<DateTime<Local>>,
}

/// A chat payload persisted because its receiver was not connected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub id: u64,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub sent_at: DateTime<Local>,
}

/// Content prefix marking a queued message as a stashed file reference.
pub const FILE_SENTINEL_PREFIX: &str = "file:";

/// Prepended to queued chat text that would otherwise start with
/// [`FILE_SENTINEL_PREFIX`] or with this character itself.
pub const CHAT_ESCAPE: char = '\\';

/// Encodes chat text for the offline queue so no chat can read as a file reference.
pub fn escape_chat_content(content: &str) -> Cow<'_, str> {
    if content.starts_with(FILE_SENTINEL_PREFIX) || content.starts_with(CHAT_ESCAPE) {
        Cow::Owned(format!("{CHAT_ESCAPE}{content}"))
    } else {
        Cow::Borrowed(content)
    }
}

impl QueuedMessage {
    /// The storage key of the pending file this message points at, if any.
    pub fn file_key(&self) -> Option<&str> {
        self.content.strip_prefix(FILE_SENTINEL_PREFIX)
    }

    /// The chat text as its sender wrote it. Inverse of [`escape_chat_content`].
    pub fn chat_text(&self) -> &str {
        self.content
            .strip_prefix(CHAT_ESCAPE)
            .unwrap_or(&self.content)
    }
}

/// The storage operations the engine depends on. Each call is assumed atomic
/// on its own; the engine never relies on multi-call transactions.
#[async_trait]
pub trait Persistence: Send + Sync + std::fmt::Debug {
    async fn find_account_by_name(&self, name: &str) -> Result<Account, StorageError>;

    async fn find_account_by_id(&self, id: AccountId) -> Result<Account, StorageError>;

    async fn set_online(&self, id: AccountId, ip: &str) -> Result<(), StorageError>;

    async fn set_offline(&self, id: AccountId, leave_at: DateTime<Local>)
    -> Result<(), StorageError>;

    async fn change_password(&self, id: AccountId, new_password: &str)
    -> Result<(), StorageError>;

    async fn change_display_name(&self, id: AccountId, new_name: &str)
    -> Result<(), StorageError>;

    async fn update_relation(
        &self,
        id: AccountId,
        relation: RelationVector,
    ) -> Result<(), StorageError>;

    async fn enqueue_offline_message(
        &self,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
    ) -> Result<QueuedMessage, StorageError>;

    /// All messages queued for `receiver_id`, newest first.
    async fn list_offline_messages(
        &self,
        receiver_id: &str,
    ) -> Result<Vec<QueuedMessage>, StorageError>;

    async fn delete_offline_message(&self, message_id: u64) -> Result<(), StorageError>;
}
