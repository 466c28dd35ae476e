// src/core/persistence/memory.rs

//! An in-process implementation of the persistence collaborator.

use super::{Account, AccountId, Persistence, QueuedMessage, StorageError};
use crate::core::relation::{RelationState, RelationVector};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Keeps accounts and queued messages in concurrent maps.
#[derive(Debug)]
pub struct MemoryStore {
    accounts: DashMap<AccountId, Account>,
    messages: DashMap<u64, QueuedMessage>,
    next_account_id: AtomicU64,
    next_message_id: AtomicU64,
    relation_bytes: usize,
}

impl MemoryStore {
    /// Creates an empty store whose new accounts get `relation_bytes`-long vectors.
    pub fn new(relation_bytes: usize) -> Self {
        Self {
            accounts: DashMap::new(),
            messages: DashMap::new(),
            next_account_id: AtomicU64::new(1),
            next_message_id: AtomicU64::new(1),
            relation_bytes,
        }
    }

    /// Registers a new account under the next free id.
    pub fn register_account(
        &self,
        name: &str,
        password: &str,
        ip: &str,
    ) -> Result<Account, StorageError> {
        if self.id_for_name(name).is_some() {
            return Err(StorageError::Conflict(format!("account name '{name}'")));
        }
        let id = self.next_account_id.fetch_add(1, Ordering::SeqCst);
        let account = Account {
            id,
            name: name.to_string(),
            password: password.to_string(),
            ip: ip.to_string(),
            relation: RelationVector::zeroed(self.relation_bytes),
            online: false,
            registered_at: Local::now(),
            leave_at: None,
        };
        self.accounts.insert(id, account.clone());
        debug!("Registered account '{}' with id {}", name, id);
        Ok(account)
    }

    /// Marks two accounts as friends of each other.
    pub async fn befriend(&self, a: AccountId, b: AccountId) -> Result<(), StorageError> {
        let first = self.find_account_by_id(a).await?;
        let second = self.find_account_by_id(b).await?;

        let first_relation = first
            .relation
            .with(b as usize, RelationState::Friend)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let second_relation = second
            .relation
            .with(a as usize, RelationState::Friend)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        self.update_relation(a, first_relation).await?;
        self.update_relation(b, second_relation).await
    }

    /// Number of messages currently queued across all receivers.
    pub fn queued_len(&self) -> usize {
        self.messages.len()
    }

    fn id_for_name(&self, name: &str) -> Option<AccountId> {
        self.accounts
            .iter()
            .find(|entry| entry.value().name == name)
            .map(|entry| *entry.key())
    }

    fn with_account<F>(&self, id: AccountId, update: F) -> Result<(), StorageError>
    where
        F: FnOnce(&mut Account),
    {
        let mut entry = self
            .accounts
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(format!("account {id}")))?;
        update(entry.value_mut());
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(crate::core::relation::DEFAULT_RELATION_BYTES)
    }
}

#[async_trait]
impl Persistence for MemoryStore {
    async fn find_account_by_name(&self, name: &str) -> Result<Account, StorageError> {
        self.accounts
            .iter()
            .find(|entry| entry.value().name == name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StorageError::NotFound(format!("account '{name}'")))
    }

    async fn find_account_by_id(&self, id: AccountId) -> Result<Account, StorageError> {
        self.accounts
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StorageError::NotFound(format!("account {id}")))
    }

    async fn set_online(&self, id: AccountId, ip: &str) -> Result<(), StorageError> {
        self.with_account(id, |account| {
            account.online = true;
            account.ip = ip.to_string();
        })
    }

    async fn set_offline(
        &self,
        id: AccountId,
        leave_at: DateTime<Local>,
    ) -> Result<(), StorageError> {
        self.with_account(id, |account| {
            account.online = false;
            account.leave_at = Some(leave_at);
        })
    }

    async fn change_password(
        &self,
        id: AccountId,
        new_password: &str,
    ) -> Result<(), StorageError> {
        self.with_account(id, |account| account.password = new_password.to_string())
    }

    async fn change_display_name(
        &self,
        id: AccountId,
        new_name: &str,
    ) -> Result<(), StorageError> {
        if let Some(owner) = self.id_for_name(new_name)
            && owner != id
        {
            return Err(StorageError::Conflict(format!("account name '{new_name}'")));
        }
        self.with_account(id, |account| account.name = new_name.to_string())
    }

    async fn update_relation(
        &self,
        id: AccountId,
        relation: RelationVector,
    ) -> Result<(), StorageError> {
        self.with_account(id, |account| account.relation = relation)
    }

    async fn enqueue_offline_message(
        &self,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
    ) -> Result<QueuedMessage, StorageError> {
        let id = self.next_message_id.fetch_add(1, Ordering::SeqCst);
        let message = QueuedMessage {
            id,
            sender_id: sender_id.to_string(),
            receiver_id: receiver_id.to_string(),
            content: content.to_string(),
            sent_at: Local::now(),
        };
        self.messages.insert(id, message.clone());
        Ok(message)
    }

    async fn list_offline_messages(
        &self,
        receiver_id: &str,
    ) -> Result<Vec<QueuedMessage>, StorageError> {
        let mut queued: Vec<QueuedMessage> = self
            .messages
            .iter()
            .filter(|entry| entry.value().receiver_id == receiver_id)
            .map(|entry| entry.value().clone())
            .collect();
        // Ids are allocated in enqueue order, so they break timestamp ties.
        queued.sort_by(|a, b| b.sent_at.cmp(&a.sent_at).then(b.id.cmp(&a.id)));
        Ok(queued)
    }

    async fn delete_offline_message(&self, message_id: u64) -> Result<(), StorageError> {
        self.messages
            .remove(&message_id)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(format!("queued message {message_id}")))
    }
}
