// src/core/persistence/seed.rs

//! Loads an accounts file (e.g., `accounts.json`) into a [`MemoryStore`].

use super::{MemoryStore, Persistence};
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use tracing::info;

/// The on-disk layout of the accounts file.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct AccountsFile {
    pub accounts: Vec<SeedAccount>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SeedAccount {
    pub name: String,
    pub password: String,
    #[serde(default)]
    pub ip: String,
    /// Names of accounts this one is friends with. Friendship is symmetric.
    #[serde(default)]
    pub friends: Vec<String>,
}

impl AccountsFile {
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read accounts file at '{path}'"))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse accounts JSON from '{path}'"))
    }

    /// Registers every account in file order (ids are assigned 1, 2, ...), then
    /// applies the friendships.
    pub async fn apply(&self, store: &MemoryStore) -> Result<()> {
        for seed in &self.accounts {
            store
                .register_account(&seed.name, &seed.password, &seed.ip)
                .map_err(|e| anyhow!("Failed to register seed account '{}': {}", seed.name, e))?;
        }

        for seed in &self.accounts {
            let me = store.find_account_by_name(&seed.name).await?;
            for friend_name in &seed.friends {
                let friend = store.find_account_by_name(friend_name).await.map_err(|_| {
                    anyhow!(
                        "Seed account '{}' lists unknown friend '{}'",
                        seed.name,
                        friend_name
                    )
                })?;
                store.befriend(me.id, friend.id).await?;
            }
        }

        info!("Loaded {} accounts from seed file.", self.accounts.len());
        Ok(())
    }
}
