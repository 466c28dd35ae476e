// src/connection/session.rs

//! Defines the state associated with a single client session.

use crate::core::state::Client;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Where a connection is in its lifecycle. Phases only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Connecting,
    Authenticating,
    SyncingFriends,
    ReplayingOffline,
    Active,
    Closed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Connecting => "connecting",
            Phase::Authenticating => "authenticating",
            Phase::SyncingFriends => "syncing-friends",
            Phase::ReplayingOffline => "replaying-offline",
            Phase::Active => "active",
            Phase::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Holds the state specific to a single client session.
#[derive(Debug)]
pub struct SessionState {
    pub phase: Phase,
    /// The registry entry created at login, if authentication succeeded.
    pub client: Option<Arc<Client>>,
    /// Fires when the registry kicks this session.
    pub kill_rx: Option<broadcast::Receiver<()>>,
}

impl SessionState {
    pub(crate) fn new() -> Self {
        Self {
            phase: Phase::Connecting,
            client: None,
            kill_rx: None,
        }
    }

    /// Moves to `next`, ignoring attempts to go backwards.
    pub(crate) fn advance(&mut self, next: Phase) {
        if next > self.phase {
            self.phase = next;
        }
    }

    pub fn account_id(&self) -> Option<String> {
        self.client.as_ref().map(|client| client.id())
    }
}
