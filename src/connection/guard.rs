// src/connection/guard.rs

//! Defines `ConnectionGuard`, which tears a connection's shared state down
//! exactly once.

use crate::core::metrics;
use crate::core::persistence::AccountId;
use crate::core::state::RelayState;
use chrono::Local;
use std::sync::Arc;
use tracing::{debug, warn};

/// Releases everything a connection holds outside its own task: the
/// connected-clients gauge, the registry entry and the account's online flag.
///
/// `close` does the work once and reports whether it did. If the handler
/// never gets to call it, `Drop` performs the same cleanup.
pub struct ConnectionGuard {
    state: Arc<RelayState>,
    session_id: u64,
    addr: String,
    account_id: Option<String>,
    closed: bool,
}

impl ConnectionGuard {
    pub fn new(state: Arc<RelayState>, session_id: u64, addr: impl Into<String>) -> Self {
        metrics::CONNECTED_CLIENTS.inc();
        Self {
            state,
            session_id,
            addr: addr.into(),
            account_id: None,
            closed: false,
        }
    }

    /// Records the account this connection authenticated as.
    pub fn bind(&mut self, account_id: impl Into<String>) {
        self.account_id = Some(account_id.into());
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Marks the account offline and drops this session's registry entry.
    /// Returns `false` if the guard was already closed.
    pub async fn close(&mut self) -> bool {
        if self.closed {
            return false;
        }
        if let Some(account_id) = self.begin_close() {
            mark_offline(&self.state, &account_id).await;
        }
        true
    }

    /// Runs the synchronous half of teardown. Returns the bound account id
    /// unless a newer session for the same account is registered.
    fn begin_close(&mut self) -> Option<String> {
        if self.closed {
            return None;
        }
        self.closed = true;
        metrics::CONNECTED_CLIENTS.dec();
        debug!("Cleaning up resources for connection {}", self.addr);

        let account_id = self.account_id.take()?;
        let registry = &self.state.registry;
        if registry.remove_session(&account_id, self.session_id)
            || registry.lookup(&account_id).is_none()
        {
            return Some(account_id);
        }
        // A newer login took the entry over; the online flag belongs to it now.
        debug!(
            "Registry entry for {} no longer belongs to session {}; leaving it in place.",
            account_id, self.session_id
        );
        None
    }
}

async fn mark_offline(state: &RelayState, account_id: &str) {
    let Ok(id) = account_id.parse::<AccountId>() else {
        warn!("Cannot mark non-numeric account id '{}' offline.", account_id);
        return;
    };
    if let Err(e) = state.store.set_offline(id, Local::now()).await {
        warn!("Failed to mark account {} offline: {}", account_id, e);
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let Some(account_id) = self.begin_close() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let state = self.state.clone();
                handle.spawn(async move { mark_offline(&state, &account_id).await });
            }
            Err(_) => warn!(
                "No runtime available to mark account {} offline during teardown.",
                account_id
            ),
        }
    }
}
