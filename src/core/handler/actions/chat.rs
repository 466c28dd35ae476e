// src/core/handler/actions/chat.rs

use crate::core::metrics;
use crate::core::persistence::escape_chat_content;
use crate::core::protocol::{ChatMessage, ServerMessage};
use crate::core::state::{Client, RelayState};
use crate::core::RelayError;
use std::sync::Arc;
use tracing::{debug, info};

/// Whether a chat went straight to the receiver or into the offline queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Live,
    Queued,
}

/// Forwards a chat to its receiver if connected, otherwise queues it.
///
/// The `sendid` a client put on the wire is ignored; the authenticated id of
/// `sender` is stamped on instead.
pub async fn handle_chat(
    mut message: ChatMessage,
    sender: &Client,
    state: &Arc<RelayState>,
) -> Result<Delivery, RelayError> {
    if message.receiver_id.trim().is_empty() {
        return Err(RelayError::Validation("message has no receiver".into()));
    }
    message.sender_id = sender.id();

    if let Some(receiver) = state.registry.lookup(&message.receiver_id) {
        let receiver_id = message.receiver_id.clone();
        receiver
            .send(&ServerMessage::Chat(message))
            .await
            .map_err(|e| RelayError::Delivery(receiver_id.clone(), e.to_string()))?;
        metrics::MESSAGES_ROUTED_TOTAL
            .with_label_values(&["live"])
            .inc();
        debug!("Chat from {} forwarded live to {}.", sender.id(), receiver_id);
        return Ok(Delivery::Live);
    }

    let content = escape_chat_content(&message.content);
    let queued = state
        .store
        .enqueue_offline_message(&message.sender_id, &message.receiver_id, &content)
        .await?;
    metrics::MESSAGES_ROUTED_TOTAL
        .with_label_values(&["queued"])
        .inc();
    info!(
        "Receiver {} is offline; chat from {} queued as message {}.",
        queued.receiver_id, queued.sender_id, queued.id
    );
    Ok(Delivery::Queued)
}
