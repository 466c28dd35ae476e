// src/core/handler/actions/file.rs

use crate::core::protocol::FileHeader;
use crate::core::state::{Client, RelayState};
use crate::core::RelayError;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tracing::warn;

/// Where an offered file ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Relayed(u64),
    /// Stashed on disk under the given storage key.
    Stored(String),
}

/// Takes the `size` payload bytes following a `file_transfer` header off
/// `payload` and either relays them live or stashes them for later.
///
/// Offers that are rejected still have their payload drained, so the sender's
/// stream is positioned on the next message afterwards.
pub async fn handle_file_transfer<R>(
    mut header: FileHeader,
    payload: &mut R,
    sender: &Client,
    state: &Arc<RelayState>,
) -> Result<FileOutcome, RelayError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    header.sender_id = sender.id();

    if let Err(e) = validate(&header, state) {
        warn!(
            "Rejecting file '{}' from {}: {}. Discarding {} payload bytes.",
            header.filename, header.sender_id, e, header.size
        );
        state.transfers.discard(payload, header.size).await?;
        return Err(e);
    }

    match state.registry.lookup(&header.receiver_id) {
        Some(receiver) => {
            let sent = state
                .transfers
                .relay_live(&header, payload, &receiver)
                .await?;
            Ok(FileOutcome::Relayed(sent))
        }
        None => {
            let key = state
                .transfers
                .store(&header, payload, state.store.as_ref())
                .await?;
            Ok(FileOutcome::Stored(key))
        }
    }
}

fn validate(header: &FileHeader, state: &RelayState) -> Result<(), RelayError> {
    if header.receiver_id.trim().is_empty() {
        return Err(RelayError::Validation("file offer has no receiver".into()));
    }
    crate::core::transfer::sanitize_filename(&header.filename)?;
    state.transfers.check_size(header.size)
}
