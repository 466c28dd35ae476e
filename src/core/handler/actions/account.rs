// src/core/handler/actions/account.rs

use crate::core::persistence::AccountId;
use crate::core::protocol::{AckStatus, ChangeNameRequest, ChangePasswordRequest, ServerMessage};
use crate::core::state::{Client, RelayState};
use crate::core::RelayError;
use std::sync::Arc;
use tracing::{info, warn};

/// Applies a password change and always answers with a `changepwd_response`.
pub async fn handle_change_password(
    request: ChangePasswordRequest,
    client: &Client,
    state: &Arc<RelayState>,
) -> Result<(), RelayError> {
    let reply = match change_password(&request, client, state).await {
        Ok(()) => {
            info!("Account {} changed its password.", client.id());
            ServerMessage::ChangePasswordResponse {
                status: AckStatus::Success,
                message: "password updated".to_string(),
            }
        }
        Err(e) => {
            warn!("Password change for {} rejected: {}", client.id(), e);
            ServerMessage::ChangePasswordResponse {
                status: AckStatus::Fail,
                message: e.to_string(),
            }
        }
    };
    client.send(&reply).await
}

async fn change_password(
    request: &ChangePasswordRequest,
    client: &Client,
    state: &Arc<RelayState>,
) -> Result<(), RelayError> {
    if request.new_password.is_empty() {
        return Err(RelayError::Validation("new password cannot be empty".into()));
    }
    let id: AccountId = client.id().parse()?;
    let account = state.store.find_account_by_id(id).await?;
    if !state
        .credentials
        .verify(&account.password, &request.current_password)
    {
        return Err(RelayError::BadCredential);
    }
    let stored = state.credentials.store(&request.new_password)?;
    state.store.change_password(id, &stored).await?;
    Ok(())
}

/// Applies a display-name change and always answers with a `changename_response`.
pub async fn handle_change_name(
    request: ChangeNameRequest,
    client: &Client,
    state: &Arc<RelayState>,
) -> Result<(), RelayError> {
    let status = match change_name(&request, client, state).await {
        Ok(()) => {
            info!("Account {} is now named '{}'.", client.id(), request.name.trim());
            AckStatus::Success
        }
        Err(e) => {
            warn!("Name change for {} rejected: {}", client.id(), e);
            AckStatus::Fail
        }
    };
    client
        .send(&ServerMessage::ChangeNameResponse { status })
        .await
}

async fn change_name(
    request: &ChangeNameRequest,
    client: &Client,
    state: &Arc<RelayState>,
) -> Result<(), RelayError> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err(RelayError::Validation("name cannot be empty".into()));
    }
    let id: AccountId = client.id().parse()?;
    state.store.change_display_name(id, name).await?;
    Ok(())
}
