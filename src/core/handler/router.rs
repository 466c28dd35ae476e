// src/core/handler/router.rs

//! Routes the application messages of an authenticated connection.
//!
//! The `Router` is created per message by the `ConnectionHandler` and hands
//! each variant of the closed `ClientMessage` set to its action. Chat goes to
//! the receiver through the registry or into the offline queue, file offers
//! go to the transfer engine, account changes go to persistence.

use super::actions;
use super::actions::chat::Delivery;
use super::actions::file::FileOutcome;
use crate::core::protocol::{ClientMessage, FileHeader};
use crate::core::state::{Client, RelayState};
use crate::core::RelayError;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tracing::{Instrument, debug, info_span};

/// What routing a message did, for logging and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteResponse {
    Chat(Delivery),
    File(FileOutcome),
    /// An acknowledgement was sent back to the client.
    Acknowledged,
}

pub struct Router<'a> {
    state: &'a Arc<RelayState>,
    client: &'a Arc<Client>,
}

impl<'a> Router<'a> {
    pub fn new(state: &'a Arc<RelayState>, client: &'a Arc<Client>) -> Self {
        Self { state, client }
    }

    /// Routes every message kind that carries no payload after its header.
    pub async fn route(&self, message: ClientMessage) -> Result<RouteResponse, RelayError> {
        let kind = message.kind();
        let span = info_span!("route", client = %self.client.id(), kind);
        async move {
            debug!("Routing message.");
            match message {
                ClientMessage::Chat(chat) => {
                    actions::chat::handle_chat(chat, self.client, self.state)
                        .await
                        .map(RouteResponse::Chat)
                }
                ClientMessage::ChangePassword(request) => {
                    actions::account::handle_change_password(request, self.client, self.state)
                        .await?;
                    Ok(RouteResponse::Acknowledged)
                }
                ClientMessage::ChangeName(request) => {
                    actions::account::handle_change_name(request, self.client, self.state)
                        .await?;
                    Ok(RouteResponse::Acknowledged)
                }
                ClientMessage::Login(_) => Err(RelayError::Protocol(
                    "connection is already authenticated".to_string(),
                )),
                ClientMessage::FileTransfer(header) => Err(RelayError::Internal(format!(
                    "file offer '{}' routed without its payload stream",
                    header.filename
                ))),
            }
        }
        .instrument(span)
        .await
    }

    /// Routes a `file_transfer` header together with the stream its payload
    /// bytes are read from.
    pub async fn route_file<R>(
        &self,
        header: FileHeader,
        payload: &mut R,
    ) -> Result<RouteResponse, RelayError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let span = info_span!("route", client = %self.client.id(), kind = "file_transfer");
        actions::file::handle_file_transfer(header, payload, self.client, self.state)
            .instrument(span)
            .await
            .map(RouteResponse::File)
    }
}
