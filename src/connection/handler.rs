// src/connection/handler.rs

//! Defines the `ConnectionHandler` which manages the full lifecycle of a client connection.

use super::guard::ConnectionGuard;
use super::session::{Phase, SessionState};
use crate::core::errors::is_normal_disconnect;
use crate::core::handler::Router;
use crate::core::metrics;
use crate::core::persistence::{Account, AccountId, QueuedMessage, StorageError};
use crate::core::protocol::{ChatMessage, ClientMessage, FriendInfo, JsonFrameCodec, ServerMessage};
use crate::core::relation::RelationState;
use crate::core::state::{BoxedWriter, Client, ClientWriter, RelayState};
use crate::core::RelayError;
use bytes::Bytes;
use futures::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf};
use tokio::sync::broadcast;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

const SEND_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Drives one connection through login, friend-list sync, offline replay and
/// the active message loop, then tears it down.
///
/// The read half of the stream stays here. The write half is shared with the
/// registry entry created at login so other connections can deliver to it.
pub struct ConnectionHandler<S> {
    reader: FramedRead<ReadHalf<S>, JsonFrameCodec>,
    writer: ClientWriter,
    addr: SocketAddr,
    state: Arc<RelayState>,
    session_id: u64,
    global_shutdown_rx: broadcast::Receiver<()>,
    session: SessionState,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(
        stream: S,
        addr: SocketAddr,
        state: Arc<RelayState>,
        session_id: u64,
        global_shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        let codec = JsonFrameCodec::new(state.config.max_frame_size);
        let reader = FramedRead::with_capacity(read_half, codec, state.config.read_buffer_size);
        let write_half: BoxedWriter = Box::new(write_half);
        Self {
            reader,
            writer: Arc::new(tokio::sync::Mutex::new(write_half)),
            addr,
            state,
            session_id,
            global_shutdown_rx,
            session: SessionState::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.session.phase
    }

    /// Runs the connection to completion. Teardown happens exactly once,
    /// whichever phase the connection ends in.
    pub async fn run(mut self) -> Result<(), RelayError> {
        let mut guard = ConnectionGuard::new(self.state.clone(), self.session_id, self.addr.to_string());
        let result = self.serve(&mut guard).await;

        self.session.advance(Phase::Closed);
        guard.close().await;
        let _ = self.writer.lock().await.shutdown().await;

        match &result {
            Ok(()) => info!("Connection from {} closed.", self.addr),
            Err(e) if is_normal_disconnect(e) => {
                debug!("Connection from {} closed by peer: {}", self.addr, e)
            }
            Err(e) => debug!("Connection from {} ended with error: {}", self.addr, e),
        }
        result
    }

    async fn serve(&mut self, guard: &mut ConnectionGuard) -> Result<(), RelayError> {
        self.session.advance(Phase::Authenticating);
        let account = match self.authenticate().await {
            Ok(account) => account,
            Err(e) => {
                if e.is_auth_failure() {
                    metrics::LOGINS_FAILED_TOTAL.inc();
                    warn!("Login from {} failed: {}", self.addr, e);
                } else if is_normal_disconnect(&e) {
                    debug!("Connection from {} ended before login: {}", self.addr, e);
                } else {
                    warn!("Login from {} aborted: {}", self.addr, e);
                }
                if !matches!(e, RelayError::Io(_) | RelayError::ConnectionClosed) {
                    let reply = ServerMessage::login_failed(e.to_string());
                    if let Err(send_err) = self.send_direct(&reply).await {
                        debug!("Could not report login failure to {}: {}", self.addr, send_err);
                    }
                }
                return Err(e);
            }
        };
        let client = self.bring_online(account, guard).await?;

        self.session.advance(Phase::SyncingFriends);
        self.sync_friends(&client).await?;

        self.session.advance(Phase::ReplayingOffline);
        self.replay_offline(&client).await;

        self.session.advance(Phase::Active);
        self.run_active(&client).await
    }

    /// Reads the single login message and checks it against the stored account.
    async fn authenticate(&mut self) -> Result<Account, RelayError> {
        let frame = self.read_login_frame().await?;
        let request = match ClientMessage::parse(&frame) {
            Ok(ClientMessage::Login(request)) => request,
            Ok(other) => {
                return Err(RelayError::MalformedLogin(format!(
                    "expected a login message, got '{}'",
                    other.kind()
                )));
            }
            Err(e) => return Err(RelayError::MalformedLogin(e.to_string())),
        };

        let account = match self.state.store.find_account_by_name(&request.name).await {
            Ok(account) => account,
            Err(StorageError::NotFound(_)) => return Err(RelayError::UnknownUser(request.name)),
            Err(e) => return Err(e.into()),
        };
        if !self.state.credentials.verify(&account.password, &request.pwd) {
            return Err(RelayError::BadCredential);
        }
        Ok(account)
    }

    /// Marks an authenticated account online, answers the login and only then
    /// registers the connection, so `login_response` is the first thing it sees.
    async fn bring_online(
        &mut self,
        account: Account,
        guard: &mut ConnectionGuard,
    ) -> Result<Arc<Client>, RelayError> {
        let ip = self.addr.ip().to_string();
        self.state.store.set_online(account.id, &ip).await?;

        let id = account.id.to_string();
        let (kill_tx, kill_rx) = broadcast::channel(1);
        let client = Arc::new(Client::new(
            id.clone(),
            self.session_id,
            ip,
            self.writer.clone(),
            kill_tx,
        ));
        guard.bind(id.clone());
        self.send_direct(&ServerMessage::login_ok(&id)).await?;

        if let Some(previous) = self.state.registry.register(&id, client.clone()) {
            debug!(
                "Session {} replaced session {} for account {}.",
                self.session_id,
                previous.session_id(),
                id
            );
        }
        self.session.client = Some(client.clone());
        self.session.kill_rx = Some(kill_rx);

        info!(
            "Client {} logged in as '{}' (id {}).",
            self.addr, account.name, id
        );
        Ok(client)
    }

    async fn read_login_frame(&mut self) -> Result<Bytes, RelayError> {
        let timeout = self.state.config.login_timeout;
        tokio::select! {
            biased;
            Ok(()) = self.global_shutdown_rx.recv() => Err(RelayError::ConnectionClosed),
            read = tokio::time::timeout(timeout, self.reader.next()) => match read {
                Err(_) => Err(RelayError::AuthTimeout),
                Ok(None) => Err(RelayError::ConnectionClosed),
                Ok(Some(Err(e @ RelayError::Io(_)))) => Err(e),
                Ok(Some(Err(e))) => Err(RelayError::MalformedLogin(e.to_string())),
                Ok(Some(Ok(frame))) => Ok(frame),
            }
        }
    }

    /// Sends the account's friends, with names and online flags, to the client.
    async fn sync_friends(&self, client: &Client) -> Result<(), RelayError> {
        let id: AccountId = client.id().parse()?;
        let account = self.state.store.find_account_by_id(id).await?;

        let mut friends = Vec::new();
        for peer in account.relation.friends() {
            match self.state.store.find_account_by_id(peer as AccountId).await {
                Ok(peer_account) => friends.push(FriendInfo {
                    user_id: peer.to_string(),
                    name: peer_account.name,
                    status: RelationState::Friend.as_u8(),
                    online: peer_account.online,
                }),
                Err(e) => debug!("Skipping friend {} of account {}: {}", peer, id, e),
            }
        }

        debug!("Account {} has {} friends.", id, friends.len());
        client.set_friends(friends.clone());
        client.send(&ServerMessage::FriendList { friends }).await
    }

    /// Delivers everything queued while the account was offline, newest first.
    /// A failing item is logged and left for the next login.
    async fn replay_offline(&self, client: &Client) {
        let id = client.id();
        let queued = match self.state.store.list_offline_messages(&id).await {
            Ok(queued) => queued,
            Err(e) => {
                warn!("Could not list offline messages for {}: {}", id, e);
                return;
            }
        };
        if queued.is_empty() {
            return;
        }

        info!("Replaying {} offline items to {}.", queued.len(), id);
        for item in queued {
            if let Err(e) = self.replay_item(client, &item).await {
                warn!(
                    "Skipping offline item {} for {}: {}",
                    item.id, id, e
                );
            }
        }
    }

    async fn replay_item(&self, client: &Client, item: &QueuedMessage) -> Result<(), RelayError> {
        match item.file_key() {
            Some(key) => match self.state.transfers.retrieve(key, client).await {
                Ok(_) => {}
                Err(RelayError::Storage(StorageError::NotFound(_))) => {
                    warn!(
                        "Offline item {} points at missing file '{}'; dropping it.",
                        item.id, key
                    );
                }
                Err(e) => return Err(e),
            },
            None => {
                let chat = ChatMessage {
                    content: item.chat_text().to_string(),
                    receiver_id: item.receiver_id.clone(),
                    send_time: item.sent_at.format(SEND_TIME_FORMAT).to_string(),
                    sender_id: item.sender_id.clone(),
                };
                client.send(&ServerMessage::Chat(chat)).await?;
            }
        }
        self.state.store.delete_offline_message(item.id).await?;
        Ok(())
    }

    /// The steady message loop. Ends on EOF, a read error, a kick or server shutdown.
    async fn run_active(&mut self, client: &Arc<Client>) -> Result<(), RelayError> {
        let Some(mut kill_rx) = self.session.kill_rx.take() else {
            return Err(RelayError::Internal(
                "active session has no kill channel".to_string(),
            ));
        };

        loop {
            tokio::select! {
                // Prioritize shutdown signals over other events.
                biased;
                Ok(()) = self.global_shutdown_rx.recv() => {
                    info!("Connection handler for {} received global shutdown signal.", self.addr);
                    break;
                }
                Ok(()) = kill_rx.recv() => {
                    info!("Connection handler for {} received kill signal.", self.addr);
                    break;
                }
                result = self.reader.next() => {
                    match result {
                        Some(Ok(frame)) => {
                            client.touch();
                            if let Err(e) = self.process_frame(frame, client).await {
                                if e.closes_connection() {
                                    return Err(e);
                                }
                                warn!("Session {}: {}", self.session_id, e);
                            }
                        }
                        Some(Err(e)) => {
                            if is_normal_disconnect(&e) {
                                debug!("Connection from {} closed by peer: {}", self.addr, e);
                            } else {
                                warn!("Connection error for {}: {}", self.addr, e);
                            }
                            break;
                        }
                        None => {
                            debug!("Connection from {} closed by peer.", self.addr);
                            break;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Parses one frame and routes it.
    async fn process_frame(&mut self, frame: Bytes, client: &Arc<Client>) -> Result<(), RelayError> {
        let message = ClientMessage::parse(&frame)?;
        debug!(
            "Session {}: received '{}' message",
            self.session_id,
            message.kind()
        );

        let router = Router::new(&self.state, client);
        let response = match message {
            ClientMessage::FileTransfer(header) => {
                // The payload starts right after the header's closing brace. Part
                // of it may already sit in the read buffer; any bytes past the
                // payload belong to the next message and go back.
                let size = usize::try_from(header.size).unwrap_or(usize::MAX);
                let mut buffered = self.reader.read_buffer_mut().split();
                let rest = buffered.split_off(buffered.len().min(size));
                self.reader.read_buffer_mut().extend_from_slice(&rest);

                let mut payload = (&buffered[..]).chain(self.reader.get_mut());
                router.route_file(header, &mut payload).await?
            }
            other => router.route(other).await?,
        };
        debug!("Session {}: {:?}", self.session_id, response);
        Ok(())
    }

    /// Writes straight to this connection's stream, registered or not.
    async fn send_direct(&self, message: &ServerMessage) -> Result<(), RelayError> {
        let bytes = message.encode_to_bytes()?;
        let mut writer = self.writer.lock().await;
        writer.write_all(&bytes).await?;
        writer.flush().await?;
        Ok(())
    }
}
