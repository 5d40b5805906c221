//! Per-connection gateway handler
//!
//! Owns one QUIC connection: accepts the control stream, runs the
//! authentication handshake, dispatches inbound frames to the server loop as
//! [`GatewayEvent`]s and drains queued [`Delivery`] items back onto the wire.
//!
//! Connection state machine: `Unauthenticated -> Authenticated ->
//! Disconnected`. Joined chat rooms are membership facts tracked by the
//! server, not handler states. `Disconnected` is terminal; nothing is
//! processed after it apart from the server's idempotent cleanup.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use quinn::{Connection, RecvStream, SendStream};
use tokio::sync::{mpsc, RwLock};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::auth::IdentityVerifier;
use crate::current_timestamp;
use crate::error::{ChatError, Result};
use crate::protocol::codec::{Decodable, Encodable};
use crate::protocol::events::*;
use crate::protocol::frame::{Frame, FrameCodec, FrameType};
use crate::store::Store;

/// Events emitted by a connection handler to the server loop
#[derive(Debug)]
pub enum GatewayEvent {
    /// Handshake completed; the identity behind this connection
    Authenticated { user: UserSummary },

    /// Client asks to join a chat room channel
    JoinChat { chat_id: ChatId },

    /// Client sends a message
    SendMessage(SendMessage),

    /// Client edits a message
    EditMessage(EditMessage),

    /// Client soft-deletes a message
    DeleteMessage(DeleteMessage),

    /// Client marks a received message read
    ReadReceipt(ReadReceipt),

    /// Client changes its availability status
    UpdateStatus { status: UserStatus },

    /// Client typing indicator
    Typing(Typing),

    /// Connection ended
    Disconnected { reason: String },
}

/// Deliveries queued toward a connection by the server-side engines
#[derive(Debug, Clone)]
pub enum Delivery {
    NewMessage(NewMessage),
    MessageSent(MessageSent),
    MessageEdited(MessageEdited),
    MessageDeleted(MessageDeleted),
    MessageRead(MessageRead),
    UserOnline(UserOnline),
    UserOffline(UserOffline),
    UserStatusChanged(UserStatusChanged),
    TypingStatus(TypingStatus),
    Error(Error),
    Close(String),
}

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Unauthenticated,
    Authenticated,
    Disconnected,
}

/// Per-connection handler owning the transport and the handshake
pub struct ConnectionHandler {
    /// Underlying QUIC connection
    connection: Connection,

    /// Connection ID, also the supersession guard token in the registry
    conn_id: String,

    /// Credential verifier consulted during the handshake
    verifier: Arc<dyn IdentityVerifier>,

    /// Durable store, used only to load the user record at handshake
    store: Arc<dyn Store>,

    /// Lifecycle state
    state: RwLock<ConnState>,

    /// Authenticated identity (set once by the handshake)
    user: RwLock<Option<UserSummary>>,

    /// Channel for sending events to the server
    event_tx: mpsc::UnboundedSender<GatewayEvent>,

    /// Channel for receiving deliveries from the server
    command_rx: RwLock<Option<mpsc::UnboundedReceiver<Delivery>>>,

    /// Control stream sender
    control_send: RwLock<Option<SendStream>>,

    /// Bound on every verifier/store call
    store_timeout: Duration,
}

impl ConnectionHandler {
    pub fn new(
        connection: Connection,
        conn_id: String,
        verifier: Arc<dyn IdentityVerifier>,
        store: Arc<dyn Store>,
        event_tx: mpsc::UnboundedSender<GatewayEvent>,
        command_rx: mpsc::UnboundedReceiver<Delivery>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            connection,
            conn_id,
            verifier,
            store,
            state: RwLock::new(ConnState::Unauthenticated),
            user: RwLock::new(None),
            event_tx,
            command_rx: RwLock::new(Some(command_rx)),
            control_send: RwLock::new(None),
            store_timeout,
        }
    }

    /// Get the remote address
    pub fn remote_address(&self) -> std::net::SocketAddr {
        self.connection.remote_address()
    }

    /// Check if the handshake completed
    pub async fn is_authenticated(&self) -> bool {
        *self.state.read().await == ConnState::Authenticated
    }

    /// Run the connection handler
    /// This is the main entry point that should be spawned as a task
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let addr = self.remote_address();
        info!("New connection {} from {}", self.conn_id, addr);

        let result = self.accept_and_run(Arc::clone(&self)).await;

        *self.state.write().await = ConnState::Disconnected;
        let reason = match &result {
            Ok(()) => "normal".to_string(),
            Err(e) => e.to_string(),
        };
        let _ = self.event_tx.send(GatewayEvent::Disconnected { reason });

        info!("Connection {} from {} closed", self.conn_id, addr);
        result
    }

    /// Accept the control stream and run all per-connection tasks
    async fn accept_and_run(self: &Arc<Self>, handler: Arc<Self>) -> Result<()> {
        // The client opens the control bidirectional stream first
        let (send, recv) = self.connection.accept_bi().await.map_err(|e| {
            ChatError::connection(format!("Failed to accept control stream: {}", e))
        })?;

        {
            let mut control = self.control_send.write().await;
            *control = Some(send);
        }

        debug!("Control stream accepted from {}", self.remote_address());

        let recv_handle = {
            let h = Arc::clone(&handler);
            tokio::spawn(async move {
                if let Err(e) = h.handle_control_stream(recv).await {
                    debug!("Control stream ended: {}", e);
                }
            })
        };

        let cmd_handle = {
            let h = Arc::clone(&handler);
            tokio::spawn(async move {
                h.handle_commands().await;
            })
        };

        let dgram_handle = {
            let h = Arc::clone(&handler);
            tokio::spawn(async move {
                h.handle_datagrams().await;
            })
        };

        let ping_handle = {
            let h = Arc::clone(&handler);
            tokio::spawn(async move {
                h.ping_loop().await;
            })
        };

        // Any task finishing means the connection is going away
        tokio::select! {
            _ = recv_handle => {},
            _ = cmd_handle => {},
            _ = dgram_handle => {},
            _ = ping_handle => {},
        }

        Ok(())
    }

    /// Read and dispatch frames on the control stream
    async fn handle_control_stream(self: &Arc<Self>, mut recv: RecvStream) -> Result<()> {
        let mut codec = FrameCodec::new();
        let mut buf = vec![0u8; 4096];

        loop {
            match recv.read(&mut buf).await {
                Ok(Some(n)) => {
                    codec.feed(&buf[..n]);

                    loop {
                        match codec.decode_next() {
                            Ok(Some(frame)) => {
                                if let Err(e) = self.handle_control_frame(frame).await {
                                    self.reject(e).await?;
                                }
                            }
                            Ok(None) => break,
                            Err(e) => {
                                // Unknown type or oversized frame: protocol
                                // violation, drop the connection
                                let err = ChatError::protocol(format!("Frame decode error: {}", e));
                                let _ = self.send_error(&err).await;
                                self.connection.close(1u32.into(), b"protocol violation");
                                return Err(err);
                            }
                        }
                    }
                }
                Ok(None) => {
                    debug!("Control stream finished");
                    break;
                }
                Err(e) => {
                    return Err(ChatError::network(format!(
                        "Control stream read error: {}",
                        e
                    )));
                }
            }
        }

        Ok(())
    }

    /// Report a per-frame failure to the client
    ///
    /// Before authentication any failure closes the connection without
    /// registering state; afterwards the error event goes to this connection
    /// only and the session continues.
    async fn reject(&self, err: ChatError) -> Result<()> {
        warn!("Rejecting frame on {}: {}", self.conn_id, err);
        let _ = self.send_error(&err).await;
        if !self.is_authenticated().await {
            self.connection.close(1u32.into(), b"authentication failed");
            return Err(err);
        }
        Ok(())
    }

    /// Handle a single control frame according to the connection state
    async fn handle_control_frame(&self, frame: Frame) -> Result<()> {
        let state = *self.state.read().await;

        match (state, frame.frame_type) {
            (ConnState::Unauthenticated, FrameType::Authenticate) => {
                let auth = Authenticate::decode_frame(&frame)
                    .map_err(|e| ChatError::protocol(format!("Invalid Authenticate: {}", e)))?;
                self.handshake(auth).await
            }

            // No other frame is processed before authentication
            (ConnState::Unauthenticated, frame_type) => Err(ChatError::auth(format!(
                "Frame {:?} before authentication",
                frame_type
            ))),

            (ConnState::Authenticated, FrameType::Ping) => {
                let ping = Ping::decode_frame(&frame)
                    .map_err(|e| ChatError::protocol(format!("Invalid Ping: {}", e)))?;
                self.send_control_frame(&Pong {
                    timestamp: ping.timestamp,
                })
                .await
            }

            (ConnState::Authenticated, FrameType::JoinChat) => {
                let join = JoinChat::decode_frame(&frame)
                    .map_err(|e| ChatError::protocol(format!("Invalid JoinChat: {}", e)))?;
                let _ = self.event_tx.send(GatewayEvent::JoinChat {
                    chat_id: join.chat_id,
                });
                Ok(())
            }

            (ConnState::Authenticated, FrameType::SendMessage) => {
                let msg = SendMessage::decode_frame(&frame)
                    .map_err(|e| ChatError::protocol(format!("Invalid SendMessage: {}", e)))?;
                let _ = self.event_tx.send(GatewayEvent::SendMessage(msg));
                Ok(())
            }

            (ConnState::Authenticated, FrameType::EditMessage) => {
                let msg = EditMessage::decode_frame(&frame)
                    .map_err(|e| ChatError::protocol(format!("Invalid EditMessage: {}", e)))?;
                let _ = self.event_tx.send(GatewayEvent::EditMessage(msg));
                Ok(())
            }

            (ConnState::Authenticated, FrameType::DeleteMessage) => {
                let msg = DeleteMessage::decode_frame(&frame)
                    .map_err(|e| ChatError::protocol(format!("Invalid DeleteMessage: {}", e)))?;
                let _ = self.event_tx.send(GatewayEvent::DeleteMessage(msg));
                Ok(())
            }

            (ConnState::Authenticated, FrameType::ReadReceipt) => {
                let receipt = ReadReceipt::decode_frame(&frame)
                    .map_err(|e| ChatError::protocol(format!("Invalid ReadReceipt: {}", e)))?;
                let _ = self.event_tx.send(GatewayEvent::ReadReceipt(receipt));
                Ok(())
            }

            (ConnState::Authenticated, FrameType::UpdateStatus) => {
                let update = UpdateStatus::decode_frame(&frame)
                    .map_err(|e| ChatError::protocol(format!("Invalid UpdateStatus: {}", e)))?;
                let _ = self.event_tx.send(GatewayEvent::UpdateStatus {
                    status: update.status,
                });
                Ok(())
            }

            (state, frame_type) => Err(ChatError::protocol(format!(
                "Unexpected frame {:?} in state {:?}",
                frame_type, state
            ))),
        }
    }

    /// Verify the credential, load the user and activate the session
    ///
    /// On any failure the caller closes the connection; no partial
    /// registration is observable.
    async fn handshake(&self, auth: Authenticate) -> Result<()> {
        let user_id = timeout(self.store_timeout, self.verifier.verify(&auth.token))
            .await
            .map_err(|_| ChatError::auth("credential verification timed out"))??;

        let user = timeout(self.store_timeout, self.store.find_user(&user_id))
            .await
            .map_err(|_| ChatError::persistence("store call timed out"))?
            .map_err(|e| ChatError::persistence(e.to_string()))?
            .ok_or_else(|| ChatError::auth("credential maps to no user"))?;

        if !user.active {
            return Err(ChatError::AccountDeactivated);
        }

        let summary = UserSummary {
            user_id: user.id,
            username: user.username,
            status: UserStatus::Online,
            last_seen: current_timestamp(),
        };

        *self.user.write().await = Some(summary.clone());
        *self.state.write().await = ConnState::Authenticated;

        self.send_control_frame(&Authenticated {
            user: summary.clone(),
        })
        .await?;

        info!(
            "User {} ({}) authenticated on {}",
            summary.username, summary.user_id, self.conn_id
        );
        let _ = self
            .event_tx
            .send(GatewayEvent::Authenticated { user: summary });

        Ok(())
    }

    /// Receive datagrams (typing signals)
    async fn handle_datagrams(self: &Arc<Self>) {
        loop {
            match self.connection.read_datagram().await {
                Ok(data) => {
                    if let Err(e) = self.handle_datagram(data).await {
                        debug!("Datagram ignored: {}", e);
                    }
                }
                Err(e) => {
                    debug!("Datagram receive ended: {}", e);
                    break;
                }
            }
        }
    }

    /// Handle a single datagram; signals before auth are silently dropped
    async fn handle_datagram(&self, data: Bytes) -> Result<()> {
        if !self.is_authenticated().await {
            return Ok(());
        }

        let frame = Frame::decode_complete(&data)
            .map_err(|e| ChatError::protocol(format!("Invalid datagram frame: {}", e)))?;

        match frame.frame_type {
            FrameType::Typing => {
                let typing = Typing::decode_frame(&frame)
                    .map_err(|e| ChatError::protocol(format!("Invalid Typing: {}", e)))?;
                let _ = self.event_tx.send(GatewayEvent::Typing(typing));
                Ok(())
            }
            other => Err(ChatError::protocol(format!(
                "Unexpected datagram frame type: {:?}",
                other
            ))),
        }
    }

    /// Drain deliveries queued by the server-side engines
    async fn handle_commands(self: &Arc<Self>) {
        let rx = self.command_rx.write().await.take();
        let Some(mut rx) = rx else {
            return;
        };

        while let Some(delivery) = rx.recv().await {
            if let Err(e) = self.handle_delivery(delivery).await {
                warn!("Delivery failed on {}: {}", self.conn_id, e);
            }
        }
    }

    /// Write one delivery to the wire
    async fn handle_delivery(&self, delivery: Delivery) -> Result<()> {
        match delivery {
            Delivery::NewMessage(event) => self.send_control_frame(&event).await,
            Delivery::MessageSent(event) => self.send_control_frame(&event).await,
            Delivery::MessageEdited(event) => self.send_control_frame(&event).await,
            Delivery::MessageDeleted(event) => self.send_control_frame(&event).await,
            Delivery::MessageRead(event) => self.send_control_frame(&event).await,
            Delivery::Error(event) => self.send_control_frame(&event).await,
            Delivery::TypingStatus(event) => self.send_signal(&event),
            Delivery::UserOnline(event) => self.send_signal(&event),
            Delivery::UserOffline(event) => self.send_signal(&event),
            Delivery::UserStatusChanged(event) => self.send_signal(&event),
            Delivery::Close(reason) => {
                self.connection.close(0u32.into(), reason.as_bytes());
                Ok(())
            }
        }
    }

    /// Send a frame on the control stream
    async fn send_control_frame<T: Encodable>(&self, msg: &T) -> Result<()> {
        let frame = msg
            .encode_frame()
            .map_err(|e| ChatError::serialization(format!("Failed to encode frame: {}", e)))?;

        let mut control = self.control_send.write().await;
        if let Some(send) = control.as_mut() {
            let data = frame.encode_to_bytes();
            send.write_all(&data).await.map_err(|e| {
                ChatError::network(format!("Failed to write to control stream: {}", e))
            })?;
        } else {
            return Err(ChatError::connection("Control stream not open"));
        }

        Ok(())
    }

    /// Send a lossy signal as a datagram; a miss is logged, never surfaced
    fn send_signal<T: Encodable>(&self, msg: &T) -> Result<()> {
        let frame = msg
            .encode_frame()
            .map_err(|e| ChatError::serialization(format!("Failed to encode frame: {}", e)))?;

        if let Err(e) = self.connection.send_datagram(frame.encode_to_bytes()) {
            debug!("Signal datagram dropped on {}: {}", self.conn_id, e);
        }
        Ok(())
    }

    /// Send an error frame
    async fn send_error(&self, error: &ChatError) -> Result<()> {
        self.send_control_frame(&Error {
            code: error.code(),
            message: error.to_string(),
        })
        .await
    }

    /// Keepalive ping loop
    async fn ping_loop(self: &Arc<Self>) {
        let mut interval = tokio::time::interval(Duration::from_secs(30));

        loop {
            interval.tick().await;

            if !self.is_authenticated().await {
                continue;
            }

            let ping = Ping {
                timestamp: current_timestamp(),
            };
            if let Err(e) = self.send_control_frame(&ping).await {
                warn!("Failed to send ping: {}", e);
                break;
            }
        }
    }
}
