//! QUIC chat server
//!
//! Accepts connections, pumps per-connection gateway events into the
//! presence, fan-out and signal engines, and cleans up connection state on
//! disconnect. Errors from step-gated operations are reported only to the
//! originating connection; nothing is ever broadcast as an error.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use quinn::Endpoint;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::sync::{mpsc, RwLock};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::auth::IdentityVerifier;
use crate::error::{ChatError, Result};
use crate::protocol::events::{Error as ErrorEvent, UserSummary};
use crate::server::broadcast::PresenceBroadcaster;
use crate::server::connection::{ConnectionHandler, Delivery, GatewayEvent};
use crate::server::fanout::MessageFanout;
use crate::server::presence::{ConnectionHandle, PresenceRegistry};
use crate::server::rooms::ChatRooms;
use crate::server::signals::SignalRouter;
use crate::store::Store;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections
    pub max_connections: usize,
    /// Connection idle timeout
    pub idle_timeout: Duration,
    /// Enable datagrams for ephemeral signals
    pub enable_datagrams: bool,
    /// Bound on every durable-store and verifier call
    pub store_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:4433".parse().unwrap(),
            max_connections: 10000,
            idle_timeout: Duration::from_secs(300),
            enable_datagrams: true,
            store_timeout: Duration::from_secs(5),
        }
    }
}

/// QUIC chat server wiring the gateway to the engines
pub struct ChatServer {
    config: ServerConfig,
    endpoint: Option<Endpoint>,
    store: Arc<dyn Store>,
    verifier: Arc<dyn IdentityVerifier>,
    presence: Arc<PresenceRegistry>,
    rooms: Arc<ChatRooms>,
    fanout: Arc<MessageFanout>,
    signals: Arc<SignalRouter>,
    broadcaster: Arc<PresenceBroadcaster>,
    /// All open connections by connection ID (authenticated or not)
    connections: Arc<RwLock<HashMap<String, ConnectionHandle>>>,
}

impl ChatServer {
    /// Create a new chat server over the given store and verifier
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn Store>,
        verifier: Arc<dyn IdentityVerifier>,
    ) -> Self {
        let presence = Arc::new(PresenceRegistry::new());
        let rooms = Arc::new(ChatRooms::new());
        let fanout = Arc::new(MessageFanout::new(
            Arc::clone(&store),
            Arc::clone(&presence),
            Arc::clone(&rooms),
            config.store_timeout,
        ));
        let signals = Arc::new(SignalRouter::new(Arc::clone(&presence)));
        let broadcaster = Arc::new(PresenceBroadcaster::new(
            Arc::clone(&presence),
            Arc::clone(&store),
        ));

        Self {
            config,
            endpoint: None,
            store,
            verifier,
            presence,
            rooms,
            fanout,
            signals,
            broadcaster,
            connections: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Presence registry accessor: the "currently reachable identities"
    /// query surface consumed by read-side layers
    pub fn presence(&self) -> Arc<PresenceRegistry> {
        Arc::clone(&self.presence)
    }

    /// Start the server
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting chat server on {}", self.config.bind_addr);

        // Self-signed certificate for development
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".into()])
            .map_err(|e| ChatError::config(format!("Failed to generate certificate: {}", e)))?;

        let cert_der = CertificateDer::from(
            cert.serialize_der()
                .map_err(|e| ChatError::config(format!("Failed to serialize certificate: {}", e)))?,
        );
        let key_der =
            PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(cert.serialize_private_key_der()));

        let mut server_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert_der], key_der)
            .map_err(|e| ChatError::config(format!("Failed to configure TLS: {}", e)))?;

        server_config.alpn_protocols = vec![b"loris".to_vec()];
        server_config.max_early_data_size = 0;

        let mut transport_config = quinn::TransportConfig::default();
        transport_config.max_concurrent_bidi_streams(8u32.into());
        transport_config.max_concurrent_uni_streams(0u32.into());
        transport_config.max_idle_timeout(Some(
            self.config
                .idle_timeout
                .try_into()
                .map_err(|_| ChatError::config("idle timeout out of range"))?,
        ));

        if self.config.enable_datagrams {
            transport_config.datagram_receive_buffer_size(Some(65536));
        }

        let mut quic_server_config = quinn::ServerConfig::with_crypto(Arc::new(
            quinn::crypto::rustls::QuicServerConfig::try_from(server_config)
                .map_err(|e| ChatError::config(format!("Failed to create QUIC config: {}", e)))?,
        ));
        quic_server_config.transport_config(Arc::new(transport_config));

        let endpoint = Endpoint::server(quic_server_config, self.config.bind_addr)
            .map_err(|e| ChatError::network(format!("Failed to create endpoint: {}", e)))?;

        info!("Server listening on {}", endpoint.local_addr()?);
        self.endpoint = Some(endpoint.clone());

        self.accept_connections(endpoint).await
    }

    /// Accept incoming connections
    async fn accept_connections(&self, endpoint: Endpoint) -> Result<()> {
        loop {
            match endpoint.accept().await {
                Some(incoming) => {
                    {
                        let conns = self.connections.read().await;
                        if conns.len() >= self.config.max_connections {
                            warn!("Connection limit reached, rejecting connection");
                            incoming.refuse();
                            continue;
                        }
                    }

                    let server = self.clone_ref();
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_incoming(incoming).await {
                            error!("Connection handling failed: {}", e);
                        }
                    });
                }
                None => {
                    warn!("Endpoint stopped accepting connections");
                    break;
                }
            }
        }
        Ok(())
    }

    /// Handle an incoming connection
    async fn handle_incoming(&self, incoming: quinn::Incoming) -> Result<()> {
        let connection = incoming.await?;
        let conn_id = crate::generate_id();

        debug!(
            "New connection {} from {}",
            conn_id,
            connection.remote_address()
        );

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let origin = ConnectionHandle::new(conn_id.clone(), command_tx);

        {
            let mut conns = self.connections.write().await;
            conns.insert(conn_id.clone(), origin.clone());
        }

        let handler = Arc::new(ConnectionHandler::new(
            connection,
            conn_id.clone(),
            Arc::clone(&self.verifier),
            Arc::clone(&self.store),
            event_tx,
            command_rx,
            self.config.store_timeout,
        ));

        let handler_task = tokio::spawn(async move { handler.run().await });

        let server = self.clone_ref();
        let pump_origin = origin.clone();
        let event_task = tokio::spawn(async move {
            server.process_events(pump_origin, event_rx).await;
        });

        tokio::select! {
            result = handler_task => {
                if let Err(e) = result {
                    error!("Handler task error: {}", e);
                }
            }
            _ = event_task => {}
        }

        self.cleanup_connection(&conn_id).await;
        Ok(())
    }

    /// Pump events from one connection through the engines
    ///
    /// The authenticated identity lives in this explicit per-connection
    /// record, never in shared captured state.
    async fn process_events(
        &self,
        origin: ConnectionHandle,
        mut event_rx: mpsc::UnboundedReceiver<GatewayEvent>,
    ) {
        let mut user: Option<UserSummary> = None;

        while let Some(event) = event_rx.recv().await {
            match event {
                GatewayEvent::Authenticated { user: summary } => {
                    // Newest wins: any previous connection for the identity
                    // is superseded and told to go away
                    if let Some(previous) = self
                        .presence
                        .register(&summary, origin.clone())
                        .await
                    {
                        debug!(
                            "Connection {} supersedes {} for user {}",
                            origin.conn_id(),
                            previous.conn_id(),
                            summary.user_id
                        );
                        previous.deliver(Delivery::Close(
                            "superseded by a newer connection".to_string(),
                        ));
                    }
                    self.broadcaster.announce_online(&summary).await;
                    user = Some(summary);
                }

                GatewayEvent::Disconnected { reason } => {
                    debug!("Connection {} disconnected: {}", origin.conn_id(), reason);
                }

                event => {
                    let Some(ref summary) = user else {
                        warn!(
                            "Dropping event from unauthenticated connection {}",
                            origin.conn_id()
                        );
                        continue;
                    };
                    if let Err(e) = self.dispatch(&origin, summary, event).await {
                        debug!("Operation rejected on {}: {}", origin.conn_id(), e);
                        origin.deliver(Delivery::Error(ErrorEvent {
                            code: e.code(),
                            message: e.to_string(),
                        }));
                    }
                }
            }
        }
    }

    /// Route one authenticated event into the engines
    async fn dispatch(
        &self,
        origin: &ConnectionHandle,
        user: &UserSummary,
        event: GatewayEvent,
    ) -> Result<()> {
        match event {
            GatewayEvent::JoinChat { chat_id } => {
                self.handle_join_chat(user, &chat_id).await;
                Ok(())
            }
            GatewayEvent::SendMessage(req) => self.fanout.send(origin, user, req).await,
            GatewayEvent::EditMessage(req) => self.fanout.edit(origin, user, req).await,
            GatewayEvent::DeleteMessage(req) => self.fanout.delete(origin, user, req).await,
            GatewayEvent::ReadReceipt(req) => self.fanout.mark_read(user, req).await,
            GatewayEvent::UpdateStatus { status } => {
                // Guarded by connection ownership: a superseded connection
                // cannot mutate the identity's presence
                if self
                    .presence
                    .set_status(&user.user_id, origin.conn_id(), status)
                    .await
                {
                    self.broadcaster
                        .announce_status_changed(&user.user_id, &user.username, status)
                        .await;
                }
                Ok(())
            }
            GatewayEvent::Typing(signal) => {
                self.signals.typing(user, &signal).await;
                Ok(())
            }
            GatewayEvent::Authenticated { .. } | GatewayEvent::Disconnected { .. } => Ok(()),
        }
    }

    /// Join a chat room channel after a capability check
    ///
    /// A missing chat or a non-participant join attempt is logged and
    /// ignored: a malicious or stale join must not error the connection.
    async fn handle_join_chat(&self, user: &UserSummary, chat_id: &str) {
        let chat = match timeout(self.config.store_timeout, self.store.find_chat(chat_id)).await {
            Ok(Ok(Some(chat))) => chat,
            Ok(Ok(None)) => {
                debug!(chat = %chat_id, user = %user.user_id, "join ignored: chat does not exist");
                return;
            }
            Ok(Err(e)) => {
                debug!(chat = %chat_id, "join ignored: store error: {}", e);
                return;
            }
            Err(_) => {
                debug!(chat = %chat_id, "join ignored: store call timed out");
                return;
            }
        };

        if !chat.has_participant(&user.user_id) {
            debug!(chat = %chat_id, user = %user.user_id, "join ignored: not a participant");
            return;
        }

        self.rooms.join(chat_id, &user.user_id).await;
        debug!(chat = %chat_id, user = %user.user_id, "joined chat room");
    }

    /// Clean up after a connection goes away
    ///
    /// Idempotent and supersession-safe: the registry entry is only removed
    /// when this connection still owns it, so a stale disconnect after a
    /// newer login leaves the new entry untouched.
    async fn cleanup_connection(&self, conn_id: &str) {
        {
            let mut conns = self.connections.write().await;
            conns.remove(conn_id);
        }

        if let Some(entry) = self.presence.deregister_conn(conn_id).await {
            self.rooms.remove_user(&entry.user_id).await;
            self.broadcaster
                .announce_offline(&entry.user_id, &entry.username)
                .await;
            info!("User {} ({}) went offline", entry.username, entry.user_id);
        }

        debug!("Cleaned up connection {}", conn_id);
    }

    /// Get server statistics
    pub async fn stats(&self) -> ServerStats {
        ServerStats {
            total_connections: self.connections.read().await.len(),
            online_users: self.presence.online_count().await,
            bind_address: self.config.bind_addr,
        }
    }

    /// Shutdown the server
    pub async fn shutdown(&mut self) -> Result<()> {
        if let Some(endpoint) = self.endpoint.take() {
            let conns = self.connections.read().await;
            for conn in conns.values() {
                conn.deliver(Delivery::Close("Server shutdown".to_string()));
            }

            endpoint.close(0u32.into(), b"Server shutdown");
            info!("Server shutdown complete");
        }
        Ok(())
    }

    /// Clone reference for spawning tasks
    fn clone_ref(&self) -> Arc<Self> {
        Arc::new(Self {
            config: self.config.clone(),
            endpoint: self.endpoint.clone(),
            store: Arc::clone(&self.store),
            verifier: Arc::clone(&self.verifier),
            presence: Arc::clone(&self.presence),
            rooms: Arc::clone(&self.rooms),
            fanout: Arc::clone(&self.fanout),
            signals: Arc::clone(&self.signals),
            broadcaster: Arc::clone(&self.broadcaster),
            connections: Arc::clone(&self.connections),
        })
    }
}

/// Server statistics
#[derive(Debug, Clone)]
pub struct ServerStats {
    pub total_connections: usize,
    pub online_users: usize,
    pub bind_address: SocketAddr,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenVerifier;
    use crate::store::MemoryStore;

    fn test_server() -> ChatServer {
        ChatServer::new(
            ServerConfig::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(TokenVerifier::new()),
        )
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 4433);
        assert_eq!(config.max_connections, 10000);
        assert!(config.enable_datagrams);
    }

    #[tokio::test]
    async fn test_server_creation() {
        let server = test_server();
        assert!(server.endpoint.is_none());
    }

    #[tokio::test]
    async fn test_server_stats() {
        let server = test_server();
        let stats = server.stats().await;
        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.online_users, 0);
    }
}
