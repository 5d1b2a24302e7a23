//! High-level client API.

use crate::connection::{Connection, ConnectionConfig};
use crate::correlator::RequestCorrelator;
use crate::directory::{SessionDirectory, SessionIdentity};
use crate::dispatcher::{ClientEvent, Handlers, PendingReplies, ReceiveDispatcher};
use crate::error::ClientError;
use bytes::BytesMut;
use easychat_protocol::message::*;
use easychat_protocol::{Encoder, Frame, UNAUTHENTICATED_ID};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// High-level client for EasyChat.
pub struct Client {
    conn: Arc<Connection>,
    directory: Arc<SessionDirectory>,
    pending: Arc<PendingReplies>,
    handlers: Arc<RwLock<Handlers>>,
    events: broadcast::Sender<ClientEvent>,
    correlator: RequestCorrelator,
    dispatcher: Mutex<Option<JoinHandle<Result<(), ClientError>>>>,
}

impl Client {
    /// Creates a new client with the given configuration.
    pub fn new(config: ConnectionConfig) -> Self {
        let poll_interval = config.poll_interval;
        let conn = Arc::new(Connection::new(config));
        let directory = Arc::new(SessionDirectory::new());
        let correlator = RequestCorrelator::new(conn.clone(), directory.clone(), poll_interval);

        Self {
            conn,
            directory,
            pending: Arc::new(PendingReplies::new()),
            handlers: Arc::new(RwLock::new(Handlers::default())),
            events: ReceiveDispatcher::event_channel(),
            correlator,
            dispatcher: Mutex::new(None),
        }
    }

    /// Connects to the server and starts the receive dispatcher.
    ///
    /// A dispatcher left over from a dropped stream is stopped and awaited
    /// first, so its teardown cannot reach the new session.
    pub async fn connect(&self) -> Result<(), ClientError> {
        if self.conn.is_connected() {
            return Ok(());
        }

        let previous = self.dispatcher.lock().take();
        if let Some(handle) = previous {
            self.conn.mark_disconnected();
            Self::join_dispatcher(handle).await;
        }

        self.conn.connect().await?;

        let dispatcher = ReceiveDispatcher::new(
            self.conn.clone(),
            self.directory.clone(),
            self.pending.clone(),
            self.handlers.clone(),
            self.events.clone(),
        );
        let handle = dispatcher.spawn()?;
        *self.dispatcher.lock() = Some(handle);
        Ok(())
    }

    /// Returns whether the client is connected.
    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    /// Closes the connection and waits for the dispatcher to stop.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.conn.close().await?;

        let handle = self.dispatcher.lock().take();
        if let Some(handle) = handle {
            Self::join_dispatcher(handle).await;
        }
        Ok(())
    }

    async fn join_dispatcher(handle: JoinHandle<Result<(), ClientError>>) {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!("Dispatcher had already stopped: {}", e),
            Err(e) => tracing::warn!("Dispatcher task failed: {}", e),
        }
    }

    /// Returns the underlying connection.
    pub fn connection(&self) -> Arc<Connection> {
        self.conn.clone()
    }

    /// Returns the shared session directory.
    pub fn directory(&self) -> Arc<SessionDirectory> {
        self.directory.clone()
    }

    /// Returns a snapshot of the session identity.
    pub fn identity(&self) -> SessionIdentity {
        self.directory.identity()
    }

    /// Sets the callback for chat and offline messages.
    ///
    /// The callback runs on the dispatcher task; it must not block.
    pub fn set_message_callback<F>(&self, callback: F)
    where
        F: Fn(&str, i32, &str) + Send + Sync + 'static,
    {
        self.handlers.write().on_message = Some(Arc::new(callback));
    }

    /// Sets the callback for server error frames.
    pub fn set_error_callback<F>(&self, callback: F)
    where
        F: Fn(i32, &str) + Send + Sync + 'static,
    {
        self.handlers.write().on_error = Some(Arc::new(callback));
    }

    /// Subscribes to every routed frame, as typed events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    // =========================================================================
    // Helper methods
    // =========================================================================

    /// Sends `bytes` and waits for the next frame of one of `accepts`.
    async fn request(
        &self,
        bytes: BytesMut,
        accepts: &'static [MessageKind],
    ) -> Result<Frame, ClientError> {
        // Registered first so a fast reply cannot slip past
        let rx = self.pending.register(accepts);
        self.conn.write_all(&bytes).await?;

        match tokio::time::timeout(self.conn.config().request_timeout, rx).await {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(_)) => Err(ClientError::ConnectionClosed),
            Err(_) => Err(ClientError::Timeout),
        }
    }

    fn require_auth(&self) -> Result<i32, ClientError> {
        let identity = self.directory.identity();
        if !identity.is_authenticated() {
            return Err(ClientError::NotAuthenticated);
        }
        Ok(identity.user_id)
    }

    async fn resolve_peer(&self, target: &str) -> Result<i32, ClientError> {
        let timeout = self.conn.config().resolve_timeout;
        self.correlator.resolve_peer(target, timeout).await
    }

    // =========================================================================
    // Session operations
    // =========================================================================

    /// Logs in and returns the user id assigned by the server.
    pub async fn login(&self, username: &str, password: &str) -> Result<i32, ClientError> {
        self.directory.begin_login(username);
        let request = LoginRequest::new(username, password);

        let frame = self
            .request(
                Encoder::login(&request),
                &[MessageKind::LoginResponse, MessageKind::Error],
            )
            .await?;

        let reason = frame.payload_str()?.to_string();
        if frame.kind() == MessageKind::LoginResponse && frame.subject_id() != UNAUTHENTICATED_ID {
            return Ok(frame.subject_id());
        }

        self.directory.take_login_username();
        Err(ClientError::LoginRejected(reason))
    }

    /// Registers a new account. Returns the server's confirmation text.
    pub async fn register(
        &self,
        username: &str,
        password: &str,
        nickname: &str,
    ) -> Result<String, ClientError> {
        let request = RegisterRequest {
            username: username.to_string(),
            password: password.to_string(),
            nickname: nickname.to_string(),
        };

        let frame = self
            .request(
                Encoder::register(&request),
                &[MessageKind::RegisterResponse, MessageKind::Error],
            )
            .await?;

        let message = frame.payload_str()?.to_string();
        match frame.kind() {
            MessageKind::RegisterResponse => Ok(message),
            _ => Err(ClientError::RegisterRejected(message)),
        }
    }

    /// Sends a heartbeat and returns the round-trip time.
    pub async fn heartbeat(&self) -> Result<Duration, ClientError> {
        let user_id = self.require_auth()?;
        let start = Instant::now();
        self.request(Encoder::heartbeat(user_id), &[MessageKind::Heartbeat])
            .await?;
        Ok(start.elapsed())
    }

    // =========================================================================
    // Chat operations
    // =========================================================================

    /// Sends a chat message. `receiver` is a username or a numeric id.
    ///
    /// The server does not acknowledge chat; returns the receiver id once
    /// the frame is written.
    pub async fn send_chat(&self, receiver: &str, content: &str) -> Result<i32, ClientError> {
        let sender_id = self.require_auth()?;
        let receiver_id = self.resolve_peer(receiver).await?;

        let message = ChatMessage::new(receiver_id, content);
        self.conn
            .write_all(&Encoder::chat(sender_id, &message))
            .await?;
        tracing::debug!(
            "Sent {} bytes to {}",
            content.len(),
            self.directory.lookup_name(receiver_id)
        );
        Ok(receiver_id)
    }

    /// Fetches up to `limit` history records exchanged with `peer`.
    pub async fn history(&self, peer: &str, limit: u32) -> Result<Vec<HistoryEntry>, ClientError> {
        let user_id = self.require_auth()?;
        let peer_id = self.resolve_peer(peer).await?;

        let request = HistoryRequest { peer_id, limit };
        let frame = self
            .request(
                Encoder::history(user_id, &request),
                &[MessageKind::HistoryResponse],
            )
            .await?;
        Ok(HistoryEntry::parse_list(frame.payload_str()?))
    }

    // =========================================================================
    // Directory operations
    // =========================================================================

    /// Fetches the online users. The directory is replaced with the result.
    pub async fn online_users(&self) -> Result<Vec<UserEntry>, ClientError> {
        let user_id = self.require_auth()?;
        let frame = self
            .request(Encoder::get_users(user_id), &[MessageKind::GetUsersResponse])
            .await?;
        Ok(UserEntry::parse_list(frame.payload_str()?))
    }

    /// Asks the server for one user by name.
    pub async fn lookup_user(&self, name: &str) -> Result<UserEntry, ClientError> {
        let user_id = self.directory.identity().user_id;
        let frame = self
            .request(
                Encoder::get_user_by_name(user_id, name),
                &[MessageKind::GetUserByNameResponse],
            )
            .await?;

        UserEntry::parse(frame.payload_str()?).map_err(|_| ClientError::UserNotFound(name.to_string()))
    }

    /// Resolves a username to an id, asking the server when needed.
    pub async fn resolve_name_to_id(&self, name: &str, timeout: Duration) -> Result<i32, ClientError> {
        self.correlator.resolve_name_to_id(name, timeout).await
    }
}
