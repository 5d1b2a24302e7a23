//! Background frame dispatch.
//!
//! One dispatcher task runs per connection. It owns the read half of the
//! stream, decodes one frame at a time and routes it by kind: session and
//! directory updates first, then callbacks, then the oldest pending reply
//! waiter that accepts the kind, then the event broadcast.

use crate::connection::{read_exact, Connection};
use crate::directory::SessionDirectory;
use crate::error::ClientError;
use bytes::Bytes;
use easychat_protocol::{
    decode_header, Frame, HistoryEntry, MessageKind, UserEntry, FRAME_HEADER_SIZE,
    UNAUTHENTICATED_ID,
};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncRead;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

/// Default capacity for the event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Called for chat and offline messages with `(kind, sender_id, payload)`,
/// where kind is `"chat"` or `"offline"`. Runs on the dispatcher task, so it
/// must return quickly.
pub type MessageCallback = Arc<dyn Fn(&str, i32, &str) + Send + Sync>;

/// Called for error frames with `(subject_id, message)`.
pub type ErrorCallback = Arc<dyn Fn(i32, &str) + Send + Sync>;

/// A routed inbound frame, in typed form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    LoggedIn {
        user_id: i32,
        username: String,
    },
    LoginFailed {
        reason: String,
    },
    Registered {
        message: String,
    },
    Message {
        kind: String,
        sender_id: i32,
        sender: String,
        content: String,
    },
    ChatAck {
        message: String,
    },
    OnlineUsers {
        users: Vec<UserEntry>,
    },
    UserFound {
        user: UserEntry,
    },
    UserNotFound {
        payload: String,
    },
    History {
        entries: Vec<HistoryEntry>,
    },
    Heartbeat {
        payload: String,
    },
    ServerError {
        subject_id: i32,
        message: String,
    },
    Unhandled {
        kind: String,
        subject_id: i32,
        payload: String,
    },
    Disconnected {
        reason: String,
    },
}

/// Callbacks registered by the application.
#[derive(Clone, Default)]
pub struct Handlers {
    pub on_message: Option<MessageCallback>,
    pub on_error: Option<ErrorCallback>,
}

struct Waiter {
    accepts: &'static [MessageKind],
    tx: oneshot::Sender<Frame>,
}

/// Callers waiting for a reply frame.
///
/// The wire has no request ids, so waiters for the same kind are completed
/// in the order they registered.
#[derive(Default)]
pub struct PendingReplies {
    waiters: Mutex<VecDeque<Waiter>>,
}

impl PendingReplies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a waiter completed by the next frame of one of `accepts`.
    ///
    /// Register before sending the request, or a fast reply can be missed.
    pub fn register(&self, accepts: &'static [MessageKind]) -> oneshot::Receiver<Frame> {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().push_back(Waiter { accepts, tx });
        rx
    }

    /// Hands `frame` to the oldest live waiter that accepts it.
    fn complete(&self, frame: &Frame) -> bool {
        let mut waiters = self.waiters.lock();
        // Waiters whose caller gave up are dead weight
        waiters.retain(|w| !w.tx.is_closed());

        let position = waiters
            .iter()
            .position(|w| w.accepts.contains(&frame.kind()));
        match position.and_then(|i| waiters.remove(i)) {
            Some(waiter) => waiter.tx.send(frame.clone()).is_ok(),
            None => false,
        }
    }

    /// Drops every waiter; their receivers see the channel close.
    pub fn clear(&self) -> usize {
        let mut waiters = self.waiters.lock();
        let count = waiters.len();
        waiters.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.waiters.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Reads one complete frame.
///
/// A stream that ends anywhere inside the frame yields `ConnectionClosed`;
/// a partial frame is never returned.
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame, ClientError>
where
    R: AsyncRead + Unpin,
{
    let header_bytes = read_exact(reader, FRAME_HEADER_SIZE).await?;
    let header = decode_header(&header_bytes)?;
    let payload_len = header.payload_len()?;

    let payload = if payload_len > 0 {
        read_exact(reader, payload_len).await?
    } else {
        Bytes::new()
    };

    Ok(Frame::from_parts(header, payload)?)
}

/// Routes inbound frames for one connection.
///
/// Bound to the connection generation current when it was created; once a
/// newer stream is up, a stale dispatcher leaves the session alone.
pub struct ReceiveDispatcher {
    conn: Arc<Connection>,
    generation: u64,
    directory: Arc<SessionDirectory>,
    pending: Arc<PendingReplies>,
    handlers: Arc<RwLock<Handlers>>,
    events: broadcast::Sender<ClientEvent>,
}

impl ReceiveDispatcher {
    pub fn new(
        conn: Arc<Connection>,
        directory: Arc<SessionDirectory>,
        pending: Arc<PendingReplies>,
        handlers: Arc<RwLock<Handlers>>,
        events: broadcast::Sender<ClientEvent>,
    ) -> Self {
        Self {
            generation: conn.generation(),
            conn,
            directory,
            pending,
            handlers,
            events,
        }
    }

    /// Creates the event channel a dispatcher publishes on.
    pub fn event_channel() -> broadcast::Sender<ClientEvent> {
        broadcast::channel(EVENT_CHANNEL_CAPACITY).0
    }

    /// Takes the connection's read half and runs the loop on a new task.
    pub fn spawn(self) -> Result<JoinHandle<Result<(), ClientError>>, ClientError> {
        let reader = self.conn.take_reader().ok_or(ClientError::NotConnected)?;
        Ok(tokio::spawn(self.run(reader)))
    }

    /// Runs until the stream fails or the connection leaves `Connected`.
    ///
    /// Returns `Ok(())` when stopped by the shutdown signal, otherwise the
    /// error that ended the loop. If this dispatcher's generation is still
    /// current, the connection is left disconnected, the session identity
    /// is reset and pending waiters are dropped.
    pub async fn run<R>(self, mut reader: R) -> Result<(), ClientError>
    where
        R: AsyncRead + Unpin,
    {
        tracing::debug!("Dispatcher started (generation {})", self.generation);
        let result = self.pump(&mut reader).await;

        if !self.conn.mark_disconnected_if(self.generation) {
            tracing::debug!(
                "Dispatcher for stale generation {} stopped: {:?}",
                self.generation,
                result
            );
            return result;
        }
        self.directory.reset_identity();
        let dropped = self.pending.clear();

        let reason = match &result {
            Ok(()) => {
                tracing::debug!("Dispatcher stopped by shutdown signal");
                "closed".to_string()
            }
            Err(e) => {
                tracing::warn!("Dispatcher stopped: {}", e);
                e.to_string()
            }
        };
        if dropped > 0 {
            tracing::debug!("Dropped {} pending replies", dropped);
        }
        let _ = self.events.send(ClientEvent::Disconnected { reason });

        result
    }

    async fn pump<R>(&self, reader: &mut R) -> Result<(), ClientError>
    where
        R: AsyncRead + Unpin,
    {
        let mut shutdown = self.conn.shutdown_signal();

        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            // read_frame is not cancel safe, so any change ends the loop
            // instead of restarting the read
            let frame = tokio::select! {
                biased;
                _ = shutdown.changed() => return Ok(()),
                frame = read_frame(reader) => frame?,
            };

            self.route(frame)?;
        }
    }

    /// Applies one frame. Fails only if the payload is not valid UTF-8.
    pub fn route(&self, frame: Frame) -> Result<(), ClientError> {
        let kind = frame.kind();
        let subject_id = frame.subject_id();
        let payload = frame.payload_str()?;
        tracing::debug!(
            "Received [{}] subject={} ({} bytes)",
            kind,
            subject_id,
            payload.len()
        );

        let event = match kind {
            MessageKind::LoginResponse => {
                let username = self.directory.take_login_username().unwrap_or_default();
                if subject_id != UNAUTHENTICATED_ID {
                    self.directory.set_identity(subject_id, &username);
                    let pruned = self.directory.prune_lookups(Instant::now());
                    tracing::info!("Logged in as {} (id {})", username, subject_id);
                    if pruned > 0 {
                        tracing::debug!("Pruned {} expired lookups", pruned);
                    }
                    ClientEvent::LoggedIn {
                        user_id: subject_id,
                        username,
                    }
                } else {
                    tracing::warn!("Login failed: {}", payload);
                    ClientEvent::LoginFailed {
                        reason: payload.to_string(),
                    }
                }
            }

            MessageKind::Chat | MessageKind::OfflineMessage => {
                let label = if kind == MessageKind::Chat {
                    "chat"
                } else {
                    "offline"
                };
                let callback = self.handlers.read().on_message.clone();
                if let Some(callback) = callback {
                    callback(label, subject_id, payload);
                }
                ClientEvent::Message {
                    kind: label.to_string(),
                    sender_id: subject_id,
                    sender: self.directory.lookup_name(subject_id),
                    content: payload.to_string(),
                }
            }

            MessageKind::GetUsersResponse => {
                let users = UserEntry::parse_list(payload);
                self.directory.replace_all(&users);
                tracing::debug!("Directory replaced with {} users", users.len());
                ClientEvent::OnlineUsers { users }
            }

            MessageKind::HistoryResponse => ClientEvent::History {
                entries: HistoryEntry::parse_list(payload),
            },

            MessageKind::GetUserByNameResponse => match UserEntry::parse(payload) {
                Ok(user) => {
                    self.directory.upsert(user.id, &user.name);
                    tracing::debug!("Resolved {} -> {}", user.name, user.id);
                    ClientEvent::UserFound { user }
                }
                Err(_) => ClientEvent::UserNotFound {
                    payload: payload.to_string(),
                },
            },

            MessageKind::Error => {
                tracing::warn!("Server error: {}", payload);
                let callback = self.handlers.read().on_error.clone();
                if let Some(callback) = callback {
                    callback(subject_id, payload);
                }
                ClientEvent::ServerError {
                    subject_id,
                    message: payload.to_string(),
                }
            }

            MessageKind::RegisterResponse => ClientEvent::Registered {
                message: payload.to_string(),
            },

            MessageKind::ChatResponse => ClientEvent::ChatAck {
                message: payload.to_string(),
            },

            MessageKind::Heartbeat => ClientEvent::Heartbeat {
                payload: payload.to_string(),
            },

            MessageKind::Login
            | MessageKind::Register
            | MessageKind::History
            | MessageKind::GetUsers
            | MessageKind::GetUserByName
            | MessageKind::Unknown(_) => {
                if kind.is_request() {
                    tracing::debug!("Ignoring echoed request [{}]", kind);
                } else {
                    tracing::debug!("Ignoring inbound [{}] frame", kind);
                }
                ClientEvent::Unhandled {
                    kind: kind.to_string(),
                    subject_id,
                    payload: payload.to_string(),
                }
            }
        };

        self.pending.complete(&frame);
        // No subscribers is fine
        let _ = self.events.send(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionConfig;
    use easychat_protocol::frame::encode;
    use easychat_protocol::ProtocolError;
    use tokio::io::{duplex, AsyncWriteExt};

    struct Harness {
        conn: Arc<Connection>,
        directory: Arc<SessionDirectory>,
        pending: Arc<PendingReplies>,
        handlers: Arc<RwLock<Handlers>>,
        events: broadcast::Sender<ClientEvent>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                conn: Arc::new(Connection::new(ConnectionConfig::new("127.0.0.1", 1))),
                directory: Arc::new(SessionDirectory::new()),
                pending: Arc::new(PendingReplies::new()),
                handlers: Arc::new(RwLock::new(Handlers::default())),
                events: ReceiveDispatcher::event_channel(),
            }
        }

        fn dispatcher(&self) -> ReceiveDispatcher {
            ReceiveDispatcher::new(
                self.conn.clone(),
                self.directory.clone(),
                self.pending.clone(),
                self.handlers.clone(),
                self.events.clone(),
            )
        }

        /// Feeds `wire` to a dispatcher and runs it until the stream ends.
        async fn run(&self, wire: Vec<u8>) -> Result<(), ClientError> {
            let (reader, mut writer) = duplex(64 * 1024);
            writer.write_all(&wire).await.unwrap();
            drop(writer);
            self.dispatcher().run(reader).await
        }
    }

    fn frames(parts: &[(MessageKind, i32, &str)]) -> Vec<u8> {
        let mut wire = Vec::new();
        for (kind, subject_id, payload) in parts {
            wire.extend_from_slice(&encode(*kind, *subject_id, payload));
        }
        wire
    }

    fn drain(rx: &mut broadcast::Receiver<ClientEvent>) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_login_then_online_users() {
        let h = Harness::new();
        h.directory.begin_login("alice");

        let wire = frames(&[
            (MessageKind::LoginResponse, 7, ""),
            (MessageKind::GetUsersResponse, 7, "7:alice,8:bob"),
        ]);

        // Inspect state before the end of stream resets the identity
        let (reader, mut writer) = duplex(4096);
        writer.write_all(&wire).await.unwrap();
        let mut rx = h.events.subscribe();
        let task = tokio::spawn(h.dispatcher().run(reader));

        let first = rx.recv().await.unwrap();
        assert_eq!(
            first,
            ClientEvent::LoggedIn {
                user_id: 7,
                username: "alice".into()
            }
        );
        rx.recv().await.unwrap();
        assert_eq!(h.directory.identity().user_id, 7);
        assert_eq!(h.directory.lookup_id("bob"), Some(8));
        assert_eq!(h.directory.lookup_name(7), "alice");

        drop(writer);
        let result = task.await.unwrap();
        assert!(matches!(result, Err(ClientError::ConnectionClosed)));
        assert!(!h.directory.identity().is_authenticated());
        // Directory is a cache and outlives the connection
        assert_eq!(h.directory.lookup_id("bob"), Some(8));
    }

    #[tokio::test]
    async fn test_login_failure_keeps_unauthenticated() {
        let h = Harness::new();
        h.directory.begin_login("alice");
        let mut rx = h.events.subscribe();

        let wire = frames(&[(MessageKind::LoginResponse, -1, "Login failed")]);
        let _ = h.run(wire).await;

        let events = drain(&mut rx);
        assert_eq!(
            events[0],
            ClientEvent::LoginFailed {
                reason: "Login failed".into()
            }
        );
        assert!(!h.directory.identity().is_authenticated());
    }

    #[tokio::test]
    async fn test_login_prunes_expired_lookups() {
        let h = Harness::new();
        h.directory.register_lookup("ghost", Instant::now());
        h.directory
            .register_lookup("bob", Instant::now() + std::time::Duration::from_secs(60));

        let _ = h.run(frames(&[(MessageKind::LoginResponse, 7, "")])).await;

        let pending = h.directory.pending_lookups();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].key, "bob");
    }

    #[tokio::test]
    async fn test_chat_and_offline_reach_callback() {
        let h = Harness::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = seen.clone();
            h.handlers.write().on_message = Some(Arc::new(move |kind, sender, payload| {
                seen.lock()
                    .push((kind.to_string(), sender, payload.to_string()));
            }));
        }
        h.directory.upsert(8, "bob");

        let wire = frames(&[
            (MessageKind::Chat, 8, "hello"),
            (MessageKind::OfflineMessage, 9, "while you were out"),
        ]);
        let mut rx = h.events.subscribe();
        let _ = h.run(wire).await;

        assert_eq!(
            *seen.lock(),
            vec![
                ("chat".to_string(), 8, "hello".to_string()),
                ("offline".to_string(), 9, "while you were out".to_string()),
            ]
        );
        assert_eq!(
            drain(&mut rx)[0],
            ClientEvent::Message {
                kind: "chat".into(),
                sender_id: 8,
                sender: "bob".into(),
                content: "hello".into(),
            }
        );
        // Chat never touches the directory
        assert_eq!(h.directory.len(), 1);
    }

    #[tokio::test]
    async fn test_user_lookup_upserts() {
        let h = Harness::new();
        h.directory.replace_all(&[UserEntry::new(7, "alice")]);

        let wire = frames(&[
            (MessageKind::GetUserByNameResponse, 0, "8:bob"),
            (MessageKind::GetUserByNameResponse, 0, ""),
        ]);
        let mut rx = h.events.subscribe();
        let _ = h.run(wire).await;

        assert_eq!(h.directory.lookup_id("alice"), Some(7));
        assert_eq!(h.directory.lookup_id("bob"), Some(8));

        let events = drain(&mut rx);
        assert_eq!(
            events[1],
            ClientEvent::UserNotFound {
                payload: String::new()
            }
        );
    }

    #[tokio::test]
    async fn test_online_users_replace_directory() {
        let h = Harness::new();
        h.directory.upsert(3, "stale");

        let _ = h
            .run(frames(&[(MessageKind::GetUsersResponse, 0, "7:alice,8:bob")]))
            .await;

        assert_eq!(h.directory.lookup_id("stale"), None);
        assert_eq!(h.directory.len(), 2);
    }

    #[tokio::test]
    async fn test_error_frame_reaches_callback() {
        let h = Harness::new();
        let seen = Arc::new(Mutex::new(None));
        {
            let seen = seen.clone();
            h.handlers.write().on_error = Some(Arc::new(move |subject, message| {
                *seen.lock() = Some((subject, message.to_string()));
            }));
        }

        let result = h
            .run(frames(&[(MessageKind::Error, -1, "Login failed")]))
            .await;

        assert!(matches!(result, Err(ClientError::ConnectionClosed)));
        assert_eq!(*seen.lock(), Some((-1, "Login failed".to_string())));
    }

    #[tokio::test]
    async fn test_unknown_kind_payload_is_skipped() {
        let h = Harness::new();
        let mut rx = h.events.subscribe();

        let mut wire = Vec::new();
        wire.extend_from_slice(&encode(MessageKind::Unknown(9999), 5, "future stuff: 1,2,3"));
        wire.extend_from_slice(&encode(MessageKind::Heartbeat, 5, "Pong"));
        let _ = h.run(wire).await;

        let events = drain(&mut rx);
        assert_eq!(
            events[0],
            ClientEvent::Unhandled {
                kind: "UNKNOWN(9999)".into(),
                subject_id: 5,
                payload: "future stuff: 1,2,3".into(),
            }
        );
        assert_eq!(
            events[1],
            ClientEvent::Heartbeat {
                payload: "Pong".into()
            }
        );
    }

    #[tokio::test]
    async fn test_closed_mid_frame_routes_nothing() {
        let h = Harness::new();
        let called = Arc::new(Mutex::new(false));
        {
            let called = called.clone();
            h.handlers.write().on_message = Some(Arc::new(move |_, _, _| {
                *called.lock() = true;
            }));
        }
        let mut rx = h.events.subscribe();

        let full = encode(MessageKind::Chat, 8, "hello");
        let result = h.run(full[..FRAME_HEADER_SIZE + 2].to_vec()).await;

        assert!(matches!(result, Err(ClientError::ConnectionClosed)));
        assert!(!*called.lock());
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ClientEvent::Disconnected { .. }));
    }

    #[tokio::test]
    async fn test_short_length_is_fatal() {
        let h = Harness::new();

        let mut wire = Vec::new();
        wire.extend_from_slice(&8u32.to_be_bytes());
        wire.extend_from_slice(&5u32.to_be_bytes());
        wire.extend_from_slice(&0u32.to_be_bytes());
        wire.extend_from_slice(&encode(MessageKind::Heartbeat, 0, "Pong"));

        let result = h.run(wire).await;
        assert!(matches!(
            result,
            Err(ClientError::Protocol(ProtocolError::InvalidLength(8)))
        ));
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_fatal() {
        let h = Harness::new();
        let frame = Frame::new(MessageKind::Chat, 1, Bytes::from_static(&[0xFF, 0xFE]));

        let result = h.run(frame.encode().to_vec()).await;
        assert!(matches!(
            result,
            Err(ClientError::Protocol(ProtocolError::InvalidUtf8))
        ));
    }

    #[tokio::test]
    async fn test_pending_reply_completion_order() {
        let h = Harness::new();
        let first = h.pending.register(&[MessageKind::HistoryResponse]);
        let second = h.pending.register(&[MessageKind::HistoryResponse]);
        let login = h
            .pending
            .register(&[MessageKind::LoginResponse, MessageKind::Error]);

        let wire = frames(&[
            (MessageKind::HistoryResponse, 0, "7:one"),
            (MessageKind::Error, -1, "Login failed"),
            (MessageKind::HistoryResponse, 0, "7:two"),
        ]);
        let _ = h.run(wire).await;

        assert_eq!(first.await.unwrap().payload_str().unwrap(), "7:one");
        assert_eq!(second.await.unwrap().payload_str().unwrap(), "7:two");
        assert_eq!(login.await.unwrap().kind(), MessageKind::Error);
    }

    #[tokio::test]
    async fn test_abandoned_waiter_is_skipped() {
        let pending = PendingReplies::new();
        let abandoned = pending.register(&[MessageKind::Heartbeat]);
        let live = pending.register(&[MessageKind::Heartbeat]);
        drop(abandoned);

        assert!(pending.complete(&Frame::new(MessageKind::Heartbeat, 0, Bytes::new())));
        assert!(live.await.is_ok());
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_waiters_dropped_on_disconnect() {
        let h = Harness::new();
        let rx = h.pending.register(&[MessageKind::HistoryResponse]);

        let _ = h.run(Vec::new()).await;
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn test_close_stops_blocked_dispatcher() {
        let h = Harness::new();
        let (reader, _writer) = duplex(1024);
        let task = tokio::spawn(h.dispatcher().run(reader));

        tokio::task::yield_now().await;
        h.conn.close().await.unwrap();

        let result = tokio::time::timeout(std::time::Duration::from_secs(2), task)
            .await
            .expect("dispatcher did not stop")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_mark_disconnected_stops_dispatcher() {
        let h = Harness::new();
        h.directory.begin_login("mallory");
        let (reader, mut writer) = duplex(1024);
        let task = tokio::spawn(h.dispatcher().run(reader));

        tokio::task::yield_now().await;
        h.conn.mark_disconnected();
        // Arrives after the drop and must not be applied
        writer
            .write_all(&encode(MessageKind::LoginResponse, 42, ""))
            .await
            .unwrap();

        let result = tokio::time::timeout(std::time::Duration::from_secs(2), task)
            .await
            .expect("dispatcher did not stop")
            .unwrap();
        assert!(result.is_ok());
        assert!(!h.directory.identity().is_authenticated());
    }

    #[tokio::test]
    async fn test_stale_dispatcher_leaves_new_session_alone() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut sockets = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                sockets.push(socket);
            }
        });

        let mut h = Harness::new();
        h.conn = Arc::new(Connection::new(ConnectionConfig::new("127.0.0.1", port)));
        h.conn.connect().await.unwrap();
        let stale = h.dispatcher();

        h.conn.mark_disconnected();
        h.conn.connect().await.unwrap();
        h.directory.set_identity(7, "alice");
        let waiter = h.pending.register(&[MessageKind::Heartbeat]);
        let mut rx = h.events.subscribe();

        // The old stream ends only after the new one is up
        let (reader, writer) = duplex(64);
        drop(writer);
        let result = stale.run(reader).await;

        assert!(matches!(result, Err(ClientError::ConnectionClosed)));
        assert!(h.conn.is_connected());
        assert_eq!(h.directory.identity().user_id, 7);
        assert_eq!(h.pending.len(), 1);
        assert!(drain(&mut rx).is_empty());
        drop(waiter);
    }
}
