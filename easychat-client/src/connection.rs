//! Connection management.

use crate::error::ClientError;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex as SyncMutex;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};

/// Default connect timeout (10 seconds).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for operations that wait on a reply frame.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Default budget for resolving a username over the network.
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(3);

/// Default interval between directory polls while resolving a name.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server host name or IP.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// How long to wait for a reply frame (login, history, ...).
    pub request_timeout: Duration,
    /// How long a network name lookup may take.
    pub resolve_timeout: Duration,
    /// Directory poll interval while a name lookup is pending.
    pub poll_interval: Duration,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            resolve_timeout: DEFAULT_RESOLVE_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_resolve_timeout(mut self, timeout: Duration) -> Self {
        self.resolve_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Returns `host:port`.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

/// A connection to an EasyChat server.
///
/// The read half is handed to the dispatcher once, right after connecting;
/// the write half stays here and is shared by every caller.
///
/// Every successful `connect()` starts a new generation. A dispatcher only
/// tears down the generation it was started for.
pub struct Connection {
    config: ConnectionConfig,
    state: SyncMutex<ConnectionState>,
    /// Bumped under the `state` lock.
    generation: AtomicU64,
    /// Write half of the stream. Holding the lock for a whole frame keeps
    /// concurrent frames from interleaving.
    writer: Mutex<Option<OwnedWriteHalf>>,
    /// Read half, until the dispatcher takes it.
    reader: SyncMutex<Option<OwnedReadHalf>>,
    /// Flipped to `true` on every transition to `Disconnected`.
    shutdown: watch::Sender<bool>,
}

impl Connection {
    /// Creates a new connection (not yet connected).
    pub fn new(config: ConnectionConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            state: SyncMutex::new(ConnectionState::Disconnected),
            generation: AtomicU64::new(0),
            writer: Mutex::new(None),
            reader: SyncMutex::new(None),
            shutdown,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Connects to the server.
    ///
    /// Only the connect itself is bounded by `connect_timeout`; reads on the
    /// established stream block until data arrives or the connection closes.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let addr = self.config.addr();
        {
            let mut state = self.state.lock();
            if *state == ConnectionState::Connected {
                return Ok(());
            }
            *state = ConnectionState::Connecting;
        }
        tracing::debug!("Connecting to {}...", addr);

        let result = tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect((self.config.host.as_str(), self.config.port)),
        )
        .await;

        let tcp_stream = match result {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                tracing::debug!("Connection to {} failed: {}", addr, e);
                *self.state.lock() = ConnectionState::Disconnected;
                return Err(ClientError::ConnectFailed { addr, source: e });
            }
            Err(_) => {
                tracing::debug!("Connection to {} timed out", addr);
                *self.state.lock() = ConnectionState::Disconnected;
                return Err(ClientError::Timeout);
            }
        };

        tcp_stream.set_nodelay(true).ok();

        let (read_half, write_half) = tcp_stream.into_split();
        *self.writer.lock().await = Some(write_half);
        *self.reader.lock() = Some(read_half);
        let generation = {
            let mut state = self.state.lock();
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            *state = ConnectionState::Connected;
            self.shutdown.send_replace(false);
            generation
        };

        tracing::info!("Connected to {} (generation {})", addr, generation);
        Ok(())
    }

    /// Hands the read half to the caller. Returns `None` if it was already
    /// taken or the connection is not established.
    pub fn take_reader(&self) -> Option<OwnedReadHalf> {
        self.reader.lock().take()
    }

    /// Returns the generation of the current (or last) stream.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Returns a receiver that flips to `true` when the connection drops
    /// or is closed.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Writes a complete buffer to the stream.
    ///
    /// Any failure marks the connection disconnected.
    pub async fn write_all(&self, bytes: &[u8]) -> Result<(), ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }

        let mut writer_guard = self.writer.lock().await;
        let writer = writer_guard.as_mut().ok_or(ClientError::NotConnected)?;
        if let Err(e) = writer.write_all(bytes).await {
            tracing::warn!("Write of {} bytes failed: {}", bytes.len(), e);
            writer_guard.take();
            self.mark_disconnected();
            return Err(ClientError::WriteFailed(e));
        }

        tracing::debug!("Wrote {} bytes", bytes.len());
        Ok(())
    }

    /// Records a transport failure and wakes the dispatcher.
    pub fn mark_disconnected(&self) {
        let mut state = self.state.lock();
        self.disconnect_locked(&mut state);
    }

    /// Like [`Connection::mark_disconnected`], but only while `generation`
    /// is still current. Returns whether it applied.
    pub fn mark_disconnected_if(&self, generation: u64) -> bool {
        let mut state = self.state.lock();
        if self.generation.load(Ordering::SeqCst) != generation {
            return false;
        }
        self.disconnect_locked(&mut state);
        true
    }

    fn disconnect_locked(&self, state: &mut ConnectionState) {
        if *state != ConnectionState::Disconnected {
            tracing::debug!("Connection state {:?} -> Disconnected", *state);
            *state = ConnectionState::Disconnected;
        }
        self.shutdown.send_replace(true);
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Returns whether the connection is established.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Closes the connection. Safe to call more than once.
    pub async fn close(&self) -> Result<(), ClientError> {
        tracing::debug!("Closing connection...");
        *self.state.lock() = ConnectionState::Closing;

        // Wakes the dispatcher out of its pending read
        self.shutdown.send_replace(true);

        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        self.reader.lock().take();

        *self.state.lock() = ConnectionState::Disconnected;
        tracing::debug!("Connection closed");
        Ok(())
    }
}

/// Reads exactly `n` bytes.
///
/// Keeps reading across partial segments; returns `ConnectionClosed` if the
/// stream ends first. Never returns a short buffer.
pub async fn read_exact<R>(reader: &mut R, n: usize) -> Result<Bytes, ClientError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::zeroed(n);
    let mut filled = 0;

    while filled < n {
        match reader.read(&mut buf[filled..]).await {
            Ok(0) => {
                tracing::debug!("Stream closed after {} of {} bytes", filled, n);
                return Err(ClientError::ConnectionClosed);
            }
            Ok(read) => filled += read,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(ClientError::Io(e)),
        }
    }

    Ok(buf.freeze())
}
