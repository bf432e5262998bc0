//! Per-design collaboration session.
//!
//! A [`CollabSession`] owns one WebSocket connection to
//! `{server_url}/design/{design_id}`, driven by a background task:
//!
//! ```text
//!            ┌──────────── retry (fixed delay, bounded budget) ───────────┐
//!            ▼                                                            │
//! Disconnected ──► Connecting ──► Connected ──(close / error)──► Disconnected
//!                      │              │                                   │
//!                      └── failed ────┼───────────────────────────────────┘
//!                                     │                        budget spent
//!                                     ▼                               ▼
//!                       CURSOR_MOVE with full identity        ConnectionFailed
//! ```
//!
//! Inbound frames are handed to the session, which applies them to the
//! caller's [`DesignStore`] in [`CollabSession::next_event`]. The store
//! therefore stays on the caller's task; the driver never touches it.
//!
//! Outbound operations are sent immediately, one frame each. There is no
//! offline queue: sending while not connected fails with
//! [`SessionError::NotConnected`], and frames still queued when the
//! connection drops are discarded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use forma_core::DesignStore;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::config::SessionConfig;
use crate::presence::{PresenceChange, PresenceList};
use crate::protocol::{
    now_millis, CursorPosition, OnlineUser, Operation, OperationPayload, OperationType,
    ProtocolError,
};
use crate::reconnect::{RetryDecision, RetryState};
use crate::sync::{ApplyError, ApplyOutcome, Synchronizer};

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events surfaced to the application.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Socket opened; our identity has been announced.
    Connected,
    /// An open connection was lost.
    Disconnected,
    /// A retry is scheduled after `delay`.
    Reconnecting { attempt: u32, delay: Duration },
    /// Retry budget spent; the session will not reconnect on its own.
    ConnectionFailed { attempts: u32 },
    /// A remote document operation was applied to the store.
    Applied(Operation),
    /// A remote cursor frame updated presence.
    PresenceChanged { user_id: String, change: PresenceChange },
    /// A remote operation was older than the watermark and discarded.
    Stale { timestamp: u64, watermark: u64 },
    /// A frame could not be parsed and was dropped.
    MessageDropped { error: ApplyError },
    /// A remote operation parsed but failed to apply.
    OperationFailed { error: ApplyError },
}

impl SessionEvent {
    /// Whether the event should be shown to the user as a failure.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. } | Self::MessageDropped { .. } | Self::OperationFailed { .. }
        )
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Not connected")]
    NotConnected,
    #[error("Session closed")]
    Closed,
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("Apply error: {0}")]
    Apply(#[from] ApplyError),
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// What the driver hands to the session.
#[derive(Debug)]
enum Inbound {
    Frame(String),
    Event(SessionEvent),
}

/// Why a live connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionExit {
    Lost,
    Shutdown,
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;

/// Next outgoing timestamp: wall clock, but strictly increasing per session.
fn next_timestamp(clock: &AtomicU64) -> u64 {
    let now = now_millis();
    let (Ok(prev) | Err(prev)) =
        clock.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(now.max(last + 1)));
    now.max(prev + 1)
}

/// State shared between the session handle and its driver task.
struct Driver {
    endpoint: String,
    config: SessionConfig,
    identity: Arc<RwLock<OnlineUser>>,
    state: Arc<RwLock<ConnectionState>>,
    clock: Arc<AtomicU64>,
    inbound_tx: mpsc::Sender<Inbound>,
}

impl Driver {
    async fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.write().await;
        if *state != next {
            log::debug!("{} : {:?} -> {next:?}", self.endpoint, *state);
            *state = next;
        }
    }

    async fn emit(&self, event: SessionEvent) {
        // Receiver gone means the session was dropped; nothing to report to.
        let _ = self.inbound_tx.send(Inbound::Event(event)).await;
    }

    async fn run(
        self,
        mut outgoing_rx: mpsc::Receiver<String>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        let mut retry = RetryState::new(self.config.reconnect);

        loop {
            self.set_state(ConnectionState::Connecting).await;
            let connected = tokio::select! {
                result = tokio_tungstenite::connect_async(self.endpoint.as_str()) => result,
                _ = &mut shutdown_rx => break,
            };

            match connected {
                Ok((ws, _)) => {
                    retry.on_connected();
                    log::info!("Connected to {}", self.endpoint);
                    let exit = self.run_connection(ws, &mut outgoing_rx, &mut shutdown_rx).await;
                    if exit == ConnectionExit::Shutdown {
                        break;
                    }
                    log::warn!("Connection to {} lost", self.endpoint);
                    self.set_state(ConnectionState::Disconnected).await;
                    self.emit(SessionEvent::Disconnected).await;
                }
                Err(e) => {
                    log::warn!("Failed to connect to {}: {e}", self.endpoint);
                    self.set_state(ConnectionState::Disconnected).await;
                }
            }

            let mut dropped = 0usize;
            while outgoing_rx.try_recv().is_ok() {
                dropped += 1;
            }
            if dropped > 0 {
                log::warn!("Discarded {dropped} unsent frames");
            }

            match retry.on_failure() {
                RetryDecision::Retry { attempt, delay } => {
                    log::info!(
                        "Reconnecting to {} in {}ms (attempt {attempt}/{})",
                        self.endpoint,
                        delay.as_millis(),
                        self.config.reconnect.max_attempts
                    );
                    self.emit(SessionEvent::Reconnecting { attempt, delay }).await;
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = &mut shutdown_rx => break,
                    }
                }
                RetryDecision::GiveUp { attempts } => {
                    log::error!(
                        "Giving up on {} after {attempts} reconnect attempts",
                        self.endpoint
                    );
                    self.emit(SessionEvent::ConnectionFailed { attempts }).await;
                    break;
                }
            }
        }

        self.set_state(ConnectionState::Disconnected).await;
    }

    async fn run_connection(
        &self,
        ws: WsStream,
        outgoing_rx: &mut mpsc::Receiver<String>,
        shutdown_rx: &mut oneshot::Receiver<()>,
    ) -> ConnectionExit {
        let (mut writer, mut reader) = ws.split();

        self.set_state(ConnectionState::Connected).await;

        let join = {
            let user = self.identity.read().await;
            Operation::cursor_move(&user, next_timestamp(&self.clock))
        };
        match join.encode() {
            Ok(text) => {
                if let Err(exit) = self.write(&mut writer, text).await {
                    return exit;
                }
            }
            Err(e) => log::error!("Failed to encode presence: {e}"),
        }
        self.emit(SessionEvent::Connected).await;

        loop {
            tokio::select! {
                msg = reader.next() => {
                    let frame = match msg {
                        Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
                        Some(Ok(Message::Binary(data))) => {
                            let bytes: Vec<u8> = data.into();
                            String::from_utf8_lossy(&bytes).into_owned()
                        }
                        Some(Ok(Message::Close(_))) | None => return ConnectionExit::Lost,
                        Some(Err(e)) => {
                            log::warn!("WebSocket error on {}: {e}", self.endpoint);
                            return ConnectionExit::Lost;
                        }
                        Some(Ok(_)) => continue,
                    };
                    if let Some(exit) = self
                        .forward(frame, &mut writer, outgoing_rx, shutdown_rx)
                        .await
                    {
                        if exit == ConnectionExit::Shutdown {
                            let _ = writer.close().await;
                        }
                        return exit;
                    }
                }
                out = outgoing_rx.recv() => match out {
                    Some(text) => {
                        if let Err(exit) = self.write(&mut writer, text).await {
                            return exit;
                        }
                    }
                    None => {
                        let _ = writer.close().await;
                        return ConnectionExit::Shutdown;
                    }
                },
                _ = &mut *shutdown_rx => {
                    let _ = writer.close().await;
                    return ConnectionExit::Shutdown;
                }
            }
        }
    }

    async fn write(&self, writer: &mut WsWriter, text: String) -> Result<(), ConnectionExit> {
        writer.send(Message::Text(text.into())).await.map_err(|e| {
            log::warn!("Send failed on {}: {e}", self.endpoint);
            ConnectionExit::Lost
        })
    }

    /// Hand one inbound frame to the session. While the session is not
    /// reading, outgoing frames keep flowing and shutdown is still honored.
    async fn forward(
        &self,
        frame: String,
        writer: &mut WsWriter,
        outgoing_rx: &mut mpsc::Receiver<String>,
        shutdown_rx: &mut oneshot::Receiver<()>,
    ) -> Option<ConnectionExit> {
        let delivery = self.inbound_tx.send(Inbound::Frame(frame));
        tokio::pin!(delivery);
        loop {
            tokio::select! {
                delivered = &mut delivery => {
                    return delivered.err().map(|_| ConnectionExit::Shutdown);
                }
                out = outgoing_rx.recv() => match out {
                    Some(text) => {
                        if let Err(exit) = self.write(writer, text).await {
                            return Some(exit);
                        }
                    }
                    None => return Some(ConnectionExit::Shutdown),
                },
                _ = &mut *shutdown_rx => return Some(ConnectionExit::Shutdown),
            }
        }
    }
}

/// One design-editing session: a connection, its presence list and the
/// ordering watermark. Construct with [`CollabSession::open`], destroy with
/// [`CollabSession::cleanup`].
pub struct CollabSession {
    design_id: String,
    identity: Arc<RwLock<OnlineUser>>,
    state: Arc<RwLock<ConnectionState>>,
    clock: Arc<AtomicU64>,
    sync: Synchronizer,
    outgoing_tx: mpsc::Sender<String>,
    inbound_rx: mpsc::Receiver<Inbound>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    driver: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for CollabSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollabSession")
            .field("design_id", &self.design_id)
            .field("user_id", &self.sync.local_user_id())
            .field("watermark", &self.sync.watermark())
            .field("closed", &self.shutdown_tx.is_none())
            .finish()
    }
}

impl CollabSession {
    /// Start connecting to the design's channel. Returns immediately; the
    /// connection is established in the background.
    pub fn open(
        config: SessionConfig,
        design_id: impl Into<String>,
        user: OnlineUser,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        let design_id = design_id.into();

        let (outgoing_tx, outgoing_rx) = mpsc::channel(config.channel_capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel(config.channel_capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let sync = Synchronizer::new(user.id.clone(), config.op_log_capacity);
        let identity = Arc::new(RwLock::new(user));
        let state = Arc::new(RwLock::new(ConnectionState::Disconnected));
        let clock = Arc::new(AtomicU64::new(0));

        let driver = Driver {
            endpoint: config.endpoint(&design_id),
            config,
            identity: identity.clone(),
            state: state.clone(),
            clock: clock.clone(),
            inbound_tx,
        };
        log::info!("Opening session for design {design_id} at {}", driver.endpoint);
        let handle = tokio::spawn(driver.run(outgoing_rx, shutdown_rx));

        Ok(Self {
            design_id,
            identity,
            state,
            clock,
            sync,
            outgoing_tx,
            inbound_rx,
            shutdown_tx: Some(shutdown_tx),
            driver: Some(handle),
        })
    }

    /// Wait for the next session event, applying remote operations to
    /// `store` as they arrive. Our own relayed operations are skipped.
    ///
    /// Returns `None` once the driver has stopped and every pending event
    /// has been delivered.
    pub async fn next_event(&mut self, store: &mut DesignStore) -> Option<SessionEvent> {
        loop {
            let raw = match self.inbound_rx.recv().await? {
                Inbound::Event(event) => return Some(event),
                Inbound::Frame(raw) => raw,
            };
            let event = match self.sync.handle_message(&raw, store) {
                Ok(ApplyOutcome::Echo) => continue,
                Ok(ApplyOutcome::Applied(op)) => SessionEvent::Applied(op),
                Ok(ApplyOutcome::Presence { user_id, change }) => {
                    SessionEvent::PresenceChanged { user_id, change }
                }
                Ok(ApplyOutcome::Stale {
                    timestamp,
                    watermark,
                }) => SessionEvent::Stale {
                    timestamp,
                    watermark,
                },
                Err(error) if error.is_malformed() => SessionEvent::MessageDropped { error },
                Err(error) => SessionEvent::OperationFailed { error },
            };
            return Some(event);
        }
    }

    /// Build an operation from the local user, stamped with the next
    /// session timestamp.
    pub fn operation(&self, op_type: OperationType, payload: OperationPayload) -> Operation {
        Operation::new(
            op_type,
            self.sync.local_user_id(),
            next_timestamp(&self.clock),
            payload,
        )
    }

    /// Broadcast one operation as a single frame.
    pub async fn send_operation(&self, op: &Operation) -> Result<(), SessionError> {
        if self.shutdown_tx.is_none() {
            return Err(SessionError::Closed);
        }
        if *self.state.read().await != ConnectionState::Connected {
            return Err(SessionError::NotConnected);
        }
        let text = op.encode()?;
        self.outgoing_tx
            .send(text)
            .await
            .map_err(|_| SessionError::Closed)
    }

    /// Apply a locally originated operation to `store`, then broadcast it.
    ///
    /// The store is updated through the same path remote operations take,
    /// and the watermark moves past the operation so older remote writes
    /// are discarded. If the broadcast fails the local edit stays applied.
    pub async fn apply_local(
        &mut self,
        store: &mut DesignStore,
        op: &Operation,
    ) -> Result<(), SessionError> {
        self.sync.apply_local(op, store)?;
        self.send_operation(op).await
    }

    /// Record our cursor position and broadcast it when connected.
    ///
    /// Offline moves are only recorded; the position goes out with the
    /// identity announcement on the next connect.
    pub async fn update_cursor(&self, x: f64, y: f64) -> Result<(), SessionError> {
        let op = {
            let mut user = self.identity.write().await;
            user.cursor = CursorPosition::new(x, y);
            Operation::cursor_move(&user, next_timestamp(&self.clock))
        };
        match self.send_operation(&op).await {
            Err(SessionError::NotConnected) => Ok(()),
            other => other,
        }
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub async fn identity(&self) -> OnlineUser {
        self.identity.read().await.clone()
    }

    pub fn design_id(&self) -> &str {
        &self.design_id
    }

    pub fn presence(&self) -> &PresenceList {
        self.sync.presence()
    }

    pub fn synchronizer(&self) -> &Synchronizer {
        &self.sync
    }

    /// Close the socket, stop retrying and forget presence, the operation
    /// log and the watermark. Safe to call more than once.
    pub async fn cleanup(&mut self) {
        if let Some(shutdown) = self.shutdown_tx.take() {
            let _ = shutdown.send(());
        }
        // Fail any delivery the driver is blocked on so it sees the shutdown.
        self.inbound_rx.close();
        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.await {
                log::warn!("Session driver for {} ended abnormally: {e}", self.design_id);
            }
        }
        *self.state.write().await = ConnectionState::Disconnected;
        while self.inbound_rx.try_recv().is_ok() {}
        self.sync.reset();
        log::info!("Session for design {} cleaned up", self.design_id);
    }
}

impl Drop for CollabSession {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_config() -> SessionConfig {
        let mut config = SessionConfig::with_server("ws://127.0.0.1:9");
        config.reconnect.max_attempts = 0;
        config
    }

    #[test]
    fn test_timestamps_strictly_increase() {
        let clock = AtomicU64::new(0);
        let mut last = 0;
        for _ in 0..1000 {
            let ts = next_timestamp(&clock);
            assert!(ts > last);
            last = ts;
        }
    }

    #[test]
    fn test_timestamp_never_goes_back() {
        let clock = AtomicU64::new(u64::MAX / 2);
        assert_eq!(next_timestamp(&clock), u64::MAX / 2 + 1);
    }

    #[test]
    fn test_event_error_classification() {
        assert!(SessionEvent::ConnectionFailed { attempts: 5 }.is_error());
        assert!(!SessionEvent::Stale {
            timestamp: 1,
            watermark: 2
        }
        .is_error());
        assert!(!SessionEvent::Connected.is_error());
    }

    #[tokio::test]
    async fn test_open_rejects_bad_config() {
        let config = SessionConfig::with_server("http://nope");
        let err = CollabSession::open(config, "d1", OnlineUser::new("u", "U", "")).unwrap_err();
        assert!(matches!(err, SessionError::Config(_)));
    }

    #[tokio::test]
    async fn test_send_while_disconnected() {
        let session =
            CollabSession::open(unreachable_config(), "d1", OnlineUser::new("u", "U", "")).unwrap();
        let op = session.operation(OperationType::ClearSelection, OperationPayload::default());
        assert!(matches!(
            session.send_operation(&op).await,
            Err(SessionError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_update_cursor_offline_records_position() {
        let session =
            CollabSession::open(unreachable_config(), "d1", OnlineUser::new("u", "U", "")).unwrap();
        session.update_cursor(12.0, 34.0).await.unwrap();
        assert_eq!(session.identity().await.cursor, CursorPosition::new(12.0, 34.0));
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let mut session =
            CollabSession::open(unreachable_config(), "d1", OnlineUser::new("u", "U", "")).unwrap();
        session.cleanup().await;
        session.cleanup().await;
        assert_eq!(session.connection_state().await, ConnectionState::Disconnected);
        let op = session.operation(OperationType::ClearSelection, OperationPayload::default());
        assert!(matches!(session.send_operation(&op).await, Err(SessionError::Closed)));
        let mut store = DesignStore::new();
        assert!(session.next_event(&mut store).await.is_none());
    }

    #[tokio::test]
    async fn test_local_apply_offline_keeps_edit() {
        let mut session =
            CollabSession::open(unreachable_config(), "d1", OnlineUser::new("u", "U", "")).unwrap();
        let mut store = DesignStore::new();
        let op = session.operation(
            OperationType::AddComponent,
            OperationPayload::component(forma_core::Component::new("btn", "button")),
        );
        assert!(matches!(
            session.apply_local(&mut store, &op).await,
            Err(SessionError::NotConnected)
        ));
        assert!(store.contains("btn"));
    }
}
