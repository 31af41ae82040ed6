//! Connection lifecycle for one persistent WebSocket per session.
//!
//! ```text
//!            connect()                 timer fires             handshake ok
//!   Idle ───────────────► Connecting ─────────────► Opening ─────────────► Open
//!                             ▲                        │                    │
//!                             │   abnormal close,      │ handshake error    │ close frame
//!                             │   attempt <= cap       ▼                    ▼
//!                             └──────────────────── (backoff) ◄──── code != 1000
//!                                                      │                    │
//!                                       attempt > cap  ▼        code == 1000▼
//!                                                   Failed               Closed
//! ```
//!
//! Each `connect` spawns one driver task tagged with a generation number.
//! `connect` and `disconnect` bump the generation; a driver whose
//! generation is stale never touches state again, so a timer that fires
//! after teardown cannot reconnect.
//!
//! Inbound frames are decoded once here and fanned out to the handler set
//! in subscription order. Outbound frames are best-effort: `send` while the
//! socket is not open logs and drops the message.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::config::ConnectionConfig;
use crate::error::ConfigError;
use crate::protocol::{ClientMessage, DocumentId, ServerMessage};

/// Close code that suppresses reconnection.
pub const NORMAL_CLOSURE: u16 = 1000;
/// Reported when the server closes without a status code.
const NO_STATUS_CODE: u16 = 1005;
/// Reported when the socket dies without a close frame.
const ABNORMAL_CLOSURE: u16 = 1006;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Callback invoked for every inbound message.
pub type MessageHandler = Arc<dyn Fn(&ServerMessage) + Send + Sync>;

/// Lifecycle status of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Idle,
    /// Waiting on the connect debounce or a backoff timer
    Connecting,
    /// Handshake in progress
    Opening,
    Open,
    Closed,
    /// Reconnect attempts exhausted; terminal until `connect` is called again
    Failed,
}

impl ConnectionStatus {
    /// A connection attempt is in flight or established.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Opening | Self::Open)
    }
}

/// Which kind of session a connection serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    /// Authenticated, full document list, full edit rights
    Owner,
    /// Token-scoped access to one shared document
    Guest,
}

/// The logical endpoint of a connection.
///
/// Kept for the lifetime of the connection so that reconnection rebuilds
/// exactly the same endpoint.
#[derive(Clone, PartialEq, Eq)]
pub enum ConnectTarget {
    Owner {
        document_id: DocumentId,
        credential: String,
    },
    Guest {
        shared_id: String,
    },
}

impl ConnectTarget {
    pub fn resource_id(&self) -> &str {
        match self {
            Self::Owner { document_id, .. } => document_id.as_str(),
            Self::Guest { shared_id } => shared_id,
        }
    }

    pub fn role(&self) -> SessionRole {
        match self {
            Self::Owner { .. } => SessionRole::Owner,
            Self::Guest { .. } => SessionRole::Guest,
        }
    }

    /// `/ws/document/<id>/?token=<credential>` or `/ws/document/shared/<id>/`.
    pub fn url(&self, base: &Url) -> Result<Url, ConfigError> {
        let path = match self {
            Self::Owner { document_id, .. } => format!("/ws/document/{document_id}/"),
            Self::Guest { shared_id } => format!("/ws/document/shared/{shared_id}/"),
        };
        let mut url = base
            .join(&path)
            .map_err(|e| ConfigError::InvalidUrl(format!("{path}: {e}")))?;
        if let Self::Owner { credential, .. } = self {
            url.query_pairs_mut().append_pair("token", credential);
        }
        Ok(url)
    }
}

// Credentials stay out of logs.
impl fmt::Debug for ConnectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Owner { document_id, .. } => f
                .debug_struct("Owner")
                .field("document_id", document_id)
                .field("credential", &"<redacted>")
                .finish(),
            Self::Guest { shared_id } => {
                f.debug_struct("Guest").field("shared_id", shared_id).finish()
            }
        }
    }
}

/// Snapshot of the connection state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    pub resource_id: Option<String>,
    pub role: Option<SessionRole>,
    pub reconnect_attempt: u32,
}

impl ConnectionState {
    fn idle() -> Self {
        Self {
            status: ConnectionStatus::Idle,
            resource_id: None,
            role: None,
            reconnect_attempt: 0,
        }
    }
}

/// Lifecycle notifications published by the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Opened { resource_id: String },
    Closed { code: u16 },
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// Reconnect cap exceeded; no further automatic retries
    Failed { attempts: u32 },
}

/// Handle returned by [`ConnectionManager::add_message_handler`].
pub struct Subscription {
    id: u64,
    handlers: Weak<Mutex<HandlerSet>>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remove the handler. Returns `false` if it was already gone.
    pub fn unsubscribe(&self) -> bool {
        self.handlers
            .upgrade()
            .is_some_and(|handlers| handlers.lock().remove(self.id))
    }
}

#[derive(Default)]
struct HandlerSet {
    next_id: u64,
    entries: HashMap<u64, MessageHandler>,
}

impl HandlerSet {
    fn insert(&mut self, handler: MessageHandler) -> u64 {
        if let Some((&id, _)) = self
            .entries
            .iter()
            .find(|(_, existing)| same_handler(existing, &handler))
        {
            return id;
        }
        // Ids are never reused, even across clear(), so a stale
        // Subscription cannot remove a newer handler.
        self.next_id += 1;
        self.entries.insert(self.next_id, handler);
        self.next_id
    }

    fn remove(&mut self, id: u64) -> bool {
        self.entries.remove(&id).is_some()
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    /// Handlers in subscription order.
    fn snapshot(&self) -> Vec<MessageHandler> {
        let mut ordered: Vec<(u64, MessageHandler)> = self
            .entries
            .iter()
            .map(|(id, handler)| (*id, Arc::clone(handler)))
            .collect();
        ordered.sort_unstable_by_key(|(id, _)| *id);
        ordered.into_iter().map(|(_, handler)| handler).collect()
    }
}

fn same_handler(a: &MessageHandler, b: &MessageHandler) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

enum Outbound {
    Text(String),
    Close,
}

struct Lifecycle {
    state: ConnectionState,
    target: Option<ConnectTarget>,
    generation: u64,
    /// Present only while the socket is open
    outgoing: Option<mpsc::UnboundedSender<Outbound>>,
    driver: Option<JoinHandle<()>>,
}

impl Lifecycle {
    /// Invalidate the current driver. An open socket is closed with 1000;
    /// a pending timer or handshake is cancelled.
    ///
    /// Returns the driver still sending its close frame, if any.
    fn retire(&mut self) -> Option<JoinHandle<()>> {
        self.generation += 1;
        let driver = self.driver.take();
        match self.outgoing.take() {
            Some(tx) => {
                let _ = tx.send(Outbound::Close);
                driver
            }
            None => {
                if let Some(driver) = driver {
                    driver.abort();
                }
                None
            }
        }
    }
}

struct Shared {
    config: ConnectionConfig,
    base_url: Url,
    lifecycle: Mutex<Lifecycle>,
    handlers: Arc<Mutex<HandlerSet>>,
    events: broadcast::Sender<ConnectionEvent>,
}

/// Owns the lifecycle of one persistent connection.
///
/// Cheap to clone; all clones share the same connection. Methods that
/// start a connection must be called from within a Tokio runtime.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    /// Create an idle manager. Fails if the base URL does not parse.
    pub fn new(config: ConnectionConfig) -> Result<Self, ConfigError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| ConfigError::InvalidUrl(format!("{}: {e}", config.base_url)))?;
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                base_url,
                lifecycle: Mutex::new(Lifecycle {
                    state: ConnectionState::idle(),
                    target: None,
                    generation: 0,
                    outgoing: None,
                    driver: None,
                }),
                handlers: Arc::new(Mutex::new(HandlerSet::default())),
                events,
            }),
        })
    }

    /// Schedule a connection to `target` after the configured debounce.
    ///
    /// A no-op while an attempt for the same target is already in flight.
    /// A connection to a different target is closed first.
    pub fn connect(&self, target: ConnectTarget) -> Result<(), ConfigError> {
        let url = target.url(&self.shared.base_url)?;
        let mut life = self.shared.lifecycle.lock();

        if life.target.as_ref() == Some(&target) && life.state.status.is_active() {
            log::debug!("Connection to {} already in progress", target.resource_id());
            return Ok(());
        }
        if let Some(previous) = life.target.as_ref().filter(|_| life.state.status.is_active()) {
            log::info!("Closing connection to {} before switching", previous.resource_id());
        }

        let closing = life.retire();
        let generation = life.generation;
        life.state = ConnectionState {
            status: ConnectionStatus::Connecting,
            resource_id: Some(target.resource_id().to_string()),
            role: Some(target.role()),
            reconnect_attempt: 0,
        };
        life.target = Some(target);

        let delay = self.shared.config.connect_delay;
        log::info!("Connecting to {} in {delay:?}", url.path());
        let shared = Arc::clone(&self.shared);
        life.driver = Some(tokio::spawn(shared.drive(url, generation, delay, closing)));
        Ok(())
    }

    /// Transmit a message if the connection is open.
    ///
    /// Never queues and never fails loudly: returns `false` and logs when
    /// the message could not be handed to the socket.
    pub fn send(&self, message: &ClientMessage) -> bool {
        let text = match message.encode() {
            Ok(text) => text,
            Err(e) => {
                log::error!("Failed to encode {} message: {e}", message.kind());
                return false;
            }
        };

        let life = self.shared.lifecycle.lock();
        match (&life.outgoing, life.state.status) {
            (Some(tx), ConnectionStatus::Open) => tx.send(Outbound::Text(text)).is_ok(),
            _ => {
                log::warn!("Cannot send {} message - connection not open", message.kind());
                false
            }
        }
    }

    /// Subscribe to inbound messages.
    ///
    /// Adding the same handler twice returns a subscription to the
    /// existing entry.
    pub fn add_message_handler(&self, handler: MessageHandler) -> Subscription {
        let id = self.shared.handlers.lock().insert(handler);
        Subscription {
            id,
            handlers: Arc::downgrade(&self.shared.handlers),
        }
    }

    /// Tear down: cancel timers, close with 1000, drop all handlers.
    ///
    /// Safe to call repeatedly.
    pub fn disconnect(&self) {
        let mut life = self.shared.lifecycle.lock();
        let was_tracking = life.target.is_some();
        life.retire();
        life.target = None;
        let status = if life.state.status == ConnectionStatus::Idle {
            ConnectionStatus::Idle
        } else {
            ConnectionStatus::Closed
        };
        life.state = ConnectionState {
            status,
            ..ConnectionState::idle()
        };
        drop(life);

        self.shared.handlers.lock().clear();

        if was_tracking {
            log::info!("Disconnected");
            let _ = self.shared.events.send(ConnectionEvent::Closed {
                code: NORMAL_CLOSURE,
            });
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lifecycle.lock().state.clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.lifecycle.lock().state.status
    }

    pub fn is_open(&self) -> bool {
        self.status() == ConnectionStatus::Open
    }

    /// The endpoint currently tracked, if any.
    pub fn target(&self) -> Option<ConnectTarget> {
        self.shared.lifecycle.lock().target.clone()
    }

    /// Subscribe to lifecycle events.
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.events.subscribe()
    }

    pub fn handler_count(&self) -> usize {
        self.shared.handlers.lock().len()
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }
}

impl Shared {
    /// Driver task: timer → handshake → read/write loop → backoff, until a
    /// normal close, the attempt cap, or a generation change.
    ///
    /// `closing` is the previous driver; its socket is closed before this
    /// one opens.
    async fn drive(
        self: Arc<Self>,
        url: Url,
        generation: u64,
        first_delay: Duration,
        closing: Option<JoinHandle<()>>,
    ) {
        if let Some(previous) = closing {
            let _ = previous.await;
        }
        let mut delay = first_delay;
        loop {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if !self.transition(generation, ConnectionStatus::Opening) {
                return;
            }

            let code = match tokio_tungstenite::connect_async(url.as_str()).await {
                Ok((socket, _)) => self.run_open(socket, generation).await,
                Err(e) => {
                    log::warn!("Failed to open connection to {}: {e}", url.path());
                    ABNORMAL_CLOSURE
                }
            };

            match self.after_close(generation, code) {
                Some(next) => delay = next,
                None => return,
            }
        }
    }

    fn transition(&self, generation: u64, status: ConnectionStatus) -> bool {
        let mut life = self.lifecycle.lock();
        if life.generation != generation {
            return false;
        }
        life.state.status = status;
        true
    }

    /// Pump frames until the socket closes. Returns the close code.
    async fn run_open(&self, socket: Socket, generation: u64) -> u16 {
        let (mut writer, mut reader) = socket.split();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let claimed = {
            let mut life = self.lifecycle.lock();
            if life.generation == generation {
                life.state.status = ConnectionStatus::Open;
                life.state.reconnect_attempt = 0;
                life.outgoing = Some(tx);
                Some(life.state.resource_id.clone().unwrap_or_default())
            } else {
                None
            }
        };
        let Some(resource_id) = claimed else {
            // Superseded while the handshake was in flight.
            let _ = writer.send(normal_close()).await;
            return NORMAL_CLOSURE;
        };
        log::info!("Connection open for {resource_id}");
        let _ = self.events.send(ConnectionEvent::Opened { resource_id });

        loop {
            tokio::select! {
                // A pending close from `retire` wins over buffered frames.
                biased;

                outbound = rx.recv() => match outbound {
                    Some(Outbound::Text(text)) => {
                        if let Err(e) = writer.send(Message::Text(text.into())).await {
                            log::warn!("Failed to send frame: {e}");
                            return ABNORMAL_CLOSURE;
                        }
                    }
                    Some(Outbound::Close) | None => {
                        let _ = writer.send(normal_close()).await;
                        return NORMAL_CLOSURE;
                    }
                },

                frame = reader.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        if !self.dispatch(generation, text.as_str()) {
                            log::debug!("Connection superseded; dropping remaining frames");
                            let _ = writer.send(normal_close()).await;
                            return NORMAL_CLOSURE;
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        log::debug!("Ignoring binary frame");
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if writer.send(Message::Pong(data)).await.is_err() {
                            return ABNORMAL_CLOSURE;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return frame.map_or(NO_STATUS_CODE, |f| u16::from(f.code));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::warn!("WebSocket error: {e}");
                        return ABNORMAL_CLOSURE;
                    }
                    None => return ABNORMAL_CLOSURE,
                },
            }
        }
    }

    /// Decode one frame and deliver it to every handler, in order.
    ///
    /// Returns `false` without delivering if `generation` has been retired.
    fn dispatch(&self, generation: u64, text: &str) -> bool {
        let message = match ServerMessage::decode(text) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("Dropping inbound frame: {e}");
                return true;
            }
        };
        log::trace!("Inbound {} message", message.kind());

        // Lock order: lifecycle, then handlers.
        let handlers = {
            let life = self.lifecycle.lock();
            if life.generation != generation {
                return false;
            }
            self.handlers.lock().snapshot()
        };
        for handler in handlers {
            let delivered = panic::catch_unwind(AssertUnwindSafe(|| handler(&message)));
            if delivered.is_err() {
                log::error!("Handler panicked on {} message", message.kind());
            }
        }
        true
    }

    /// Decide what follows a closed socket. Returns the backoff delay
    /// if another attempt should be made.
    fn after_close(&self, generation: u64, code: u16) -> Option<Duration> {
        let mut life = self.lifecycle.lock();
        if life.generation != generation {
            return None;
        }
        life.outgoing = None;
        let _ = self.events.send(ConnectionEvent::Closed { code });

        if code == NORMAL_CLOSURE {
            log::info!("Connection closed normally");
            life.state.status = ConnectionStatus::Closed;
            return None;
        }

        let attempt = life.state.reconnect_attempt + 1;
        match self.config.backoff.delay_for(attempt) {
            Some(delay) => {
                log::info!(
                    "Connection closed with code {code}; reconnecting in {delay:?} (attempt {attempt}/{})",
                    self.config.backoff.max_attempts
                );
                life.state.status = ConnectionStatus::Connecting;
                life.state.reconnect_attempt = attempt;
                let _ = self
                    .events
                    .send(ConnectionEvent::ReconnectScheduled { attempt, delay });
                Some(delay)
            }
            None => {
                let attempts = attempt - 1;
                log::error!("Maximum reconnection attempts ({attempts}) reached");
                life.state.status = ConnectionStatus::Failed;
                let _ = self.events.send(ConnectionEvent::Failed { attempts });
                None
            }
        }
    }
}

fn normal_close() -> Message {
    Message::Close(Some(CloseFrame {
        code: CloseCode::Normal,
        reason: "".into(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const UPDATE_FRAME: &str =
        r#"{"type":"UPDATE","document":{"id":"1","content":"x","version":1}}"#;

    fn manager() -> ConnectionManager {
        ConnectionManager::new(ConnectionConfig::for_testing("ws://127.0.0.1:9")).unwrap()
    }

    fn counting_handler(counter: &Arc<AtomicUsize>) -> MessageHandler {
        let counter = Arc::clone(counter);
        Arc::new(move |_: &ServerMessage| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_owner_url_carries_token() {
        let base = Url::parse("ws://127.0.0.1:8000").unwrap();
        let target = ConnectTarget::Owner {
            document_id: "42".into(),
            credential: "abc.def".into(),
        };
        let url = target.url(&base).unwrap();
        assert_eq!(url.as_str(), "ws://127.0.0.1:8000/ws/document/42/?token=abc.def");
        assert_eq!(target.role(), SessionRole::Owner);
        assert_eq!(target.resource_id(), "42");
    }

    #[test]
    fn test_owner_url_encodes_credential() {
        let base = Url::parse("wss://docs.example.com").unwrap();
        let target = ConnectTarget::Owner {
            document_id: "7".into(),
            credential: "a b&c".into(),
        };
        let url = target.url(&base).unwrap();
        assert_eq!(url.query(), Some("token=a+b%26c"));
    }

    #[test]
    fn test_guest_url_has_no_credential() {
        let base = Url::parse("ws://127.0.0.1:8000").unwrap();
        let target = ConnectTarget::Guest {
            shared_id: "tok123".into(),
        };
        let url = target.url(&base).unwrap();
        assert_eq!(url.as_str(), "ws://127.0.0.1:8000/ws/document/shared/tok123/");
        assert_eq!(target.role(), SessionRole::Guest);
    }

    #[test]
    fn test_target_debug_redacts_credential() {
        let target = ConnectTarget::Owner {
            document_id: "1".into(),
            credential: "secret".into(),
        };
        let rendered = format!("{target:?}");
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("redacted"));
    }

    #[test]
    fn test_invalid_base_url() {
        let config = ConnectionConfig::for_testing("not a url");
        assert!(matches!(
            ConnectionManager::new(config),
            Err(ConfigError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_initial_state() {
        let manager = manager();
        let state = manager.state();
        assert_eq!(state.status, ConnectionStatus::Idle);
        assert!(state.resource_id.is_none());
        assert!(state.role.is_none());
        assert_eq!(state.reconnect_attempt, 0);
        assert!(manager.target().is_none());
    }

    #[test]
    fn test_handler_add_is_idempotent() {
        let manager = manager();
        let counter = Arc::new(AtomicUsize::new(0));
        let handler = counting_handler(&counter);

        let first = manager.add_message_handler(Arc::clone(&handler));
        let second = manager.add_message_handler(handler);
        assert_eq!(first.id(), second.id());
        assert_eq!(manager.handler_count(), 1);
    }

    #[test]
    fn test_independent_handlers_and_unsubscribe() {
        let manager = manager();
        let counter = Arc::new(AtomicUsize::new(0));
        let a = manager.add_message_handler(counting_handler(&counter));
        let b = manager.add_message_handler(counting_handler(&counter));
        assert_ne!(a.id(), b.id());
        assert_eq!(manager.handler_count(), 2);

        assert!(a.unsubscribe());
        assert!(!a.unsubscribe());
        assert_eq!(manager.handler_count(), 1);
    }

    #[test]
    fn test_handler_ids_not_reused_after_disconnect() {
        let manager = manager();
        let counter = Arc::new(AtomicUsize::new(0));
        let old = manager.add_message_handler(counting_handler(&counter));
        manager.disconnect();
        let new = manager.add_message_handler(counting_handler(&counter));

        assert!(new.id() > old.id());
        assert!(!old.unsubscribe());
        assert_eq!(manager.handler_count(), 1);
    }

    #[test]
    fn test_dispatch_order_and_malformed_frames() {
        let manager = manager();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            manager.add_message_handler(Arc::new(move |_: &ServerMessage| seen.lock().push(tag)));
        }

        assert!(manager.shared.dispatch(0, "{garbage"));
        assert!(seen.lock().is_empty());

        assert!(manager.shared.dispatch(0, UPDATE_FRAME));
        assert_eq!(*seen.lock(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_retired_generation_is_not_dispatched() {
        let manager = manager();
        manager
            .connect(ConnectTarget::Guest {
                shared_id: "abc".into(),
            })
            .unwrap();
        let generation = manager.shared.lifecycle.lock().generation;

        manager.disconnect();
        let counter = Arc::new(AtomicUsize::new(0));
        manager.add_message_handler(counting_handler(&counter));

        assert!(!manager.shared.dispatch(generation, UPDATE_FRAME));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_panicking_handler_does_not_block_others() {
        let manager = manager();
        let counter = Arc::new(AtomicUsize::new(0));
        manager.add_message_handler(Arc::new(|_: &ServerMessage| panic!("boom")));
        manager.add_message_handler(counting_handler(&counter));

        assert!(manager.shared.dispatch(0, UPDATE_FRAME));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_send_while_idle_is_noop() {
        let manager = manager();
        let sent = manager.send(&ClientMessage::Update {
            document_id: "1".into(),
            content: "x".into(),
            version: 1,
        });
        assert!(!sent);
    }

    #[test]
    fn test_disconnect_idle_is_idempotent() {
        let manager = manager();
        manager.disconnect();
        let once = manager.state();
        manager.disconnect();
        assert_eq!(manager.state(), once);
        assert_eq!(once.status, ConnectionStatus::Idle);
    }

    #[tokio::test]
    async fn test_connect_sets_connecting_state() {
        let manager = manager();
        manager
            .connect(ConnectTarget::Guest {
                shared_id: "abc".into(),
            })
            .unwrap();

        let state = manager.state();
        assert_eq!(state.status, ConnectionStatus::Connecting);
        assert_eq!(state.resource_id.as_deref(), Some("abc"));
        assert_eq!(state.role, Some(SessionRole::Guest));

        manager.disconnect();
        let once = manager.state();
        manager.disconnect();
        assert_eq!(manager.state(), once);
        assert_eq!(once.status, ConnectionStatus::Closed);
        assert!(once.resource_id.is_none());
        assert!(manager.target().is_none());
    }

    #[test]
    fn test_status_is_active() {
        assert!(ConnectionStatus::Connecting.is_active());
        assert!(ConnectionStatus::Opening.is_active());
        assert!(ConnectionStatus::Open.is_active());
        assert!(!ConnectionStatus::Idle.is_active());
        assert!(!ConnectionStatus::Closed.is_active());
        assert!(!ConnectionStatus::Failed.is_active());
    }
}
