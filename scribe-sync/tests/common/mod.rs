//! In-process document authority for integration tests.
//!
//! Accepts WebSocket connections on a free local port, records what the
//! client sends and lets the test script what the authority sends back.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use scribe_sync::protocol::{ClientMessage, ServerMessage};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Duration};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

pub const WAIT: Duration = Duration::from_secs(2);

/// What the authority observed.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthorityEvent {
    /// Handshake completed; carries the request URI (path and query)
    Connected { uri: String },
    Received(ClientMessage),
    /// `None` when the socket dropped without a close frame
    Closed { code: Option<u16> },
}

enum Control {
    Send(ServerMessage),
    Raw(String),
    Close(u16),
    Drop,
}

pub struct MockAuthority {
    port: u16,
    events: mpsc::UnboundedReceiver<AuthorityEvent>,
    latest: Arc<Mutex<Option<mpsc::UnboundedSender<Control>>>>,
    accepted: Arc<AtomicUsize>,
}

impl MockAuthority {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (event_tx, events) = mpsc::unbounded_channel();
        let latest = Arc::new(Mutex::new(None));
        let accepted = Arc::new(AtomicUsize::new(0));

        {
            let latest = Arc::clone(&latest);
            let accepted = Arc::clone(&accepted);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let (control_tx, control_rx) = mpsc::unbounded_channel();
                    *latest.lock() = Some(control_tx);
                    accepted.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve(stream, event_tx.clone(), control_rx));
                }
            });
        }

        Self {
            port,
            events,
            latest,
            accepted,
        }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://127.0.0.1:{}", self.port)
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Send to the most recently accepted connection.
    pub fn send(&self, message: ServerMessage) {
        self.control(Control::Send(message));
    }

    pub fn send_raw(&self, text: impl Into<String>) {
        self.control(Control::Raw(text.into()));
    }

    /// Close the latest connection with a close frame carrying `code`.
    pub fn close(&self, code: u16) {
        self.control(Control::Close(code));
    }

    /// Drop the latest connection without a close frame.
    pub fn drop_connection(&self) {
        self.control(Control::Drop);
    }

    fn control(&self, control: Control) {
        let latest = self.latest.lock();
        let tx = latest.as_ref().expect("no connection accepted yet");
        tx.send(control).expect("connection task gone");
    }

    pub async fn next_event(&mut self) -> AuthorityEvent {
        timeout(WAIT, self.events.recv())
            .await
            .expect("timed out waiting for authority event")
            .expect("authority stopped")
    }

    pub async fn expect_connected(&mut self) -> String {
        match self.next_event().await {
            AuthorityEvent::Connected { uri } => uri,
            other => panic!("Expected Connected, got {other:?}"),
        }
    }

    pub async fn expect_received(&mut self) -> ClientMessage {
        match self.next_event().await {
            AuthorityEvent::Received(message) => message,
            other => panic!("Expected Received, got {other:?}"),
        }
    }

    pub async fn expect_closed(&mut self) -> Option<u16> {
        match self.next_event().await {
            AuthorityEvent::Closed { code } => code,
            other => panic!("Expected Closed, got {other:?}"),
        }
    }

    /// Assert nothing arrives for `window`.
    pub async fn expect_quiet(&mut self, window: Duration) {
        if let Ok(Some(event)) = timeout(window, self.events.recv()).await {
            panic!("Expected no authority event, got {event:?}");
        }
    }
}

async fn serve(
    stream: TcpStream,
    events: mpsc::UnboundedSender<AuthorityEvent>,
    mut control: mpsc::UnboundedReceiver<Control>,
) {
    let mut uri = String::new();
    let capture = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        uri = req.uri().to_string();
        Ok(resp)
    };
    let ws = match tokio_tungstenite::accept_hdr_async(stream, capture).await {
        Ok(ws) => ws,
        Err(_) => return,
    };
    let _ = events.send(AuthorityEvent::Connected { uri });

    let (mut sink, mut source) = ws.split();
    loop {
        tokio::select! {
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(message) = ClientMessage::decode(text.as_str()) {
                        let _ = events.send(AuthorityEvent::Received(message));
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let code = frame.map(|f| u16::from(f.code));
                    let _ = events.send(AuthorityEvent::Closed { code });
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(_)) | None => {
                    let _ = events.send(AuthorityEvent::Closed { code: None });
                    return;
                }
            },
            command = control.recv() => match command {
                Some(Control::Send(message)) => {
                    let text = message.encode().unwrap();
                    let _ = sink.send(Message::Text(text.into())).await;
                }
                Some(Control::Raw(text)) => {
                    let _ = sink.send(Message::Text(text.into())).await;
                }
                Some(Control::Close(code)) => {
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code: CloseCode::from(code),
                            reason: "".into(),
                        })))
                        .await;
                    return;
                }
                Some(Control::Drop) | None => return,
            },
        }
    }
}

/// Poll `condition` until it holds or [`WAIT`] elapses.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}
