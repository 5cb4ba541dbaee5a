//! WebSocket Mock Server for the avatar interaction service
//!
//! Accepts connections on an ephemeral port, answers the first `start`
//! request with a scripted sequence of frames and reports everything it
//! observes on an event channel.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// One scripted server action.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Send a raw text frame.
    Text(String),
    /// Send a close frame.
    Close { code: u16, reason: String },
    /// Drop the TCP connection without a closing handshake.
    Drop,
}

impl Reply {
    /// Success response announcing a stream url.
    pub fn stream_ready(stream_url: &str) -> Self {
        Self::Text(
            json!({
                "header": { "code": 0, "message": "success", "sid": "mock-sid" },
                "payload": {
                    "avatar": {
                        "event_type": "stream_info",
                        "error_code": 0,
                        "stream_url": stream_url
                    }
                }
            })
            .to_string(),
        )
    }

    /// Error response with a non-zero code.
    pub fn error(code: i64, message: &str) -> Self {
        Self::Text(
            json!({ "header": { "code": code, "message": message, "sid": "mock-sid" } })
                .to_string(),
        )
    }

    pub fn raw(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

/// What the mock observed from the client.
#[derive(Debug, Clone, PartialEq)]
pub enum MockEvent {
    /// Upgrade request target (path and query).
    Handshake(String),
    /// A text frame, parsed as JSON.
    Text(Value),
    /// A close frame from the client.
    Close(Option<(u16, String)>),
    /// The connection ended.
    Disconnected,
}

/// Running mock server.
pub struct AvatarMock {
    pub addr: SocketAddr,
    events: mpsc::UnboundedReceiver<MockEvent>,
    server: tokio::task::JoinHandle<()>,
}

impl Drop for AvatarMock {
    fn drop(&mut self) {
        self.server.abort();
    }
}

impl AvatarMock {
    /// Start a server that answers each `start` request with `replies`.
    pub async fn start(replies: Vec<Reply>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, events) = mpsc::unbounded_channel();
        let replies = Arc::new(replies);

        let server = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let tx = tx.clone();
                let replies = replies.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, replies, tx.clone()).await {
                        eprintln!("Mock avatar connection error: {e}");
                    }
                    let _ = tx.send(MockEvent::Disconnected);
                });
            }
        });

        Self {
            addr,
            events,
            server,
        }
    }

    /// Unsigned interaction url for this server.
    pub fn url(&self) -> String {
        format!("ws://{}/v1/interact", self.addr)
    }

    /// Next observed event, or `None` if nothing arrives in time.
    pub async fn next_event(&mut self) -> Option<MockEvent> {
        self.next_event_within(EVENT_TIMEOUT).await
    }

    pub async fn next_event_within(&mut self, wait: Duration) -> Option<MockEvent> {
        tokio::time::timeout(wait, self.events.recv())
            .await
            .ok()
            .flatten()
    }

    /// Next text frame, skipping other events.
    pub async fn next_text(&mut self) -> Value {
        loop {
            match self.next_event().await {
                Some(MockEvent::Text(value)) => return value,
                Some(_) => continue,
                None => panic!("no text frame received"),
            }
        }
    }

    /// Next close frame sent by the client, skipping other events.
    pub async fn next_close(&mut self) -> Option<(u16, String)> {
        loop {
            match self.next_event().await {
                Some(MockEvent::Close(frame)) => return frame,
                Some(_) => continue,
                None => panic!("no close frame received"),
            }
        }
    }
}

/// Handle a single client connection
async fn handle_connection(
    stream: TcpStream,
    replies: Arc<Vec<Reply>>,
    tx: mpsc::UnboundedSender<MockEvent>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let handshake_tx = tx.clone();
    let ws_stream = accept_hdr_async(
        stream,
        move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            let _ = handshake_tx.send(MockEvent::Handshake(request.uri().to_string()));
            Ok(response)
        },
    )
    .await?;
    let (mut write, mut read) = ws_stream.split();

    let mut started = false;

    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let value: Value = serde_json::from_str(text.as_str())?;
                let is_start = value["header"]["ctrl"] == "start";
                let _ = tx.send(MockEvent::Text(value));

                if is_start && !started {
                    started = true;
                    for reply in replies.iter() {
                        match reply {
                            Reply::Text(frame) => {
                                write.send(Message::Text(frame.clone().into())).await?;
                            }
                            Reply::Close { code, reason } => {
                                write
                                    .send(Message::Close(Some(CloseFrame {
                                        code: CloseCode::from(*code),
                                        reason: reason.clone().into(),
                                    })))
                                    .await?;
                            }
                            // Both halves drop on return, closing the socket.
                            Reply::Drop => return Ok(()),
                        }
                    }
                }
            }
            Ok(Message::Close(frame)) => {
                let _ = tx.send(MockEvent::Close(
                    frame.map(|frame| (u16::from(frame.code), frame.reason.as_str().to_string())),
                ));
                break;
            }
            Ok(Message::Ping(data)) => {
                write.send(Message::Pong(data)).await?;
            }
            Err(e) => {
                eprintln!("WebSocket error: {e}");
                break;
            }
            _ => {}
        }
    }

    Ok(())
}
