//! Avatar interaction WebSocket session.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────────┐     ┌─────────────────┐
//! │ start()/send()  │────▶│ outbound (mpsc)  │────▶│     I/O Task    │◀──── socket
//! └─────────────────┘     └──────────────────┘     └────────┬────────┘
//!          ▲                                                 │
//! ┌────────┴────────┐                              ┌─────────▼────────┐
//! │ Keepalive Task  │                              │ CompletionSignal │────▶ caller
//! └─────────────────┘                              └──────────────────┘
//! ```
//!
//! The I/O task is the only reader and the only writer of the socket, so
//! frames from the caller, the keepalive task and `close()` never interleave
//! on the wire.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::completion::{CompletionSignal, SessionFailure, StreamOutcome, WeakCompletion};
use super::config::SessionOptions;
use super::messages::{Envelope, InboundEvent, classify_frame};

/// Longest reason a close frame can carry (125-byte payload minus the code).
const MAX_CLOSE_REASON: usize = 123;

const NORMAL_CLOSURE_REASON: &str = "Normal closure";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// State & errors
// =============================================================================

/// Lifecycle of a session. There is no way out of `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Open,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "Idle"),
            SessionState::Connecting => write!(f, "Connecting"),
            SessionState::Open => write!(f, "Open"),
            SessionState::Closed => write!(f, "Closed"),
        }
    }
}

/// Errors returned directly from session operations.
///
/// Failures after the session is open are reported through the
/// [`CompletionSignal`] instead.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The WebSocket handshake or transport failed.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The operation is not valid in the current state.
    #[error("Invalid session state: {0}")]
    InvalidState(SessionState),

    /// The session closed before it became ready.
    #[error("Session closed")]
    Closed,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

enum Outbound {
    Frame(String),
    Close(CloseFrame),
}

// =============================================================================
// Shared session state
// =============================================================================

struct Shared {
    url: String,
    options: SessionOptions,
    state: watch::Sender<SessionState>,
    /// Set once the handshake completes; never reset.
    ready: AtomicBool,
    outbound: Mutex<Option<mpsc::UnboundedSender<Outbound>>>,
    completion: Mutex<Option<WeakCompletion>>,
    stream_url: Mutex<Option<String>>,
    keepalive: CancellationToken,
    io_task: Mutex<Option<JoinHandle<()>>>,
    keepalive_task: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire) && self.state() == SessionState::Open
    }

    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        self.state.send_if_modified(|state| {
            if *state != from {
                return false;
            }
            *state = to;
            true
        })
    }

    /// `Connecting` to `Open`, raising the readiness gate before any
    /// subscriber observes `Open`. Fails if the session left `Connecting`.
    fn open(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state != SessionState::Connecting {
                return false;
            }
            self.ready.store(true, Ordering::Release);
            *state = SessionState::Open;
            true
        })
    }

    /// Move to `Closed`, returning the state it left.
    fn mark_closed(&self) -> SessionState {
        let mut previous = SessionState::Closed;
        self.state.send_if_modified(|state| {
            previous = *state;
            if *state == SessionState::Closed {
                return false;
            }
            *state = SessionState::Closed;
            true
        });
        self.keepalive.cancel();
        previous
    }

    fn resolve(&self, outcome: StreamOutcome) {
        let completion = self.completion.lock().clone();
        if let Some(completion) = completion {
            if completion.resolve(outcome) {
                debug!("Completion signal resolved");
            }
        }
    }

    fn send(&self, envelope: &Envelope) -> SessionResult<bool> {
        if !self.is_ready() {
            debug!("Dropping {} frame: session not ready", envelope.ctrl());
            return Ok(false);
        }

        let json = envelope.to_json()?;
        let outbound = self.outbound.lock();
        let Some(sender) = outbound.as_ref() else {
            debug!("Dropping {} frame: socket released", envelope.ctrl());
            return Ok(false);
        };

        trace!("Sending: {}", json);
        Ok(sender.send(Outbound::Frame(json)).is_ok())
    }

    /// Returns the close frame to send back when the frame ends the session.
    fn handle_text(&self, text: &str) -> Option<CloseFrame> {
        debug!("Received message: {}", text);

        match classify_frame(text) {
            Ok(InboundEvent::StreamReady { stream_url }) => {
                info!("Avatar stream ready: {}", stream_url);
                *self.stream_url.lock() = Some(stream_url.clone());
                self.resolve(StreamOutcome::Ready { stream_url });
                None
            }
            Ok(InboundEvent::RemoteError { code, message }) => {
                error!("Session server closed. Code: {code}, Reason: {message}");
                self.mark_closed();
                self.resolve(StreamOutcome::Failed(SessionFailure::Remote {
                    code,
                    message: message.clone(),
                }));
                Some(remote_close_frame(code, &message))
            }
            Ok(InboundEvent::Response(response)) => {
                trace!("Response for request {:?}", response.header.request_id);
                None
            }
            Err(e) => {
                warn!("Failed to parse avatar message: {e}");
                None
            }
        }
    }

    fn finish(&self, failure: SessionFailure) {
        self.outbound.lock().take();
        self.mark_closed();
        self.resolve(StreamOutcome::Failed(failure));
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.keepalive.cancel();
    }
}

// =============================================================================
// AvatarSession
// =============================================================================

/// Client for one avatar interaction session.
///
/// Cheap to clone; all clones drive the same connection. Dropping the last
/// clone releases the socket with a normal closure.
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use waav_avatar::core::session::{
///     AvatarSession, CompletionSignal, Ctrl, Envelope, SessionOptions, StreamOutcome,
/// };
///
/// # async fn run(signed_url: String) -> Result<(), Box<dyn std::error::Error>> {
/// let session = AvatarSession::new(signed_url, SessionOptions::new("app-id"));
/// session.connect().await?;
///
/// let ready = CompletionSignal::new();
/// session.start(&Envelope::new("app-id", Ctrl::Start), Some(&ready)).await?;
///
/// match tokio::time::timeout(Duration::from_secs(30), ready.wait()).await? {
///     StreamOutcome::Ready { stream_url } => println!("pull from {stream_url}"),
///     StreamOutcome::Failed(failure) => eprintln!("{failure}"),
/// }
///
/// session.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct AvatarSession {
    shared: Arc<Shared>,
}

impl fmt::Debug for AvatarSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AvatarSession")
            .field("url", &redact_query(&self.shared.url))
            .field("state", &self.state())
            .finish()
    }
}

impl AvatarSession {
    /// Create an idle session for an already-signed URL.
    pub fn new(url: impl Into<String>, options: SessionOptions) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            shared: Arc::new(Shared {
                url: url.into(),
                options,
                state,
                ready: AtomicBool::new(false),
                outbound: Mutex::new(None),
                completion: Mutex::new(None),
                stream_url: Mutex::new(None),
                keepalive: CancellationToken::new(),
                io_task: Mutex::new(None),
                keepalive_task: Mutex::new(None),
            }),
        }
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    pub fn options(&self) -> &SessionOptions {
        &self.shared.options
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Whether sends are currently transmitted.
    pub fn is_ready(&self) -> bool {
        self.shared.is_ready()
    }

    /// Stream URL announced by the service, once available.
    pub fn stream_url(&self) -> Option<String> {
        self.shared.stream_url.lock().clone()
    }

    /// Open the WebSocket connection.
    ///
    /// Returns once the handshake has completed and the receive loop and
    /// keepalive are running. There is no built-in timeout.
    pub async fn connect(&self) -> SessionResult<()> {
        if !self
            .shared
            .transition(SessionState::Idle, SessionState::Connecting)
        {
            return Err(SessionError::InvalidState(self.state()));
        }

        info!(
            "Connecting to avatar service: {}",
            redact_query(&self.shared.url)
        );

        let mut ws_stream = match connect_async(self.shared.url.as_str()).await {
            Ok((stream, response)) => {
                info!("Connected to avatar service (status: {})", response.status());
                stream
            }
            Err(e) => {
                let message = format!("WebSocket connection failed: {e}");
                error!("{}", message);
                self.shared.mark_closed();
                self.shared
                    .resolve(StreamOutcome::Failed(SessionFailure::Transport(
                        message.clone(),
                    )));
                return Err(SessionError::Connection(message));
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        *self.shared.outbound.lock() = Some(tx);

        // close() may have run while the handshake was in flight.
        if !self.shared.open() {
            self.shared.outbound.lock().take();
            info!("Session closed during handshake; closing socket");
            let normal = CloseFrame {
                code: CloseCode::Normal,
                reason: NORMAL_CLOSURE_REASON.into(),
            };
            match timeout(
                self.shared.options.close_timeout,
                ws_stream.close(Some(normal)),
            )
            .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("Failed to close socket after handshake: {e}"),
                Err(_) => debug!("Timed out closing socket after handshake"),
            }
            return Err(SessionError::Closed);
        }

        let io_handle = tokio::spawn(run_io(Arc::downgrade(&self.shared), ws_stream, rx));
        *self.shared.io_task.lock() = Some(io_handle);

        let keepalive_handle = tokio::spawn(run_keepalive(
            Arc::downgrade(&self.shared),
            self.shared.keepalive.clone(),
            self.shared.options.keepalive_interval,
            self.shared.options.app_id.clone(),
        ));
        *self.shared.keepalive_task.lock() = Some(keepalive_handle);

        Ok(())
    }

    /// Wait for the connection to open, then send the first envelope.
    ///
    /// `completion`, when given, is resolved once with the stream URL or the
    /// first failure. Fails with [`SessionError::Closed`] if the session
    /// closes before opening; callers should still bound the wait externally.
    pub async fn start(
        &self,
        envelope: &Envelope,
        completion: Option<&CompletionSignal>,
    ) -> SessionResult<()> {
        if let Some(signal) = completion {
            *self.shared.completion.lock() = Some(signal.downgrade());
        }

        let mut state_rx = self.shared.state.subscribe();
        let state = state_rx
            .wait_for(|state| matches!(state, SessionState::Open | SessionState::Closed))
            .await
            .map(|state| *state)
            .map_err(|_| SessionError::Closed)?;

        if state != SessionState::Open {
            return Err(SessionError::Closed);
        }

        if self.send(envelope)? {
            Ok(())
        } else {
            Err(SessionError::Closed)
        }
    }

    /// Queue one envelope as a text frame.
    ///
    /// Best effort: returns `Ok(false)` and transmits nothing when the session
    /// is not open and ready.
    pub fn send(&self, envelope: &Envelope) -> SessionResult<bool> {
        self.shared.send(envelope)
    }

    /// Close with a normal-closure frame and release the socket.
    ///
    /// Idempotent. Terminates the receive loop and the keepalive task.
    pub async fn close(&self) -> SessionResult<()> {
        let previous = self.shared.mark_closed();
        if previous == SessionState::Closed {
            return Ok(());
        }

        if let Some(sender) = self.shared.outbound.lock().take() {
            let _ = sender.send(Outbound::Close(CloseFrame {
                code: CloseCode::Normal,
                reason: NORMAL_CLOSURE_REASON.into(),
            }));
        }

        let io_handle = self.shared.io_task.lock().take();
        if let Some(handle) = io_handle {
            let abort = handle.abort_handle();
            if timeout(self.shared.options.close_timeout, handle)
                .await
                .is_err()
            {
                warn!("Avatar session I/O task did not stop in time; aborting");
                abort.abort();
            }
        }

        let keepalive_handle = self.shared.keepalive_task.lock().take();
        if let Some(handle) = keepalive_handle {
            handle.abort();
        }

        self.shared
            .resolve(StreamOutcome::Failed(SessionFailure::Closed {
                code: Some(CloseCode::Normal.into()),
                reason: "closed locally".to_string(),
            }));

        info!("Avatar session closed (was {previous})");
        Ok(())
    }
}

// =============================================================================
// Background tasks
// =============================================================================

/// Sole reader and writer of the socket.
async fn run_io(
    shared: Weak<Shared>,
    ws_stream: WsStream,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
) {
    let (mut ws_write, mut ws_read) = ws_stream.split();

    let failure = loop {
        tokio::select! {
            biased;

            command = rx.recv() => match command {
                Some(Outbound::Frame(json)) => {
                    if let Err(e) = ws_write.send(Message::Text(json.into())).await {
                        error!("Failed to send WebSocket message: {e}");
                        break SessionFailure::Transport(format!("Failed to send frame: {e}"));
                    }
                }
                Some(Outbound::Close(frame)) => {
                    let failure = SessionFailure::Closed {
                        code: Some(frame.code.into()),
                        reason: frame.reason.as_str().to_string(),
                    };
                    let _ = ws_write.send(Message::Close(Some(frame))).await;
                    break failure;
                }
                None => {
                    // Every session handle is gone.
                    let _ = ws_write
                        .send(Message::Close(Some(CloseFrame {
                            code: CloseCode::Normal,
                            reason: NORMAL_CLOSURE_REASON.into(),
                        })))
                        .await;
                    break SessionFailure::Closed {
                        code: Some(CloseCode::Normal.into()),
                        reason: "session dropped".to_string(),
                    };
                }
            },

            message = ws_read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    let Some(session) = shared.upgrade() else {
                        break SessionFailure::Closed {
                            code: None,
                            reason: "session dropped".to_string(),
                        };
                    };
                    if let Some(frame) = session.handle_text(text.as_str()) {
                        let failure = SessionFailure::Closed {
                            code: Some(frame.code.into()),
                            reason: frame.reason.as_str().to_string(),
                        };
                        let _ = ws_write.send(Message::Close(Some(frame))).await;
                        break failure;
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    debug!("Received binary message: {} bytes", data.len());
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = ws_write.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    info!("WebSocket closed: {:?}", frame);
                    break match frame {
                        Some(frame) => SessionFailure::Closed {
                            code: Some(frame.code.into()),
                            reason: frame.reason.as_str().to_string(),
                        },
                        None => SessionFailure::Closed {
                            code: None,
                            reason: "closed by peer".to_string(),
                        },
                    };
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!("WebSocket error: {e}");
                    break SessionFailure::Transport(e.to_string());
                }
                None => {
                    info!("Avatar WebSocket stream ended");
                    break SessionFailure::Closed {
                        code: None,
                        reason: "stream ended".to_string(),
                    };
                }
            },
        }
    };

    if let Some(session) = shared.upgrade() {
        session.finish(failure);
    }
    info!("Avatar session message loop ended");
}

/// Sends a ping envelope every `period` until cancelled.
async fn run_keepalive(
    shared: Weak<Shared>,
    cancel: CancellationToken,
    period: Duration,
    app_id: String,
) {
    // First ping one period after open, so it never races the start frame.
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let Some(session) = shared.upgrade() else { break };
                match session.send(&Envelope::ping(app_id.as_str())) {
                    Ok(true) => trace!("Sent keepalive ping"),
                    Ok(false) => trace!("Keepalive ping dropped"),
                    Err(e) => warn!("Failed to build keepalive ping: {e}"),
                }
            }
        }
    }

    debug!("Keepalive stopped");
}

// =============================================================================
// Helpers
// =============================================================================

/// Close frame echoing a server error.
///
/// Codes that are not legal on the wire fall back to 1011.
pub(super) fn remote_close_frame(code: i64, message: &str) -> CloseFrame {
    let code = u16::try_from(code)
        .ok()
        .map(CloseCode::from)
        .filter(|code| code.is_allowed())
        .unwrap_or(CloseCode::Error);

    CloseFrame {
        code,
        reason: truncate_reason(message).into(),
    }
}

pub(super) fn truncate_reason(reason: &str) -> String {
    if reason.len() <= MAX_CLOSE_REASON {
        return reason.to_string();
    }
    let mut end = MAX_CLOSE_REASON;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    reason[..end].to_string()
}

/// Drop the query string so signatures never reach the logs.
pub(crate) fn redact_query(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}
