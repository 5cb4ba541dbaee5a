//! Avatar interaction session over WebSocket.
//!
//! A session owns one connection to a pre-signed URL (see
//! [`crate::auth::sign_url`]) and exchanges JSON envelopes with the avatar
//! service.
//!
//! # Features
//!
//! - Readiness gate: envelopes are only transmitted while the session is open
//! - Keepalive `ping` envelope every 5 seconds (configurable)
//! - Server errors close the session with the server's code and message
//! - A caller-owned [`CompletionSignal`] resolves exactly once, with the
//!   avatar stream URL or the first failure
//!
//! # Lifecycle
//!
//! ```text
//! Idle ──connect()──▶ Connecting ──handshake ok──▶ Open
//!                          │                         │
//!                          └──────── failure ────────┴──▶ Closed
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use waav_avatar::auth::{Credentials, sign_url};
//! use waav_avatar::core::session::{AvatarSession, Ctrl, Envelope, SessionOptions};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let credentials = Credentials::new("api-key", "api-secret");
//! let url = sign_url("wss://avatar.example.com/v1/interact", &credentials, "GET")?;
//!
//! let session = AvatarSession::new(url, SessionOptions::new("app-id"));
//! session.connect().await?;
//! session
//!     .start(&Envelope::new("app-id", Ctrl::Start), None)
//!     .await?;
//! session.close().await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod completion;
pub mod config;
pub mod messages;


pub use client::{AvatarSession, SessionError, SessionResult, SessionState};
pub use completion::{CompletionSignal, SessionFailure, StreamOutcome};
pub use config::{DEFAULT_CLOSE_TIMEOUT, DEFAULT_KEEPALIVE_INTERVAL, SessionOptions};
pub use messages::{
    Ctrl, Envelope, EnvelopeHeader, FrameError, InboundEvent, ResponseEnvelope, ResponseHeader,
    classify_frame,
};
