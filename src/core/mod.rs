pub mod session;

// Re-export commonly used types for convenience
pub use session::{
    AvatarSession, CompletionSignal, Ctrl, Envelope, SessionError, SessionFailure,
    SessionOptions, SessionResult, SessionState, StreamOutcome,
};
