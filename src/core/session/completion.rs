//! One-shot stream-readiness signal shared between a session and its caller.

use std::sync::{Arc, Weak};

use thiserror::Error;
use tokio::sync::watch;

/// Why a session failed to deliver a stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionFailure {
    /// The service answered with a non-zero `header.code`.
    #[error("remote error {code}: {message}")]
    Remote { code: i64, message: String },

    /// The transport reported an error.
    #[error("transport error: {0}")]
    Transport(String),

    /// The socket closed, by the peer or locally, before a stream was ready.
    #[error("connection closed ({code:?}): {reason}")]
    Closed { code: Option<u16>, reason: String },
}

/// Final outcome observed by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    Ready { stream_url: String },
    Failed(SessionFailure),
}

impl StreamOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }
}

/// Single-assignment result cell with async waiting.
///
/// The first call to [`resolve`](Self::resolve) wins; later calls are no-ops
/// and return `false`. Safe to resolve from several tasks at once.
///
/// The caller owns the signal. A session only keeps a weak reference, so
/// dropping every `CompletionSignal` clone detaches it from the session.
#[derive(Debug, Clone)]
pub struct CompletionSignal {
    inner: Arc<watch::Sender<Option<StreamOutcome>>>,
}

impl Default for CompletionSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            inner: Arc::new(tx),
        }
    }

    /// Store `outcome` unless an outcome is already stored.
    pub fn resolve(&self, outcome: StreamOutcome) -> bool {
        resolve_once(&self.inner, outcome)
    }

    pub fn is_resolved(&self) -> bool {
        self.inner.borrow().is_some()
    }

    pub fn outcome(&self) -> Option<StreamOutcome> {
        self.inner.borrow().clone()
    }

    /// Wait until the signal is resolved.
    ///
    /// There is no built-in deadline; wrap in `tokio::time::timeout`.
    pub async fn wait(&self) -> StreamOutcome {
        let mut rx = self.inner.subscribe();
        loop {
            if let Some(outcome) = rx.borrow_and_update().clone() {
                return outcome;
            }
            // The sender lives in `self`, so the channel cannot close here.
            if rx.changed().await.is_err() {
                return StreamOutcome::Failed(SessionFailure::Closed {
                    code: None,
                    reason: "completion signal dropped".to_string(),
                });
            }
        }
    }

    pub(crate) fn downgrade(&self) -> WeakCompletion {
        WeakCompletion(Arc::downgrade(&self.inner))
    }
}

/// Session-side handle to a caller's [`CompletionSignal`].
#[derive(Debug, Clone)]
pub(crate) struct WeakCompletion(Weak<watch::Sender<Option<StreamOutcome>>>);

impl WeakCompletion {
    /// Resolve the signal if the caller still holds it.
    pub(crate) fn resolve(&self, outcome: StreamOutcome) -> bool {
        match self.0.upgrade() {
            Some(tx) => resolve_once(&tx, outcome),
            None => false,
        }
    }
}

fn resolve_once(tx: &watch::Sender<Option<StreamOutcome>>, outcome: StreamOutcome) -> bool {
    tx.send_if_modified(|current| {
        if current.is_some() {
            return false;
        }
        *current = Some(outcome);
        true
    })
}
