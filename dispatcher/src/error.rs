//! Error types, layered by the collaborator boundary that produces them.

use crossbeam_channel as chan;
use thiserror::Error;

/// Errors returned synchronously from [`crate::Config::validate`] / [`crate::Dispatcher::new`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// `num_target_peers` was zero.
    #[error("num_target_peers must be at least 1")]
    NoTargetPeers,
    /// `max_request_invs` exceeded the protocol's per-message inventory limit.
    #[error("max_request_invs ({0}) exceeds the protocol limit ({1})")]
    RequestBatchTooLarge(usize, usize),
}

/// A transient error dialing or handshaking with a candidate peer. Never
/// surfaced to callers; logged and the candidate is skipped for this pass.
#[derive(Debug, Error)]
pub enum DialError {
    /// The transport could not establish a connection.
    #[error("dial {0}: connection failed: {1}")]
    ConnectionFailed(String, String),
    /// The peer did not complete the handshake before the ready timeout.
    #[error("dial {0}: handshake timed out")]
    HandshakeTimeout(String),
    /// The candidate's address is our own (self-connection), detected via nonce.
    #[error("dial {0}: refused self-connection")]
    SelfConnection(String),
    /// The connection ended (peer closed it, or a decode error was fatal to
    /// the stream).
    #[error("{0}: connection closed: {1}")]
    Closed(String, String),
}

/// An error from the backend's `GetPeers` RPC.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The call to the backend failed outright.
    #[error("backend getpeers failed: {0}")]
    Request(String),
    /// The backend returned a peer descriptor this dispatcher can't parse.
    #[error("backend returned a malformed peer descriptor: {0}")]
    MalformedPeer(String),
}

/// An error reported on a query's error channel after retry is exhausted for
/// one request.
#[derive(Debug, Error)]
pub enum QueryError {
    /// No peer could satisfy this request within the retry budget.
    #[error("request exhausted after {attempts} attempts")]
    Exhausted {
        /// Number of attempts made before giving up.
        attempts: usize,
    },
    /// The dispatcher was stopped while this request was outstanding.
    #[error("dispatcher shut down before this request completed")]
    ShuttingDown,
}

/// Top-level dispatcher error.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The backend's peer list could not be retrieved.
    #[error(transparent)]
    Backend(#[from] BackendError),
    /// A request failed after exhausting its retry budget.
    #[error(transparent)]
    Query(#[from] QueryError),
    /// An internal channel disconnected unexpectedly (peer thread panicked,
    /// or the dispatcher is shutting down).
    #[error("internal channel disconnected")]
    Disconnected,
}

impl From<chan::RecvError> for Error {
    fn from(_: chan::RecvError) -> Self {
        Self::Disconnected
    }
}

impl<T> From<chan::SendError<T>> for Error {
    fn from(_: chan::SendError<T>) -> Self {
        Self::Disconnected
    }
}
