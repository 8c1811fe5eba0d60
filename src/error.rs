use std::sync::Arc;
use std::time::Duration;

use crate::TimeoutBudget;

/// Error returned by [`AcquisitionCoordinator::acquire`](crate::AcquisitionCoordinator::acquire).
///
/// Cloneable so that one terminal outcome can be handed to every caller that
/// was coalesced onto the same attempt.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ConnectError {
    /// Required configuration is missing or invalid. Never retried.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Every attempt allowed by the retry policy failed.
    #[error("gave up after {attempts} attempt(s): {last}")]
    ExhaustedRetries {
        attempts: u32,
        /// Failure of the final attempt.
        last: ConnectFailure,
        /// Timeouts used by the final attempt.
        budget: TimeoutBudget,
    },
    /// An attempt failed in a way retrying cannot fix.
    #[error("connection rejected after {attempts} attempt(s): {cause}")]
    Rejected { attempts: u32, cause: ConnectFailure },
    /// A downstream operation reported the cached handle as unusable.
    #[error("stale connection handle (generation {generation}): {reason}")]
    StaleHandle { generation: u64, reason: String },
    /// The caller's own deadline elapsed while waiting for a connection.
    #[error("acquire deadline of {waited:?} elapsed")]
    DeadlineExceeded { waited: Duration },
    /// The in-flight attempt ended without producing an outcome.
    #[error("connection attempt aborted")]
    Aborted,
}

impl ConnectError {
    pub(crate) fn missing_uri() -> Self {
        Self::Configuration("connection URI not provided (set DOCSTORE_URI)".to_owned())
    }

    /// Whether a request handler should answer "service unavailable" and let
    /// its own client retry later.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::ExhaustedRetries { .. }
                | Self::StaleHandle { .. }
                | Self::DeadlineExceeded { .. }
                | Self::Aborted
        )
    }

    /// Attempts made before this error was produced, when known.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::ExhaustedRetries { attempts, .. } | Self::Rejected { attempts, .. } => {
                Some(*attempts)
            }
            _ => None,
        }
    }
}

/// Failure of a single factory attempt.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ConnectFailure {
    /// No endpoint answered the discovery handshake in time.
    #[error("no reachable endpoint within {timeout:?}")]
    Discovery { timeout: Duration },
    /// Network or request execution error from `reqwest`.
    #[error("transport error: {0}")]
    Transport(Arc<reqwest::Error>),
    /// The handshake was answered with a non-success status.
    #[error("handshake rejected with http {status}: {body}")]
    Handshake { status: u16, body: String },
    /// The whole attempt overran its deadline.
    #[error("attempt timed out after {0:?}")]
    TimedOut(Duration),
    /// The handshake reply was malformed or reported the server unusable.
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("invalid connection uri: {0}")]
    InvalidUri(String),
    /// Failure reported by a custom factory.
    #[error("{0}")]
    Other(String),
}

impl ConnectFailure {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Discovery { .. } | Self::TimedOut(_) | Self::Other(_) => true,
            Self::Transport(err) => {
                err.is_timeout() || err.is_connect() || err.is_request() || err.is_body()
            }
            Self::Handshake { status, .. } => is_retryable_status(*status),
            Self::Protocol(_) | Self::InvalidUri(_) => false,
        }
    }
}

pub(crate) fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// Error type of document operations issued against a
/// [`StoreConnection`](crate::StoreConnection).
#[derive(Clone, Debug, thiserror::Error)]
pub enum StoreError {
    /// The handle has faulted; operations are refused instead of queued.
    #[error("connection not ready")]
    NotReady,
    #[error("transport error: {0}")]
    Transport(Arc<reqwest::Error>),
    /// Non-success HTTP status code with raw response body.
    #[error("http error {status}: {body}")]
    Http { status: u16, body: String },
    /// Response decoding or shape validation error.
    #[error("decode error: {0}")]
    Decode(String),
    /// A collection name or document id that cannot address a document.
    #[error("invalid name: {0}")]
    InvalidName(String),
}

impl StoreError {
    /// Whether this error means the connection itself is unusable and should
    /// be reported through
    /// [`AcquisitionCoordinator::report_stale`](crate::AcquisitionCoordinator::report_stale).
    pub fn is_connection_fault(&self) -> bool {
        match self {
            Self::NotReady => true,
            Self::Transport(err) => err.is_connect() || err.is_timeout(),
            Self::Http { .. } | Self::Decode(_) | Self::InvalidName(_) => false,
        }
    }
}
