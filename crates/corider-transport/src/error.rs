//! Transport errors
//!
//! [`TransportError`] is the raw outcome of one exchange with the backend.
//! [`CallError`] is what callers of the adapter see once authorization and
//! retries have been applied.

use crate::request::Method;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Error payload the backend wraps in `{"error": {...}}`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ApiErrorBody {
    /// Machine-readable error identifier
    #[serde(default)]
    pub id: String,
    /// Human-readable message
    #[serde(default)]
    pub message: String,
}

#[derive(Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

impl ApiErrorBody {
    /// Parse the backend error envelope, if the body carries one
    pub fn from_envelope(body: &serde_json::Value) -> Option<Self> {
        serde_json::from_value::<ApiErrorEnvelope>(body.clone())
            .ok()
            .map(|envelope| envelope.error)
    }
}

impl fmt::Display for ApiErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.id.is_empty(), self.message.is_empty()) {
            (false, false) => write!(f, "{}: {}", self.id, self.message),
            (false, true) => f.write_str(&self.id),
            _ => f.write_str(&self.message),
        }
    }
}

fn api_error_suffix(error: &Option<ApiErrorBody>) -> String {
    error
        .as_ref()
        .map(|body| format!(" ({body})"))
        .unwrap_or_default()
}

/// Coarse classification of a [`TransportError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    /// Request never reached the server
    Network,
    /// No response within the deadline; the server may have applied it
    Timeout,
    /// Server answered with a non-success status
    Server,
}

/// Failure of a single REST exchange
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Connection refused, DNS failure, reset before a response
    #[error("network error: {message}")]
    Network {
        /// Error text from the HTTP client
        message: String,
    },

    /// Deadline elapsed before a response arrived
    #[error("request timed out after {timeout_ms} ms")]
    Timeout {
        /// Deadline that elapsed
        timeout_ms: u64,
    },

    /// Non-success HTTP status
    #[error("server returned {status}{}", api_error_suffix(.error))]
    Server {
        /// Status code
        status: u16,
        /// Error envelope, when the body carried one
        error: Option<ApiErrorBody>,
    },
}

impl TransportError {
    /// Request never reached the server
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// No response within `after`
    pub fn timeout(after: Duration) -> Self {
        Self::Timeout {
            timeout_ms: u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Non-success status with its optional error envelope
    pub fn server(status: u16, error: Option<ApiErrorBody>) -> Self {
        Self::Server { status, error }
    }

    /// Coarse classification
    pub fn kind(&self) -> TransportErrorKind {
        match self {
            Self::Network { .. } => TransportErrorKind::Network,
            Self::Timeout { .. } => TransportErrorKind::Timeout,
            Self::Server { .. } => TransportErrorKind::Server,
        }
    }

    /// HTTP status of a server error
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Server { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Parsed backend error envelope of a server error
    pub fn api_error(&self) -> Option<&ApiErrorBody> {
        match self {
            Self::Server { error, .. } => error.as_ref(),
            _ => None,
        }
    }

    /// Access token rejected
    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }

    /// Whether the adapter may resend `method` after this error.
    ///
    /// Network errors never reached the server. Timeouts are only safe to
    /// repeat for reads.
    pub fn is_retryable_for(&self, method: Method) -> bool {
        match self {
            Self::Network { .. } => true,
            Self::Timeout { .. } => method.is_idempotent_read(),
            Self::Server { .. } => false,
        }
    }
}

/// Error surfaced by [`TransportAdapter`](crate::TransportAdapter) calls
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    /// Exchange failed after retries
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Credentials are gone; the user must log in again
    #[error("session expired, login required")]
    RequiresLogin,

    /// Response body did not match the expected shape
    #[error("failed to decode response: {message}")]
    Decode {
        /// Decoder error text
        message: String,
    },
}

impl CallError {
    /// Decode failure with `message`
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Underlying exchange error, if any
    pub fn transport(&self) -> Option<&TransportError> {
        match self {
            Self::Transport(err) => Some(err),
            _ => None,
        }
    }

    /// HTTP status of a server error
    pub fn status(&self) -> Option<u16> {
        self.transport().and_then(TransportError::status)
    }

    /// Deadline elapsed; the server may have applied the request
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport(TransportError::Timeout { .. }))
    }
}

/// STOMP frame encoding or decoding failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StompError {
    /// Message carried no frame
    #[error("empty frame")]
    Empty,
    /// Command line not recognised
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    /// Header line without a colon
    #[error("malformed header line '{0}'")]
    MalformedHeader(String),
    /// Backslash not followed by `\\`, `n`, `r` or `c`
    #[error("invalid escape sequence in header")]
    InvalidEscape,
    /// Body not terminated by NUL
    #[error("frame missing NUL terminator")]
    Unterminated,
    /// Required header absent
    #[error("frame missing header '{0}'")]
    MissingHeader(&'static str),
}

/// Push channel failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// WebSocket handshake or I/O failed
    #[error("channel connection failed at {endpoint}: {message}")]
    Connect {
        /// Endpoint URL
        endpoint: String,
        /// Failure text
        message: String,
    },

    /// Broker answered CONNECT or a frame with an ERROR frame
    #[error("broker rejected channel: {message}")]
    Rejected {
        /// Broker message or ERROR frame body
        message: String,
    },

    /// Established connection dropped
    #[error("channel connection lost: {message}")]
    Lost {
        /// Failure text
        message: String,
    },

    /// Handshake did not finish in time
    #[error("handshake timed out after {timeout_ms} ms")]
    Timeout {
        /// Deadline that elapsed
        timeout_ms: u64,
    },

    /// Frame could not be encoded or decoded
    #[error(transparent)]
    Stomp(#[from] StompError),

    /// Channel actor has shut down
    #[error("channel closed")]
    Closed,
}

impl ChannelError {
    /// Handshake or I/O failure at `endpoint`
    pub fn connect(endpoint: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Connect {
            endpoint: endpoint.into(),
            message: message.to_string(),
        }
    }

    /// Established connection dropped
    pub fn lost(message: impl fmt::Display) -> Self {
        Self::Lost {
            message: message.to_string(),
        }
    }

    /// Broker refused the connection or a frame
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }
}
