// =============================================================================
// error.rs — EVERY WAY A GOVERNMENT PORTAL CAN SAY NO
// =============================================================================
//
// The portal fails in a small number of distinct ways, and the caller needs
// to know which one happened. "Something went wrong" is not an answer a
// cause-list UI can act on. So every failure is classified into exactly one
// ErrorKind, and every ErrorKind is a plain value: cloneable, comparable,
// and cheap to hand to every waiter of a single-flight call.
// =============================================================================

use std::time::Duration;

use serde::Serialize;

use crate::models::Level;

/// What kind of network trouble we ran into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NetworkFault {
    /// Could not connect, or the connection died mid-flight.
    Connect,
    /// The portal did not answer within the configured timeout.
    Timeout,
    /// The portal answered with a 5xx. Transient, as far as we can tell.
    ServerError(u16),
    /// The response body could not be read off the wire.
    Body,
    /// The circuit breaker is open; the request was never sent.
    CircuitOpen,
}

impl std::fmt::Display for NetworkFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkFault::Connect => write!(f, "connection failure"),
            NetworkFault::Timeout => write!(f, "timeout"),
            NetworkFault::ServerError(status) => write!(f, "server error {status}"),
            NetworkFault::Body => write!(f, "body read failure"),
            NetworkFault::CircuitOpen => write!(f, "circuit open"),
        }
    }
}

/// The error taxonomy surfaced by every operation in this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
pub enum ErrorKind {
    /// Transport-level failure: connect, timeout, 5xx, circuit open.
    #[error("network error ({fault}): {message}")]
    Network { fault: NetworkFault, message: String },

    /// The portal no longer recognises our session.
    #[error("portal session expired")]
    SessionExpired,

    /// A CAPTCHA blocked the request and the configured solver could not
    /// get us past it.
    #[error("captcha required: {reason}")]
    CaptchaRequired { reason: String },

    /// The portal asked us to slow down.
    #[error("rate limited by portal, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// The portal answered, but not in the shape we know how to read.
    #[error("malformed response from {endpoint}: {reason}")]
    MalformedResponse { endpoint: String, reason: String },

    /// Caller passed a code that does not exist under its parent.
    #[error("invalid {level} selection: {code:?}")]
    InvalidSelection { level: Level, code: String },

    /// Unauthorized or otherwise rejected by the portal.
    #[error("portal rejected the request (HTTP {status}): {reason}")]
    Unauthorized { status: u16, reason: String },

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,
}

impl ErrorKind {
    pub fn network(fault: NetworkFault, message: impl Into<String>) -> Self {
        ErrorKind::Network { fault, message: message.into() }
    }

    pub fn malformed(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        ErrorKind::MalformedResponse {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_selection(level: Level, code: impl Into<String>) -> Self {
        ErrorKind::InvalidSelection { level, code: code.into() }
    }

    /// Whether the transport retry loop may try this request again.
    ///
    /// Only transient trouble qualifies. An open circuit is deliberately
    /// excluded: retrying into it just burns the retry budget.
    pub fn is_transient(&self) -> bool {
        match self {
            ErrorKind::Network { fault, .. } => *fault != NetworkFault::CircuitOpen,
            ErrorKind::RateLimited { .. } => true,
            _ => false,
        }
    }

    /// Short stable label, used as a metrics/log field.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::Network { .. } => "network",
            ErrorKind::SessionExpired => "session_expired",
            ErrorKind::CaptchaRequired { .. } => "captcha_required",
            ErrorKind::RateLimited { .. } => "rate_limited",
            ErrorKind::MalformedResponse { .. } => "malformed_response",
            ErrorKind::InvalidSelection { .. } => "invalid_selection",
            ErrorKind::Unauthorized { .. } => "unauthorized",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

/// Failures while wiring the engine together, before any portal call.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
    #[error(transparent)]
    Layout(#[from] crate::portal::layout::LayoutError),
    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

/// Internal result alias. The public façade converts these into
/// [`FetchResult`](crate::models::FetchResult).
pub type PortalResult<T> = Result<T, ErrorKind>;
