//! Transport failure taxonomy

use thiserror::Error;

/// What the sync engine should do with an action after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Keep the action untouched; it does not consume a retry
    Defer,
    /// Count the attempt against `max_retries`
    Retry,
    /// Drop the action permanently
    Drop,
}

/// Errors surfaced by a [`Transport`](super::Transport)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No route to the server
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    /// 5xx, 429 or 408 response
    #[error("Server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    /// Any other 4xx response
    #[error("Client error (HTTP {status}): {message}")]
    Client { status: u16, message: String },

    /// Response body could not be decoded
    #[error("Malformed response: {0}")]
    Serialization(String),

    /// The call did not finish within the per-action timeout
    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl TransportError {
    /// Classify an HTTP status that is not a success
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            408 | 429 | 500..=599 => TransportError::Server { status, message },
            _ => TransportError::Client { status, message },
        }
    }

    pub fn disposition(&self) -> FailureDisposition {
        match self {
            TransportError::NetworkUnavailable(_) => FailureDisposition::Defer,
            TransportError::Server { .. }
            | TransportError::Serialization(_)
            | TransportError::Timeout(_) => FailureDisposition::Retry,
            TransportError::Client { .. } => FailureDisposition::Drop,
        }
    }

    /// Whether a read may fall back to a last-known-good cached value
    pub fn allows_stale_fallback(&self) -> bool {
        matches!(
            self,
            TransportError::NetworkUnavailable(_) | TransportError::Serialization(_)
        )
    }
}
