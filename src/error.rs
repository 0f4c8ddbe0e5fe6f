//! Error types for the assistant service

use thiserror::Error;

/// Service error type
#[derive(Debug, Error)]
pub enum Error {
    /// The messaging channel cannot send right now
    #[error("whatsapp channel is not ready")]
    ChannelNotReady,

    /// The channel accepted the request but refused the message
    #[error("whatsapp rejected message ({status}): {body}")]
    ChannelRejected { status: u16, body: String },

    /// Non-success response from an upstream HTTP service
    #[error("{service} returned {status}: {body}")]
    Upstream {
        service: &'static str,
        status: u16,
        body: String,
    },

    /// Transport-level HTTP failure
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Database failure
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Socket or filesystem failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode failure
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Missing or invalid configuration
    #[error("config error: {0}")]
    Config(String),

    /// Upstream content that could not be interpreted
    #[error("invalid payload: {0}")]
    Payload(String),

    /// Temporary unavailability reported by a collaborator
    #[error("temporarily unavailable: {0}")]
    Unavailable(String),
}

impl Error {
    /// Whether retrying the same call may succeed.
    ///
    /// Channel rejections are never transient here: a WhatsApp send is not
    /// safely replayable, so retry policy for it belongs to the caller.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Http(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            Error::Upstream { status, .. } => *status == 429 || *status >= 500,
            Error::Storage(err) => matches!(
                err,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::WorkerCrashed
            ),
            Error::Unavailable(_) => true,
            Error::ChannelNotReady
            | Error::ChannelRejected { .. }
            | Error::Io(_)
            | Error::Json(_)
            | Error::Config(_)
            | Error::Payload(_) => false,
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
