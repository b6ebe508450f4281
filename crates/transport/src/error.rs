//! Error types for HTTP transport operations

/// Errors from sending requests and decoding responses.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// DNS, connection or TLS failure; never retried by this crate.
    #[error("HTTP transport error: {0}")]
    Transport(String),

    #[error("request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("gave up after {attempts} attempts, status codes seen: {status_codes:?}")]
    RetriesExhausted { attempts: u32, status_codes: Vec<u16> },

    #[error("request body is a stream and cannot be replayed")]
    UnbufferedBody,

    #[error("invalid header: {0}")]
    Header(String),

    #[error("response decode failed: {0}")]
    Decode(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("credential error: {0}")]
    Auth(#[from] cloud_auth::Error),
}

impl Error {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Status { status, .. } => Some(*status),
            Error::RetriesExhausted { status_codes, .. } => status_codes.last().copied(),
            _ => None,
        }
    }
}

/// Result alias for transport operations.
pub type Result<T> = std::result::Result<T, Error>;
