//! Error types for log queries

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("log fetch failed: {0}")]
    Transport(transport::Error),

    #[error("query cancelled")]
    Cancelled,

    #[error("log entry decode failed: {0}")]
    Decode(String),

    #[error("invalid query configuration: {0}")]
    InvalidConfig(String),

    /// A shard ended without an error of its own (aggregator or job failure).
    #[error("shard failed: {0}")]
    ShardFailed(String),
}

impl Error {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

/// Transport cancellation stays a cancellation so shards can tell it apart
/// from a real failure.
impl From<transport::Error> for Error {
    fn from(e: transport::Error) -> Self {
        if e.is_cancelled() {
            Error::Cancelled
        } else {
            Error::Transport(e)
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_cancellation_maps_to_cancelled() {
        let err: Error = transport::Error::Cancelled.into();
        assert!(err.is_cancelled());
    }

    #[test]
    fn transport_failure_is_wrapped() {
        let err: Error = transport::Error::Status {
            status: 400,
            body: "bad filter".into(),
        }
        .into();
        assert!(!err.is_cancelled());
        assert_eq!(
            err.to_string(),
            "log fetch failed: request failed with status 400: bad filter"
        );
    }
}
