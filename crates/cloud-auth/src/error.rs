//! Error types for credential resolution

/// Errors from token resolution and refresh.
///
/// `Clone` so the store can hand its cached failure to every caller.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("invalid token response: {0}")]
    InvalidResponse(String),

    #[error("environment variable {0} is not set or empty")]
    MissingEnv(String),

    #[error("token command failed: {0}")]
    Command(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("token store {0} has not resolved a token")]
    NotResolved(String),

    /// Every resolver of a `MultiTokenResolver` failed.
    #[error("no valid token resolved ({})", describe_failures(.failures))]
    NoValidToken { failures: Vec<Error> },

    #[error("no token store needed refreshing or every refresh failed")]
    NoTokenRefreshed,
}

impl Error {
    /// Individual resolver failures carried by `NoValidToken`.
    pub fn failures(&self) -> &[Error] {
        match self {
            Error::NoValidToken { failures } => failures,
            _ => &[],
        }
    }
}

fn describe_failures(failures: &[Error]) -> String {
    if failures.is_empty() {
        return "no resolvers configured".into();
    }
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
