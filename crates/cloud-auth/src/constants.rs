//! Google endpoints and defaults used by the token resolvers

/// Base URL of the GCE/GKE metadata server
pub const METADATA_BASE_URL: &str = "http://metadata.google.internal";

/// Header the metadata server requires on every request
pub const METADATA_FLAVOR_HEADER: &str = "Metadata-Flavor";
pub const METADATA_FLAVOR_VALUE: &str = "Google";

/// Service account used when none is configured
pub const DEFAULT_SERVICE_ACCOUNT: &str = "default";

/// Authorization endpoint for the installed-app OAuth flow
pub const AUTHORIZE_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";

/// Token endpoint for code exchange and refresh
pub const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";

/// Read-only access to Cloud Logging is all the fetcher needs.
pub const LOGGING_READ_SCOPE: &str = "https://www.googleapis.com/auth/logging.read";

/// Token type label of the store backing the Authorization header
pub const ACCESS_TOKEN_TYPE: &str = "access-token";
