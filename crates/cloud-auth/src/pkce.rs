//! PKCE (Proof Key for Code Exchange) per RFC 7636
//!
//! The verifier stays in memory for the duration of one interactive login;
//! the S256 challenge goes into the authorization URL so the token endpoint
//! can check the exchange came from the same process.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::interactive::OAuthClientConfig;

/// Random code verifier: 64 bytes as URL-safe base64 (86 chars, within the
/// RFC's 43-128 range).
pub fn generate_verifier() -> String {
    let mut bytes = [0u8; 64];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Opaque CSRF state echoed back by the authorization server.
pub fn generate_state() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// `BASE64URL(SHA256(verifier))`
pub fn compute_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Authorization URL with every parameter the installed-app flow requires.
pub fn build_authorization_url(
    config: &OAuthClientConfig,
    state: &str,
    challenge: &str,
) -> Result<String> {
    let scope = config.scopes.join(" ");
    let url = reqwest::Url::parse_with_params(
        &config.authorize_endpoint,
        &[
            ("client_id", config.client_id.as_str()),
            ("redirect_uri", config.redirect_uri.as_str()),
            ("response_type", "code"),
            ("scope", scope.as_str()),
            ("code_challenge", challenge),
            ("code_challenge_method", "S256"),
            ("access_type", "offline"),
            ("state", state),
        ],
    )
    .map_err(|e| Error::InvalidResponse(format!("invalid authorize endpoint: {e}")))?;
    Ok(url.into())
}
