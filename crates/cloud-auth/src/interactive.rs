//! Interactive OAuth login (authorization code + PKCE)
//!
//! The first resolve prints an authorization URL and waits for the user to
//! paste the code shown after consent, or the whole redirect URL, whose
//! `state` must match the one sent. The refresh token from that exchange
//! is kept in memory so later resolves refresh silently; if the refresh token
//! is rejected the user is prompted again.

use std::future::Future;
use std::pin::Pin;

use common::Secret;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::constants::{AUTHORIZE_ENDPOINT, LOGGING_READ_SCOPE, TOKEN_ENDPOINT};
use crate::error::{Error, Result};
use crate::pkce;
use crate::resolver::TokenResolver;
use crate::token::Token;

/// Public OAuth client registration used for the installed-app flow.
#[derive(Debug, Clone)]
pub struct OAuthClientConfig {
    pub client_id: String,
    pub client_secret: Option<Secret<String>>,
    pub authorize_endpoint: String,
    pub token_endpoint: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
}

impl OAuthClientConfig {
    /// Google endpoints with the logging read scope.
    pub fn google(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
            authorize_endpoint: AUTHORIZE_ENDPOINT.into(),
            token_endpoint: TOKEN_ENDPOINT.into(),
            redirect_uri: "https://sdk.cloud.google.com/authcode.html".into(),
            scopes: vec![LOGGING_READ_SCOPE.into()],
        }
    }
}

/// Token endpoint response for both exchange and refresh.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    /// Absent on refresh responses; the old refresh token stays valid
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: u64,
}

/// Obtains the authorization code (or the redirect URL carrying it) from the
/// user.
pub trait CodePrompt: Send + Sync {
    fn ask<'a>(
        &'a self,
        authorization_url: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;
}

/// Prints the URL to stderr and reads one line from stdin.
pub struct StdinPrompt;

impl CodePrompt for StdinPrompt {
    fn ask<'a>(
        &'a self,
        authorization_url: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(async move {
            let mut stderr = tokio::io::stderr();
            let prompt = format!(
                "Open the following URL in a browser and paste the authorization code or the redirect URL:\n\n  {authorization_url}\n\nCode: "
            );
            stderr
                .write_all(prompt.as_bytes())
                .await
                .map_err(|e| Error::Io(format!("writing prompt: {e}")))?;
            stderr
                .flush()
                .await
                .map_err(|e| Error::Io(format!("writing prompt: {e}")))?;

            let mut line = String::new();
            BufReader::new(tokio::io::stdin())
                .read_line(&mut line)
                .await
                .map_err(|e| Error::Io(format!("reading authorization code: {e}")))?;
            let code = line.trim().to_string();
            if code.is_empty() {
                return Err(Error::TokenExchange("no authorization code entered".into()));
            }
            Ok(code)
        })
    }
}

pub struct InteractiveTokenResolver {
    client: reqwest::Client,
    config: OAuthClientConfig,
    prompt: Box<dyn CodePrompt>,
    refresh: Mutex<Option<Secret<String>>>,
}

impl InteractiveTokenResolver {
    pub fn new(client: reqwest::Client, config: OAuthClientConfig) -> Self {
        Self::with_prompt(client, config, Box::new(StdinPrompt))
    }

    pub fn with_prompt(
        client: reqwest::Client,
        config: OAuthClientConfig,
        prompt: Box<dyn CodePrompt>,
    ) -> Self {
        Self {
            client,
            config,
            prompt,
            refresh: Mutex::new(None),
        }
    }

    async fn login(&self) -> Result<TokenResponse> {
        let verifier = pkce::generate_verifier();
        let challenge = pkce::compute_challenge(&verifier);
        let state = pkce::generate_state();
        let url = pkce::build_authorization_url(&self.config, &state, &challenge)?;

        let answer = self.prompt.ask(&url).await?;
        let code = authorization_code(&answer, &state)?;
        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("code_verifier", verifier.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ];
        if let Some(secret) = &self.config.client_secret {
            form.push(("client_secret", secret.expose().as_str()));
        }
        self.post_token_form(&form).await
    }

    async fn refresh_with(&self, refresh: &str) -> Result<TokenResponse> {
        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh),
            ("client_id", self.config.client_id.as_str()),
        ];
        if let Some(secret) = &self.config.client_secret {
            form.push(("client_secret", secret.expose().as_str()));
        }
        self.post_token_form(&form).await
    }

    async fn post_token_form(&self, form: &[(&str, &str)]) -> Result<TokenResponse> {
        let response = self
            .client
            .post(&self.config.token_endpoint)
            .form(form)
            .send()
            .await
            .map_err(|e| Error::Http(format!("token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            return Err(Error::TokenExchange(format!(
                "token endpoint returned {status}: {body}"
            )));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| Error::InvalidResponse(format!("token endpoint response: {e}")))
    }
}

/// The code from what the user pasted.
///
/// A bare code is taken as is. A redirect URL must carry a `state` equal to
/// `expected_state`; an `error` parameter is reported as a failed exchange.
fn authorization_code(answer: &str, expected_state: &str) -> Result<String> {
    let answer = answer.trim();
    let url = match reqwest::Url::parse(answer) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => url,
        _ => return Ok(answer.to_string()),
    };

    let param = |name: &str| {
        url.query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    };
    if let Some(error) = param("error") {
        return Err(Error::TokenExchange(format!("authorization denied: {error}")));
    }
    if param("state").as_deref() != Some(expected_state) {
        return Err(Error::TokenExchange(
            "redirect state does not match the authorization request".into(),
        ));
    }
    param("code")
        .filter(|c| !c.is_empty())
        .ok_or_else(|| Error::TokenExchange("redirect URL has no authorization code".into()))
}

impl TokenResolver for InteractiveTokenResolver {
    fn name(&self) -> &str {
        "interactive"
    }

    fn resolve(&self) -> Pin<Box<dyn Future<Output = Result<Token>> + Send + '_>> {
        Box::pin(async move {
            // Held across the whole flow so two prompts never interleave
            let mut refresh = self.refresh.lock().await;

            if let Some(current) = refresh.as_ref() {
                match self.refresh_with(current.expose()).await {
                    Ok(response) => {
                        if let Some(rotated) = response.refresh_token {
                            *refresh = Some(Secret::new(rotated));
                        }
                        info!("access token refreshed with stored refresh token");
                        return Ok(Token::expiring_in(response.access_token, response.expires_in));
                    }
                    Err(e) => {
                        warn!(error = %e, "refresh token rejected, prompting for a new login");
                        *refresh = None;
                    }
                }
            }

            let response = self.login().await?;
            if let Some(new_refresh) = response.refresh_token {
                *refresh = Some(Secret::new(new_refresh));
            }
            info!("interactive login completed");
            Ok(Token::expiring_in(response.access_token, response.expires_in))
        })
    }
}
