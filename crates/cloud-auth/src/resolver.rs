//! Token resolver abstraction and the priority-ordered multi resolver

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use common::Secret;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::token::Token;

/// A source of credentials.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn TokenResolver>`).
pub trait TokenResolver: Send + Sync {
    /// Identifier for logging (e.g. "metadata-server", "gcloud")
    fn name(&self) -> &str;

    /// Produce a fresh token or fail.
    fn resolve(&self) -> Pin<Box<dyn Future<Output = Result<Token>> + Send + '_>>;
}

/// Where a static token comes from.
#[derive(Debug, Clone)]
pub enum StaticSource {
    /// Value supplied directly (config file, CLI flag)
    Value(Secret<String>),
    /// Name of an environment variable read on every resolve
    Env(String),
}

/// Resolver returning a pre-issued token with unknown expiry.
pub struct StaticTokenResolver {
    source: StaticSource,
}

impl StaticTokenResolver {
    pub fn from_value(value: impl Into<String>) -> Self {
        Self {
            source: StaticSource::Value(Secret::new(value.into())),
        }
    }

    pub fn from_env(var: impl Into<String>) -> Self {
        Self {
            source: StaticSource::Env(var.into()),
        }
    }
}

impl TokenResolver for StaticTokenResolver {
    fn name(&self) -> &str {
        match self.source {
            StaticSource::Value(_) => "static",
            StaticSource::Env(_) => "env",
        }
    }

    fn resolve(&self) -> Pin<Box<dyn Future<Output = Result<Token>> + Send + '_>> {
        Box::pin(async move {
            match &self.source {
                StaticSource::Value(value) if !value.is_empty() => {
                    Ok(Token::without_expiry(value.expose().clone()))
                }
                StaticSource::Value(_) => {
                    Err(Error::InvalidResponse("configured token is empty".into()))
                }
                StaticSource::Env(var) => match std::env::var(var) {
                    Ok(value) if !value.trim().is_empty() => {
                        Ok(Token::without_expiry(value.trim()))
                    }
                    _ => Err(Error::MissingEnv(var.clone())),
                },
            }
        })
    }
}

/// Tries resolvers in priority order and returns the first success.
pub struct MultiTokenResolver {
    resolvers: Vec<Arc<dyn TokenResolver>>,
}

impl MultiTokenResolver {
    pub fn new(resolvers: Vec<Arc<dyn TokenResolver>>) -> Self {
        Self { resolvers }
    }
}

impl TokenResolver for MultiTokenResolver {
    fn name(&self) -> &str {
        "multi"
    }

    /// Returns `Error::NoValidToken` carrying every failure when no resolver
    /// succeeds, including when the list is empty.
    fn resolve(&self) -> Pin<Box<dyn Future<Output = Result<Token>> + Send + '_>> {
        Box::pin(async move {
            let mut failures = Vec::new();
            for resolver in &self.resolvers {
                match resolver.resolve().await {
                    Ok(token) => {
                        debug!(resolver = resolver.name(), "token resolved");
                        return Ok(token);
                    }
                    Err(e) => {
                        debug!(resolver = resolver.name(), error = %e, "resolver failed, trying next");
                        failures.push(e);
                    }
                }
            }
            warn!(attempted = failures.len(), "no resolver produced a token");
            Err(Error::NoValidToken { failures })
        })
    }
}
