//! Cached token with single-flight refresh
//!
//! One `TokenStore` exists per credential type for the lifetime of the
//! process. Readers share the cached value through an `RwLock`; refreshes are
//! serialized by a separate `Mutex` so a burst of auth failures collapses
//! into a single resolver call.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::resolver::TokenResolver;
use crate::token::Token;

/// Outcome of the most recent resolution attempt.
#[derive(Debug, Clone)]
enum Cached {
    Empty,
    Resolved(Token),
    Failed(Error),
}

pub struct TokenStore {
    token_type: String,
    resolver: Arc<dyn TokenResolver>,
    cached: RwLock<Cached>,
    refresh_lock: Mutex<()>,
    /// Bumped after every resolver call.
    generation: AtomicU64,
}

impl TokenStore {
    pub fn new(token_type: impl Into<String>, resolver: Arc<dyn TokenResolver>) -> Self {
        Self {
            token_type: token_type.into(),
            resolver,
            cached: RwLock::new(Cached::Empty),
            refresh_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    /// Return the cached token, resolving first if no usable token is cached.
    ///
    /// A stale token is still returned; callers check
    /// `is_token_validity_assured` or rely on the auth-retry path. When the
    /// store is empty or the last attempt failed, one caller resolves again
    /// and concurrent callers share its outcome.
    pub async fn get_token(&self) -> Result<Token> {
        let seen = self.generation.load(Ordering::Acquire);
        if !matches!(*self.cached.read().await, Cached::Resolved(_)) {
            let _guard = self.refresh_lock.lock().await;
            // Someone resolved while we waited for the lock
            if self.generation.load(Ordering::Acquire) == seen {
                // The outcome is cached either way and read back below.
                let _ = self.resolve_and_cache().await;
            }
        }
        match &*self.cached.read().await {
            Cached::Resolved(token) => Ok(token.clone()),
            Cached::Failed(e) => Err(e.clone()),
            Cached::Empty => Err(Error::NotResolved(self.token_type.clone())),
        }
    }

    /// True iff a token is cached and its expiry is strictly in the future.
    pub async fn is_token_validity_assured(&self) -> bool {
        match &*self.cached.read().await {
            Cached::Resolved(token) => token.is_valid(),
            _ => false,
        }
    }

    /// Resolve a new token, single-flight.
    ///
    /// The caller that wins `try_lock` runs the resolver, caches the outcome
    /// and returns it. Every other caller waits for that refresh to finish and
    /// returns `Ok(())` without calling the resolver and without seeing the
    /// leader's outcome; `get_token` exposes it.
    pub async fn refresh_token(&self) -> Result<()> {
        let _leader = match self.refresh_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!(token_type = %self.token_type, "refresh in flight, waiting for it");
                let _follower = self.refresh_lock.lock().await;
                return Ok(());
            }
        };

        self.resolve_and_cache().await
    }

    /// Run the resolver and cache its outcome. Callers hold `refresh_lock`.
    async fn resolve_and_cache(&self) -> Result<()> {
        let outcome = self.resolver.resolve().await;
        let mut cached = self.cached.write().await;
        self.generation.fetch_add(1, Ordering::AcqRel);
        match outcome {
            Ok(token) => {
                info!(
                    token_type = %self.token_type,
                    resolver = self.resolver.name(),
                    expiry_known = token.has_known_expiry(),
                    "token refreshed"
                );
                metrics::counter!("token_refresh_total", "token_type" => self.token_type.clone(), "outcome" => "success")
                    .increment(1);
                *cached = Cached::Resolved(token);
                Ok(())
            }
            Err(e) => {
                warn!(token_type = %self.token_type, error = %e, "token refresh failed");
                metrics::counter!("token_refresh_total", "token_type" => self.token_type.clone(), "outcome" => "failure")
                    .increment(1);
                *cached = Cached::Failed(e.clone());
                Err(e)
            }
        }
    }
}
