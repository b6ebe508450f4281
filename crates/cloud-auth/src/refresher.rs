//! Round-robin refresh across several token stores
//!
//! When a request is rejected with an auth error the retry client does not
//! know which credential caused it. `MultiTokenStoreRefresher` refreshes the
//! first store whose token is not assured valid, rotating the starting point
//! so repeated failures spread across candidates.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::store::TokenStore;

/// Called by the retry client when a response status signals bad credentials.
pub trait TokenRefresher: Send + Sync {
    fn refresh(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

pub struct MultiTokenStoreRefresher {
    stores: Vec<Arc<TokenStore>>,
    cursor: AtomicUsize,
}

impl MultiTokenStoreRefresher {
    pub fn new(stores: Vec<Arc<TokenStore>>) -> Self {
        info!(stores = stores.len(), "token refresher initialized");
        Self {
            stores,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Index of the store the next `refresh` starts from.
    pub fn cursor(&self) -> usize {
        match self.stores.len() {
            0 => 0,
            n => self.cursor.load(Ordering::Relaxed) % n,
        }
    }
}

impl TokenRefresher for MultiTokenStoreRefresher {
    fn refresh(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let n = self.stores.len();
            for _ in 0..n {
                let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % n;
                let store = &self.stores[idx];

                if store.is_token_validity_assured().await {
                    debug!(token_type = store.token_type(), "token still valid, skipping");
                    continue;
                }

                match store.refresh_token().await {
                    Ok(()) => return Ok(()),
                    Err(e) => {
                        warn!(token_type = store.token_type(), error = %e, "refresh failed, trying next store");
                    }
                }
            }
            Err(Error::NoTokenRefreshed)
        })
    }
}
