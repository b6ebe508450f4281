//! Credential resolution and caching for the logging API client
//!
//! A `TokenStore` per credential type caches the last token produced by its
//! `TokenResolver` and collapses concurrent refreshes into one resolver call.
//! `MultiTokenStoreRefresher` picks which store to refresh when a request is
//! rejected with an auth error.
//!
//! Credential flow:
//! 1. The composition root builds a `MultiTokenResolver` from the configured
//!    sources (static/env value, metadata server, external command, interactive)
//! 2. A `TokenStore` wraps it; the first `get_token()` resolves synchronously
//! 3. Header providers read `TokenStore::get_token()` before every request
//! 4. On 401/403 the retry client calls `TokenRefresher::refresh()`, which
//!    refreshes the first store whose token is not assured valid

pub mod command;
pub mod constants;
pub mod error;
pub mod interactive;
pub mod metadata;
pub mod pkce;
pub mod refresher;
pub mod resolver;
pub mod store;
pub mod token;

pub use command::CommandTokenResolver;
pub use error::{Error, Result};
pub use interactive::{CodePrompt, InteractiveTokenResolver, OAuthClientConfig, StdinPrompt};
pub use metadata::MetadataServerTokenResolver;
pub use refresher::{MultiTokenStoreRefresher, TokenRefresher};
pub use resolver::{MultiTokenResolver, StaticTokenResolver, TokenResolver};
pub use store::TokenStore;
pub use token::Token;
