//! Types shared by every crate of the log retrieval workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
