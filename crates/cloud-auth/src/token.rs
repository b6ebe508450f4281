//! Resolved credential value

use chrono::{DateTime, TimeDelta, Utc};
use common::Secret;

/// A credential string plus the latest instant it is known to be valid.
///
/// Tokens without expiry information carry `DateTime::<Utc>::MIN_UTC`, which
/// is always in the past: such a token is usable but never assured valid.
#[derive(Debug, Clone)]
pub struct Token {
    raw_value: Secret<String>,
    valid_at_least_until: DateTime<Utc>,
}

impl Token {
    pub fn new(raw_value: impl Into<String>, valid_at_least_until: DateTime<Utc>) -> Self {
        Self {
            raw_value: Secret::new(raw_value.into()),
            valid_at_least_until,
        }
    }

    /// Token whose lifetime is unknown (env values, CLI output).
    pub fn without_expiry(raw_value: impl Into<String>) -> Self {
        Self::new(raw_value, DateTime::<Utc>::MIN_UTC)
    }

    /// Token from an OAuth-style response carrying `expires_in` seconds.
    pub fn expiring_in(raw_value: impl Into<String>, expires_in_secs: u64) -> Self {
        let delta = TimeDelta::try_seconds(i64::try_from(expires_in_secs).unwrap_or(i64::MAX))
            .unwrap_or(TimeDelta::MAX);
        let expiry = Utc::now()
            .checked_add_signed(delta)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self::new(raw_value, expiry)
    }

    pub fn raw_value(&self) -> &str {
        self.raw_value.expose()
    }

    pub fn valid_at_least_until(&self) -> DateTime<Utc> {
        self.valid_at_least_until
    }

    pub fn has_known_expiry(&self) -> bool {
        self.valid_at_least_until != DateTime::<Utc>::MIN_UTC
    }

    /// True iff `now` is strictly before the expiry.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.valid_at_least_until
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }
}
