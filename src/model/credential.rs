//! Ephemeral credentials
//!
//! A credential is minted by the issuer once per session and dropped as soon as
//! the signaling exchange has used it.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// A short-lived bearer token scoped to one session.
///
/// Deliberately neither `Clone` nor `Serialize`: the session owns the only copy.
#[derive(Deserialize)]
pub struct Credential {
    value: String,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn new(value: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Credential {
        Credential {
            value: value.into(),
            expires_at,
        }
    }

    /// Parse the issuer's JSON response body. Extra fields are ignored.
    pub fn from_json(body: &str) -> Result<Credential, String> {
        let credential: Credential = serde_json::from_str(body).map_err(|e| e.to_string())?;
        if credential.value.trim().is_empty() {
            return Err("credential value is empty".to_string());
        }
        Ok(credential)
    }

    /// The raw token, for the `Authorization` header only.
    pub fn expose(&self) -> &str {
        &self.value
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|t| t <= now).unwrap_or(false)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("value", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
