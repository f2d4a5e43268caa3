//! Session descriptions exchanged during signaling.

use std::fmt;

/// Content type of a raw session-description body.
pub const SDP_CONTENT_TYPE: &str = "application/sdp";

/// The local offer. Produced exactly once per session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOffer(String);

/// The remote answer. Consumed at most once per session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionAnswer(String);

impl SessionOffer {
    pub fn new(sdp: impl Into<String>) -> SessionOffer {
        SessionOffer(sdp.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl SessionAnswer {
    pub fn new(sdp: impl Into<String>) -> SessionAnswer {
        SessionAnswer(sdp.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionOffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for SessionAnswer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
