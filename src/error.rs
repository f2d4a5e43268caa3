//! Error taxonomy for the voice session lifecycle.

use std::time::Duration;

use thiserror::Error;

/// Everything that can go wrong while a session is being built, used or torn down.
///
/// Variants carry strings rather than source errors so that a failure can be
/// cloned into observers and kept as the session's last diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The credential issuer could not be reached or failed server-side.
    #[error("credential issuer unreachable: {0}")]
    IssuerUnreachable(String),

    /// The credential issuer refused the request or answered without a credential.
    #[error("credential issuer rejected the request ({status}): {reason}")]
    IssuerRejected { status: u16, reason: String },

    /// The credential expired before it could be used for signaling.
    #[error("credential expired before signaling")]
    CredentialExpired,

    /// Microphone capture was refused.
    #[error("microphone capture denied: {0}")]
    MediaCaptureDenied(String),

    /// The transport could not produce a local offer.
    #[error("failed to generate local offer: {0}")]
    OfferGenerationFailed(String),

    /// The remote answer was malformed or arrived in the wrong state.
    #[error("invalid remote answer: {0}")]
    InvalidAnswer(String),

    /// The signaling endpoint answered with a non-success status.
    #[error("signaling rejected ({status}): {body}")]
    SignalingRejected { status: u16, body: String },

    /// The signaling request failed below HTTP.
    #[error("network error: {0}")]
    NetworkError(String),

    /// A control event was sent outside the `Open` state.
    #[error("control channel is not open")]
    ChannelNotOpen,

    /// The control channel closed before it ever opened.
    #[error("control channel closed before opening")]
    ChannelClosed,

    /// An inbound control payload could not be parsed.
    #[error("malformed control event: {0}")]
    MalformedEvent(String),

    /// The connect sequence did not finish in time.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// The connect sequence was superseded by `disconnect()`.
    #[error("connect aborted by disconnect")]
    Aborted,
}

/// The lifecycle stage an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Credential,
    Permission,
    Transport,
    Signaling,
    Channel,
    Session,
}

impl SessionError {
    pub fn stage(&self) -> Stage {
        match self {
            SessionError::IssuerUnreachable(_)
            | SessionError::IssuerRejected { .. }
            | SessionError::CredentialExpired => Stage::Credential,
            SessionError::MediaCaptureDenied(_) => Stage::Permission,
            SessionError::OfferGenerationFailed(_) | SessionError::InvalidAnswer(_) => {
                Stage::Transport
            }
            SessionError::SignalingRejected { .. } | SessionError::NetworkError(_) => {
                Stage::Signaling
            }
            SessionError::ChannelNotOpen
            | SessionError::ChannelClosed
            | SessionError::MalformedEvent(_) => Stage::Channel,
            SessionError::ConnectTimeout(_) | SessionError::Aborted => Stage::Session,
        }
    }
}
