//! Realtime voice sessions over WebRTC.
//!
//! A [`VoiceSession`] fetches an ephemeral credential, offers an audio track and
//! a control data channel, trades SDP with the remote endpoint over HTTPS and
//! reports when the control channel is up.

pub mod audio;
pub mod broker;
pub mod channel;
pub mod client;
pub mod config;
pub mod error;
pub mod model;
pub mod peer;
pub mod server;
pub mod session;
pub mod signaling;
pub mod transport;
pub mod util;

pub use channel::{ChannelState, ControlChannel};
pub use error::SessionError;
pub use model::{ControlEvent, Credential, SessionAnswer, SessionOffer};
pub use session::{SessionOptions, SessionState, VoiceSession};
