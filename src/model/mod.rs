//! Data models for a voice session
//!
//! This module contains the value types that flow between the credential broker,
//! the signaling exchange, the media transport and the control channel.

pub mod credential;
pub mod event;
pub mod sdp;
pub mod tracks;

pub use credential::Credential;
pub use event::ControlEvent;
pub use sdp::{SessionAnswer, SessionOffer};
