//! Media track management
//!
//! A session carries exactly one outbound microphone track and at most one
//! inbound track. Both live on the single audio m-line of the offer.

use std::time::Instant;

use str0m::media::Mid;

/// The microphone track sent to the remote peer.
#[derive(Debug)]
pub struct LocalTrack {
    /// The audio m-line this track is sent on
    pub(crate) mid: Mid,
    /// Current state of the outgoing track
    pub(crate) state: LocalTrackState,
    /// RTP timestamp of the next frame, in 48 kHz ticks
    rtp_time: u32,
}

/// The lifecycle of the outgoing track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalTrackState {
    /// Offered, waiting for the transport to connect
    Negotiating,
    /// Connected; frames are written to the peer
    Open,
    /// Released by teardown
    Ended,
}

impl LocalTrack {
    pub fn new(mid: Mid) -> LocalTrack {
        LocalTrack {
            mid,
            state: LocalTrackState::Negotiating,
            rtp_time: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == LocalTrackState::Open
    }

    /// Returns the timestamp for the next frame and advances by `samples`.
    pub fn next_rtp_time(&mut self, samples: u32) -> u32 {
        let now = self.rtp_time;
        self.rtp_time = self.rtp_time.wrapping_add(samples);
        now
    }
}

/// The remote voice, bound to the sink when its first packet arrives.
#[derive(Debug)]
pub struct RemoteTrack {
    /// The audio m-line the remote sends on
    pub(crate) mid: Mid,
    /// When the first packet was seen
    pub(crate) bound_at: Instant,
    /// Packets delivered to the sink so far
    pub(crate) packets: u64,
}

impl RemoteTrack {
    pub fn new(mid: Mid) -> RemoteTrack {
        RemoteTrack {
            mid,
            bound_at: Instant::now(),
            packets: 0,
        }
    }

    pub fn mid(&self) -> Mid {
        self.mid
    }

    pub fn packets(&self) -> u64 {
        self.packets
    }

    pub fn bound_at(&self) -> Instant {
        self.bound_at
    }
}
