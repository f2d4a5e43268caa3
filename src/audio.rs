//! Audio endpoints of a session
//!
//! The transport pulls encoded frames from an [`AudioSource`] obtained through a
//! [`Microphone`], and pushes received frames into an [`AudioSink`]. Frames are
//! already Opus-encoded on both sides; codec work belongs to the device layer.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::error::SessionError;
use crate::model::tracks::RemoteTrack;

/// Opus frame length used for outbound audio.
pub const FRAME_DURATION: Duration = Duration::from_millis(20);

/// Samples per frame at the 48 kHz Opus clock.
pub const SAMPLES_PER_FRAME: u32 = 960;

/// A 20 ms Opus packet decoding to silence (TOC 0xF8, CELT fullband mono).
const OPUS_SILENCE: [u8; 3] = [0xf8, 0xff, 0xfe];

/// One encoded audio frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub data: Vec<u8>,
    pub samples: u32,
}

/// Grants access to the capture device. Called once per session.
#[async_trait]
pub trait Microphone: Send + Sync {
    /// Fails with [`SessionError::MediaCaptureDenied`] when access is refused.
    async fn capture(&self) -> Result<Box<dyn AudioSource>, SessionError>;
}

/// A stream of encoded outbound frames.
#[async_trait]
pub trait AudioSource: Send {
    /// Next frame, or `None` once the source has ended.
    async fn next_frame(&mut self) -> Option<AudioFrame>;
}

/// Receives the remote voice for the duration of a session.
pub trait AudioSink: Send + Sync {
    fn attach(&self, track: &RemoteTrack);
    fn write(&self, frame: &[u8]);
    fn detach(&self);
}

/// A microphone that always grants access and produces silence.
#[derive(Debug, Default)]
pub struct SilenceMicrophone;

#[async_trait]
impl Microphone for SilenceMicrophone {
    async fn capture(&self) -> Result<Box<dyn AudioSource>, SessionError> {
        Ok(Box::new(SilenceSource::new()))
    }
}

/// Emits one silent Opus frame per frame period.
pub struct SilenceSource {
    ticker: Interval,
}

impl SilenceSource {
    pub fn new() -> SilenceSource {
        let mut ticker = interval(FRAME_DURATION);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        SilenceSource { ticker }
    }
}

impl Default for SilenceSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioSource for SilenceSource {
    async fn next_frame(&mut self) -> Option<AudioFrame> {
        self.ticker.tick().await;
        Some(AudioFrame {
            data: OPUS_SILENCE.to_vec(),
            samples: SAMPLES_PER_FRAME,
        })
    }
}

/// Counts received audio and logs attach/detach.
#[derive(Debug, Default)]
pub struct LoggingSink {
    attached: AtomicBool,
    frames: AtomicU64,
    bytes: AtomicU64,
}

impl LoggingSink {
    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::SeqCst)
    }
}

impl AudioSink for LoggingSink {
    fn attach(&self, track: &RemoteTrack) {
        self.attached.store(true, Ordering::SeqCst);
        info!("🔊 Remote audio bound to sink (mid {:?})", track.mid());
    }

    fn write(&self, frame: &[u8]) {
        if !self.is_attached() {
            return;
        }
        let n = self.frames.fetch_add(1, Ordering::SeqCst) + 1;
        self.bytes.fetch_add(frame.len() as u64, Ordering::SeqCst);
        if n % 500 == 0 {
            debug!("Received {} remote audio frames", n);
        }
    }

    fn detach(&self) {
        if self.attached.swap(false, Ordering::SeqCst) {
            info!(
                "🔇 Remote audio detached after {} frames ({} bytes)",
                self.frames(),
                self.bytes.load(Ordering::SeqCst)
            );
        }
    }
}
