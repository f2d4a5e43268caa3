//! Media transport
//!
//! [`MediaTransport`] is the seam between the session state machine and the
//! peer-to-peer connection. [`Str0mTransport`] implements it on a str0m `Rtc`:
//! an audio-only offer with a single send/recv Opus m-line and one ordered data
//! channel, a host ICE candidate on the selected local address, and a driver
//! task (see [`crate::peer`]) spawned once the answer has been applied.

use std::{
    net::{IpAddr, SocketAddr, UdpSocket},
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use str0m::{
    change::{SdpAnswer, SdpPendingOffer},
    channel::ChannelId,
    media::{Direction, MediaKind, Mid},
    Candidate, Rtc,
};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info};

use crate::audio::{AudioSink, AudioSource, Microphone};
use crate::channel::{ChannelEndpoint, ControlChannel};
use crate::error::SessionError;
use crate::model::tracks::LocalTrack;
use crate::model::{SessionAnswer, SessionOffer};
use crate::peer::{self, Peer, PeerLinks};
use crate::util::bind_host_socket;

/// One peer-to-peer connection carrying the microphone, the remote voice and
/// the control channel.
///
/// Methods take `&self` so that teardown can run while `connect()` is
/// suspended inside one of them.
#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// Declares the control channel. Must precede [`create_local_offer`].
    ///
    /// [`create_local_offer`]: MediaTransport::create_local_offer
    fn create_control_channel(&self, label: &str) -> Result<ControlChannel, SessionError>;

    /// Captures the microphone, builds the offer and commits it locally.
    async fn create_local_offer(&self) -> Result<SessionOffer, SessionError>;

    /// Installs the remote description.
    async fn apply_remote_answer(&self, answer: &SessionAnswer) -> Result<(), SessionError>;

    /// Releases the connection, its tracks and the sink. Idempotent.
    fn close(&self);
}

/// Produces one fresh transport per session.
pub trait TransportFactory: Send + Sync {
    fn create(&self) -> Result<Arc<dyn MediaTransport>, SessionError>;
}

struct PendingChannel {
    label: String,
    endpoint: ChannelEndpoint,
    outbound: mpsc::UnboundedReceiver<String>,
}

struct Fresh {
    rtc: Rtc,
    socket: UdpSocket,
    channel: Option<PendingChannel>,
}

struct Offered {
    rtc: Rtc,
    socket: UdpSocket,
    pending: SdpPendingOffer,
    mid: Mid,
    cid: ChannelId,
    channel: PendingChannel,
    source: Box<dyn AudioSource>,
}

struct Running {
    close: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

enum Phase {
    Fresh(Box<Fresh>),
    Offered(Box<Offered>),
    Running(Running),
    Closed,
}

impl Phase {
    fn name(&self) -> &'static str {
        match self {
            Phase::Fresh(_) => "fresh",
            Phase::Offered(_) => "offered",
            Phase::Running(_) => "running",
            Phase::Closed => "closed",
        }
    }
}

/// str0m-backed [`MediaTransport`].
pub struct Str0mTransport {
    microphone: Arc<dyn Microphone>,
    sink: Arc<dyn AudioSink>,
    local_addr: SocketAddr,
    phase: Mutex<Phase>,
}

impl Str0mTransport {
    pub fn new(
        socket: UdpSocket,
        candidate: Candidate,
        microphone: Arc<dyn Microphone>,
        sink: Arc<dyn AudioSink>,
    ) -> Str0mTransport {
        let local_addr = candidate.addr();
        let mut rtc = Rtc::builder().clear_codecs().enable_opus(true).build();
        rtc.add_local_candidate(candidate);

        Str0mTransport {
            microphone,
            sink,
            local_addr,
            phase: Mutex::new(Phase::Fresh(Box::new(Fresh {
                rtc,
                socket,
                channel: None,
            }))),
        }
    }

    fn phase(&self) -> MutexGuard<'_, Phase> {
        self.phase
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_closed(&self) -> bool {
        matches!(*self.phase(), Phase::Closed)
    }

    /// Builds the offer from a fresh `Rtc`. The phase is restored on failure.
    fn offer(
        &self,
        fresh: Box<Fresh>,
        source: Box<dyn AudioSource>,
    ) -> Result<(Box<Offered>, SessionOffer), (Box<Fresh>, SessionError)> {
        let Fresh {
            mut rtc,
            socket,
            channel,
        } = *fresh;

        let Some(channel) = channel else {
            let err = SessionError::OfferGenerationFailed(
                "control channel must be created before the offer".to_string(),
            );
            return Err((
                Box::new(Fresh {
                    rtc,
                    socket,
                    channel: None,
                }),
                err,
            ));
        };

        let mut change = rtc.sdp_api();
        let mid = change.add_media(MediaKind::Audio, Direction::SendRecv, None, None, None);
        let cid = change.add_channel(channel.label.clone());

        let Some((offer, pending)) = change.apply() else {
            let err = SessionError::OfferGenerationFailed("sdp change produced no offer".into());
            return Err((
                Box::new(Fresh {
                    rtc,
                    socket,
                    channel: Some(channel),
                }),
                err,
            ));
        };

        let sdp = offer.to_sdp_string();
        debug!("Offer SDP:\n{}", sdp);

        let offered = Box::new(Offered {
            rtc,
            socket,
            pending,
            mid,
            cid,
            channel,
            source,
        });
        Ok((offered, SessionOffer::new(sdp)))
    }
}

#[async_trait]
impl MediaTransport for Str0mTransport {
    fn create_control_channel(&self, label: &str) -> Result<ControlChannel, SessionError> {
        let mut phase = self.phase();
        let current = phase.name();
        let Phase::Fresh(fresh) = &mut *phase else {
            return Err(SessionError::OfferGenerationFailed(format!(
                "control channel requested on a {} transport",
                current
            )));
        };
        if fresh.channel.is_some() {
            return Err(SessionError::OfferGenerationFailed(
                "control channel already created".to_string(),
            ));
        }

        let (channel, endpoint, outbound) = ControlChannel::new(label);
        fresh.channel = Some(PendingChannel {
            label: label.to_string(),
            endpoint,
            outbound,
        });
        info!("📝 Requested data channel '{}'", label);
        Ok(channel)
    }

    async fn create_local_offer(&self) -> Result<SessionOffer, SessionError> {
        {
            let phase = self.phase();
            if !matches!(*phase, Phase::Fresh(_)) {
                return Err(SessionError::OfferGenerationFailed(format!(
                    "offer requested on a {} transport",
                    phase.name()
                )));
            }
        }

        // Capture before locking; permission prompts may take a while.
        let source = self.microphone.capture().await?;
        info!("🎙️ Microphone captured");

        let mut phase = self.phase();
        let fresh = match std::mem::replace(&mut *phase, Phase::Closed) {
            Phase::Fresh(fresh) => fresh,
            other => {
                let name = other.name();
                *phase = other;
                return Err(SessionError::OfferGenerationFailed(format!(
                    "transport became {} while capturing",
                    name
                )));
            }
        };

        match self.offer(fresh, source) {
            Ok((offered, offer)) => {
                *phase = Phase::Offered(offered);
                Ok(offer)
            }
            Err((fresh, err)) => {
                *phase = Phase::Fresh(fresh);
                Err(err)
            }
        }
    }

    async fn apply_remote_answer(&self, answer: &SessionAnswer) -> Result<(), SessionError> {
        let mut phase = self.phase();

        let offered = match std::mem::replace(&mut *phase, Phase::Closed) {
            Phase::Offered(offered) => offered,
            Phase::Fresh(fresh) => {
                *phase = Phase::Fresh(fresh);
                return Err(SessionError::InvalidAnswer(
                    "no local offer to answer".to_string(),
                ));
            }
            Phase::Running(running) => {
                *phase = Phase::Running(running);
                return Err(SessionError::InvalidAnswer(
                    "answer already applied".to_string(),
                ));
            }
            Phase::Closed => {
                return Err(SessionError::InvalidAnswer("transport is closed".to_string()));
            }
        };

        let parsed = match SdpAnswer::from_sdp_string(answer.as_str()) {
            Ok(parsed) => parsed,
            Err(e) => {
                *phase = Phase::Offered(offered);
                return Err(SessionError::InvalidAnswer(e.to_string()));
            }
        };

        let Offered {
            mut rtc,
            socket,
            pending,
            mid,
            cid,
            channel,
            source,
        } = *offered;

        if let Err(e) = rtc.sdp_api().accept_answer(pending, parsed) {
            // The pending offer is consumed; this transport cannot be reused.
            channel.endpoint.mark_closed();
            return Err(SessionError::InvalidAnswer(e.to_string()));
        }
        info!("✅ Answer accepted, waiting for ICE connection and channel to open...");

        let (close, close_rx) = oneshot::channel();
        let peer = Peer::new(
            rtc,
            cid,
            channel.endpoint,
            LocalTrack::new(mid),
            self.sink.clone(),
            self.local_addr,
        );
        let links = PeerLinks {
            close: close_rx,
            outbound: channel.outbound,
            source,
        };
        let task = tokio::spawn(peer::run(peer, socket, links));

        *phase = Phase::Running(Running { close, task });
        Ok(())
    }

    fn close(&self) {
        let previous = std::mem::replace(&mut *self.phase(), Phase::Closed);
        match previous {
            Phase::Closed => {}
            Phase::Fresh(fresh) => {
                if let Some(channel) = fresh.channel {
                    channel.endpoint.mark_closed();
                }
                info!("Transport released before offer");
            }
            Phase::Offered(offered) => {
                offered.channel.endpoint.mark_closed();
                info!("Transport released before answer");
            }
            Phase::Running(running) => {
                // The driver closes the channel and detaches the sink on exit.
                if running.close.send(()).is_err() {
                    debug!("Peer driver had already stopped");
                }
                drop(running.task);
                info!("Transport closed");
            }
        }
    }
}

/// Builds a [`Str0mTransport`] per session on a freshly bound UDP socket.
pub struct Str0mTransportFactory {
    bind: Option<IpAddr>,
    microphone: Arc<dyn Microphone>,
    sink: Arc<dyn AudioSink>,
}

impl Str0mTransportFactory {
    pub fn new(
        bind: Option<IpAddr>,
        microphone: Arc<dyn Microphone>,
        sink: Arc<dyn AudioSink>,
    ) -> Str0mTransportFactory {
        Str0mTransportFactory {
            bind,
            microphone,
            sink,
        }
    }
}

impl TransportFactory for Str0mTransportFactory {
    fn create(&self) -> Result<Arc<dyn MediaTransport>, SessionError> {
        let (socket, candidate) = bind_host_socket(self.bind)?;
        Ok(Arc::new(Str0mTransport::new(
            socket,
            candidate,
            self.microphone.clone(),
            self.sink.clone(),
        )))
    }
}
