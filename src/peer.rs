//! WebRTC peer driver
//!
//! Once signaling has finished, the str0m `Rtc` moves into a [`Peer`] that a
//! spawned task drives. The task pumps four sources into the sans-IO state
//! machine: UDP packets, str0m timeouts, outbound control messages and outbound
//! audio frames. Channel and track events are reported back through the
//! [`ChannelEndpoint`] and the [`AudioSink`].
//!
//! The task ends when the transport is closed, when ICE disconnects, or when
//! the socket fails. On the way out it closes the control channel and detaches
//! the sink, which is how the session learns about peer-initiated closure.

use std::{
    net::SocketAddr,
    sync::Arc,
    time::Instant,
};

use str0m::{
    channel::ChannelId,
    format::Codec,
    media::{Frequency, MediaData, MediaTime},
    net::{Protocol, Receive},
    Event, IceConnectionState, Input, Output, Rtc,
};
use tokio::{
    net::UdpSocket,
    sync::{mpsc, oneshot},
};
use tracing::{debug, info, warn};

use crate::audio::{AudioFrame, AudioSink, AudioSource};
use crate::channel::ChannelEndpoint;
use crate::model::tracks::{LocalTrack, LocalTrackState, RemoteTrack};

/// A negotiated peer connection with one audio m-line and one data channel.
pub struct Peer {
    rtc: Rtc,
    cid: ChannelId,
    channel: ChannelEndpoint,
    local: LocalTrack,
    remote: Option<RemoteTrack>,
    sink: Arc<dyn AudioSink>,
    local_addr: SocketAddr,
}

/// Everything the driver task listens to besides the socket.
pub(crate) struct PeerLinks {
    pub(crate) close: oneshot::Receiver<()>,
    pub(crate) outbound: mpsc::UnboundedReceiver<String>,
    pub(crate) source: Box<dyn AudioSource>,
}

impl Peer {
    pub(crate) fn new(
        rtc: Rtc,
        cid: ChannelId,
        channel: ChannelEndpoint,
        local: LocalTrack,
        sink: Arc<dyn AudioSink>,
        local_addr: SocketAddr,
    ) -> Peer {
        Peer {
            rtc,
            cid,
            channel,
            local,
            remote: None,
            sink,
            local_addr,
        }
    }

    pub fn handle_input(&mut self, input: Input) {
        if !self.rtc.is_alive() {
            return;
        }

        if let Err(e) = self.rtc.handle_input(input) {
            warn!("Peer disconnected: {:?}", e);
            self.rtc.disconnect();
        }
    }

    fn handle_receive(&mut self, data: &[u8], source: SocketAddr) {
        // Parse data to a DatagramRecv, which demultiplexes STUN/DTLS/RTP on one port.
        let Ok(contents) = data.try_into() else {
            debug!("Dropping unrecognised datagram from {}", source);
            return;
        };

        self.handle_input(Input::Receive(
            Instant::now(),
            Receive {
                proto: Protocol::Udp,
                source,
                destination: self.local_addr,
                contents,
            },
        ));
    }

    /// Poll all the output until str0m asks for a timeout. Returns `None` once
    /// the `Rtc` is dead.
    fn poll_until_timeout(&mut self, socket: &UdpSocket) -> Option<Instant> {
        loop {
            if !self.rtc.is_alive() {
                return None;
            }

            match self.rtc.poll_output() {
                Ok(Output::Timeout(t)) => return Some(t),
                Ok(Output::Transmit(transmit)) => {
                    if let Err(e) = socket.try_send_to(&transmit.contents, transmit.destination) {
                        debug!("UDP send to {} failed: {}", transmit.destination, e);
                    }
                }
                Ok(Output::Event(event)) => self.handle_event(event),
                Err(e) => {
                    warn!("Peer poll_output failed: {:?}", e);
                    self.rtc.disconnect();
                    return None;
                }
            }
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::IceConnectionStateChange(state) => {
                info!("🔌 ICE Connection State: {:?}", state);
                if state == IceConnectionState::Disconnected {
                    // No ICE restart; a lost path ends the session.
                    self.rtc.disconnect();
                }
            }
            Event::Connected => {
                info!("✅ Peer connected, microphone track is live");
                self.local.state = LocalTrackState::Open;
            }
            Event::ChannelOpen(cid, label) => {
                if cid == self.cid {
                    debug!("Data channel '{}' ({:?}) is open", label, cid);
                    self.channel.mark_open();
                } else {
                    debug!("Ignoring unexpected data channel '{}'", label);
                }
            }
            Event::ChannelData(data) => {
                if data.id == self.cid {
                    self.channel.deliver(&data.data);
                }
            }
            Event::ChannelClose(cid) => {
                if cid == self.cid {
                    self.channel.mark_closed();
                }
            }
            Event::MediaData(data) => self.handle_media_data_in(data),
            _ => {}
        }
    }

    /// The first inbound packet on the audio m-line binds the remote track.
    fn handle_media_data_in(&mut self, data: MediaData) {
        if data.mid != self.local.mid {
            return;
        }

        if self.remote.is_none() {
            info!("📥 Received remote audio track on {:?}", data.mid);
            let track = RemoteTrack::new(data.mid);
            self.sink.attach(&track);
            self.remote = Some(track);
        }

        if let Some(remote) = self.remote.as_mut() {
            remote.packets += 1;
        }
        self.sink.write(&data.data);
    }

    fn write_control(&mut self, text: String) {
        let Some(mut channel) = self.rtc.channel(self.cid) else {
            warn!("Control message dropped: data channel is gone");
            return;
        };

        if let Err(e) = channel.write(false, text.as_bytes()) {
            warn!("Failed to write control message: {:?}", e);
        }
    }

    fn write_audio(&mut self, frame: AudioFrame) {
        if !self.local.is_open() {
            return;
        }

        let rtp_time = self.local.next_rtp_time(frame.samples);

        let Some(writer) = self.rtc.writer(self.local.mid) else {
            return;
        };

        let Some(pt) = writer
            .payload_params()
            .find(|p| p.spec().codec == Codec::Opus)
            .map(|p| p.pt())
        else {
            return;
        };

        let time = MediaTime::new(rtp_time.into(), Frequency::FORTY_EIGHT_KHZ);
        if let Err(e) = writer.write(pt, Instant::now(), time, frame.data) {
            warn!("Failed to write audio frame: {:?}", e);
            self.rtc.disconnect();
        }
    }

    /// Releases tracks and reports the channel closed. Safe to call repeatedly.
    fn finish(&mut self) {
        self.local.state = LocalTrackState::Ended;
        if self.rtc.is_alive() {
            self.rtc.disconnect();
        }
        self.channel.mark_closed();
        if let Some(remote) = self.remote.take() {
            debug!("Remote track carried {} packets", remote.packets());
            self.sink.detach();
        }
    }
}

/// Drives `peer` until it dies or `links.close` fires.
pub(crate) async fn run(mut peer: Peer, socket: std::net::UdpSocket, mut links: PeerLinks) {
    let socket = match socket
        .set_nonblocking(true)
        .and_then(|_| UdpSocket::from_std(socket))
    {
        Ok(s) => s,
        Err(e) => {
            warn!("Could not register UDP socket: {}", e);
            peer.finish();
            return;
        }
    };

    let mut buf = vec![0; 2000];

    loop {
        let Some(timeout) = peer.poll_until_timeout(&socket) else {
            info!("⚠️ Peer is no longer alive");
            break;
        };
        let deadline = tokio::time::Instant::from_std(timeout);

        tokio::select! {
            _ = &mut links.close => {
                info!("Closing peer connection");
                break;
            }
            received = socket.recv_from(&mut buf) => match received {
                Ok((n, source)) => peer.handle_receive(&buf[..n], source),
                Err(e) => {
                    warn!("UdpSocket read failed: {:?}", e);
                    break;
                }
            },
            Some(text) = links.outbound.recv() => peer.write_control(text),
            Some(frame) = links.source.next_frame() => peer.write_audio(frame),
            _ = tokio::time::sleep_until(deadline) => {
                peer.handle_input(Input::Timeout(Instant::now()));
            }
        }
    }

    peer.finish();
}
