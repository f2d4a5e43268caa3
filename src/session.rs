//! Session state machine
//!
//! [`VoiceSession`] strings the broker, the transport, the signaling exchange and
//! the control channel into one lifecycle:
//!
//! ```text
//! Idle --connect()--> Connecting --channel open--> Connected
//!   ^                     |                           |
//!   +----- any failure ---+                           |
//!   +----- channel closed by peer --------------------+
//!   +----- Disconnecting <--disconnect()--------------+
//! ```
//!
//! At most one live session exists. Its transport and channel are fields of a
//! single [`LiveSession`] value that is taken out wholesale on teardown, so a
//! `disconnect()` racing a suspended `connect()` leaves nothing behind: every
//! `connect()` carries an epoch, teardown bumps it, and the stale `connect()`
//! releases whatever it creates afterwards and returns [`SessionError::Aborted`].

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use crate::broker::CredentialIssuer;
use crate::channel::ControlChannel;
use crate::error::SessionError;
use crate::model::ControlEvent;
use crate::signaling::SignalingExchange;
use crate::transport::{MediaTransport, TransportFactory};

const EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Disconnecting,
}

/// Per-session knobs taken from [`crate::config::ClientConfig`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub channel_label: String,
    pub connect_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            channel_label: "oai-events".to_string(),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// Resources of the one in-flight or established session.
#[derive(Default)]
struct LiveSession {
    transport: Option<Arc<dyn MediaTransport>>,
    channel: Option<ControlChannel>,
}

impl LiveSession {
    /// Channel first, then transport. Both are idempotent.
    fn release(self) {
        if let Some(channel) = self.channel {
            channel.close();
        }
        if let Some(transport) = self.transport {
            transport.close();
        }
    }
}

struct Inner {
    state: SessionState,
    epoch: u64,
    live: Option<LiveSession>,
    last_error: Option<String>,
}

struct Shared {
    inner: Mutex<Inner>,
    connected: watch::Sender<bool>,
    events: broadcast::Sender<ControlEvent>,
}

impl Shared {
    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, connected: bool) {
        self.connected.send_if_modified(|current| {
            let changed = *current != connected;
            *current = connected;
            changed
        });
    }

    /// `Idle -> Connecting`. Returns the new epoch, or `None` if not idle.
    fn begin(&self) -> Option<u64> {
        let mut inner = self.inner();
        if inner.state != SessionState::Idle {
            return None;
        }
        inner.state = SessionState::Connecting;
        inner.epoch += 1;
        inner.live = Some(LiveSession::default());
        inner.last_error = None;
        Some(inner.epoch)
    }

    fn is_current(inner: &Inner, epoch: u64) -> bool {
        inner.epoch == epoch && inner.state == SessionState::Connecting
    }

    fn ensure_current(&self, epoch: u64) -> Result<(), SessionError> {
        if Self::is_current(&self.inner(), epoch) {
            Ok(())
        } else {
            Err(SessionError::Aborted)
        }
    }

    /// Records the transport, or closes it if this connect has been superseded.
    fn attach_transport(
        &self,
        epoch: u64,
        transport: &Arc<dyn MediaTransport>,
    ) -> Result<(), SessionError> {
        {
            let mut inner = self.inner();
            if Self::is_current(&inner, epoch) {
                if let Some(live) = inner.live.as_mut() {
                    live.transport = Some(transport.clone());
                    return Ok(());
                }
            }
        }
        transport.close();
        Err(SessionError::Aborted)
    }

    fn attach_channel(&self, epoch: u64, channel: &ControlChannel) -> Result<(), SessionError> {
        {
            let mut inner = self.inner();
            if Self::is_current(&inner, epoch) {
                if let Some(live) = inner.live.as_mut() {
                    live.channel = Some(channel.clone());
                    return Ok(());
                }
            }
        }
        channel.close();
        Err(SessionError::Aborted)
    }

    /// `Connecting -> Connected`. Called by both the open observer and
    /// `connect()` itself; whichever runs second is a no-op.
    fn promote(&self, epoch: u64) -> Result<(), SessionError> {
        let mut inner = self.inner();
        if inner.epoch != epoch {
            return Err(SessionError::Aborted);
        }
        match inner.state {
            SessionState::Connected => Ok(()),
            SessionState::Connecting => {
                inner.state = SessionState::Connected;
                drop(inner);
                self.publish(true);
                info!("🎉 Session connected");
                Ok(())
            }
            _ => Err(SessionError::Aborted),
        }
    }

    /// `Connecting -> Idle` after a failed step.
    fn abort(&self, epoch: u64, err: &SessionError) {
        let live = {
            let mut inner = self.inner();
            if !Self::is_current(&inner, epoch) {
                return;
            }
            inner.state = SessionState::Idle;
            inner.last_error = Some(err.to_string());
            inner.live.take()
        };

        error!("Connection error ({:?} stage): {}", err.stage(), err);
        if let Some(live) = live {
            live.release();
        }
        self.publish(false);
    }

    /// `Connected -> Idle` when the channel closes without `disconnect()`.
    fn channel_closed(&self, epoch: u64) {
        let live = {
            let mut inner = self.inner();
            if inner.epoch != epoch || inner.state != SessionState::Connected {
                return;
            }
            inner.state = SessionState::Idle;
            inner.last_error = Some("control channel closed by peer".to_string());
            inner.live.take()
        };

        warn!("⚠️ Control channel closed unexpectedly, session disconnected");
        if let Some(live) = live {
            live.release();
        }
        self.publish(false);
    }

    fn channel(&self) -> Option<ControlChannel> {
        let inner = self.inner();
        if inner.state != SessionState::Connected {
            return None;
        }
        inner.live.as_ref().and_then(|live| live.channel.clone())
    }
}

/// Rolls back a `connect()` whose future is dropped before it completes.
struct Attempt<'a> {
    shared: &'a Shared,
    epoch: u64,
    finished: bool,
}

impl Drop for Attempt<'_> {
    fn drop(&mut self) {
        if !self.finished {
            debug!("connect() dropped mid-flight");
            self.shared.abort(self.epoch, &SessionError::Aborted);
        }
    }
}

/// A realtime voice session with a remote conversational endpoint.
pub struct VoiceSession {
    issuer: Arc<dyn CredentialIssuer>,
    signaling: Arc<dyn SignalingExchange>,
    transports: Arc<dyn TransportFactory>,
    options: SessionOptions,
    shared: Arc<Shared>,
}

impl VoiceSession {
    pub fn new(
        issuer: Arc<dyn CredentialIssuer>,
        signaling: Arc<dyn SignalingExchange>,
        transports: Arc<dyn TransportFactory>,
        options: SessionOptions,
    ) -> VoiceSession {
        let (connected, _) = watch::channel(false);
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        VoiceSession {
            issuer,
            signaling,
            transports,
            options,
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: SessionState::Idle,
                    epoch: 0,
                    live: None,
                    last_error: None,
                }),
                connected,
                events,
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.inner().state
    }

    pub fn is_connected(&self) -> bool {
        *self.shared.connected.borrow()
    }

    /// The connected/disconnected signal for the presentation layer.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shared.connected.subscribe()
    }

    /// Inbound control events, in arrival order.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ControlEvent> {
        self.shared.events.subscribe()
    }

    /// Diagnostic for the most recent failed connect or unexpected close.
    pub fn last_error(&self) -> Option<String> {
        self.shared.inner().last_error.clone()
    }

    /// Sends an event to the remote endpoint. Only valid while connected.
    pub fn send_event(&self, event: &ControlEvent) -> Result<(), SessionError> {
        let channel = self.shared.channel().ok_or(SessionError::ChannelNotOpen)?;
        channel.send(event)
    }

    /// Runs credential -> offer -> signaling -> answer -> channel open.
    ///
    /// A no-op returning `Ok` unless the session is idle. On failure every
    /// partially built resource is released and the session is idle again.
    pub async fn connect(&self) -> Result<(), SessionError> {
        let Some(epoch) = self.shared.begin() else {
            debug!("connect() ignored: session is {:?}", self.state());
            return Ok(());
        };
        let mut attempt = Attempt {
            shared: &self.shared,
            epoch,
            finished: false,
        };
        info!("Connecting voice session");

        let result = match tokio::time::timeout(
            self.options.connect_timeout,
            self.establish(epoch),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(SessionError::ConnectTimeout(self.options.connect_timeout)),
        };
        attempt.finished = true;

        match result {
            Ok(()) => Ok(()),
            Err(e) => {
                if self.shared.ensure_current(epoch).is_err() {
                    // disconnect() already tore down whatever this attempt built.
                    debug!("connect() superseded: {}", e);
                    return Err(SessionError::Aborted);
                }
                self.shared.abort(epoch, &e);
                Err(e)
            }
        }
    }

    async fn establish(&self, epoch: u64) -> Result<(), SessionError> {
        let credential = self.issuer.fetch_credential().await?;
        self.shared.ensure_current(epoch)?;

        let transport = self.transports.create()?;
        self.shared.attach_transport(epoch, &transport)?;

        let channel = transport.create_control_channel(&self.options.channel_label)?;
        self.observe(epoch, &channel);
        self.shared.attach_channel(epoch, &channel)?;

        let offer = transport.create_local_offer().await?;
        self.shared.ensure_current(epoch)?;

        if credential.is_expired(Utc::now()) {
            return Err(SessionError::CredentialExpired);
        }
        let answer = self.signaling.exchange(&offer, &credential).await?;
        drop(credential);
        self.shared.ensure_current(epoch)?;

        transport.apply_remote_answer(&answer).await?;
        info!("Answer applied, waiting for control channel");

        channel.opened().await?;
        self.shared.promote(epoch)
    }

    /// Hooks the channel's observers into the state machine.
    fn observe(&self, epoch: u64, channel: &ControlChannel) {
        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        channel.on_open(move || {
            if let Some(shared) = shared.upgrade() {
                let _ = shared.promote(epoch);
            }
        });

        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        channel.on_close(move || {
            if let Some(shared) = shared.upgrade() {
                shared.channel_closed(epoch);
            }
        });

        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        channel.on_message(move |event| {
            debug!("Received event: {}", event.kind());
            if let Some(detail) = event.response_detail() {
                let pretty = serde_json::to_string_pretty(detail).unwrap_or_default();
                info!("RESPONSE.DONE details: {}", pretty);
            }
            if let Some(shared) = shared.upgrade() {
                // No subscribers is fine.
                let _ = shared.events.send(event.clone());
            }
        });

        channel.on_error(|e| warn!("Ignoring control payload: {}", e));
    }

    /// Tears the session down from any state. Idempotent.
    pub fn disconnect(&self) {
        let live = {
            let mut inner = self.shared.inner();
            match inner.state {
                SessionState::Idle | SessionState::Disconnecting => {
                    debug!("disconnect() ignored: session is {:?}", inner.state);
                    return;
                }
                SessionState::Connecting | SessionState::Connected => {
                    inner.state = SessionState::Disconnecting;
                    inner.epoch += 1;
                    inner.live.take()
                }
            }
        };

        if let Some(live) = live {
            live.release();
        }

        self.shared.inner().state = SessionState::Idle;
        self.shared.publish(false);
        info!("Disconnected from voice session");
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}
