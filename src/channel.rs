//! Control channel
//!
//! An ordered, reliable message channel riding on the media transport. The
//! session holds a cloneable [`ControlChannel`]; the transport holds the matching
//! [`ChannelEndpoint`] and reports open, inbound data and close through it.
//!
//! Observers are invoked on the thread that drives the transport, in arrival
//! order, and never while an internal lock is held.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::error::SessionError;
use crate::model::ControlEvent;

/// `Opening -> Open -> Closed`. `Opening -> Closed` when the transport dies first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Opening,
    Open,
    Closed,
}

type OpenHandler = Box<dyn FnOnce() + Send>;
type CloseHandler = Arc<dyn Fn() + Send + Sync>;
type MessageHandler = Arc<dyn Fn(&ControlEvent) + Send + Sync>;
type ErrorHandler = Arc<dyn Fn(&SessionError) + Send + Sync>;

#[derive(Default)]
struct Observers {
    open: Vec<OpenHandler>,
    close: Vec<CloseHandler>,
    message: Vec<MessageHandler>,
    error: Vec<ErrorHandler>,
}

struct Shared {
    label: String,
    state: watch::Sender<ChannelState>,
    observers: Mutex<Observers>,
}

impl Shared {
    fn observers(&self) -> MutexGuard<'_, Observers> {
        // A panicking observer must not wedge the channel.
        self.observers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// Moves to `next` if the transition is allowed. Returns whether it happened.
    fn transition(&self, next: ChannelState) -> bool {
        self.state.send_if_modified(|current| {
            let allowed = matches!(
                (*current, next),
                (ChannelState::Opening, ChannelState::Open)
                    | (ChannelState::Opening, ChannelState::Closed)
                    | (ChannelState::Open, ChannelState::Closed)
            );
            if allowed {
                *current = next;
            }
            allowed
        })
    }

    fn fire_open(&self) {
        let handlers = std::mem::take(&mut self.observers().open);
        for handler in handlers {
            handler();
        }
    }

    fn fire_close(&self) {
        let handlers = self.observers().close.clone();
        for handler in handlers {
            handler();
        }
    }
}

/// Session-side handle of the control channel.
#[derive(Clone)]
pub struct ControlChannel {
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedSender<String>,
}

impl std::fmt::Debug for ControlChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlChannel")
            .field("label", &self.shared.label)
            .finish_non_exhaustive()
    }
}

/// Transport-side handle of the control channel.
pub struct ChannelEndpoint {
    shared: Arc<Shared>,
}

impl ControlChannel {
    /// Creates a channel in `Opening`. The receiver yields encoded outbound
    /// messages for the transport to write.
    pub fn new(
        label: impl Into<String>,
    ) -> (ControlChannel, ChannelEndpoint, mpsc::UnboundedReceiver<String>) {
        let (state, _) = watch::channel(ChannelState::Opening);
        let shared = Arc::new(Shared {
            label: label.into(),
            state,
            observers: Mutex::new(Observers::default()),
        });
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        let channel = ControlChannel {
            shared: shared.clone(),
            outbound,
        };
        (channel, ChannelEndpoint { shared }, outbound_rx)
    }

    pub fn label(&self) -> &str {
        &self.shared.label
    }

    pub fn state(&self) -> ChannelState {
        self.shared.state()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    pub fn send(&self, event: &ControlEvent) -> Result<(), SessionError> {
        if !self.is_open() {
            return Err(SessionError::ChannelNotOpen);
        }
        self.outbound
            .send(event.to_wire()?)
            .map_err(|_| SessionError::ChannelNotOpen)?;
        debug!("Sent control event '{}' on '{}'", event.kind(), self.label());
        Ok(())
    }

    /// Runs once when the channel opens, immediately if it already has.
    pub fn on_open(&self, handler: impl FnOnce() + Send + 'static) {
        {
            let mut observers = self.shared.observers();
            if self.shared.state() == ChannelState::Opening {
                observers.open.push(Box::new(handler));
                return;
            }
        }
        if self.shared.state() == ChannelState::Open {
            handler();
        }
    }

    pub fn on_close(&self, handler: impl Fn() + Send + Sync + 'static) {
        self.shared.observers().close.push(Arc::new(handler));
    }

    pub fn on_message(&self, handler: impl Fn(&ControlEvent) + Send + Sync + 'static) {
        self.shared.observers().message.push(Arc::new(handler));
    }

    /// Error sink for payloads that could not be parsed.
    pub fn on_error(&self, handler: impl Fn(&SessionError) + Send + Sync + 'static) {
        self.shared.observers().error.push(Arc::new(handler));
    }

    /// Waits until the channel leaves `Opening`.
    pub async fn opened(&self) -> Result<(), SessionError> {
        let mut state = self.shared.state.subscribe();
        let reached = state
            .wait_for(|s| *s != ChannelState::Opening)
            .await
            .map(|s| *s)
            .map_err(|_| SessionError::ChannelClosed)?;
        match reached {
            ChannelState::Open => Ok(()),
            _ => Err(SessionError::ChannelClosed),
        }
    }

    /// Local close. Fires the close observers once; later calls do nothing.
    pub fn close(&self) {
        if self.shared.transition(ChannelState::Closed) {
            info!("Control channel '{}' closed locally", self.label());
            self.shared.fire_close();
        }
    }
}

impl ChannelEndpoint {
    pub fn label(&self) -> &str {
        &self.shared.label
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state() == ChannelState::Closed
    }

    pub fn mark_open(&self) {
        if self.shared.transition(ChannelState::Open) {
            info!("Control channel '{}' open", self.shared.label);
            self.shared.fire_open();
        }
    }

    /// Parses and dispatches one inbound message. Malformed payloads go to the
    /// error observers and leave the channel untouched.
    pub fn deliver(&self, data: &[u8]) {
        if self.shared.state() != ChannelState::Open {
            debug!(
                "Dropping {} bytes on '{}': channel not open",
                data.len(),
                self.shared.label
            );
            return;
        }

        match ControlEvent::from_wire(data) {
            Ok(event) => {
                let handlers = self.shared.observers().message.clone();
                for handler in handlers {
                    handler(&event);
                }
            }
            Err(e) => {
                debug!("Control channel '{}': {}", self.shared.label, e);
                let handlers = self.shared.observers().error.clone();
                for handler in handlers {
                    handler(&e);
                }
            }
        }
    }

    /// Remote or transport-level close.
    pub fn mark_closed(&self) {
        if self.shared.transition(ChannelState::Closed) {
            info!("Control channel '{}' closed by transport", self.shared.label);
            self.shared.fire_close();
        }
    }
}
