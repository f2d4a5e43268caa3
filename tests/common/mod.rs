//! In-memory stand-ins for the issuer, signaling endpoint and media transport.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Notify};

use voice_rtc::broker::CredentialIssuer;
use voice_rtc::channel::{ChannelEndpoint, ControlChannel};
use voice_rtc::signaling::SignalingExchange;
use voice_rtc::transport::{MediaTransport, TransportFactory};
use voice_rtc::{
    Credential, SessionAnswer, SessionError, SessionOffer, SessionOptions, VoiceSession,
};

pub struct FakeIssuer {
    pub calls: AtomicUsize,
    token: String,
    expires_at: Option<DateTime<Utc>>,
    failure: Option<SessionError>,
}

impl FakeIssuer {
    pub fn ok(token: &str) -> FakeIssuer {
        FakeIssuer {
            calls: AtomicUsize::new(0),
            token: token.to_string(),
            expires_at: None,
            failure: None,
        }
    }

    pub fn expiring_at(token: &str, at: DateTime<Utc>) -> FakeIssuer {
        FakeIssuer {
            expires_at: Some(at),
            ..FakeIssuer::ok(token)
        }
    }

    pub fn failing(err: SessionError) -> FakeIssuer {
        FakeIssuer {
            failure: Some(err),
            ..FakeIssuer::ok("")
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialIssuer for FakeIssuer {
    async fn fetch_credential(&self) -> Result<Credential, SessionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.failure {
            Some(err) => Err(err.clone()),
            None => Ok(Credential::new(self.token.clone(), self.expires_at)),
        }
    }
}

/// Rendezvous used to suspend a fake mid-call.
#[derive(Default)]
pub struct Gate {
    pub entered: Notify,
    pub release: Notify,
}

pub struct FakeSignaling {
    pub calls: AtomicUsize,
    /// `(offer, bearer)` of the last exchange.
    pub seen: Mutex<Option<(String, String)>>,
    reply: Result<String, SessionError>,
    gate: Option<Arc<Gate>>,
}

impl FakeSignaling {
    pub fn answering(answer: &str) -> FakeSignaling {
        FakeSignaling {
            calls: AtomicUsize::new(0),
            seen: Mutex::new(None),
            reply: Ok(answer.to_string()),
            gate: None,
        }
    }

    pub fn rejecting(err: SessionError) -> FakeSignaling {
        FakeSignaling {
            reply: Err(err),
            ..FakeSignaling::answering("")
        }
    }

    /// Answers only after the gate is released.
    pub fn gated(answer: &str, gate: Arc<Gate>) -> FakeSignaling {
        FakeSignaling {
            gate: Some(gate),
            ..FakeSignaling::answering(answer)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SignalingExchange for FakeSignaling {
    async fn exchange(
        &self,
        offer: &SessionOffer,
        credential: &Credential,
    ) -> Result<SessionAnswer, SessionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.seen.lock().unwrap() =
            Some((offer.as_str().to_string(), credential.expose().to_string()));
        if let Some(gate) = &self.gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        self.reply.clone().map(SessionAnswer::new)
    }
}

/// How fake transports behave once the answer is applied.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// The control channel opens as soon as the answer is applied.
    OpenOnAnswer,
    /// The control channel never opens.
    NeverOpen,
    /// The offer fails because the microphone is refused.
    DenyMicrophone,
}

pub struct FakeTransport {
    behavior: Behavior,
    closed: AtomicBool,
    endpoint: Mutex<Option<Arc<ChannelEndpoint>>>,
    outbound: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl FakeTransport {
    fn endpoint(&self) -> Option<Arc<ChannelEndpoint>> {
        self.endpoint.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn channel_closed(&self) -> bool {
        self.endpoint().map(|e| e.is_closed()).unwrap_or(true)
    }

    /// An inbound data-channel message from the remote endpoint.
    pub fn deliver(&self, data: &[u8]) {
        if let Some(endpoint) = self.endpoint() {
            endpoint.deliver(data);
        }
    }

    /// The remote endpoint closes the control channel.
    pub fn remote_close(&self) {
        if let Some(endpoint) = self.endpoint() {
            endpoint.mark_closed();
        }
    }

    /// Encoded events the session asked to send.
    pub fn sent(&self) -> Vec<String> {
        let mut sent = Vec::new();
        if let Some(rx) = self.outbound.lock().unwrap().as_mut() {
            while let Ok(text) = rx.try_recv() {
                sent.push(text);
            }
        }
        sent
    }
}

#[async_trait]
impl MediaTransport for FakeTransport {
    fn create_control_channel(&self, label: &str) -> Result<ControlChannel, SessionError> {
        let (channel, endpoint, outbound) = ControlChannel::new(label);
        *self.endpoint.lock().unwrap() = Some(Arc::new(endpoint));
        *self.outbound.lock().unwrap() = Some(outbound);
        Ok(channel)
    }

    async fn create_local_offer(&self) -> Result<SessionOffer, SessionError> {
        if self.behavior == Behavior::DenyMicrophone {
            return Err(SessionError::MediaCaptureDenied("permission refused".into()));
        }
        Ok(SessionOffer::new("O"))
    }

    async fn apply_remote_answer(&self, answer: &SessionAnswer) -> Result<(), SessionError> {
        if answer.as_str() == "bad" {
            return Err(SessionError::InvalidAnswer("unparsable".into()));
        }
        if self.behavior == Behavior::OpenOnAnswer {
            if let Some(endpoint) = self.endpoint() {
                endpoint.mark_open();
            }
        }
        Ok(())
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            if let Some(endpoint) = self.endpoint() {
                endpoint.mark_closed();
            }
        }
    }
}

pub struct FakeTransportFactory {
    behavior: Behavior,
    pub created: Mutex<Vec<Arc<FakeTransport>>>,
}

impl FakeTransportFactory {
    pub fn new(behavior: Behavior) -> FakeTransportFactory {
        FakeTransportFactory {
            behavior,
            created: Mutex::new(Vec::new()),
        }
    }

    pub fn count(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub fn last(&self) -> Arc<FakeTransport> {
        self.created.lock().unwrap().last().cloned().unwrap()
    }

    /// Transports and channels that have not been released.
    pub fn live(&self) -> usize {
        self.created
            .lock()
            .unwrap()
            .iter()
            .map(|t| usize::from(!t.is_closed()) + usize::from(!t.channel_closed()))
            .sum()
    }
}

impl TransportFactory for FakeTransportFactory {
    fn create(&self) -> Result<Arc<dyn MediaTransport>, SessionError> {
        let transport = Arc::new(FakeTransport {
            behavior: self.behavior,
            closed: AtomicBool::new(false),
            endpoint: Mutex::new(None),
            outbound: Mutex::new(None),
        });
        self.created.lock().unwrap().push(transport.clone());
        Ok(transport)
    }
}

pub struct Harness {
    pub issuer: Arc<FakeIssuer>,
    pub signaling: Arc<FakeSignaling>,
    pub transports: Arc<FakeTransportFactory>,
    pub session: VoiceSession,
}

pub fn harness(issuer: FakeIssuer, signaling: FakeSignaling, behavior: Behavior) -> Harness {
    harness_with_timeout(issuer, signaling, behavior, Duration::from_secs(5))
}

pub fn harness_with_timeout(
    issuer: FakeIssuer,
    signaling: FakeSignaling,
    behavior: Behavior,
    connect_timeout: Duration,
) -> Harness {
    let issuer = Arc::new(issuer);
    let signaling = Arc::new(signaling);
    let transports = Arc::new(FakeTransportFactory::new(behavior));
    let session = VoiceSession::new(
        issuer.clone(),
        signaling.clone(),
        transports.clone(),
        SessionOptions {
            channel_label: "oai-events".to_string(),
            connect_timeout,
        },
    );
    Harness {
        issuer,
        signaling,
        transports,
        session,
    }
}
