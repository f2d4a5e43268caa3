mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use common::{harness, harness_with_timeout, Behavior, FakeIssuer, FakeSignaling, Gate};
use voice_rtc::{ControlEvent, SessionError, SessionState};

#[tokio::test]
async fn connects_and_disconnects_end_to_end() {
    let h = harness(
        FakeIssuer::ok("tok_abc"),
        FakeSignaling::answering("A"),
        Behavior::OpenOnAnswer,
    );
    let mut connected = h.session.subscribe();
    assert!(!*connected.borrow_and_update());

    h.session.connect().await.unwrap();

    assert_eq!(h.session.state(), SessionState::Connected);
    assert!(h.session.is_connected());
    assert!(*connected.borrow_and_update());
    assert_eq!(
        h.signaling.seen.lock().unwrap().clone(),
        Some(("O".to_string(), "tok_abc".to_string()))
    );
    assert_eq!(h.transports.live(), 2);

    h.session.disconnect();

    assert_eq!(h.session.state(), SessionState::Idle);
    assert!(connected.has_changed().unwrap());
    assert!(!*connected.borrow_and_update());
    assert_eq!(h.transports.live(), 0);
    assert_eq!(h.session.last_error(), None);
}

#[tokio::test]
async fn second_connect_is_a_no_op() {
    let h = harness(
        FakeIssuer::ok("tok_abc"),
        FakeSignaling::answering("A"),
        Behavior::OpenOnAnswer,
    );
    h.session.connect().await.unwrap();
    h.session.connect().await.unwrap();

    assert_eq!(h.issuer.calls(), 1);
    assert_eq!(h.signaling.calls(), 1);
    assert_eq!(h.transports.count(), 1);
    assert!(h.session.is_connected());
}

#[tokio::test]
async fn disconnect_is_idempotent() {
    let h = harness(
        FakeIssuer::ok("tok_abc"),
        FakeSignaling::answering("A"),
        Behavior::OpenOnAnswer,
    );
    // Before any connect.
    h.session.disconnect();
    assert_eq!(h.session.state(), SessionState::Idle);

    h.session.connect().await.unwrap();
    let mut connected = h.session.subscribe();
    h.session.disconnect();
    h.session.disconnect();

    assert_eq!(h.session.state(), SessionState::Idle);
    assert!(!*connected.borrow_and_update());
    assert!(!connected.has_changed().unwrap());
    assert_eq!(h.transports.live(), 0);
}

#[tokio::test]
async fn failures_at_every_stage_release_everything() {
    let far_past = Utc::now() - chrono::Duration::minutes(5);
    let cases = vec![
        (
            FakeIssuer::ok("tok_abc"),
            FakeSignaling::answering("A"),
            Behavior::DenyMicrophone,
            SessionError::MediaCaptureDenied("permission refused".into()),
        ),
        (
            FakeIssuer::expiring_at("tok_old", far_past),
            FakeSignaling::answering("A"),
            Behavior::OpenOnAnswer,
            SessionError::CredentialExpired,
        ),
        (
            FakeIssuer::ok("tok_abc"),
            FakeSignaling::rejecting(SessionError::SignalingRejected {
                status: 401,
                body: "invalid token".into(),
            }),
            Behavior::OpenOnAnswer,
            SessionError::SignalingRejected {
                status: 401,
                body: "invalid token".into(),
            },
        ),
        (
            FakeIssuer::ok("tok_abc"),
            FakeSignaling::rejecting(SessionError::NetworkError("connection reset".into())),
            Behavior::OpenOnAnswer,
            SessionError::NetworkError("connection reset".into()),
        ),
        (
            FakeIssuer::ok("tok_abc"),
            FakeSignaling::answering("bad"),
            Behavior::OpenOnAnswer,
            SessionError::InvalidAnswer("unparsable".into()),
        ),
    ];

    for (issuer, signaling, behavior, expected) in cases {
        let h = harness(issuer, signaling, behavior);
        let mut connected = h.session.subscribe();

        assert_eq!(h.session.connect().await, Err(expected.clone()));

        assert_eq!(h.session.state(), SessionState::Idle, "{}", expected);
        assert!(!*connected.borrow_and_update());
        assert_eq!(h.transports.count(), 1, "{}", expected);
        assert_eq!(h.transports.live(), 0, "{}", expected);
        assert_eq!(h.session.last_error(), Some(expected.to_string()));
    }
}

#[tokio::test]
async fn expired_credential_is_never_sent() {
    let h = harness(
        FakeIssuer::expiring_at("tok_old", Utc::now() - chrono::Duration::seconds(1)),
        FakeSignaling::answering("A"),
        Behavior::OpenOnAnswer,
    );
    assert_eq!(h.session.connect().await, Err(SessionError::CredentialExpired));
    assert_eq!(h.signaling.calls(), 0);
}

#[tokio::test]
async fn issuer_failure_creates_no_transport() {
    let h = harness(
        FakeIssuer::failing(SessionError::IssuerUnreachable("500 Internal Server Error".into())),
        FakeSignaling::answering("A"),
        Behavior::OpenOnAnswer,
    );

    let err = h.session.connect().await.unwrap_err();

    assert!(matches!(err, SessionError::IssuerUnreachable(_)));
    assert_eq!(h.transports.count(), 0);
    assert_eq!(h.signaling.calls(), 0);
    assert!(!h.session.is_connected());

    // The session can be retried after a failure.
    assert_eq!(h.session.state(), SessionState::Idle);
    assert!(h.session.connect().await.is_err());
    assert_eq!(h.issuer.calls(), 2);
}

#[tokio::test]
async fn malformed_event_is_skipped_and_order_is_kept() {
    let h = harness(
        FakeIssuer::ok("tok_abc"),
        FakeSignaling::answering("A"),
        Behavior::OpenOnAnswer,
    );
    let mut events = h.session.subscribe_events();
    h.session.connect().await.unwrap();

    let transport = h.transports.last();
    transport.deliver(br#"{"type":"session.created"}"#);
    transport.deliver(b"not json at all");
    transport.deliver(br#"{"type":"response.done","response":{"status":"completed"}}"#);

    let first = events.try_recv().unwrap();
    let second = events.try_recv().unwrap();
    assert_eq!(first.kind(), "session.created");
    assert_eq!(second.kind(), "response.done");
    assert!(second.is_response_done());
    assert!(events.try_recv().is_err());

    assert!(h.session.is_connected());
    assert_eq!(h.session.state(), SessionState::Connected);
}

#[tokio::test]
async fn remote_close_publishes_disconnected() {
    let h = harness(
        FakeIssuer::ok("tok_abc"),
        FakeSignaling::answering("A"),
        Behavior::OpenOnAnswer,
    );
    h.session.connect().await.unwrap();
    let mut connected = h.session.subscribe();
    assert!(*connected.borrow_and_update());

    h.transports.last().remote_close();

    assert!(connected.has_changed().unwrap());
    assert!(!*connected.borrow_and_update());
    assert_eq!(h.session.state(), SessionState::Idle);
    assert!(h.session.last_error().is_some());
    assert_eq!(h.transports.live(), 0);

    // Nothing left to tear down.
    h.session.disconnect();
    assert!(!connected.has_changed().unwrap());
}

#[tokio::test]
async fn disconnect_while_connecting_aborts_the_attempt() {
    let gate = Arc::new(Gate::default());
    let h = harness(
        FakeIssuer::ok("tok_abc"),
        FakeSignaling::gated("A", gate.clone()),
        Behavior::OpenOnAnswer,
    );

    let (result, _) = tokio::join!(h.session.connect(), async {
        gate.entered.notified().await;
        assert_eq!(h.session.state(), SessionState::Connecting);
        h.session.disconnect();
        gate.release.notify_one();
    });

    assert_eq!(result, Err(SessionError::Aborted));
    assert_eq!(h.session.state(), SessionState::Idle);
    assert!(!h.session.is_connected());
    assert_eq!(h.transports.live(), 0);
}

#[tokio::test]
async fn dropped_connect_returns_the_session_to_idle() {
    let gate = Arc::new(Gate::default());
    let h = harness(
        FakeIssuer::ok("tok_abc"),
        FakeSignaling::gated("A", gate.clone()),
        Behavior::OpenOnAnswer,
    );

    // Abandon connect() while it waits on signaling.
    tokio::select! {
        _ = h.session.connect() => panic!("connect finished while signaling was held"),
        _ = gate.entered.notified() => {}
    }

    assert_eq!(h.session.state(), SessionState::Idle);
    assert!(!h.session.is_connected());
    assert_eq!(h.transports.live(), 0);
    assert_eq!(h.session.last_error(), Some(SessionError::Aborted.to_string()));

    // The next connect runs a fresh attempt instead of being ignored.
    gate.release.notify_one();
    h.session.connect().await.unwrap();
    assert!(h.session.is_connected());
    assert_eq!(h.issuer.calls(), 2);
    assert_eq!(h.transports.count(), 2);
}

#[tokio::test]
async fn connect_times_out_when_the_channel_never_opens() {
    let timeout = Duration::from_millis(100);
    let h = harness_with_timeout(
        FakeIssuer::ok("tok_abc"),
        FakeSignaling::answering("A"),
        Behavior::NeverOpen,
        timeout,
    );

    assert_eq!(
        h.session.connect().await,
        Err(SessionError::ConnectTimeout(timeout))
    );
    assert_eq!(h.session.state(), SessionState::Idle);
    assert_eq!(h.transports.live(), 0);
}

#[tokio::test]
async fn events_can_only_be_sent_while_connected() {
    let h = harness(
        FakeIssuer::ok("tok_abc"),
        FakeSignaling::answering("A"),
        Behavior::OpenOnAnswer,
    );
    let event = ControlEvent::new("response.create");

    assert_eq!(h.session.send_event(&event), Err(SessionError::ChannelNotOpen));

    h.session.connect().await.unwrap();
    h.session.send_event(&event).unwrap();
    assert_eq!(
        h.transports.last().sent(),
        vec![r#"{"type":"response.create"}"#.to_string()]
    );

    h.session.disconnect();
    assert_eq!(h.session.send_event(&event), Err(SessionError::ChannelNotOpen));
}

#[tokio::test]
async fn dropping_the_session_releases_the_transport() {
    let h = harness(
        FakeIssuer::ok("tok_abc"),
        FakeSignaling::answering("A"),
        Behavior::OpenOnAnswer,
    );
    h.session.connect().await.unwrap();
    let transports = h.transports.clone();

    drop(h);

    assert_eq!(transports.live(), 0);
}
