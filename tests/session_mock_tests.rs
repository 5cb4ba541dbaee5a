//! Avatar session tests against a local mock avatar server.
//!
//! Each test starts its own server on an ephemeral port, so they can run in
//! parallel.

mod mock_providers;

use std::time::Duration;

use serde_json::json;
use tokio::time::timeout;

use mock_providers::{AvatarMock, MockEvent, Reply};
use waav_avatar::auth::{Credentials, sign_url};
use waav_avatar::core::session::{
    AvatarSession, CompletionSignal, Ctrl, Envelope, SessionFailure, SessionOptions, SessionState,
    StreamOutcome,
};

const APP_ID: &str = "mock-app";
const STREAM_URL: &str = "xrtcs://mock.example.test/stream/1";

fn signed_session(mock: &AvatarMock, options: SessionOptions) -> AvatarSession {
    let credentials = Credentials::new("mock-key", "mock-secret");
    let url = sign_url(&mock.url(), &credentials, "GET").unwrap();
    AvatarSession::new(url, options)
}

fn start_envelope() -> Envelope {
    Envelope::new(APP_ID, Ctrl::Start)
        .with_header_field("scene_id", "scene-1")
        .with_parameter(json!({ "avatar": { "avatar_id": "avatar-1" } }))
}

async fn wait_outcome(signal: &CompletionSignal) -> StreamOutcome {
    timeout(Duration::from_secs(5), signal.wait())
        .await
        .expect("completion signal was not resolved")
}

#[tokio::test]
async fn test_start_resolves_stream_url() {
    let mut mock = AvatarMock::start(vec![Reply::stream_ready(STREAM_URL)]).await;
    let session = signed_session(&mock, SessionOptions::new(APP_ID));

    // start() issued before connect() waits for the connection to open
    let signal = CompletionSignal::new();
    let starter = {
        let session = session.clone();
        let signal = signal.clone();
        tokio::spawn(async move { session.start(&start_envelope(), Some(&signal)).await })
    };

    session.connect().await.unwrap();
    assert_eq!(session.state(), SessionState::Open);
    assert!(session.is_ready());
    starter.await.unwrap().unwrap();

    match mock.next_event().await {
        Some(MockEvent::Handshake(target)) => {
            assert!(target.starts_with("/v1/interact?authorization="));
            assert!(target.contains("&host="));
            assert!(target.contains("&date="));
        }
        other => panic!("expected handshake, got {other:?}"),
    }

    let start = mock.next_text().await;
    assert_eq!(start["header"]["ctrl"], "start");
    assert_eq!(start["header"]["app_id"], APP_ID);
    assert_eq!(start["header"]["scene_id"], "scene-1");
    assert_eq!(start["parameter"]["avatar"]["avatar_id"], "avatar-1");

    assert_eq!(
        wait_outcome(&signal).await,
        StreamOutcome::Ready {
            stream_url: STREAM_URL.to_string()
        }
    );
    assert_eq!(session.stream_url().as_deref(), Some(STREAM_URL));

    session.close().await.unwrap();
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_frames_are_sent_in_order() {
    let mut mock = AvatarMock::start(vec![Reply::stream_ready(STREAM_URL)]).await;
    let session = signed_session(&mock, SessionOptions::new(APP_ID));
    session.connect().await.unwrap();
    session.start(&start_envelope(), None).await.unwrap();

    for i in 0..5 {
        let envelope = Envelope::new(APP_ID, Ctrl::TextDriver)
            .with_payload(json!({ "text": { "content": format!("line {i}") } }));
        assert!(session.send(&envelope).unwrap());
    }

    assert_eq!(mock.next_text().await["header"]["ctrl"], "start");
    for i in 0..5 {
        let frame = mock.next_text().await;
        assert_eq!(frame["header"]["ctrl"], "text_driver");
        assert_eq!(frame["payload"]["text"]["content"], format!("line {i}"));
    }

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_first_outcome_wins() {
    let mut mock = AvatarMock::start(vec![
        Reply::stream_ready(STREAM_URL),
        Reply::error(10110, "invalid app_id"),
    ])
    .await;
    let session = signed_session(&mock, SessionOptions::new(APP_ID));
    session.connect().await.unwrap();

    let signal = CompletionSignal::new();
    session.start(&start_envelope(), Some(&signal)).await.unwrap();

    // 10110 is not a legal close code on the wire
    assert_eq!(
        mock.next_close().await,
        Some((1011, "invalid app_id".to_string()))
    );
    assert!(wait_outcome(&signal).await.is_ready());
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_remote_error_closes_with_server_code() {
    let mut mock = AvatarMock::start(vec![Reply::error(4003, "forbidden")]).await;
    let session = signed_session(&mock, SessionOptions::new(APP_ID));
    session.connect().await.unwrap();

    let signal = CompletionSignal::new();
    session.start(&start_envelope(), Some(&signal)).await.unwrap();

    assert_eq!(
        wait_outcome(&signal).await,
        StreamOutcome::Failed(SessionFailure::Remote {
            code: 4003,
            message: "forbidden".to_string()
        })
    );
    assert_eq!(mock.next_close().await, Some((4003, "forbidden".to_string())));
    assert_eq!(session.state(), SessionState::Closed);
    assert!(!session.is_ready());
    assert!(!session.send(&Envelope::ping(APP_ID)).unwrap());

    // close() after a remote error is a no-op
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_missing_code_is_treated_as_error() {
    let mut mock = AvatarMock::start(vec![Reply::raw(r#"{"header":{"sid":"mock-sid"}}"#)]).await;
    let session = signed_session(&mock, SessionOptions::new(APP_ID));
    session.connect().await.unwrap();

    let signal = CompletionSignal::new();
    session.start(&start_envelope(), Some(&signal)).await.unwrap();

    assert!(matches!(
        wait_outcome(&signal).await,
        StreamOutcome::Failed(SessionFailure::Remote { code: -1, .. })
    ));
    assert_eq!(mock.next_close().await.map(|(code, _)| code), Some(1011));
}

#[tokio::test]
async fn test_malformed_frame_is_skipped() {
    let mock = AvatarMock::start(vec![
        Reply::raw("this is not json"),
        Reply::raw(r#"{"header":{"code":0,"message":"ack"}}"#),
        Reply::stream_ready(STREAM_URL),
    ])
    .await;
    let session = signed_session(&mock, SessionOptions::new(APP_ID));
    session.connect().await.unwrap();

    let signal = CompletionSignal::new();
    session.start(&start_envelope(), Some(&signal)).await.unwrap();

    assert!(wait_outcome(&signal).await.is_ready());
    assert_eq!(session.state(), SessionState::Open);

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_keepalive_sends_pings() {
    let mut mock = AvatarMock::start(vec![Reply::stream_ready(STREAM_URL)]).await;
    let options =
        SessionOptions::new(APP_ID).with_keepalive_interval(Duration::from_millis(100));
    let session = signed_session(&mock, options);
    session.connect().await.unwrap();
    session.start(&start_envelope(), None).await.unwrap();

    assert_eq!(mock.next_text().await["header"]["ctrl"], "start");

    let first = mock.next_text().await;
    let second = mock.next_text().await;
    for ping in [&first, &second] {
        assert_eq!(ping["header"]["ctrl"], "ping");
        assert_eq!(ping["header"]["app_id"], APP_ID);
        assert!(ping.get("parameter").is_none());
        assert!(ping.get("payload").is_none());
    }
    assert_ne!(first["header"]["request_id"], second["header"]["request_id"]);

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_close_sends_normal_closure_and_stops_sending() {
    let mut mock = AvatarMock::start(vec![Reply::stream_ready(STREAM_URL)]).await;
    let options =
        SessionOptions::new(APP_ID).with_keepalive_interval(Duration::from_millis(50));
    let session = signed_session(&mock, options);
    session.connect().await.unwrap();

    let signal = CompletionSignal::new();
    session.start(&start_envelope(), Some(&signal)).await.unwrap();
    assert!(wait_outcome(&signal).await.is_ready());

    session.close().await.unwrap();
    session.close().await.unwrap();
    assert_eq!(session.state(), SessionState::Closed);
    assert!(!session.send(&Envelope::ping(APP_ID)).unwrap());

    assert_eq!(
        mock.next_close().await,
        Some((1000, "Normal closure".to_string()))
    );

    // Nothing is transmitted after the close frame, keepalive included
    tokio::time::sleep(Duration::from_millis(200)).await;
    while let Some(event) = mock.next_event_within(Duration::from_millis(50)).await {
        assert!(
            !matches!(event, MockEvent::Text(_)),
            "unexpected frame after close: {event:?}"
        );
    }
}

#[tokio::test]
async fn test_peer_close_fails_completion() {
    let mock = AvatarMock::start(vec![Reply::Close {
        code: 4000,
        reason: "bye".to_string(),
    }])
    .await;
    let session = signed_session(&mock, SessionOptions::new(APP_ID));
    session.connect().await.unwrap();

    let signal = CompletionSignal::new();
    session.start(&start_envelope(), Some(&signal)).await.unwrap();

    assert_eq!(
        wait_outcome(&signal).await,
        StreamOutcome::Failed(SessionFailure::Closed {
            code: Some(4000),
            reason: "bye".to_string()
        })
    );

    timeout(Duration::from_secs(1), async {
        while session.state() != SessionState::Closed {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert!(!session.send(&Envelope::ping(APP_ID)).unwrap());
}

#[tokio::test]
async fn test_dropped_connection_is_transport_failure() {
    let mut mock = AvatarMock::start(vec![Reply::Drop]).await;
    let session = signed_session(&mock, SessionOptions::new(APP_ID));
    session.connect().await.unwrap();

    let signal = CompletionSignal::new();
    session.start(&start_envelope(), Some(&signal)).await.unwrap();

    let outcome = wait_outcome(&signal).await;
    assert!(
        matches!(
            outcome,
            StreamOutcome::Failed(SessionFailure::Transport(_))
        ),
        "unexpected outcome: {outcome:?}"
    );

    timeout(Duration::from_secs(1), async {
        while session.state() != SessionState::Closed {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert!(!session.is_ready());
    assert!(!session.send(&Envelope::ping(APP_ID)).unwrap());

    // No closing handshake was ever exchanged.
    loop {
        match mock.next_event().await {
            Some(MockEvent::Disconnected) => break,
            Some(MockEvent::Close(frame)) => panic!("unexpected close frame: {frame:?}"),
            Some(_) => continue,
            None => panic!("mock never disconnected"),
        }
    }
}

#[tokio::test]
async fn test_local_close_fails_pending_completion() {
    // Server never announces a stream
    let mock = AvatarMock::start(vec![]).await;
    let session = signed_session(&mock, SessionOptions::new(APP_ID));
    session.connect().await.unwrap();

    let signal = CompletionSignal::new();
    session.start(&start_envelope(), Some(&signal)).await.unwrap();
    session.close().await.unwrap();

    assert!(matches!(
        wait_outcome(&signal).await,
        StreamOutcome::Failed(SessionFailure::Closed {
            code: Some(1000),
            ..
        })
    ));
}
