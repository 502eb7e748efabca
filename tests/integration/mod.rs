//! End-to-end tests driving a real [`purespice::Session`] against an
//! in-process mock SPICE server (spec.md §8: handshake, ack window, and
//! the MAIN-channel bootstrap sequence).

mod mocks;

use std::sync::{Arc, Mutex};

use purespice::{ProcessStatus, SessionConfig};

use mocks::{MockMainScript, MockSpiceServer};

#[tokio::test]
async fn connects_and_fires_ready_after_bootstrap() {
    let server = MockSpiceServer::new(MockMainScript::default()).await;
    let port = server.port();
    tokio::spawn(server.serve_one());

    let ready = Arc::new(Mutex::new(false));
    let ready_clone = Arc::clone(&ready);
    let mut config = SessionConfig::new("127.0.0.1", port).with_password("unused");
    config.ready = Some(Box::new(move || {
        *ready_clone.lock().unwrap() = true;
    }));
    let session = purespice::Session::connect(config)
        .await
        .expect("session connects against the mock server");

    // INIT, CHANNELS_LIST, NAME, and UUID each take their own tick through
    // the one-message-per-channel-per-tick process loop.
    for _ in 0..8 {
        if *ready.lock().unwrap() {
            break;
        }
        match session.process(500).await.expect("process tick succeeds") {
            ProcessStatus::Run => {}
            ProcessStatus::Shutdown => panic!("server hung up before bootstrap completed"),
        }
    }

    assert!(*ready.lock().unwrap(), "ready callback never fired");
    assert_eq!(
        session.server_info().name.as_deref(),
        Some("mock-spice-server")
    );

    session.disconnect().await;
}

#[tokio::test]
async fn rejects_empty_host() {
    let config = SessionConfig::new("", 5900);
    let result = purespice::Session::connect(config).await;
    assert!(result.is_err());
}
