//! Whole-upgrade scenarios, driven in-process over real sockets.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use moult_handoff::UpgradeRole;
use moult_sidecar::acquire::{self, Acquisition, ListenerOrigin};
use moult_sidecar::config::SidecarConfig;
use moult_sidecar::server::{self, AppState};

fn test_config(port: u16, handoff_socket: &Path, generation: &str) -> SidecarConfig {
    SidecarConfig {
        generation: generation.to_string(),
        service_port: port,
        handoff_socket: handoff_socket.to_path_buf(),
        serve_delay: Duration::from_millis(1),
        handoff_timeout: Duration::from_secs(5),
        yield_wait: Duration::from_millis(10),
        ..SidecarConfig::default()
    }
}

/// A client that never reuses pooled connections, so requests after the
/// handoff cannot land on a connection the predecessor already closed.
fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .build()
        .unwrap()
}

/// Grab a port that is free right now.
async fn free_port() -> u16 {
    let probe = tokio::net::TcpListener::bind("0.0.0.0:0").await.unwrap();
    probe.local_addr().unwrap().port()
}

#[tokio::test]
async fn standalone_process_serves_its_generation() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(free_port().await, &dir.path().join("handoff.sock"), "1");

    let Acquisition::Serving { listener, origin } =
        acquire::acquire(&config, UpgradeRole::Standalone).await.unwrap()
    else {
        panic!("standalone acquisition must produce a listener");
    };
    assert_eq!(origin, ListenerOrigin::FreshBind);

    let port = listener.local_addr().unwrap().port();
    let state = Arc::new(AppState::new(&config, &listener).unwrap());
    let _serve_done = server::spawn(listener, state);

    let body = client()
        .get(format!("http://127.0.0.1:{port}/serve"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "This is version(1) sidecar");
}

#[tokio::test]
async fn listener_moves_between_generations_without_releasing_the_port() {
    let dir = tempfile::tempdir().unwrap();
    let handoff_socket = dir.path().join("handoff.sock");

    // Old generation, already serving.
    let pred_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = pred_listener.local_addr().unwrap().port();
    let pred_config = test_config(port, &handoff_socket, "1");
    let pred_state = Arc::new(AppState::new(&pred_config, &pred_listener).unwrap());
    let pred_done = server::spawn(pred_listener, pred_state);

    let base = format!("http://127.0.0.1:{port}");
    let client = client();
    let body = client
        .get(format!("{base}/serve"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "This is version(1) sidecar");

    // New generation takes over the listener instead of binding.
    let succ_config = test_config(port, &handoff_socket, "2");
    let Acquisition::Serving { listener, origin } =
        acquire::acquire(&succ_config, UpgradeRole::NewerGeneration)
            .await
            .unwrap()
    else {
        panic!("takeover must produce a listener");
    };
    assert_eq!(origin, ListenerOrigin::TakenOver);
    assert_eq!(listener.local_addr().unwrap().port(), port);

    // The predecessor's service loop wound down cleanly once the
    // listener was relinquished.
    let pred_outcome = pred_done.await.expect("predecessor loop reported");
    assert!(pred_outcome.is_ok());

    // Same port, new generation answering.
    let succ_state = Arc::new(AppState::new(&succ_config, &listener).unwrap());
    let _succ_done = server::spawn(listener, succ_state);
    let body = client
        .get(format!("{base}/serve"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "This is version(2) sidecar");

    // A second transfer request finds no successor waiting and must
    // report failure without killing the process.
    let body = client
        .get(format!("{base}/migrate"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "failed");

    let body = client
        .get(format!("{base}/serve"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "This is version(2) sidecar");
}

#[tokio::test]
async fn dead_predecessor_means_fresh_bind_fallback() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(free_port().await, &dir.path().join("handoff.sock"), "2");
    config.handoff_timeout = Duration::from_millis(200);

    let Acquisition::Serving { listener, origin } =
        acquire::acquire(&config, UpgradeRole::NewerGeneration)
            .await
            .unwrap()
    else {
        panic!("fallback must produce a listener");
    };
    assert_eq!(origin, ListenerOrigin::FreshBind);
    assert_eq!(listener.local_addr().unwrap().port(), config.service_port);
}

#[tokio::test]
async fn stale_older_generation_yields_and_never_binds() {
    let dir = tempfile::tempdir().unwrap();

    // The port stays free the whole time: nothing to conflict with.
    let port = free_port().await;
    let config = test_config(port, &dir.path().join("handoff.sock"), "1");

    let outcome = acquire::acquire(&config, UpgradeRole::OlderGeneration)
        .await
        .unwrap();
    assert!(matches!(outcome, Acquisition::Yielded));

    // The port was never bound by the yielding process.
    let rebind = tokio::net::TcpListener::bind(("0.0.0.0", port)).await;
    assert!(rebind.is_ok());
}
