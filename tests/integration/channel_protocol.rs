//! Communicate-channel protocol behavior.

use super::test_utils::harness;
use nbrequire::comm::{channel_pair, Messenger};
use nbrequire::error::ChannelError;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn engine_start_announces_itself_best_effort() {
    let h = harness();

    let control = h.control;
    let acks = tokio::spawn(async move {
        let mut events = Vec::new();
        // extension_loaded, then targets_registered
        for _ in 0..2 {
            let msg = control.recv().await.unwrap();
            events.push(msg["event"].as_str().unwrap().to_string());
            control.send(json!({ "status": "ok" })).unwrap();
        }
        events
    });

    h.engine.start().await;

    let events = acks.await.unwrap();
    assert_eq!(events, vec!["extension_loaded", "targets_registered"]);
}

#[tokio::test(start_paused = true)]
async fn unreachable_control_process_does_not_block_startup() {
    let h = harness();
    drop(h.control);

    // channel closed: both notifications fail, are logged, and startup
    // still completes
    h.engine.start().await;
}

#[tokio::test(start_paused = true)]
async fn ack_timeout_is_bounded_by_the_configured_deadline() {
    let (comm, _control) = channel_pair("communicate");
    let messenger = Messenger::new(Arc::new(comm), Duration::from_millis(2_000));

    let started = tokio::time::Instant::now();
    let err = messenger.notify("targets_registered", json!({})).await;

    assert!(matches!(err, Err(ChannelError::Timeout(_))));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(2_000));
    assert!(elapsed < Duration::from_millis(2_500));
}
