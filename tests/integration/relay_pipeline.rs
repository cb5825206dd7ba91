//! Integration tests for the full relay pipeline
//!
//! These tests verify that the components work correctly together:
//! - Inbound result → classification → buffer → confirmed publish
//! - Acknowledgement of every inbound message
//! - Graceful shutdown with a final drain

use alerter::alerts::Severity;
use pretty_assertions::assert_eq;

use crate::helpers::*;

#[tokio::test]
async fn test_release_result_is_relayed_in_order() {
    let transport = create_test_transport(true).await;
    let (handle, task) = start_relay(&create_test_config(100), &transport).await;

    // previous = 1, current = 3: two new releases, not three
    send_inbound(
        &transport,
        &create_release_payload(3, Some(1), &[("a", "v1"), ("b", "v2")]),
    )
    .await;

    eventually(|| async { transport.queue_len(SINK_QUEUE).await == 2 }).await;
    let alerts = relayed_alerts(&transport).await;

    assert_eq!(alerts.len(), 2);
    assert_eq!(alerts[0].message(), "Repo: x has a new release a tagged v1.");
    assert_eq!(alerts[1].message(), "Repo: x has a new release b tagged v2.");
    assert_eq!(transport.acked_count().await, 1);

    handle.shutdown().await;
    let stats = task.await.unwrap().unwrap();
    assert_eq!(stats.alerts_published, 2);
    assert_eq!(stats.messages_acknowledged, 1);
}

#[tokio::test]
async fn test_failure_result_is_relayed_as_error_alert() {
    let transport = create_test_transport(true).await;
    let (handle, task) = start_relay(&create_test_config(100), &transport).await;

    send_inbound(&transport, &create_failure_payload("x")).await;

    eventually(|| async { transport.queue_len(SINK_QUEUE).await == 1 }).await;
    let alerts = relayed_alerts(&transport).await;
    assert_eq!(alerts[0].severity(), Severity::Error);
    assert_eq!(alerts[0].alert_code().code, "github_alert_2");

    handle.shutdown().await;
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_baseline_and_garbage_are_acked_without_alerts() {
    let transport = create_test_transport(true).await;
    let (handle, task) = start_relay(&create_test_config(100), &transport).await;

    send_inbound(&transport, &create_release_payload(7, None, &[])).await;
    send_inbound(&transport, &serde_json::json!({"status": "unknown"})).await;
    send_inbound(&transport, &create_release_payload(2, Some(2), &[])).await;

    eventually(|| async { transport.acked_count().await == 3 }).await;

    let stats = handle.get_stats().await.unwrap();
    assert_eq!(stats.messages_received, 3);
    assert_eq!(stats.classification_failures, 1);
    assert_eq!(stats.alerts_buffered, 0);
    assert!(relayed_alerts(&transport).await.is_empty());

    handle.shutdown().await;
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_partial_release_list_relays_nothing() {
    let transport = create_test_transport(true).await;
    let (handle, task) = start_relay(&create_test_config(100), &transport).await;

    // three announced, only two supplied
    send_inbound(
        &transport,
        &create_release_payload(3, Some(0), &[("a", "v1"), ("b", "v2")]),
    )
    .await;

    eventually(|| async { transport.acked_count().await == 1 }).await;

    let stats = handle.get_stats().await.unwrap();
    assert_eq!(stats.classification_failures, 1);
    assert!(relayed_alerts(&transport).await.is_empty());

    handle.shutdown().await;
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_backlog_is_retried_on_next_message() {
    let transport = create_test_transport(false).await;
    let (handle, task) = start_relay(&create_test_config(100), &transport).await;

    send_inbound(&transport, &create_failure_payload("first")).await;
    eventually(|| async { transport.acked_count().await == 1 }).await;

    let stats = handle.get_stats().await.unwrap();
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.not_delivered, 1);

    bind_sink(&transport).await;
    send_inbound(&transport, &create_failure_payload("second")).await;

    eventually(|| async { transport.queue_len(SINK_QUEUE).await == 2 }).await;
    let alerts = relayed_alerts(&transport).await;
    assert_eq!(alerts[0].message(), "Github page inaccessible first");
    assert_eq!(alerts[1].message(), "Github page inaccessible second");

    handle.shutdown().await;
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_shutdown_attempts_final_drain() {
    let transport = create_test_transport(false).await;
    let (handle, task) = start_relay(&create_test_config(100), &transport).await;

    send_inbound(&transport, &create_failure_payload("x")).await;
    eventually(|| async { transport.acked_count().await == 1 }).await;

    bind_sink(&transport).await;
    handle.shutdown().await;

    let stats = task.await.unwrap().unwrap();
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.alerts_published, 1);
    assert_eq!(transport.queue_len(SINK_QUEUE).await, 1);
    assert!(!transport.is_connected().await);
}

#[tokio::test]
async fn test_dropping_all_handles_stops_relay() {
    let transport = create_test_transport(true).await;
    let (handle, task) = start_relay(&create_test_config(100), &transport).await;

    drop(handle);

    let stats = task.await.unwrap().unwrap();
    assert_eq!(stats.messages_received, 0);
}
