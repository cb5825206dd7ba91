//! Integration tests for broker failures
//!
//! These tests verify the supervisor's recovery rules:
//! - Channel errors are retried immediately
//! - Connection errors restart the loop after reconnecting
//! - Other errors stop the relay
//! - Lost alerts are counted, never duplicated

use alerter::{relay::RelayError, transport::TransportError};
use assert_matches::assert_matches;
use pretty_assertions::assert_eq;

use crate::helpers::*;

#[tokio::test]
async fn test_channel_error_on_delivery_is_retried() {
    let transport = create_test_transport(true).await;
    let (handle, task) = start_relay(&create_test_config(100), &transport).await;

    transport
        .fail_next_delivery(TransportError::Channel("channel closed".to_string()))
        .await;
    send_inbound(&transport, &create_failure_payload("x")).await;

    eventually(|| async { transport.queue_len(SINK_QUEUE).await == 1 }).await;

    let stats = handle.get_stats().await.unwrap();
    assert_eq!(stats.channel_errors, 1);

    handle.shutdown().await;
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_channel_error_on_publish_keeps_alert_queued() {
    let transport = create_test_transport(true).await;
    let (handle, task) = start_relay(&create_test_config(100), &transport).await;

    transport
        .fail_next_publish(TransportError::Channel("channel closed".to_string()))
        .await;
    send_inbound(&transport, &create_failure_payload("first")).await;
    eventually(|| async { transport.acked_count().await == 1 }).await;

    let stats = handle.get_stats().await.unwrap();
    assert_eq!(stats.pending, 1);

    send_inbound(&transport, &create_failure_payload("second")).await;
    eventually(|| async { transport.queue_len(SINK_QUEUE).await == 2 }).await;

    let alerts = relayed_alerts(&transport).await;
    assert_eq!(alerts[0].message(), "Github page inaccessible first");

    handle.shutdown().await;
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_connection_loss_reconnects_and_resubscribes() {
    let transport = create_test_transport(true).await;
    let (handle, task) = start_relay(&create_test_config(100), &transport).await;

    transport.disconnect().await;
    eventually(|| transport.is_connected()).await;

    send_inbound(&transport, &create_failure_payload("x")).await;
    eventually(|| async { transport.queue_len(SINK_QUEUE).await == 1 }).await;

    handle.shutdown().await;
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_acked_message_is_not_redelivered_after_connection_loss() {
    let transport = create_test_transport(false).await;
    let (handle, task) = start_relay(&create_test_config(100), &transport).await;

    // the alert cannot be routed yet, it waits in the relay buffer
    send_inbound(&transport, &create_failure_payload("first")).await;
    eventually(|| async { transport.acked_count().await == 1 }).await;

    transport.disconnect().await;
    eventually(|| transport.is_connected()).await;
    assert_eq!(transport.queue_len("github_alerter_queue").await, 0);

    bind_sink(&transport).await;
    send_inbound(&transport, &create_failure_payload("second")).await;

    eventually(|| async { transport.queue_len(SINK_QUEUE).await == 2 }).await;
    let messages: Vec<String> = relayed_alerts(&transport)
        .await
        .iter()
        .map(|a| a.message().to_string())
        .collect();
    assert_eq!(
        messages,
        vec![
            "Github page inaccessible first".to_string(),
            "Github page inaccessible second".to_string()
        ]
    );

    handle.shutdown().await;
    let stats = task.await.unwrap().unwrap();
    assert_eq!(stats.messages_received, 2);
}

#[tokio::test]
async fn test_overflow_evicts_alert_still_awaiting_delivery() {
    let transport = create_test_transport(false).await;
    let (handle, task) = start_relay(&create_test_config(2), &transport).await;

    for repo in ["a", "b", "c"] {
        send_inbound(&transport, &create_failure_payload(repo)).await;
    }
    eventually(|| async { transport.acked_count().await == 3 }).await;

    let stats = handle.get_stats().await.unwrap();
    assert_eq!(stats.pending, 2);
    assert_eq!(stats.alerts_dropped, 1);

    bind_sink(&transport).await;
    send_inbound(&transport, &serde_json::json!({"nothing": "to classify"})).await;

    eventually(|| async { transport.queue_len(SINK_QUEUE).await == 2 }).await;
    let messages: Vec<String> = relayed_alerts(&transport)
        .await
        .iter()
        .map(|a| a.message().to_string())
        .collect();
    // "a" was the stalled head and was evicted
    assert_eq!(
        messages,
        vec![
            "Github page inaccessible b".to_string(),
            "Github page inaccessible c".to_string()
        ]
    );

    handle.shutdown().await;
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_unexpected_broker_error_stops_relay() {
    let transport = create_test_transport(true).await;
    let (_handle, task) = start_relay(&create_test_config(100), &transport).await;

    transport
        .fail_next_delivery(TransportError::Other("ACCESS_REFUSED".to_string()))
        .await;

    let result = task.await.unwrap();
    assert_matches!(
        result,
        Err(RelayError::Transport(TransportError::Other(_)))
    );
}

#[tokio::test]
async fn test_shutdown_during_reconnect() {
    let transport = create_test_transport(true).await;
    let (handle, task) = start_relay(&create_test_config(100), &transport).await;

    transport.disconnect().await;
    handle.shutdown().await;

    let result = task.await.unwrap();
    assert!(result.is_ok());
}
