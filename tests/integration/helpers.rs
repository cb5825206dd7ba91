//! Helper functions for integration tests

use std::future::Future;
use std::time::Duration;

use alerter::{
    alerts::AlertEvent,
    classifier::GitHubClassifier,
    config::Config,
    relay::{PipelineSupervisor, RelayError, RelayHandle, RelayStats},
    transport::{ExchangeKind, MemoryTransport, Transport},
};
use tokio::task::JoinHandle;

pub const SINK_QUEUE: &str = "router_queue";

pub fn create_test_config(buffer_capacity: usize) -> Config {
    Config {
        buffer_capacity,
        ..Config::default()
    }
}

/// Broker with the alert exchange declared, optionally with a queue receiving
/// relayed alerts
pub async fn create_test_transport(with_sink: bool) -> MemoryTransport {
    let transport = MemoryTransport::new();
    transport.connect().await.unwrap();
    transport
        .declare_exchange("alert", ExchangeKind::Topic)
        .await
        .unwrap();
    if with_sink {
        bind_sink(&transport).await;
    }
    transport
}

pub async fn bind_sink(transport: &MemoryTransport) {
    transport.declare_queue(SINK_QUEUE).await.unwrap();
    transport
        .bind_queue(SINK_QUEUE, "alert", "alert_router.#")
        .await
        .unwrap();
}

pub fn spawn_relay(
    config: &Config,
    transport: &MemoryTransport,
) -> (RelayHandle, JoinHandle<Result<RelayStats, RelayError>>) {
    let supervisor =
        PipelineSupervisor::new(config, Box::new(GitHubClassifier), Box::new(transport.clone()));
    RelayHandle::spawn(supervisor, Duration::from_millis(20))
}

/// Spawn a relay and wait until its topology is declared
pub async fn start_relay(
    config: &Config,
    transport: &MemoryTransport,
) -> (RelayHandle, JoinHandle<Result<RelayStats, RelayError>>) {
    let relay = spawn_relay(config, transport);
    eventually(|| transport.confirms_enabled()).await;
    relay
}

pub async fn send_inbound(transport: &MemoryTransport, payload: &serde_json::Value) {
    let body = serde_json::to_vec(payload).unwrap();
    transport
        .inject("alert", "alerter.github", &body)
        .await
        .unwrap();
}

pub async fn relayed_alerts(transport: &MemoryTransport) -> Vec<AlertEvent> {
    transport
        .take_messages(SINK_QUEUE)
        .await
        .iter()
        .map(|body| serde_json::from_slice(body).unwrap())
        .collect()
}

/// Poll `check` until it holds, failing the test after two seconds
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub fn create_release_payload(
    current: i64,
    previous: Option<i64>,
    releases: &[(&str, &str)],
) -> serde_json::Value {
    let releases: serde_json::Map<String, serde_json::Value> = releases
        .iter()
        .enumerate()
        .map(|(i, (name, tag))| {
            (
                i.to_string(),
                serde_json::json!({"release_name": name, "tag_name": tag}),
            )
        })
        .collect();

    serde_json::json!({
        "result": {
            "meta_data": {
                "repo_name": "x",
                "last_monitored": 100,
                "repo_parent_id": "p",
                "repo_id": "r"
            },
            "data": {
                "no_of_releases": {"current": current, "previous": previous},
                "releases": releases
            }
        }
    })
}

pub fn create_failure_payload(repo_name: &str) -> serde_json::Value {
    serde_json::json!({
        "error": {
            "meta_data": {
                "repo_name": repo_name,
                "time": 200,
                "repo_parent_id": "p",
                "repo_id": "r"
            }
        }
    })
}
