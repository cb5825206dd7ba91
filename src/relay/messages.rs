//! Message types for controlling a running relay
//!
//! Commands travel over an mpsc channel into the supervisor task; replies come
//! back on oneshot channels.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;

/// Commands that can be sent to a running PipelineSupervisor
#[derive(Debug)]
pub enum RelayCommand {
    /// Get a snapshot of the relay counters
    GetStats {
        respond_to: oneshot::Sender<RelayStats>,
    },

    /// Stop consuming, try a final drain and release the connection
    ///
    /// Observed between messages; an in-flight message is finished first.
    Shutdown,
}

/// Lifecycle of the consumption loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
    Initializing,
    Running,
    Terminating,
    Stopped,
}

/// Relay counters
///
/// Alerts dropped by buffer overflow are counted here and nowhere else: that
/// loss is accepted, not an error.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RelayStats {
    /// Inbound messages pulled from the broker
    pub messages_received: u64,

    /// Inbound messages acknowledged
    pub messages_acknowledged: u64,

    /// Inbound messages that yielded no alerts because classification failed
    pub classification_failures: u64,

    /// Alerts placed into the relay buffer
    pub alerts_buffered: u64,

    /// Alerts confirmed by the downstream exchange
    pub alerts_published: u64,

    /// Alerts evicted from a full relay buffer before delivery
    pub alerts_dropped: u64,

    /// Publish attempts the broker did not confirm
    pub not_delivered: u64,

    /// Channel errors recovered by re-entering the loop
    pub channel_errors: u64,

    /// Alerts currently waiting in the buffer
    pub pending: usize,

    /// Time of the last confirmed publish
    pub last_published_at: Option<DateTime<Utc>>,
}
