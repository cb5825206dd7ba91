//! BrokerPublisher - drains the relay buffer towards the alert router
//!
//! Entries leave the buffer strictly in FIFO order and only after the broker
//! confirmed them. A head entry the broker refuses blocks everything behind it
//! until a later drain succeeds or overflow evicts it.

use chrono::Utc;
use tracing::{trace, warn};

use crate::buffer::RelayBuffer;
use crate::transport::{Transport, TransportError};

use super::error::RelayError;
use super::messages::RelayStats;

#[derive(Debug, Clone, Copy, Default)]
pub struct BrokerPublisher;

impl BrokerPublisher {
    pub fn new() -> Self {
        Self
    }

    /// Publish buffered entries until the buffer is empty or the broker
    /// refuses one.
    ///
    /// `NotDelivered` is logged and ends the drain with `Ok`; the refused entry
    /// stays at the front. Every other broker error is returned.
    pub async fn drain(
        &self,
        transport: &dyn Transport,
        buffer: &mut RelayBuffer,
        stats: &mut RelayStats,
    ) -> Result<(), RelayError> {
        while let Some(entry) = buffer.peek_front() {
            let body = serde_json::to_vec(&entry.payload)?;

            match transport
                .publish(&entry.exchange, &entry.routing_key, &body)
                .await
            {
                Ok(()) => {
                    trace!("published alert to {}", entry.routing_key);
                    buffer.pop_front();
                    stats.alerts_published += 1;
                    stats.last_published_at = Some(Utc::now());
                }
                Err(TransportError::NotDelivered(reason)) => {
                    warn!(
                        "alert was not delivered ({reason}), {} alerts remain queued",
                        buffer.len()
                    );
                    stats.not_delivered += 1;
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(())
    }
}
