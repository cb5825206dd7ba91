//! BrokerConsumer - turns inbound monitoring results into buffered alerts
//!
//! ## Message Flow
//!
//! ```text
//! Delivery → decode JSON → classify → ack → RelayBuffer.put → BrokerPublisher.drain
//! ```
//!
//! The inbound message is acknowledged right after classification, before its
//! alerts are delivered. A crash between the ack and a confirmed publish loses
//! the alerts of that one message, but a redelivery can never duplicate them.
//! If the ack itself fails nothing is buffered, so the broker's redelivery is
//! the only copy.

use serde_json::Value;
use tracing::{debug, error, instrument, trace, warn};

use crate::alerts::AlertEvent;
use crate::buffer::{RelayBuffer, RelayEntry};
use crate::classifier::{ClassifyError, Classifier};
use crate::transport::{Delivery, Transport};

use super::error::RelayError;
use super::messages::RelayStats;
use super::publisher::BrokerPublisher;

pub struct BrokerConsumer {
    classifier: Box<dyn Classifier>,

    /// Exchange the derived alerts are published to
    exchange: String,

    /// Routing key of the derived alerts
    routing_key: String,

    publisher: BrokerPublisher,
}

impl BrokerConsumer {
    pub fn new(
        classifier: Box<dyn Classifier>,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        Self {
            classifier,
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            publisher: BrokerPublisher::new(),
        }
    }

    pub fn publisher(&self) -> &BrokerPublisher {
        &self.publisher
    }

    /// Decode and classify a raw message body
    pub fn classify(&self, body: &[u8]) -> Result<Vec<AlertEvent>, ClassifyError> {
        let payload: Value = serde_json::from_slice(body)
            .map_err(|e| ClassifyError::UnrecognizedPayload(format!("invalid JSON: {e}")))?;
        self.classifier.classify(&payload)
    }

    /// Handle one inbound message, then give buffered alerts a chance to go out
    #[instrument(skip_all, fields(source = self.classifier.source(), tag = delivery.delivery_tag))]
    pub async fn on_delivery(
        &self,
        transport: &dyn Transport,
        delivery: Delivery,
        buffer: &mut RelayBuffer,
        stats: &mut RelayStats,
    ) -> Result<(), RelayError> {
        stats.messages_received += 1;
        trace!("processing message from {}", delivery.routing_key);

        let alerts = match self.classify(&delivery.body) {
            Ok(alerts) => {
                debug!("classified {} alerts", alerts.len());
                Some(alerts)
            }
            Err(e) => {
                error!(
                    "error when processing {}: {e}",
                    String::from_utf8_lossy(&delivery.body)
                );
                stats.classification_failures += 1;
                None
            }
        };

        transport.ack(delivery.delivery_tag).await?;
        stats.messages_acknowledged += 1;

        if let Some(alerts) = alerts {
            self.enqueue(alerts, buffer, stats);
        }

        self.publisher.drain(transport, buffer, stats).await
    }

    fn enqueue(&self, alerts: Vec<AlertEvent>, buffer: &mut RelayBuffer, stats: &mut RelayStats) {
        for alert in alerts {
            let entry = RelayEntry {
                exchange: self.exchange.clone(),
                routing_key: self.routing_key.clone(),
                payload: alert,
            };

            if let Some(evicted) = buffer.put(entry) {
                warn!(
                    "relay buffer full, dropped oldest alert: {}",
                    evicted.payload.message()
                );
                stats.alerts_dropped += 1;
            }
            stats.alerts_buffered += 1;
        }
    }
}
