//! In-process topic broker
//!
//! This transport keeps exchanges, queues and bindings in memory. It is useful
//! for:
//! - Testing the relay without a running broker
//! - Replaying recorded monitoring results through the pipeline
//!
//! ## Semantics
//!
//! - Topic bindings support `*` (exactly one word) and `#` (zero or more words)
//! - Publishes are mandatory: an unroutable message is `NotDelivered`
//! - Unacknowledged deliveries are requeued at the front when the connection
//!   drops, like a real broker redelivers them
//! - Faults can be injected to exercise the relay's error handling
//!
//! Clones share the same broker state.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, trace};

use super::{Delivery, ExchangeKind, Transport, TransportError, TransportResult};

#[derive(Debug, Clone)]
struct Message {
    routing_key: String,
    body: Vec<u8>,
}

#[derive(Debug, Clone)]
struct Binding {
    queue: String,
    exchange: String,
    routing_key: String,
    matcher: Regex,
}

#[derive(Debug)]
struct Pending {
    queue: String,
    message: Message,
}

#[derive(Debug, Default)]
struct Broker {
    connected: bool,
    exchanges: HashMap<String, ExchangeKind>,
    queues: HashMap<String, VecDeque<Message>>,
    bindings: Vec<Binding>,
    prefetch: Option<u16>,
    confirms: bool,
    next_tag: u64,
    unacked: HashMap<u64, Pending>,
    acked: usize,
    publish_faults: VecDeque<TransportError>,
    delivery_faults: VecDeque<TransportError>,
}

impl Broker {
    fn ensure_connected(&self) -> TransportResult<()> {
        if self.connected {
            Ok(())
        } else {
            Err(TransportError::Connection("not connected".to_string()))
        }
    }

    /// Route a message into every bound queue, returning how many received it
    fn route(&mut self, exchange: &str, routing_key: &str, body: &[u8]) -> TransportResult<usize> {
        let Some(kind) = self.exchanges.get(exchange).copied() else {
            return Err(TransportError::Channel(format!(
                "NOT_FOUND - no exchange '{exchange}'"
            )));
        };

        let mut targets: Vec<String> = self
            .bindings
            .iter()
            .filter(|b| b.exchange == exchange)
            .filter(|b| match kind {
                ExchangeKind::Direct => b.routing_key == routing_key,
                ExchangeKind::Topic => b.matcher.is_match(routing_key),
            })
            .map(|b| b.queue.clone())
            .collect();
        targets.sort();
        targets.dedup();

        for queue in &targets {
            if let Some(messages) = self.queues.get_mut(queue) {
                messages.push_back(Message {
                    routing_key: routing_key.to_string(),
                    body: body.to_vec(),
                });
            }
        }

        Ok(targets.len())
    }

    fn requeue_unacked(&mut self) {
        let mut pending: Vec<(u64, Pending)> = self.unacked.drain().collect();
        // newest first, so pushing to the front restores the original order
        pending.sort_by(|a, b| b.0.cmp(&a.0));
        for (_, Pending { queue, message }) in pending {
            if let Some(messages) = self.queues.get_mut(&queue) {
                messages.push_front(message);
            }
        }
    }
}

/// Translate an AMQP-style topic pattern into an anchored regex
fn topic_matcher(pattern: &str) -> TransportResult<Regex> {
    let words: Vec<&str> = pattern.split('.').collect();
    let mut expr = String::from("^");

    for (i, word) in words.iter().enumerate() {
        match *word {
            "#" if words.len() == 1 => expr.push_str(".*"),
            "#" if i == 0 => expr.push_str(r"(?:[^.]+\.)*"),
            "#" => expr.push_str(r"(?:\.[^.]+)*"),
            _ => {
                let after_leading_hash = i == 1 && words[0] == "#";
                if i > 0 && !after_leading_hash {
                    expr.push_str(r"\.");
                }
                if *word == "*" {
                    expr.push_str(r"[^.]+");
                } else {
                    expr.push_str(&regex::escape(word));
                }
            }
        }
    }
    expr.push('$');

    Regex::new(&expr).map_err(|e| TransportError::Channel(format!("invalid binding key: {e}")))
}

#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    broker: Arc<Mutex<Broker>>,
    notify: Arc<Notify>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route a message as an upstream producer would, bypassing faults and
    /// connection state. Returns the number of queues it reached.
    pub async fn inject(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
    ) -> TransportResult<usize> {
        let routed = self.broker.lock().await.route(exchange, routing_key, body)?;
        self.notify.notify_waiters();
        Ok(routed)
    }

    /// Make the next publish fail with `error`
    pub async fn fail_next_publish(&self, error: TransportError) {
        self.broker.lock().await.publish_faults.push_back(error);
    }

    /// Make the next delivery attempt fail with `error`
    pub async fn fail_next_delivery(&self, error: TransportError) {
        self.broker.lock().await.delivery_faults.push_back(error);
        self.notify.notify_waiters();
    }

    /// Drop the connection; unacknowledged deliveries are requeued
    pub async fn disconnect(&self) {
        let mut broker = self.broker.lock().await;
        broker.connected = false;
        broker.requeue_unacked();
        drop(broker);
        self.notify.notify_waiters();
    }

    /// Take every ready message from `queue`, as raw bodies
    pub async fn take_messages(&self, queue: &str) -> Vec<Vec<u8>> {
        self.broker
            .lock()
            .await
            .queues
            .get_mut(queue)
            .map(|messages| messages.drain(..).map(|m| m.body).collect())
            .unwrap_or_default()
    }

    pub async fn queue_len(&self, queue: &str) -> usize {
        self.broker
            .lock()
            .await
            .queues
            .get(queue)
            .map_or(0, VecDeque::len)
    }

    pub async fn acked_count(&self) -> usize {
        self.broker.lock().await.acked
    }

    pub async fn unacked_count(&self) -> usize {
        self.broker.lock().await.unacked.len()
    }

    pub async fn prefetch(&self) -> Option<u16> {
        self.broker.lock().await.prefetch
    }

    pub async fn confirms_enabled(&self) -> bool {
        self.broker.lock().await.confirms
    }

    pub async fn binding_count(&self) -> usize {
        self.broker.lock().await.bindings.len()
    }

    pub async fn is_connected(&self) -> bool {
        self.broker.lock().await.connected
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self) -> TransportResult<()> {
        let mut broker = self.broker.lock().await;
        if !broker.connected {
            debug!("in-memory broker: connected");
            broker.connected = true;
        }
        Ok(())
    }

    async fn declare_exchange(&self, name: &str, kind: ExchangeKind) -> TransportResult<()> {
        let mut broker = self.broker.lock().await;
        broker.ensure_connected()?;

        match broker.exchanges.get(name) {
            Some(existing) if *existing != kind => Err(TransportError::Channel(format!(
                "PRECONDITION_FAILED - exchange '{name}' declared with a different type"
            ))),
            Some(_) => Ok(()),
            None => {
                broker.exchanges.insert(name.to_string(), kind);
                Ok(())
            }
        }
    }

    async fn declare_queue(&self, name: &str) -> TransportResult<()> {
        let mut broker = self.broker.lock().await;
        broker.ensure_connected()?;
        broker.queues.entry(name.to_string()).or_default();
        Ok(())
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> TransportResult<()> {
        let mut broker = self.broker.lock().await;
        broker.ensure_connected()?;

        if !broker.queues.contains_key(queue) {
            return Err(TransportError::Channel(format!("NOT_FOUND - no queue '{queue}'")));
        }
        if !broker.exchanges.contains_key(exchange) {
            return Err(TransportError::Channel(format!(
                "NOT_FOUND - no exchange '{exchange}'"
            )));
        }

        let exists = broker
            .bindings
            .iter()
            .any(|b| b.queue == queue && b.exchange == exchange && b.routing_key == routing_key);
        if !exists {
            broker.bindings.push(Binding {
                queue: queue.to_string(),
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
                matcher: topic_matcher(routing_key)?,
            });
        }
        Ok(())
    }

    async fn set_prefetch(&self, count: u16) -> TransportResult<()> {
        let mut broker = self.broker.lock().await;
        broker.ensure_connected()?;
        broker.prefetch = Some(count);
        Ok(())
    }

    async fn confirm_delivery(&self) -> TransportResult<()> {
        let mut broker = self.broker.lock().await;
        broker.ensure_connected()?;
        broker.confirms = true;
        Ok(())
    }

    async fn next_delivery(&self, queue: &str) -> TransportResult<Delivery> {
        loop {
            // registered before inspecting the state so no wakeup is missed
            let notified = self.notify.notified();

            {
                let mut guard = self.broker.lock().await;
                let broker = &mut *guard;
                broker.ensure_connected()?;

                if let Some(error) = broker.delivery_faults.pop_front() {
                    return Err(error);
                }

                if !broker.queues.contains_key(queue) {
                    return Err(TransportError::Channel(format!("NOT_FOUND - no queue '{queue}'")));
                }

                let prefetch = broker.prefetch.map(usize::from).filter(|p| *p > 0);
                let unacked = broker.unacked.len();
                if prefetch.is_none_or(|limit| unacked < limit)
                    && let Some(message) = broker.queues.get_mut(queue).and_then(VecDeque::pop_front)
                {
                    broker.next_tag += 1;
                    let delivery_tag = broker.next_tag;
                    trace!("delivering tag {delivery_tag} from '{queue}'");

                    let delivery = Delivery {
                        delivery_tag,
                        routing_key: message.routing_key.clone(),
                        body: message.body.clone(),
                    };
                    broker.unacked.insert(
                        delivery_tag,
                        Pending {
                            queue: queue.to_string(),
                            message,
                        },
                    );
                    return Ok(delivery);
                }
            }

            notified.await;
        }
    }

    async fn ack(&self, delivery_tag: u64) -> TransportResult<()> {
        let mut broker = self.broker.lock().await;
        broker.ensure_connected()?;

        if broker.unacked.remove(&delivery_tag).is_none() {
            return Err(TransportError::Channel(format!(
                "PRECONDITION_FAILED - unknown delivery tag {delivery_tag}"
            )));
        }
        broker.acked += 1;
        drop(broker);

        // a freed prefetch slot may unblock a waiting consumer
        self.notify.notify_waiters();
        Ok(())
    }

    async fn publish(&self, exchange: &str, routing_key: &str, body: &[u8]) -> TransportResult<()> {
        let mut broker = self.broker.lock().await;
        broker.ensure_connected()?;

        if let Some(error) = broker.publish_faults.pop_front() {
            return Err(error);
        }

        let routed = broker.route(exchange, routing_key, body)?;
        drop(broker);

        if routed == 0 {
            return Err(TransportError::NotDelivered(format!(
                "unroutable message for '{exchange}' with key '{routing_key}'"
            )));
        }

        self.notify.notify_waiters();
        Ok(())
    }

    async fn close(&self) -> TransportResult<()> {
        debug!("in-memory broker: closing connection");
        self.disconnect().await;
        Ok(())
    }
}
