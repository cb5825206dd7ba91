//! Broker transport abstraction
//!
//! The relay talks to its message broker only through the [`Transport`] trait.
//! Connection handling, TLS and the wire protocol live behind it.
//!
//! ## Error Classes
//!
//! - **NotDelivered**: a confirmed publish was not accepted (e.g. unroutable)
//! - **Channel**: the channel failed, a fresh one is usable right away
//! - **Connection**: the connection is gone, the caller has to reconnect
//! - **Other**: anything else, fatal for the relay

pub mod memory;

use std::fmt;

use async_trait::async_trait;

pub use memory::MemoryTransport;

/// Result type alias for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The broker did not confirm a publish
    NotDelivered(String),

    /// Channel-level failure, recoverable without reconnecting
    Channel(String),

    /// Connection-level failure
    Connection(String),

    /// Any other broker failure
    Other(String),
}

impl TransportError {
    pub fn is_not_delivered(&self) -> bool {
        matches!(self, TransportError::NotDelivered(_))
    }

    pub fn is_channel(&self) -> bool {
        matches!(self, TransportError::Channel(_))
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, TransportError::Connection(_))
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::NotDelivered(msg) => write!(f, "message was not delivered: {}", msg),
            TransportError::Channel(msg) => write!(f, "channel error: {}", msg),
            TransportError::Connection(msg) => write!(f, "connection error: {}", msg),
            TransportError::Other(msg) => write!(f, "broker error: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    Direct,
    Topic,
}

/// A message pulled from a queue, pending acknowledgement
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub routing_key: String,
    pub body: Vec<u8>,
}

/// Broker operations used by the relay
///
/// All declarations are durable and idempotent: declaring an existing
/// exchange, queue or binding again is a no-op.
///
/// Implementations must be `Send + Sync`; they are driven from a tokio task.
#[async_trait]
pub trait Transport: Send + Sync {
    /// (Re-)establish the connection and open a channel
    async fn connect(&self) -> TransportResult<()>;

    async fn declare_exchange(&self, name: &str, kind: ExchangeKind) -> TransportResult<()>;

    async fn declare_queue(&self, name: &str) -> TransportResult<()>;

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str)
    -> TransportResult<()>;

    /// Limit the number of unacknowledged deliveries handed out
    async fn set_prefetch(&self, count: u16) -> TransportResult<()>;

    /// Enable publisher confirms on the channel
    async fn confirm_delivery(&self) -> TransportResult<()>;

    /// Wait for the next message on `queue`
    ///
    /// The delivery stays unacknowledged until [`Transport::ack`] is called.
    async fn next_delivery(&self, queue: &str) -> TransportResult<Delivery>;

    async fn ack(&self, delivery_tag: u64) -> TransportResult<()>;

    /// Publish a mandatory message and wait for the broker's confirmation
    ///
    /// A message that cannot be routed to any queue fails with
    /// [`TransportError::NotDelivered`].
    async fn publish(&self, exchange: &str, routing_key: &str, body: &[u8])
    -> TransportResult<()>;

    async fn close(&self) -> TransportResult<()>;
}
