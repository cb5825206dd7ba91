//! Alert relay pipeline
//!
//! ## Architecture Overview
//!
//! ```text
//!  upstream queue (alerter.<source>)
//!          │ next_delivery
//!  ┌───────▼────────┐  classify   ┌──────────────┐
//!  │ BrokerConsumer ├────────────▶│  Classifier  │
//!  └───────┬────────┘             └──────────────┘
//!          │ ack, then put (drop oldest when full)
//!  ┌───────▼────────┐
//!  │  RelayBuffer   │
//!  └───────┬────────┘
//!          │ drain after every message
//!  ┌───────▼────────┐
//!  │BrokerPublisher ├──▶ alert exchange (alert_router.<source>), confirmed
//!  └────────────────┘
//! ```
//!
//! All of it runs inside one [`supervisor::PipelineSupervisor`] loop, so the
//! buffer has exactly one writer and one reader and needs no locking.
//!
//! ## Delivery Guarantees
//!
//! Relay is at-most-once. Alerts are lost, silently, when
//! - the process dies after acknowledging a message and before its alerts
//!   were confirmed downstream
//! - the buffer overflows, which evicts the oldest pending alert, even one the
//!   broker already refused once
//!
//! Alerts are never duplicated by upstream redelivery.

pub mod consumer;
pub mod error;
pub mod messages;
pub mod publisher;
pub mod supervisor;

pub use consumer::BrokerConsumer;
pub use error::RelayError;
pub use messages::{RelayCommand, RelayStats, SupervisorState};
pub use publisher::BrokerPublisher;
pub use supervisor::{PipelineSupervisor, RelayHandle};
