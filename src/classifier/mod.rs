//! Payload classification
//!
//! A classifier turns one raw inbound payload into the ordered list of alerts
//! it implies. Classification is pure and all-or-nothing: either the complete
//! list is produced, or the call fails and nothing from that payload is
//! relayed.
//!
//! ## Inbound Envelope
//!
//! ```text
//! { "result": { "meta_data": {...}, "data": {...} } }   → InboundResult::Success
//! { "error":  { "meta_data": {...} } }                  → InboundResult::Failure
//! anything else                                          → UnrecognizedPayload
//! ```
//!
//! A `result` or `error` key whose content lacks the expected fields is
//! unrecognized as well.
//!
//! The shape of `meta_data` and `data` is source specific and validated by the
//! concrete classifier.

pub mod github;

use std::fmt;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::alerts::AlertEvent;

pub use github::GitHubClassifier;

/// Errors that can occur while classifying a payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifyError {
    /// Matches neither the `Success` nor the `Failure` shape
    UnrecognizedPayload(String),

    /// The producer announced more new items than it supplied
    MissingItem(usize),
}

impl fmt::Display for ClassifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassifyError::UnrecognizedPayload(msg) => {
                write!(f, "received unexpected data: {}", msg)
            }
            ClassifyError::MissingItem(index) => {
                write!(f, "payload announced item {} but did not supply it", index)
            }
        }
    }
}

impl std::error::Error for ClassifyError {}

/// Validated top-level shape of an inbound monitoring result
#[derive(Debug, Clone, PartialEq)]
pub enum InboundResult<M, D, F> {
    Success { meta_data: M, data: D },
    Failure { meta_data: F },
}

impl<M, D, F> InboundResult<M, D, F>
where
    M: DeserializeOwned,
    D: DeserializeOwned,
    F: DeserializeOwned,
{
    /// Validate an untyped payload into the envelope.
    ///
    /// `result` takes precedence when a payload carries both keys.
    pub fn from_value(payload: &Value) -> Result<Self, ClassifyError> {
        let Some(object) = payload.as_object() else {
            return Err(ClassifyError::UnrecognizedPayload(
                "payload is not a JSON object".to_string(),
            ));
        };

        if let Some(result) = object.get("result") {
            return Ok(InboundResult::Success {
                meta_data: field(result, "meta_data")?,
                data: field(result, "data")?,
            });
        }

        if let Some(error) = object.get("error") {
            return Ok(InboundResult::Failure {
                meta_data: field(error, "meta_data")?,
            });
        }

        Err(ClassifyError::UnrecognizedPayload(
            "expected a `result` or `error` key".to_string(),
        ))
    }
}

fn field<T: DeserializeOwned>(parent: &Value, key: &str) -> Result<T, ClassifyError> {
    let value = parent
        .get(key)
        .ok_or_else(|| ClassifyError::UnrecognizedPayload(format!("missing `{key}`")))?;

    serde_json::from_value(value.clone())
        .map_err(|e| ClassifyError::UnrecognizedPayload(format!("`{key}`: {e}")))
}

/// Classification rule for one monitored source
///
/// Implementations must not perform I/O or keep state between calls.
pub trait Classifier: Send + Sync {
    /// Source name, used to derive routing keys (`alerter.<source>`)
    fn source(&self) -> &str;

    fn classify(&self, payload: &Value) -> Result<Vec<AlertEvent>, ClassifyError>;
}

/// Look up the classification rule for a source name
pub fn classifier_for(source: &str) -> Option<Box<dyn Classifier>> {
    match source {
        github::SOURCE => Some(Box::new(GitHubClassifier)),
        _ => None,
    }
}
