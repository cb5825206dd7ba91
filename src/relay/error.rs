//! Error types for the relay loop

use std::fmt;

use crate::transport::TransportError;

/// Errors that can end a relay loop iteration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// Broker failure, classified by its transport error kind
    Transport(TransportError),

    /// An outbound alert could not be encoded
    Serialization(String),
}

impl RelayError {
    pub fn is_not_delivered(&self) -> bool {
        matches!(self, RelayError::Transport(e) if e.is_not_delivered())
    }

    pub fn is_channel(&self) -> bool {
        matches!(self, RelayError::Transport(e) if e.is_channel())
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, RelayError::Transport(e) if e.is_connection())
    }
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayError::Transport(err) => write!(f, "{}", err),
            RelayError::Serialization(msg) => write!(f, "alert serialization error: {}", msg),
        }
    }
}

impl std::error::Error for RelayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RelayError::Transport(err) => Some(err),
            RelayError::Serialization(_) => None,
        }
    }
}

impl From<TransportError> for RelayError {
    fn from(err: TransportError) -> Self {
        RelayError::Transport(err)
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::Serialization(err.to_string())
    }
}
