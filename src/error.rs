use std::fmt;

use crate::types::EventId;

/// Errors surfaced by relay operations.
#[derive(Debug)]
pub enum RelayError {
    /// A durable write or read failed. The in-memory state may be
    /// ahead of the snapshot on disk.
    Store(StoreError),

    /// Lookup or replay named an id the store has never seen.
    EventNotFound { id: EventId },

    /// The relay has been shut down.
    Shutdown,
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayError::Store(err) => write!(f, "storage failure: {err}"),
            RelayError::EventNotFound { id } => write!(f, "unknown event: {}", id.0),
            RelayError::Shutdown => write!(f, "relay is shut down"),
        }
    }
}

impl std::error::Error for RelayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RelayError::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for RelayError {
    fn from(err: StoreError) -> Self {
        RelayError::Store(err)
    }
}

/// Failure while reading or writing the durable snapshot.
#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Serialize(serde_json::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io(err) => write!(f, "snapshot io error: {err}"),
            StoreError::Serialize(err) => write!(f, "snapshot serialization error: {err}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(err) => Some(err),
            StoreError::Serialize(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialize(err)
    }
}

/// Why a single delivery attempt against the gateway failed.
///
/// The retry policy does not distinguish between these variants; all of
/// them are recorded on the event and retried the same way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The gateway answered with a non-success HTTP status.
    Status { status: u16, body: String },

    /// The request never completed: connection refused, DNS failure,
    /// timeout, and so on.
    Transport(String),

    /// No gateway destination is configured.
    NoGateway,
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryError::Status { status, body } => {
                if body.is_empty() {
                    write!(f, "gateway returned HTTP {status}")
                } else {
                    write!(f, "gateway returned HTTP {status}: {body}")
                }
            }
            DeliveryError::Transport(message) => write!(f, "gateway request failed: {message}"),
            DeliveryError::NoGateway => write!(f, "no gateway url configured"),
        }
    }
}

impl std::error::Error for DeliveryError {}
