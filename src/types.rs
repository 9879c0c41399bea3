use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::signing::VerifyFailure;

/// Unique identifier for a relayed event.
///
/// This is a strongly-typed wrapper to avoid accidental mixing
/// of event IDs with other string identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub String);

/// Delivery lifecycle state of a stored event.
///
/// `Pending` is the initial state. `Delivered` and `DeadLetter` are
/// terminal; only a manual replay moves an event out of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Retrying,
    Delivered,
    DeadLetter,
}

/// A received webhook event, the only persisted entity.
///
/// `id`, `event_type`, `payload` and `received_at` are immutable after
/// ingestion; the remaining fields are mutated in place by delivery
/// attempts. Events are never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// Globally unique identifier, assigned at ingestion.
    pub id: EventId,

    /// Optional classification of the event.
    #[serde(rename = "type")]
    pub event_type: Option<String>,

    /// Opaque payload as received from the provider.
    pub payload: serde_json::Value,

    /// Timestamp of first ingestion.
    pub received_at: DateTime<Utc>,

    /// Current delivery state.
    pub status: EventStatus,

    /// Number of delivery attempts made so far.
    pub attempt_count: u32,

    /// Description of the most recent failure; cleared on success.
    pub last_error: Option<String>,

    /// When the next automatic attempt is due. Meaningful only while
    /// the event is pending or retrying.
    pub next_attempt_at: DateTime<Utc>,

    /// Timestamp of the most recent delivery attempt.
    pub last_attempt_at: Option<DateTime<Utc>>,

    /// Set exactly once, on first successful delivery.
    pub delivered_at: Option<DateTime<Utc>>,
}

impl WebhookEvent {
    /// Create a fresh event record, due for immediate delivery.
    pub fn new(
        id: EventId,
        event_type: Option<String>,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            event_type,
            payload,
            received_at: now,
            status: EventStatus::Pending,
            attempt_count: 0,
            last_error: None,
            next_attempt_at: now,
            last_attempt_at: None,
            delivered_at: None,
        }
    }
}

/// Result of ingesting a raw inbound webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Signature verification failed. Non-retryable; nothing was stored.
    Unauthorized { reason: VerifyFailure },

    /// The body was not a structurally valid payload.
    BadRequest { reason: String },

    /// An event with this id is already stored. The existing record is
    /// untouched; its current status is reported back.
    Duplicate { id: EventId, status: EventStatus },

    /// A new record was created; delivery was triggered asynchronously.
    Accepted { id: EventId },
}

/// Point-in-time snapshot of relay state.
#[derive(Debug, Clone, Serialize)]
pub struct RelayStatus {
    pub running: bool,
    pub gateway_url: Option<String>,
    pub event_count: usize,
    pub retry_base_ms: u64,
    pub retry_max: u32,
    pub scan_interval_ms: u64,
}
