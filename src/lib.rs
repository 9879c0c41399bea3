//! A single-process webhook relay engine.
//!
//! This crate receives asynchronous event notifications from an
//! upstream provider, authenticates them, records them **exactly once**
//! in a durable store, and forwards them to a downstream gateway with
//! bounded retries and a dead-letter fallback.
//!
//! ## Guarantees
//! - Idempotent ingestion: one stored record per logical event
//! - Durable snapshot of every event across restarts
//! - At-least-once forwarding with exponential backoff
//! - Bounded attempts per event, terminal dead-letter state
//! - Sequential outbound delivery (explicit backpressure on the gateway)
//!
//! ## Non-Guarantees
//! - Exactly-once delivery to the gateway
//! - Ordering across different event ids
//! - Multi-process or distributed coordination
//!
//! The HTTP listener in front of ingestion and any CLI bootstrap are
//! callers of this crate, not part of it: they invoke [`Relay::receive`]
//! and the query/replay surface and map outcomes to their own wire
//! formats.

mod error;
mod gateway;
mod identity;
mod relay;
mod signing;
mod storage;
mod storage_file;
mod types;
mod worker;

pub use error::{DeliveryError, RelayError, StoreError};
pub use gateway::{
    Envelope, GatewayTarget, GatewayTransport, HttpGateway, EVENT_ID_HEADER, EVENT_TYPE_HEADER,
    RELAY_SOURCE,
};
pub use identity::{extract_event_id, extract_event_type};
pub use relay::{Relay, RelayConfig};
pub use signing::{
    compute_signature, parse_signature_headers, verify_signature, ParsedSignature, VerifyFailure,
};
pub use storage::{
    EventStore, IngestOutcome, MemorySnapshotStore, SnapshotStore, MAX_PAGE_LIMIT, MAX_PAGE_OFFSET,
};
pub use storage_file::JsonFileStore;
pub use types::{EventId, EventStatus, ReceiveOutcome, RelayStatus, WebhookEvent};
pub use worker::backoff_delay;
