use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::types::EventId;

/// Payload fields checked for an event id, in priority order.
const ID_FIELDS: [&str; 3] = ["id", "event_id", "eventId"];

/// Payload fields checked for an event type, in priority order.
const TYPE_FIELDS: [&str; 3] = ["type", "event_type", "eventType"];

/// Prefix for ids derived from the body digest.
const DERIVED_ID_PREFIX: &str = "evt_";

/// Hex characters of the digest kept in a derived id.
const DERIVED_ID_HEX_LEN: usize = 16;

/// Resolve the stable identity of an inbound event.
///
/// If the payload is an object carrying an id field (see [`ID_FIELDS`])
/// whose value is a non-empty string, that value is used verbatim.
/// Otherwise the id is derived deterministically from a SHA-256 digest
/// of the raw body, so byte-identical re-deliveries of an untagged
/// payload collide to the same id and deduplicate.
pub fn extract_event_id(payload: &Value, raw_body: &[u8]) -> EventId {
    if let Some(id) = first_string_field(payload, &ID_FIELDS) {
        return EventId(id);
    }
    let digest = Sha256::digest(raw_body);
    let hex = hex::encode(digest);
    EventId(format!("{DERIVED_ID_PREFIX}{}", &hex[..DERIVED_ID_HEX_LEN]))
}

/// Resolve the optional classification of an inbound event.
pub fn extract_event_type(payload: &Value) -> Option<String> {
    first_string_field(payload, &TYPE_FIELDS)
}

fn first_string_field(payload: &Value, fields: &[&str]) -> Option<String> {
    let object = payload.as_object()?;
    for field in fields {
        if let Some(value) = object.get(*field).and_then(Value::as_str) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}
