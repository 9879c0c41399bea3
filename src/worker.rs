use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::error::{DeliveryError, StoreError};
use crate::gateway::{Envelope, GatewayTarget, GatewayTransport};
use crate::storage::EventStore;
use crate::types::{EventId, EventStatus, WebhookEvent};

/// Longest failure description recorded on an event.
const MAX_ERROR_LEN: usize = 512;

/// Shared context for the scan task and manual replay.
pub(crate) struct DeliveryContext {
    pub store: Arc<EventStore>,
    pub transport: Arc<dyn GatewayTransport>,

    /// Destination, mutable at runtime via `set_gateway`.
    pub gateway: RwLock<GatewayTarget>,

    /// Ids with a delivery attempt currently in flight. The periodic
    /// scan and the ingestion-triggered scan race on the same due
    /// events; this guard keeps attempts per id mutually exclusive so
    /// `attempt_count` reflects attempts actually made.
    pub in_flight: Mutex<HashSet<EventId>>,

    pub retry_base: Duration,
    pub retry_max: u32,
    pub gateway_timeout: Duration,
}

/// Removes the claimed id when the attempt finishes, on every exit path.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<EventId>>,
    id: EventId,
}

impl<'a> InFlightGuard<'a> {
    fn try_claim(set: &'a Mutex<HashSet<EventId>>, id: &EventId) -> Option<Self> {
        let mut guard = set.lock().ok()?;
        if !guard.insert(id.clone()) {
            return None;
        }
        Some(Self {
            set,
            id: id.clone(),
        })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.set.lock() {
            guard.remove(&self.id);
        }
    }
}

/// Delay before the next retry, keyed off attempts already made:
/// `retry_base * 2^(attempt_count - 1)`, saturating, with no upper cap.
/// Worst-case time to dead-letter is bounded by `retry_max` instead.
pub fn backoff_delay(retry_base: Duration, attempt_count: u32) -> Duration {
    let base_ms = retry_base.as_millis().min(u64::MAX as u128) as u64;
    let exponent = attempt_count.saturating_sub(1).min(63);
    let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(factor))
}

/// One full due-event scan.
///
/// Selects events whose `next_attempt_at` has passed, oldest due first,
/// and delivers them sequentially: one completed attempt before the
/// next starts, bounding concurrent load on the gateway.
pub(crate) async fn run_scan(ctx: &DeliveryContext) {
    let due = ctx.store.due(Utc::now()).await;
    for event in due {
        if let Err(err) = attempt_delivery(ctx, &event.id).await {
            error!(event_id = %event.id.0, error = %err, "failed to persist delivery state");
        }
    }
}

/// Perform one delivery attempt for an event.
///
/// Returns the record as updated by the attempt, or `None` when the id
/// is unknown, the event is in a terminal state, or another attempt for
/// it is already in flight.
pub(crate) async fn attempt_delivery(
    ctx: &DeliveryContext,
    id: &EventId,
) -> Result<Option<WebhookEvent>, StoreError> {
    let Some(_claim) = InFlightGuard::try_claim(&ctx.in_flight, id) else {
        return Ok(None);
    };

    // The due list is a point-in-time snapshot; by the time the scan
    // reaches an entry, another path may have delivered or dead-lettered
    // it. Terminal states are never re-attempted.
    let eligible = match ctx.store.get(id).await {
        Some(event) => matches!(event.status, EventStatus::Pending | EventStatus::Retrying),
        None => false,
    };
    if !eligible {
        return Ok(None);
    }

    let attempt_at = Utc::now();
    let Some(event) = ctx
        .store
        .update(id, |e| {
            e.attempt_count += 1;
            e.last_attempt_at = Some(attempt_at);
        })
        .await?
    else {
        return Ok(None);
    };

    let (url, token) = {
        let guard = ctx.gateway.read().await;
        (guard.url.clone(), guard.token.clone())
    };

    let result = match url {
        Some(url) => {
            let envelope = Envelope::for_event(&event);
            ctx.transport
                .send(&url, token.as_deref(), &envelope, ctx.gateway_timeout)
                .await
        }
        None => Err(DeliveryError::NoGateway),
    };

    let updated = match result {
        Ok(()) => {
            info!(
                event_id = %event.id.0,
                attempts = event.attempt_count,
                "event delivered"
            );
            ctx.store
                .update(id, |e| {
                    e.status = EventStatus::Delivered;
                    e.delivered_at = Some(Utc::now());
                    e.last_error = None;
                })
                .await?
        }
        Err(err) => {
            let description = bounded_description(&err);
            if event.attempt_count >= ctx.retry_max {
                error!(
                    event_id = %event.id.0,
                    attempts = event.attempt_count,
                    error = %description,
                    "retries exhausted, event dead-lettered"
                );
                ctx.store
                    .update(id, move |e| {
                        e.status = EventStatus::DeadLetter;
                        e.last_error = Some(description);
                    })
                    .await?
            } else {
                let delay = backoff_delay(ctx.retry_base, event.attempt_count);
                warn!(
                    event_id = %event.id.0,
                    attempts = event.attempt_count,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %description,
                    "delivery failed, retry scheduled"
                );
                // Saturated backoff delays can push past the calendar
                // range; park the event at the far end instead of
                // overflowing.
                let next = Utc::now()
                    .checked_add_signed(chrono_delay(delay))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
                ctx.store
                    .update(id, move |e| {
                        e.status = EventStatus::Retrying;
                        e.last_error = Some(description);
                        e.next_attempt_at = next;
                    })
                    .await?
            }
        }
    };

    Ok(updated)
}

fn bounded_description(err: &DeliveryError) -> String {
    let full = err.to_string();
    if full.len() <= MAX_ERROR_LEN {
        return full;
    }
    full.chars().take(MAX_ERROR_LEN).collect()
}

fn chrono_delay(delay: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(delay.as_millis().min(i64::MAX as u128) as i64)
}
