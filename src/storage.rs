use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::types::{EventId, EventStatus, WebhookEvent};

/// Upper bound applied to `limit` in paged queries.
pub const MAX_PAGE_LIMIT: usize = 500;

/// Upper bound applied to `offset` in paged queries.
pub const MAX_PAGE_OFFSET: usize = 10_000;

/// Durable backend for the event snapshot.
///
/// The store rewrites the full record set on every mutation and reloads
/// it wholesale at startup; backends only need to persist and return a
/// flat document.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Persist the complete record set, replacing any prior snapshot.
    async fn persist(&self, events: &[WebhookEvent]) -> Result<(), StoreError>;

    /// Load the record set. A backend with no prior snapshot returns an
    /// empty set; a backend with an unreadable snapshot logs and does
    /// the same rather than failing startup.
    async fn load(&self) -> Result<Vec<WebhookEvent>, StoreError>;
}

/// In-memory snapshot backend for tests and ephemeral deployments.
#[derive(Default)]
pub struct MemorySnapshotStore {
    snapshot: Mutex<Vec<WebhookEvent>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn persist(&self, events: &[WebhookEvent]) -> Result<(), StoreError> {
        *self.snapshot.lock().await = events.to_vec();
        Ok(())
    }

    async fn load(&self) -> Result<Vec<WebhookEvent>, StoreError> {
        Ok(self.snapshot.lock().await.clone())
    }
}

/// Outcome of an ingestion against the store.
#[derive(Debug, Clone)]
pub enum IngestOutcome {
    /// A new record was created and persisted.
    Inserted(WebhookEvent),

    /// The id was already known; the existing record is returned
    /// untouched. Attempt history is never reset by re-ingestion.
    Duplicate(WebhookEvent),
}

/// Authoritative store of event records.
///
/// The in-memory map is the source of truth; every mutation serializes
/// the full record set to the backend before the mutating call returns.
/// All mutators funnel through one `Mutex`, held across the backend
/// write, so snapshots land in call order and never interleave.
pub struct EventStore {
    inner: Mutex<HashMap<EventId, WebhookEvent>>,
    backend: Arc<dyn SnapshotStore>,
}

impl EventStore {
    pub fn new(backend: Arc<dyn SnapshotStore>) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            backend,
        }
    }

    /// Populate the map from the backend snapshot. Returns the number
    /// of records loaded.
    pub async fn load(&self) -> Result<usize, StoreError> {
        let events = self.backend.load().await?;
        let mut guard = self.inner.lock().await;
        for event in events {
            guard.insert(event.id.clone(), event);
        }
        Ok(guard.len())
    }

    /// Insert a new event, or report the existing record if the id is
    /// already known. Duplicates mutate nothing and skip persistence.
    pub async fn ingest(&self, event: WebhookEvent) -> Result<IngestOutcome, StoreError> {
        let mut guard = self.inner.lock().await;
        if let Some(existing) = guard.get(&event.id) {
            return Ok(IngestOutcome::Duplicate(existing.clone()));
        }
        guard.insert(event.id.clone(), event.clone());
        persist_snapshot(&self.backend, &guard).await?;
        Ok(IngestOutcome::Inserted(event))
    }

    /// Mutate an existing record in place and persist the result.
    /// Returns the updated record, or `None` for an unknown id.
    pub async fn update<F>(&self, id: &EventId, apply: F) -> Result<Option<WebhookEvent>, StoreError>
    where
        F: FnOnce(&mut WebhookEvent),
    {
        let mut guard = self.inner.lock().await;
        let Some(event) = guard.get_mut(id) else {
            return Ok(None);
        };
        apply(event);
        let updated = event.clone();
        persist_snapshot(&self.backend, &guard).await?;
        Ok(Some(updated))
    }

    pub async fn get(&self, id: &EventId) -> Option<WebhookEvent> {
        self.inner.lock().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }

    /// Page through events, most recently received first.
    ///
    /// Out-of-range paging input is clamped rather than rejected:
    /// `limit` to `[1, MAX_PAGE_LIMIT]`, `offset` to `[0, MAX_PAGE_OFFSET]`.
    pub async fn list(
        &self,
        status: Option<EventStatus>,
        limit: usize,
        offset: usize,
    ) -> Vec<WebhookEvent> {
        let limit = limit.clamp(1, MAX_PAGE_LIMIT);
        let offset = offset.min(MAX_PAGE_OFFSET);

        let guard = self.inner.lock().await;
        let mut events: Vec<WebhookEvent> = guard
            .values()
            .filter(|e| status.map_or(true, |s| e.status == s))
            .cloned()
            .collect();
        events.sort_by(|a, b| {
            b.received_at
                .cmp(&a.received_at)
                .then_with(|| a.id.0.cmp(&b.id.0))
        });
        events.into_iter().skip(offset).take(limit).collect()
    }

    /// Events due for a delivery attempt, oldest due date first.
    pub async fn due(&self, now: DateTime<Utc>) -> Vec<WebhookEvent> {
        let guard = self.inner.lock().await;
        let mut events: Vec<WebhookEvent> = guard
            .values()
            .filter(|e| {
                matches!(e.status, EventStatus::Pending | EventStatus::Retrying)
                    && e.next_attempt_at <= now
            })
            .cloned()
            .collect();
        events.sort_by(|a, b| {
            a.next_attempt_at
                .cmp(&b.next_attempt_at)
                .then_with(|| a.id.0.cmp(&b.id.0))
        });
        events
    }
}

async fn persist_snapshot(
    backend: &Arc<dyn SnapshotStore>,
    map: &HashMap<EventId, WebhookEvent>,
) -> Result<(), StoreError> {
    let mut snapshot: Vec<WebhookEvent> = map.values().cloned().collect();
    // Stable on-disk ordering keeps snapshots diffable.
    snapshot.sort_by(|a, b| {
        a.received_at
            .cmp(&b.received_at)
            .then_with(|| a.id.0.cmp(&b.id.0))
    });
    backend.persist(&snapshot).await
}
