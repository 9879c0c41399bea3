use std::collections::HashSet;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::info;

use crate::error::RelayError;
use crate::gateway::{GatewayTarget, GatewayTransport, HttpGateway};
use crate::identity::{extract_event_id, extract_event_type};
use crate::signing::{parse_signature_headers, verify_signature};
use crate::storage::{EventStore, IngestOutcome, SnapshotStore};
use crate::types::{EventId, EventStatus, ReceiveOutcome, RelayStatus, WebhookEvent};
use crate::worker::{attempt_delivery, run_scan, DeliveryContext};

/// Relay configuration. Gateway fields are additionally mutable at
/// runtime via [`Relay::set_gateway`]; everything else is fixed per
/// instance.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Shared secret for inbound signature verification.
    pub secret: Option<String>,

    /// Accept unsigned requests when no secret is configured.
    pub allow_unsigned: bool,

    /// Maximum tolerated distance between the signed timestamp and now.
    pub max_skew_ms: i64,

    /// Inbound signature header name.
    pub signature_header: String,

    /// Inbound timestamp header name.
    pub timestamp_header: String,

    /// Base delay for exponential backoff between delivery attempts.
    pub retry_base: Duration,

    /// Attempts after which an event is dead-lettered.
    pub retry_max: u32,

    /// How often the scheduled scan looks for due events.
    pub scan_interval: Duration,

    /// Downstream gateway destination.
    pub gateway_url: Option<String>,

    /// Bearer token attached to gateway calls when present.
    pub gateway_token: Option<String>,

    /// Per-attempt timeout for gateway calls.
    pub gateway_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            secret: None,
            allow_unsigned: false,
            max_skew_ms: 5 * 60 * 1000,
            signature_header: "X-Webhook-Signature".to_string(),
            timestamp_header: "X-Webhook-Timestamp".to_string(),
            retry_base: Duration::from_secs(10),
            retry_max: 5,
            scan_interval: Duration::from_secs(30),
            gateway_url: None,
            gateway_token: None,
            gateway_timeout: Duration::from_secs(10),
        }
    }
}

impl RelayConfig {
    /// Set the webhook secret used for inbound verification.
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// Allow unsigned requests when no secret is configured.
    pub fn with_allow_unsigned(mut self, allow: bool) -> Self {
        self.allow_unsigned = allow;
        self
    }

    /// Set the maximum tolerated clock skew in milliseconds.
    pub fn with_max_skew_ms(mut self, max_skew_ms: i64) -> Self {
        self.max_skew_ms = max_skew_ms;
        self
    }

    /// Customize signature header.
    pub fn with_signature_header(mut self, header: impl Into<String>) -> Self {
        self.signature_header = header.into();
        self
    }

    /// Customize timestamp header.
    pub fn with_timestamp_header(mut self, header: impl Into<String>) -> Self {
        self.timestamp_header = header.into();
        self
    }

    /// Set the retry policy: base backoff delay and attempt ceiling.
    pub fn with_retry_policy(mut self, retry_base: Duration, retry_max: u32) -> Self {
        self.retry_base = retry_base;
        self.retry_max = retry_max;
        self
    }

    /// Set the scheduled scan interval.
    pub fn with_scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval = interval;
        self
    }

    /// Set the initial gateway destination.
    pub fn with_gateway(mut self, url: impl Into<String>) -> Self {
        self.gateway_url = Some(url.into());
        self
    }

    /// Set the gateway bearer token.
    pub fn with_gateway_token(mut self, token: impl Into<String>) -> Self {
        self.gateway_token = Some(token.into());
        self
    }

    /// Set the per-attempt gateway timeout.
    pub fn with_gateway_timeout(mut self, timeout: Duration) -> Self {
        self.gateway_timeout = timeout;
        self
    }
}

/// The webhook relay engine.
///
/// Receives raw inbound webhooks, authenticates and records them
/// exactly once, and drives them to the downstream gateway through the
/// retry state machine. One instance owns its durable store; there is
/// no cross-process coordination.
pub struct Relay {
    ctx: Arc<DeliveryContext>,
    config: RelayConfig,
    is_running: Arc<AtomicBool>,
    notify: Arc<Notify>,
    scan_handle: Option<JoinHandle<()>>,
}

impl Relay {
    /// Load the store and start the scan task, delivering over HTTP.
    pub async fn start(
        config: RelayConfig,
        backend: Arc<dyn SnapshotStore>,
    ) -> Result<Self, RelayError> {
        Self::start_with_transport(config, backend, Arc::new(HttpGateway::new())).await
    }

    /// As [`Relay::start`], with a caller-supplied transport.
    pub async fn start_with_transport(
        config: RelayConfig,
        backend: Arc<dyn SnapshotStore>,
        transport: Arc<dyn GatewayTransport>,
    ) -> Result<Self, RelayError> {
        let store = Arc::new(EventStore::new(backend));
        let loaded = store.load().await?;
        if loaded > 0 {
            info!(events = loaded, "loaded event snapshot");
        }

        let ctx = Arc::new(DeliveryContext {
            store,
            transport,
            gateway: RwLock::new(GatewayTarget {
                url: config.gateway_url.clone(),
                token: config.gateway_token.clone(),
            }),
            in_flight: Mutex::new(HashSet::new()),
            retry_base: config.retry_base,
            retry_max: config.retry_max,
            gateway_timeout: config.gateway_timeout,
        });

        let is_running = Arc::new(AtomicBool::new(true));
        let notify = Arc::new(Notify::new());

        let scan_ctx = ctx.clone();
        let scan_running = is_running.clone();
        let scan_notify = notify.clone();
        let scan_interval = config.scan_interval;

        // Periodic scan plus an explicit "run now" kick from ingestion;
        // both paths funnel through the same per-event exclusion guard.
        let scan_handle = tokio::spawn(async move {
            loop {
                if !scan_running.load(Ordering::SeqCst) {
                    break;
                }
                run_scan(&scan_ctx).await;
                tokio::select! {
                    _ = scan_notify.notified() => {}
                    _ = tokio::time::sleep(scan_interval) => {}
                }
            }
        });

        Ok(Self {
            ctx,
            config,
            is_running,
            notify,
            scan_handle: Some(scan_handle),
        })
    }

    /// Ingest a raw inbound webhook.
    ///
    /// Runs verification, identity resolution and dedup in sequence.
    /// An accepted event is persisted and queued for asynchronous
    /// delivery; this call never waits for the delivery itself.
    pub async fn receive<'a, I>(
        &self,
        raw_body: &[u8],
        headers: I,
    ) -> Result<ReceiveOutcome, RelayError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(RelayError::Shutdown);
        }

        let parsed = parse_signature_headers(
            headers,
            &self.config.signature_header,
            &self.config.timestamp_header,
        );
        if let Err(reason) = verify_signature(
            raw_body,
            parsed.signature.as_deref(),
            parsed.timestamp.as_deref(),
            self.config.secret.as_deref(),
            self.config.allow_unsigned,
            self.config.max_skew_ms,
            Utc::now().timestamp_millis(),
        ) {
            return Ok(ReceiveOutcome::Unauthorized { reason });
        }

        let payload: serde_json::Value = match serde_json::from_slice(raw_body) {
            Ok(value) => value,
            Err(err) => {
                return Ok(ReceiveOutcome::BadRequest {
                    reason: format!("invalid JSON payload: {err}"),
                })
            }
        };

        let id = extract_event_id(&payload, raw_body);
        let event_type = extract_event_type(&payload);
        let event = WebhookEvent::new(id, event_type, payload, Utc::now());

        match self.ctx.store.ingest(event).await? {
            IngestOutcome::Duplicate(existing) => Ok(ReceiveOutcome::Duplicate {
                id: existing.id,
                status: existing.status,
            }),
            IngestOutcome::Inserted(event) => {
                info!(event_id = %event.id.0, "webhook accepted");
                self.notify.notify_one();
                Ok(ReceiveOutcome::Accepted { id: event.id })
            }
        }
    }

    /// Page through stored events, most recently received first.
    pub async fn list_events(
        &self,
        status: Option<EventStatus>,
        limit: usize,
        offset: usize,
    ) -> Vec<WebhookEvent> {
        self.ctx.store.list(status, limit, offset).await
    }

    /// Point lookup of a stored event.
    pub async fn get_event(&self, id: &EventId) -> Option<WebhookEvent> {
        self.ctx.store.get(id).await
    }

    /// Force an event back to `pending` and attempt one delivery.
    ///
    /// The attempt history survives the replay: `attempt_count` is
    /// deliberately not reset, so a replayed dead-letter keeps its
    /// record of past failures.
    pub async fn replay_event(&self, id: &EventId) -> Result<WebhookEvent, RelayError> {
        let reset_at = Utc::now();
        let reset = self
            .ctx
            .store
            .update(id, |e| {
                e.status = EventStatus::Pending;
                e.last_error = None;
                e.next_attempt_at = reset_at;
            })
            .await?;
        let Some(reset) = reset else {
            return Err(RelayError::EventNotFound { id: id.clone() });
        };

        info!(event_id = %id.0, "manual replay requested");
        match attempt_delivery(&self.ctx, id).await? {
            Some(updated) => Ok(updated),
            // Another attempt was already in flight; report the reset record.
            None => Ok(reset),
        }
    }

    /// Update the gateway destination and credential at runtime.
    ///
    /// Values are trimmed; each field only overwrites the current one
    /// when provided non-empty.
    pub async fn set_gateway(&self, url: Option<&str>, token: Option<&str>) {
        let mut guard = self.ctx.gateway.write().await;
        if let Some(url) = url {
            let url = url.trim();
            if !url.is_empty() {
                guard.url = Some(url.to_string());
            }
        }
        if let Some(token) = token {
            let token = token.trim();
            if !token.is_empty() {
                guard.token = Some(token.to_string());
            }
        }
        info!(gateway_url = guard.url.as_deref().unwrap_or("<unset>"), "gateway reconfigured");
    }

    /// Point-in-time snapshot of relay state.
    pub async fn status(&self) -> RelayStatus {
        let gateway_url = self.ctx.gateway.read().await.url.clone();
        RelayStatus {
            running: self.is_running.load(Ordering::SeqCst),
            gateway_url,
            event_count: self.ctx.store.len().await,
            retry_base_ms: self.config.retry_base.as_millis() as u64,
            retry_max: self.config.retry_max,
            scan_interval_ms: self.config.scan_interval.as_millis() as u64,
        }
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Stop the scan task and wait for it to finish. Any in-flight
    /// persistence write completes before this returns because writers
    /// hold the store lock through the write.
    pub async fn shutdown(&mut self) {
        self.is_running.store(false, Ordering::SeqCst);
        // notify_one leaves a stored permit, so the scan task wakes even
        // if it was mid-scan rather than parked on the Notify.
        self.notify.notify_one();
        self.notify.notify_waiters();
        if let Some(handle) = self.scan_handle.take() {
            let _ = handle.await;
        }
    }
}
