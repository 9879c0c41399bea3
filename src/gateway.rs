use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::DeliveryError;
use crate::types::WebhookEvent;

/// Source tag stamped on every relayed envelope.
pub const RELAY_SOURCE: &str = "webhook-relay";

/// Longest response-body excerpt kept in a failure description.
const MAX_BODY_SNIPPET: usize = 256;

/// Header carrying the event id on outbound deliveries.
pub const EVENT_ID_HEADER: &str = "X-Relay-Event-Id";

/// Header carrying the event type on outbound deliveries.
pub const EVENT_TYPE_HEADER: &str = "X-Relay-Event-Type";

/// The fixed envelope wrapped around every forwarded event.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub source: &'static str,
    pub relayed_at: DateTime<Utc>,
    pub event_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    pub payload: serde_json::Value,
}

impl Envelope {
    pub fn for_event(event: &WebhookEvent) -> Self {
        Self {
            source: RELAY_SOURCE,
            relayed_at: Utc::now(),
            event_id: event.id.0.clone(),
            event_type: event.event_type.clone(),
            payload: event.payload.clone(),
        }
    }
}

/// Runtime-mutable downstream destination.
#[derive(Debug, Clone, Default)]
pub struct GatewayTarget {
    pub url: Option<String>,
    pub token: Option<String>,
}

/// Transport seam for outbound delivery.
///
/// Production uses [`HttpGateway`]; tests substitute scripted
/// implementations to drive the retry state machine.
#[async_trait]
pub trait GatewayTransport: Send + Sync {
    /// Perform one delivery attempt. The call must respect `timeout`;
    /// on expiry it is aborted and reported as a failure, never left
    /// dangling.
    async fn send(
        &self,
        url: &str,
        token: Option<&str>,
        envelope: &Envelope,
        timeout: Duration,
    ) -> Result<(), DeliveryError>;
}

/// HTTP transport to the downstream gateway.
pub struct HttpGateway {
    client: reqwest::Client,
}

impl HttpGateway {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GatewayTransport for HttpGateway {
    async fn send(
        &self,
        url: &str,
        token: Option<&str>,
        envelope: &Envelope,
        timeout: Duration,
    ) -> Result<(), DeliveryError> {
        let mut request = self
            .client
            .post(url)
            .timeout(timeout)
            .json(envelope)
            .header(EVENT_ID_HEADER, &envelope.event_id);

        if let Some(event_type) = &envelope.event_type {
            request = request.header(EVENT_TYPE_HEADER, event_type);
        }
        if let Some(token) = token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(());
                }
                let body: String = response
                    .text()
                    .await
                    .unwrap_or_default()
                    .chars()
                    .take(MAX_BODY_SNIPPET)
                    .collect();
                Err(DeliveryError::Status {
                    status: status.as_u16(),
                    body,
                })
            }
            Err(err) => Err(DeliveryError::Transport(err.to_string())),
        }
    }
}
