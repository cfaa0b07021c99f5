//! Outbox relay.
//!
//! Drains undelivered outbox entries in per-channel batches. Notification-channel
//! entries become inbox rows (deduplicated on the source event, so a crash
//! between insert and mark only repeats a no-op). Gate-channel entries are
//! pushed to a webhook when one is configured and otherwise wait for an
//! explicit acknowledgement.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use noticeboard_core::domain::event::{ApprovalEvent, EventChannel, OutboxEntry};
use noticeboard_core::domain::notification::Notification;
use noticeboard_db::repositories::{NotificationRepository, OutboxRepository, RepositoryError};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("gate webhook client could not be built: {0}")]
    Client(String),
    #[error("gate webhook request failed: {0}")]
    Transport(String),
    #[error("gate webhook answered with status {0}")]
    Rejected(u16),
    #[error("outbox entry `{0}` has no recipient")]
    Undeliverable(String),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[async_trait]
pub trait GatePublisher: Send + Sync {
    async fn publish(&self, entry: &OutboxEntry) -> Result<(), DispatchError>;
}

#[derive(Debug, Serialize)]
struct GateWebhookBody<'a> {
    event_id: &'a str,
    kind: &'a str,
    record_id: &'a str,
    notice_id: &'a str,
    created_at: String,
    event: &'a ApprovalEvent,
}

/// Posts gate signals as JSON to a collaborator endpoint. Any 2xx counts as
/// delivered.
pub struct WebhookGatePublisher {
    client: Client,
    url: String,
}

impl WebhookGatePublisher {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, DispatchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| DispatchError::Client(error.to_string()))?;
        Ok(Self { client, url: url.into() })
    }
}

#[async_trait]
impl GatePublisher for WebhookGatePublisher {
    async fn publish(&self, entry: &OutboxEntry) -> Result<(), DispatchError> {
        let body = GateWebhookBody {
            event_id: &entry.id.0,
            kind: entry.event.kind(),
            record_id: &entry.event.record_id().0,
            notice_id: &entry.event.notice_id().0,
            created_at: entry.created_at.to_rfc3339(),
            event: &entry.event,
        };

        let response = self
            .client
            .post(&self.url)
            .header("x-noticeboard-event-id", &entry.id.0)
            .json(&body)
            .send()
            .await
            .map_err(|error| DispatchError::Transport(error.to_string()))?;

        if !response.status().is_success() {
            return Err(DispatchError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RelayReport {
    pub delivered: u32,
    pub duplicates: u32,
    pub failed: u32,
}

impl RelayReport {
    pub fn is_idle(&self) -> bool {
        self.delivered == 0 && self.duplicates == 0 && self.failed == 0
    }
}

pub struct OutboxRelay {
    outbox: Arc<dyn OutboxRepository>,
    notifications: Arc<dyn NotificationRepository>,
    gate: Option<Arc<dyn GatePublisher>>,
    batch_size: u32,
    poll_interval: Duration,
}

impl OutboxRelay {
    pub fn new(
        outbox: Arc<dyn OutboxRepository>,
        notifications: Arc<dyn NotificationRepository>,
        gate: Option<Arc<dyn GatePublisher>>,
        batch_size: u32,
        poll_interval: Duration,
    ) -> Self {
        Self { outbox, notifications, gate, batch_size: batch_size.max(1), poll_interval }
    }

    /// Delivers one batch per channel. Per-entry failures are recorded on the
    /// entry and do not fail the batch. Channels are read separately so an
    /// unreachable gate webhook never holds back inbox notifications.
    pub async fn run_once(&self) -> Result<RelayReport, RepositoryError> {
        let mut entries =
            self.outbox.list_undelivered(Some(EventChannel::Notification), self.batch_size).await?;
        if self.gate.is_some() {
            entries.extend(
                self.outbox.list_undelivered(Some(EventChannel::Gate), self.batch_size).await?,
            );
        }
        let mut report = RelayReport::default();

        for entry in entries {
            match self.deliver(&entry).await {
                Ok(true) => report.delivered += 1,
                Ok(false) => report.duplicates += 1,
                Err(dispatch_error) => {
                    report.failed += 1;
                    warn!(
                        event_name = "dispatch.outbox.delivery_failed",
                        correlation_id = %entry.id,
                        record_id = %entry.event.record_id(),
                        notice_id = %entry.event.notice_id(),
                        kind = entry.event.kind(),
                        attempts = entry.attempts + 1,
                        error = %dispatch_error,
                        "outbox delivery failed; will retry"
                    );
                    self.outbox.record_failure(&entry.id, &dispatch_error.to_string()).await?;
                }
            }
        }

        if !report.is_idle() {
            debug!(
                event_name = "dispatch.outbox.batch",
                correlation_id = "outbox-relay",
                delivered = report.delivered,
                duplicates = report.duplicates,
                failed = report.failed,
                "outbox batch relayed"
            );
        }
        Ok(report)
    }

    /// `Ok(false)` when the inbox already held this event.
    async fn deliver(&self, entry: &OutboxEntry) -> Result<bool, DispatchError> {
        let fresh = match entry.channel() {
            EventChannel::Notification => {
                let notification = Notification::from_outbox(entry, Utc::now())
                    .ok_or_else(|| DispatchError::Undeliverable(entry.id.0.clone()))?;
                self.notifications.insert_if_absent(&notification).await?
            }
            EventChannel::Gate => {
                let Some(publisher) = &self.gate else {
                    return Err(DispatchError::Undeliverable(entry.id.0.clone()));
                };
                publisher.publish(entry).await?;
                true
            }
        };

        self.outbox.mark_delivered(&entry.id, Utc::now()).await?;
        Ok(fresh)
    }

    /// Runs until `shutdown` flips to `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            event_name = "dispatch.relay.started",
            correlation_id = "outbox-relay",
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            batch_size = self.batch_size,
            gate_webhook = self.gate.is_some(),
            "outbox relay started"
        );
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(repository_error) = self.run_once().await {
                        error!(
                            event_name = "dispatch.relay.error",
                            correlation_id = "outbox-relay",
                            error = %repository_error,
                            "outbox relay tick failed"
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(
            event_name = "dispatch.relay.stopped",
            correlation_id = "outbox-relay",
            "outbox relay stopped"
        );
    }
}
