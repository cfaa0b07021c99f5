pub mod approval;
pub mod audit;
pub mod dispatch;
pub mod gate;
pub mod inbox;
pub mod projections;
pub mod signatures;

use std::sync::Arc;
use std::time::Duration;

use noticeboard_core::approvals::{ApprovalEngine, ApprovalPolicy};
use noticeboard_core::config::AppConfig;
use noticeboard_core::directory::{Directory, TrustingDirectory};
use noticeboard_core::signature::SignaturePolicy;
use noticeboard_db::repositories::{
    DirectoryRegistry, SqlApprovalRepository, SqlDirectory, SqlNotificationRepository,
    SqlOutboxRepository, SqlSignatureRepository,
};
use noticeboard_db::DbPool;

pub use approval::{ApprovalService, ApprovalServiceSettings, ApproveInput, RejectInput, WithdrawInput};
pub use audit::TracingAuditSink;
pub use dispatch::{DispatchError, GatePublisher, OutboxRelay, RelayReport, WebhookGatePublisher};
pub use gate::NoticeGate;
pub use inbox::{InboxPage, NotificationInbox};
pub use projections::ApprovalQueries;
pub use signatures::{SignatureReceipt, SignatureService};

/// Every service wired against one SQLite pool.
#[derive(Clone)]
pub struct Services {
    pub approvals: Arc<ApprovalService>,
    pub signatures: Arc<SignatureService>,
    pub gate: Arc<NoticeGate>,
    pub queries: Arc<ApprovalQueries>,
    pub inbox: Arc<NotificationInbox>,
    pub registry: Arc<dyn DirectoryRegistry>,
}

impl Services {
    pub fn from_pool(pool: &DbPool, config: &AppConfig) -> Self {
        let records = Arc::new(SqlApprovalRepository::new(pool.clone()));
        let signatures = Arc::new(SqlSignatureRepository::new(pool.clone()));
        let outbox = Arc::new(SqlOutboxRepository::new(pool.clone()));
        let notifications = Arc::new(SqlNotificationRepository::new(pool.clone()));
        let registry = Arc::new(SqlDirectory::new(pool.clone()));
        let audit = Arc::new(TracingAuditSink);

        // The gate always reads the synced registry; request vetting only
        // does when enforcement is on.
        let vetting: Arc<dyn Directory> = if config.directory.enforce {
            registry.clone()
        } else {
            Arc::new(TrustingDirectory)
        };

        let engine = ApprovalEngine::new(ApprovalPolicy { max_approvers: config.approvals.max_approvers });
        let approvals = ApprovalService::new(
            engine,
            records.clone(),
            signatures.clone(),
            vetting,
            audit.clone(),
            ApprovalServiceSettings {
                enforce_directory: config.directory.enforce,
                cas_retry_limit: config.approvals.cas_retry_limit,
            },
        );

        Self {
            approvals: Arc::new(approvals),
            signatures: Arc::new(SignatureService::new(
                SignaturePolicy::new(config.signatures.max_bytes),
                signatures,
                audit,
            )),
            gate: Arc::new(NoticeGate::new(records.clone(), outbox, registry.clone())),
            queries: Arc::new(ApprovalQueries::new(records)),
            inbox: Arc::new(NotificationInbox::new(notifications)),
            registry,
        }
    }
}

/// Builds the relay for the configured dispatch settings. The gate channel
/// is pushed only when a webhook URL is set.
pub fn outbox_relay(pool: &DbPool, config: &AppConfig) -> Result<OutboxRelay, DispatchError> {
    let gate: Option<Arc<dyn GatePublisher>> = match &config.dispatch.gate_webhook_url {
        Some(url) => Some(Arc::new(WebhookGatePublisher::new(
            url.clone(),
            Duration::from_secs(config.dispatch.webhook_timeout_secs),
        )?)),
        None => None,
    };

    Ok(OutboxRelay::new(
        Arc::new(SqlOutboxRepository::new(pool.clone())),
        Arc::new(SqlNotificationRepository::new(pool.clone())),
        gate,
        config.dispatch.batch_size,
        Duration::from_millis(config.dispatch.poll_interval_ms),
    ))
}
