pub mod approvals;
pub mod audit;
pub mod config;
pub mod directory;
pub mod domain;
pub mod errors;
pub mod gate;
pub mod signature;

pub use approvals::{
    ApprovalCommand, ApprovalEngine, ApprovalPolicy, ApprovalRequest, TransitionKind,
    TransitionOutcome,
};
pub use directory::{Directory, DirectoryError, StaticDirectory, TrustingDirectory};
pub use domain::approval::{
    ApprovalRecord, ApprovalSnapshot, ApprovalStatus, ApprovalStep, RecordId, StepPosition,
    StepStatus,
};
pub use domain::event::{ApprovalEvent, EventChannel, OutboxEntry, OutboxEventId};
pub use domain::notice::{ApproverRef, NoticeId, NoticeRef, UserId};
pub use domain::notification::{Notification, NotificationId, NotificationKind};
pub use domain::signature::{SignatureBlob, SignatureRef};
pub use errors::{ApplicationError, ApprovalError, ErrorKind, InterfaceError};
pub use gate::{GateDecision, GateStatus};
pub use signature::{SignaturePayload, SignaturePolicy, ValidatedSignature};
