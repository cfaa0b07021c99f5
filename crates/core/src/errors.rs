use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::approval::{ApprovalStatus, RecordId};
use crate::domain::notice::{NoticeId, UserId};

/// Business-rule failures of the approval workflow. None of these are
/// retryable as-is.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApprovalError {
    #[error("invalid approval request: {0}")]
    InvalidRequest(String),
    #[error("notice `{notice_id}` already has an active approval chain")]
    AlreadyPending { notice_id: NoticeId, record_id: Option<RecordId> },
    #[error("approval record `{record_id}` is already {status}")]
    AlreadyDecided { record_id: RecordId, status: ApprovalStatus },
    #[error("`{actor_id}` is not the active approver on `{record_id}`")]
    NotYourTurn { record_id: RecordId, actor_id: UserId },
    #[error("a non-empty reason is required")]
    MissingReason,
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
    #[error("{entity} `{id}` was not found")]
    NotFound { entity: &'static str, id: String },
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("approval invariant violation: {0}")]
    InvariantViolation(String),
}

impl ApprovalError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { entity, id: id.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::AlreadyPending { .. } => ErrorKind::AlreadyPending,
            Self::AlreadyDecided { .. } => ErrorKind::AlreadyDecided,
            Self::NotYourTurn { .. } => ErrorKind::NotYourTurn,
            Self::MissingReason => ErrorKind::MissingReason,
            Self::InvalidSignature(_) => ErrorKind::InvalidSignature,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::InvariantViolation(_) => ErrorKind::Internal,
        }
    }
}

/// Stable, transport-facing name of a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidRequest,
    AlreadyPending,
    AlreadyDecided,
    NotYourTurn,
    MissingReason,
    InvalidSignature,
    NotFound,
    Forbidden,
    Unavailable,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::AlreadyPending => "already_pending",
            Self::AlreadyDecided => "already_decided",
            Self::NotYourTurn => "not_your_turn",
            Self::MissingReason => "missing_reason",
            Self::InvalidSignature => "invalid_signature",
            Self::NotFound => "not_found",
            Self::Forbidden => "forbidden",
            Self::Unavailable => "unavailable",
            Self::Internal => "internal",
        }
    }

    /// Only store or collaborator outages may be retried with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Approval(#[from] ApprovalError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl ApplicationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Approval(error) => error.kind(),
            Self::Persistence(_) | Self::Integration(_) => ErrorKind::Unavailable,
            Self::Configuration(_) => ErrorKind::Internal,
        }
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::Forbidden { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { kind: ErrorKind, message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { kind: ErrorKind, message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { kind: ErrorKind, message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { kind: ErrorKind, message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { kind: ErrorKind, message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { kind: ErrorKind, message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BadRequest { kind, .. }
            | Self::Forbidden { kind, .. }
            | Self::NotFound { kind, .. }
            | Self::Conflict { kind, .. }
            | Self::ServiceUnavailable { kind, .. }
            | Self::Internal { kind, .. } => *kind,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest { message, .. }
            | Self::Forbidden { message, .. }
            | Self::NotFound { message, .. }
            | Self::Conflict { message, .. }
            | Self::ServiceUnavailable { message, .. }
            | Self::Internal { message, .. } => message,
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Forbidden { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self.kind() {
            ErrorKind::NotYourTurn => "Someone else must act on this notice first.",
            ErrorKind::AlreadyDecided | ErrorKind::AlreadyPending => {
                "This approval changed since you last loaded it. Refresh and try again."
            }
            ErrorKind::MissingReason => "Please give a reason.",
            ErrorKind::InvalidSignature => "The signature could not be accepted. Draw it again.",
            ErrorKind::NotFound => "The requested approval could not be found.",
            ErrorKind::Forbidden => "You are not allowed to perform this action.",
            ErrorKind::InvalidRequest => {
                "The request could not be processed. Check inputs and try again."
            }
            ErrorKind::Unavailable => "The service is temporarily unavailable. Please retry shortly.",
            ErrorKind::Internal => "An unexpected internal error occurred.",
        }
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let kind = value.kind();
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::Approval(error) => {
                let message = error.to_string();
                match kind {
                    ErrorKind::InvalidRequest
                    | ErrorKind::MissingReason
                    | ErrorKind::InvalidSignature => {
                        Self::BadRequest { kind, message, correlation_id }
                    }
                    ErrorKind::NotYourTurn | ErrorKind::Forbidden => {
                        Self::Forbidden { kind, message, correlation_id }
                    }
                    ErrorKind::NotFound => Self::NotFound { kind, message, correlation_id },
                    ErrorKind::AlreadyPending | ErrorKind::AlreadyDecided => {
                        Self::Conflict { kind, message, correlation_id }
                    }
                    ErrorKind::Unavailable => {
                        Self::ServiceUnavailable { kind, message, correlation_id }
                    }
                    ErrorKind::Internal => Self::Internal { kind, message, correlation_id },
                }
            }
            ApplicationError::Persistence(message) | ApplicationError::Integration(message) => {
                Self::ServiceUnavailable { kind, message, correlation_id }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { kind, message, correlation_id }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::approval::{ApprovalStatus, RecordId};
    use crate::domain::notice::UserId;
    use crate::errors::{ApplicationError, ApprovalError, ErrorKind, InterfaceError};

    #[test]
    fn invalid_request_maps_to_bad_request_interface_error() {
        let interface = ApplicationError::from(ApprovalError::InvalidRequest(
            "approver list must not be empty".to_owned(),
        ))
        .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest {
                kind: ErrorKind::InvalidRequest,
                ref correlation_id,
                ..
            } if correlation_id == "req-1"
        ));
    }

    #[test]
    fn not_your_turn_has_its_own_user_message() {
        let interface = ApplicationError::from(ApprovalError::NotYourTurn {
            record_id: RecordId("APR-1".to_owned()),
            actor_id: UserId("emp-9".to_owned()),
        })
        .into_interface("req-2");

        assert!(matches!(interface, InterfaceError::Forbidden { .. }));
        assert_eq!(interface.kind(), ErrorKind::NotYourTurn);
        assert_eq!(interface.user_message(), "Someone else must act on this notice first.");
    }

    #[test]
    fn state_conflicts_map_to_conflict() {
        let interface = ApplicationError::from(ApprovalError::AlreadyDecided {
            record_id: RecordId("APR-1".to_owned()),
            status: ApprovalStatus::Rejected,
        })
        .into_interface("req-3");

        assert!(matches!(interface, InterfaceError::Conflict { .. }));
        assert!(interface.message().contains("already rejected"));
        assert!(!interface.kind().is_retryable());
    }

    #[test]
    fn persistence_error_maps_to_retryable_unavailable() {
        let interface = ApplicationError::Persistence("database lock timeout".to_owned())
            .into_interface("req-4");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert!(interface.kind().is_retryable());
        assert_eq!(interface.correlation_id(), "req-4");
        assert_eq!(
            interface.user_message(),
            "The service is temporarily unavailable. Please retry shortly."
        );
    }

    #[test]
    fn configuration_error_maps_to_internal() {
        let interface =
            ApplicationError::Configuration("missing admin token".to_owned()).into_interface("req-5");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
    }
}
