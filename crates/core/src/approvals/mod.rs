pub mod engine;
pub mod states;

pub use engine::{ApprovalEngine, ApprovalPolicy, DEFAULT_MAX_APPROVERS, MAX_COMMENT_CHARS};
pub use states::{ApprovalCommand, ApprovalRequest, TransitionKind, TransitionOutcome};
