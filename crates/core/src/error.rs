//! Error taxonomy surfaced to the agent in the `error` field of every tool
//! response. The dispatcher (`dispatcher.rs`) matches any of these down to a
//! `{error, message}` JSON payload; a truly unanticipated `anyhow::Error` is
//! reported as `internal_error` rather than panicking the process.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no active session: call start_session first")]
    NoActiveSession,

    #[error("phase_blocked: tool '{tool}' is not admitted in phase {phase}")]
    PhaseBlocked { tool: String, phase: String },

    #[error("stale_branches_detected: {} task branch(es) already present: {}", branches.len(), branches.join(", "))]
    StaleBranchesDetected { branches: Vec<String> },

    #[error("validation_failed: {0}")]
    ValidationFailed(String),

    #[error("invalid_semantic_reason: '{0}' is not in the closed enumeration")]
    InvalidSemanticReason(String),

    #[error("write_target_blocked: '{path}' is not in explored_files")]
    WriteTargetBlocked { path: String },

    #[error("quality_review_required: finish quality review before merging")]
    QualityReviewRequired,

    #[error("branch_manager_not_found: no task branch recorded for this session")]
    BranchManagerNotFound,
}

#[derive(Debug, Error)]
pub enum BranchError {
    #[error("another task branch is already checked out: {0}")]
    AlreadyOnTaskBranch(String),

    #[error("commit_execution_failed: {0}")]
    CommitExecutionFailed(String),

    #[error("git subprocess failed ({status}): {stderr}")]
    GitFailed { status: i32, stderr: String },

    #[error("timed_out: subprocess exceeded {0}s")]
    TimedOut(u64),
}

/// Converts any error raised inside the dispatcher into the stable
/// `{error, message}` shape. Library errors keep their taxonomy name;
/// anything else degrades to `internal_error` rather than panicking.
pub fn to_error_payload(err: &anyhow::Error) -> serde_json::Value {
    let kind = if let Some(e) = err.downcast_ref::<SessionError>() {
        match e {
            SessionError::NoActiveSession => "no_active_session",
            SessionError::PhaseBlocked { .. } => "phase_blocked",
            SessionError::StaleBranchesDetected { .. } => "stale_branches_detected",
            SessionError::ValidationFailed(_) => "validation_failed",
            SessionError::InvalidSemanticReason(_) => "invalid_semantic_reason",
            SessionError::WriteTargetBlocked { .. } => "write_target_blocked",
            SessionError::QualityReviewRequired => "quality_review_required",
            SessionError::BranchManagerNotFound => "branch_manager_not_found",
        }
    } else if let Some(e) = err.downcast_ref::<BranchError>() {
        match e {
            BranchError::AlreadyOnTaskBranch(_) => "already_on_task_branch",
            BranchError::CommitExecutionFailed(_) => "commit_execution_failed",
            BranchError::GitFailed { .. } => "git_failed",
            BranchError::TimedOut(_) => "timed_out",
        }
    } else {
        "internal_error"
    };

    serde_json::json!({ "error": kind, "message": err.to_string() })
}
