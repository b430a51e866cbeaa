//! Review/merge surface (§6 READY/PRE_COMMIT/QUALITY_REVIEW/MERGED rows):
//! thin wrappers over the Branch Manager plus the phase transitions that
//! drive a session from a prepared commit through to a merged base.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::branch::BranchManager;
use crate::error::SessionError;
use crate::session::{Phase, PreparedCommit};

use super::{require_session, Tool, ToolContext, ToolResult};

fn branch_and_base(session: &crate::session::Session) -> Result<(String, String)> {
    let branch = session
        .task_branch
        .clone()
        .ok_or_else(|| anyhow::Error::from(SessionError::BranchManagerNotFound))?;
    let base = crate::branch::parse_task_branch(&branch)
        .and_then(|(_, base)| base)
        .unwrap_or_else(|| "main".to_string());
    Ok((branch, base))
}

pub struct SubmitForReviewTool;

#[async_trait]
impl Tool for SubmitForReviewTool {
    fn name(&self) -> &str {
        "submit_for_review"
    }
    fn description(&self) -> &str {
        "Leaves READY for PRE_COMMIT. The task branch is normally already set up by begin_phase_gate; this only creates one as a fallback if none exists yet (e.g. after quick_mode)."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"session_id": {"type": "string"}, "resume_current": {"type": "boolean"}},
            "required": ["session_id"]
        })
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let handle = require_session(ctx, &args).await?;
        let mut session = handle.lock().await;
        if session.phase != Phase::Ready {
            bail!(SessionError::PhaseBlocked { tool: self.name().to_string(), phase: session.phase.as_str().to_string() });
        }
        if session.task_branch.is_none() {
            let resume_current = args.get("resume_current").and_then(|v| v.as_bool()).unwrap_or(false);
            let manager = BranchManager::for_branch(&ctx.repo_root, ctx.settings.subprocess_timeout_secs);
            let branch = manager.setup(&session.id, resume_current).await?;
            session.task_branch = Some(branch);
        }
        session.advance(Phase::PreCommit);
        Ok(ToolResult::json(
            "submit_for_review",
            json!({ "task_branch": &session.task_branch, "phase": session.phase.as_str() }),
        ))
    }
}

pub struct ReviewChangesTool;

#[async_trait]
impl Tool for ReviewChangesTool {
    fn name(&self) -> &str {
        "review_changes"
    }
    fn description(&self) -> &str {
        "Lists every changed file on the session's task branch against its base, with diffs."
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {"session_id": {"type": "string"}}, "required": ["session_id"]})
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let handle = require_session(ctx, &args).await?;
        let session = handle.lock().await;
        let (_, base) = branch_and_base(&session)?;
        let manager = BranchManager::for_branch(&ctx.repo_root, ctx.settings.subprocess_timeout_secs);
        let changes = manager.get_changes(&base).await?;
        let payload: Vec<Value> = changes
            .into_iter()
            .map(|c| json!({"path": c.path, "diff": c.diff, "binary": c.binary}))
            .collect();
        Ok(ToolResult::json("review_changes", json!({ "changes": payload })))
    }
}

pub struct FinalizeChangesTool;

#[async_trait]
impl Tool for FinalizeChangesTool {
    fn name(&self) -> &str {
        "finalize_changes"
    }
    fn description(&self) -> &str {
        "Partitions reviewed changes into keep/discard, stages the kept ones, and either prepares or executes the commit."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "session_id": {"type": "string"},
                "keep": {"type": "array", "items": {"type": "string"}},
                "discard": {"type": "array", "items": {"type": "string"}},
                "message": {"type": "string"},
                "execute_commit": {"type": "boolean"}
            },
            "required": ["session_id", "keep"]
        })
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let handle = require_session(ctx, &args).await?;
        let mut session = handle.lock().await;
        if session.phase != Phase::PreCommit {
            bail!(SessionError::PhaseBlocked { tool: self.name().to_string(), phase: session.phase.as_str().to_string() });
        }
        let (_, base) = branch_and_base(&session)?;

        let keep: Vec<String> = args
            .get("keep")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();
        let discard: Vec<String> = args
            .get("discard")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();
        let message = args.get("message").and_then(|v| v.as_str()).map(String::from);
        let execute_commit = args.get("execute_commit").and_then(|v| v.as_bool()).unwrap_or(false);

        let manager = BranchManager::for_branch(&ctx.repo_root, ctx.settings.subprocess_timeout_secs);
        let result = manager.finalize(&base, &keep, &discard, message.as_deref(), execute_commit).await?;

        session.commit_prepared = true;
        session.prepared_commit = Some(PreparedCommit {
            message: message.unwrap_or_default(),
            keep: keep.clone(),
            discard: discard.clone(),
        });
        session.advance(if session.quality_review_enabled { Phase::QualityReview } else { Phase::Merged });

        Ok(ToolResult::json(
            "finalize_changes",
            json!({
                "kept": result.kept,
                "discarded": result.discarded,
                "prepared": result.prepared,
                "commit_hash": result.commit_hash,
                "phase": session.phase.as_str(),
            }),
        ))
    }
}

pub struct SubmitQualityReviewTool;

#[async_trait]
impl Tool for SubmitQualityReviewTool {
    fn name(&self) -> &str {
        "submit_quality_review"
    }
    fn description(&self) -> &str {
        "Records a quality-review verdict; no issues found completes the session, issues found reverts to READY (up to the configured cap) with the issue list recorded."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "session_id": {"type": "string"},
                "issues_found": {"type": "boolean"},
                "issues": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["session_id", "issues_found"]
        })
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let handle = require_session(ctx, &args).await?;
        let mut session = handle.lock().await;
        if session.phase != Phase::QualityReview {
            bail!(SessionError::PhaseBlocked { tool: self.name().to_string(), phase: session.phase.as_str().to_string() });
        }
        let issues_found = args
            .get("issues_found")
            .and_then(|v| v.as_bool())
            .ok_or_else(|| anyhow!("missing issues_found"))?;
        let issues: Vec<String> = args
            .get("issues")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();
        if issues_found && issues.is_empty() {
            bail!(SessionError::ValidationFailed("issues_found=true requires a non-empty issues list".to_string()));
        }

        let forced_completion = if !issues_found {
            session.advance(Phase::Merged);
            false
        } else {
            let forced = session.revert_to_ready(ctx.settings.revert_cap);
            if forced {
                session.advance(Phase::Merged);
            }
            forced
        };

        Ok(ToolResult::json(
            "submit_quality_review",
            json!({ "phase": session.phase.as_str(), "issues": issues, "forced_completion": forced_completion }),
        ))
    }
}

pub struct MergeToBaseTool;

#[async_trait]
impl Tool for MergeToBaseTool {
    fn name(&self) -> &str {
        "merge_to_base"
    }
    fn description(&self) -> &str {
        "Merges (or, for an abandoned session, discards) the session's task branch back into its base."
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {"session_id": {"type": "string"}}, "required": ["session_id"]})
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let handle = require_session(ctx, &args).await?;
        let session = handle.lock().await;
        if !matches!(session.phase, Phase::Merged | Phase::Abandoned) {
            bail!(SessionError::PhaseBlocked { tool: self.name().to_string(), phase: session.phase.as_str().to_string() });
        }
        let (branch, base) = branch_and_base(&session)?;
        let manager = BranchManager::for_branch(&ctx.repo_root, ctx.settings.subprocess_timeout_secs);

        if session.phase == Phase::Abandoned {
            manager.delete_branch(&branch, &base).await?;
            return Ok(ToolResult::json("merge_to_base", json!({ "merged": false, "branch_deleted": true })));
        }

        if !session.commit_prepared {
            bail!(SessionError::QualityReviewRequired);
        }
        if session.prepared_commit.is_some() {
            let message = session
                .prepared_commit
                .as_ref()
                .map(|p| p.message.clone())
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| "apply changes".to_string());
            manager.execute_prepared_commit(&message).await?;
        }
        manager.merge(&branch, &base).await?;
        Ok(ToolResult::json("merge_to_base", json!({ "merged": true, "base": base })))
    }
}

pub struct CleanupStaleBranchesTool;

#[async_trait]
impl Tool for CleanupStaleBranchesTool {
    fn name(&self) -> &str {
        "cleanup_stale_branches"
    }
    fn description(&self) -> &str {
        "Deletes or merges every stale llm_task_* branch across the repository, independent of any one session."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"action": {"type": "string", "enum": ["delete", "merge"], "default": "delete"}}
        })
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let action = args.get("action").and_then(|v| v.as_str()).unwrap_or("delete");
        let manager = BranchManager::for_branch(&ctx.repo_root, ctx.settings.subprocess_timeout_secs);
        let errors = manager.cleanup_stale(action).await?;
        Ok(ToolResult::json("cleanup_stale_branches", json!({ "errors": errors })))
    }
}
