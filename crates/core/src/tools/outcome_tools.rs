//! Outcome and intervention bookkeeping (§6 ALWAYS_ADMITTED rows): the
//! append-only outcome log plus the session-local failure/intervention
//! counters defined on `Session` itself.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::branch::BranchManager;
use crate::outcome::{Outcome, OutcomeLog, OutcomeRecord};

use super::{require_session, Tool, ToolContext, ToolResult};

pub struct RecordOutcomeTool;

#[async_trait]
impl Tool for RecordOutcomeTool {
    fn name(&self) -> &str {
        "record_outcome"
    }
    fn description(&self) -> &str {
        "Appends a terminal outcome record for the session, learning any confirmed symbol mappings on success."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "session_id": {"type": "string"},
                "outcome": {"type": "string", "enum": ["success", "failure", "partial"]},
                "analysis": {"type": "string"},
                "used_semantic_search": {"type": "boolean"}
            },
            "required": ["session_id", "outcome", "analysis"]
        })
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let handle = require_session(ctx, &args).await?;
        let session = handle.lock().await;

        let outcome: Outcome = serde_json::from_value(json!(args
            .get("outcome")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("missing outcome"))?))?;
        let analysis = args
            .get("analysis")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("missing analysis"))?
            .to_string();
        let used_semantic_search = args.get("used_semantic_search").and_then(|v| v.as_bool()).unwrap_or(false);

        let record = OutcomeRecord {
            session_id: session.id.clone(),
            outcome,
            phase_at_outcome: session.phase,
            intent: session.intent,
            analysis,
            used_semantic_search,
            exploration_confidence: Some(session.evaluate_confidence()),
            timestamp: chrono::Utc::now(),
        };

        let log = OutcomeLog::open(&ctx.repo_root);
        log.record(record, ctx.index.as_deref(), Some(&session.query_frame)).await?;

        let mut branch_deleted = false;
        if outcome == Outcome::Failure {
            if let Some(branch) = session.task_branch.clone() {
                let base = crate::branch::parse_task_branch(&branch)
                    .and_then(|(_, base)| base)
                    .unwrap_or_else(|| "main".to_string());
                let manager = BranchManager::for_branch(&ctx.repo_root, ctx.settings.subprocess_timeout_secs);
                match manager.delete_branch(&branch, &base).await {
                    Ok(()) => branch_deleted = true,
                    Err(err) => {
                        tracing::warn!(session_id = %session.id, branch = %branch, error = %err, "failed to delete task branch after failure outcome");
                    }
                }
            }
        }

        Ok(ToolResult::json("record_outcome", json!({ "recorded": true, "branch_deleted": branch_deleted })))
    }
}

pub struct GetOutcomeStatsTool;

#[async_trait]
impl Tool for GetOutcomeStatsTool {
    fn name(&self) -> &str {
        "get_outcome_stats"
    }
    fn description(&self) -> &str {
        "Aggregates recorded outcomes by outcome, intent, phase-at-outcome, and semantic-search/confidence correlation."
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }
    async fn execute(&self, _args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let log = OutcomeLog::open(&ctx.repo_root);
        let stats = log.stats()?;
        Ok(ToolResult::json("get_outcome_stats", serde_json::to_value(stats)?))
    }
}

pub struct RecordVerificationFailureTool;

#[async_trait]
impl Tool for RecordVerificationFailureTool {
    fn name(&self) -> &str {
        "record_verification_failure"
    }
    fn description(&self) -> &str {
        "Records a failed verification attempt; the third consecutive failure demands an intervention."
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {"session_id": {"type": "string"}}, "required": ["session_id"]})
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let handle = require_session(ctx, &args).await?;
        let mut session = handle.lock().await;
        let intervention_required = session.record_verification_failure();
        Ok(ToolResult::json(
            "record_verification_failure",
            json!({
                "verification_failure_count": session.verification_failure_count,
                "intervention_required": intervention_required,
            }),
        ))
    }
}

pub struct RecordInterventionUsedTool;

#[async_trait]
impl Tool for RecordInterventionUsedTool {
    fn name(&self) -> &str {
        "record_intervention_used"
    }
    fn description(&self) -> &str {
        "Records that an intervention occurred, resetting the consecutive-failure counter."
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {"session_id": {"type": "string"}}, "required": ["session_id"]})
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let handle = require_session(ctx, &args).await?;
        let mut session = handle.lock().await;
        session.record_intervention_used();
        Ok(ToolResult::json(
            "record_intervention_used",
            json!({ "intervention_count": session.intervention_count }),
        ))
    }
}

pub struct GetInterventionStatusTool;

#[async_trait]
impl Tool for GetInterventionStatusTool {
    fn name(&self) -> &str {
        "get_intervention_status"
    }
    fn description(&self) -> &str {
        "Returns the session's current consecutive-failure and total-intervention counters."
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {"session_id": {"type": "string"}}, "required": ["session_id"]})
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let handle = require_session(ctx, &args).await?;
        let session = handle.lock().await;
        Ok(ToolResult::json(
            "get_intervention_status",
            json!({
                "verification_failure_count": session.verification_failure_count,
                "intervention_count": session.intervention_count,
            }),
        ))
    }
}
