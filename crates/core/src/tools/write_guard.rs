//! Write-target guard (§4.1 "no write without exploration") and the
//! READY-phase tools that manage the explored-files set directly.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::SessionError;
use crate::session::Phase;

use super::{require_session, Tool, ToolContext, ToolResult};

pub struct CheckWriteTargetTool;

#[async_trait]
impl Tool for CheckWriteTargetTool {
    fn name(&self) -> &str {
        "check_write_target"
    }
    fn description(&self) -> &str {
        "Verifies a path is within the session's explored_files (or a directory of one) before a write is attempted."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"session_id": {"type": "string"}, "path": {"type": "string"}},
            "required": ["session_id", "path"]
        })
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let handle = require_session(ctx, &args).await?;
        let session = handle.lock().await;
        let path = args.get("path").and_then(|v| v.as_str()).ok_or_else(|| anyhow!("missing path"))?;
        session.check_write_target(path)?;
        Ok(ToolResult::json("check_write_target", json!({ "allowed": true })))
    }
}

pub struct AddExploredFilesTool;

#[async_trait]
impl Tool for AddExploredFilesTool {
    fn name(&self) -> &str {
        "add_explored_files"
    }
    fn description(&self) -> &str {
        "Adds files to the session's explored_files set without requiring a new exploration phase."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "session_id": {"type": "string"},
                "files": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["session_id", "files"]
        })
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let handle = require_session(ctx, &args).await?;
        let mut session = handle.lock().await;
        let files: Vec<String> = args
            .get("files")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();
        session.add_explored(files);
        Ok(ToolResult::json(
            "add_explored_files",
            json!({ "explored_files": session.explored_files.iter().collect::<Vec<_>>() }),
        ))
    }
}

pub struct RevertToExplorationTool;

#[async_trait]
impl Tool for RevertToExplorationTool {
    fn name(&self) -> &str {
        "revert_to_exploration"
    }
    fn description(&self) -> &str {
        "Sends the session back to EXPLORATION from READY, for when the candidate plan turns out to rest on an unexplored area."
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {"session_id": {"type": "string"}}, "required": ["session_id"]})
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let handle = require_session(ctx, &args).await?;
        let mut session = handle.lock().await;
        if session.phase != Phase::Ready {
            bail!(SessionError::PhaseBlocked { tool: self.name().to_string(), phase: session.phase.as_str().to_string() });
        }
        session.advance(Phase::Exploration);
        Ok(ToolResult::json("revert_to_exploration", json!({ "phase": session.phase.as_str() })))
    }
}
