//! The IMPACT_ANALYSIS phase's sole tool: wires the static-analysis core in
//! `impact.rs` to the repository's actual source and documentation files.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::context_provider::ContextProvider;
use crate::impact::analyze_impact;

use super::{require_session, Tool, ToolContext, ToolResult};

async fn read_source_files(ctx: &ToolContext) -> Result<Vec<(String, String)>> {
    let entries = code_intel_index::watcher::walk_project(&ctx.repo_root, &[])?;
    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        if let Ok(content) = std::fs::read_to_string(&entry.abs_path) {
            let rel = entry
                .abs_path
                .strip_prefix(&ctx.repo_root)
                .unwrap_or(&entry.abs_path)
                .to_string_lossy()
                .to_string();
            out.push((rel, content));
        }
    }
    Ok(out)
}

pub struct AnalyzeImpactTool;

#[async_trait]
impl Tool for AnalyzeImpactTool {
    fn name(&self) -> &str {
        "analyze_impact"
    }
    fn description(&self) -> &str {
        "Finds static references, naming-convention matches, and documentation mentions that a change to the given target files may affect."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "session_id": {"type": "string"},
                "targets": {"type": "array", "items": {"type": "string"}},
                "description": {"type": "string"}
            },
            "required": ["session_id", "targets", "description"]
        })
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let handle = require_session(ctx, &args).await?;

        let targets: Vec<String> = args
            .get("targets")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();
        if targets.is_empty() {
            return Err(anyhow!("targets must be non-empty"));
        }
        let description = args
            .get("description")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("missing description"))?;

        let sources = read_source_files(ctx).await?;
        let docs = ContextProvider::new(&ctx.repo_root).read_doc_files()?;

        let result = analyze_impact(&targets, &sources, &docs, description)?;

        let mut session = handle.lock().await;
        session.pending_impact_targets = result.must_verify.clone();
        session.impact_analysis_done = true;

        Ok(ToolResult::json("analyze_impact", serde_json::to_value(result)?))
    }
}
