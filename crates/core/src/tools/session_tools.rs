//! Session-lifecycle tools (§6): the `ALWAYS_ADMITTED` session-management
//! surface plus the per-phase `submit_*` gate transitions.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::branch::BranchManager;
use crate::context_provider::ContextProvider;
use crate::error::SessionError;
use crate::query_frame::{MappedSymbol, SemanticReason, SlotName, SlotValue, SymbolSource};
use crate::session::{Intent, Phase, PhaseAssessment, Session};

use super::{require_session, require_session_id, Tool, ToolContext, ToolResult};

fn parse_intent(s: &str) -> Result<Intent> {
    serde_json::from_value(json!(s)).map_err(|_| anyhow!("unknown intent '{s}'"))
}

pub struct StartSessionTool;

#[async_trait]
impl Tool for StartSessionTool {
    fn name(&self) -> &str {
        "start_session"
    }
    fn description(&self) -> &str {
        "Opens a new investigative session for a raw agent query, seeding it with project context."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "raw_query": {"type": "string"},
                "intent": {"type": "string", "enum": ["implement", "modify", "investigate", "question"]}
            },
            "required": ["raw_query", "intent"]
        })
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let raw_query = args
            .get("raw_query")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("missing raw_query"))?
            .to_string();
        let intent = parse_intent(
            args.get("intent")
                .and_then(|v| v.as_str())
                .ok_or_else(|| anyhow!("missing intent"))?,
        )?;

        let session = Session::new(intent, raw_query, ctx.repo_root.clone(), ctx.settings.gate_level_default);
        let id = session.id.clone();
        ctx.sessions.create(session).await;

        let summary = ContextProvider::new(&ctx.repo_root).seed_for_session()?;
        Ok(ToolResult::json(
            "start_session",
            json!({ "session_id": id, "phase": Phase::Exploration.as_str(), "context": summary }),
        ))
    }
}

pub struct BeginPhaseGateTool;

#[async_trait]
impl Tool for BeginPhaseGateTool {
    fn name(&self) -> &str {
        "begin_phase_gate"
    }
    fn description(&self) -> &str {
        "Creates (or resumes) the session's dedicated task branch, detects other stale task branches, and returns the current phase's admitted tools. `quick_mode` skips straight to READY with no branch."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "session_id": {"type": "string"},
                "resume_current": {"type": "boolean", "default": false},
                "quick_mode": {"type": "boolean", "default": false}
            },
            "required": ["session_id"]
        })
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let handle = require_session(ctx, &args).await?;
        let mut session = handle.lock().await;

        let resume_current = args.get("resume_current").and_then(|v| v.as_bool()).unwrap_or(false);
        let quick_mode = args.get("quick_mode").and_then(|v| v.as_bool()).unwrap_or(false);

        if quick_mode {
            session.advance(Phase::Ready);
            return Ok(ToolResult::json(
                "begin_phase_gate",
                json!({
                    "phase": session.phase.as_str(),
                    "task_branch": Option::<String>::None,
                    "admitted_tools": crate::session::phase::admitted_tools(session.phase),
                }),
            ));
        }

        if session.task_branch.is_none() {
            let manager = BranchManager::for_branch(&ctx.repo_root, ctx.settings.subprocess_timeout_secs);
            let stale = manager.stale_branches().await?;
            if !stale.is_empty() && !resume_current {
                bail!(SessionError::StaleBranchesDetected {
                    branches: stale.into_iter().map(|b| b.name).collect(),
                });
            }
            let branch = manager.setup(&session.id, resume_current).await?;
            session.task_branch = Some(branch);
        }

        Ok(ToolResult::json(
            "begin_phase_gate",
            json!({
                "phase": session.phase.as_str(),
                "task_branch": &session.task_branch,
                "admitted_tools": crate::session::phase::admitted_tools(session.phase),
            }),
        ))
    }
}

pub struct SetQueryFrameTool;

#[async_trait]
impl Tool for SetQueryFrameTool {
    fn name(&self) -> &str {
        "set_query_frame"
    }
    fn description(&self) -> &str {
        "Records a text-slot quote or a mapped symbol on the session's Query Frame."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "session_id": {"type": "string"},
                "slot": {"type": "string", "enum": ["target_feature", "trigger_condition", "observed_issue", "desired_action"]},
                "value": {"type": "string"},
                "quote": {"type": "string"},
                "symbol": {"type": "string"},
                "source": {"type": "string", "enum": ["fact", "hypothesis", "unresolved"]},
                "confidence": {"type": "number"},
                "evidence": {"type": "string"}
            },
            "required": ["session_id"]
        })
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let handle = require_session(ctx, &args).await?;
        let mut session = handle.lock().await;

        if let Some(symbol) = args.get("symbol").and_then(|v| v.as_str()) {
            let source: SymbolSource = serde_json::from_value(json!(args
                .get("source")
                .and_then(|v| v.as_str())
                .ok_or_else(|| anyhow!("missing source"))?))?;
            let confidence = args.get("confidence").and_then(|v| v.as_f64()).unwrap_or(0.0) as f32;
            let evidence = args
                .get("evidence")
                .and_then(|v| v.as_str())
                .ok_or_else(|| anyhow!("missing evidence"))?
                .to_string();
            session.query_frame.upsert_symbol(MappedSymbol {
                name: symbol.to_string(),
                source,
                confidence,
                evidence,
            })?;
        } else {
            let slot: SlotName = serde_json::from_value(json!(args
                .get("slot")
                .and_then(|v| v.as_str())
                .ok_or_else(|| anyhow!("missing slot"))?))?;
            let value = args
                .get("value")
                .and_then(|v| v.as_str())
                .ok_or_else(|| anyhow!("missing value"))?
                .to_string();
            let quote = args
                .get("quote")
                .and_then(|v| v.as_str())
                .ok_or_else(|| anyhow!("missing quote"))?
                .to_string();
            let source: SymbolSource = match args.get("source").and_then(|v| v.as_str()) {
                Some(s) => serde_json::from_value(json!(s))?,
                None => SymbolSource::Hypothesis,
            };
            session.query_frame.set_slot(slot, SlotValue { value, quote, source })?;
        }

        Ok(ToolResult::json(
            "set_query_frame",
            json!({ "query_frame": &session.query_frame, "risk_level": session.risk_level() }),
        ))
    }
}

pub struct GetSessionStatusTool;

#[async_trait]
impl Tool for GetSessionStatusTool {
    fn name(&self) -> &str {
        "get_session_status"
    }
    fn description(&self) -> &str {
        "Returns the session's phase, confidence, risk level, and Query Frame."
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {"session_id": {"type": "string"}}, "required": ["session_id"]})
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let handle = require_session(ctx, &args).await?;
        let session = handle.lock().await;
        Ok(ToolResult::json(
            "get_session_status",
            json!({
                "phase": session.phase.as_str(),
                "confidence": session.evaluate_confidence(),
                "risk_level": session.risk_level(),
                "query_frame": &session.query_frame,
                "task_branch": session.task_branch,
                "verification_failure_count": session.verification_failure_count,
                "intervention_count": session.intervention_count,
                "revert_count": session.revert_count,
                "explored_files": session.explored_files.iter().collect::<Vec<_>>(),
            }),
        ))
    }
}

pub struct CheckPhaseNecessityTool;

#[async_trait]
impl Tool for CheckPhaseNecessityTool {
    fn name(&self) -> &str {
        "check_phase_necessity"
    }
    fn description(&self) -> &str {
        "Under gate_level=auto, lets the agent attest whether the current investigative phase is necessary, with a justifying reason of at least ten characters."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "session_id": {"type": "string"},
                "necessary": {"type": "boolean"},
                "reason": {"type": "string", "minLength": 10}
            },
            "required": ["session_id", "necessary", "reason"]
        })
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let handle = require_session(ctx, &args).await?;
        let mut session = handle.lock().await;

        let necessary = args
            .get("necessary")
            .and_then(|v| v.as_bool())
            .ok_or_else(|| anyhow!("missing necessary"))?;
        let reason = args
            .get("reason")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("missing reason"))?
            .to_string();
        if reason.trim().len() < 10 {
            bail!(SessionError::ValidationFailed("reason must be at least ten characters".to_string()));
        }

        let phase = session.phase;
        session.assessments.push(PhaseAssessment {
            phase,
            necessary,
            reason,
            recorded_at: chrono::Utc::now(),
        });

        let is_investigative = Phase::investigative_order().contains(&phase);
        let skip_allowed = is_investigative && session.gate_level == code_intel_config::GateLevel::Auto && !necessary;
        if skip_allowed {
            advance_investigative(&mut session, phase);
        }
        Ok(ToolResult::json(
            "check_phase_necessity",
            json!({ "phase": session.phase.as_str(), "may_skip": skip_allowed }),
        ))
    }
}

fn advance_investigative(session: &mut Session, from: Phase) {
    session.advance(from.next_investigative().unwrap_or(Phase::Ready));
}

pub struct SubmitExplorationTool;

#[async_trait]
impl Tool for SubmitExplorationTool {
    fn name(&self) -> &str {
        "submit_exploration"
    }
    fn description(&self) -> &str {
        "Completes EXPLORATION: records every file examined and advances to the next investigative phase."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "session_id": {"type": "string"},
                "explored_files": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["session_id", "explored_files"]
        })
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let handle = require_session(ctx, &args).await?;
        let mut session = handle.lock().await;
        if session.phase != Phase::Exploration {
            bail!(SessionError::PhaseBlocked { tool: self.name().to_string(), phase: session.phase.as_str().to_string() });
        }
        let files: Vec<String> = args
            .get("explored_files")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();
        if files.is_empty() {
            bail!(SessionError::ValidationFailed("explored_files must be non-empty".to_string()));
        }
        session.add_explored(files);
        advance_investigative(&mut session, Phase::Exploration);
        Ok(ToolResult::json("submit_exploration", json!({ "phase": session.phase.as_str() })))
    }
}

fn hypothesis_confidence(level: &str) -> f32 {
    match level {
        "high" => 0.8,
        "low" => 0.2,
        _ => 0.5,
    }
}

pub struct SubmitSemanticTool;

#[async_trait]
impl Tool for SubmitSemanticTool {
    fn name(&self) -> &str {
        "submit_semantic"
    }
    fn description(&self) -> &str {
        "Completes SEMANTIC: records at least one hypothesis from semantic search and the closed-enumeration reason it was needed."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "session_id": {"type": "string"},
                "hypotheses": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "text": {"type": "string"},
                            "confidence": {"type": "string", "enum": ["high", "medium", "low"], "default": "medium"}
                        },
                        "required": ["text"]
                    }
                },
                "reason": {
                    "type": "string",
                    "enum": ["no_definition_found", "no_reference_found", "no_similar_implementation", "architecture_unknown", "context_fragmented"]
                }
            },
            "required": ["session_id", "hypotheses", "reason"]
        })
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let handle = require_session(ctx, &args).await?;
        let mut session = handle.lock().await;
        if session.phase != Phase::Semantic {
            bail!(SessionError::PhaseBlocked { tool: self.name().to_string(), phase: session.phase.as_str().to_string() });
        }
        let reason = args
            .get("reason")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("missing reason"))?;
        SemanticReason::parse(reason)?;

        let hypotheses = args
            .get("hypotheses")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        if hypotheses.is_empty() {
            bail!(SessionError::ValidationFailed("hypotheses must be non-empty".to_string()));
        }
        for h in &hypotheses {
            let text = h
                .get("text")
                .and_then(|v| v.as_str())
                .ok_or_else(|| anyhow!("hypothesis missing text"))?;
            let confidence = hypothesis_confidence(h.get("confidence").and_then(|v| v.as_str()).unwrap_or("medium"));
            session.query_frame.upsert_symbol(MappedSymbol {
                name: text.to_string(),
                source: SymbolSource::Hypothesis,
                confidence,
                evidence: format!("semantic_search hypothesis ({reason})"),
            })?;
        }

        advance_investigative(&mut session, Phase::Semantic);
        Ok(ToolResult::json("submit_semantic", json!({ "phase": session.phase.as_str() })))
    }
}

const VERIFICATION_TOOLS: &[&str] =
    &["find_definitions", "find_references", "search_text", "analyze_structure", "query"];

pub struct SubmitVerificationTool;

#[async_trait]
impl Tool for SubmitVerificationTool {
    fn name(&self) -> &str {
        "submit_verification"
    }
    fn description(&self) -> &str {
        "Completes VERIFICATION: each hypothesis must carry structured evidence (tool, target, result) confirming or rejecting it, and advances to IMPACT_ANALYSIS."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "session_id": {"type": "string"},
                "verified": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "symbol": {"type": "string"},
                            "status": {"type": "string", "enum": ["confirmed", "rejected"]},
                            "tool": {"type": "string", "enum": VERIFICATION_TOOLS},
                            "target": {"type": "string"},
                            "result": {"type": "string"},
                            "files": {"type": "array", "items": {"type": "string"}}
                        },
                        "required": ["symbol", "status", "tool", "target", "result"]
                    }
                }
            },
            "required": ["session_id", "verified"]
        })
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let handle = require_session(ctx, &args).await?;
        let mut session = handle.lock().await;
        if session.phase != Phase::Verification {
            bail!(SessionError::PhaseBlocked { tool: self.name().to_string(), phase: session.phase.as_str().to_string() });
        }

        let verified = args
            .get("verified")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        if verified.is_empty() {
            bail!(SessionError::ValidationFailed("verified must be non-empty".to_string()));
        }

        for v in &verified {
            let symbol = v
                .get("symbol")
                .and_then(|s| s.as_str())
                .ok_or_else(|| anyhow!("verified entry missing symbol"))?;
            let status = v
                .get("status")
                .and_then(|s| s.as_str())
                .ok_or_else(|| anyhow!("verified entry missing status"))?;
            let tool = v
                .get("tool")
                .and_then(|s| s.as_str())
                .ok_or_else(|| anyhow!("verified entry missing tool"))?;
            if !VERIFICATION_TOOLS.contains(&tool) {
                bail!(SessionError::ValidationFailed(format!("'{tool}' is not a recognized verification tool")));
            }
            let target = v
                .get("target")
                .and_then(|s| s.as_str())
                .ok_or_else(|| anyhow!("verified entry missing target"))?;
            let result = v
                .get("result")
                .and_then(|s| s.as_str())
                .ok_or_else(|| anyhow!("verified entry missing result"))?;

            let (source, confidence) = match status {
                "confirmed" => (SymbolSource::Fact, 0.9),
                "rejected" => (SymbolSource::Unresolved, 0.0),
                other => bail!(SessionError::ValidationFailed(format!("unknown verification status '{other}'"))),
            };
            session.query_frame.upsert_symbol(MappedSymbol {
                name: symbol.to_string(),
                source,
                confidence,
                evidence: format!("{tool}:{target} -> {result}"),
            })?;
        }

        advance_investigative(&mut session, Phase::Verification);
        Ok(ToolResult::json("submit_verification", json!({ "phase": session.phase.as_str() })))
    }
}

pub struct SubmitImpactAnalysisTool;

#[async_trait]
impl Tool for SubmitImpactAnalysisTool {
    fn name(&self) -> &str {
        "submit_impact_analysis"
    }
    fn description(&self) -> &str {
        "Completes IMPACT_ANALYSIS: every file analyze_impact marked must_verify needs a decision, and advances to READY."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "session_id": {"type": "string"},
                "decisions": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "file": {"type": "string"},
                            "status": {"type": "string", "enum": ["will_modify", "no_change_needed", "not_affected"]},
                            "reason": {"type": "string"}
                        },
                        "required": ["file", "status"]
                    }
                }
            },
            "required": ["session_id", "decisions"]
        })
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let handle = require_session(ctx, &args).await?;
        let mut session = handle.lock().await;
        if session.phase != Phase::ImpactAnalysis {
            bail!(SessionError::PhaseBlocked { tool: self.name().to_string(), phase: session.phase.as_str().to_string() });
        }
        if !session.impact_analysis_done {
            bail!(SessionError::ValidationFailed("call analyze_impact before submit_impact_analysis".to_string()));
        }

        let decisions = args
            .get("decisions")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let mut decided: std::collections::HashSet<String> = std::collections::HashSet::new();
        for d in &decisions {
            let file = d
                .get("file")
                .and_then(|s| s.as_str())
                .ok_or_else(|| anyhow!("decision missing file"))?;
            let status = d
                .get("status")
                .and_then(|s| s.as_str())
                .ok_or_else(|| anyhow!("decision missing status"))?;
            if !["will_modify", "no_change_needed", "not_affected"].contains(&status) {
                bail!(SessionError::ValidationFailed(format!("unknown impact status '{status}'")));
            }
            if status != "will_modify" {
                let reason = d.get("reason").and_then(|s| s.as_str()).unwrap_or("");
                if reason.trim().len() < 10 {
                    bail!(SessionError::ValidationFailed(format!(
                        "decision for '{file}' with status '{status}' requires a reason of at least ten characters"
                    )));
                }
            }
            decided.insert(file.to_string());
        }

        let missing: Vec<&String> = session
            .pending_impact_targets
            .iter()
            .filter(|f| !decided.contains(*f))
            .collect();
        if !missing.is_empty() {
            bail!(SessionError::ValidationFailed(format!(
                "missing decisions for must_verify file(s): {}",
                missing.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
            )));
        }

        session.pending_impact_targets.clear();
        session.impact_analysis_done = false;
        advance_investigative(&mut session, Phase::ImpactAnalysis);
        Ok(ToolResult::json("submit_impact_analysis", json!({ "phase": session.phase.as_str() })))
    }
}

pub struct UpdateContextTool;

#[async_trait]
impl Tool for UpdateContextTool {
    fn name(&self) -> &str {
        "update_context"
    }
    fn description(&self) -> &str {
        "Persists agent-generated design-doc summaries and/or begins tracking a new design doc."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "summaries": {"type": "object", "additionalProperties": {"type": "string"}},
                "track_design_doc": {"type": "string"}
            }
        })
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let provider = ContextProvider::new(&ctx.repo_root);
        if let Some(summaries) = args.get("summaries").and_then(|v| v.as_object()) {
            let map = summaries
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect();
            provider.update_summaries(map)?;
        }
        if let Some(path) = args.get("track_design_doc").and_then(|v| v.as_str()) {
            provider.track_design_doc(path)?;
        }
        // session_id is unused here but keep the signature uniform with other
        // ALWAYS_ADMITTED tools; no session state changes as a result.
        let _ = require_session_id(&args).ok();
        Ok(ToolResult::json("update_context", json!({ "ok": true })))
    }
}
