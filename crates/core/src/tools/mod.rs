//! The agent-facing tool surface (§6). Every `Tool` impl below corresponds
//! to exactly one row of the tool surface table; `ToolRegistry::definitions`
//! is the contract that table names.

pub mod impact_tool;
pub mod investigation;
pub mod outcome_tools;
pub mod permission;
pub mod review;
pub mod semantic;
pub mod session_tools;
pub mod write_guard;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use code_intel_config::Settings;
use code_intel_index::CodeIndex;
use permission::ToolPermission;

use crate::session::{Session, SessionRegistry};

pub type IndexHandle = Arc<CodeIndex>;

/// Every gated tool call carries its session id as an ordinary argument
/// (`session_id`) rather than through a dispatcher-level field -- the
/// dispatcher itself is phase-and-session agnostic; only the tool body
/// needs the `Session` it operates on.
pub fn require_session_id(args: &Value) -> Result<&str> {
    args.get("session_id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("missing session_id"))
}

pub async fn require_session(ctx: &ToolContext, args: &Value) -> Result<Arc<Mutex<Session>>> {
    let id = require_session_id(args)?;
    ctx.sessions
        .get(id)
        .await
        .ok_or_else(|| crate::error::SessionError::NoActiveSession.into())
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Value;
    fn permission(&self) -> ToolPermission {
        ToolPermission::ReadOnly
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult>;
}

/// Carried into every dispatched tool call. `sessions` and `index` are
/// process-wide services (cheaply `Arc`-cloned); `repo_root` is the
/// canonicalized project root this dispatcher instance was built for.
#[derive(Clone)]
pub struct ToolContext {
    pub repo_root: PathBuf,
    pub sessions: Arc<SessionRegistry>,
    pub index: Option<IndexHandle>,
    pub settings: Arc<Settings>,
}

pub struct ToolResult {
    pub output: Value,
    pub title: String,
}

impl ToolResult {
    pub fn json(title: impl Into<String>, output: Value) -> Self {
        Self { output, title: title.into() }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: HashMap::new() }
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<_> = self
            .tools
            .values()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registers every tool named in the §6 tool surface table.
pub fn default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    registry.register(Box::new(session_tools::StartSessionTool));
    registry.register(Box::new(session_tools::BeginPhaseGateTool));
    registry.register(Box::new(session_tools::SetQueryFrameTool));
    registry.register(Box::new(session_tools::GetSessionStatusTool));
    registry.register(Box::new(session_tools::CheckPhaseNecessityTool));
    registry.register(Box::new(session_tools::SubmitExplorationTool));
    registry.register(Box::new(session_tools::SubmitSemanticTool));
    registry.register(Box::new(session_tools::SubmitVerificationTool));
    registry.register(Box::new(session_tools::SubmitImpactAnalysisTool));

    registry.register(Box::new(investigation::SearchTextTool));
    registry.register(Box::new(investigation::SearchFilesTool));
    registry.register(Box::new(investigation::FindDefinitionsTool));
    registry.register(Box::new(investigation::FindReferencesTool));
    registry.register(Box::new(investigation::GetSymbolsTool));
    registry.register(Box::new(investigation::GetFunctionAtLineTool));
    registry.register(Box::new(investigation::AnalyzeStructureTool));

    registry.register(Box::new(semantic::SyncIndexTool));
    registry.register(Box::new(semantic::SemanticSearchTool));
    registry.register(Box::new(semantic::FetchChunkDetailTool));
    registry.register(Box::new(semantic::ValidateSymbolRelevanceTool));
    registry.register(Box::new(semantic::ConfirmSymbolRelevanceTool));

    registry.register(Box::new(impact_tool::AnalyzeImpactTool));

    registry.register(Box::new(write_guard::CheckWriteTargetTool));
    registry.register(Box::new(write_guard::AddExploredFilesTool));
    registry.register(Box::new(write_guard::RevertToExplorationTool));

    registry.register(Box::new(review::SubmitForReviewTool));
    registry.register(Box::new(review::ReviewChangesTool));
    registry.register(Box::new(review::FinalizeChangesTool));
    registry.register(Box::new(review::SubmitQualityReviewTool));
    registry.register(Box::new(review::MergeToBaseTool));
    registry.register(Box::new(review::CleanupStaleBranchesTool));

    registry.register(Box::new(outcome_tools::RecordOutcomeTool));
    registry.register(Box::new(outcome_tools::GetOutcomeStatsTool));
    registry.register(Box::new(outcome_tools::RecordVerificationFailureTool));
    registry.register(Box::new(outcome_tools::RecordInterventionUsedTool));
    registry.register(Box::new(outcome_tools::GetInterventionStatusTool));

    registry.register(Box::new(session_tools::UpdateContextTool));

    registry
}
