//! `code-intel-core`: the Phase-Gated Session Engine. Owns the Session State
//! Machine, Query Frame, Branch Manager, Impact Analyzer, Context Provider,
//! Outcome/Intervention logs, and the Tool Dispatcher that fronts all of it.
//!
//! [`ProjectServices`] is the composition root: one instance per
//! canonicalized repository root, constructed lazily and cached by the
//! transport (the CLI's stdio loop today; an MCP server tomorrow), per §2.

pub mod branch;
pub mod context_provider;
pub mod dispatcher;
pub mod error;
pub mod impact;
pub mod outcome;
pub mod query_frame;
pub mod session;
pub mod tools;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Mutex;

use code_intel_config::Settings;
use code_intel_index::CodeIndex;

use session::SessionRegistry;
use tools::{ToolContext, ToolRegistry};

/// Everything one project needs: its loaded settings, its session registry,
/// its (lazily built) vector index, and the tool registry bound to all
/// three. Cheap to clone -- every field is an `Arc`.
#[derive(Clone)]
pub struct ProjectServices {
    pub repo_root: PathBuf,
    pub settings: Arc<Settings>,
    pub sessions: Arc<SessionRegistry>,
    pub index: Option<Arc<CodeIndex>>,
    pub registry: Arc<ToolRegistry>,
}

impl ProjectServices {
    /// Opens (but does not build) the project's vector index and loads its
    /// `code-intel.toml`. `api_key` controls the embedding backend exactly as
    /// `CodeIndex::open_sync` does -- absent, the index falls back to the
    /// local TF-IDF embedder rather than failing to start.
    pub fn open(repo_root: &Path, api_key: Option<String>) -> Result<Self> {
        let repo_root = repo_root
            .canonicalize()
            .unwrap_or_else(|_| repo_root.to_path_buf());
        let settings = Arc::new(Settings::load(&repo_root)?);

        let index = match CodeIndex::open_sync(&repo_root, api_key) {
            Ok(idx) => Some(Arc::new(idx)),
            Err(e) => {
                tracing::warn!(error = %e, "vector index unavailable; semantic tools will report chromadb_not_available");
                None
            }
        };

        Ok(Self {
            repo_root,
            settings,
            sessions: Arc::new(SessionRegistry::new()),
            index,
            registry: Arc::new(tools::default_registry()),
        })
    }

    pub fn tool_context(&self) -> ToolContext {
        ToolContext {
            repo_root: self.repo_root.clone(),
            sessions: self.sessions.clone(),
            index: self.index.clone(),
            settings: self.settings.clone(),
        }
    }

    pub async fn dispatch(&self, tool: &str, args: serde_json::Value) -> Result<serde_json::Value> {
        let ctx = self.tool_context();
        dispatcher::dispatch(&self.registry, &ctx, tool, args).await
    }
}

/// Caches one [`ProjectServices`] per canonicalized repository root so a
/// long-lived transport process doesn't reopen the index on every request.
#[derive(Default)]
pub struct ServiceRegistry {
    projects: Mutex<HashMap<PathBuf, ProjectServices>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_open(&self, repo_root: &Path, api_key: Option<String>) -> Result<ProjectServices> {
        let canonical = repo_root.canonicalize().unwrap_or_else(|_| repo_root.to_path_buf());
        let mut projects = self.projects.lock().await;
        if let Some(existing) = projects.get(&canonical) {
            return Ok(existing.clone());
        }
        let services = ProjectServices::open(&canonical, api_key)?;
        projects.insert(canonical, services.clone());
        Ok(services)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_falls_back_when_no_api_key_and_runs_a_tool() {
        let dir = tempfile::tempdir().unwrap();
        let services = ProjectServices::open(dir.path(), None).unwrap();
        let out = services
            .dispatch(
                "start_session",
                serde_json::json!({"raw_query": "login returns 500 when password is empty", "intent": "modify"}),
            )
            .await
            .unwrap();
        assert!(out.get("session_id").is_some());
    }

    #[tokio::test]
    async fn service_registry_reuses_instance_for_same_root() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ServiceRegistry::new();
        let a = registry.get_or_open(dir.path(), None).await.unwrap();
        let b = registry.get_or_open(dir.path(), None).await.unwrap();
        assert!(Arc::ptr_eq(&a.sessions, &b.sessions));
    }
}
