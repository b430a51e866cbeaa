//! Context Provider (C6): the staleness-aware half that sits in front of
//! `code-intel-config::context::ProjectContext`. The config crate owns
//! loading/persisting `context.yml` and the hash-based staleness check
//! itself (§4.11); this module is what `start_session` and `analyze_impact`
//! actually call, formatting the result for tool consumption and owning the
//! doc-file read needed by the Impact Analyzer's document-mention search.

use std::path::Path;

use anyhow::Result;
use code_intel_config::{DocSource, ProjectContext};
use serde::Serialize;

pub struct ContextProvider {
    repo_root: std::path::PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextSummary {
    pub project_rules_summary: Option<String>,
    pub stale_sources: Vec<String>,
    pub doc_change_report: Vec<String>,
}

impl ContextProvider {
    pub fn new(repo_root: &Path) -> Self {
        Self { repo_root: repo_root.to_path_buf() }
    }

    /// Seeds a new session: project rules summary plus a report of which
    /// tracked design docs are stale, without blocking session creation.
    pub fn seed_for_session(&self) -> Result<ContextSummary> {
        let ctx = ProjectContext::load(&self.repo_root)?;
        let stale_sources: Vec<String> = ctx
            .design_docs
            .iter()
            .filter(|d| d.stale)
            .map(|d| d.path.clone())
            .collect();

        let doc_change_report = stale_sources
            .iter()
            .map(|p| format!("{p} changed since its summary was last computed"))
            .collect();

        Ok(ContextSummary {
            project_rules_summary: ctx.project_rules.map(|r| r.summary),
            stale_sources,
            doc_change_report,
        })
    }

    /// The include/exclude globs `analyze_impact` uses for its
    /// document-mention search.
    pub fn document_search_globs(&self) -> Result<(Vec<String>, Vec<String>)> {
        let ctx = ProjectContext::load(&self.repo_root)?;
        Ok((ctx.document_search.include_globs, ctx.document_search.exclude_globs))
    }

    /// Reads every file matched by the configured document-search globs,
    /// for the Impact Analyzer's document-mention pass.
    pub fn read_doc_files(&self) -> Result<Vec<(String, String)>> {
        let (include, exclude) = self.document_search_globs()?;
        let mut out = Vec::new();
        for pattern in &include {
            let full_pattern = self.repo_root.join(pattern);
            for entry in ::glob::glob(&full_pattern.to_string_lossy())? {
                let Ok(path) = entry else { continue };
                let rel = path
                    .strip_prefix(&self.repo_root)
                    .unwrap_or(&path)
                    .to_string_lossy()
                    .to_string();
                if exclude.iter().any(|ex| {
                    ::glob::Pattern::new(ex)
                        .map(|p| p.matches(&rel))
                        .unwrap_or(false)
                }) {
                    continue;
                }
                if let Ok(content) = std::fs::read_to_string(&path) {
                    out.push((rel, content));
                }
            }
        }
        Ok(out)
    }

    /// `update_context`: persists agent-generated summaries, recomputing
    /// each source's hash so the next read is fresh.
    pub fn update_summaries(&self, summaries: std::collections::HashMap<String, String>) -> Result<()> {
        let mut ctx = ProjectContext::load(&self.repo_root)?;
        ctx.update_summaries(&self.repo_root, summaries)
    }

    pub fn track_design_doc(&self, path: &str) -> Result<()> {
        let mut ctx = ProjectContext::load(&self.repo_root)?;
        if !ctx.design_docs.iter().any(|d| d.path == path) {
            ctx.design_docs.push(DocSource {
                path: path.to_string(),
                summary: String::new(),
                content_hash: String::new(),
                stale: true,
            });
            ctx.save(&self.repo_root)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_for_session_on_missing_context_is_empty_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ContextProvider::new(dir.path());
        let summary = provider.seed_for_session().unwrap();
        assert!(summary.stale_sources.is_empty());
    }

    #[test]
    fn read_doc_files_respects_default_markdown_glob() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("README.md"), "mentions AuthService here").unwrap();
        let provider = ContextProvider::new(dir.path());
        let docs = provider.read_doc_files().unwrap();
        assert!(docs.iter().any(|(p, _)| p == "README.md"));
    }
}
