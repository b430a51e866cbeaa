use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::hash16;

/// `<repo>/.code-intel/context.yml`: design-doc sources and their last-computed
/// summaries, the project-rules source and its summary, document-search globs,
/// and an optional free-form research block. Staleness is detected the same
/// way the fingerprint store detects file changes: each tracked source's
/// content hash is recomputed on read and compared to the hash recorded
/// alongside its summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectContext {
    pub design_docs: Vec<DocSource>,
    pub project_rules: Option<DocSource>,
    pub document_search: DocumentSearchConfig,
    pub doc_research: Option<serde_yaml::Value>,
}

/// A single tracked document with its last-computed summary and the hash of
/// the content that summary was computed from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocSource {
    pub path: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub content_hash: String,
    /// Set on read, never persisted: whether `content_hash` still matches the
    /// file on disk.
    #[serde(skip)]
    pub stale: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentSearchConfig {
    pub include_globs: Vec<String>,
    pub exclude_globs: Vec<String>,
}

impl Default for DocumentSearchConfig {
    fn default() -> Self {
        Self {
            include_globs: vec!["**/*.md".to_string(), "**/*.markdown".to_string()],
            exclude_globs: vec![
                "**/node_modules/**".to_string(),
                "**/.git/**".to_string(),
                "**/.code-intel/**".to_string(),
            ],
        }
    }
}

impl ProjectContext {
    fn path(repo_root: &Path) -> PathBuf {
        repo_root.join(".code-intel").join("context.yml")
    }

    /// Loads the context file, computing staleness for every tracked source
    /// against the repository on disk. Absence is not an error: an empty,
    /// non-stale context is returned and logged at `warn`.
    pub fn load(repo_root: &Path) -> Result<Self> {
        let path = Self::path(repo_root);
        let mut ctx: ProjectContext = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
        } else {
            tracing::warn!(path = %path.display(), "no context.yml, using empty project context");
            ProjectContext::default()
        };

        for doc in ctx.design_docs.iter_mut() {
            doc.stale = Self::is_stale(repo_root, doc);
        }
        if let Some(rules) = ctx.project_rules.as_mut() {
            rules.stale = Self::is_stale(repo_root, rules);
        }
        Ok(ctx)
    }

    fn is_stale(repo_root: &Path, doc: &DocSource) -> bool {
        let full = repo_root.join(&doc.path);
        match std::fs::read(&full) {
            Ok(content) => hash16(&content) != doc.content_hash,
            Err(_) => true,
        }
    }

    /// Persists agent-generated summaries back into `context.yml`, recomputing
    /// each updated source's hash so the next read is fresh. `summaries` maps
    /// a tracked source's relative path to its new summary text.
    pub fn update_summaries(
        &mut self,
        repo_root: &Path,
        summaries: HashMap<String, String>,
    ) -> Result<()> {
        for doc in self.design_docs.iter_mut() {
            if let Some(summary) = summaries.get(&doc.path) {
                doc.summary = summary.clone();
                if let Ok(content) = std::fs::read(repo_root.join(&doc.path)) {
                    doc.content_hash = hash16(&content);
                }
                doc.stale = false;
            }
        }
        if let Some(rules) = self.project_rules.as_mut() {
            if let Some(summary) = summaries.get(&rules.path) {
                rules.summary = summary.clone();
                if let Ok(content) = std::fs::read(repo_root.join(&rules.path)) {
                    rules.content_hash = hash16(&content);
                }
                rules.stale = false;
            }
        }
        self.save(repo_root)
    }

    pub fn save(&self, repo_root: &Path) -> Result<()> {
        let path = Self::path(repo_root);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_yaml::to_string(self)?;
        std::fs::write(&path, raw).with_context(|| format!("writing {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_empty_non_stale_context() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ProjectContext::load(dir.path()).unwrap();
        assert!(ctx.design_docs.is_empty());
    }

    #[test]
    fn detects_staleness_after_edit() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("DESIGN.md"), b"original").unwrap();
        let mut ctx = ProjectContext {
            design_docs: vec![DocSource {
                path: "DESIGN.md".to_string(),
                summary: "about the original".to_string(),
                content_hash: hash16(b"original"),
                stale: false,
            }],
            ..Default::default()
        };
        ctx.save(dir.path()).unwrap();

        // unchanged: fresh
        let reloaded = ProjectContext::load(dir.path()).unwrap();
        assert!(!reloaded.design_docs[0].stale);

        // edit underlying file: now stale
        std::fs::write(dir.path().join("DESIGN.md"), b"changed").unwrap();
        let reloaded = ProjectContext::load(dir.path()).unwrap();
        assert!(reloaded.design_docs[0].stale);
    }

    #[test]
    fn update_summaries_recomputes_hash_and_clears_staleness() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("DESIGN.md"), b"v2").unwrap();
        let mut ctx = ProjectContext {
            design_docs: vec![DocSource {
                path: "DESIGN.md".to_string(),
                summary: String::new(),
                content_hash: String::new(),
                stale: true,
            }],
            ..Default::default()
        };
        let mut summaries = HashMap::new();
        summaries.insert("DESIGN.md".to_string(), "updated summary".to_string());
        ctx.update_summaries(dir.path(), summaries).unwrap();
        assert_eq!(ctx.design_docs[0].summary, "updated summary");
        assert!(!ctx.design_docs[0].stale);

        let reloaded = ProjectContext::load(dir.path()).unwrap();
        assert!(!reloaded.design_docs[0].stale);
    }
}
