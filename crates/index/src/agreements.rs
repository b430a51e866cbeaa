//! Agreements Generator (§4's C13): durable Markdown records of an NL-term ->
//! symbol mapping an agent and the system have converged on, saved under
//! `.code-intel/agreements/` and indexed into the map collection so future
//! searches for the same term short-circuit straight to the answer.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;

use crate::embedder::Embedder;
use crate::store::VectorStore;

#[derive(Debug, Clone, Serialize)]
pub struct Agreement {
    pub nl_term: String,
    pub symbol: String,
    pub rationale: String,
    pub code_evidence: String,
    pub session_id: String,
}

pub struct AgreementsGenerator {
    embedder: Arc<dyn Embedder>,
}

impl AgreementsGenerator {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }

    /// Writes the agreement file and indexes `nl_term -> symbol` into the
    /// map collection in one step. Returns the path written.
    pub async fn record(
        &self,
        repo_root: &Path,
        store: &VectorStore,
        agreement: &Agreement,
    ) -> Result<PathBuf> {
        let path = self.save(repo_root, agreement)?;

        let embedding = self.embedder.embed(&[agreement.nl_term.as_str()]).await?;
        if let Some(vec) = embedding.into_iter().next() {
            store.upsert_map_entry(
                &agreement.nl_term,
                &agreement.symbol,
                &format!("agreement:{}", path.file_name().unwrap().to_string_lossy()),
                &vec,
                self.embedder.model_id(),
            )?;
        }

        Ok(path)
    }

    fn save(&self, repo_root: &Path, agreement: &Agreement) -> Result<PathBuf> {
        let dir = repo_root.join(".code-intel").join("agreements");
        std::fs::create_dir_all(&dir)?;

        let filename = format!("{}.md", sanitize_filename(&agreement.nl_term));
        let path = dir.join(&filename);

        let now = Utc::now().to_rfc3339();
        let body = format!(
            "---\nnl_term: \"{}\"\nsymbol: \"{}\"\nsession_id: \"{}\"\ncreated_at: \"{}\"\n---\n\n\
             # {}\n\n**Symbol:** `{}`\n\n## Rationale\n\n{}\n\n## Code evidence\n\n```\n{}\n```\n",
            escape_yaml(&agreement.nl_term),
            escape_yaml(&agreement.symbol),
            escape_yaml(&agreement.session_id),
            now,
            agreement.nl_term,
            agreement.symbol,
            agreement.rationale,
            agreement.code_evidence,
        );

        std::fs::write(&path, body).with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }
}

fn escape_yaml(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Lowercases, replaces anything that isn't alphanumeric/`-`/`_` with `-`,
/// and collapses repeats, so arbitrary NL terms become safe filenames.
pub fn sanitize_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_dash = false;
    for c in name.trim().to_lowercase().chars() {
        if c.is_alphanumeric() || c == '_' {
            out.push(c);
            last_was_dash = false;
        } else if !last_was_dash {
            out.push('-');
            last_was_dash = true;
        }
    }
    let trimmed = out.trim_matches('-').to_string();
    if trimmed.is_empty() {
        "agreement".to_string()
    } else {
        trimmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::TfIdfEmbedder;

    #[test]
    fn sanitize_filename_handles_punctuation_and_spaces() {
        assert_eq!(sanitize_filename("Auth / Login Flow!"), "auth-login-flow");
        assert_eq!(sanitize_filename("   "), "agreement");
        assert_eq!(sanitize_filename("already_safe_name"), "already_safe_name");
    }

    #[tokio::test]
    async fn record_writes_file_and_indexes_map_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::open(dir.path()).unwrap();
        let gen = AgreementsGenerator::new(Arc::new(TfIdfEmbedder::new()));

        let agreement = Agreement {
            nl_term: "authentication flow".to_string(),
            symbol: "AuthService::login".to_string(),
            rationale: "handles credential verification end to end".to_string(),
            code_evidence: "fn login(&self, creds: &Credentials) -> Result<Session>".to_string(),
            session_id: "sess-42".to_string(),
        };

        let path = gen.record(dir.path(), &store, &agreement).await.unwrap();
        assert!(path.exists());
        assert!(path.starts_with(dir.path().join(".code-intel/agreements")));
        assert_eq!(store.map_count(), 1);
    }
}
