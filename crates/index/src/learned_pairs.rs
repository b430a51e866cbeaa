//! Learned-Pair Cache (§4's C5): natural-language-term -> symbol associations
//! an agent has already proven correct in a previous session, persisted so
//! the next session doesn't have to re-derive them. Backed by
//! `.code-intel/learned_pairs.json`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Entries older than this are dropped on the next write — a pair nobody has
/// re-confirmed in a month is more likely stale than useful.
const MAX_AGE_DAYS: i64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnedPair {
    pub nl_term: String,
    pub symbol: String,
    pub similarity: f32,
    pub code_evidence: String,
    pub session_id: String,
    pub learned_at: DateTime<Utc>,
}

pub struct LearnedPairCache {
    path: PathBuf,
    pairs: HashMap<(String, String), LearnedPair>,
}

impl LearnedPairCache {
    pub fn open(repo_root: &Path) -> Result<Self> {
        let path = repo_root.join(".code-intel").join("learned_pairs.json");
        let pairs = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let list: Vec<LearnedPair> = match serde_json::from_str(&raw) {
                Ok(l) => l,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to parse learned_pairs.json, starting empty");
                    vec![]
                }
            };
            list.into_iter()
                .map(|p| ((normalize(&p.nl_term), normalize(&p.symbol)), p))
                .collect()
        } else {
            HashMap::new()
        };

        Ok(Self { path, pairs })
    }

    /// Inserts or overwrites the pair keyed by `(nl_term, symbol)`
    /// case-insensitively, then prunes anything older than `MAX_AGE_DAYS` and
    /// persists.
    pub fn learn(
        &mut self,
        nl_term: &str,
        symbol: &str,
        similarity: f32,
        code_evidence: &str,
        session_id: &str,
    ) -> Result<()> {
        let key = (normalize(nl_term), normalize(symbol));
        self.pairs.insert(
            key,
            LearnedPair {
                nl_term: nl_term.to_string(),
                symbol: symbol.to_string(),
                similarity,
                code_evidence: code_evidence.to_string(),
                session_id: session_id.to_string(),
                learned_at: Utc::now(),
            },
        );
        self.prune();
        self.save()
    }

    fn prune(&mut self) {
        let cutoff = Utc::now() - Duration::days(MAX_AGE_DAYS);
        self.pairs.retain(|_, p| p.learned_at >= cutoff);
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let list: Vec<&LearnedPair> = self.pairs.values().collect();
        let raw = serde_json::to_string_pretty(&list)?;
        std::fs::write(&self.path, raw).with_context(|| format!("writing {}", self.path.display()))
    }

    /// Exact match for a single `(nl_term, symbol)` pair.
    pub fn get(&self, nl_term: &str, symbol: &str) -> Option<&LearnedPair> {
        self.pairs.get(&(normalize(nl_term), normalize(symbol)))
    }

    /// All previously learned symbols for an `nl_term`, regardless of which
    /// symbol they were paired with — used to seed a search before falling
    /// back to the vector index.
    pub fn find_matches(&self, nl_term: &str) -> Vec<&LearnedPair> {
        let key = normalize(nl_term);
        let mut matches: Vec<&LearnedPair> = self
            .pairs
            .values()
            .filter(|p| normalize(&p.nl_term) == key)
            .collect();
        matches.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));
        matches
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn learn_then_get_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = LearnedPairCache::open(dir.path()).unwrap();
        cache
            .learn("auth flow", "AuthService", 0.82, "src/auth.rs:12", "sess-1")
            .unwrap();

        let reloaded = LearnedPairCache::open(dir.path()).unwrap();
        let found = reloaded.get("Auth Flow", "authservice").unwrap();
        assert_eq!(found.symbol, "AuthService");
    }

    #[test]
    fn find_matches_is_case_insensitive_and_ranked() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = LearnedPairCache::open(dir.path()).unwrap();
        cache.learn("login", "LoginHandler", 0.5, "a", "s").unwrap();
        cache.learn("LOGIN", "AuthService", 0.9, "b", "s").unwrap();

        let matches = cache.find_matches("Login");
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].symbol, "AuthService");
    }

    #[test]
    fn stale_pairs_are_pruned_on_write() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = LearnedPairCache::open(dir.path()).unwrap();
        cache.pairs.insert(
            (normalize("old"), normalize("OldSymbol")),
            LearnedPair {
                nl_term: "old".to_string(),
                symbol: "OldSymbol".to_string(),
                similarity: 0.9,
                code_evidence: "x".to_string(),
                session_id: "s".to_string(),
                learned_at: Utc::now() - Duration::days(45),
            },
        );
        cache.learn("fresh", "FreshSymbol", 0.9, "y", "s").unwrap();

        assert!(cache.get("old", "OldSymbol").is_none());
        assert!(cache.get("fresh", "FreshSymbol").is_some());
    }
}
