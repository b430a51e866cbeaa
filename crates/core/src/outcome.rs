//! Intervention & Outcome Logs (C9's §4.9 intervention counters live on
//! `Session` itself; this module is the append-only outcome record, C12,
//! §4.10). Persisted at `<repo>/.code-intel/logs/outcomes.jsonl` -- the
//! spec's filesystem layout is authoritative here, not the path the
//! original implementation hardcoded relative to its own module.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::Phase;
use code_intel_index::{Agreement, CodeIndex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
    Partial,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub session_id: String,
    pub outcome: Outcome,
    pub phase_at_outcome: Phase,
    pub intent: crate::session::Intent,
    pub analysis: String,
    pub used_semantic_search: bool,
    pub exploration_confidence: Option<crate::session::Confidence>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OutcomeStats {
    pub by_outcome: HashMap<String, usize>,
    pub by_intent: HashMap<String, usize>,
    pub by_phase_at_outcome: HashMap<String, usize>,
    pub semantic_search_correlation: HashMap<String, usize>,
    pub confidence_correlation: HashMap<String, usize>,
}

pub struct OutcomeLog {
    path: PathBuf,
}

impl OutcomeLog {
    pub fn open(repo_root: &Path) -> Self {
        Self { path: repo_root.join(".code-intel").join("logs").join("outcomes.jsonl") }
    }

    /// Appends one record. On `success` with mapped symbols present, each is
    /// cached as a learned pair and exported as an agreement. On `failure`
    /// the caller is responsible for deleting the task branch (best-effort,
    /// never blocking the outcome record itself).
    pub async fn record(
        &self,
        record: OutcomeRecord,
        index: Option<&CodeIndex>,
        query_frame: Option<&crate::query_frame::QueryFrame>,
    ) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        if record.outcome == Outcome::Success {
            if let (Some(index), Some(qf)) = (index, query_frame) {
                for symbol in &qf.mapped_symbols {
                    let _ = index
                        .learn_pair(&record.analysis, &symbol.name, symbol.confidence, &symbol.evidence, &record.session_id)
                        .await;
                    let _ = index
                        .record_agreement(&Agreement {
                            nl_term: record.analysis.clone(),
                            symbol: symbol.name.clone(),
                            rationale: format!("confirmed during session {}", record.session_id),
                            code_evidence: symbol.evidence.clone(),
                            session_id: record.session_id.clone(),
                        })
                        .await;
                }
            }
        }

        use std::io::Write;
        let line = serde_json::to_string(&record)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening {}", self.path.display()))?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<OutcomeRecord>> {
        if !self.path.exists() {
            return Ok(vec![]);
        }
        let raw = std::fs::read_to_string(&self.path)?;
        Ok(raw
            .lines()
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect())
    }

    pub fn stats(&self) -> Result<OutcomeStats> {
        let records = self.read_all()?;
        let mut stats = OutcomeStats::default();
        for r in &records {
            *stats.by_outcome.entry(format!("{:?}", r.outcome)).or_insert(0) += 1;
            *stats.by_intent.entry(format!("{:?}", r.intent)).or_insert(0) += 1;
            *stats.by_phase_at_outcome.entry(r.phase_at_outcome.as_str().to_string()).or_insert(0) += 1;
            *stats
                .semantic_search_correlation
                .entry(r.used_semantic_search.to_string())
                .or_insert(0) += 1;
            if let Some(c) = r.exploration_confidence {
                *stats.confidence_correlation.entry(format!("{c:?}")).or_insert(0) += 1;
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Intent;

    #[tokio::test]
    async fn record_appends_without_truncating_prior_entries() {
        let dir = tempfile::tempdir().unwrap();
        let log = OutcomeLog::open(dir.path());
        for i in 0..3 {
            log.record(
                OutcomeRecord {
                    session_id: format!("s{i}"),
                    outcome: Outcome::Success,
                    phase_at_outcome: Phase::Merged,
                    intent: Intent::Modify,
                    analysis: "fixed login bug".to_string(),
                    used_semantic_search: false,
                    exploration_confidence: None,
                    timestamp: Utc::now(),
                },
                None,
                None,
            )
            .await
            .unwrap();
        }
        assert_eq!(log.read_all().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn stats_aggregate_by_outcome_and_intent() {
        let dir = tempfile::tempdir().unwrap();
        let log = OutcomeLog::open(dir.path());
        log.record(
            OutcomeRecord {
                session_id: "s1".into(),
                outcome: Outcome::Failure,
                phase_at_outcome: Phase::Verification,
                intent: Intent::Investigate,
                analysis: "gave up".into(),
                used_semantic_search: true,
                exploration_confidence: Some(crate::session::Confidence::Low),
                timestamp: Utc::now(),
            },
            None,
            None,
        )
        .await
        .unwrap();

        let stats = log.stats().unwrap();
        assert_eq!(stats.by_outcome["Failure"], 1);
        assert_eq!(stats.by_intent["Investigate"], 1);
    }
}
