//! Session State Machine (C9): the long-lived record of one agent
//! investigation, its phase, its Query Frame, and the counters that gate
//! revert and intervention behavior. §4.1, §4.9, §9 "Confidence formula".

pub mod phase;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use code_intel_config::GateLevel;

use crate::error::SessionError;
use crate::query_frame::{QueryFrame, RiskLevel};
pub use phase::Phase;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Implement,
    Modify,
    Investigate,
    Question,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// A recorded agent assessment at a `check_phase_necessity` juncture: a
/// boolean plus a human-readable reason of at least ten characters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseAssessment {
    pub phase: Phase,
    pub necessary: bool,
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
}

/// `(start ns, end ns, tool, argument digest, result digest)` -- one entry
/// per dispatched tool call, kept for audit and for `get_session_status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool: String,
    pub start_ns: u128,
    pub end_ns: u128,
    pub arg_digest: String,
    pub result_digest: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreparedCommit {
    pub message: String,
    pub keep: Vec<String>,
    pub discard: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub intent: Intent,
    pub raw_query: String,
    pub repo_root: PathBuf,
    pub gate_level: GateLevel,
    pub phase: Phase,
    pub query_frame: QueryFrame,
    pub assessments: Vec<PhaseAssessment>,
    pub task_branch: Option<String>,
    pub quality_review_enabled: bool,
    pub skip_implementation: bool,
    pub commit_prepared: bool,
    pub prepared_commit: Option<PreparedCommit>,
    pub verification_failure_count: u32,
    pub intervention_count: u32,
    pub revert_count: u32,
    pub explored_files: HashSet<String>,
    pub tool_calls: Vec<ToolCallRecord>,
    /// `must_verify` files returned by the most recent `analyze_impact` call,
    /// still awaiting a decision in `submit_impact_analysis`.
    pub pending_impact_targets: Vec<String>,
    /// Set by `analyze_impact`; `submit_impact_analysis` refuses to run
    /// before at least one call, even if that call's `must_verify` was empty.
    pub impact_analysis_done: bool,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(intent: Intent, raw_query: String, repo_root: PathBuf, gate_level: GateLevel) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            query_frame: QueryFrame::new(raw_query.clone()),
            intent,
            raw_query,
            repo_root,
            gate_level,
            phase: Phase::Exploration, // begin_phase_gate is responsible for the (unset) -> EXPLORATION transition
            assessments: Vec::new(),
            task_branch: None,
            quality_review_enabled: true,
            skip_implementation: false,
            commit_prepared: false,
            prepared_commit: None,
            verification_failure_count: 0,
            intervention_count: 0,
            revert_count: 0,
            explored_files: HashSet::new(),
            tool_calls: Vec::new(),
            pending_impact_targets: Vec::new(),
            impact_analysis_done: false,
            created_at: Utc::now(),
        }
    }

    pub fn risk_level(&self) -> RiskLevel {
        self.query_frame.risk_level(self.intent)
    }

    /// §4.1 "Confidence rule": deterministic, never the agent's self-report.
    pub fn evaluate_confidence(&self) -> Confidence {
        if !self.query_frame.has_fact_symbol() || self.explored_files.is_empty() {
            return Confidence::Low;
        }
        let high_eligible = !self.query_frame.has_hypothesis_slot()
            && !self.query_frame.has_unresolved_symbol();
        if high_eligible && self.risk_level() != RiskLevel::High {
            Confidence::High
        } else {
            Confidence::Medium
        }
    }

    /// Advances to the next investigative phase, or to READY once the last
    /// one completes. Only called after the matching submission validates.
    pub fn advance(&mut self, next: Phase) {
        self.phase = next;
    }

    /// §4.1 "Rule (revert cap)": QUALITY_REVIEW -> READY reverts are
    /// counted; exceeding `cap` forces completion instead of reverting
    /// again, returning `forced_completion=true` to the caller.
    pub fn revert_to_ready(&mut self, cap: u32) -> bool {
        if self.revert_count >= cap {
            self.phase = Phase::QualityReview;
            return true; // forced_completion
        }
        self.revert_count += 1;
        self.phase = Phase::Ready;
        false
    }

    /// §4.1 "Rule (no write without exploration)".
    pub fn check_write_target(&self, path: &str) -> Result<()> {
        let explored = self.explored_files.contains(path)
            || self.explored_files.iter().any(|f| {
                let dir = PathBuf::from(f);
                let dir = dir.parent().unwrap_or(&dir);
                PathBuf::from(path).starts_with(dir)
            });
        if explored {
            Ok(())
        } else {
            bail!(SessionError::WriteTargetBlocked { path: path.to_string() })
        }
    }

    pub fn add_explored(&mut self, files: impl IntoIterator<Item = String>) {
        self.explored_files.extend(files);
    }

    /// §4.9 Intervention System: the third consecutive verification failure
    /// demands an intervention before the agent may continue.
    pub fn record_verification_failure(&mut self) -> bool {
        self.verification_failure_count += 1;
        self.verification_failure_count >= 3
    }

    pub fn record_intervention_used(&mut self) {
        self.verification_failure_count = 0;
        self.intervention_count += 1;
    }

    pub fn record_tool_call(&mut self, record: ToolCallRecord) {
        self.tool_calls.push(record);
    }
}

/// Owns every live session for a project. Each `Session` is guarded by its
/// own mutex, acquired for the duration of one dispatched tool call and
/// released before the next is admitted -- per §5's "atomic to observers"
/// guarantee without a single process-wide lock.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<std::collections::HashMap<String, Arc<Mutex<Session>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, session: Session) -> Arc<Mutex<Session>> {
        let handle = Arc::new(Mutex::new(session));
        let id = handle.lock().await.id.clone();
        self.sessions.lock().await.insert(id, handle.clone());
        handle
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Mutex<Session>>> {
        self.sessions.lock().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &str) -> Option<Arc<Mutex<Session>>> {
        self.sessions.lock().await.remove(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_frame::{MappedSymbol, SymbolSource};

    fn sample_session() -> Session {
        Session::new(
            Intent::Modify,
            "login function returns 500 when password is empty".into(),
            PathBuf::from("/repo"),
            GateLevel::Auto,
        )
    }

    #[test]
    fn confidence_starts_low() {
        let s = sample_session();
        assert_eq!(s.evaluate_confidence(), Confidence::Low);
    }

    #[test]
    fn confidence_reaches_medium_with_fact_symbol_and_explored_files() {
        let mut s = sample_session();
        s.query_frame
            .upsert_symbol(MappedSymbol {
                name: "login".into(),
                source: SymbolSource::Fact,
                confidence: 0.8,
                evidence: "find_definitions:login -> src/login.py:4".into(),
            })
            .unwrap();
        s.add_explored(["src/login.py".to_string()]);
        assert_eq!(s.evaluate_confidence(), Confidence::Medium);
    }

    #[test]
    fn high_risk_session_capped_at_medium() {
        let mut s = sample_session();
        s.query_frame.target_feature = None; // MODIFY + no target_feature => HIGH risk
        s.query_frame
            .upsert_symbol(MappedSymbol {
                name: "login".into(),
                source: SymbolSource::Fact,
                confidence: 0.9,
                evidence: "e".into(),
            })
            .unwrap();
        s.add_explored(["src/login.py".to_string()]);
        assert_eq!(s.risk_level(), RiskLevel::High);
        assert_eq!(s.evaluate_confidence(), Confidence::Medium);
    }

    #[test]
    fn revert_cap_forces_completion_on_fourth_attempt() {
        let mut s = sample_session();
        s.phase = Phase::QualityReview;
        assert!(!s.revert_to_ready(3));
        s.phase = Phase::QualityReview;
        assert!(!s.revert_to_ready(3));
        s.phase = Phase::QualityReview;
        assert!(!s.revert_to_ready(3));
        s.phase = Phase::QualityReview;
        assert!(s.revert_to_ready(3)); // fourth: forced completion
        assert_eq!(s.phase, Phase::QualityReview);
    }

    #[test]
    fn write_blocked_outside_explored_files() {
        let mut s = sample_session();
        s.add_explored(["src/login.py".to_string()]);
        assert!(s.check_write_target("src/login.py").is_ok());
        assert!(s.check_write_target("unrelated/module.py").is_err());
    }

    #[test]
    fn third_consecutive_failure_triggers_intervention() {
        let mut s = sample_session();
        assert!(!s.record_verification_failure());
        assert!(!s.record_verification_failure());
        assert!(s.record_verification_failure());
        s.record_intervention_used();
        assert_eq!(s.verification_failure_count, 0);
        assert_eq!(s.intervention_count, 1);
    }
}
