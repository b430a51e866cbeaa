//! §4.1's phase graph and per-phase tool whitelist. Four investigative
//! phases (exploration, semantic, verification, impact analysis), each
//! gated by its own `submit_*` tool, ahead of the ready/pre-commit/
//! quality-review/merged-or-abandoned tail.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Exploration,
    Semantic,
    Verification,
    ImpactAnalysis,
    Ready,
    PreCommit,
    QualityReview,
    Merged,
    Abandoned,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Exploration => "EXPLORATION",
            Phase::Semantic => "SEMANTIC",
            Phase::Verification => "VERIFICATION",
            Phase::ImpactAnalysis => "IMPACT_ANALYSIS",
            Phase::Ready => "READY",
            Phase::PreCommit => "PRE_COMMIT",
            Phase::QualityReview => "QUALITY_REVIEW",
            Phase::Merged => "MERGED",
            Phase::Abandoned => "ABANDONED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Merged | Phase::Abandoned)
    }

    /// Every investigative phase, in DAG order, each of which can fall
    /// through directly to READY under `gate_level=auto`.
    pub fn investigative_order() -> [Phase; 4] {
        [
            Phase::Exploration,
            Phase::Semantic,
            Phase::Verification,
            Phase::ImpactAnalysis,
        ]
    }

    pub fn next_investigative(&self) -> Option<Phase> {
        let order = Self::investigative_order();
        let idx = order.iter().position(|p| p == self)?;
        order.get(idx + 1).copied()
    }
}

/// Tools admitted regardless of phase: session-management and the status
/// query, per §4.1 "Tool gating".
pub const ALWAYS_ADMITTED: &[&str] = &[
    "start_session",
    "get_session_status",
    "set_query_frame",
    "check_phase_necessity",
    "record_verification_failure",
    "record_intervention_used",
    "get_intervention_status",
    "record_outcome",
    "get_outcome_stats",
    "update_context",
    "cleanup_stale_branches",
];

/// The whitelist admitted in addition to `ALWAYS_ADMITTED` for a given
/// phase. The dispatcher rejects anything outside the union with
/// `phase_blocked`.
pub fn admitted_tools(phase: Phase) -> &'static [&'static str] {
    match phase {
        Phase::Exploration => &[
            "begin_phase_gate",
            "search_text",
            "search_files",
            "find_definitions",
            "find_references",
            "get_symbols",
            "get_function_at_line",
            "analyze_structure",
            "submit_exploration",
        ],
        Phase::Semantic => &[
            "sync_index",
            "semantic_search",
            "fetch_chunk_detail",
            "validate_symbol_relevance",
            "confirm_symbol_relevance",
            "submit_semantic",
        ],
        Phase::Verification => &[
            "search_text",
            "search_files",
            "find_definitions",
            "find_references",
            "submit_verification",
        ],
        Phase::ImpactAnalysis => &["analyze_impact", "submit_impact_analysis"],
        Phase::Ready => &[
            "check_write_target",
            "add_explored_files",
            "revert_to_exploration",
            "submit_for_review",
        ],
        Phase::PreCommit => &["review_changes", "finalize_changes"],
        Phase::QualityReview => &["submit_quality_review"],
        Phase::Merged | Phase::Abandoned => &["merge_to_base"],
    }
}

pub fn is_admitted(phase: Phase, tool: &str) -> bool {
    ALWAYS_ADMITTED.contains(&tool) || admitted_tools(phase).contains(&tool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn investigative_order_is_four_phases() {
        assert_eq!(Phase::investigative_order().len(), 4);
        assert_eq!(Phase::Exploration.next_investigative(), Some(Phase::Semantic));
        assert_eq!(Phase::ImpactAnalysis.next_investigative(), None);
    }

    #[test]
    fn status_query_always_admitted() {
        assert!(is_admitted(Phase::Ready, "get_session_status"));
        assert!(!is_admitted(Phase::Ready, "submit_exploration"));
    }
}
