//! Query Frame (C8): the structured decomposition of an agent's raw natural
//! language request into four optional text slots plus an ordered list of
//! mapped symbols, each slot and symbol carrying provenance. Decomposition is
//! performed by the agent; this module only validates and records it.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::error::SessionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotName {
    TargetFeature,
    TriggerCondition,
    ObservedIssue,
    DesiredAction,
}

pub const TEXT_SLOTS: [SlotName; 4] = [
    SlotName::TargetFeature,
    SlotName::TriggerCondition,
    SlotName::ObservedIssue,
    SlotName::DesiredAction,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolSource {
    Fact,
    Hypothesis,
    Unresolved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// A text slot's value, the raw-query substring that justifies it, and the
/// provenance under which it was recorded -- FACT for a slot grounded in a
/// tool result, HYPOTHESIS for one asserted ahead of verification,
/// UNRESOLVED while still open. Defaults to HYPOTHESIS: the agent decomposes
/// the raw query itself, so a slot is not a FACT merely by being quoted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotValue {
    pub value: String,
    pub quote: String,
    #[serde(default = "default_slot_source")]
    pub source: SymbolSource,
}

fn default_slot_source() -> SymbolSource {
    SymbolSource::Hypothesis
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappedSymbol {
    pub name: String,
    pub source: SymbolSource,
    pub confidence: f32,
    pub evidence: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryFrame {
    pub target_feature: Option<SlotValue>,
    pub trigger_condition: Option<SlotValue>,
    pub observed_issue: Option<SlotValue>,
    pub desired_action: Option<SlotValue>,
    pub mapped_symbols: Vec<MappedSymbol>,
    /// The raw natural-language query every slot quote must be traceable to.
    pub raw_query: String,
}

impl QueryFrame {
    pub fn new(raw_query: impl Into<String>) -> Self {
        Self {
            raw_query: raw_query.into(),
            ..Default::default()
        }
    }

    fn slot_mut(&mut self, slot: SlotName) -> &mut Option<SlotValue> {
        match slot {
            SlotName::TargetFeature => &mut self.target_feature,
            SlotName::TriggerCondition => &mut self.trigger_condition,
            SlotName::ObservedIssue => &mut self.observed_issue,
            SlotName::DesiredAction => &mut self.desired_action,
        }
    }

    pub fn slot(&self, slot: SlotName) -> &Option<SlotValue> {
        match slot {
            SlotName::TargetFeature => &self.target_feature,
            SlotName::TriggerCondition => &self.trigger_condition,
            SlotName::ObservedIssue => &self.observed_issue,
            SlotName::DesiredAction => &self.desired_action,
        }
    }

    /// Validates and records one slot. Fails with `validation_failed` if the
    /// quote is not a whitespace-normalized substring of the raw query, or
    /// if the normalized value drifts too far from the quote.
    pub fn set_slot(&mut self, slot: SlotName, candidate: SlotValue) -> Result<()> {
        if !contains_normalized(&self.raw_query, &candidate.quote) {
            bail!(SessionError::ValidationFailed(format!(
                "quote '{}' does not appear in the raw query",
                candidate.quote
            )));
        }
        if !value_consistent_with_quote(&candidate.value, &candidate.quote) {
            bail!(SessionError::ValidationFailed(format!(
                "value '{}' is not consistent with quote '{}'",
                candidate.value, candidate.quote
            )));
        }
        *self.slot_mut(slot) = Some(candidate);
        Ok(())
    }

    /// Adds a mapped symbol, enforcing the monotonicity invariant: a symbol
    /// may only be promoted (HYPOTHESIS -> FACT, or a higher confidence),
    /// never silently demoted.
    pub fn upsert_symbol(&mut self, symbol: MappedSymbol) -> Result<()> {
        if let Some(existing) = self
            .mapped_symbols
            .iter_mut()
            .find(|s| s.name == symbol.name)
        {
            let is_promotion = (existing.source == SymbolSource::Hypothesis
                && symbol.source != SymbolSource::Hypothesis)
                || symbol.confidence >= existing.confidence;
            if !is_promotion {
                bail!(SessionError::ValidationFailed(format!(
                    "symbol '{}' may only be promoted, not demoted; revert explicitly",
                    symbol.name
                )));
            }
            *existing = symbol;
        } else {
            self.mapped_symbols.push(symbol);
        }
        Ok(())
    }

    pub fn missing_text_slots(&self) -> Vec<SlotName> {
        TEXT_SLOTS
            .into_iter()
            .filter(|s| self.slot(*s).is_none())
            .collect()
    }

    /// §4.1 "High" confidence requires no remaining HYPOTHESIS slot among
    /// the four text slots. A missing slot is not itself a HYPOTHESIS -- it
    /// is absent -- so only slots that are *present but unresolved* count.
    pub fn has_hypothesis_slot(&self) -> bool {
        TEXT_SLOTS
            .into_iter()
            .filter_map(|s| self.slot(s).as_ref())
            .any(|v| v.source == SymbolSource::Hypothesis)
    }

    pub fn has_unresolved_symbol(&self) -> bool {
        self.mapped_symbols
            .iter()
            .any(|s| s.source == SymbolSource::Unresolved)
    }

    pub fn has_fact_symbol(&self) -> bool {
        self.mapped_symbols
            .iter()
            .any(|s| s.source == SymbolSource::Fact)
    }

    pub fn has_hypothesis_symbol(&self) -> bool {
        self.mapped_symbols
            .iter()
            .any(|s| s.source == SymbolSource::Hypothesis)
    }

    /// §4.2 risk level: all four text slots missing, or MODIFY with no
    /// target_feature, is HIGH; a short observed_issue or any HYPOTHESIS
    /// slot is MEDIUM; otherwise LOW.
    pub fn risk_level(&self, intent: super::session::Intent) -> RiskLevel {
        if self.missing_text_slots().len() == TEXT_SLOTS.len() {
            return RiskLevel::High;
        }
        if intent == super::session::Intent::Modify && self.target_feature.is_none() {
            return RiskLevel::High;
        }
        let short_issue = self
            .observed_issue
            .as_ref()
            .map(|s| s.value.trim().len() < 10)
            .unwrap_or(false);
        if short_issue || self.has_hypothesis_slot() {
            return RiskLevel::Medium;
        }
        RiskLevel::Low
    }
}

fn normalize_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

fn contains_normalized(haystack: &str, needle: &str) -> bool {
    normalize_ws(haystack).contains(&normalize_ws(needle))
}

/// The value must either be a substring of the quote or share a keyword
/// token with it, once both are lowercased and whitespace-collapsed.
fn value_consistent_with_quote(value: &str, quote: &str) -> bool {
    let v = normalize_ws(value);
    let q = normalize_ws(quote);
    if q.contains(&v) || v.contains(&q) {
        return true;
    }
    let q_tokens: std::collections::HashSet<&str> = q.split(' ').filter(|t| t.len() > 2).collect();
    v.split(' ').filter(|t| t.len() > 2).any(|t| q_tokens.contains(t))
}

/// Closed enumeration of reasons `submit_semantic` must justify why
/// structured search failed before falling back to semantic search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticReason {
    NoDefinitionFound,
    NoReferenceFound,
    NoSimilarImplementation,
    ArchitectureUnknown,
    ContextFragmented,
}

impl SemanticReason {
    pub fn parse(s: &str) -> Result<Self> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| SessionError::InvalidSemanticReason(s.to_string()).into())
    }
}

/// `generate_investigation_guidance`: pedagogical hint mapping each missing
/// slot to the concrete tool the agent should invoke next.
pub fn generate_investigation_guidance(missing: &[SlotName]) -> Vec<(SlotName, &'static str)> {
    missing
        .iter()
        .map(|s| {
            let hint = match s {
                SlotName::TargetFeature => "find_definitions or get_symbols to name the feature precisely",
                SlotName::TriggerCondition => "find_references to see how/when the code path is invoked",
                SlotName::ObservedIssue => "search_text for the error message or symptom text",
                SlotName::DesiredAction => "review_changes once a candidate fix is drafted",
            };
            (*s, hint)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Intent;

    #[test]
    fn quote_must_appear_in_raw_query() {
        let mut qf = QueryFrame::new("login function returns 500 when password is empty");
        let ok = qf.set_slot(
            SlotName::TargetFeature,
            SlotValue { value: "login function".into(), quote: "login function".into(), source: SymbolSource::Fact },
        );
        assert!(ok.is_ok());

        let bad = qf.set_slot(
            SlotName::DesiredAction,
            SlotValue { value: "rewrite auth".into(), quote: "rewrite the entire auth system".into(), source: SymbolSource::Hypothesis },
        );
        assert!(bad.is_err());
    }

    #[test]
    fn symbol_demotion_is_rejected() {
        let mut qf = QueryFrame::new("q");
        qf.upsert_symbol(MappedSymbol {
            name: "AuthService".into(),
            source: SymbolSource::Fact,
            confidence: 0.9,
            evidence: "find_definitions:AuthService -> src/auth.rs:10".into(),
        })
        .unwrap();

        let demote = qf.upsert_symbol(MappedSymbol {
            name: "AuthService".into(),
            source: SymbolSource::Hypothesis,
            confidence: 0.2,
            evidence: "guess".into(),
        });
        assert!(demote.is_err());
    }

    #[test]
    fn all_slots_missing_is_high_risk() {
        let qf = QueryFrame::new("something is wrong");
        assert_eq!(qf.risk_level(Intent::Question), RiskLevel::High);
    }

    #[test]
    fn modify_with_no_target_feature_is_high_risk() {
        let mut qf = QueryFrame::new("it crashes when empty");
        qf.set_slot(
            SlotName::ObservedIssue,
            SlotValue { value: "it crashes when empty".into(), quote: "it crashes when empty".into(), source: SymbolSource::Fact },
        )
        .unwrap();
        assert_eq!(qf.risk_level(Intent::Modify), RiskLevel::High);
    }

    #[test]
    fn hypothesis_text_slot_is_medium_risk() {
        let mut qf = QueryFrame::new("login function returns 500 when password is empty");
        qf.set_slot(
            SlotName::TargetFeature,
            SlotValue { value: "login function".into(), quote: "login function".into(), source: SymbolSource::Fact },
        )
        .unwrap();
        qf.set_slot(
            SlotName::ObservedIssue,
            SlotValue {
                value: "returns 500 when password is empty".into(),
                quote: "returns 500 when password is empty".into(),
                source: SymbolSource::Hypothesis,
            },
        )
        .unwrap();
        assert!(qf.has_hypothesis_slot());
        assert_eq!(qf.risk_level(Intent::Modify), RiskLevel::Medium);
    }
}
