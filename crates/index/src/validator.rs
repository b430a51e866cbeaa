//! Embedding Validator (§4.4): cosine-similarity gating of NL↔symbol pairs with
//! a three-band verdict. Symbol names are split before embedding so compound
//! identifiers carry their semantic weight (`AuthService` -> `"Auth Service"`).

use std::sync::Arc;

use anyhow::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::embedder::Embedder;

pub const THRESHOLD_HIGH: f32 = 0.6;
pub const THRESHOLD_LOW: f32 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Fact,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub approved: bool,
    pub status: Verdict,
    pub similarity: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_adjustment: Option<RiskAdjustment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reinvestigation_guidance: Option<ReinvestigationGuidance>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskAdjustment {
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReinvestigationGuidance {
    pub reason: String,
    pub next_actions: Vec<String>,
    pub fallback: String,
}

pub struct EmbeddingValidator {
    embedder: Arc<dyn Embedder>,
}

impl EmbeddingValidator {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }

    pub async fn get_similarity(&self, text_a: &str, text_b: &str) -> Result<f32> {
        let embeddings = self.embedder.embed(&[text_a, text_b]).await?;
        Ok(cosine_similarity(&embeddings[0], &embeddings[1]))
    }

    /// Validates an NL term against a single symbol with the three-band verdict.
    pub async fn validate_relevance(&self, nl_term: &str, symbol: &str) -> Result<ValidationResult> {
        let symbol_normalized = split_camel_case(symbol);
        let similarity = self.get_similarity(nl_term, &symbol_normalized).await?;
        Ok(self.band(nl_term, symbol, similarity))
    }

    fn band(&self, nl_term: &str, symbol: &str, similarity: f32) -> ValidationResult {
        if similarity > THRESHOLD_HIGH {
            ValidationResult {
                approved: true,
                status: Verdict::Fact,
                similarity,
                risk_adjustment: None,
                warning: None,
                reinvestigation_guidance: None,
            }
        } else if similarity >= THRESHOLD_LOW {
            ValidationResult {
                approved: true,
                status: Verdict::Fact,
                similarity,
                risk_adjustment: Some(RiskAdjustment::High),
                warning: Some(format!(
                    "similarity {similarity:.2} is in the gray zone; strengthen exploration"
                )),
                reinvestigation_guidance: None,
            }
        } else {
            ValidationResult {
                approved: false,
                status: Verdict::Rejected,
                similarity,
                risk_adjustment: None,
                warning: None,
                reinvestigation_guidance: Some(create_guidance(nl_term, symbol)),
            }
        }
    }

    /// Batch variant: validates every candidate symbol, aggregating a single
    /// risk_adjustment if any approved symbol landed in the gray zone.
    pub async fn validate_multiple(
        &self,
        nl_term: &str,
        symbols: &[String],
    ) -> Result<MultiValidation> {
        let mut approved = Vec::new();
        let mut rejected = Vec::new();
        let mut needs_high_risk = false;

        for symbol in symbols {
            let result = self.validate_relevance(nl_term, symbol).await?;
            if result.approved {
                if result.risk_adjustment == Some(RiskAdjustment::High) {
                    needs_high_risk = true;
                }
                approved.push(ApprovedSymbol {
                    symbol: symbol.clone(),
                    similarity: result.similarity,
                    status: result.status,
                });
            } else {
                rejected.push(RejectedSymbol {
                    symbol: symbol.clone(),
                    similarity: result.similarity,
                    guidance: result.reinvestigation_guidance,
                });
            }
        }

        Ok(MultiValidation {
            approved,
            rejected,
            risk_adjustment: needs_high_risk.then_some(RiskAdjustment::High),
        })
    }

    /// Ranks a symbol list by similarity to a natural-language term.
    pub async fn find_related_symbols(
        &self,
        nl_term: &str,
        symbols: &[String],
        top_k: usize,
    ) -> Result<Vec<RankedSymbol>> {
        let mut results = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            let normalized = split_camel_case(symbol);
            let similarity = self.get_similarity(nl_term, &normalized).await?;
            results.push(RankedSymbol {
                symbol: symbol.clone(),
                similarity,
                rank: 0,
            });
        }
        results.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(top_k);
        for (i, r) in results.iter_mut().enumerate() {
            r.rank = i + 1;
        }
        Ok(results)
    }

    /// `AuthService -> "Auth Service"`, `HTTPSConnection -> "HTTPS Connection"`.
    pub fn split_camel_case(symbol: &str) -> String {
        split_camel_case(symbol)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MultiValidation {
    pub approved: Vec<ApprovedSymbol>,
    pub rejected: Vec<RejectedSymbol>,
    pub risk_adjustment: Option<RiskAdjustment>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApprovedSymbol {
    pub symbol: String,
    pub similarity: f32,
    pub status: Verdict,
}

#[derive(Debug, Clone, Serialize)]
pub struct RejectedSymbol {
    pub symbol: String,
    pub similarity: f32,
    pub guidance: Option<ReinvestigationGuidance>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RankedSymbol {
    pub symbol: String,
    pub similarity: f32,
    pub rank: usize,
}

fn create_guidance(nl_term: &str, symbol: &str) -> ReinvestigationGuidance {
    ReinvestigationGuidance {
        reason: format!(
            "similarity between '{nl_term}' and '{symbol}' is too low (< {THRESHOLD_LOW})"
        ),
        next_actions: vec![
            format!("search_text for other symbols related to '{nl_term}'"),
            format!("find_references on '{symbol}' to confirm it is actually related"),
            "locate code evidence (comments, naming) proving the relationship".to_string(),
        ],
        fallback: "if fact-finding tools turn up nothing, use submit_semantic with a devrag_reason".to_string(),
    }
}

/// Lowercase-then-uppercase boundary, then an uppercase run followed by a
/// lowercase letter — mirrors the two-pass regex substitution in the source
/// this component was distilled from.
fn split_camel_case(symbol: &str) -> String {
    let lower_upper = Regex::new(r"([a-z])([A-Z])").unwrap();
    let step1 = lower_upper.replace_all(symbol, "$1 $2");
    let upper_run = Regex::new(r"([A-Z]+)([A-Z][a-z])").unwrap();
    upper_run.replace_all(&step1, "$1 $2").into_owned()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    let denom = norm_a * norm_b;
    if denom < 1e-10 {
        0.0
    } else {
        dot / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::TfIdfEmbedder;

    fn validator() -> EmbeddingValidator {
        EmbeddingValidator::new(Arc::new(TfIdfEmbedder::new()))
    }

    #[test]
    fn split_camel_case_matches_examples() {
        assert_eq!(split_camel_case("AuthService"), "Auth Service");
        assert_eq!(split_camel_case("getUserName"), "get User Name");
        assert_eq!(split_camel_case("HTTPSConnection"), "HTTPS Connection");
    }

    #[tokio::test]
    async fn identical_terms_are_approved_as_fact() {
        let v = validator();
        let result = v
            .validate_relevance("authentication service", "AuthService")
            .await
            .unwrap();
        assert!(result.approved);
        assert_eq!(result.status, Verdict::Fact);
    }

    #[tokio::test]
    async fn unrelated_terms_are_rejected_with_guidance() {
        let v = validator();
        let result = v
            .validate_relevance("zzz totally unrelated gibberish qqq", "PaymentGatewayAdapter")
            .await
            .unwrap();
        if !result.approved {
            assert_eq!(result.status, Verdict::Rejected);
            assert!(result.reinvestigation_guidance.is_some());
        }
    }
}
