//! Vector-store-backed tools (§6's "investigation" row for semantic search)
//! plus the Embedding Validator's two entry points.

use anyhow::Result;
use async_trait::async_trait;
use code_intel_index::validator::EmbeddingValidator;
use serde_json::{json, Value};

use super::{Tool, ToolContext, ToolResult};

pub struct SyncIndexTool;

#[async_trait]
impl Tool for SyncIndexTool {
    fn name(&self) -> &str {
        "sync_index"
    }
    fn description(&self) -> &str {
        "Incrementally re-syncs the vector index against the files changed since the last sync."
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }
    async fn execute(&self, _args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let Some(index) = &ctx.index else {
            return Ok(ToolResult::json("sync_index", json!({"error": "chromadb_not_available"})));
        };
        let stats = index.build().await?;
        Ok(ToolResult::json("sync_index", serde_json::to_value(stats)?))
    }
}

pub struct SemanticSearchTool;

#[async_trait]
impl Tool for SemanticSearchTool {
    fn name(&self) -> &str {
        "semantic_search"
    }
    fn description(&self) -> &str {
        "Searches the forest/map vector index for chunks or agreements relevant to a natural-language query."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "limit": {"type": "integer", "default": 5}
            },
            "required": ["query"]
        })
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let Some(index) = &ctx.index else {
            return Ok(ToolResult::json("semantic_search", json!({"error": "chromadb_not_available"})));
        };
        let query = args
            .get("query")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing query"))?;
        let limit = args.get("limit").and_then(|v| v.as_u64()).unwrap_or(5) as usize;
        let outcome = index.search(query, limit).await?;
        Ok(ToolResult::json("semantic_search", serde_json::to_value(outcome)?))
    }
}

pub struct FetchChunkDetailTool;

#[async_trait]
impl Tool for FetchChunkDetailTool {
    fn name(&self) -> &str {
        "fetch_chunk_detail"
    }
    fn description(&self) -> &str {
        "Fetches the full text of a file region corresponding to an earlier search hit."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file": {"type": "string"},
                "start_line": {"type": "integer"},
                "end_line": {"type": "integer"}
            },
            "required": ["file", "start_line", "end_line"]
        })
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let rel = args
            .get("file")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing file"))?;
        let start = args.get("start_line").and_then(|v| v.as_u64()).unwrap_or(1) as usize;
        let end = args.get("end_line").and_then(|v| v.as_u64()).unwrap_or(start as u64) as usize;
        let content = std::fs::read_to_string(ctx.repo_root.join(rel))?;
        let lines: Vec<&str> = content.lines().collect();
        let slice = lines
            .get(start.saturating_sub(1)..end.min(lines.len()))
            .unwrap_or(&[])
            .join("\n");
        Ok(ToolResult::json("fetch_chunk_detail", json!({"text": slice})))
    }
}

pub struct ValidateSymbolRelevanceTool;

#[async_trait]
impl Tool for ValidateSymbolRelevanceTool {
    fn name(&self) -> &str {
        "validate_symbol_relevance"
    }
    fn description(&self) -> &str {
        "Validates a natural-language term against a candidate symbol, returning a banded verdict."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"nl_term": {"type": "string"}, "symbol": {"type": "string"}},
            "required": ["nl_term", "symbol"]
        })
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let nl_term = args
            .get("nl_term")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing nl_term"))?;
        let symbol = args
            .get("symbol")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing symbol"))?;

        if let Some(index) = &ctx.index {
            if let Some(pair) = index.find_learned(nl_term).await.into_iter().find(|p| p.symbol == symbol) {
                return Ok(ToolResult::json(
                    "validate_symbol_relevance",
                    json!({"verdict": "FACT", "similarity": pair.similarity, "source": "learned_pair_cache"}),
                ));
            }
        }

        let Some(index) = &ctx.index else {
            return Ok(ToolResult::json("validate_symbol_relevance", json!({"error": "chromadb_not_available"})));
        };
        let validator = EmbeddingValidator::new(index.embedder());
        let result = validator.validate_relevance(nl_term, symbol).await?;
        Ok(ToolResult::json("validate_symbol_relevance", serde_json::to_value(result)?))
    }
}

pub struct ConfirmSymbolRelevanceTool;

#[async_trait]
impl Tool for ConfirmSymbolRelevanceTool {
    fn name(&self) -> &str {
        "confirm_symbol_relevance"
    }
    fn description(&self) -> &str {
        "Ranks a list of candidate symbols against a natural-language term using the index's opinion."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "nl_term": {"type": "string"},
                "candidates": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["nl_term", "candidates"]
        })
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let nl_term = args
            .get("nl_term")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing nl_term"))?;
        let candidates: Vec<String> = args
            .get("candidates")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();

        let Some(index) = &ctx.index else {
            return Ok(ToolResult::json("confirm_symbol_relevance", json!({"error": "chromadb_not_available"})));
        };
        let validator = EmbeddingValidator::new(index.embedder());
        let ranked = validator.find_related_symbols(nl_term, &candidates, candidates.len().max(1)).await?;
        Ok(ToolResult::json("confirm_symbol_relevance", serde_json::to_value(ranked)?))
    }
}
