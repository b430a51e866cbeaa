//! Investigation tools (§6): thin wrappers over `rg`/regex-based symbol
//! lookup that populate the Query Frame during EXPLORATION/VERIFICATION.
//! Full ctags/tree-sitter integration is an external-binary concern; these
//! implementations use the same chunker the vector index relies on for
//! structural boundaries, and a line-scoped regex pass for symbol lookup,
//! which is sufficient for the phase-gate's own bookkeeping.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use tokio::process::Command;

use code_intel_index::chunker::chunk_file;

use super::{Tool, ToolContext, ToolResult};

async fn run_ripgrep(patterns: &[&str], path: &Path, timeout_secs: u64) -> Result<String> {
    let mut args: Vec<String> = vec!["--line-number".to_string(), "--color=never".to_string()];
    for p in patterns {
        args.push("-e".to_string());
        args.push(p.to_string());
    }
    args.push(path.to_string_lossy().to_string());

    let fut = Command::new("rg").args(&args).output();
    let output = tokio::time::timeout(Duration::from_secs(timeout_secs), fut)
        .await
        .context("rg timed out")??;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

pub struct SearchTextTool;

#[async_trait]
impl Tool for SearchTextTool {
    fn name(&self) -> &str {
        "search_text"
    }
    fn description(&self) -> &str {
        "Search file contents for up to five regex patterns in parallel (ripgrep)."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "patterns": {"type": "array", "items": {"type": "string"}, "maxItems": 5},
                "path": {"type": "string"}
            },
            "required": ["patterns"]
        })
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let patterns: Vec<String> = args
            .get("patterns")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();
        if patterns.is_empty() {
            anyhow::bail!("search_text requires at least one pattern");
        }
        let max = ctx.settings.max_search_patterns.max(1);
        if patterns.len() > max {
            anyhow::bail!("at most {max} patterns allowed per call");
        }
        let path = args
            .get("path")
            .and_then(|v| v.as_str())
            .map(|p| ctx.repo_root.join(p))
            .unwrap_or_else(|| ctx.repo_root.clone());

        let refs: Vec<&str> = patterns.iter().map(|s| s.as_str()).collect();
        let out = run_ripgrep(&refs, &path, ctx.settings.subprocess_timeout_secs).await?;
        Ok(ToolResult::json("search_text", json!({ "matches": out })))
    }
}

pub struct SearchFilesTool;

#[async_trait]
impl Tool for SearchFilesTool {
    fn name(&self) -> &str {
        "search_files"
    }
    fn description(&self) -> &str {
        "Find files by glob pattern under the repository root."
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {"glob": {"type": "string"}}, "required": ["glob"]})
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let pattern = args
            .get("glob")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing glob"))?;
        let full = ctx.repo_root.join(pattern);
        let mut matches = Vec::new();
        for entry in ::glob::glob(&full.to_string_lossy())? {
            if let Ok(path) = entry {
                matches.push(
                    path.strip_prefix(&ctx.repo_root)
                        .unwrap_or(&path)
                        .to_string_lossy()
                        .to_string(),
                );
            }
        }
        Ok(ToolResult::json("search_files", json!({ "files": matches })))
    }
}

fn definition_regex(symbol: &str) -> Regex {
    let s = regex::escape(symbol);
    Regex::new(&format!(
        r"^\s*(?:pub\s+)?(?:async\s+)?(?:fn|def|function|class|struct|interface|type)\s+{s}\b"
    ))
    .unwrap()
}

fn reference_regex(symbol: &str) -> Regex {
    Regex::new(&format!(r"\b{}\b", regex::escape(symbol))).unwrap()
}

async fn walk_source_files(root: &Path) -> Result<Vec<std::path::PathBuf>> {
    let entries = code_intel_index::watcher::walk_project(root, &[])?;
    Ok(entries.into_iter().map(|e| e.abs_path).collect())
}

pub struct FindDefinitionsTool;

#[async_trait]
impl Tool for FindDefinitionsTool {
    fn name(&self) -> &str {
        "find_definitions"
    }
    fn description(&self) -> &str {
        "Find lines that look like the definition of a symbol across the project."
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {"symbol": {"type": "string"}}, "required": ["symbol"]})
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let symbol = args
            .get("symbol")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing symbol"))?;
        let re = definition_regex(symbol);
        let mut hits = Vec::new();
        for path in walk_source_files(&ctx.repo_root).await? {
            let Ok(content) = std::fs::read_to_string(&path) else { continue };
            for (i, line) in content.lines().enumerate() {
                if re.is_match(line) {
                    hits.push(json!({
                        "file": path.strip_prefix(&ctx.repo_root).unwrap_or(&path).to_string_lossy(),
                        "line": i + 1,
                        "text": line.trim(),
                    }));
                }
            }
        }
        Ok(ToolResult::json("find_definitions", json!({ "definitions": hits })))
    }
}

pub struct FindReferencesTool;

#[async_trait]
impl Tool for FindReferencesTool {
    fn name(&self) -> &str {
        "find_references"
    }
    fn description(&self) -> &str {
        "Find every line referencing a symbol across the project."
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {"symbol": {"type": "string"}}, "required": ["symbol"]})
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let symbol = args
            .get("symbol")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing symbol"))?;
        let re = reference_regex(symbol);
        let mut hits = Vec::new();
        for path in walk_source_files(&ctx.repo_root).await? {
            let Ok(content) = std::fs::read_to_string(&path) else { continue };
            for (i, line) in content.lines().enumerate() {
                if re.is_match(line) {
                    hits.push(json!({
                        "file": path.strip_prefix(&ctx.repo_root).unwrap_or(&path).to_string_lossy(),
                        "line": i + 1,
                        "text": line.trim(),
                    }));
                }
            }
        }
        Ok(ToolResult::json("find_references", json!({ "references": hits })))
    }
}

pub struct GetSymbolsTool;

#[async_trait]
impl Tool for GetSymbolsTool {
    fn name(&self) -> &str {
        "get_symbols"
    }
    fn description(&self) -> &str {
        "List the chunk-level symbols (functions, classes, methods) found in a file."
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {"file": {"type": "string"}}, "required": ["file"]})
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let rel = args
            .get("file")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing file"))?;
        let content = std::fs::read_to_string(ctx.repo_root.join(rel))?;
        let chunks = chunk_file(rel, &content);
        let symbols: Vec<Value> = chunks
            .iter()
            .map(|c| json!({"name": c.name, "kind": format!("{:?}", c.kind), "start_line": c.start_line, "end_line": c.end_line}))
            .collect();
        Ok(ToolResult::json("get_symbols", json!({ "symbols": symbols })))
    }
}

pub struct GetFunctionAtLineTool;

#[async_trait]
impl Tool for GetFunctionAtLineTool {
    fn name(&self) -> &str {
        "get_function_at_line"
    }
    fn description(&self) -> &str {
        "Return the chunk (function/method/class) enclosing a given line."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"file": {"type": "string"}, "line": {"type": "integer"}},
            "required": ["file", "line"]
        })
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let rel = args
            .get("file")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing file"))?;
        let line = args
            .get("line")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| anyhow::anyhow!("missing line"))? as usize;
        let content = std::fs::read_to_string(ctx.repo_root.join(rel))?;
        let chunks = chunk_file(rel, &content);
        let found = chunks.into_iter().find(|c| c.start_line <= line && line <= c.end_line);
        match found {
            Some(c) => Ok(ToolResult::json(
                "get_function_at_line",
                json!({"name": c.name, "kind": format!("{:?}", c.kind), "start_line": c.start_line, "end_line": c.end_line, "text": c.text}),
            )),
            None => Ok(ToolResult::json("get_function_at_line", json!({"found": false}))),
        }
    }
}

pub struct AnalyzeStructureTool;

#[async_trait]
impl Tool for AnalyzeStructureTool {
    fn name(&self) -> &str {
        "analyze_structure"
    }
    fn description(&self) -> &str {
        "Extract the structural outline (functions/classes/methods) of a file."
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {"file": {"type": "string"}}, "required": ["file"]})
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let rel = args
            .get("file")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing file"))?;
        let content = std::fs::read_to_string(ctx.repo_root.join(rel))?;
        let chunks = chunk_file(rel, &content);
        let outline: Vec<Value> = chunks
            .iter()
            .map(|c| json!({"name": c.name, "kind": format!("{:?}", c.kind), "start_line": c.start_line, "end_line": c.end_line}))
            .collect();
        Ok(ToolResult::json("analyze_structure", json!({ "outline": outline })))
    }
}
