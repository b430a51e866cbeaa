//! Impact Analyzer (C7): for each target file, finds static references,
//! naming-convention matches, and documentation mentions so the agent knows
//! what else it must check before committing. §4.6.

use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use anyhow::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};

const RELAXED_EXTS: &[&str] = &[".html", ".htm", ".css", ".scss", ".md", ".markdown"];
const LOGIC_EXTS: &[&str] = &[".blade.php", ".vue", ".jsx", ".tsx"];
const MAX_DOC_LINES_PER_FILE: usize = 3;
const MAX_DOC_FILES: usize = 20;
const MAX_KEYWORDS: usize = 10;

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "to", "of", "in", "on", "for", "with", "is", "are",
    "was", "were", "be", "this", "that", "it",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactResult {
    pub mode: String, // "normal" | "relaxed_markup"
    pub must_verify: Vec<String>,
    pub should_verify: Vec<String>,
    pub reason: Option<String>,
}

/// Derives the primary symbol name for a target file from its base name:
/// snake_case -> PascalCase, with multi-part suffixes like `.blade.php`
/// stripped as a unit.
pub fn primary_symbol(path: &str) -> String {
    let base = Path::new(path)
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string());

    let stem = if let Some(idx) = base.find('.') {
        &base[..idx]
    } else {
        base.as_str()
    };

    stem.split(['_', '-'])
        .filter(|p| !p.is_empty())
        .map(|part| {
            let mut c = part.chars();
            match c.next() {
                Some(first) => first.to_uppercase().collect::<String>() + c.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

fn type_hint_patterns(symbol: &str) -> Vec<Regex> {
    let escaped = regex::escape(symbol);
    vec![
        // Python-style `: Symbol` or `-> Symbol`
        Regex::new(&format!(r":\s*{escaped}\b")).unwrap(),
        Regex::new(&format!(r"->\s*{escaped}\b")).unwrap(),
        // PHPDoc @param / @return / @var
        Regex::new(&format!(r"@(?:param|return|var)\s+{escaped}\b")).unwrap(),
        // Generic brackets: Vec<Symbol>, List[Symbol]
        Regex::new(&format!(r"[<\[]{escaped}[>\]]")).unwrap(),
    ]
}

/// Scans `haystack_files` (pre-read contents keyed by relative path) for
/// callers and type-hint mentions of `symbol`.
fn static_references(symbol: &str, haystack: &[(String, String)]) -> BTreeSet<String> {
    let call_pattern = Regex::new(&format!(r"\b{}\b", regex::escape(symbol))).unwrap();
    let hint_patterns = type_hint_patterns(symbol);

    let mut refs = BTreeSet::new();
    for (path, content) in haystack {
        if call_pattern.is_match(content) || hint_patterns.iter().any(|p| p.is_match(content)) {
            refs.insert(path.clone());
        }
    }
    refs
}

/// Naming-convention association: generic glob patterns only (test files,
/// factories, seeders); framework-specific patterns are left to the agent.
fn naming_matches(target: &str, all_files: &[String]) -> BTreeSet<String> {
    let base = Path::new(target)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    if base.is_empty() {
        return BTreeSet::new();
    }

    let candidates = [
        format!("test_{base}"),
        format!("{base}_test"),
        format!("{base}.test"),
        format!("{base}.spec"),
        format!("{base}_factory"),
        format!("{base}_seeder"),
    ];

    all_files
        .iter()
        .filter(|f| {
            let stem = Path::new(f)
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            candidates.iter().any(|c| stem.eq_ignore_ascii_case(c))
        })
        .cloned()
        .collect()
}

/// Extracts up to `MAX_KEYWORDS` keywords from a change description:
/// quoted strings first, then CamelCase/snake_case identifiers, then
/// significant words, then -- lowest priority -- the base name of each
/// target file, skipping stop words throughout.
fn extract_keywords(description: &str, target_files: &[String]) -> Vec<String> {
    let mut keywords = Vec::new();
    let quoted = Regex::new(r#""([^"]+)"|'([^']+)'"#).unwrap();
    for cap in quoted.captures_iter(description) {
        if let Some(m) = cap.get(1).or_else(|| cap.get(2)) {
            keywords.push(m.as_str().to_string());
        }
    }

    let ident = Regex::new(r"\b([A-Z][a-zA-Z0-9]*|[a-z]+_[a-z_0-9]+)\b").unwrap();
    for cap in ident.captures_iter(description) {
        keywords.push(cap[1].to_string());
    }

    for word in description.split_whitespace() {
        let w = word.trim_matches(|c: char| !c.is_alphanumeric());
        if w.len() > 3 && !STOP_WORDS.contains(&w.to_lowercase().as_str()) {
            keywords.push(w.to_string());
        }
    }

    for target in target_files {
        let base = Path::new(target)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        if base.len() > 3 && !STOP_WORDS.contains(&base.to_lowercase().as_str()) {
            keywords.push(base);
        }
    }

    let mut seen = HashSet::new();
    keywords.retain(|k| seen.insert(k.clone()));
    keywords.truncate(MAX_KEYWORDS);
    keywords
}

/// Searches documentation files' pre-read contents for the extracted
/// keywords, aggregating up to `MAX_DOC_LINES_PER_FILE` matching lines per
/// file and capping total files at `MAX_DOC_FILES`.
fn document_mentions(
    description: &str,
    target_files: &[String],
    docs: &[(String, String)],
) -> BTreeSet<String> {
    let keywords = extract_keywords(description, target_files);
    if keywords.is_empty() {
        return BTreeSet::new();
    }

    let mut hits = BTreeSet::new();
    for (path, content) in docs {
        if hits.len() >= MAX_DOC_FILES {
            break;
        }
        let mut matched_lines = 0;
        for line in content.lines() {
            if matched_lines >= MAX_DOC_LINES_PER_FILE {
                break;
            }
            if keywords.iter().any(|k| line.contains(k.as_str())) {
                matched_lines += 1;
            }
        }
        if matched_lines > 0 {
            hits.insert(path.clone());
        }
    }
    hits
}

fn has_suffix(path: &str, exts: &[&str]) -> bool {
    exts.iter().any(|e| path.ends_with(e))
}

/// Full §4.6 analysis. `all_source_files` is every candidate caller file's
/// `(path, content)`; `doc_files` likewise for documentation. `description`
/// is the agent's change description, used for keyword extraction.
pub fn analyze_impact(
    targets: &[String],
    all_source_files: &[(String, String)],
    doc_files: &[(String, String)],
    description: &str,
) -> Result<ImpactResult> {
    let target_set: HashSet<&str> = targets.iter().map(|s| s.as_str()).collect();

    let markup_only = targets.iter().all(|t| has_suffix(t, RELAXED_EXTS))
        && !targets.iter().any(|t| has_suffix(t, LOGIC_EXTS));
    if markup_only {
        return Ok(ImpactResult {
            mode: "relaxed_markup".to_string(),
            must_verify: vec![],
            should_verify: vec![],
            reason: Some(
                "all target files are markup/stylesheet/doc content with no logic extension; \
                 static reference analysis does not apply"
                    .to_string(),
            ),
        });
    }

    let mut must_verify = BTreeSet::new();
    let mut should_verify = BTreeSet::new();
    let all_paths: Vec<String> = all_source_files.iter().map(|(p, _)| p.clone()).collect();

    for target in targets {
        let symbol = primary_symbol(target);
        let refs = static_references(&symbol, all_source_files);
        for r in refs.into_iter().filter(|r| !target_set.contains(r.as_str())) {
            must_verify.insert(r);
        }

        let naming = naming_matches(target, &all_paths);
        for n in naming.into_iter().filter(|n| !target_set.contains(n.as_str())) {
            should_verify.insert(n);
        }
    }

    let docs = document_mentions(description, targets, doc_files);
    should_verify.extend(docs);

    Ok(ImpactResult {
        mode: "normal".to_string(),
        must_verify: must_verify.into_iter().collect(),
        should_verify: should_verify.into_iter().collect(),
        reason: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_symbol_converts_snake_to_pascal() {
        assert_eq!(primary_symbol("src/auth_service.py"), "AuthService");
        assert_eq!(primary_symbol("resources/views/login.blade.php"), "Login");
    }

    #[test]
    fn markup_only_targets_trigger_relaxed_mode() {
        let result = analyze_impact(
            &["styles.css".to_string(), "README.md".to_string()],
            &[],
            &[],
            "update styles",
        )
        .unwrap();
        assert_eq!(result.mode, "relaxed_markup");
        assert!(result.must_verify.is_empty());
    }

    #[test]
    fn mixed_markup_and_logic_disables_relaxation() {
        let result = analyze_impact(
            &["styles.css".to_string(), "component.tsx".to_string()],
            &[],
            &[],
            "update",
        )
        .unwrap();
        assert_eq!(result.mode, "normal");
    }

    #[test]
    fn caller_of_target_symbol_is_must_verify() {
        let sources = vec![
            ("src/auth_service.py".to_string(), "class AuthService:\n    pass\n".to_string()),
            (
                "src/login.py".to_string(),
                "from auth_service import AuthService\ndef login() -> AuthService:\n    pass\n".to_string(),
            ),
        ];
        let result = analyze_impact(
            &["src/auth_service.py".to_string()],
            &sources,
            &[],
            "fix auth",
        )
        .unwrap();
        assert!(result.must_verify.contains(&"src/login.py".to_string()));
    }

    #[test]
    fn naming_convention_match_is_should_verify() {
        let sources = vec![
            ("src/login.py".to_string(), "def login():\n    pass\n".to_string()),
            ("tests/test_login.py".to_string(), "def test_login():\n    pass\n".to_string()),
        ];
        let result = analyze_impact(&["src/login.py".to_string()], &sources, &[], "x").unwrap();
        assert!(result.should_verify.contains(&"tests/test_login.py".to_string()));
    }

    #[test]
    fn target_file_base_name_is_low_priority_keyword() {
        let docs = vec![("docs/login.md".to_string(), "See login_handler for the entry point.".to_string())];
        let result = analyze_impact(
            &["src/login_handler.py".to_string()],
            &[],
            &docs,
            "tweak error formatting",
        )
        .unwrap();
        assert!(result.should_verify.contains(&"docs/login.md".to_string()));
    }
}
