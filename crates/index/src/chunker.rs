use std::path::Path;

use sha2::Digest;

const MAX_CHUNK_LINES: usize = 80;
const MIN_CHUNK_LINES: usize = 5;
const TARGET_CHUNK_LINES: usize = 60;
const OVERLAP_LINES: usize = 5;

/// `(id = hash(file,name,line_start), type, name, file, line_start, line_end, content, metadata)`
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub file: String,
    pub name: String,
    pub start_line: usize,
    pub end_line: usize,
    pub text: String,
    pub kind: ChunkKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    Function,
    Class,
    Method,
    Module,
    Block,
    FileTail,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Function => "function",
            ChunkKind::Class => "class",
            ChunkKind::Method => "method",
            ChunkKind::Module => "module",
            ChunkKind::Block => "block",
            ChunkKind::FileTail => "file-tail",
        }
    }
}

fn chunk_id(file: &str, name: &str, start_line: usize) -> String {
    let mut hasher = sha2::Sha256::new();
    hasher.update(file.as_bytes());
    hasher.update(b"\0");
    hasher.update(name.as_bytes());
    hasher.update(b"\0");
    hasher.update(start_line.to_le_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

pub fn chunk_file(rel_path: &str, content: &str) -> Vec<Chunk> {
    if content.is_empty() {
        return vec![];
    }

    let lang = detect_language(rel_path);
    let lines: Vec<&str> = content.lines().collect();
    if lines.is_empty() {
        return vec![];
    }

    let boundaries = find_boundaries(&lines, lang);
    if boundaries.is_empty() {
        return sliding_window_chunks(rel_path, &lines);
    }

    structural_chunks(rel_path, &lines, &boundaries)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Language {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Go,
    Java,
    C,
    Ruby,
    Unknown,
}

fn detect_language(path: &str) -> Language {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    match ext.as_str() {
        "rs" => Language::Rust,
        "py" | "pyi" => Language::Python,
        "js" | "jsx" | "mjs" | "cjs" => Language::JavaScript,
        "ts" | "tsx" | "mts" | "cts" => Language::TypeScript,
        "go" => Language::Go,
        "java" => Language::Java,
        "c" | "h" | "cpp" | "hpp" | "cc" | "cxx" => Language::C,
        "rb" => Language::Ruby,
        _ => Language::Unknown,
    }
}

struct Boundary {
    line: usize,
    kind: ChunkKind,
    name: String,
}

/// Pulls the first identifier-looking token out of a declaration line, stopping
/// at the first character that can't be part of an identifier. Best-effort —
/// this is heuristic chunking, not a parser.
fn extract_name(after_keyword: &str) -> String {
    after_keyword
        .trim_start()
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect::<String>()
}

fn find_boundaries(lines: &[&str], lang: Language) -> Vec<Boundary> {
    let mut boundaries = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("//") || trimmed.starts_with('#') {
            continue;
        }

        let found = match lang {
            Language::Rust => detect_rust_boundary(trimmed),
            Language::Python => detect_python_boundary(line, trimmed),
            Language::JavaScript | Language::TypeScript => detect_js_boundary(trimmed),
            Language::Go => detect_go_boundary(trimmed),
            Language::Java => detect_java_boundary(trimmed),
            Language::C => detect_c_boundary(trimmed, i, lines),
            Language::Ruby => detect_ruby_boundary(line, trimmed),
            Language::Unknown => None,
        };

        if let Some((kind, name)) = found {
            boundaries.push(Boundary { line: i, kind, name });
        }
    }

    boundaries
}

fn detect_rust_boundary(line: &str) -> Option<(ChunkKind, String)> {
    let s = line
        .trim_start_matches("pub(crate) ")
        .trim_start_matches("pub ");
    for prefix in ["async fn ", "unsafe fn ", "const fn ", "fn "] {
        if let Some(rest) = s.strip_prefix(prefix) {
            return Some((ChunkKind::Function, extract_name(rest)));
        }
    }
    for prefix in ["struct ", "enum ", "trait "] {
        if let Some(rest) = s.strip_prefix(prefix) {
            return Some((ChunkKind::Class, extract_name(rest)));
        }
    }
    if s.starts_with("impl ") || s.starts_with("impl<") {
        return Some((ChunkKind::Class, extract_name(s.trim_start_matches("impl"))));
    }
    if let Some(rest) = s.strip_prefix("mod ") {
        return Some((ChunkKind::Module, extract_name(rest)));
    }
    None
}

fn detect_python_boundary(raw_line: &str, trimmed: &str) -> Option<(ChunkKind, String)> {
    let indented = raw_line.starts_with(' ') || raw_line.starts_with('\t');
    if let Some(rest) = trimmed
        .strip_prefix("async def ")
        .or_else(|| trimmed.strip_prefix("def "))
    {
        let kind = if indented { ChunkKind::Method } else { ChunkKind::Function };
        return Some((kind, extract_name(rest)));
    }
    if let Some(rest) = trimmed.strip_prefix("class ") {
        return Some((ChunkKind::Class, extract_name(rest)));
    }
    None
}

fn detect_js_boundary(line: &str) -> Option<(ChunkKind, String)> {
    for prefix in [
        "export default function ",
        "export async function ",
        "export function ",
        "async function ",
        "function ",
    ] {
        if let Some(rest) = line.strip_prefix(prefix) {
            return Some((ChunkKind::Function, extract_name(rest)));
        }
    }
    if (line.contains("=> {") || line.contains("=> ("))
        && (line.starts_with("const ") || line.starts_with("export const ") || line.starts_with("let "))
    {
        let rest = line
            .trim_start_matches("export ")
            .trim_start_matches("const ")
            .trim_start_matches("let ");
        return Some((ChunkKind::Function, extract_name(rest)));
    }
    for prefix in ["export default class ", "export class ", "class "] {
        if let Some(rest) = line.strip_prefix(prefix) {
            return Some((ChunkKind::Class, extract_name(rest)));
        }
    }
    None
}

fn detect_go_boundary(line: &str) -> Option<(ChunkKind, String)> {
    if let Some(rest) = line.strip_prefix("func ") {
        // method receivers look like "func (r *Thing) Name(...)"
        let rest = if let Some(after_recv) = rest.strip_prefix('(') {
            after_recv.split_once(')').map(|(_, r)| r).unwrap_or(rest)
        } else {
            rest
        };
        let kind = if line.starts_with("func (") { ChunkKind::Method } else { ChunkKind::Function };
        return Some((kind, extract_name(rest)));
    }
    if line.starts_with("type ") && (line.contains(" struct ") || line.contains(" interface ")) {
        return Some((ChunkKind::Class, extract_name(line.trim_start_matches("type "))));
    }
    None
}

fn detect_java_boundary(line: &str) -> Option<(ChunkKind, String)> {
    let s = line
        .trim_start_matches("public ")
        .trim_start_matches("private ")
        .trim_start_matches("protected ")
        .trim_start_matches("static ")
        .trim_start_matches("final ")
        .trim_start_matches("abstract ")
        .trim_start_matches("synchronized ");
    for prefix in ["class ", "interface ", "enum "] {
        if let Some(rest) = s.strip_prefix(prefix) {
            return Some((ChunkKind::Class, extract_name(rest)));
        }
    }
    if s.contains('(') && !s.starts_with("if ") && !s.starts_with("for ") && !s.starts_with("while ") {
        if let Some(paren) = s.find('(') {
            let before = &s[..paren];
            let parts: Vec<&str> = before.split_whitespace().collect();
            if parts.len() >= 2 {
                return Some((ChunkKind::Method, parts.last().unwrap().to_string()));
            }
        }
    }
    None
}

fn detect_c_boundary(line: &str, idx: usize, lines: &[&str]) -> Option<(ChunkKind, String)> {
    if let Some(rest) = line.strip_prefix("typedef struct") {
        return Some((ChunkKind::Class, extract_name(rest)));
    }
    if let Some(rest) = line.strip_prefix("struct ") {
        return Some((ChunkKind::Class, extract_name(rest)));
    }
    if line.contains('(')
        && !line.starts_with("if ")
        && !line.starts_with("for ")
        && !line.starts_with("while ")
        && !line.starts_with('#')
        && !line.starts_with("//")
    {
        let has_brace = line.ends_with('{') || (idx + 1 < lines.len() && lines[idx + 1].trim() == "{");
        if has_brace {
            let before_paren = line.split('(').next().unwrap_or(line);
            let name = before_paren.split_whitespace().last().unwrap_or("").to_string();
            return Some((ChunkKind::Function, name));
        }
    }
    None
}

fn detect_ruby_boundary(raw_line: &str, trimmed: &str) -> Option<(ChunkKind, String)> {
    if let Some(rest) = trimmed.strip_prefix("def ") {
        let indented = raw_line.starts_with(' ') && raw_line.chars().take_while(|c| *c == ' ').count() > 0;
        let kind = if indented { ChunkKind::Method } else { ChunkKind::Function };
        return Some((kind, extract_name(rest)));
    }
    if let Some(rest) = trimmed.strip_prefix("class ") {
        return Some((ChunkKind::Class, extract_name(rest)));
    }
    if let Some(rest) = trimmed.strip_prefix("module ") {
        return Some((ChunkKind::Module, extract_name(rest)));
    }
    None
}

fn structural_chunks(file: &str, lines: &[&str], boundaries: &[Boundary]) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut last_end = 0usize;

    for (i, boundary) in boundaries.iter().enumerate() {
        let start = if boundary.line >= OVERLAP_LINES {
            boundary.line - OVERLAP_LINES
        } else {
            boundary.line
        };

        let end_limit = if i + 1 < boundaries.len() {
            boundaries[i + 1].line
        } else {
            lines.len()
        };
        let end = end_limit.min(start + MAX_CHUNK_LINES);

        if end <= start || end - start < MIN_CHUNK_LINES {
            continue;
        }

        let text = lines[start..end].join("\n");
        let name = if boundary.name.is_empty() {
            format!("{}:{}", file, start + 1)
        } else {
            boundary.name.clone()
        };
        chunks.push(Chunk {
            id: chunk_id(file, &name, start + 1),
            file: file.to_string(),
            name,
            start_line: start + 1,
            end_line: end,
            text,
            kind: boundary.kind,
        });
        last_end = last_end.max(end);
    }

    if chunks.is_empty() {
        return sliding_window_chunks(file, lines);
    }

    if last_end < lines.len() {
        let tail = lines[last_end..].join("\n");
        if !tail.trim().is_empty() {
            let name = format!("{}:tail", file);
            chunks.push(Chunk {
                id: chunk_id(file, &name, last_end + 1),
                file: file.to_string(),
                name,
                start_line: last_end + 1,
                end_line: lines.len(),
                text: tail,
                kind: ChunkKind::FileTail,
            });
        }
    }

    chunks
}

fn sliding_window_chunks(file: &str, lines: &[&str]) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut pos = 0;

    while pos < lines.len() {
        let end = (pos + TARGET_CHUNK_LINES).min(lines.len());
        let text = lines[pos..end].join("\n");

        if !text.trim().is_empty() {
            let name = format!("{}:{}", file, pos + 1);
            chunks.push(Chunk {
                id: chunk_id(file, &name, pos + 1),
                file: file.to_string(),
                name,
                start_line: pos + 1,
                end_line: end,
                text,
                kind: ChunkKind::Block,
            });
        }

        if end >= lines.len() {
            break;
        }
        pos = end.saturating_sub(OVERLAP_LINES);
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rust_function_detected() {
        let code = "use std::io;\n\npub fn hello() {\n    println!(\"hi\");\n}\n\nfn world() {\n    println!(\"world\");\n}\n";
        let chunks = chunk_file("main.rs", code);
        assert!(!chunks.is_empty());
        assert!(chunks.iter().any(|c| c.kind == ChunkKind::Function));
        assert!(chunks.iter().any(|c| c.name == "hello"));
    }

    #[test]
    fn python_distinguishes_method_from_function() {
        let code = "import os\n\nclass Foo:\n    def bar(self):\n        pass\n\ndef standalone():\n    pass\n";
        let chunks = chunk_file("app.py", code);
        assert!(chunks.iter().any(|c| c.kind == ChunkKind::Method && c.name == "bar"));
        assert!(chunks.iter().any(|c| c.kind == ChunkKind::Function && c.name == "standalone"));
    }

    #[test]
    fn unknown_language_uses_sliding_window() {
        let code = (0..100)
            .map(|i| format!("line {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = chunk_file("data.xyz", &code);
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| c.kind == ChunkKind::Block));
    }

    #[test]
    fn chunk_ids_are_stable_for_same_input() {
        let code = "fn alpha() {\n    1\n}\n";
        let a = chunk_file("lib.rs", code);
        let b = chunk_file("lib.rs", code);
        assert_eq!(a[0].id, b[0].id);
    }

    #[test]
    fn trailing_content_becomes_file_tail() {
        // a single structural boundary followed by more than MAX_CHUNK_LINES
        // of body leaves an unclaimed tail once the chunk is capped.
        let mut code = String::from("fn alpha() {\n");
        for i in 0..120 {
            code.push_str(&format!("    let x{i} = {i};\n"));
        }
        code.push_str("}\n");
        let chunks = chunk_file("lib.rs", &code);
        assert!(chunks.iter().any(|c| c.kind == ChunkKind::FileTail));
    }
}
