//! Vector Index (§4.3's C3): a forest collection of code chunks and a map
//! collection of short natural-language-term -> symbol associations (learned
//! pairs, agreement excerpts), backed by one SQLite file under
//! `<repo>/.code-intel/chroma/`. Search is short-circuited: the map collection
//! is cheap and precise, so it is always searched first; only when it fails to
//! produce a confident hit does the (larger, fuzzier) forest get searched too.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::Result;
use rusqlite::{params, Connection};
use sha2::Digest;

use crate::chunker::Chunk;
use crate::watcher::FileEntry;

/// Map hits at or above this cosine score are trusted outright; the forest is
/// not searched at all and the caller gets `Confidence::High`.
pub const MAP_SHORT_CIRCUIT_THRESHOLD: f32 = 0.7;
const MAP_SEARCH_N: usize = 5;

#[derive(Debug, Clone, Default)]
pub struct IndexStats {
    pub file_count: usize,
    pub chunk_count: usize,
    pub vector_count: usize,
    pub map_count: usize,
    pub db_size_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub results: Vec<crate::SearchResult>,
    pub confidence: Confidence,
    /// Whether the forest collection was skipped because the map collection
    /// already produced a confident hit.
    pub forest_skipped: bool,
}

pub struct VectorStore {
    conn: std::sync::Mutex<Connection>,
    forest: RwLock<ForestCache>,
    map: RwLock<MapCache>,
    db_path: PathBuf,
}

#[derive(Default)]
struct ForestCache {
    embeddings: Vec<Vec<f32>>,
    file_paths: Vec<String>,
    start_lines: Vec<usize>,
    end_lines: Vec<usize>,
    chunk_texts: Vec<String>,
}

#[derive(Default)]
struct MapCache {
    embeddings: Vec<Vec<f32>>,
    keys: Vec<String>,
    values: Vec<String>,
    sources: Vec<String>,
}

impl VectorStore {
    pub fn open(project_root: &Path) -> Result<Self> {
        let db_dir = chroma_dir(project_root);
        std::fs::create_dir_all(&db_dir)?;
        let db_path = db_dir.join("index.db");

        let conn = Connection::open(&db_path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;",
        )?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS files (
                path TEXT PRIMARY KEY,
                hash TEXT NOT NULL,
                mtime INTEGER NOT NULL DEFAULT 0,
                chunk_count INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS forest_chunks (
                id INTEGER PRIMARY KEY,
                file_path TEXT NOT NULL REFERENCES files(path) ON DELETE CASCADE,
                start_line INTEGER NOT NULL,
                end_line INTEGER NOT NULL,
                content_hash TEXT NOT NULL,
                chunk_text TEXT NOT NULL,
                embedding BLOB,
                model_id TEXT,
                dims INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_forest_chunks_file ON forest_chunks(file_path);
            CREATE TABLE IF NOT EXISTS map_entries (
                id INTEGER PRIMARY KEY,
                key_text TEXT NOT NULL,
                value_text TEXT NOT NULL,
                source TEXT NOT NULL,
                embedding BLOB NOT NULL,
                model_id TEXT,
                dims INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;

        let store = Self {
            conn: std::sync::Mutex::new(conn),
            forest: RwLock::new(ForestCache::default()),
            map: RwLock::new(MapCache::default()),
            db_path,
        };

        store.load_forest()?;
        store.load_map()?;
        Ok(store)
    }

    pub fn file_hashes(&self) -> Result<HashMap<String, String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT path, hash FROM files")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut map = HashMap::new();
        for row in rows {
            let (path, hash) = row?;
            map.insert(path, hash);
        }
        Ok(map)
    }

    pub fn file_hash(&self, path: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT hash FROM files WHERE path = ?1")?;
        let result = stmt.query_row(params![path], |row| row.get::<_, String>(0));
        match result {
            Ok(h) => Ok(Some(h)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn upsert_file(&self, path: &str, hash: &str, chunk_count: usize) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO files (path, hash, chunk_count) VALUES (?1, ?2, ?3)
             ON CONFLICT(path) DO UPDATE SET hash = ?2, chunk_count = ?3",
            params![path, hash, chunk_count as i64],
        )?;
        Ok(())
    }

    pub fn replace_chunks(
        &self,
        file_path: &str,
        chunks: &[Chunk],
        embeddings: &[Vec<f32>],
        model_id: &str,
        dims: usize,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM forest_chunks WHERE file_path = ?1",
            params![file_path],
        )?;

        let mut stmt = conn.prepare(
            "INSERT INTO forest_chunks (file_path, start_line, end_line, content_hash, chunk_text, embedding, model_id, dims)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;

        for (i, chunk) in chunks.iter().enumerate() {
            let content_hash = hex::encode(sha2::Sha256::digest(chunk.text.as_bytes()));

            let embedding_blob: Option<Vec<u8>> = embeddings
                .get(i)
                .map(|emb| emb.iter().flat_map(|f| f.to_le_bytes()).collect());

            stmt.execute(params![
                file_path,
                chunk.start_line as i64,
                chunk.end_line as i64,
                content_hash,
                chunk.text,
                embedding_blob,
                model_id,
                dims as i64,
            ])?;
        }

        Ok(())
    }

    pub fn remove_deleted(&self, current_files: &[FileEntry]) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT path FROM files")?;
        let stored: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .collect();

        let current_set: std::collections::HashSet<&str> =
            current_files.iter().map(|e| e.rel_path.as_str()).collect();

        for path in &stored {
            if !current_set.contains(path.as_str()) {
                conn.execute("DELETE FROM files WHERE path = ?1", params![path])?;
            }
        }
        Ok(())
    }

    /// Inserts one natural-language term -> symbol association into the map
    /// collection (learned pairs, agreement excerpts). Unlike forest chunks,
    /// map entries are append-only; callers dedup before calling this.
    pub fn upsert_map_entry(
        &self,
        key_text: &str,
        value_text: &str,
        source: &str,
        embedding: &[f32],
        model_id: &str,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let blob: Vec<u8> = embedding.iter().flat_map(|f| f.to_le_bytes()).collect();
        conn.execute(
            "INSERT INTO map_entries (key_text, value_text, source, embedding, model_id, dims, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                key_text,
                value_text,
                source,
                blob,
                model_id,
                embedding.len() as i64,
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        drop(conn);
        self.load_map()
    }

    /// Deletes a file's row (and, via `ON DELETE CASCADE`, its chunks) from
    /// the forest collection. Does not touch the map collection — learned
    /// pairs and agreement excerpts outlive the source file they were
    /// derived from.
    pub fn remove_file(&self, path: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM files WHERE path = ?1", params![path])?;
        Ok(())
    }

    /// Reloads the in-memory forest cache from SQLite. Call after any
    /// `replace_chunks`/`remove_file` batch so subsequent `search` calls see
    /// the new state.
    pub fn refresh_forest(&self) -> Result<()> {
        self.load_forest()
    }

    fn load_forest(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT file_path, start_line, end_line, chunk_text, embedding, dims
             FROM forest_chunks WHERE embedding IS NOT NULL",
        )?;

        let mut cache = ForestCache::default();
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)? as usize,
                row.get::<_, i64>(2)? as usize,
                row.get::<_, String>(3)?,
                row.get::<_, Vec<u8>>(4)?,
                row.get::<_, i64>(5)? as usize,
            ))
        })?;

        for row in rows {
            let (file_path, start, end, text, blob, dims) = row?;
            if dims == 0 || blob.len() != dims * 4 {
                continue;
            }
            cache.embeddings.push(decode_embedding(&blob));
            cache.file_paths.push(file_path);
            cache.start_lines.push(start);
            cache.end_lines.push(end);
            cache.chunk_texts.push(text);
        }

        *self.forest.write().unwrap() = cache;
        Ok(())
    }

    fn load_map(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT key_text, value_text, source, embedding, dims FROM map_entries",
        )?;

        let mut cache = MapCache::default();
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Vec<u8>>(3)?,
                row.get::<_, i64>(4)? as usize,
            ))
        })?;

        for row in rows {
            let (key, value, source, blob, dims) = row?;
            if dims == 0 || blob.len() != dims * 4 {
                continue;
            }
            cache.embeddings.push(decode_embedding(&blob));
            cache.keys.push(key);
            cache.values.push(value);
            cache.sources.push(source);
        }

        *self.map.write().unwrap() = cache;
        Ok(())
    }

    /// Map-first, short-circuiting search: the map collection is cheap and
    /// high-precision, so it's always tried first. A top map hit scoring at
    /// or above `MAP_SHORT_CIRCUIT_THRESHOLD` is returned on its own with
    /// `Confidence::High` and the (larger, slower) forest is skipped
    /// entirely. Otherwise the forest is searched too and both result sets
    /// are merged, with confidence downgraded to `Medium` or `Low` depending
    /// on whether any map hit cleared a lower bar.
    pub fn search(
        &self,
        query_vec: &[f32],
        query_text: &str,
        limit: usize,
    ) -> Result<SearchOutcome> {
        let map_hits = self.search_map(query_vec, MAP_SEARCH_N);
        let top_map_score = map_hits.first().map(|(_, s)| *s).unwrap_or(0.0);

        if top_map_score >= MAP_SHORT_CIRCUIT_THRESHOLD {
            let results = map_hits
                .into_iter()
                .take(limit)
                .map(|(idx, score)| self.map_hit_to_result(idx, score))
                .collect();
            return Ok(SearchOutcome {
                results,
                confidence: Confidence::High,
                forest_skipped: true,
            });
        }

        let forest_results = self.search_forest(query_vec, query_text, limit)?;

        let mut results: Vec<crate::SearchResult> = map_hits
            .iter()
            .take(limit)
            .map(|(idx, score)| self.map_hit_to_result(*idx, *score))
            .collect();
        results.extend(forest_results);
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(limit);

        let confidence = if top_map_score >= 0.3 {
            Confidence::Medium
        } else {
            Confidence::Low
        };

        Ok(SearchOutcome {
            results,
            confidence,
            forest_skipped: false,
        })
    }

    fn search_map(&self, query_vec: &[f32], n: usize) -> Vec<(usize, f32)> {
        let cache = self.map.read().unwrap();
        let mut scored: Vec<(usize, f32)> = cache
            .embeddings
            .iter()
            .enumerate()
            .map(|(i, emb)| (i, cosine_score(query_vec, emb)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(n);
        scored
    }

    fn map_hit_to_result(&self, idx: usize, score: f32) -> crate::SearchResult {
        let cache = self.map.read().unwrap();
        crate::SearchResult {
            file: format!("map:{}", cache.sources[idx]),
            start_line: 0,
            end_line: 0,
            score,
            content: format!("{} -> {}", cache.keys[idx], cache.values[idx]),
        }
    }

    fn search_forest(
        &self,
        query_vec: &[f32],
        query_text: &str,
        limit: usize,
    ) -> Result<Vec<crate::SearchResult>> {
        let cache = self.forest.read().unwrap();
        if cache.embeddings.is_empty() {
            return Ok(vec![]);
        }

        let query_tokens: Vec<String> = query_text
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|s| s.len() >= 2)
            .map(|s| s.to_lowercase())
            .collect();

        let mut scored: Vec<(usize, f32)> = cache
            .embeddings
            .iter()
            .enumerate()
            .map(|(i, emb)| {
                let mut score = cosine_score(query_vec, emb);

                if !query_tokens.is_empty() {
                    let text_lower = cache.chunk_texts[i].to_lowercase();
                    let hits = query_tokens
                        .iter()
                        .filter(|t| text_lower.contains(t.as_str()))
                        .count();
                    let keyword_boost = (hits as f32 / query_tokens.len() as f32) * 0.15;
                    score += keyword_boost;
                }

                (i, score)
            })
            .filter(|(_, s)| *s > 0.05)
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit * 3);

        let mut results = Vec::new();
        let mut seen_files: HashMap<String, usize> = HashMap::new();

        for (idx, score) in scored {
            let file = &cache.file_paths[idx];
            let count = seen_files.entry(file.clone()).or_insert(0);
            if *count >= 3 {
                continue;
            }
            *count += 1;

            let content = &cache.chunk_texts[idx];
            let preview = if content.lines().count() > 15 {
                let lines: Vec<&str> = content.lines().take(15).collect();
                format!(
                    "{}\n  ... ({} more lines)",
                    lines.join("\n"),
                    content.lines().count() - 15
                )
            } else {
                content.clone()
            };

            results.push(crate::SearchResult {
                file: file.clone(),
                start_line: cache.start_lines[idx],
                end_line: cache.end_lines[idx],
                score,
                content: preview,
            });

            if results.len() >= limit {
                break;
            }
        }

        Ok(results)
    }

    pub fn vector_count(&self) -> usize {
        self.forest.read().unwrap().embeddings.len()
    }

    pub fn map_count(&self) -> usize {
        self.map.read().unwrap().embeddings.len()
    }

    pub fn stats(&self) -> Result<IndexStats> {
        let conn = self.conn.lock().unwrap();
        let file_count: usize = conn
            .query_row("SELECT COUNT(*) FROM files", [], |r| r.get::<_, i64>(0))
            .unwrap_or(0) as usize;
        let chunk_count: usize = conn
            .query_row("SELECT COUNT(*) FROM forest_chunks", [], |r| r.get::<_, i64>(0))
            .unwrap_or(0) as usize;
        drop(conn);

        let db_size_bytes = std::fs::metadata(&self.db_path)
            .map(|m| m.len())
            .unwrap_or(0);

        Ok(IndexStats {
            file_count,
            chunk_count,
            vector_count: self.vector_count(),
            map_count: self.map_count(),
            db_size_bytes,
        })
    }
}

fn decode_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// `<repo>/.code-intel/chroma/`: the vector store lives inside the repository
/// it indexes, not in a global OS data directory, so it travels with the repo
/// and is trivially removable via `rm -rf .code-intel`.
fn chroma_dir(project_root: &Path) -> PathBuf {
    project_root.join(".code-intel").join("chroma")
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for i in 0..a.len() {
        dot += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        0.0
    } else {
        dot / denom
    }
}

/// Normalized cosine-equivalent score: `1 / (1 + distance)` with
/// `distance = 1 - cosine_similarity`. `MAP_SHORT_CIRCUIT_THRESHOLD` and the
/// medium-confidence cutoff in `search` are both calibrated against this
/// curve, not the raw cosine value.
fn cosine_score(a: &[f32], b: &[f32]) -> f32 {
    let distance = 1.0 - cosine_similarity(a, b);
    1.0 / (1.0 + distance)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_identical_vectors() {
        let a = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&a, &a);
        assert!((sim - 1.0).abs() < 1e-5);
    }

    #[test]
    fn cosine_orthogonal_vectors() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        let sim = cosine_similarity(&a, &b);
        assert!(sim.abs() < 1e-5);
    }

    #[test]
    fn db_lives_under_code_intel_chroma() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::open(dir.path()).unwrap();
        assert!(dir.path().join(".code-intel/chroma/index.db").exists());
        drop(store);
    }

    #[test]
    fn confident_map_hit_short_circuits_forest() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::open(dir.path()).unwrap();
        store
            .upsert_map_entry("auth flow", "AuthService", "agreement:auth.md", &[1.0, 0.0, 0.0], "test")
            .unwrap();

        let outcome = store.search(&[1.0, 0.0, 0.0], "auth flow", 5).unwrap();
        assert!(outcome.forest_skipped);
        assert_eq!(outcome.confidence, Confidence::High);
        assert_eq!(outcome.results.len(), 1);
    }

    #[test]
    fn weak_map_hit_falls_through_to_medium_confidence_forest_search() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::open(dir.path()).unwrap();
        store
            .upsert_map_entry("unrelated", "SomethingElse", "agreement:x.md", &[0.0, 1.0, 0.0], "test")
            .unwrap();

        let outcome = store.search(&[1.0, 0.0, 0.0], "auth flow", 5).unwrap();
        assert!(!outcome.forest_skipped);
        assert_eq!(outcome.confidence, Confidence::Medium);
    }

    #[test]
    fn empty_map_falls_through_to_low_confidence_forest_search() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::open(dir.path()).unwrap();

        let outcome = store.search(&[1.0, 0.0, 0.0], "auth flow", 5).unwrap();
        assert!(!outcome.forest_skipped);
        assert_eq!(outcome.confidence, Confidence::Low);
    }

    #[test]
    fn cosine_score_transforms_identical_vectors_to_one() {
        let a = vec![1.0, 2.0, 3.0];
        let score = cosine_score(&a, &a);
        assert!((score - 1.0).abs() < 1e-5);
    }

    #[test]
    fn cosine_score_orthogonal_vectors_is_one_half() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        let score = cosine_score(&a, &b);
        assert!((score - 0.5).abs() < 1e-5);
    }
}
