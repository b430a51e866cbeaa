//! Fingerprint Store (§4's C1 / §3 "Fingerprint record"): per-file SHA-256 (first
//! 16 hex chars) + mtime, used to detect added/modified/deleted files for
//! incremental sync. Backed by `.code-intel/sync_state.json` +
//! `.code-intel/.last_sync`, matching §6's filesystem layout exactly.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::watcher;

/// `(relative_path, hash16, mtime, indexed_at, chunk_count)`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileFingerprint {
    pub path: String,
    pub hash: String,
    pub mtime: f64,
    pub indexed_at: DateTime<Utc>,
    #[serde(default)]
    pub chunk_count: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncResult {
    pub added: usize,
    pub modified: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub errors: usize,
}

impl SyncResult {
    pub fn has_changes(&self) -> bool {
        self.added > 0 || self.modified > 0 || self.deleted > 0
    }
}

pub struct FingerprintStore {
    project_root: PathBuf,
    state_file: PathBuf,
    last_sync_file: PathBuf,
    state: HashMap<String, FileFingerprint>,
}

impl FingerprintStore {
    pub fn open(project_root: &Path) -> Result<Self> {
        let code_intel_dir = project_root.join(".code-intel");
        let state_file = code_intel_dir.join("sync_state.json");
        let last_sync_file = code_intel_dir.join(".last_sync");

        let state = if state_file.exists() {
            let raw = std::fs::read_to_string(&state_file)
                .with_context(|| format!("reading {}", state_file.display()))?;
            match serde_json::from_str::<HashMap<String, FileFingerprint>>(&raw) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to parse sync_state.json, starting empty");
                    HashMap::new()
                }
            }
        } else {
            HashMap::new()
        };

        Ok(Self {
            project_root: project_root.to_path_buf(),
            state_file,
            last_sync_file,
            state,
        })
    }

    fn save_state(&self) -> Result<()> {
        if let Some(parent) = self.state_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(&self.state)?;
        std::fs::write(&self.state_file, raw)
            .with_context(|| format!("writing {}", self.state_file.display()))
    }

    /// First 16 hex characters of the file's SHA-256 digest.
    pub fn compute_hash(&self, abs_path: &Path) -> String {
        match std::fs::read(abs_path) {
            Ok(content) => watcher::hash_content(&content)[..16].to_string(),
            Err(e) => {
                tracing::warn!(path = %abs_path.display(), error = %e, "failed to hash file");
                String::new()
            }
        }
    }

    pub fn relative_path(&self, abs_path: &Path) -> String {
        abs_path
            .strip_prefix(&self.project_root)
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|_| abs_path.to_string_lossy().to_string())
    }

    /// Walks `source_dirs` (relative to the project root) filtering by
    /// `extensions`, returning the three disjoint lists `(added, modified,
    /// deleted)`. Deleted paths are relative-path strings (the file is gone,
    /// there is no absolute path to return).
    pub fn get_changed_files(
        &self,
        source_dirs: &[&str],
        extensions: &[&str],
        exclude_patterns: &[String],
    ) -> Result<(Vec<PathBuf>, Vec<PathBuf>, Vec<String>)> {
        let mut added = Vec::new();
        let mut modified = Vec::new();
        let mut seen = std::collections::HashSet::new();

        for dir in source_dirs {
            let dir_path = if Path::new(dir).is_absolute() {
                PathBuf::from(dir)
            } else {
                self.project_root.join(dir)
            };
            if !dir_path.exists() {
                tracing::warn!(dir = %dir_path.display(), "source directory not found");
                continue;
            }

            let entries = watcher::walk_project(&dir_path, exclude_patterns)?;
            for entry in entries {
                let ext_ok = extensions.is_empty()
                    || extensions.iter().any(|e| entry.rel_path.ends_with(e));
                if !ext_ok {
                    continue;
                }

                let rel = self.relative_path(&entry.abs_path);
                seen.insert(rel.clone());

                let current_hash = self.compute_hash(&entry.abs_path);
                if current_hash.is_empty() {
                    continue;
                }

                match self.state.get(&rel) {
                    None => added.push(entry.abs_path),
                    Some(fp) if fp.hash != current_hash => modified.push(entry.abs_path),
                    Some(_) => {}
                }
            }
        }

        let deleted: Vec<String> = self
            .state
            .keys()
            .filter(|p| !seen.contains(p.as_str()))
            .cloned()
            .collect();

        Ok((added, modified, deleted))
    }

    pub fn mark_indexed(&mut self, abs_path: &Path, chunk_count: usize) -> Result<()> {
        let rel = self.relative_path(abs_path);
        let mtime = std::fs::metadata(abs_path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        self.state.insert(
            rel.clone(),
            FileFingerprint {
                path: rel,
                hash: self.compute_hash(abs_path),
                mtime,
                indexed_at: Utc::now(),
                chunk_count,
            },
        );
        self.save_state()
    }

    pub fn mark_deleted(&mut self, rel_path: &str) -> Result<()> {
        if self.state.remove(rel_path).is_some() {
            self.save_state()?;
        }
        Ok(())
    }

    pub fn mark_sync_completed(&self) -> Result<()> {
        if let Some(parent) = self.last_sync_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.last_sync_file, Utc::now().to_rfc3339())
            .with_context(|| format!("writing {}", self.last_sync_file.display()))
    }

    pub fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        let raw = std::fs::read_to_string(&self.last_sync_file).ok()?;
        DateTime::parse_from_rfc3339(raw.trim())
            .ok()
            .map(|d| d.with_timezone(&Utc))
    }

    /// TTL default 1 hour: whether enough time has elapsed since the last
    /// successful sync (or no sync has ever happened) to warrant another.
    pub fn needs_sync(&self, ttl_hours: f64) -> bool {
        match self.last_sync_time() {
            None => true,
            Some(last) => {
                let elapsed = Utc::now().signed_duration_since(last);
                elapsed.num_seconds() as f64 > ttl_hours * 3600.0
            }
        }
    }

    pub fn file_count(&self) -> usize {
        self.state.len()
    }

    pub fn total_chunks(&self) -> usize {
        self.state.values().map(|f| f.chunk_count).sum()
    }

    pub fn clear(&mut self) -> Result<()> {
        self.state.clear();
        if self.state_file.exists() {
            std::fs::remove_file(&self.state_file)?;
        }
        if self.last_sync_file.exists() {
            std::fs::remove_file(&self.last_sync_file)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn first_scan_reports_all_files_as_added() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/lib.rs", "fn main() {}");
        let store = FingerprintStore::open(dir.path()).unwrap();
        let (added, modified, deleted) = store
            .get_changed_files(&["src"], &[".rs"], &[])
            .unwrap();
        assert_eq!(added.len(), 1);
        assert!(modified.is_empty());
        assert!(deleted.is_empty());
    }

    #[test]
    fn unchanged_file_is_not_reported() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/lib.rs", "fn main() {}");
        let mut store = FingerprintStore::open(dir.path()).unwrap();
        let abs = dir.path().join("src/lib.rs");
        store.mark_indexed(&abs, 1).unwrap();

        let store = FingerprintStore::open(dir.path()).unwrap();
        let (added, modified, _deleted) = store
            .get_changed_files(&["src"], &[".rs"], &[])
            .unwrap();
        assert!(added.is_empty());
        assert!(modified.is_empty());
    }

    #[test]
    fn edited_file_is_reported_modified() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/lib.rs", "fn main() {}");
        let mut store = FingerprintStore::open(dir.path()).unwrap();
        let abs = dir.path().join("src/lib.rs");
        store.mark_indexed(&abs, 1).unwrap();

        write(dir.path(), "src/lib.rs", "fn main() { println!(\"hi\"); }");
        let store = FingerprintStore::open(dir.path()).unwrap();
        let (added, modified, _deleted) = store
            .get_changed_files(&["src"], &[".rs"], &[])
            .unwrap();
        assert!(added.is_empty());
        assert_eq!(modified.len(), 1);
    }

    #[test]
    fn removed_file_is_reported_deleted() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/lib.rs", "fn main() {}");
        let mut store = FingerprintStore::open(dir.path()).unwrap();
        let abs = dir.path().join("src/lib.rs");
        store.mark_indexed(&abs, 1).unwrap();
        std::fs::remove_file(&abs).unwrap();

        let store = FingerprintStore::open(dir.path()).unwrap();
        let (_added, _modified, deleted) = store
            .get_changed_files(&["src"], &[".rs"], &[])
            .unwrap();
        assert_eq!(deleted, vec!["src/lib.rs".to_string()]);
    }

    #[test]
    fn needs_sync_true_when_never_synced() {
        let dir = tempfile::tempdir().unwrap();
        let store = FingerprintStore::open(dir.path()).unwrap();
        assert!(store.needs_sync(1.0));
    }

    #[test]
    fn needs_sync_false_immediately_after_sync() {
        let dir = tempfile::tempdir().unwrap();
        let store = FingerprintStore::open(dir.path()).unwrap();
        store.mark_sync_completed().unwrap();
        assert!(!store.needs_sync(1.0));
    }
}
