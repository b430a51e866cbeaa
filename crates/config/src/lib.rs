//! Ambient configuration layer: process-level [`Settings`] (`code-intel.toml`) and the
//! per-project [`ProjectContext`] (`.code-intel/context.yml`).
//!
//! Both loaders are defaults-first: a missing or partially filled file never panics,
//! it just falls back to documented defaults and logs at `warn`.

pub mod context;
pub mod settings;

pub use context::{DocSource, DocumentSearchConfig, ProjectContext};
pub use settings::{GateLevel, Settings};

use std::path::{Path, PathBuf};

/// Returns `<repo>/.code-intel`, creating it if absent.
pub fn ensure_code_intel_dir(repo_root: &Path) -> std::io::Result<PathBuf> {
    let dir = repo_root.join(".code-intel");
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// First 16 hex characters of the file content's SHA-256 — the same `hash16`
/// convention the fingerprint store uses, reused here for context staleness.
pub fn hash16(content: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(content);
    hex::encode(digest)[..16].to_string()
}
