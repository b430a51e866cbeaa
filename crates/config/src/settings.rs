use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Process-level configuration, loaded once by the composition root at startup
/// from `<repo>/code-intel.toml`. Every field has a documented default, so the
/// file is entirely optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// `full` forces every investigative phase; `auto` lets the agent attest
    /// that a phase is unnecessary at each juncture.
    pub gate_level_default: GateLevel,
    /// QUALITY_REVIEW → READY reverts allowed before completion is forced.
    pub revert_cap: u32,
    /// Hours since the last successful sync before a new one is required.
    pub sync_ttl_hours: f64,
    /// Timeout applied to every subprocess invocation (`rg`, `ctags`, `git`, …).
    pub subprocess_timeout_secs: u64,
    /// Upper bound on parallel `search_text` patterns in a single call.
    pub max_search_patterns: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateLevel {
    Full,
    Auto,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            gate_level_default: GateLevel::Auto,
            revert_cap: 3,
            sync_ttl_hours: 1.0,
            subprocess_timeout_secs: 30,
            max_search_patterns: 5,
        }
    }
}

impl Settings {
    /// Loads `<repo_root>/code-intel.toml`, falling back to defaults if the
    /// file is absent. A malformed file is a hard error — unlike a missing
    /// one, it signals the operator wrote something they intended to take
    /// effect.
    pub fn load(repo_root: &Path) -> Result<Self> {
        let path = repo_root.join("code-intel.toml");
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no code-intel.toml, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let settings: Settings = toml::from_str(&raw)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let s = Settings::default();
        assert_eq!(s.revert_cap, 3);
        assert_eq!(s.sync_ttl_hours, 1.0);
        assert_eq!(s.subprocess_timeout_secs, 30);
        assert_eq!(s.max_search_patterns, 5);
        assert_eq!(s.gate_level_default, GateLevel::Auto);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(dir.path()).unwrap();
        assert_eq!(settings.revert_cap, Settings::default().revert_cap);
    }

    #[test]
    fn partial_file_overrides_only_given_fields() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("code-intel.toml"), "revert_cap = 5\n").unwrap();
        let settings = Settings::load(dir.path()).unwrap();
        assert_eq!(settings.revert_cap, 5);
        assert_eq!(settings.sync_ttl_hours, Settings::default().sync_ttl_hours);
    }
}
