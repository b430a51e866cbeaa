//! Branch Manager (C10): isolates one session's changes on a dedicated git
//! branch so they can be reviewed, merged, or discarded wholesale. §4.7.
//!
//! Never stored as a live back-pointer inside a `Session` (§9, cyclic
//! reference note) -- only the branch name is persisted there, and this
//! manager is reconstituted from that name plus the repository root on
//! demand, via `BranchManager::for_branch`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::process::Command;

use crate::error::BranchError;

const TASK_BRANCH_PREFIX: &str = "llm_task_";
const MAX_OUTPUT_BYTES: usize = 50 * 1024;

/// Runs `git <args>` in `cwd` with a bounded timeout, truncating oversized
/// output the same way the investigation tools do. Every subprocess
/// invocation in this component goes through this single helper so timing
/// and error surfaces are uniform (§5).
pub async fn run_git(args: &[&str], cwd: &Path, timeout_secs: u64) -> Result<(String, i32)> {
    let fut = Command::new("git").args(args).current_dir(cwd).output();
    let output = match tokio::time::timeout(Duration::from_secs(timeout_secs), fut).await {
        Ok(res) => res?,
        Err(_) => bail!(BranchError::TimedOut(timeout_secs)),
    };

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    if !output.stderr.is_empty() {
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
    }
    if combined.len() > MAX_OUTPUT_BYTES {
        combined.truncate(MAX_OUTPUT_BYTES);
        combined.push_str("\n... (output truncated)");
    }
    Ok((combined, output.status.code().unwrap_or(-1)))
}

/// Bit-exact per §6: `llm_task_{session_id}_from_{base_with_slash_to___}`.
pub fn generate_branch_name(session_id: &str, base: &str) -> String {
    format!("{TASK_BRANCH_PREFIX}{session_id}_from_{}", base.replace('/', "__"))
}

/// Recovers `(session_id, base)` from a branch name. Legacy
/// `llm_task_{session_id}` (no `_from_` suffix) is accepted for backward
/// compatibility with an unknown base.
pub fn parse_task_branch(name: &str) -> Option<(String, Option<String>)> {
    let rest = name.strip_prefix(TASK_BRANCH_PREFIX)?;
    match rest.split_once("_from_") {
        Some((session_id, base)) => Some((session_id.to_string(), Some(base.replace("__", "/")))),
        None => Some((rest.to_string(), None)),
    }
}

#[derive(Debug, Clone)]
pub struct ChangedFile {
    pub path: String,
    pub diff: String,
    pub binary: bool,
}

#[derive(Debug, Clone)]
pub struct StaleBranch {
    pub name: String,
    pub session_id: String,
    pub base: Option<String>,
    pub commits_ahead: u32,
    pub is_current: bool,
}

#[derive(Debug, Clone)]
pub struct FinalizeResult {
    pub kept: Vec<String>,
    pub discarded: Vec<String>,
    pub prepared: bool,
    pub commit_hash: Option<String>,
}

pub struct BranchManager {
    repo_root: PathBuf,
    timeout_secs: u64,
}

impl BranchManager {
    pub fn for_branch(repo_root: &Path, timeout_secs: u64) -> Self {
        Self { repo_root: repo_root.to_path_buf(), timeout_secs }
    }

    async fn git(&self, args: &[&str]) -> Result<(String, i32)> {
        run_git(args, &self.repo_root, self.timeout_secs).await
    }

    pub async fn current_branch(&self) -> Result<String> {
        let (out, _) = self.git(&["rev-parse", "--abbrev-ref", "HEAD"]).await?;
        Ok(out.trim().to_string())
    }

    /// Guards against another task branch already checked out unless the
    /// caller passes `resume_current=true`. Stores the current branch as
    /// base, creates and checks out the new one.
    pub async fn setup(&self, session_id: &str, resume_current: bool) -> Result<String> {
        let current = self.current_branch().await?;
        if parse_task_branch(&current).is_some() && !resume_current {
            bail!(BranchError::AlreadyOnTaskBranch(current));
        }
        if resume_current && parse_task_branch(&current).is_some() {
            return Ok(current);
        }

        let branch = generate_branch_name(session_id, &current);
        let (_, status) = self.git(&["checkout", "-b", &branch]).await?;
        if status != 0 {
            bail!(BranchError::GitFailed { status, stderr: format!("checkout -b {branch} failed") });
        }
        Ok(branch)
    }

    /// Unions uncommitted changes, committed changes (branch vs base), and
    /// untracked files, so tools that mutate the working tree directly
    /// still show up.
    pub async fn get_changes(&self, base: &str) -> Result<Vec<ChangedFile>> {
        let mut paths = std::collections::BTreeSet::new();

        let (uncommitted, _) = self.git(&["diff", "--name-only", "HEAD"]).await?;
        paths.extend(uncommitted.lines().map(|l| l.to_string()));

        let (committed, status) = self.git(&["diff", "--name-only", &format!("{base}...HEAD")]).await?;
        if status == 0 {
            paths.extend(committed.lines().map(|l| l.to_string()));
        } else {
            let (fallback, _) = self.git(&["diff", "--name-only", base, "HEAD"]).await?;
            paths.extend(fallback.lines().map(|l| l.to_string()));
        }

        let (untracked, _) = self
            .git(&["ls-files", "--others", "--exclude-standard"])
            .await?;
        paths.extend(untracked.lines().map(|l| l.to_string()));

        let mut changes = Vec::new();
        for path in paths.into_iter().filter(|p| !p.is_empty()) {
            let (diff, binary) = self.diff_for(&path).await?;
            changes.push(ChangedFile { path, diff, binary });
        }
        Ok(changes)
    }

    async fn diff_for(&self, path: &str) -> Result<(String, bool)> {
        let (diff, _) = self.git(&["diff", "HEAD", "--", path]).await?;
        if diff.contains("Binary files") {
            return Ok((diff, true));
        }
        if !diff.is_empty() {
            return Ok((diff, false));
        }
        // untracked: synthesize a diff against /dev/null
        let (diff, _) = self.git(&["diff", "--no-index", "/dev/null", path]).await?;
        Ok((diff, diff.contains("Binary files")))
    }

    /// Partitions changed paths into keep/discard; discarded paths are
    /// reverted to `base`. Stages everything kept. Commits only if
    /// `execute_commit=true`; otherwise leaves the staged state prepared.
    pub async fn finalize(
        &self,
        base: &str,
        keep: &[String],
        discard: &[String],
        message: Option<&str>,
        execute_commit: bool,
    ) -> Result<FinalizeResult> {
        for path in discard {
            self.git(&["checkout", base, "--", path]).await?;
        }
        self.git(&["add", "-A"]).await?;

        if !execute_commit {
            return Ok(FinalizeResult {
                kept: keep.to_vec(),
                discarded: discard.to_vec(),
                prepared: true,
                commit_hash: None,
            });
        }

        let hash = self.execute_prepared_commit(message.unwrap_or("apply changes")).await?;
        Ok(FinalizeResult {
            kept: keep.to_vec(),
            discarded: discard.to_vec(),
            prepared: false,
            commit_hash: Some(hash),
        })
    }

    /// Commits the already-staged state; idempotent on "nothing to commit".
    pub async fn execute_prepared_commit(&self, message: &str) -> Result<String> {
        let (status_out, _) = self.git(&["status", "--porcelain"]).await?;
        if status_out.trim().is_empty() {
            let (head, _) = self.git(&["rev-parse", "HEAD"]).await?;
            return Ok(head.trim().to_string());
        }

        let (out, status) = self.git(&["commit", "-m", message]).await?;
        if status != 0 {
            bail!(BranchError::CommitExecutionFailed(out));
        }
        let (hash, _) = self.git(&["rev-parse", "--short", "HEAD"]).await?;
        Ok(hash.trim().to_string())
    }

    /// Checkout base, merge the task branch `--no-ff`, delete it. On merge
    /// failure the base is abandoned and the task branch re-checked-out so
    /// the agent isn't left on a half-merged base.
    pub async fn merge(&self, task_branch: &str, base: &str) -> Result<()> {
        self.git(&["checkout", base]).await?;
        let (out, status) = self.git(&["merge", "--no-ff", task_branch]).await?;
        if status != 0 {
            self.git(&["checkout", task_branch]).await?;
            bail!(BranchError::GitFailed { status, stderr: out });
        }
        let (_, del_status) = self.git(&["branch", "-d", task_branch]).await?;
        if del_status != 0 {
            self.git(&["branch", "-D", task_branch]).await?;
        }
        Ok(())
    }

    /// Best-effort branch deletion for a failed session: checks out base
    /// first if the task branch is currently checked out.
    pub async fn delete_branch(&self, task_branch: &str, base: &str) -> Result<()> {
        let current = self.current_branch().await?;
        if current == task_branch {
            self.git(&["checkout", base]).await?;
        }
        self.git(&["branch", "-D", task_branch]).await?;
        Ok(())
    }

    /// Enumerates all `llm_task_*` branches, parses each, and counts commits
    /// ahead of its base.
    pub async fn stale_branches(&self) -> Result<Vec<StaleBranch>> {
        let current = self.current_branch().await?;
        let (out, _) = self
            .git(&["for-each-ref", "--format=%(refname:short)", "refs/heads/"])
            .await?;

        let mut stale = Vec::new();
        for name in out.lines().filter(|l| l.starts_with(TASK_BRANCH_PREFIX)) {
            if let Some((session_id, base)) = parse_task_branch(name) {
                let base_ref = base.clone().unwrap_or_else(|| "main".to_string());
                let ahead = match self
                    .git(&["rev-list", "--count", &format!("{base_ref}..{name}")])
                    .await
                {
                    Ok((count, 0)) => count.trim().parse().unwrap_or(0),
                    _ => 0,
                };
                stale.push(StaleBranch {
                    name: name.to_string(),
                    session_id,
                    base,
                    commits_ahead: ahead,
                    is_current: name == current,
                });
            }
        }
        Ok(stale)
    }

    /// `cleanup_stale_sessions(action)`: auto-checks-out the base of the
    /// current task branch if on one, then deletes or merges every other
    /// stale branch. Errors are collected, never fatal.
    pub async fn cleanup_stale(&self, action: &str) -> Result<Vec<String>> {
        let mut errors = Vec::new();
        let branches = self.stale_branches().await?;

        if let Some(current) = branches.iter().find(|b| b.is_current) {
            let base = current.base.clone().unwrap_or_else(|| "main".to_string());
            if let Err(e) = self.git(&["checkout", &base]).await {
                errors.push(e.to_string());
            }
        }

        for branch in branches {
            let base = branch.base.clone().unwrap_or_else(|| "main".to_string());
            let result = if action == "merge" {
                self.merge(&branch.name, &base).await
            } else {
                self.git(&["branch", "-D", &branch.name]).await.map(|_| ())
            };
            if let Err(e) = result {
                errors.push(format!("{}: {e}", branch.name));
            }
        }
        Ok(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_name_is_self_describing() {
        let name = generate_branch_name("abc123", "main");
        assert_eq!(name, "llm_task_abc123_from_main");
        assert_eq!(parse_task_branch(&name), Some(("abc123".to_string(), Some("main".to_string()))));
    }

    #[test]
    fn slash_in_base_is_double_underscore_encoded() {
        let name = generate_branch_name("s1", "release/2.0");
        assert_eq!(name, "llm_task_s1_from_release__2.0");
        let (id, base) = parse_task_branch(&name).unwrap();
        assert_eq!(id, "s1");
        assert_eq!(base.unwrap(), "release/2.0");
    }

    #[test]
    fn legacy_name_without_from_is_accepted() {
        let (id, base) = parse_task_branch("llm_task_legacy123").unwrap();
        assert_eq!(id, "legacy123");
        assert!(base.is_none());
    }

    async fn init_repo(dir: &Path) {
        run_git(&["init", "-q", "-b", "main"], dir, 10).await.unwrap();
        run_git(&["config", "user.email", "t@example.com"], dir, 10).await.unwrap();
        run_git(&["config", "user.name", "Test"], dir, 10).await.unwrap();
        std::fs::write(dir.join("a.txt"), "one\n").unwrap();
        run_git(&["add", "-A"], dir, 10).await.unwrap();
        run_git(&["commit", "-q", "-m", "init"], dir, 10).await.unwrap();
    }

    #[tokio::test]
    async fn setup_creates_task_branch_from_current() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path()).await;
        let mgr = BranchManager::for_branch(dir.path(), 10);
        let branch = mgr.setup("sess-1", false).await.unwrap();
        assert!(branch.starts_with("llm_task_sess-1_from_"));
        assert_eq!(mgr.current_branch().await.unwrap(), branch);
    }

    #[tokio::test]
    async fn second_setup_without_resume_fails_on_task_branch() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path()).await;
        let mgr = BranchManager::for_branch(dir.path(), 10);
        mgr.setup("sess-1", false).await.unwrap();
        assert!(mgr.setup("sess-2", false).await.is_err());
    }

    #[tokio::test]
    async fn finalize_then_merge_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path()).await;
        let mgr = BranchManager::for_branch(dir.path(), 10);
        let branch = mgr.setup("sess-1", false).await.unwrap();

        std::fs::write(dir.path().join("a.txt"), "two\n").unwrap();
        let result = mgr
            .finalize("main", &["a.txt".to_string()], &[], Some("update a"), true)
            .await
            .unwrap();
        assert!(result.commit_hash.is_some());

        mgr.merge(&branch, "main").await.unwrap();
        assert_eq!(mgr.current_branch().await.unwrap(), "main");
        let content = std::fs::read_to_string(dir.path().join("a.txt")).unwrap();
        assert_eq!(content, "two\n");
    }
}
