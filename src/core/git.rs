//! Git plumbing: stash/checkout for ref switching, diffs for scope checks,
//! disposable worktrees for red-before-green, commit/push for landing.
//!
//! Everything shells out to the `git` CLI with a bounded timeout. Callers
//! depend on the `GitOps` trait so policy code can be exercised with fakes.

use crate::core::error::GatekeeperError;
use crate::core::patterns;
use crate::core::process;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tracing::{debug, warn};
use ulid::Ulid;

/// Gatekeeper's own state directory. Never stashed, committed or scope-checked.
pub const INTERNAL_DIR: &str = ".gatekeeper";

const DEFAULT_GIT_TIMEOUT: Duration = Duration::from_secs(120);

/// Outcome of a push that git was able to attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushStatus {
    Pushed,
    /// Remote has commits we don't. Offer pull-and-retry or keep the commit local.
    RemoteAhead(String),
    /// Credentials/permissions problem. Terminal until the user fixes access.
    PermissionDenied(String),
    Failed(String),
}

impl PushStatus {
    pub fn code(&self) -> &'static str {
        match self {
            PushStatus::Pushed => "PUSHED",
            PushStatus::RemoteAhead(_) => "REMOTE_AHEAD",
            PushStatus::PermissionDenied(_) => "PERMISSION_DENIED",
            PushStatus::Failed(_) => "PUSH_FAILED",
        }
    }

    pub fn remediation(&self) -> &'static str {
        match self {
            PushStatus::Pushed => "",
            PushStatus::RemoteAhead(_) => {
                "Remote has new commits: pull and retry the push, or keep the commit local."
            }
            PushStatus::PermissionDenied(_) => {
                "Push was denied: fix repository credentials or permissions, then push again."
            }
            PushStatus::Failed(_) => "Push failed: inspect the git output and retry.",
        }
    }

    /// Classify `git push` stderr.
    pub fn classify(stderr: &str) -> Self {
        let lower = stderr.to_lowercase();
        let message = stderr.trim().to_string();
        if lower.contains("[rejected]")
            || lower.contains("fetch first")
            || lower.contains("non-fast-forward")
            || lower.contains("updates were rejected")
        {
            PushStatus::RemoteAhead(message)
        } else if lower.contains("permission denied")
            || lower.contains("authentication failed")
            || lower.contains("could not read username")
            || lower.contains("403")
        {
            PushStatus::PermissionDenied(message)
        } else {
            PushStatus::Failed(message)
        }
    }
}

pub trait GitOps: Send + Sync {
    /// Stash local changes including untracked files. `Ok(false)` when there was nothing to stash.
    fn stash(&self, project: &Path) -> Result<bool, GatekeeperError>;
    fn stash_pop(&self, project: &Path) -> Result<(), GatekeeperError>;
    fn checkout(&self, project: &Path, reference: &str) -> Result<(), GatekeeperError>;
    /// Branch name, or the commit id when HEAD is detached.
    fn current_ref(&self, project: &Path) -> Result<String, GatekeeperError>;
    /// Files changed between two committed refs.
    fn diff_files(
        &self,
        project: &Path,
        base: &str,
        target: &str,
    ) -> Result<Vec<String>, GatekeeperError>;
    /// Files that differ between `base` and the working tree, untracked included.
    fn working_tree_changes(
        &self,
        project: &Path,
        base: &str,
    ) -> Result<Vec<String>, GatekeeperError>;
    fn create_worktree(&self, project: &Path, reference: &str)
    -> Result<PathBuf, GatekeeperError>;
    fn cleanup_worktree(&self, project: &Path, worktree: &Path) -> Result<(), GatekeeperError>;
    /// Stage everything outside the internal dir and commit. Returns the new commit id.
    fn commit(&self, project: &Path, message: &str) -> Result<String, GatekeeperError>;
    fn push(&self, project: &Path, remote: &str, branch: &str)
    -> Result<PushStatus, GatekeeperError>;
}

/// `GitOps` over the git CLI.
#[derive(Debug, Clone)]
pub struct GitWorktreeService {
    worktrees_dir: Option<PathBuf>,
    timeout: Duration,
}

impl Default for GitWorktreeService {
    fn default() -> Self {
        Self {
            worktrees_dir: None,
            timeout: DEFAULT_GIT_TIMEOUT,
        }
    }
}

impl GitWorktreeService {
    pub fn new(worktrees_dir: Option<PathBuf>, timeout: Duration) -> Self {
        Self {
            worktrees_dir,
            timeout,
        }
    }

    fn worktrees_root(&self, project: &Path) -> PathBuf {
        self.worktrees_dir
            .clone()
            .unwrap_or_else(|| project.join(INTERNAL_DIR).join("worktrees"))
    }

    fn git_raw(&self, repo: &Path, args: &[&str]) -> Result<process::ProcessOutput, GatekeeperError> {
        let mut full: Vec<String> = vec!["-C".to_string(), repo.to_string_lossy().to_string()];
        full.extend(args.iter().map(|a| a.to_string()));
        let out = process::run_with_timeout("git", &full, repo, self.timeout)
            .map_err(|e| GatekeeperError::GitError(e.to_string()))?;
        if out.timed_out {
            return Err(GatekeeperError::GitError(format!(
                "git {} timed out after {}s",
                args.join(" "),
                self.timeout.as_secs()
            )));
        }
        Ok(out)
    }

    fn run_git(&self, repo: &Path, args: &[&str]) -> Result<(), GatekeeperError> {
        self.git_output(repo, args).map(|_| ())
    }

    fn git_output(&self, repo: &Path, args: &[&str]) -> Result<String, GatekeeperError> {
        let out = self.git_raw(repo, args)?;
        if !out.success() {
            return Err(GatekeeperError::GitError(format!(
                "git {} failed: {}",
                args.join(" "),
                out.stderr.trim()
            )));
        }
        Ok(out.stdout.trim().to_string())
    }
}

fn exclude_internal() -> String {
    format!(":(exclude){}", INTERNAL_DIR)
}

fn collect_paths(raw: &str, into: &mut BTreeSet<String>) {
    for line in raw.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let path = line.replace('\\', "/");
        if path == INTERNAL_DIR || path.starts_with(&format!("{}/", INTERNAL_DIR)) {
            continue;
        }
        into.insert(path);
    }
}

impl GitOps for GitWorktreeService {
    fn stash(&self, project: &Path) -> Result<bool, GatekeeperError> {
        let message = format!("gatekeeper-{}", Ulid::new());
        let exclude = exclude_internal();
        let stdout = self.git_output(
            project,
            &[
                "stash",
                "push",
                "--include-untracked",
                "-m",
                &message,
                "--",
                ".",
                &exclude,
            ],
        )?;
        Ok(!stdout.contains("No local changes to save"))
    }

    fn stash_pop(&self, project: &Path) -> Result<(), GatekeeperError> {
        self.run_git(project, &["stash", "pop"])
    }

    fn checkout(&self, project: &Path, reference: &str) -> Result<(), GatekeeperError> {
        self.run_git(project, &["checkout", reference])
    }

    fn current_ref(&self, project: &Path) -> Result<String, GatekeeperError> {
        let branch = self.git_output(project, &["rev-parse", "--abbrev-ref", "HEAD"])?;
        if branch == "HEAD" {
            return self.git_output(project, &["rev-parse", "HEAD"]);
        }
        Ok(branch)
    }

    fn diff_files(
        &self,
        project: &Path,
        base: &str,
        target: &str,
    ) -> Result<Vec<String>, GatekeeperError> {
        let range = format!("{}..{}", base, target);
        let stdout =
            self.git_output(project, &["diff", "--name-only", "--no-renames", &range])?;
        let mut paths = BTreeSet::new();
        collect_paths(&stdout, &mut paths);
        Ok(paths.into_iter().collect())
    }

    fn working_tree_changes(
        &self,
        project: &Path,
        base: &str,
    ) -> Result<Vec<String>, GatekeeperError> {
        let mut paths = BTreeSet::new();
        let tracked = self.git_output(project, &["diff", "--name-only", "--no-renames", base])?;
        collect_paths(&tracked, &mut paths);
        let untracked =
            self.git_output(project, &["ls-files", "--others", "--exclude-standard"])?;
        collect_paths(&untracked, &mut paths);
        Ok(paths.into_iter().collect())
    }

    fn create_worktree(
        &self,
        project: &Path,
        reference: &str,
    ) -> Result<PathBuf, GatekeeperError> {
        let root = self.worktrees_root(project);
        fs::create_dir_all(&root).map_err(GatekeeperError::IoError)?;
        let path = root.join(format!("wt-{}", Ulid::new().to_string().to_lowercase()));
        let path_str = path
            .to_str()
            .ok_or_else(|| GatekeeperError::PathError("invalid worktree path".to_string()))?
            .to_string();
        self.run_git(project, &["worktree", "add", "--detach", &path_str, reference])?;
        debug!(worktree = %path.display(), reference, "worktree created");
        Ok(path)
    }

    fn cleanup_worktree(&self, project: &Path, worktree: &Path) -> Result<(), GatekeeperError> {
        let path_str = worktree.to_string_lossy().to_string();
        let removed = self.run_git(project, &["worktree", "remove", "--force", &path_str]);
        if removed.is_err() && worktree.exists() {
            fs::remove_dir_all(worktree).map_err(GatekeeperError::IoError)?;
        }
        // Drop stale admin entries either way.
        self.run_git(project, &["worktree", "prune"])?;
        removed.or_else(|e| if worktree.exists() { Err(e) } else { Ok(()) })
    }

    fn commit(&self, project: &Path, message: &str) -> Result<String, GatekeeperError> {
        let exclude = exclude_internal();
        self.run_git(project, &["add", "-A", "--", ".", &exclude])?;
        let out = self.git_raw(project, &["commit", "-m", message])?;
        if !out.success() {
            let detail = out.combined();
            if detail.contains("nothing to commit") {
                return Err(GatekeeperError::GitError(
                    "nothing to commit: working tree clean".to_string(),
                ));
            }
            return Err(GatekeeperError::GitError(format!(
                "git commit failed: {}",
                detail.trim()
            )));
        }
        self.git_output(project, &["rev-parse", "HEAD"])
    }

    fn push(
        &self,
        project: &Path,
        remote: &str,
        branch: &str,
    ) -> Result<PushStatus, GatekeeperError> {
        let out = self.git_raw(project, &["push", remote, branch])?;
        if out.success() {
            return Ok(PushStatus::Pushed);
        }
        Ok(PushStatus::classify(&out.stderr))
    }
}

/// Scoped worktree: removed when the guard drops, on every exit path.
pub struct WorktreeGuard<'a> {
    git: &'a dyn GitOps,
    project: PathBuf,
    path: PathBuf,
}

impl<'a> WorktreeGuard<'a> {
    pub fn create(
        git: &'a dyn GitOps,
        project: &Path,
        reference: &str,
    ) -> Result<Self, GatekeeperError> {
        let path = git.create_worktree(project, reference)?;
        Ok(Self {
            git,
            project: project.to_path_buf(),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Symlink each project directory in `dirs` into the worktree. Directories
    /// missing from the project or already present in the worktree are left
    /// alone. Returns the directories linked.
    pub fn link_from_project(&self, dirs: &[String]) -> Result<Vec<String>, GatekeeperError> {
        let mut linked = Vec::new();
        for dir in dirs {
            if !patterns::is_contained(dir) {
                return Err(GatekeeperError::PathError(format!(
                    "worktree link {} is outside the project",
                    dir
                )));
            }
            let source = self.project.join(dir);
            let dest = self.path.join(dir);
            if !source.is_dir() || dest.symlink_metadata().is_ok() {
                continue;
            }
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            symlink_dir(&source, &dest)?;
            debug!(worktree = %self.path.display(), dir = %dir, "linked project directory");
            linked.push(dir.clone());
        }
        Ok(linked)
    }
}

#[cfg(unix)]
fn symlink_dir(source: &Path, dest: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(source, dest)
}

#[cfg(windows)]
fn symlink_dir(source: &Path, dest: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_dir(source, dest)
}

impl Drop for WorktreeGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.git.cleanup_worktree(&self.project, &self.path) {
            warn!(worktree = %self.path.display(), error = %e, "worktree cleanup failed");
        }
    }
}

/// Process-wide mutex per project root, serializing stash/checkout/worktree use.
pub fn project_lock(project: &Path) -> Arc<Mutex<()>> {
    static LOCKS: OnceLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = OnceLock::new();
    let key = project
        .canonicalize()
        .unwrap_or_else(|_| project.to_path_buf());
    let mut locks = LOCKS
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    locks
        .entry(key)
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_push_failures() {
        let ahead = PushStatus::classify(
            " ! [rejected]        main -> main (fetch first)\nerror: failed to push some refs",
        );
        assert_eq!(ahead.code(), "REMOTE_AHEAD");
        let denied = PushStatus::classify(
            "remote: Permission to org/repo.git denied to bot.\nfatal: unable to access: The requested URL returned error: 403",
        );
        assert_eq!(denied.code(), "PERMISSION_DENIED");
        let other = PushStatus::classify("fatal: 'origin' does not appear to be a git repository");
        assert_eq!(other.code(), "PUSH_FAILED");
        assert!(!other.remediation().is_empty());
    }

    #[test]
    fn collect_paths_skips_internal_dir() {
        let mut set = BTreeSet::new();
        collect_paths(
            "src/a.ts\n.gatekeeper/data/runs.db\n.gatekeeper\nsrc\\b.ts\n\n",
            &mut set,
        );
        assert_eq!(
            set.into_iter().collect::<Vec<_>>(),
            vec!["src/a.ts".to_string(), "src/b.ts".to_string()]
        );
    }

    #[test]
    fn project_lock_is_shared_per_root() {
        let a = project_lock(Path::new("/nonexistent/gk/project-a"));
        let b = project_lock(Path::new("/nonexistent/gk/project-a"));
        let c = project_lock(Path::new("/nonexistent/gk/project-b"));
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
