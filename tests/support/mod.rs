//! Fakes shared by the integration tests.
#![allow(dead_code)]

use gatekeeper::core::artifacts::{ArtifactStore, FsArtifactStore};
use gatekeeper::core::config::GatekeeperConfig;
use gatekeeper::core::context::Services;
use gatekeeper::core::error::GatekeeperError;
use gatekeeper::core::git::{GitOps, PushStatus};
use gatekeeper::core::paths::PathResolverService;
use gatekeeper::core::run::RunStore;
use gatekeeper::core::runners::{Runner, RunnerOutput, Toolchain};
use gatekeeper::core::service::{GatekeeperService, RunRequest};
use gatekeeper::validators::ValidatorRegistry;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub const TEST_FILE: &str = "src/components/__tests__/Button.spec.tsx";

pub const TEST_SOURCE: &str = r#"import { render } from '@testing-library/react';
import { Button } from '../Button';

describe('Button', () => {
  it('renders the label', () => {
    expect(render(<Button disabled label="Save" />).getByText('Save')).toBeDisabled();
  });
  it('throws on an empty label', () => {
    expect(() => render(<Button label="" />)).toThrow();
  });
});
"#;

pub fn output(passed: bool) -> RunnerOutput {
    RunnerOutput {
        passed,
        exit_code: if passed { 0 } else { 1 },
        timed_out: false,
        output: if passed { "ok".to_string() } else { "1 failed".to_string() },
        errors: Vec::new(),
        duration_ms: 5,
    }
}

type Script = dyn Fn(&Path, &[String]) -> Result<RunnerOutput, GatekeeperError> + Send + Sync;

/// Runner answering from a closure and recording `(cwd, args)` per call.
pub struct FakeRunner {
    name: String,
    script: Box<Script>,
    pub calls: Mutex<Vec<(PathBuf, Vec<String>)>>,
}

impl FakeRunner {
    pub fn new<F>(name: &str, script: F) -> Arc<Self>
    where
        F: Fn(&Path, &[String]) -> Result<RunnerOutput, GatekeeperError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            name: name.to_string(),
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn passing(name: &str) -> Arc<Self> {
        Self::new(name, |_, _| Ok(output(true)))
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("calls").len()
    }
}

impl Runner for FakeRunner {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, cwd: &Path, args: &[String]) -> Result<RunnerOutput, GatekeeperError> {
        self.calls
            .lock()
            .expect("calls")
            .push((cwd.to_path_buf(), args.to_vec()));
        (self.script)(cwd, args)
    }
}

/// In-memory git. Worktrees are plain directories under `worktree_root`.
pub struct FakeGit {
    pub current: Mutex<String>,
    pub diff: Mutex<Vec<String>>,
    pub changes: Mutex<Vec<String>>,
    pub has_local_changes: bool,
    pub fail_checkout_of: Option<String>,
    pub fail_stash_pop: bool,
    pub worktree_root: PathBuf,
    pub log: Mutex<Vec<String>>,
}

impl FakeGit {
    pub fn new(worktree_root: &Path) -> Self {
        Self {
            current: Mutex::new("main".to_string()),
            diff: Mutex::new(Vec::new()),
            changes: Mutex::new(Vec::new()),
            has_local_changes: false,
            fail_checkout_of: None,
            fail_stash_pop: false,
            worktree_root: worktree_root.to_path_buf(),
            log: Mutex::new(Vec::new()),
        }
    }

    pub fn with_changes(self, paths: &[&str]) -> Self {
        let list: Vec<String> = paths.iter().map(|p| p.to_string()).collect();
        *self.diff.lock().expect("diff") = list.clone();
        *self.changes.lock().expect("changes") = list;
        self
    }

    fn record(&self, entry: String) {
        self.log.lock().expect("log").push(entry);
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().expect("log").clone()
    }
}

impl GitOps for FakeGit {
    fn stash(&self, _project: &Path) -> Result<bool, GatekeeperError> {
        self.record("stash".to_string());
        Ok(self.has_local_changes)
    }

    fn stash_pop(&self, _project: &Path) -> Result<(), GatekeeperError> {
        self.record("stash_pop".to_string());
        if self.fail_stash_pop {
            return Err(GatekeeperError::GitError("CONFLICT in src/a.ts".to_string()));
        }
        Ok(())
    }

    fn checkout(&self, _project: &Path, reference: &str) -> Result<(), GatekeeperError> {
        self.record(format!("checkout {}", reference));
        if self.fail_checkout_of.as_deref() == Some(reference) {
            return Err(GatekeeperError::GitError(format!(
                "pathspec '{}' did not match",
                reference
            )));
        }
        *self.current.lock().expect("current") = reference.to_string();
        Ok(())
    }

    fn current_ref(&self, _project: &Path) -> Result<String, GatekeeperError> {
        Ok(self.current.lock().expect("current").clone())
    }

    fn diff_files(
        &self,
        _project: &Path,
        _base: &str,
        _target: &str,
    ) -> Result<Vec<String>, GatekeeperError> {
        Ok(self.diff.lock().expect("diff").clone())
    }

    fn working_tree_changes(
        &self,
        _project: &Path,
        _base: &str,
    ) -> Result<Vec<String>, GatekeeperError> {
        Ok(self.changes.lock().expect("changes").clone())
    }

    fn create_worktree(&self, _project: &Path, reference: &str) -> Result<PathBuf, GatekeeperError> {
        let path = self
            .worktree_root
            .join(format!("wt-{}", self.log.lock().expect("log").len()));
        fs::create_dir_all(&path)?;
        self.record(format!("worktree {}", reference));
        Ok(path)
    }

    fn cleanup_worktree(&self, _project: &Path, worktree: &Path) -> Result<(), GatekeeperError> {
        self.record("cleanup".to_string());
        if worktree.exists() {
            fs::remove_dir_all(worktree)?;
        }
        Ok(())
    }

    fn commit(&self, _project: &Path, message: &str) -> Result<String, GatekeeperError> {
        self.record(format!("commit {}", message));
        Ok("0123456789abcdef0123456789abcdef01234567".to_string())
    }

    fn push(&self, _project: &Path, remote: &str, branch: &str) -> Result<PushStatus, GatekeeperError> {
        self.record(format!("push {} {}", remote, branch));
        Ok(PushStatus::Pushed)
    }
}

/// Runners used by a test project. The test runner fails when run inside a
/// worktree (base ref) and passes in the project itself, i.e. a correct
/// red-before-green test.
pub struct Tools {
    pub compiler: Arc<FakeRunner>,
    pub linter: Arc<FakeRunner>,
    pub test_runner: Arc<FakeRunner>,
    pub build: Arc<FakeRunner>,
}

impl Tools {
    pub fn red_then_green(worktree_root: &Path) -> Self {
        let root = worktree_root.to_path_buf();
        Self {
            compiler: FakeRunner::passing("compiler"),
            linter: FakeRunner::passing("linter"),
            test_runner: FakeRunner::new("test_runner", move |cwd, _| {
                Ok(output(!cwd.starts_with(&root)))
            }),
            build: FakeRunner::passing("build"),
        }
    }

    pub fn toolchain(&self) -> Toolchain {
        Toolchain {
            compiler: Some(self.compiler.clone()),
            linter: Some(self.linter.clone()),
            test_runner: Some(self.test_runner.clone()),
            build: Some(self.build.clone()),
        }
    }
}

/// A temp project with the Button component, its test and a manifest for both.
pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub git: Arc<FakeGit>,
    pub tools: Tools,
    pub config: GatekeeperConfig,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_git(|git| git)
    }

    pub fn with_git(configure: impl FnOnce(FakeGit) -> FakeGit) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        fs::create_dir_all(root.join("src/components/__tests__")).expect("mkdir");
        fs::write(
            root.join("src/components/Button.tsx"),
            "export function Button() { return null; }\n",
        )
        .expect("component");
        fs::write(root.join(TEST_FILE), TEST_SOURCE).expect("test file");
        let worktrees = root.join(".gatekeeper/worktrees");
        let git = configure(
            FakeGit::new(&worktrees)
                .with_changes(&["src/components/Button.tsx", TEST_FILE]),
        );
        let tools = Tools::red_then_green(&worktrees);
        Self {
            dir,
            git: Arc::new(git),
            tools,
            config: GatekeeperConfig::default(),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn services(&self) -> Services {
        let artifacts: Arc<dyn ArtifactStore> =
            Arc::new(FsArtifactStore::new(self.config.artifacts_root(self.root())));
        Services {
            toolchain: self.tools.toolchain(),
            git: self.git.clone(),
            paths: Arc::new(PathResolverService::new(
                self.config.conventions.clone(),
                artifacts.clone(),
            )),
            artifacts,
        }
    }

    pub fn service(&self) -> GatekeeperService {
        self.service_with(ValidatorRegistry::standard())
    }

    pub fn service_with(&self, registry: ValidatorRegistry) -> GatekeeperService {
        let store = RunStore::open(&self.root().join(".gatekeeper/data")).expect("store");
        GatekeeperService::with_parts(
            self.root(),
            self.config.clone(),
            self.services(),
            registry,
            store,
        )
    }

    pub fn request(&self) -> RunRequest {
        RunRequest {
            task_prompt: "Add a disabled state to the Button component and reject an empty label"
                .to_string(),
            manifest_json: manifest_json(&["src/components/Button.tsx", TEST_FILE]),
            test_file_path: Some(TEST_FILE.to_string()),
            target_ref: Some("main".to_string()),
            ..RunRequest::default()
        }
    }
}

pub fn manifest_json(paths: &[&str]) -> String {
    let files: Vec<serde_json::Value> = paths
        .iter()
        .map(|p| {
            let action = if *p == TEST_FILE { "CREATE" } else { "MODIFY" };
            serde_json::json!({ "path": p, "action": action, "reason": "task" })
        })
        .collect();
    serde_json::json!({ "files": files, "testFile": TEST_FILE }).to_string()
}

pub fn git(root: &Path, args: &[&str]) -> String {
    let out = std::process::Command::new("git")
        .args(args)
        .current_dir(root)
        .output()
        .expect("git");
    assert!(
        out.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}

/// `git init -b main` with an identity and one commit of `files`.
pub fn init_repo(root: &Path, files: &[(&str, &str)]) {
    git(root, &["init", "-b", "main"]);
    git(root, &["config", "user.email", "test@example.com"]);
    git(root, &["config", "user.name", "Test"]);
    git(root, &["config", "commit.gpgsign", "false"]);
    for (path, content) in files {
        let full = root.join(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).expect("mkdir");
        }
        fs::write(full, content).expect("write");
    }
    git(root, &["add", "-A"]);
    git(root, &["commit", "-m", "initial"]);
}
