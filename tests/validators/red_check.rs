#[path = "../support/mod.rs"]
mod support;

use gatekeeper::core::artifacts::FsArtifactStore;
use gatekeeper::core::config::GatekeeperConfig;
use gatekeeper::core::context::{Services, ValidationContext};
use gatekeeper::core::git::GitWorktreeService;
use gatekeeper::core::manifest::ValidationManifest;
use gatekeeper::core::paths::PathResolverService;
use gatekeeper::core::runners::{Runner, RunnerOutput, Toolchain};
use gatekeeper::core::validator::{Validator, ValidatorStatus};
use gatekeeper::validators::contract::TestFailsBeforeImplementation;
use gatekeeper::validators::execution::TaskTestPasses;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use support::{FakeRunner, TEST_FILE, TEST_SOURCE, init_repo, manifest_json, output};
use tempfile::TempDir;

/// Repo at `main` with the component committed; the test file exists only in
/// the working tree, as it does right after generation.
fn project() -> TempDir {
    let tmp = tempfile::tempdir().expect("tempdir");
    init_repo(
        tmp.path(),
        &[("src/components/Button.tsx", "export function Button() {}\n")],
    );
    fs::create_dir_all(tmp.path().join("src/components/__tests__")).expect("mkdir");
    fs::write(tmp.path().join(TEST_FILE), TEST_SOURCE).expect("test file");
    tmp
}

fn context(root: &Path, runner: Arc<dyn Runner>, test_file: Option<String>) -> ValidationContext {
    let config = GatekeeperConfig::default();
    let artifacts = Arc::new(FsArtifactStore::new(config.artifacts_root(root)));
    let services = Services {
        toolchain: Toolchain {
            test_runner: Some(runner),
            ..Toolchain::default()
        },
        git: Arc::new(GitWorktreeService::new(
            Some(config.worktrees_root(root)),
            Duration::from_secs(30),
        )),
        paths: Arc::new(PathResolverService::new(
            config.conventions.clone(),
            artifacts.clone(),
        )),
        artifacts,
    };
    ValidationContext {
        project_path: root.to_path_buf(),
        task_prompt: "Add a disabled state to Button".to_string(),
        test_file_path: test_file,
        manifest: ValidationManifest::from_json(&manifest_json(&[
            "src/components/Button.tsx",
            TEST_FILE,
        ]))
        .expect("manifest"),
        bypassed_validators: BTreeSet::new(),
        base_ref: "HEAD".to_string(),
        target_ref: "main".to_string(),
        output_id: None,
        config,
        services,
    }
}

fn leftover_worktrees(root: &Path) -> usize {
    fs::read_dir(root.join(".gatekeeper/worktrees"))
        .map(|entries| entries.count())
        .unwrap_or(0)
}

#[test]
fn test_failing_at_base_passes_the_red_check() {
    let tmp = project();
    let root = tmp.path().to_path_buf();
    let runner = FakeRunner::new("test_runner", |cwd, args| {
        // the copied test must be present in the worktree, the component's new code must not
        assert!(cwd.join(&args[0]).is_file(), "test file not copied");
        Ok(output(false))
    });
    let ctx = context(&root, runner.clone(), Some(TEST_FILE.to_string()));

    let outcome = TestFailsBeforeImplementation.evaluate(&ctx).expect("evaluate");
    assert_eq!(outcome.status, ValidatorStatus::Passed, "{}", outcome.message);

    let calls = runner.calls.lock().expect("calls").clone();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].0.starts_with(root.join(".gatekeeper/worktrees")));
    assert_eq!(calls[0].1, vec![TEST_FILE.to_string()]);
    assert_eq!(leftover_worktrees(&root), 0);
}

#[test]
fn installed_dependencies_are_visible_in_the_worktree() {
    let tmp = project();
    let root = tmp.path().to_path_buf();
    fs::create_dir_all(root.join("node_modules/vitest")).expect("mkdir");
    fs::write(root.join("node_modules/vitest/index.js"), "module.exports = {};\n").expect("dep");
    let runner = FakeRunner::new("test_runner", |cwd, _| {
        assert!(cwd.join("node_modules/vitest/index.js").is_file(), "dependencies not linked");
        Ok(output(false))
    });
    let ctx = context(&root, runner.clone(), Some(TEST_FILE.to_string()));

    let outcome = TestFailsBeforeImplementation.evaluate(&ctx).expect("evaluate");
    assert_eq!(outcome.status, ValidatorStatus::Passed, "{}", outcome.message);
    assert_eq!(runner.call_count(), 1);
    assert_eq!(leftover_worktrees(&root), 0);
    // removing the worktree unlinks, it never deletes the project's copy
    assert!(root.join("node_modules/vitest/index.js").is_file());
}

#[test]
fn task_test_without_a_test_file_fails_as_not_configured() {
    let tmp = project();
    let runner = FakeRunner::passing("test_runner");
    let ctx = context(tmp.path(), runner.clone(), None);

    let outcome = TaskTestPasses.evaluate(&ctx).expect("evaluate");
    assert_eq!(outcome.status, ValidatorStatus::Failed);
    assert!(outcome.message.contains("not configured"), "{}", outcome.message);
    assert_eq!(runner.call_count(), 0);
}

#[test]
fn test_passing_at_base_does_not_discriminate() {
    let tmp = project();
    let ctx = context(
        tmp.path(),
        FakeRunner::passing("test_runner"),
        Some(TEST_FILE.to_string()),
    );

    let outcome = TestFailsBeforeImplementation.evaluate(&ctx).expect("evaluate");
    assert_eq!(outcome.status, ValidatorStatus::Failed);
    assert!(
        outcome
            .message
            .contains("Test does not discriminate implementation absence"),
        "{}",
        outcome.message
    );
    assert_eq!(leftover_worktrees(tmp.path()), 0);
}

#[test]
fn absolute_test_path_is_relativized() {
    let tmp = project();
    let runner = FakeRunner::new("test_runner", |_, _| Ok(output(false)));
    let absolute = tmp.path().join(TEST_FILE).to_string_lossy().to_string();
    let ctx = context(tmp.path(), runner.clone(), Some(absolute));

    let outcome = TestFailsBeforeImplementation.evaluate(&ctx).expect("evaluate");
    assert_eq!(outcome.status, ValidatorStatus::Passed);
    assert_eq!(
        runner.calls.lock().expect("calls")[0].1,
        vec![TEST_FILE.to_string()]
    );
}

#[test]
fn timeout_is_a_failure() {
    let tmp = project();
    let runner = FakeRunner::new("test_runner", |_, _| {
        Ok(RunnerOutput {
            timed_out: true,
            exit_code: 124,
            ..output(false)
        })
    });
    let ctx = context(tmp.path(), runner, Some(TEST_FILE.to_string()));

    let outcome = TestFailsBeforeImplementation.evaluate(&ctx).expect("evaluate");
    assert_eq!(outcome.status, ValidatorStatus::Failed);
    assert!(outcome.message.contains("timed out"));
    assert_eq!(outcome.details["exitCode"], 124);
}

#[test]
fn missing_test_file_fails_without_a_worktree() {
    let tmp = project();
    let runner = FakeRunner::passing("test_runner");

    let ctx = context(tmp.path(), runner.clone(), None);
    let outcome = TestFailsBeforeImplementation.evaluate(&ctx).expect("evaluate");
    assert_eq!(outcome.status, ValidatorStatus::Failed);
    assert!(outcome.message.contains("not configured"));

    let ctx = context(
        tmp.path(),
        runner.clone(),
        Some("src/components/__tests__/Gone.spec.tsx".to_string()),
    );
    let outcome = TestFailsBeforeImplementation.evaluate(&ctx).expect("evaluate");
    assert_eq!(outcome.status, ValidatorStatus::Failed);
    assert!(outcome.message.contains("does not exist"));

    assert_eq!(runner.call_count(), 0);
    assert_eq!(leftover_worktrees(tmp.path()), 0);
}
