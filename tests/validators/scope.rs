#[path = "../support/mod.rs"]
mod support;

use gatekeeper::core::artifacts::FsArtifactStore;
use gatekeeper::core::config::GatekeeperConfig;
use gatekeeper::core::context::{Services, ValidationContext};
use gatekeeper::core::git::GitWorktreeService;
use gatekeeper::core::manifest::ValidationManifest;
use gatekeeper::core::paths::PathResolverService;
use gatekeeper::core::runners::Toolchain;
use gatekeeper::core::validator::{Validator, ValidatorStatus};
use gatekeeper::validators::contract::ManifestFileLock;
use gatekeeper::validators::execution::{DiffScopeEnforcement, TestReadOnlyEnforcement};
use gatekeeper::validators::sanitization::{PathConvention, SensitiveFilesLock, TokenBudgetFit};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use support::{TEST_FILE, git, init_repo};
use tempfile::TempDir;

fn project() -> TempDir {
    let tmp = tempfile::tempdir().expect("tempdir");
    init_repo(
        tmp.path(),
        &[
            ("src/components/Button.tsx", "export function Button() {}\n"),
            ("src/utils/format.ts", "export const f = 1;\n"),
            ("src/utils/format.test.ts", "it('f', () => expect(1).toBe(1));\n"),
        ],
    );
    tmp
}

fn context(root: &Path, manifest: &str, test_file: &str) -> ValidationContext {
    let config = GatekeeperConfig::default();
    let artifacts = Arc::new(FsArtifactStore::new(config.artifacts_root(root)));
    ValidationContext {
        project_path: root.to_path_buf(),
        task_prompt: "Add a disabled state to Button".to_string(),
        test_file_path: Some(test_file.to_string()),
        manifest: ValidationManifest::from_json(manifest).expect("manifest"),
        bypassed_validators: BTreeSet::new(),
        base_ref: "main".to_string(),
        target_ref: "feature".to_string(),
        output_id: None,
        services: Services {
            toolchain: Toolchain::default(),
            git: Arc::new(GitWorktreeService::new(None, Duration::from_secs(30))),
            paths: Arc::new(PathResolverService::new(
                config.conventions.clone(),
                artifacts.clone(),
            )),
            artifacts,
        },
        config,
    }
}

fn button_manifest() -> String {
    support::manifest_json(&["src/components/Button.tsx", TEST_FILE])
}

fn write(root: &Path, path: &str, content: &str) {
    let full = root.join(path);
    fs::create_dir_all(full.parent().expect("parent")).expect("mkdir");
    fs::write(full, content).expect("write");
}

#[test]
fn diff_scope_flags_exactly_the_undeclared_changes() {
    let tmp = project();
    let root = tmp.path();
    write(root, "src/components/Button.tsx", "export function Button(p) {}\n");
    write(root, TEST_FILE, "it('x', () => expect(f()).toBe(2));\n");
    write(root, "src/utils/format.ts", "export const f = 2;\n");
    write(root, "src/extra.ts", "export {};\n");

    let ctx = context(root, &button_manifest(), TEST_FILE);
    let outcome = DiffScopeEnforcement.evaluate(&ctx).expect("evaluate");
    assert_eq!(outcome.status, ValidatorStatus::Failed);
    assert_eq!(
        outcome.details["undeclaredFiles"],
        serde_json::json!(["src/extra.ts", "src/utils/format.ts"])
    );
    assert_eq!(outcome.details["changedFiles"].as_array().map(Vec::len), Some(4));
}

#[test]
fn diff_scope_passes_when_only_declared_files_change() {
    let tmp = project();
    let root = tmp.path();
    write(root, "src/components/Button.tsx", "export function Button(p) {}\n");
    write(root, TEST_FILE, "it('x', () => expect(f()).toBe(2));\n");

    let ctx = context(root, &button_manifest(), TEST_FILE);
    let outcome = DiffScopeEnforcement.evaluate(&ctx).expect("evaluate");
    assert_eq!(outcome.status, ValidatorStatus::Passed, "{}", outcome.message);
}

#[test]
fn manifest_lock_compares_committed_refs() {
    let tmp = project();
    let root = tmp.path();
    git(root, &["checkout", "-b", "feature"]);
    write(root, "src/components/Button.tsx", "export function Button(p) {}\n");
    write(root, "package.json", "{}\n");
    git(root, &["add", "-A"]);
    git(root, &["commit", "-m", "feature"]);
    // uncommitted edits are not part of base..target
    write(root, "src/utils/format.ts", "export const f = 3;\n");

    let ctx = context(root, &button_manifest(), TEST_FILE);
    let outcome = ManifestFileLock.evaluate(&ctx).expect("evaluate");
    assert_eq!(outcome.status, ValidatorStatus::Failed);
    assert_eq!(outcome.details["undeclaredFiles"], serde_json::json!(["package.json"]));
}

#[test]
fn editing_another_test_file_is_a_read_only_violation() {
    let tmp = project();
    let root = tmp.path();
    write(root, TEST_FILE, "it('x', () => expect(f()).toBe(2));\n");
    write(root, "src/utils/format.test.ts", "it('f', () => expect(2).toBe(2));\n");

    let ctx = context(root, &button_manifest(), TEST_FILE);
    let outcome = TestReadOnlyEnforcement.evaluate(&ctx).expect("evaluate");
    assert_eq!(outcome.status, ValidatorStatus::Failed);
    assert_eq!(
        outcome.details["violations"],
        serde_json::json!(["src/utils/format.test.ts"])
    );
}

#[test]
fn declared_test_path_matches_across_separators_and_case() {
    let tmp = project();
    let root = tmp.path();
    write(root, TEST_FILE, "it('x', () => expect(f()).toBe(2));\n");

    let declared = "src\\components\\__tests__\\button.SPEC.tsx";
    let ctx = context(root, &button_manifest(), declared);
    let outcome = TestReadOnlyEnforcement.evaluate(&ctx).expect("evaluate");
    assert_eq!(outcome.status, ValidatorStatus::Passed, "{}", outcome.message);
}

#[test]
fn sensitive_paths_in_manifest_fail() {
    let tmp = project();
    let manifest = support::manifest_json(&[".env.local", "config/certs/server.pem", TEST_FILE]);
    let ctx = context(tmp.path(), &manifest, TEST_FILE);
    let outcome = SensitiveFilesLock.evaluate(&ctx).expect("evaluate");
    assert_eq!(outcome.status, ValidatorStatus::Failed);
    let flagged: Vec<&str> = outcome.details["violations"]
        .as_array()
        .expect("violations")
        .iter()
        .filter_map(|v| v["path"].as_str())
        .collect();
    assert_eq!(flagged, vec![".env.local", "config/certs/server.pem"]);
}

#[test]
fn misplaced_test_file_is_a_convention_warning() {
    let tmp = project();
    let manifest = serde_json::json!({
        "files": [
            {"path": "src/hooks/useToggle.ts", "action": "CREATE"},
            {"path": "tests/useToggle.test.ts", "action": "CREATE"}
        ],
        "testFile": "tests/useToggle.test.ts"
    })
    .to_string();
    let ctx = context(tmp.path(), &manifest, "tests/useToggle.test.ts");
    let outcome = PathConvention.evaluate(&ctx).expect("evaluate");
    assert_eq!(outcome.status, ValidatorStatus::Warning);
    assert_eq!(outcome.details["testType"], "hook");
    assert_eq!(outcome.details["canonical"], "src/hooks/__tests__/useToggle.spec.ts");
}

#[test]
fn binary_manifest_files_are_left_out_of_the_token_budget() {
    let tmp = project();
    let root = tmp.path();
    fs::create_dir_all(root.join("src/components/assets")).expect("mkdir");
    fs::write(
        root.join("src/components/assets/icon.png"),
        [0x89, 0x50, 0x4e, 0x47, 0xff, 0xfe, 0x00],
    )
    .expect("icon");
    let manifest = support::manifest_json(&[
        "src/components/Button.tsx",
        "src/components/assets/icon.png",
        TEST_FILE,
    ]);
    let ctx = context(root, &manifest, TEST_FILE);

    let outcome = TokenBudgetFit.evaluate(&ctx).expect("evaluate");
    assert_eq!(outcome.status, ValidatorStatus::Passed, "{}", outcome.message);
    assert_eq!(
        outcome.details["skippedFiles"],
        serde_json::json!(["src/components/assets/icon.png"])
    );
    assert_eq!(
        outcome.details["countedFiles"],
        serde_json::json!(["src/components/Button.tsx"])
    );
}
