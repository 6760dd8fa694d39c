use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

fn stagecraft() -> assert_cmd::Command {
    cargo_bin_cmd!("stagecraft")
}

fn web_project(dir: &Path) {
    std::fs::write(
        dir.join("package.json"),
        r#"{"name":"web","version":"0.1.0"}"#,
    )
    .unwrap();
    std::fs::write(dir.join("package-lock.json"), "{}").unwrap();
}

// ── Help / Version ──

#[test]
fn shows_help() {
    stagecraft()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("non-root runtime images"));
}

#[test]
fn shows_version() {
    stagecraft()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("stagecraft"));
}

// ── Init Command ──

#[test]
fn init_creates_config_and_ignore_file() {
    let tmp = TempDir::new().unwrap();
    web_project(tmp.path());

    stagecraft()
        .current_dir(tmp.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created stagecraft.toml"));

    assert!(tmp.path().join("stagecraft.toml").exists());
    let ignore = std::fs::read_to_string(tmp.path().join(".stagecraftignore")).unwrap();
    assert!(ignore.contains("node_modules"));
}

#[test]
fn init_twice_skips_existing_files() {
    let tmp = TempDir::new().unwrap();
    web_project(tmp.path());

    stagecraft().current_dir(tmp.path()).arg("init").assert().success();
    stagecraft()
        .current_dir(tmp.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("already initialized"));
}

#[test]
fn init_requires_manifest() {
    let tmp = TempDir::new().unwrap();

    stagecraft()
        .current_dir(tmp.path())
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("package.json not found"));
}

#[test]
fn generated_config_is_loadable() {
    let tmp = TempDir::new().unwrap();
    web_project(tmp.path());
    stagecraft().current_dir(tmp.path()).arg("init").assert().success();

    stagecraft()
        .current_dir(tmp.path())
        .arg("plan")
        .assert()
        .success()
        .stdout(predicate::str::contains("1. deps"));
}

// ── Plan Command ──

#[test]
fn plan_fails_without_lockfile() {
    let tmp = TempDir::new().unwrap();
    web_project(tmp.path());
    std::fs::remove_file(tmp.path().join("package-lock.json")).unwrap();

    stagecraft()
        .current_dir(tmp.path())
        .arg("plan")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no lockfile found"));
}

#[test]
fn plan_lists_stages_in_order() {
    let tmp = TempDir::new().unwrap();
    web_project(tmp.path());

    stagecraft()
        .current_dir(tmp.path())
        .arg("plan")
        .assert()
        .success()
        .stdout(predicate::str::contains("1. deps"))
        .stdout(predicate::str::contains("run      npm ci"))
        .stdout(predicate::str::contains("2. builder"))
        .stdout(predicate::str::contains("3. runner"))
        .stdout(predicate::str::contains("user     nextjs"));
}

#[test]
fn plan_json_is_valid() {
    let tmp = TempDir::new().unwrap();
    web_project(tmp.path());

    let output = stagecraft()
        .current_dir(tmp.path())
        .args(["plan", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let pipeline: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let stages = pipeline["stages"].as_array().unwrap();
    assert_eq!(stages.len(), 3);
    assert_eq!(stages[2]["name"], "runner");
    assert_eq!(stages[2]["entrypoint"][0], "node");
}

#[test]
fn invalid_config_is_reported() {
    let tmp = TempDir::new().unwrap();
    web_project(tmp.path());
    std::fs::write(tmp.path().join("stagecraft.toml"), "[runtime]\nuid = 0\n").unwrap();

    stagecraft()
        .current_dir(tmp.path())
        .arg("plan")
        .assert()
        .failure()
        .stderr(predicate::str::contains("runtime.uid"));
}

// ── Dockerfile / Eject Commands ──

#[test]
fn dockerfile_prints_multi_stage_build() {
    let tmp = TempDir::new().unwrap();
    web_project(tmp.path());

    stagecraft()
        .current_dir(tmp.path())
        .arg("dockerfile")
        .assert()
        .success()
        .stdout(predicate::str::contains("FROM node:20-alpine AS deps"))
        .stdout(predicate::str::contains("USER nextjs"))
        .stdout(predicate::str::contains("EXPOSE").not());
}

#[test]
fn eject_creates_dockerfile_in_stagecraft_dir() {
    let tmp = TempDir::new().unwrap();
    web_project(tmp.path());

    stagecraft()
        .current_dir(tmp.path())
        .arg("eject")
        .assert()
        .success();

    let dockerfile = std::fs::read_to_string(tmp.path().join(".stagecraft/Dockerfile")).unwrap();
    assert!(dockerfile.contains("RUN npm ci"));

    stagecraft()
        .current_dir(tmp.path())
        .arg("dockerfile")
        .assert()
        .success()
        .stderr(predicate::str::contains("Using ejected"));
}

#[test]
fn eject_fails_on_second_run() {
    let tmp = TempDir::new().unwrap();
    web_project(tmp.path());

    stagecraft().current_dir(tmp.path()).arg("eject").assert().success();
    stagecraft()
        .current_dir(tmp.path())
        .arg("eject")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already ejected"));
}

// ── Clean Command ──

#[test]
fn clean_removes_build_state_but_keeps_ejected_dockerfile() {
    let tmp = TempDir::new().unwrap();
    web_project(tmp.path());
    std::fs::create_dir_all(tmp.path().join(".stagecraft/cache/abc")).unwrap();
    std::fs::create_dir_all(tmp.path().join(".stagecraft/work/deps")).unwrap();
    stagecraft().current_dir(tmp.path()).arg("eject").assert().success();

    stagecraft()
        .current_dir(tmp.path())
        .arg("clean")
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed .stagecraft/cache"));

    assert!(!tmp.path().join(".stagecraft/cache").exists());
    assert!(!tmp.path().join(".stagecraft/work").exists());
    assert!(tmp.path().join(".stagecraft/Dockerfile").exists());
}

#[test]
fn clean_with_nothing_to_remove() {
    let tmp = TempDir::new().unwrap();

    stagecraft()
        .current_dir(tmp.path())
        .arg("clean")
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing to clean"));
}
