#![allow(deprecated)]

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn cloudmgr(base: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("cloudmgr").unwrap();
    cmd.env("CLOUDMGR_CONFIG_DIR", base.path())
        .env_remove("RUST_LOG");
    cmd
}

fn create(base: &TempDir, name: &str, quantity: &str) {
    cloudmgr(base)
        .args(["create", "--project", "demo", "--name", name])
        .args(["--cloud", "aws", "--region", "us-east-1", "--quantity", quantity])
        .assert()
        .success();
}

/// Help lists every command but the hidden worker
#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("cloudmgr").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("create"))
        .stdout(predicate::str::contains("deploy"))
        .stdout(predicate::str::contains("destroy"))
        .stdout(predicate::str::contains("clean"))
        .stdout(predicate::str::contains("worker").not())
        .stdout(predicate::str::is_match(r"(?m)^\s+worker\b").unwrap().not());
}

#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("cloudmgr").unwrap();
    cmd.arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("cloudmgr"));
}

#[test]
fn test_invalid_command() {
    let mut cmd = Command::cargo_bin("cloudmgr").unwrap();
    cmd.arg("invalid-command").assert().failure();
}

#[test]
fn test_create_then_list_and_show() {
    let base = tempfile::tempdir().unwrap();
    create(&base, "cbs", "3");
    create(&base, "cbs", "2");

    cloudmgr(&base)
        .args(["list", "--project", "demo"])
        .assert()
        .success()
        .stdout(predicate::str::contains("cbs"))
        .stdout(predicate::str::contains("0 node(s) deployed"));

    let output = cloudmgr(&base)
        .args(["show", "--project", "demo", "--name", "cbs"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let dump: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(dump["project"], "demo");
    assert_eq!(dump["services"][0]["groups"].as_array().unwrap().len(), 2);
    assert_eq!(dump["services"][0]["groups"][1]["spec"]["quantity"], 2);
}

#[test]
fn test_create_rejects_unknown_cloud() {
    let base = tempfile::tempdir().unwrap();
    cloudmgr(&base)
        .args(["create", "--project", "demo", "--name", "cbs"])
        .args(["--cloud", "openstack", "--region", "r1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error:"));
}

#[test]
fn test_create_requires_region() {
    let base = tempfile::tempdir().unwrap();
    cloudmgr(&base)
        .args(["create", "--project", "demo", "--name", "cbs", "--cloud", "aws"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("default_region"));
}

#[test]
fn test_deploy_unsupported_cloud_fails() {
    let base = tempfile::tempdir().unwrap();
    create(&base, "cbs", "1");
    cloudmgr(&base)
        .args(["deploy", "--project", "demo", "--name", "cbs"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not supported"));
}

#[test]
fn test_missing_project() {
    let base = tempfile::tempdir().unwrap();
    cloudmgr(&base)
        .args(["list", "--project", "nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Project not found"));
}

#[test]
fn test_remove_undeployed_service() {
    let base = tempfile::tempdir().unwrap();
    create(&base, "cbs", "1");
    cloudmgr(&base)
        .args(["remove", "--project", "demo", "--name", "cbs"])
        .assert()
        .success();
    cloudmgr(&base)
        .args(["list", "--project", "demo"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No services"));
}

/// Clean fans teardown out to worker processes of this binary
#[test]
fn test_clean_undeployed_project() {
    let base = tempfile::tempdir().unwrap();
    create(&base, "cbs", "2");
    cloudmgr(&base)
        .args(["clean", "--project", "demo"])
        .assert()
        .success();
    assert!(!base.path().join("demo").exists());
}

#[test]
fn test_worker_rejects_malformed_unit() {
    let base = tempfile::tempdir().unwrap();
    cloudmgr(&base)
        .arg("worker")
        .write_stdin("not a work unit")
        .assert()
        .failure()
        .stdout(predicate::str::contains("\"ok\":false"));
}
