// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 gateflow contributors

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

const PIPELINE: &str = r#"
name: retail
settings:
  default_retry:
    max_attempts: 2
    backoff_base_ms: 1
    backoff_max_ms: 5
collaborators:
  transfer: "echo copying {source} to {destination}"
  load: "echo '{\"rows_affected\": 3}'"
  quality: "cat {rule_set}"
  transform: "echo building {model}"
  report: "echo refreshing {target}"
tasks:
  - id: T1
    kind: { type: transfer, source: data/retail.csv, destination: landing/retail.csv }
  - id: T2
    kind: { type: load, source: landing/retail.csv, table: raw_invoices }
    depends_on: [T1]
  - id: G1
    kind: { type: quality_gate, scope: raw, rule_set: raw.jsonl }
    depends_on: [T2]
  - id: T3
    kind: { type: transform, model: models/invoices }
    depends_on: [G1]
  - id: G2
    kind: { type: quality_gate, scope: transformed, rule_set: transformed.jsonl }
    depends_on: [T3]
  - id: T4
    kind: { type: report, target: dashboard }
    depends_on: [G2]
"#;

const PASS: &str = r#"{"check_name": "row_count", "result": "pass", "message": "1000 rows"}"#;
const WARN: &str = r#"{"check_name": "freshness", "result": "warn", "message": "26h old"}"#;
const FAIL: &str = r#"{"check_name": "no_null_customer", "result": "fail", "message": "12 nulls"}"#;

fn project(raw: &[&str], transformed: &[&str]) -> TempDir {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("gateflow.yaml"), PIPELINE).unwrap();
    fs::write(temp.path().join("raw.jsonl"), raw.join("\n")).unwrap();
    fs::write(temp.path().join("transformed.jsonl"), transformed.join("\n")).unwrap();
    temp
}

fn gateflow(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("gateflow").unwrap();
    cmd.arg("-C")
        .arg(dir.path())
        .env("NO_COLOR", "1")
        .env("CLICOLOR", "0")
        .env_remove("GATEFLOW_PIPELINE")
        .env_remove("GATEFLOW_LEDGER_DIR")
        .env_remove("GATEFLOW_CONCURRENCY")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn validate_accepts_pipeline() {
    let dir = project(&[PASS], &[PASS]);

    gateflow(&dir)
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Pipeline is valid"));
}

#[test]
fn validate_fails_without_pipeline() {
    let dir = TempDir::new().unwrap();

    gateflow(&dir)
        .arg("validate")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Pipeline file not found"));
}

#[test]
fn graph_renders_layers() {
    let dir = project(&[PASS], &[PASS]);

    gateflow(&dir)
        .arg("graph")
        .assert()
        .success()
        .stdout(predicate::str::contains("Layer 1:\n  - T1 (transfer)"))
        .stdout(predicate::str::contains("G1 (quality[raw]) [depends: T2]"));

    gateflow(&dir)
        .args(["graph", "--format", "mermaid"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("graph TD"))
        .stdout(predicate::str::contains("G2 --> T4"));
}

#[test]
fn blocking_gate_failure_exits_one_and_skips_downstream() {
    let dir = project(&[PASS, FAIL], &[PASS]);

    gateflow(&dir)
        .args(["start-run", "2024-01-01"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("First failure: G1"))
        .stdout(predicate::str::contains("upstream 'G1' failed"));

    gateflow(&dir)
        .args(["status", "2024-01-01"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("3 skipped because of upstream failures: T3, G2, T4"));

    gateflow(&dir)
        .args(["status", "2024-01-01", "--format", "json"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains(r#""status": "failed""#))
        .stdout(predicate::str::contains(r#""first_failure": "G1""#));
}

#[test]
fn gate_warning_exits_two() {
    let dir = project(&[PASS], &[PASS, WARN]);

    gateflow(&dir)
        .args(["start-run", "2024-01-02"])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("finished as warn"));

    gateflow(&dir)
        .args(["ledger", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2024-01-02"))
        .stdout(predicate::str::contains("6/6 succeeded"));
}

#[test]
fn clean_run_succeeds_and_cannot_be_started_twice() {
    let dir = project(&[PASS], &[PASS]);

    gateflow(&dir)
        .args(["start-run", "nightly"])
        .assert()
        .success()
        .stdout(predicate::str::contains("finished as succeeded"));

    gateflow(&dir)
        .args(["start-run", "nightly"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("already exists"));

    // Finished runs have nothing to cancel
    gateflow(&dir)
        .args(["cancel-run", "nightly"])
        .assert()
        .success()
        .stdout(predicate::str::contains("nothing to cancel"));
}

#[test]
fn retry_failed_reruns_after_fix() {
    let dir = project(&[FAIL], &[PASS]);

    gateflow(&dir)
        .args(["start-run", "r1"])
        .assert()
        .code(1);

    fs::write(dir.path().join("raw.jsonl"), PASS).unwrap();

    gateflow(&dir)
        .args(["resume-run", "r1"])
        .assert()
        .code(1);

    gateflow(&dir)
        .args(["resume-run", "r1", "--retry-failed"])
        .assert()
        .success()
        .stdout(predicate::str::contains("finished as succeeded"));
}

#[test]
fn unknown_runs_are_reported() {
    let dir = project(&[PASS], &[PASS]);

    gateflow(&dir)
        .args(["cancel-run", "missing"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("not found"));

    gateflow(&dir)
        .args(["status", "missing"])
        .assert()
        .code(1);
}

#[test]
fn prune_keeps_recent_runs() {
    let dir = project(&[PASS], &[PASS]);

    gateflow(&dir)
        .args(["start-run", "r1"])
        .assert()
        .success();

    gateflow(&dir)
        .args(["ledger", "prune"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No finished runs older than 30 days"));
}

#[test]
fn status_of_unfinished_run_is_not_success() {
    let dir = project(&[PASS], &[PASS]);

    gateflow(&dir)
        .args(["start-run", "crashed"])
        .assert()
        .success();

    // Rewrite the record as a process that died while T4 was running would leave it
    let path = dir.path().join(".gateflow/runs/crashed.json");
    let mut record: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    record["status"] = "running".into();
    record["finished_at"] = serde_json::Value::Null;
    record["tasks"]["T4"]["state"] = "running".into();
    fs::write(&path, serde_json::to_string_pretty(&record).unwrap()).unwrap();

    gateflow(&dir)
        .args(["status", "crashed"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("running"));
}
