//! End-to-end tests for the dagflow binary.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::PathBuf;
use tempfile::TempDir;

fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).expect("write fixture");
    path
}

fn gated_doc() -> &'static str {
    r#"{
        "name": "demo",
        "parameters": [
            {"name": "data_uri", "type": "string", "default": "warehouse://raw"}
        ],
        "steps": [
            {
                "name": "export",
                "handler_ref": "h.export",
                "inputs": [
                    {"name": "source", "type": {"param": "string"}, "source": {"pipeline_param": "data_uri"}}
                ]
            },
            {
                "name": "evaluate",
                "handler_ref": "h.evaluate",
                "outputs": [{"name": "metric", "type": {"param": "float"}}]
            },
            {"name": "deploy", "handler_ref": "h.deploy"}
        ],
        "ordering_edges": [
            {"from": "export", "to": "evaluate"},
            {"from": "evaluate", "to": "deploy"}
        ],
        "conditional_groups": [
            {
                "name": "gate",
                "gate_step": "evaluate",
                "gate_output": "metric",
                "comparator": "<",
                "threshold": 0.8,
                "member_steps": ["deploy"]
            }
        ]
    }"#
}

#[test]
fn compile_emits_normalized_spec() {
    let dir = TempDir::new().unwrap();
    let pipeline = write(&dir, "pipeline.json", gated_doc());
    let out = dir.path().join("spec.json");

    Command::cargo_bin("dagflow")
        .unwrap()
        .args(["compile", "--pipeline"])
        .arg(&pipeline)
        .arg("--out")
        .arg(&out)
        .assert()
        .success();

    let spec = std::fs::read_to_string(&out).unwrap();
    assert!(spec.contains("\"ordering_edges\""));
    assert!(spec.contains("\"gate_step\": \"evaluate\""));
}

#[test]
fn compile_rejects_wrong_pipeline_name() {
    let dir = TempDir::new().unwrap();
    let pipeline = write(&dir, "pipeline.json", gated_doc());

    Command::cargo_bin("dagflow")
        .unwrap()
        .args(["compile", "--pipeline"])
        .arg(&pipeline)
        .args(["--pipeline-name", "other", "--out", "-"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn compile_reports_cycle() {
    let dir = TempDir::new().unwrap();
    let pipeline = write(
        &dir,
        "cyclic.json",
        r#"{
            "name": "cyclic",
            "steps": [
                {"name": "a", "handler_ref": "h.a"},
                {"name": "b", "handler_ref": "h.b"}
            ],
            "ordering_edges": [
                {"from": "a", "to": "b"},
                {"from": "b", "to": "a"}
            ]
        }"#,
    );

    Command::cargo_bin("dagflow")
        .unwrap()
        .args(["compile", "--pipeline"])
        .arg(&pipeline)
        .args(["--out", "-"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cycle detected"));
}

#[test]
fn run_skips_gated_branch_and_exits_zero() {
    let dir = TempDir::new().unwrap();
    let spec = write(&dir, "spec.json", gated_doc());
    let handlers = write(
        &dir,
        "handlers.json",
        r#"{"evaluate": {"outputs": {"metric": 0.9}}}"#,
    );

    Command::cargo_bin("dagflow")
        .unwrap()
        .args(["run", "--spec"])
        .arg(&spec)
        .arg("--handlers")
        .arg(&handlers)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"skipped\""));
}

#[test]
fn run_executes_gated_branch_when_condition_holds() {
    let dir = TempDir::new().unwrap();
    let spec = write(&dir, "spec.json", gated_doc());
    let handlers = write(
        &dir,
        "handlers.json",
        r#"{"evaluate": {"outputs": {"metric": 0.5}}}"#,
    );

    Command::cargo_bin("dagflow")
        .unwrap()
        .args(["run", "--spec"])
        .arg(&spec)
        .arg("--handlers")
        .arg(&handlers)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"outcome\": \"succeeded\""));
}

#[test]
fn run_exits_nonzero_on_step_failure() {
    let dir = TempDir::new().unwrap();
    let spec = write(&dir, "spec.json", gated_doc());
    let handlers = write(
        &dir,
        "handlers.json",
        r#"{"evaluate": {"error": "bad split"}}"#,
    );

    Command::cargo_bin("dagflow")
        .unwrap()
        .args(["run", "--spec"])
        .arg(&spec)
        .arg("--handlers")
        .arg(&handlers)
        .assert()
        .failure()
        .stdout(predicate::str::contains("bad split"));
}

#[test]
fn run_accepts_parameter_overrides() {
    let dir = TempDir::new().unwrap();
    let spec = write(&dir, "spec.json", gated_doc());
    let handlers = write(
        &dir,
        "handlers.json",
        r#"{"evaluate": {"outputs": {"metric": 0.9}}}"#,
    );
    let report = dir.path().join("report.json");

    Command::cargo_bin("dagflow")
        .unwrap()
        .args(["run", "--spec"])
        .arg(&spec)
        .arg("--handlers")
        .arg(&handlers)
        .args(["--param", "data_uri=warehouse://2026-08", "--max-concurrency", "2"])
        .arg("--report")
        .arg(&report)
        .assert()
        .success();

    let rendered = std::fs::read_to_string(&report).unwrap();
    assert!(rendered.contains("\"outcome\": \"succeeded\""));
}

#[test]
fn run_rejects_unknown_parameter() {
    let dir = TempDir::new().unwrap();
    let spec = write(&dir, "spec.json", gated_doc());

    Command::cargo_bin("dagflow")
        .unwrap()
        .args(["run", "--spec"])
        .arg(&spec)
        .args(["--param", "ghost=1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown parameter"));
}

#[test]
fn missing_input_file_is_reported() {
    Command::cargo_bin("dagflow")
        .unwrap()
        .args(["compile", "--pipeline", "/nonexistent.json", "--out", "-"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read"));
}
