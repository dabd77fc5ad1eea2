mod common;

use assert_cmd::Command;
use common::*;
use predicates::prelude::*;

#[test]
fn outputs_json_report() {
    let image = create_test_image();
    let mut cmd = Command::cargo_bin("morphometer").unwrap();
    cmd.arg(image.path()).args(["--samples", "10"]);
    let output = cmd.assert().success().get_output().stdout.clone();

    let report: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(report["summary"]["completed"], 1);
    assert_eq!(report["results"][0]["status"], "completed");
    assert!(report["results"][0]["outcome"]["measurements"].is_array());
}

#[test]
fn calibrated_run_with_category() {
    let image = create_test_image();
    let mut cmd = Command::cargo_bin("morphometer").unwrap();
    cmd.arg(image.path())
        .args(["--reference-length", "60", "--category", "boer", "--detectors", "primary,secondary-feature"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("\"calibrated\": true"))
        .stdout(predicate::str::contains("wither_height"));
}

#[test]
fn writes_annotated_images() {
    let image = create_test_image();
    let out = tempfile::TempDir::new().unwrap();
    let mut cmd = Command::cargo_bin("morphometer").unwrap();
    cmd.arg(image.path()).arg("--annotate-dir").arg(out.path());
    cmd.assert().success();

    let written: Vec<_> = std::fs::read_dir(out.path()).unwrap().collect();
    assert_eq!(written.len(), 1);
}

#[test]
fn rejects_non_positive_reference_length() {
    let image = create_test_image();
    let mut cmd = Command::cargo_bin("morphometer").unwrap();
    cmd.arg(image.path()).args(["--reference-length=-5"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("reference length must be a positive number"));
}

#[test]
fn missing_file_fails() {
    let mut cmd = Command::cargo_bin("morphometer").unwrap();
    cmd.arg("/nonexistent/goat.jpg");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read"));
}

#[test]
fn requires_an_image() {
    let mut cmd = Command::cargo_bin("morphometer").unwrap();
    cmd.assert().failure();
}
