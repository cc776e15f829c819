use std::path::{Path, PathBuf};

use anyhow::Result;
use assert_cmd::Command;
use serde_json::Value;
use tempfile::tempdir;

fn cli(data_dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("hearthledger").expect("binary built");
    cmd.env("HEARTHLEDGER_DATA_DIR", data_dir)
        .env("HEARTHLEDGER_LOG", "hearthledger=warn");
    cmd
}

fn json_stdout(cmd: &mut Command) -> Result<Value> {
    let output = cmd.output()?;
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    Ok(serde_json::from_slice(&output.stdout)?)
}

#[test]
fn status_on_fresh_ledger_reports_current_schema() -> Result<()> {
    let dir = tempdir()?;
    let status = json_stdout(cli(dir.path()).args(["status", "--json"]))?;
    assert_eq!(status["schemaVersion"], 4);
    assert_eq!(status["counts"]["items"], 0);
    assert!(status["lastModified"].is_null());
    assert!(dir.path().join("hearthledger.sqlite3").exists());
    Ok(())
}

#[test]
fn export_then_replace_restore_round_trips() -> Result<()> {
    let dir = tempdir()?;
    let out = dir.path().join("exports");
    let entry = json_stdout(cli(dir.path()).args([
        "export",
        "--format",
        "structured",
        "--out",
        out.to_str().unwrap(),
    ]))?;
    let path = PathBuf::from(entry["path"].as_str().unwrap());
    assert!(path.starts_with(&out));
    assert_eq!(path.extension().and_then(|e| e.to_str()), Some("json"));

    let summary = json_stdout(cli(dir.path()).args([
        "restore",
        path.to_str().unwrap(),
        "--strategy",
        "replace",
        "--json",
    ]))?;
    assert_eq!(summary["strategy"], "replace");
    assert_eq!(summary["status"], "completed");
    assert!(std::fs::read_dir(dir.path().join("reports"))?.next().is_some());
    Ok(())
}

#[test]
fn restore_requires_a_strategy() -> Result<()> {
    let dir = tempdir()?;
    cli(dir.path())
        .args(["restore", "backup.json"])
        .assert()
        .failure();
    Ok(())
}

#[test]
fn restoring_a_corrupt_file_exits_nonzero() -> Result<()> {
    let dir = tempdir()?;
    let bad = dir.path().join("bad.json");
    std::fs::write(&bad, b"{\"schemaVersion\": ")?;
    let assert = cli(dir.path())
        .args(["restore", bad.to_str().unwrap(), "--strategy", "merge"])
        .assert()
        .failure();
    let stderr = String::from_utf8_lossy(&assert.get_output().stderr).to_string();
    assert!(stderr.contains("BACKUP/CORRUPT"), "stderr: {stderr}");
    Ok(())
}

#[test]
fn tabular_export_writes_csv_header() -> Result<()> {
    let dir = tempdir()?;
    let entry = json_stdout(cli(dir.path()).args(["export", "--format", "tabular"]))?;
    let path = PathBuf::from(entry["path"].as_str().unwrap());
    assert!(path.starts_with(dir.path().join("backups")));
    let text = std::fs::read_to_string(path)?;
    assert!(text.starts_with("Name,Brand,Model,Serial Number"));
    Ok(())
}

#[test]
fn file_log_is_flushed_before_exit() -> Result<()> {
    let dir = tempdir()?;
    cli(dir.path())
        .env("HEARTHLEDGER_LOG", "hearthledger=info")
        .args(["status"])
        .assert()
        .success();

    let logs: Vec<PathBuf> = std::fs::read_dir(dir.path().join("logs"))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<_>>()?;
    assert!(!logs.is_empty());
    let text = logs
        .iter()
        .map(std::fs::read_to_string)
        .collect::<std::io::Result<Vec<_>>>()?
        .concat();
    assert!(text.contains("store_open"), "log: {text}");
    Ok(())
}
