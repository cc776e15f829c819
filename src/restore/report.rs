use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;

use super::RestoreSummary;
use crate::{AppError, AppResult};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RestoreReportFile<'a> {
    generated_at: String,
    source_path: Option<String>,
    summary: &'a RestoreSummary,
}

/// Persist a restore summary as `restore-YYYYMMDD-HHMMSS[-NN].json`.
pub fn write_restore_report(
    reports_dir: &Path,
    source: Option<&Path>,
    summary: &RestoreSummary,
) -> AppResult<PathBuf> {
    fs::create_dir_all(reports_dir).map_err(|err| {
        AppError::from(err)
            .with_context("operation", "create_reports_dir")
            .with_context("path", reports_dir.display().to_string())
    })?;

    let now = Utc::now();
    let stem = now.format("restore-%Y%m%d-%H%M%S").to_string();
    let mut path = reports_dir.join(format!("{stem}.json"));
    let mut suffix = 1;
    while path.exists() {
        path = reports_dir.join(format!("{stem}-{suffix:02}.json"));
        suffix += 1;
    }

    let payload = RestoreReportFile {
        generated_at: now.to_rfc3339(),
        source_path: source.map(|p| p.display().to_string()),
        summary,
    };
    let json = serde_json::to_string_pretty(&payload)?;
    fs::write(&path, json).map_err(|err| {
        AppError::from(err)
            .with_context("operation", "write_restore_report")
            .with_context("path", path.display().to_string())
    })?;
    Ok(path)
}
