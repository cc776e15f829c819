use std::borrow::Cow;
use std::ffi::OsString;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use fs2::available_space;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::task;
use tracing::info;

use crate::graph::Graph;
use crate::model::EntityKind;
use crate::{AppError, AppResult};

pub mod snapshot;
pub mod tabular;

pub use snapshot::{app_version, read_snapshot, Snapshot, BACKUP_CORRUPT};
pub use tabular::write_tabular;

pub const BACKUP_IO: &str = "BACKUP/IO";
pub const BACKUP_LOW_DISK: &str = "BACKUP/LOW_DISK";
pub const BACKUP_NAME_COLLISION: &str = "BACKUP/NAME_COLLISION";

const PARTIAL_SUFFIX: &str = ".partial";
const FILE_PREFIX: &str = "hearthledger";
const SPACE_HEADROOM_BYTES: u64 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    /// Full-fidelity JSON snapshot; the only format restore accepts.
    Structured,
    /// One CSV row per item. Export only.
    Tabular,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Structured => "json",
            ExportFormat::Tabular => "csv",
        }
    }

    fn file_label(&self) -> &'static str {
        match self {
            ExportFormat::Structured => "backup",
            ExportFormat::Tabular => "items",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExportPayload {
    pub format: ExportFormat,
    pub bytes: Vec<u8>,
    pub entity_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportEntry {
    pub path: PathBuf,
    pub format: ExportFormat,
    pub entity_count: usize,
    pub size_bytes: u64,
    pub sha256: String,
}

/// Serialize a graph. Read-only: the graph is never touched.
pub fn export(graph: &Graph, format: ExportFormat, schema_version: u32) -> AppResult<ExportPayload> {
    match format {
        ExportFormat::Structured => {
            let snapshot = Snapshot::from_graph(graph, schema_version);
            Ok(ExportPayload {
                format,
                entity_count: snapshot.entity_count(),
                bytes: snapshot.to_json()?,
            })
        }
        ExportFormat::Tabular => Ok(ExportPayload {
            format,
            entity_count: graph.count(EntityKind::Item),
            bytes: write_tabular(graph)?,
        }),
    }
}

/// Write an export under `out_dir` as
/// `hearthledger-<label>-YYYYMMDD-HHMMSS[-NN].<ext>`. The file appears under
/// its final name only once fully written.
pub async fn write_export(
    graph: Arc<Graph>,
    format: ExportFormat,
    schema_version: u32,
    out_dir: &Path,
) -> AppResult<ExportEntry> {
    let out_dir = out_dir.to_path_buf();
    let entry = task::spawn_blocking(move || {
        let payload = export(&graph, format, schema_version)?;
        write_payload(&payload, &out_dir, &Utc::now())
    })
    .await??;
    info!(
        target: "hearthledger",
        event = "export_written",
        format = entry.format.extension(),
        entities = entry.entity_count,
        bytes = entry.size_bytes,
        path = %entry.path.display()
    );
    Ok(entry)
}

fn write_payload(
    payload: &ExportPayload,
    out_dir: &Path,
    timestamp: &DateTime<Utc>,
) -> AppResult<ExportEntry> {
    fs::create_dir_all(out_dir).map_err(|err| io_error(err, "create_out_dir", out_dir))?;

    let required = payload.bytes.len() as u64 + SPACE_HEADROOM_BYTES;
    let avail = free_disk_space(out_dir).map_err(|err| io_error(err, "available_space", out_dir))?;
    if avail < required {
        return Err(AppError::new(
            BACKUP_LOW_DISK,
            format!("Not enough disk space (need ~{}).", format_bytes(required)),
        )
        .with_context("available_bytes", avail.to_string())
        .with_context("required_bytes", required.to_string()));
    }

    let path = unique_export_path(out_dir, payload.format, timestamp)?;
    write_atomic(&path, &payload.bytes).map_err(|err| io_error(err, "write_export", &path))?;
    let sha256 = file_sha256(&path).map_err(|err| io_error(err, "hash_export", &path))?;

    Ok(ExportEntry {
        path,
        format: payload.format,
        entity_count: payload.entity_count,
        size_bytes: payload.bytes.len() as u64,
        sha256,
    })
}

fn io_error(err: std::io::Error, operation: &str, path: &Path) -> AppError {
    AppError::new(BACKUP_IO, err.to_string())
        .with_context("operation", operation.to_string())
        .with_context("path", path.display().to_string())
}

fn tmp_path(final_path: &Path) -> PathBuf {
    let mut s = OsString::from(final_path.as_os_str());
    s.push(PARTIAL_SUFFIX);
    PathBuf::from(s)
}

/// Write to `<path>.partial`, sync, then rename over `path`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = tmp_path(path);
    let result = (|| {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, path)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn free_disk_space(path: &Path) -> std::io::Result<u64> {
    let target: Cow<'_, Path> = if path.exists() {
        Cow::Borrowed(path)
    } else if let Some(parent) = path.parent() {
        Cow::Owned(parent.to_path_buf())
    } else {
        Cow::Owned(std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/")))
    };
    available_space(target.as_ref())
}

fn unique_export_path(
    root: &Path,
    format: ExportFormat,
    timestamp: &DateTime<Utc>,
) -> AppResult<PathBuf> {
    let base = format!(
        "{FILE_PREFIX}-{}-{}",
        format.file_label(),
        timestamp.format("%Y%m%d-%H%M%S")
    );
    let ext = format.extension();
    for suffix in 0..100 {
        let candidate = if suffix == 0 {
            root.join(format!("{base}.{ext}"))
        } else {
            root.join(format!("{base}-{suffix:02}.{ext}"))
        };
        if !candidate.exists() && !tmp_path(&candidate).exists() {
            return Ok(candidate);
        }
    }
    Err(AppError::new(
        BACKUP_NAME_COLLISION,
        "Unable to allocate export file name",
    ))
}

fn format_bytes(bytes: u64) -> String {
    if bytes == 0 {
        return "0 MB".to_string();
    }
    let mb = (bytes as f64) / 1_000_000.0;
    if mb < 1.0 {
        "1 MB".to_string()
    } else {
        format!("{:.0} MB", mb.ceil())
    }
}

pub fn file_sha256(path: &Path) -> std::io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0_u8; 8192];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
