//! Restore a structured snapshot into a live store.
//!
//! The caller always picks the strategy. Every snapshot is upgraded to the
//! current schema in memory before anything touches the store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task;
use tracing::info;

use crate::config::LedgerConfig;
use crate::export::{read_snapshot, Snapshot, BACKUP_IO};
use crate::migrate::MigrationRegistry;
use crate::model::{EntityKind, EntityRef};
use crate::store::Store;
use crate::{AppError, AppResult};

pub mod access;
mod merge;
mod replace;
pub mod report;

pub use access::{AccessGuard, FileAccess, LocalFileAccess, BACKUP_ACCESS_DENIED};
pub use report::write_restore_report;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestoreStrategy {
    /// Match snapshot entities to live ones by natural key and combine them.
    Merge,
    /// Discard the live graph and install the snapshot in one transaction.
    Replace,
}

impl RestoreStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestoreStrategy::Merge => "merge",
            RestoreStrategy::Replace => "replace",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreStatus {
    Completed,
    /// Stopped after at least one commit; counts reflect what was committed.
    Cancelled,
    /// Nothing was committed.
    NotStarted,
}

/// Cooperative cancellation, checked before every commit.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KindSummary {
    pub created: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub skipped: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedEntity {
    /// Identity in the snapshot, not in the live store.
    pub entity: EntityRef,
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreIssue {
    pub entity: EntityRef,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreSummary {
    pub strategy: RestoreStrategy,
    pub status: RestoreStatus,
    pub dry_run: bool,
    pub created: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub per_kind: BTreeMap<EntityKind, KindSummary>,
    pub skipped: Vec<SkippedEntity>,
    pub errors: Vec<RestoreIssue>,
    pub warnings: Vec<String>,
    /// Transactions committed. A dry run counts the ones it would have made.
    pub committed: u64,
    pub migrated_from: Option<u32>,
    pub safety_backup: Option<PathBuf>,
}

impl RestoreSummary {
    fn new(strategy: RestoreStrategy, dry_run: bool) -> Self {
        Self {
            strategy,
            status: RestoreStatus::NotStarted,
            dry_run,
            created: 0,
            updated: 0,
            unchanged: 0,
            per_kind: BTreeMap::new(),
            skipped: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            committed: 0,
            migrated_from: None,
            safety_backup: None,
        }
    }

    fn kind(&mut self, kind: EntityKind) -> &mut KindSummary {
        self.per_kind.entry(kind).or_default()
    }

    pub(crate) fn record_created(&mut self, kind: EntityKind) {
        self.created += 1;
        self.kind(kind).created += 1;
    }

    pub(crate) fn record_updated(&mut self, kind: EntityKind) {
        self.updated += 1;
        self.kind(kind).updated += 1;
    }

    pub(crate) fn record_unchanged(&mut self, kind: EntityKind) {
        self.unchanged += 1;
        self.kind(kind).unchanged += 1;
    }

    pub(crate) fn record_skipped(&mut self, entity: EntityRef, name: &str, reason: impl Into<String>) {
        self.kind(entity.kind).skipped += 1;
        self.skipped.push(SkippedEntity {
            entity,
            name: name.to_string(),
            reason: reason.into(),
        });
    }

    pub(crate) fn record_error(&mut self, entity: EntityRef, error: &AppError) {
        self.kind(entity.kind).errors += 1;
        self.errors.push(RestoreIssue {
            entity,
            code: error.code().to_string(),
            message: error.message().to_string(),
        });
    }

    /// Mark the run as stopped by cancellation.
    pub(crate) fn stop(&mut self) {
        self.status = if self.committed == 0 {
            RestoreStatus::NotStarted
        } else {
            RestoreStatus::Cancelled
        };
    }
}

pub struct RestoreContext<'a> {
    pub store: &'a Store,
    pub registry: &'a MigrationRegistry,
    pub cancel: CancelFlag,
    /// Compute the summary against a private copy; commit nothing.
    pub dry_run: bool,
    /// Where to write a structured backup of the live store before a
    /// replace. `None` skips the safety backup.
    pub safety_backup_dir: Option<PathBuf>,
}

impl<'a> RestoreContext<'a> {
    pub fn new(store: &'a Store, registry: &'a MigrationRegistry) -> Self {
        Self {
            store,
            registry,
            cancel: CancelFlag::new(),
            dry_run: false,
            safety_backup_dir: None,
        }
    }

    pub fn with_config(mut self, config: &LedgerConfig) -> Self {
        self.safety_backup_dir = config
            .backup_before_replace
            .then(|| config.backups_dir());
        self
    }
}

/// Apply `snapshot` to the live store under `strategy`.
///
/// Errors are whole-operation failures (unreadable or unmigratable
/// snapshot, storage failure). Per-entity problems land in the summary.
pub async fn restore(
    ctx: &RestoreContext<'_>,
    snapshot: &Snapshot,
    strategy: RestoreStrategy,
) -> AppResult<RestoreSummary> {
    let mut summary = RestoreSummary::new(strategy, ctx.dry_run);
    let source = snapshot.to_graph()?;
    ctx.registry.check_kinds(&source, snapshot.schema_version)?;
    let upgrade = ctx.registry.upgrade(&source, snapshot.schema_version)?;
    if upgrade.migrated() {
        summary.migrated_from = Some(snapshot.schema_version);
        summary.warnings.push(format!(
            "Snapshot was upgraded from schema version {} to {}",
            upgrade.from, upgrade.to
        ));
    }

    info!(
        target: "hearthledger",
        event = "restore_start",
        strategy = strategy.as_str(),
        dry_run = ctx.dry_run,
        entities = upgrade.graph.len(),
        schema_version = snapshot.schema_version
    );

    if ctx.cancel.is_cancelled() {
        summary.stop();
    } else {
        match strategy {
            RestoreStrategy::Merge => merge::run(ctx, &upgrade.graph, &mut summary).await?,
            RestoreStrategy::Replace => replace::run(ctx, &upgrade.graph, &mut summary).await?,
        }
    }

    info!(
        target: "hearthledger",
        event = "restore_finished",
        strategy = strategy.as_str(),
        status = ?summary.status,
        created = summary.created,
        updated = summary.updated,
        unchanged = summary.unchanged,
        skipped = summary.skipped.len(),
        errors = summary.errors.len(),
        committed = summary.committed
    );
    Ok(summary)
}

/// Read a user-selected backup file under scoped access and restore it.
/// The file is parsed in full before any commit; the access grant is
/// released as soon as the bytes are in memory.
pub async fn restore_from_file(
    ctx: &RestoreContext<'_>,
    access: &dyn FileAccess,
    path: &Path,
    strategy: RestoreStrategy,
) -> AppResult<RestoreSummary> {
    let snapshot = {
        let _grant = access.acquire(path)?;
        let bytes = tokio::fs::read(path).await.map_err(|err| {
            AppError::new(BACKUP_IO, err.to_string())
                .with_context("operation", "read_backup")
                .with_context("path", path.display().to_string())
                .with_cause(err)
        })?;
        task::spawn_blocking(move || read_snapshot(&bytes)).await??
    };
    restore(ctx, &snapshot, strategy).await
}
