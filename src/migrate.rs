//! Schema version registry and migration engine.
//!
//! Versions form a strictly ascending chain with one stage per adjacent pair.
//! Stages operate on an in-memory [`Graph`], so the same engine upgrades both
//! an on-disk store at open time and a backup snapshot during restore.

use std::fmt;

use thiserror::Error;
use tracing::{info, warn};

use crate::graph::Graph;
use crate::model::{EntityKind, Property, Room, DEFAULT_PROPERTY_NAME};
use crate::AppError;

pub const MIGRATION_UNKNOWN_VERSION: &str = "MIGRATION/UNKNOWN_VERSION";
pub const MIGRATION_NEWER_THAN_SUPPORTED: &str = "MIGRATION/NEWER_THAN_SUPPORTED";
pub const MIGRATION_MISSING_STAGE: &str = "MIGRATION/MISSING_STAGE";
pub const MIGRATION_INVALID_REGISTRY: &str = "MIGRATION/INVALID_REGISTRY";
pub const MIGRATION_HOOK_FAILED: &str = "MIGRATION/HOOK_FAILED";
pub const MIGRATION_UNEXPECTED_KIND: &str = "MIGRATION/UNEXPECTED_KIND";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MigrationError {
    #[error("schema version {0} is not registered")]
    UnknownVersion(u32),
    #[error("schema version {found} is newer than the supported version {supported}")]
    NewerThanSupported { found: u32, supported: u32 },
    #[error("no migration stage registered from version {from} to {to}")]
    MissingStage { from: u32, to: u32 },
    #[error("invalid migration registry: {0}")]
    InvalidRegistry(String),
    #[error("migration {from}->{to} failed: {reason}")]
    HookFailed { from: u32, to: u32, reason: String },
    #[error("schema version {version} has no {kind} records")]
    UnexpectedKind { version: u32, kind: EntityKind },
}

impl MigrationError {
    pub fn code(&self) -> &'static str {
        match self {
            MigrationError::UnknownVersion(_) => MIGRATION_UNKNOWN_VERSION,
            MigrationError::NewerThanSupported { .. } => MIGRATION_NEWER_THAN_SUPPORTED,
            MigrationError::MissingStage { .. } => MIGRATION_MISSING_STAGE,
            MigrationError::InvalidRegistry(_) => MIGRATION_INVALID_REGISTRY,
            MigrationError::HookFailed { .. } => MIGRATION_HOOK_FAILED,
            MigrationError::UnexpectedKind { .. } => MIGRATION_UNEXPECTED_KIND,
        }
    }
}

impl From<MigrationError> for AppError {
    fn from(error: MigrationError) -> Self {
        AppError::new(error.code(), error.to_string())
    }
}

/// One declared schema version and the entity kinds it knows about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaVersion {
    pub number: u32,
    pub label: &'static str,
    pub entities: Vec<EntityKind>,
}

impl SchemaVersion {
    pub fn new(number: u32, label: &'static str, entities: &[EntityKind]) -> Self {
        Self {
            number,
            label,
            entities: entities.to_vec(),
        }
    }

    pub fn supports(&self, kind: EntityKind) -> bool {
        self.entities.contains(&kind)
    }
}

/// A transformation hook. Hooks must be idempotent: a graph that already
/// satisfies the target shape passes through unchanged.
pub type Hook = Box<dyn Fn(&mut Graph) -> Result<(), String> + Send + Sync>;

pub enum StageKind {
    /// Additive change only; new fields take their defaults.
    Lightweight,
    Custom {
        before: Option<Hook>,
        after: Option<Hook>,
    },
}

impl fmt::Debug for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageKind::Lightweight => f.write_str("Lightweight"),
            StageKind::Custom { before, after } => f
                .debug_struct("Custom")
                .field("before", &before.is_some())
                .field("after", &after.is_some())
                .finish(),
        }
    }
}

#[derive(Debug)]
pub struct MigrationStage {
    pub from: u32,
    pub to: u32,
    pub kind: StageKind,
}

impl MigrationStage {
    pub fn lightweight(from: u32, to: u32) -> Self {
        Self {
            from,
            to,
            kind: StageKind::Lightweight,
        }
    }

    pub fn custom(from: u32, to: u32, before: Option<Hook>, after: Option<Hook>) -> Self {
        Self {
            from,
            to,
            kind: StageKind::Custom { before, after },
        }
    }

    fn kind_label(&self) -> &'static str {
        match self.kind {
            StageKind::Lightweight => "lightweight",
            StageKind::Custom { .. } => "custom",
        }
    }

    fn run(&self, graph: &mut Graph) -> Result<(), MigrationError> {
        let fail = |reason: String| MigrationError::HookFailed {
            from: self.from,
            to: self.to,
            reason,
        };
        if let StageKind::Custom { before, after } = &self.kind {
            if let Some(hook) = before {
                hook(graph).map_err(fail)?;
            }
            if let Some(hook) = after {
                hook(graph).map_err(fail)?;
            }
        }
        graph
            .ensure_integrity()
            .map_err(|e| fail(e.message().to_string()))
    }
}

/// The result of a successful upgrade. The input graph is never modified.
#[derive(Debug, Clone)]
pub struct Upgrade {
    pub graph: Graph,
    pub from: u32,
    pub to: u32,
    pub applied: Vec<(u32, u32)>,
}

impl Upgrade {
    pub fn migrated(&self) -> bool {
        !self.applied.is_empty()
    }
}

#[derive(Debug)]
pub struct MigrationRegistry {
    versions: Vec<SchemaVersion>,
    stages: Vec<MigrationStage>,
}

pub const V1_INITIAL: u32 = 1;
pub const V2_PROPERTIES: u32 = 2;
pub const V3_CONTAINERS_TAGS: u32 = 3;
pub const V4_MARKET_VALUE: u32 = 4;
pub const CURRENT_SCHEMA_VERSION: u32 = V4_MARKET_VALUE;

impl MigrationRegistry {
    /// Check the declared chain: versions strictly ascending, every stage
    /// joining two adjacent versions, at most one stage per pair. Missing
    /// stages are reported by [`MigrationRegistry::path`].
    pub fn new(
        versions: Vec<SchemaVersion>,
        mut stages: Vec<MigrationStage>,
    ) -> Result<Self, MigrationError> {
        if versions.is_empty() {
            return Err(MigrationError::InvalidRegistry(
                "at least one schema version is required".into(),
            ));
        }
        for pair in versions.windows(2) {
            if pair[0].number >= pair[1].number {
                return Err(MigrationError::InvalidRegistry(format!(
                    "version {} is not above {}",
                    pair[1].number, pair[0].number
                )));
            }
        }
        stages.sort_by_key(|s| s.from);
        for stage in &stages {
            let adjacent = versions
                .windows(2)
                .any(|pair| pair[0].number == stage.from && pair[1].number == stage.to);
            if !adjacent {
                return Err(MigrationError::InvalidRegistry(format!(
                    "stage {}->{} does not join adjacent versions",
                    stage.from, stage.to
                )));
            }
        }
        for pair in stages.windows(2) {
            if pair[0].from == pair[1].from {
                return Err(MigrationError::InvalidRegistry(format!(
                    "duplicate stage {}->{}",
                    pair[0].from, pair[0].to
                )));
            }
        }
        Ok(Self { versions, stages })
    }

    /// The ledger's own version chain, V1 through V4.
    pub fn standard() -> Self {
        use EntityKind as K;
        let v1 = [K::Item, K::Room, K::Category, K::Photo, K::Receipt];
        let v2 = [K::Item, K::Room, K::Category, K::Photo, K::Receipt, K::Property];
        let v3 = [
            K::Item,
            K::Room,
            K::Category,
            K::Photo,
            K::Receipt,
            K::Property,
            K::Container,
            K::Tag,
        ];
        Self {
            versions: vec![
                SchemaVersion::new(V1_INITIAL, "initial", &v1),
                SchemaVersion::new(V2_PROPERTIES, "properties", &v2),
                SchemaVersion::new(V3_CONTAINERS_TAGS, "containers and tags", &v3),
                SchemaVersion::new(V4_MARKET_VALUE, "market value", &v3),
            ],
            stages: vec![
                MigrationStage::custom(
                    V1_INITIAL,
                    V2_PROPERTIES,
                    None,
                    Some(Box::new(|graph: &mut Graph| {
                        backfill_default_property(graph).map(|_| ())
                    })),
                ),
                MigrationStage::lightweight(V2_PROPERTIES, V3_CONTAINERS_TAGS),
                MigrationStage::lightweight(V3_CONTAINERS_TAGS, V4_MARKET_VALUE),
            ],
        }
    }

    pub fn current(&self) -> u32 {
        self.versions.last().map(|v| v.number).unwrap_or_default()
    }

    pub fn versions(&self) -> &[SchemaVersion] {
        &self.versions
    }

    pub fn version(&self, number: u32) -> Option<&SchemaVersion> {
        self.versions.iter().find(|v| v.number == number)
    }

    /// The ordered stages that take `from` to the current version.
    pub fn path(&self, from: u32) -> Result<Vec<&MigrationStage>, MigrationError> {
        let current = self.current();
        if from > current {
            return Err(MigrationError::NewerThanSupported {
                found: from,
                supported: current,
            });
        }
        let start = self
            .versions
            .iter()
            .position(|v| v.number == from)
            .ok_or(MigrationError::UnknownVersion(from))?;

        let mut path = Vec::new();
        for pair in self.versions[start..].windows(2) {
            let (lo, hi) = (pair[0].number, pair[1].number);
            let stage = self
                .stages
                .iter()
                .find(|s| s.from == lo && s.to == hi)
                .ok_or(MigrationError::MissingStage { from: lo, to: hi })?;
            path.push(stage);
        }
        Ok(path)
    }

    /// Refuse a graph claiming to be at `version` that holds kinds that
    /// version does not declare.
    pub fn check_kinds(&self, graph: &Graph, version: u32) -> Result<(), MigrationError> {
        self.path(version)?;
        let Some(schema) = self.version(version) else {
            return Err(MigrationError::UnknownVersion(version));
        };
        match EntityKind::ALL
            .into_iter()
            .find(|kind| graph.count(*kind) > 0 && !schema.supports(*kind))
        {
            Some(kind) => Err(MigrationError::UnexpectedKind { version, kind }),
            None => Ok(()),
        }
    }

    /// Run every stage from `from` to current on a copy of `graph`.
    pub fn upgrade(&self, graph: &Graph, from: u32) -> Result<Upgrade, MigrationError> {
        let path = self.path(from)?;
        let mut working = graph.clone();
        let mut applied = Vec::with_capacity(path.len());
        for stage in path {
            if let Err(err) = stage.run(&mut working) {
                warn!(
                    target: "hearthledger",
                    event = "migration_stage_failed",
                    from = stage.from,
                    to = stage.to,
                    error = %err
                );
                return Err(err);
            }
            info!(
                target: "hearthledger",
                event = "migration_stage_applied",
                from = stage.from,
                to = stage.to,
                kind = stage.kind_label()
            );
            applied.push((stage.from, stage.to));
        }
        Ok(Upgrade {
            graph: working,
            from,
            to: self.current(),
            applied,
        })
    }
}

impl Default for MigrationRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

/// Attach every room that has no property to the default property,
/// creating "My Home" only when such rooms exist and no default is present.
/// Returns the number of rooms attached.
pub fn backfill_default_property(graph: &mut Graph) -> Result<usize, String> {
    let orphans: Vec<Room> = graph
        .all::<Room>()
        .filter(|room| room.property_id.is_none())
        .cloned()
        .collect();
    if orphans.is_empty() {
        return Ok(0);
    }

    let property_id = match graph.default_property() {
        Some(existing) => existing.id,
        None => {
            let mut home = Property::new(DEFAULT_PROPERTY_NAME);
            home.is_default = true;
            let id = graph.insert(home).map_err(|e| e.to_string())?;
            info!(
                target: "hearthledger",
                event = "default_property_created",
                property_id = %id
            );
            id
        }
    };

    let attached = orphans.len();
    for room in orphans {
        graph
            .update(room.in_property(property_id))
            .map_err(|e| e.to_string())?;
    }
    info!(
        target: "hearthledger",
        event = "default_property_backfill",
        rooms = attached
    );
    Ok(attached)
}
