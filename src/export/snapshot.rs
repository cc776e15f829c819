use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::graph::Graph;
use crate::model::{Category, Container, Item, ItemPhoto, Property, Receipt, Record, Room, Tag};
use crate::{AppError, AppResult};

pub const BACKUP_CORRUPT: &str = "BACKUP/CORRUPT";

pub fn app_version() -> &'static str {
    concat!(env!("CARGO_PKG_VERSION"), "+", env!("HEARTHLEDGER_GIT_HASH"))
}

/// The structured backup document. Collections missing from older backups
/// read as empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub schema_version: u32,
    #[serde(default)]
    pub app_version: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub properties: Vec<Property>,
    #[serde(default)]
    pub rooms: Vec<Room>,
    #[serde(default)]
    pub containers: Vec<Container>,
    #[serde(default)]
    pub items: Vec<Item>,
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub photos: Vec<ItemPhoto>,
    #[serde(default)]
    pub receipts: Vec<Receipt>,
}

impl Snapshot {
    pub fn from_graph(graph: &Graph, schema_version: u32) -> Self {
        // Arena maps iterate in id order.
        Self {
            schema_version,
            app_version: app_version().to_string(),
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            properties: graph.all::<Property>().cloned().collect(),
            rooms: graph.all::<Room>().cloned().collect(),
            containers: graph.all::<Container>().cloned().collect(),
            items: graph.all::<Item>().cloned().collect(),
            categories: graph.all::<Category>().cloned().collect(),
            tags: graph.all::<Tag>().cloned().collect(),
            photos: graph.all::<ItemPhoto>().cloned().collect(),
            receipts: graph.all::<Receipt>().cloned().collect(),
        }
    }

    pub fn entity_count(&self) -> usize {
        self.properties.len()
            + self.rooms.len()
            + self.containers.len()
            + self.items.len()
            + self.categories.len()
            + self.tags.len()
            + self.photos.len()
            + self.receipts.len()
    }

    /// Parents before children.
    pub fn records(&self) -> Vec<Record> {
        let mut out = Vec::with_capacity(self.entity_count());
        out.extend(self.properties.iter().cloned().map(Record::from));
        out.extend(self.categories.iter().cloned().map(Record::from));
        out.extend(self.tags.iter().cloned().map(Record::from));
        out.extend(self.rooms.iter().cloned().map(Record::from));
        out.extend(self.containers.iter().cloned().map(Record::from));
        out.extend(self.items.iter().cloned().map(Record::from));
        out.extend(self.photos.iter().cloned().map(Record::from));
        out.extend(self.receipts.iter().cloned().map(Record::from));
        out
    }

    /// Rebuild the snapshot's own graph. Duplicate ids or references to
    /// entities absent from the snapshot make it corrupt.
    pub fn to_graph(&self) -> AppResult<Graph> {
        Graph::from_records(self.records(), Vec::new()).map_err(|err| {
            AppError::new(BACKUP_CORRUPT, "Backup references entities it does not contain")
                .with_cause(err)
        })
    }

    pub fn to_json(&self) -> AppResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}

/// Parse and verify a structured backup. Nothing about the live store is
/// touched.
pub fn read_snapshot(bytes: &[u8]) -> AppResult<Snapshot> {
    let snapshot: Snapshot = serde_json::from_slice(bytes).map_err(|err| {
        AppError::new(BACKUP_CORRUPT, "Backup file is not a readable snapshot")
            .with_context("line", err.line().to_string())
            .with_context("column", err.column().to_string())
            .with_cause(err)
    })?;
    snapshot.to_graph()?;
    Ok(snapshot)
}
