//! Replace: discard the live graph and install the snapshot in its place.
//!
//! Every snapshot entity gets a fresh id so nothing collides with the ids the
//! live graph is about to retire. The swap is a single transaction.

use std::collections::HashMap;

use tracing::{info, warn};

use super::{RestoreContext, RestoreStatus, RestoreSummary};
use crate::export::{write_export, ExportFormat};
use crate::graph::Graph;
use crate::id::EntityId;
use crate::model::{EntityKind, Record};
use crate::AppResult;

fn remap_ids(record: &mut Record, fresh: &HashMap<EntityId, EntityId>) {
    let map = |id: EntityId| fresh.get(&id).copied().unwrap_or(id);
    record.set_id(map(record.id()));
    match record {
        Record::Room(room) => room.property_id = room.property_id.map(map),
        Record::Container(container) => container.room_id = container.room_id.map(map),
        Record::Item(item) => {
            item.category_id = item.category_id.map(map);
            item.room_id = item.room_id.map(map);
            item.container_id = item.container_id.map(map);
            item.tag_ids = item.tag_ids.iter().copied().map(map).collect();
        }
        Record::Photo(photo) => photo.item_id = map(photo.item_id),
        Record::Receipt(receipt) => receipt.item_id = receipt.item_id.map(map),
        Record::Property(_) | Record::Category(_) | Record::Tag(_) => {}
    }
}

/// Build the replacement graph. Any entity that fails validation aborts
/// the whole replace; the failures are returned in the summary.
fn build_replacement(live: &Graph, source: &Graph, summary: &mut RestoreSummary) -> Option<Graph> {
    let records = source.records();
    let fresh: HashMap<EntityId, EntityId> = records
        .iter()
        .map(|record| (record.id(), EntityId::new()))
        .collect();

    let mut next = Graph::new();
    next.retire(live.retired().iter().copied());
    next.retire(live.records().iter().map(Record::id));

    let mut inserted: Vec<EntityKind> = Vec::with_capacity(records.len());
    for mut record in records {
        let origin = record.entity_ref();
        remap_ids(&mut record, &fresh);
        match next.insert(record) {
            Ok(_) => inserted.push(origin.kind),
            Err(err) => summary.record_error(origin, &err),
        }
    }

    if !summary.errors.is_empty() {
        summary.warnings.push(format!(
            "Replace aborted: {} snapshot entities could not be restored",
            summary.errors.len()
        ));
        return None;
    }
    for kind in inserted {
        summary.record_created(kind);
    }
    Some(next)
}

pub(super) async fn run(
    ctx: &RestoreContext<'_>,
    source: &Graph,
    summary: &mut RestoreSummary,
) -> AppResult<()> {
    // Held through the safety backup and the swap so no write falls between
    // the graph that gets retired and the one that replaces it.
    let writer = ctx.store.writer().await;
    let live = writer.live();
    let Some(next) = build_replacement(&live, source, summary) else {
        warn!(
            target: "hearthledger",
            event = "restore_replace_aborted",
            errors = summary.errors.len()
        );
        summary.status = RestoreStatus::NotStarted;
        return Ok(());
    };

    if ctx.dry_run {
        summary.committed = 1;
        summary.status = RestoreStatus::Completed;
        return Ok(());
    }
    if ctx.cancel.is_cancelled() {
        summary.stop();
        return Ok(());
    }

    if let Some(dir) = ctx.safety_backup_dir.as_deref().filter(|_| !live.is_empty()) {
        let entry = write_export(
            live.clone(),
            ExportFormat::Structured,
            ctx.store.schema_version(),
            dir,
        )
        .await?;
        info!(
            target: "hearthledger",
            event = "restore_safety_backup",
            path = %entry.path.display(),
            entities = entry.entity_count
        );
        summary.safety_backup = Some(entry.path);
    }

    if ctx.cancel.is_cancelled() {
        summary.stop();
        return Ok(());
    }
    writer.replace_graph(next).await?;
    summary.committed = 1;
    summary.status = RestoreStatus::Completed;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::MigrationRegistry;
    use crate::model::{Item, ItemPhoto, Room};
    use crate::restore::RestoreStrategy;
    use crate::store::Store;
    use tempfile::tempdir;

    async fn store() -> Store {
        Store::open_in_memory(&MigrationRegistry::standard())
            .await
            .unwrap()
    }

    fn source() -> Graph {
        let mut graph = Graph::new();
        let room = graph.insert(Room::new("Garage")).unwrap();
        let mut drill = Item::new("Drill");
        drill.room_id = Some(room);
        let drill = graph.insert(drill).unwrap();
        graph.insert(ItemPhoto::new(drill, "drill.jpg")).unwrap();
        graph
    }

    #[test]
    fn remapped_graph_keeps_relationships() {
        let source = source();
        let mut summary = RestoreSummary::new(RestoreStrategy::Replace, false);
        let next = build_replacement(&Graph::new(), &source, &mut summary).unwrap();
        assert_eq!(summary.created, 3);

        let drill = next.all::<Item>().next().unwrap();
        let room = next.get::<Room>(drill.room_id.unwrap()).unwrap();
        assert_eq!(room.name, "Garage");
        assert_eq!(next.photos_of(drill.id).len(), 1);
        assert!(source.get::<Item>(drill.id).is_none());
    }

    #[tokio::test]
    async fn replace_retires_live_ids() {
        let store = store().await;
        let old = store.create(Item::new("Old couch")).await.unwrap();
        let registry = MigrationRegistry::standard();
        let ctx = RestoreContext::new(&store, &registry);

        let mut summary = RestoreSummary::new(RestoreStrategy::Replace, false);
        run(&ctx, &source(), &mut summary).await.unwrap();
        assert_eq!(summary.status, RestoreStatus::Completed);
        assert_eq!(summary.committed, 1);

        let graph = store.snapshot();
        assert!(graph.get::<Item>(old).is_none());
        assert!(graph.is_retired(old));
        assert_eq!(graph.len(), 3);
    }

    #[tokio::test]
    async fn invalid_entity_aborts_before_commit() {
        let store = store().await;
        let keep = store.create(Item::new("Keep me")).await.unwrap();
        // from_records skips validation, like a hand-edited backup would.
        let mut records = source().records();
        for record in &mut records {
            if let Record::Item(item) = record {
                item.quantity = 0;
            }
        }
        let bad = Graph::from_records(records, Vec::new()).unwrap();

        let registry = MigrationRegistry::standard();
        let ctx = RestoreContext::new(&store, &registry);
        let mut summary = RestoreSummary::new(RestoreStrategy::Replace, false);
        run(&ctx, &bad, &mut summary).await.unwrap();

        assert_eq!(summary.status, RestoreStatus::NotStarted);
        assert_eq!(summary.created, 0);
        assert!(!summary.errors.is_empty());
        assert!(store.snapshot().get::<Item>(keep).is_some());
    }

    #[tokio::test]
    async fn safety_backup_is_written_first() {
        let dir = tempdir().unwrap();
        let store = store().await;
        store.create(Item::new("Heirloom clock")).await.unwrap();
        let registry = MigrationRegistry::standard();
        let mut ctx = RestoreContext::new(&store, &registry);
        ctx.safety_backup_dir = Some(dir.path().to_path_buf());

        let mut summary = RestoreSummary::new(RestoreStrategy::Replace, false);
        run(&ctx, &source(), &mut summary).await.unwrap();
        let backup = summary.safety_backup.expect("safety backup path");
        let bytes = std::fs::read(backup).unwrap();
        let saved = crate::export::read_snapshot(&bytes).unwrap();
        assert_eq!(saved.items[0].name, "Heirloom clock");
    }

    #[tokio::test]
    async fn write_racing_a_replace_is_kept_or_retired_and_backed_up() {
        let dir = tempdir().unwrap();
        let store = store().await;
        store.create(Item::new("Heirloom clock")).await.unwrap();
        let registry = MigrationRegistry::standard();
        let mut ctx = RestoreContext::new(&store, &registry);
        ctx.safety_backup_dir = Some(dir.path().to_path_buf());

        let mut summary = RestoreSummary::new(RestoreStrategy::Replace, false);
        let source = source();
        let (replaced, late) = tokio::join!(run(&ctx, &source, &mut summary), async {
            tokio::task::yield_now().await;
            store.create(Item::new("Late write")).await
        });
        replaced.unwrap();
        let late = late.unwrap();
        assert_eq!(summary.status, RestoreStatus::Completed);

        let graph = store.snapshot();
        if graph.get::<Item>(late).is_none() {
            // The write landed first: it was retired with the old graph and
            // must be in the safety backup.
            assert!(graph.is_retired(late));
            let bytes = std::fs::read(summary.safety_backup.unwrap()).unwrap();
            let saved = crate::export::read_snapshot(&bytes).unwrap();
            assert!(saved.items.iter().any(|item| item.id == late));
        }
        assert!(graph.check_integrity().is_empty());
    }
}
