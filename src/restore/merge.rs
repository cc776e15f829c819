//! Merge: fold a snapshot into the live graph entity by entity.
//!
//! Snapshot entities are visited parents first. Each one has its references
//! rewritten to live ids, is matched against live entities by natural key,
//! and then created, updated or left alone in its own transaction. A live
//! entity can absorb at most one snapshot entity per run.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};

use super::{CancelFlag, RestoreContext, RestoreStatus, RestoreSummary};
use crate::graph::{Entity, Graph};
use crate::id::EntityId;
use crate::model::{
    Category, Container, EntityRef, Item, ItemPhoto, Property, Receipt, Record, Room, Tag,
};
use crate::store::Store;
use crate::AppResult;

/// Where merged entities land: the live store, or a private copy of it for
/// dry runs.
enum Target<'a> {
    Live(&'a Store),
    Preview(Arc<Graph>),
}

impl Target<'_> {
    fn is_live(&self) -> bool {
        matches!(self, Target::Live(_))
    }

    /// Live targets run `mutate` under the store's write gate, so it sees
    /// every earlier commit and nothing can land between its read and its
    /// write.
    async fn apply<R>(&mut self, mutate: impl FnOnce(&mut Graph) -> AppResult<R>) -> AppResult<R> {
        match self {
            Target::Live(store) => store.commit(mutate).await,
            // Graph::insert and Graph::update fail before touching the graph.
            Target::Preview(graph) => mutate(Arc::make_mut(graph)),
        }
    }
}

enum Step {
    Create(Record),
    Update(Record),
    Unchanged(EntityId),
}

enum Outcome {
    Created(EntityId),
    Updated(EntityId),
    Unchanged(EntityId),
    Skipped(String),
    Cancelled,
}

fn norm(value: &str) -> String {
    value.trim().to_lowercase()
}

fn norm_opt(value: Option<&str>) -> Option<String> {
    value.map(norm).filter(|v| !v.is_empty())
}

fn display_name(record: &Record) -> String {
    match record {
        Record::Property(e) => e.name.clone(),
        Record::Room(e) => e.name.clone(),
        Record::Container(e) => e.name.clone(),
        Record::Item(e) => e.name.clone(),
        Record::Category(e) => e.name.clone(),
        Record::Tag(e) => e.name.clone(),
        Record::Photo(e) => e.image_ref.clone(),
        Record::Receipt(e) => e.vendor.clone().unwrap_or_else(|| "Receipt".to_string()),
    }
}

/// Rewrite snapshot references to the live ids they were restored as.
/// Optional references whose target did not make it are dropped with a
/// warning; a photo without its item cannot be restored at all.
fn resolve_refs(
    record: &mut Record,
    remap: &HashMap<EntityId, EntityId>,
    warnings: &mut Vec<String>,
) -> Result<(), String> {
    let origin = record.entity_ref();
    let mut lookup = |field: &str, id: EntityId| -> Option<EntityId> {
        let found = remap.get(&id).copied();
        if found.is_none() {
            warnings.push(format!(
                "{origin}: {field} {id} was not restored; reference dropped"
            ));
        }
        found
    };
    match record {
        Record::Room(room) => {
            room.property_id = room.property_id.and_then(|id| lookup("propertyId", id));
        }
        Record::Container(container) => {
            container.room_id = container.room_id.and_then(|id| lookup("roomId", id));
        }
        Record::Item(item) => {
            item.category_id = item.category_id.and_then(|id| lookup("categoryId", id));
            item.room_id = item.room_id.and_then(|id| lookup("roomId", id));
            item.container_id = item.container_id.and_then(|id| lookup("containerId", id));
            item.tag_ids = std::mem::take(&mut item.tag_ids)
                .into_iter()
                .filter_map(|id| lookup("tagIds", id))
                .collect();
        }
        Record::Photo(photo) => match remap.get(&photo.item_id) {
            Some(id) => photo.item_id = *id,
            None => return Err("Owning item was not restored".to_string()),
        },
        Record::Receipt(receipt) => {
            receipt.item_id = receipt.item_id.and_then(|id| lookup("itemId", id));
        }
        Record::Property(_) | Record::Category(_) | Record::Tag(_) => {}
    }
    Ok(())
}

fn unclaimed<T: Entity>(
    view: &Graph,
    claimed: &HashSet<EntityId>,
    key: impl Fn(&T) -> bool,
) -> Vec<EntityId> {
    view.all::<T>()
        .filter(|e| !claimed.contains(&e.id()) && key(e))
        .map(|e| e.id())
        .collect()
}

/// Live entities sharing `record`'s natural key. References in `record`
/// must already be resolved.
fn candidates(view: &Graph, record: &Record, claimed: &HashSet<EntityId>) -> Vec<EntityId> {
    match record {
        Record::Property(p) => {
            let name = norm(&p.name);
            unclaimed(view, claimed, |o: &Property| norm(&o.name) == name)
        }
        Record::Category(c) => {
            let name = norm(&c.name);
            unclaimed(view, claimed, |o: &Category| norm(&o.name) == name)
        }
        Record::Tag(t) => {
            let name = norm(&t.name);
            unclaimed(view, claimed, |o: &Tag| norm(&o.name) == name)
        }
        Record::Room(r) => {
            let name = norm(&r.name);
            unclaimed(view, claimed, |o: &Room| {
                norm(&o.name) == name && o.property_id == r.property_id
            })
        }
        Record::Container(c) => {
            let name = norm(&c.name);
            unclaimed(view, claimed, |o: &Container| {
                norm(&o.name) == name && o.room_id == c.room_id
            })
        }
        Record::Item(i) => {
            let name = norm(&i.name);
            let serial = norm_opt(i.serial());
            if serial.is_none() && i.purchase_date.is_none() {
                unclaimed(view, claimed, |o: &Item| norm(&o.name) == name)
            } else {
                unclaimed(view, claimed, |o: &Item| {
                    norm(&o.name) == name
                        && norm_opt(o.serial()) == serial
                        && o.purchase_date == i.purchase_date
                })
            }
        }
        Record::Photo(p) => unclaimed(view, claimed, |o: &ItemPhoto| {
            o.item_id == p.item_id && o.image_ref == p.image_ref
        }),
        Record::Receipt(r) => {
            let vendor = norm_opt(r.vendor.as_deref());
            unclaimed(view, claimed, |o: &Receipt| {
                norm_opt(o.vendor.as_deref()) == vendor
                    && o.total == r.total
                    && o.purchase_date == r.purchase_date
            })
        }
    }
}

fn has_default_room(view: &Graph, property_id: Option<EntityId>) -> bool {
    view.all::<Room>()
        .any(|r| r.is_default && r.property_id == property_id)
}

/// A snapshot entity about to be created under a fresh id. Default flags
/// only survive when the live graph has no default of its own.
fn prepare_new(mut record: Record, view: &Graph) -> Record {
    match &mut record {
        Record::Property(p) if p.is_default => {
            p.is_default = view.default_property().is_none();
        }
        Record::Room(r) if r.is_default => {
            r.is_default = !has_default_room(view, r.property_id);
        }
        _ => {}
    }
    record.set_id(EntityId::new());
    record
}

fn union_legacy_tags(live: &[String], incoming: &mut Vec<String>) {
    for tag in live {
        if !incoming.iter().any(|t| t.trim().eq_ignore_ascii_case(tag.trim())) {
            incoming.push(tag.clone());
        }
    }
}

/// Snapshot scalars win; relationships are additive.
fn merged(live: &Record, incoming: Record) -> Record {
    let mut next = match (live, incoming) {
        (Record::Property(live), Record::Property(mut next)) => {
            next.is_default = live.is_default;
            Record::Property(next)
        }
        (Record::Room(live), Record::Room(mut next)) => {
            next.is_default = live.is_default;
            next.property_id = next.property_id.or(live.property_id);
            Record::Room(next)
        }
        (Record::Container(live), Record::Container(mut next)) => {
            next.room_id = next.room_id.or(live.room_id);
            Record::Container(next)
        }
        (Record::Item(live), Record::Item(mut next)) => {
            next.category_id = next.category_id.or(live.category_id);
            next.room_id = next.room_id.or(live.room_id);
            next.container_id = next.container_id.or(live.container_id);
            next.tag_ids.extend(live.tag_ids.iter().copied());
            union_legacy_tags(&live.tags, &mut next.tags);
            Record::Item(next)
        }
        (Record::Receipt(live), Record::Receipt(mut next)) => {
            next.item_id = next.item_id.or(live.item_id);
            next.image_ref = next.image_ref.or_else(|| live.image_ref.clone());
            Record::Receipt(next)
        }
        (_, next) => next,
    };
    next.set_id(live.id());
    next.set_timestamps(live.created_at(), live.updated_at());
    next
}

fn plan_step(view: &Graph, incoming: Record, claimed: &HashSet<EntityId>) -> Result<Step, String> {
    let kind = incoming.kind();
    match candidates(view, &incoming, claimed).as_slice() {
        [] => Ok(Step::Create(prepare_new(incoming, view))),
        [live_id] => {
            let Some(live) = view.record(EntityRef::new(kind, *live_id)) else {
                return Ok(Step::Create(prepare_new(incoming, view)));
            };
            let next = merged(&live, incoming);
            if next == live {
                Ok(Step::Unchanged(*live_id))
            } else {
                Ok(Step::Update(next))
            }
        }
        many => Err(format!(
            "{} live {} entries share this natural key",
            many.len(),
            kind
        )),
    }
}

/// Match `incoming` against `graph` and apply the result. Cancellation is
/// honoured only when there is something to commit.
fn merge_one(
    graph: &mut Graph,
    incoming: Record,
    claimed: &HashSet<EntityId>,
    cancel: &CancelFlag,
) -> AppResult<Outcome> {
    let step = match plan_step(graph, incoming, claimed) {
        Ok(step) => step,
        Err(reason) => return Ok(Outcome::Skipped(reason)),
    };
    match step {
        Step::Unchanged(id) => Ok(Outcome::Unchanged(id)),
        _ if cancel.is_cancelled() => Ok(Outcome::Cancelled),
        Step::Create(record) => graph.insert(record).map(Outcome::Created),
        Step::Update(record) => {
            let id = record.id();
            graph.update(record).map(|()| Outcome::Updated(id))
        }
    }
}

pub(super) async fn run(
    ctx: &RestoreContext<'_>,
    source: &Graph,
    summary: &mut RestoreSummary,
) -> AppResult<()> {
    let mut target = if ctx.dry_run {
        Target::Preview(ctx.store.snapshot())
    } else {
        Target::Live(ctx.store)
    };
    let mut remap: HashMap<EntityId, EntityId> = HashMap::new();
    let mut claimed: HashSet<EntityId> = HashSet::new();

    for mut incoming in source.records() {
        let origin = incoming.entity_ref();
        let name = display_name(&incoming);

        if let Err(reason) = resolve_refs(&mut incoming, &remap, &mut summary.warnings) {
            debug!(target: "hearthledger", event = "restore_entity_skipped", entity = %origin, reason = %reason);
            summary.record_skipped(origin, &name, reason);
            continue;
        }

        let result = target
            .apply(|graph| merge_one(graph, incoming, &claimed, &ctx.cancel))
            .await;

        match result {
            Ok(Outcome::Skipped(reason)) => {
                debug!(target: "hearthledger", event = "restore_entity_skipped", entity = %origin, reason = %reason);
                summary.record_skipped(origin, &name, reason);
            }
            Ok(Outcome::Unchanged(live_id)) => {
                remap.insert(origin.id, live_id);
                claimed.insert(live_id);
                summary.record_unchanged(origin.kind);
            }
            Ok(Outcome::Cancelled) => {
                summary.stop();
                return Ok(());
            }
            Ok(Outcome::Created(live_id)) => {
                remap.insert(origin.id, live_id);
                claimed.insert(live_id);
                summary.committed += 1;
                summary.record_created(origin.kind);
                if target.is_live() {
                    tokio::task::yield_now().await;
                }
            }
            Ok(Outcome::Updated(live_id)) => {
                remap.insert(origin.id, live_id);
                claimed.insert(live_id);
                summary.committed += 1;
                summary.record_updated(origin.kind);
                if target.is_live() {
                    tokio::task::yield_now().await;
                }
            }
            Err(err) if matches!(err.family(), "VALIDATION" | "INTEGRITY") => {
                warn!(
                    target: "hearthledger",
                    event = "restore_entity_failed",
                    entity = %origin,
                    code = err.code()
                );
                summary.record_error(origin, &err);
            }
            Err(err) => return Err(err),
        }
    }

    summary.status = RestoreStatus::Completed;
    Ok(())
}
