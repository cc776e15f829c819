//! The entity arena.
//!
//! Every entity lives in a per-kind map keyed by [`EntityId`]; relationships
//! are identifier references, never owned pointers. Reverse links (a room's
//! items, an item's photos) are derived by walking the maps, which keeps the
//! cascade/nullify rules an explicit graph walk:
//!
//! | deleted   | cascades to        | nullifies                       |
//! |-----------|--------------------|---------------------------------|
//! | Property  | rooms              |                                 |
//! | Room      | containers         | `item.room_id`                  |
//! | Container |                    | `item.container_id`             |
//! | Item      | photos             | `receipt.item_id`               |
//! | Category  |                    | `item.category_id`              |
//! | Tag       |                    | `item.tag_ids` membership       |
//!
//! Deletion is planned against an immutable view first and applied in a
//! second step that cannot fail, so a delete never stops halfway.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;

use crate::id::EntityId;
use crate::model::{
    Category, Container, EntityKind, EntityRef, Item, ItemPhoto, Property, Receipt, Record, Room,
    Tag,
};
use crate::scoring::{self, ItemFacts};
use crate::time::now_ms;
use crate::validation::validate_record;
use crate::{AppError, AppResult};

pub const INTEGRITY_ID_IN_USE: &str = "INTEGRITY/ID_IN_USE";
pub const INTEGRITY_ID_RETIRED: &str = "INTEGRITY/ID_RETIRED";
pub const INTEGRITY_DANGLING_REFERENCE: &str = "INTEGRITY/DANGLING_REFERENCE";
pub const GRAPH_NOT_FOUND: &str = "GRAPH/NOT_FOUND";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Graph {
    properties: BTreeMap<EntityId, Property>,
    rooms: BTreeMap<EntityId, Room>,
    containers: BTreeMap<EntityId, Container>,
    items: BTreeMap<EntityId, Item>,
    categories: BTreeMap<EntityId, Category>,
    tags: BTreeMap<EntityId, Tag>,
    photos: BTreeMap<EntityId, ItemPhoto>,
    receipts: BTreeMap<EntityId, Receipt>,
    retired: BTreeSet<EntityId>,
}

/// Typed access to one of the arena's maps.
pub trait Entity: Clone + Into<Record> {
    const KIND: EntityKind;

    fn id(&self) -> EntityId;
    fn table(graph: &Graph) -> &BTreeMap<EntityId, Self>;
    fn table_mut(graph: &mut Graph) -> &mut BTreeMap<EntityId, Self>;
}

macro_rules! arena_entity {
    ($($ty:ty => $kind:ident, $field:ident);+ $(;)?) => {
        $(
            impl Entity for $ty {
                const KIND: EntityKind = EntityKind::$kind;

                fn id(&self) -> EntityId {
                    self.id
                }

                fn table(graph: &Graph) -> &BTreeMap<EntityId, Self> {
                    &graph.$field
                }

                fn table_mut(graph: &mut Graph) -> &mut BTreeMap<EntityId, Self> {
                    &mut graph.$field
                }
            }
        )+
    };
}

arena_entity!(
    Property => Property, properties;
    Room => Room, rooms;
    Container => Container, containers;
    Item => Item, items;
    Category => Category, categories;
    Tag => Tag, tags;
    ItemPhoto => Photo, photos;
    Receipt => Receipt, receipts;
);

/// A reference that points at an entity which is not in the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityIssue {
    pub entity: EntityRef,
    pub field: &'static str,
    pub missing: EntityRef,
}

/// A reference cleared by a delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Nullified {
    pub entity: EntityRef,
    pub field: &'static str,
    pub value: EntityId,
}

/// Everything a delete will touch, computed before anything changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletePlan {
    pub target: EntityRef,
    /// Children before parents; the target is last.
    pub removed: Vec<EntityRef>,
    pub nullified: Vec<Nullified>,
}

impl DeletePlan {
    pub fn removed_count(&self, kind: EntityKind) -> usize {
        self.removed.iter().filter(|r| r.kind == kind).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prefetch {
    /// Only the property itself.
    None,
    /// Rooms, without their contents.
    Rooms,
    /// Rooms, containers and items.
    Full,
}

#[derive(Debug, Clone)]
pub struct PropertyTree<'g> {
    pub property: &'g Property,
    pub rooms: Vec<RoomTree<'g>>,
}

#[derive(Debug, Clone)]
pub struct RoomTree<'g> {
    pub room: &'g Room,
    pub containers: Vec<ContainerTree<'g>>,
    /// Items in the room that are not inside one of its containers.
    pub loose_items: Vec<&'g Item>,
}

#[derive(Debug, Clone)]
pub struct ContainerTree<'g> {
    pub container: &'g Container,
    pub items: Vec<&'g Item>,
}

impl<'g> RoomTree<'g> {
    pub fn items(&self) -> impl Iterator<Item = &'g Item> + '_ {
        self.loose_items
            .iter()
            .copied()
            .chain(self.containers.iter().flat_map(|c| c.items.iter().copied()))
    }
}

impl<'g> PropertyTree<'g> {
    pub fn containers(&self) -> impl Iterator<Item = &'g Container> + '_ {
        self.rooms
            .iter()
            .flat_map(|r| r.containers.iter().map(|c| c.container))
    }

    pub fn items(&self) -> impl Iterator<Item = &'g Item> + '_ {
        self.rooms.iter().flat_map(|r| r.items())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ItemSort {
    #[default]
    Name,
    PurchasePrice,
    PurchaseDate,
    CreatedAt,
    UpdatedAt,
    DocumentationScore,
}

/// Filter and ordering for item listings. Empty filters match everything.
#[derive(Debug, Clone, Default)]
pub struct ItemQuery {
    pub category_id: Option<EntityId>,
    pub room_id: Option<EntityId>,
    pub container_id: Option<EntityId>,
    pub tag_id: Option<EntityId>,
    /// Case-insensitive match on name, brand, model, serial, barcode or notes.
    pub search: Option<String>,
    pub documented: Option<bool>,
    pub sort: ItemSort,
    pub descending: bool,
    pub limit: Option<usize>,
    pub offset: usize,
}

fn none_last<T: Ord>(a: Option<T>, b: Option<T>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn matches_search(item: &Item, needle: &str) -> bool {
    let needle = needle.to_lowercase();
    [
        Some(item.name.as_str()),
        item.brand.as_deref(),
        item.model_number.as_deref(),
        item.serial_number.as_deref(),
        item.barcode.as_deref(),
        Some(item.notes.as_str()),
    ]
    .into_iter()
    .flatten()
    .any(|field| field.to_lowercase().contains(&needle))
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from persisted rows. References are checked once all
    /// rows are in place.
    pub fn from_records(
        records: impl IntoIterator<Item = Record>,
        retired: impl IntoIterator<Item = EntityId>,
    ) -> AppResult<Self> {
        let mut graph = Graph::new();
        graph.retired.extend(retired);
        for record in records {
            let entity = record.entity_ref();
            if graph.contains(entity.id) {
                return Err(AppError::new(
                    INTEGRITY_ID_IN_USE,
                    "Two records share the same identifier",
                )
                .with_context("entity", entity.to_string()));
            }
            graph.put(record);
        }
        graph.ensure_integrity()?;
        Ok(graph)
    }

    pub fn get<T: Entity>(&self, id: EntityId) -> Option<&T> {
        T::table(self).get(&id)
    }

    pub fn all<'a, T: Entity + 'a>(&'a self) -> impl Iterator<Item = &'a T> + 'a {
        T::table(self).values()
    }

    /// Entities of one kind that pass `filter`, ordered by `order`.
    pub fn select<T, F, O>(&self, filter: F, mut order: O) -> Vec<&T>
    where
        T: Entity,
        F: Fn(&T) -> bool,
        O: FnMut(&T, &T) -> Ordering,
    {
        let mut selected: Vec<&T> = T::table(self).values().filter(|e| filter(*e)).collect();
        selected.sort_by(|a, b| order(*a, *b));
        selected
    }

    pub fn count(&self, kind: EntityKind) -> usize {
        match kind {
            EntityKind::Property => self.properties.len(),
            EntityKind::Room => self.rooms.len(),
            EntityKind::Container => self.containers.len(),
            EntityKind::Item => self.items.len(),
            EntityKind::Category => self.categories.len(),
            EntityKind::Tag => self.tags.len(),
            EntityKind::Photo => self.photos.len(),
            EntityKind::Receipt => self.receipts.len(),
        }
    }

    pub fn counts(&self) -> BTreeMap<EntityKind, usize> {
        EntityKind::ALL
            .into_iter()
            .map(|kind| (kind, self.count(kind)))
            .collect()
    }

    pub fn len(&self) -> usize {
        EntityKind::ALL.into_iter().map(|k| self.count(k)).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: EntityId) -> bool {
        EntityKind::ALL
            .into_iter()
            .any(|kind| self.contains_ref(EntityRef::new(kind, id)))
    }

    pub fn contains_ref(&self, entity: EntityRef) -> bool {
        let id = &entity.id;
        match entity.kind {
            EntityKind::Property => self.properties.contains_key(id),
            EntityKind::Room => self.rooms.contains_key(id),
            EntityKind::Container => self.containers.contains_key(id),
            EntityKind::Item => self.items.contains_key(id),
            EntityKind::Category => self.categories.contains_key(id),
            EntityKind::Tag => self.tags.contains_key(id),
            EntityKind::Photo => self.photos.contains_key(id),
            EntityKind::Receipt => self.receipts.contains_key(id),
        }
    }

    pub fn is_retired(&self, id: EntityId) -> bool {
        self.retired.contains(&id)
    }

    pub fn retired(&self) -> &BTreeSet<EntityId> {
        &self.retired
    }

    pub(crate) fn retire(&mut self, ids: impl IntoIterator<Item = EntityId>) {
        self.retired.extend(ids);
    }

    pub fn record(&self, entity: EntityRef) -> Option<Record> {
        let id = &entity.id;
        match entity.kind {
            EntityKind::Property => self.properties.get(id).cloned().map(Record::from),
            EntityKind::Room => self.rooms.get(id).cloned().map(Record::from),
            EntityKind::Container => self.containers.get(id).cloned().map(Record::from),
            EntityKind::Item => self.items.get(id).cloned().map(Record::from),
            EntityKind::Category => self.categories.get(id).cloned().map(Record::from),
            EntityKind::Tag => self.tags.get(id).cloned().map(Record::from),
            EntityKind::Photo => self.photos.get(id).cloned().map(Record::from),
            EntityKind::Receipt => self.receipts.get(id).cloned().map(Record::from),
        }
    }

    /// Every entity, parents before children, each kind ordered by id.
    pub fn records(&self) -> Vec<Record> {
        let mut out = Vec::with_capacity(self.len());
        out.extend(self.properties.values().cloned().map(Record::from));
        out.extend(self.categories.values().cloned().map(Record::from));
        out.extend(self.tags.values().cloned().map(Record::from));
        out.extend(self.rooms.values().cloned().map(Record::from));
        out.extend(self.containers.values().cloned().map(Record::from));
        out.extend(self.items.values().cloned().map(Record::from));
        out.extend(self.photos.values().cloned().map(Record::from));
        out.extend(self.receipts.values().cloned().map(Record::from));
        out
    }

    fn put(&mut self, record: Record) {
        match record {
            Record::Property(e) => {
                self.properties.insert(e.id, e);
            }
            Record::Room(e) => {
                self.rooms.insert(e.id, e);
            }
            Record::Container(e) => {
                self.containers.insert(e.id, e);
            }
            Record::Item(e) => {
                self.items.insert(e.id, e);
            }
            Record::Category(e) => {
                self.categories.insert(e.id, e);
            }
            Record::Tag(e) => {
                self.tags.insert(e.id, e);
            }
            Record::Photo(e) => {
                self.photos.insert(e.id, e);
            }
            Record::Receipt(e) => {
                self.receipts.insert(e.id, e);
            }
        }
    }

    fn remove(&mut self, entity: EntityRef) {
        let id = &entity.id;
        match entity.kind {
            EntityKind::Property => {
                self.properties.remove(id);
            }
            EntityKind::Room => {
                self.rooms.remove(id);
            }
            EntityKind::Container => {
                self.containers.remove(id);
            }
            EntityKind::Item => {
                self.items.remove(id);
            }
            EntityKind::Category => {
                self.categories.remove(id);
            }
            EntityKind::Tag => {
                self.tags.remove(id);
            }
            EntityKind::Photo => {
                self.photos.remove(id);
            }
            EntityKind::Receipt => {
                self.receipts.remove(id);
            }
        }
    }

    /// The outgoing references of a record, as (field, target) pairs.
    fn references(record: &Record) -> Vec<(&'static str, EntityRef)> {
        let mut refs = Vec::new();
        match record {
            Record::Room(room) => {
                if let Some(id) = room.property_id {
                    refs.push(("propertyId", EntityRef::new(EntityKind::Property, id)));
                }
            }
            Record::Container(container) => {
                if let Some(id) = container.room_id {
                    refs.push(("roomId", EntityRef::new(EntityKind::Room, id)));
                }
            }
            Record::Item(item) => {
                if let Some(id) = item.category_id {
                    refs.push(("categoryId", EntityRef::new(EntityKind::Category, id)));
                }
                if let Some(id) = item.room_id {
                    refs.push(("roomId", EntityRef::new(EntityKind::Room, id)));
                }
                if let Some(id) = item.container_id {
                    refs.push(("containerId", EntityRef::new(EntityKind::Container, id)));
                }
                for id in &item.tag_ids {
                    refs.push(("tagIds", EntityRef::new(EntityKind::Tag, *id)));
                }
            }
            Record::Photo(photo) => {
                refs.push(("itemId", EntityRef::new(EntityKind::Item, photo.item_id)));
            }
            Record::Receipt(receipt) => {
                if let Some(id) = receipt.item_id {
                    refs.push(("itemId", EntityRef::new(EntityKind::Item, id)));
                }
            }
            Record::Property(_) | Record::Category(_) | Record::Tag(_) => {}
        }
        refs
    }

    fn ensure_references(&self, record: &Record) -> AppResult<()> {
        for (field, target) in Self::references(record) {
            if !self.contains_ref(target) {
                return Err(AppError::new(
                    INTEGRITY_DANGLING_REFERENCE,
                    format!("{field} points at a {} that does not exist", target.kind),
                )
                .with_context("entity", record.entity_ref().to_string())
                .with_context("field", field)
                .with_context("missing", target.to_string()));
            }
        }
        Ok(())
    }

    /// Add a new entity. Validation and reference checks run before the
    /// graph is touched.
    pub fn insert(&mut self, record: impl Into<Record>) -> AppResult<EntityId> {
        let record = record.into();
        validate_record(&record)?;
        let id = record.id();
        if self.is_retired(id) {
            return Err(
                AppError::new(INTEGRITY_ID_RETIRED, "Identifier belonged to a deleted entity")
                    .with_context("id", id.to_string()),
            );
        }
        if self.contains(id) {
            return Err(
                AppError::new(INTEGRITY_ID_IN_USE, "Identifier is already in use")
                    .with_context("id", id.to_string()),
            );
        }
        self.ensure_references(&record)?;
        self.put(record);
        Ok(id)
    }

    /// Replace an existing entity's fields and bump `updated_at`.
    /// `created_at` always comes from the stored entity.
    pub fn update(&mut self, record: impl Into<Record>) -> AppResult<()> {
        let mut record = record.into();
        validate_record(&record)?;
        let entity = record.entity_ref();
        let existing = self.record(entity).ok_or_else(|| {
            AppError::new(GRAPH_NOT_FOUND, format!("No {} with that id", entity.kind))
                .with_context("entity", entity.to_string())
        })?;
        self.ensure_references(&record)?;
        let now = now_ms().max(existing.updated_at() + 1);
        record.set_timestamps(existing.created_at(), now);
        self.put(record);
        Ok(())
    }

    /// Work out the cascade/nullify closure of deleting `target` without
    /// changing anything.
    pub fn plan_delete(&self, target: EntityRef) -> AppResult<DeletePlan> {
        if !self.contains_ref(target) {
            return Err(
                AppError::new(GRAPH_NOT_FOUND, format!("No {} with that id", target.kind))
                    .with_context("entity", target.to_string()),
            );
        }
        let mut plan = DeletePlan {
            target,
            removed: Vec::new(),
            nullified: Vec::new(),
        };
        self.collect_delete(target, &mut plan);
        Ok(plan)
    }

    fn collect_delete(&self, target: EntityRef, plan: &mut DeletePlan) {
        let id = target.id;
        match target.kind {
            EntityKind::Property => {
                for room in self.rooms.values().filter(|r| r.property_id == Some(id)) {
                    self.collect_delete(EntityRef::new(EntityKind::Room, room.id), plan);
                }
            }
            EntityKind::Room => {
                for container in self.containers.values().filter(|c| c.room_id == Some(id)) {
                    self.collect_delete(EntityRef::new(EntityKind::Container, container.id), plan);
                }
                for item in self.items.values().filter(|i| i.room_id == Some(id)) {
                    plan.nullified.push(Nullified {
                        entity: EntityRef::new(EntityKind::Item, item.id),
                        field: "roomId",
                        value: id,
                    });
                }
            }
            EntityKind::Container => {
                for item in self.items.values().filter(|i| i.container_id == Some(id)) {
                    plan.nullified.push(Nullified {
                        entity: EntityRef::new(EntityKind::Item, item.id),
                        field: "containerId",
                        value: id,
                    });
                }
            }
            EntityKind::Item => {
                for photo in self.photos.values().filter(|p| p.item_id == id) {
                    plan.removed.push(EntityRef::new(EntityKind::Photo, photo.id));
                }
                for receipt in self.receipts.values().filter(|r| r.item_id == Some(id)) {
                    plan.nullified.push(Nullified {
                        entity: EntityRef::new(EntityKind::Receipt, receipt.id),
                        field: "itemId",
                        value: id,
                    });
                }
            }
            EntityKind::Category => {
                for item in self.items.values().filter(|i| i.category_id == Some(id)) {
                    plan.nullified.push(Nullified {
                        entity: EntityRef::new(EntityKind::Item, item.id),
                        field: "categoryId",
                        value: id,
                    });
                }
            }
            EntityKind::Tag => {
                for item in self.items.values().filter(|i| i.tag_ids.contains(&id)) {
                    plan.nullified.push(Nullified {
                        entity: EntityRef::new(EntityKind::Item, item.id),
                        field: "tagIds",
                        value: id,
                    });
                }
            }
            EntityKind::Photo | EntityKind::Receipt => {}
        }
        plan.removed.push(target);
    }

    /// Apply a plan produced by [`Graph::plan_delete`] on this graph.
    /// Nullified entities keep every other field, `updated_at` included.
    pub fn apply_delete(&mut self, plan: &DeletePlan) {
        for cleared in &plan.nullified {
            let id = cleared.entity.id;
            match (cleared.entity.kind, cleared.field) {
                (EntityKind::Item, field) => {
                    if let Some(item) = self.items.get_mut(&id) {
                        match field {
                            "roomId" => item.room_id = None,
                            "containerId" => item.container_id = None,
                            "categoryId" => item.category_id = None,
                            "tagIds" => {
                                item.tag_ids.remove(&cleared.value);
                            }
                            _ => {}
                        }
                    }
                }
                (EntityKind::Receipt, _) => {
                    if let Some(receipt) = self.receipts.get_mut(&id) {
                        receipt.item_id = None;
                    }
                }
                _ => {}
            }
        }
        for removed in &plan.removed {
            self.remove(*removed);
            self.retired.insert(removed.id);
        }
    }

    pub fn delete(&mut self, target: EntityRef) -> AppResult<DeletePlan> {
        let plan = self.plan_delete(target)?;
        self.apply_delete(&plan);
        Ok(plan)
    }

    pub fn check_integrity(&self) -> Vec<IntegrityIssue> {
        let mut issues = Vec::new();
        for record in self.records() {
            for (field, target) in Self::references(&record) {
                if !self.contains_ref(target) {
                    issues.push(IntegrityIssue {
                        entity: record.entity_ref(),
                        field,
                        missing: target,
                    });
                }
            }
        }
        issues
    }

    pub fn ensure_integrity(&self) -> AppResult<()> {
        let issues = self.check_integrity();
        match issues.first() {
            None => Ok(()),
            Some(first) => Err(AppError::new(
                INTEGRITY_DANGLING_REFERENCE,
                format!("{} reference(s) point at missing entities", issues.len()),
            )
            .with_context("entity", first.entity.to_string())
            .with_context("field", first.field)
            .with_context("missing", first.missing.to_string())),
        }
    }

    pub fn rooms_in(&self, property_id: EntityId) -> Vec<&Room> {
        self.select(
            |r: &Room| r.property_id == Some(property_id),
            |a, b| a.sort_order.cmp(&b.sort_order).then_with(|| a.name.cmp(&b.name)),
        )
    }

    pub fn containers_in(&self, room_id: EntityId) -> Vec<&Container> {
        self.select(
            |c: &Container| c.room_id == Some(room_id),
            |a, b| a.sort_order.cmp(&b.sort_order).then_with(|| a.name.cmp(&b.name)),
        )
    }

    pub fn items_in_room(&self, room_id: EntityId) -> Vec<&Item> {
        self.items.values().filter(|i| i.room_id == Some(room_id)).collect()
    }

    pub fn items_in_container(&self, container_id: EntityId) -> Vec<&Item> {
        self.items
            .values()
            .filter(|i| i.container_id == Some(container_id))
            .collect()
    }

    pub fn items_in_category(&self, category_id: EntityId) -> Vec<&Item> {
        self.items
            .values()
            .filter(|i| i.category_id == Some(category_id))
            .collect()
    }

    pub fn photos_of(&self, item_id: EntityId) -> Vec<&ItemPhoto> {
        self.select(
            |p: &ItemPhoto| p.item_id == item_id,
            |a, b| a.sort_order.cmp(&b.sort_order).then_with(|| a.id.cmp(&b.id)),
        )
    }

    pub fn receipts_of(&self, item_id: EntityId) -> Vec<&Receipt> {
        self.receipts
            .values()
            .filter(|r| r.item_id == Some(item_id))
            .collect()
    }

    pub fn default_property(&self) -> Option<&Property> {
        self.properties.values().find(|p| p.is_default)
    }

    pub fn items_matching(&self, query: &ItemQuery) -> Vec<&Item> {
        let mut facts: HashMap<EntityId, ItemFacts> = HashMap::new();
        let needs_facts = query.documented.is_some() || query.sort == ItemSort::DocumentationScore;
        if needs_facts {
            for item in self.items.values() {
                facts.insert(item.id, ItemFacts::for_item(self, item));
            }
        }

        let mut selected: Vec<&Item> = self
            .items
            .values()
            .filter(|i| query.category_id.map_or(true, |id| i.category_id == Some(id)))
            .filter(|i| query.room_id.map_or(true, |id| i.room_id == Some(id)))
            .filter(|i| query.container_id.map_or(true, |id| i.container_id == Some(id)))
            .filter(|i| query.tag_id.map_or(true, |id| i.tag_ids.contains(&id)))
            .filter(|i| {
                query
                    .search
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map_or(true, |s| matches_search(i, s))
            })
            .filter(|i| {
                query.documented.map_or(true, |wanted| {
                    facts
                        .get(&i.id)
                        .is_some_and(|f| scoring::is_documented(f) == wanted)
                })
            })
            .collect();

        selected.sort_by(|a, b| {
            let ordering = match query.sort {
                ItemSort::Name => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
                ItemSort::PurchasePrice => none_last(a.purchase_price, b.purchase_price),
                ItemSort::PurchaseDate => none_last(a.purchase_date, b.purchase_date),
                ItemSort::CreatedAt => a.created_at.cmp(&b.created_at),
                ItemSort::UpdatedAt => a.updated_at.cmp(&b.updated_at),
                ItemSort::DocumentationScore => {
                    let score = |item: &Item| {
                        facts
                            .get(&item.id)
                            .map(|f| scoring::score(f).value)
                            .unwrap_or(0.0)
                    };
                    score(*a).total_cmp(&score(*b))
                }
            };
            let ordering = ordering.then_with(|| a.id.cmp(&b.id));
            if query.descending {
                ordering.reverse()
            } else {
                ordering
            }
        });

        let limit = query.limit.unwrap_or(usize::MAX);
        selected.into_iter().skip(query.offset).take(limit).collect()
    }

    /// Materialize a property and, depending on `prefetch`, its descendants
    /// in a single pass over the arena.
    pub fn property_tree(&self, property_id: EntityId, prefetch: Prefetch) -> Option<PropertyTree<'_>> {
        let property = self.properties.get(&property_id)?;
        if prefetch == Prefetch::None {
            return Some(PropertyTree {
                property,
                rooms: Vec::new(),
            });
        }

        let rooms = self.rooms_in(property_id);
        if prefetch == Prefetch::Rooms {
            return Some(PropertyTree {
                property,
                rooms: rooms
                    .into_iter()
                    .map(|room| RoomTree {
                        room,
                        containers: Vec::new(),
                        loose_items: Vec::new(),
                    })
                    .collect(),
            });
        }

        let room_ids: BTreeSet<EntityId> = rooms.iter().map(|r| r.id).collect();
        let mut containers_by_room: HashMap<EntityId, Vec<&Container>> = HashMap::new();
        for container in self.containers.values() {
            if let Some(room_id) = container.room_id.filter(|id| room_ids.contains(id)) {
                containers_by_room.entry(room_id).or_default().push(container);
            }
        }
        let container_ids: BTreeSet<EntityId> = containers_by_room
            .values()
            .flatten()
            .map(|c| c.id)
            .collect();

        let mut items_by_container: HashMap<EntityId, Vec<&Item>> = HashMap::new();
        let mut loose_by_room: HashMap<EntityId, Vec<&Item>> = HashMap::new();
        for item in self.items.values() {
            match item.container_id.filter(|id| container_ids.contains(id)) {
                Some(container_id) => items_by_container.entry(container_id).or_default().push(item),
                None => {
                    if let Some(room_id) = item.room_id.filter(|id| room_ids.contains(id)) {
                        loose_by_room.entry(room_id).or_default().push(item);
                    }
                }
            }
        }

        let rooms = rooms
            .into_iter()
            .map(|room| {
                let mut containers = containers_by_room.remove(&room.id).unwrap_or_default();
                containers.sort_by(|a, b| a.sort_order.cmp(&b.sort_order).then_with(|| a.name.cmp(&b.name)));
                RoomTree {
                    room,
                    containers: containers
                        .into_iter()
                        .map(|container| ContainerTree {
                            container,
                            items: items_by_container.remove(&container.id).unwrap_or_default(),
                        })
                        .collect(),
                    loose_items: loose_by_room.remove(&room.id).unwrap_or_default(),
                }
            })
            .collect();

        Some(PropertyTree { property, rooms })
    }
}
