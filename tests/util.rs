#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use hearthledger_lib::graph::Graph;
use hearthledger_lib::id::EntityId;
use hearthledger_lib::migrate::MigrationRegistry;
use std::collections::BTreeMap;

use chrono::NaiveDate;
use hearthledger_lib::model::{
    Category, Condition, Container, EntityKind, Item, ItemPhoto, OcrResult, Property, Receipt,
    Room, Tag,
};
use serde_json::Value;
use hearthledger_lib::store::Store;

pub async fn memory_store() -> Store {
    Store::open_in_memory(&MigrationRegistry::standard())
        .await
        .expect("open in-memory store")
}

pub struct Household {
    pub property: EntityId,
    pub room: EntityId,
    pub category: EntityId,
    pub item: EntityId,
}

/// A property with one room, one category and one fully documented item.
pub fn household(graph: &mut Graph) -> Household {
    let mut home = Property::new("Maple Street");
    home.is_default = true;
    let property = graph.insert(home).unwrap();
    let room = graph.insert(Room::new("Living Room").in_property(property)).unwrap();
    let category = graph.insert(Category::new("Electronics")).unwrap();

    let mut tv = Item::new("Television");
    tv.purchase_price = Some("1299.00".parse().unwrap());
    tv.room_id = Some(room);
    tv.category_id = Some(category);
    let item = graph.insert(tv).unwrap();
    graph.insert(ItemPhoto::new(item, "photos/tv-front.jpg")).unwrap();

    Household {
        property,
        room,
        category,
        item,
    }
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Every entity kind, every relationship, and most optional item fields.
pub fn furnished_household(graph: &mut Graph) -> Household {
    let ids = household(graph);

    let mut cabin = Property::new("Lake Cabin");
    cabin.address = Some("1 Shore Road".into());
    cabin.color_hex = "#336699".into();
    let cabin = graph.insert(cabin).unwrap();
    let mut porch = Room::new("Porch").in_property(cabin);
    porch.notes = "Screened".into();
    let porch = graph.insert(porch).unwrap();
    let chest = graph.insert(Container::new("Cedar Chest").in_room(porch)).unwrap();
    let outdoor = graph.insert(Category::new("Outdoor")).unwrap();

    let mut insured = Tag::new("Insured");
    insured.is_favorite = true;
    let insured = graph.insert(insured).unwrap();
    let gift = graph.insert(Tag::new("Gift")).unwrap();

    let mut kayak = Item::new("Kayak");
    kayak.brand = Some("Perception".into());
    kayak.model_number = Some("Pescador 10".into());
    kayak.serial_number = Some("PX-2291".into());
    kayak.barcode = Some("0123456789012".into());
    kayak.quantity = 2;
    kayak.purchase_price = Some("649.50".parse().unwrap());
    kayak.purchase_date = Some(date(2022, 6, 14));
    kayak.currency_code = "EUR".into();
    kayak.condition = Condition::LikeNew;
    kayak.condition_notes = "Scuff on hull".into();
    kayak.notes = "Stored for winter".into();
    kayak.warranty_expiry_date = Some(date(2025, 6, 14));
    kayak.tags = vec!["summer".into()];
    kayak.tag_ids = [insured, gift].into_iter().collect();
    kayak.estimated_value = Some("500.00".parse().unwrap());
    kayak.estimated_value_low = Some("420.00".parse().unwrap());
    kayak.estimated_value_high = Some("560.00".parse().unwrap());
    kayak.value_source = Some("marketplace".into());
    kayak.value_lookup_date = Some(date(2024, 3, 1));
    kayak.category_id = Some(outdoor);
    kayak.room_id = Some(porch);
    kayak.container_id = Some(chest);
    let kayak = graph.insert(kayak).unwrap();

    graph.insert(ItemPhoto::new(kayak, "photos/kayak.jpg")).unwrap();
    let receipt = Receipt::from_ocr(OcrResult {
        vendor: Some("Harbor Outfitters".into()),
        total: Some("1299.00".parse().unwrap()),
        tax_amount: Some("99.00".parse().unwrap()),
        purchase_date: Some(date(2022, 6, 14)),
        raw_text: "HARBOR OUTFITTERS\nKAYAK x2".into(),
        confidence: 0.5,
    })
    .for_item(kayak);
    graph.insert(receipt).unwrap();

    ids
}

fn natural_key(kind: EntityKind, body: &Value) -> String {
    let name = ["name", "imageRef", "vendor"]
        .iter()
        .find_map(|field| body.get(*field).and_then(Value::as_str))
        .unwrap_or_default();
    format!("{kind}:{name}")
}

fn replace_ids(value: &mut Value, keys: &BTreeMap<String, String>) {
    match value {
        Value::String(s) => {
            if let Some(key) = keys.get(s.as_str()) {
                *s = key.clone();
            }
        }
        Value::Array(values) => {
            for v in values.iter_mut() {
                replace_ids(v, keys);
            }
            values.sort_by_key(|v| v.to_string());
        }
        Value::Object(map) => {
            for v in map.values_mut() {
                replace_ids(v, keys);
            }
        }
        _ => {}
    }
}

/// Every entity as JSON with its own id dropped and every reference
/// rewritten to the target's natural key, grouped by kind.
pub fn canonical(graph: &Graph) -> BTreeMap<EntityKind, Vec<String>> {
    let bodies: Vec<(EntityKind, String, Value)> = graph
        .records()
        .into_iter()
        .map(|record| {
            let body: Value = serde_json::from_str(&record.body_json().unwrap()).unwrap();
            (record.kind(), record.id().to_string(), body)
        })
        .collect();
    let keys: BTreeMap<String, String> = bodies
        .iter()
        .map(|(kind, id, body)| (id.clone(), natural_key(*kind, body)))
        .collect();

    let mut out: BTreeMap<EntityKind, Vec<String>> = BTreeMap::new();
    for (kind, _, mut body) in bodies {
        if let Value::Object(map) = &mut body {
            map.remove("id");
        }
        replace_ids(&mut body, &keys);
        out.entry(kind).or_default().push(body.to_string());
    }
    for entries in out.values_mut() {
        entries.sort();
    }
    out
}
