use crate::graph::Graph;
use crate::model::{Category, Container, Item, Room, Tag};
use crate::scoring::score_item;
use crate::{AppError, AppResult};

pub const TABULAR_HEADER: [&str; 13] = [
    "Name",
    "Brand",
    "Model",
    "Serial Number",
    "Category",
    "Room",
    "Container",
    "Condition",
    "Purchase Price",
    "Currency",
    "Purchase Date",
    "Tags",
    "Documentation Score",
];

const TAG_DELIMITER: &str = "; ";

fn tag_list(graph: &Graph, item: &Item) -> String {
    let mut names: Vec<String> = item
        .tag_ids
        .iter()
        .filter_map(|id| graph.get::<Tag>(*id))
        .map(|tag| tag.name.clone())
        .collect();
    for legacy in &item.tags {
        let legacy = legacy.trim();
        if !legacy.is_empty() && !names.iter().any(|n| n.eq_ignore_ascii_case(legacy)) {
            names.push(legacy.to_string());
        }
    }
    names.join(TAG_DELIMITER)
}

fn item_row(graph: &Graph, item: &Item) -> [String; 13] {
    let name_of = |name: Option<&String>| name.cloned().unwrap_or_default();
    [
        item.name.clone(),
        item.brand.clone().unwrap_or_default(),
        item.model_number.clone().unwrap_or_default(),
        item.serial().unwrap_or_default().to_string(),
        name_of(
            item.category_id
                .and_then(|id| graph.get::<Category>(id))
                .map(|c| &c.name),
        ),
        name_of(item.room_id.and_then(|id| graph.get::<Room>(id)).map(|r| &r.name)),
        name_of(
            item.container_id
                .and_then(|id| graph.get::<Container>(id))
                .map(|c| &c.name),
        ),
        item.condition.label().to_string(),
        item.purchase_price.map(|p| p.to_string()).unwrap_or_default(),
        item.currency_code.clone(),
        item.purchase_date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default(),
        tag_list(graph, item),
        format!("{:.2}", score_item(graph, item).value),
    ]
}

/// One row per item, sorted by name. Lossy; there is no import path back.
pub fn write_tabular(graph: &Graph) -> AppResult<Vec<u8>> {
    let mut items: Vec<&Item> = graph.all::<Item>().collect();
    items.sort_by(|a, b| {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(TABULAR_HEADER)?;
    for item in items {
        writer.write_record(item_row(graph, item))?;
    }
    writer.flush()?;
    writer
        .into_inner()
        .map_err(|err| AppError::from(err.into_error()))
}
