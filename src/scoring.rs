//! Documentation completeness scoring.
//!
//! The score is never stored; it is recomputed from the graph on every read.
//! Weights are kept in integer hundredths so that every combination of the
//! six facts lands exactly on its weighted sum.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::graph::{Graph, Prefetch};
use crate::id::EntityId;
use crate::model::Item;

/// The six facts the score is built from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemFacts {
    pub has_photo: bool,
    pub has_value: bool,
    pub has_room: bool,
    pub has_category: bool,
    pub has_receipt: bool,
    pub has_serial: bool,
}

impl ItemFacts {
    pub fn for_item(graph: &Graph, item: &Item) -> Self {
        Self {
            has_photo: !graph.photos_of(item.id).is_empty(),
            has_value: item.purchase_price.is_some(),
            has_room: item.room_id.is_some(),
            has_category: item.category_id.is_some(),
            has_receipt: !graph.receipts_of(item.id).is_empty(),
            has_serial: item.serial().is_some(),
        }
    }

    /// Weight-descending (present, points, label) triples.
    fn weighted(&self) -> [(bool, u32, &'static str); 6] {
        [
            (self.has_photo, 30, "Photo"),
            (self.has_value, 25, "Value"),
            (self.has_room, 15, "Room"),
            (self.has_category, 10, "Category"),
            (self.has_receipt, 10, "Receipt"),
            (self.has_serial, 10, "Serial Number"),
        ]
    }

    fn points(&self) -> u32 {
        self.weighted()
            .iter()
            .filter(|(present, _, _)| *present)
            .map(|(_, points, _)| points)
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentationScore {
    /// In `[0.0, 1.0]`.
    pub value: f64,
    pub missing: Vec<&'static str>,
}

pub fn score(facts: &ItemFacts) -> DocumentationScore {
    DocumentationScore {
        value: f64::from(facts.points()) / 100.0,
        missing: facts
            .weighted()
            .iter()
            .filter(|(present, _, _)| !present)
            .map(|(_, _, label)| *label)
            .collect(),
    }
}

/// Photo, value, category and room all present. Receipt and serial do not
/// count, whatever the score says.
pub fn is_documented(facts: &ItemFacts) -> bool {
    facts.has_photo && facts.has_value && facts.has_category && facts.has_room
}

pub fn score_item(graph: &Graph, item: &Item) -> DocumentationScore {
    score(&ItemFacts::for_item(graph, item))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Rollup {
    pub item_count: usize,
    #[serde(with = "rust_decimal::serde::str")]
    pub total_value: Decimal,
    pub average_score: f64,
    pub documented_count: usize,
}

/// Reduce a set of items. An empty set is zero value and a zero score.
pub fn rollup<'a>(graph: &Graph, items: impl IntoIterator<Item = &'a Item>) -> Rollup {
    let mut item_count = 0usize;
    let mut total_value = Decimal::ZERO;
    let mut total_points = 0u64;
    let mut documented_count = 0usize;
    for item in items {
        let facts = ItemFacts::for_item(graph, item);
        item_count += 1;
        total_value += item.purchase_price.unwrap_or_default();
        total_points += u64::from(facts.points());
        if is_documented(&facts) {
            documented_count += 1;
        }
    }
    let average_score = if item_count == 0 {
        0.0
    } else {
        total_points as f64 / (item_count as f64 * 100.0)
    };
    Rollup {
        item_count,
        total_value,
        average_score,
        documented_count,
    }
}

pub fn room_rollup(graph: &Graph, room_id: EntityId) -> Rollup {
    rollup(graph, graph.items_in_room(room_id))
}

pub fn container_rollup(graph: &Graph, container_id: EntityId) -> Rollup {
    rollup(graph, graph.items_in_container(container_id))
}

/// `None` when the property does not exist.
pub fn property_rollup(graph: &Graph, property_id: EntityId) -> Option<Rollup> {
    let tree = graph.property_tree(property_id, Prefetch::Full)?;
    Some(rollup(graph, tree.items()))
}

pub fn ledger_rollup(graph: &Graph) -> Rollup {
    rollup(graph, graph.all::<Item>())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportLine {
    pub item_id: EntityId,
    pub name: String,
    pub score: f64,
    pub missing: Vec<&'static str>,
}

/// Undocumented items, least documented first.
pub fn documentation_report(graph: &Graph) -> Vec<ReportLine> {
    let mut lines: Vec<ReportLine> = graph
        .all::<Item>()
        .filter_map(|item| {
            let facts = ItemFacts::for_item(graph, item);
            if is_documented(&facts) {
                return None;
            }
            let DocumentationScore { value, missing } = score(&facts);
            Some(ReportLine {
                item_id: item.id,
                name: item.name.clone(),
                score: value,
                missing,
            })
        })
        .collect();
    lines.sort_by(|a, b| {
        a.score
            .total_cmp(&b.score)
            .then_with(|| a.name.cmp(&b.name))
    });
    lines
}
