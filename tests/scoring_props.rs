use hearthledger_lib::graph::Graph;
use hearthledger_lib::model::{Category, Item, ItemPhoto, OcrResult, Receipt, Room};
use hearthledger_lib::scoring::{
    documentation_report, is_documented, ledger_rollup, score, score_item, ItemFacts,
};
use proptest::prelude::*;

fn facts() -> impl Strategy<Value = ItemFacts> {
    any::<[bool; 6]>().prop_map(|f| ItemFacts {
        has_photo: f[0],
        has_value: f[1],
        has_room: f[2],
        has_category: f[3],
        has_receipt: f[4],
        has_serial: f[5],
    })
}

fn build(graph: &mut Graph, facts: &ItemFacts, name: &str) -> Item {
    let mut item = Item::new(name);
    if facts.has_value {
        item.purchase_price = Some("10.00".parse().unwrap());
    }
    if facts.has_room {
        item.room_id = Some(graph.insert(Room::new(format!("{name} room"))).unwrap());
    }
    if facts.has_category {
        item.category_id = Some(graph.insert(Category::new(format!("{name} cat"))).unwrap());
    }
    if facts.has_serial {
        item.serial_number = Some("SN-1".into());
    }
    let id = graph.insert(item).unwrap();
    if facts.has_photo {
        graph.insert(ItemPhoto::new(id, format!("{name}.jpg"))).unwrap();
    }
    if facts.has_receipt {
        graph
            .insert(Receipt::from_ocr(OcrResult::default()).for_item(id))
            .unwrap();
    }
    graph.get::<Item>(id).cloned().unwrap()
}

proptest! {
    #[test]
    fn score_is_bounded_and_lists_what_is_missing(f in facts()) {
        let s = score(&f);
        prop_assert!((0.0..=1.0).contains(&s.value));
        let present = [f.has_photo, f.has_value, f.has_room, f.has_category, f.has_receipt, f.has_serial]
            .iter()
            .filter(|p| **p)
            .count();
        prop_assert_eq!(s.missing.len(), 6 - present);
        prop_assert_eq!(s.value == 1.0, s.missing.is_empty());
    }

    #[test]
    fn documented_items_score_at_least_eighty(f in facts()) {
        if is_documented(&f) {
            prop_assert!(score(&f).value >= 0.8);
        }
    }

    #[test]
    fn adding_a_fact_never_lowers_the_score(f in facts(), idx in 0usize..6) {
        let mut more = f;
        match idx {
            0 => more.has_photo = true,
            1 => more.has_value = true,
            2 => more.has_room = true,
            3 => more.has_category = true,
            4 => more.has_receipt = true,
            _ => more.has_serial = true,
        }
        prop_assert!(score(&more).value >= score(&f).value);
    }

    #[test]
    fn graph_derived_facts_match_construction(f in facts()) {
        let mut graph = Graph::new();
        let item = build(&mut graph, &f, "thing");
        prop_assert_eq!(ItemFacts::for_item(&graph, &item), f);
        prop_assert_eq!(score_item(&graph, &item), score(&f));
    }
}

#[test]
fn macbook_scores_eighty_and_is_documented() {
    let mut graph = Graph::new();
    let facts = ItemFacts {
        has_photo: true,
        has_value: true,
        has_room: true,
        has_category: true,
        has_receipt: false,
        has_serial: false,
    };
    let macbook = build(&mut graph, &facts, "MacBook Pro");
    let s = score_item(&graph, &macbook);
    assert_eq!(s.value, 0.80);
    assert_eq!(s.missing, vec!["Receipt", "Serial Number"]);
    assert!(is_documented(&facts));
    assert!(documentation_report(&graph).is_empty());
}

#[test]
fn rollup_sums_prices_and_averages_scores() {
    let mut graph = Graph::new();
    let full = ItemFacts {
        has_photo: true,
        has_value: true,
        has_room: true,
        has_category: true,
        has_receipt: true,
        has_serial: true,
    };
    build(&mut graph, &full, "a");
    build(&mut graph, &ItemFacts::default(), "b");
    let rollup = ledger_rollup(&graph);
    assert_eq!(rollup.item_count, 2);
    assert_eq!(rollup.total_value.to_string(), "10.00");
    assert_eq!(rollup.average_score, 0.5);
    assert_eq!(rollup.documented_count, 1);

    let report = documentation_report(&graph);
    assert_eq!(report.len(), 1);
    assert_eq!(report[0].name, "b");
    assert_eq!(report[0].score, 0.0);
}
