use anyhow::Result;
use hearthledger_lib::config::LedgerConfig;
use hearthledger_lib::graph::Graph;
use hearthledger_lib::migrate::MigrationRegistry;
use hearthledger_lib::model::{Container, EntityKind, EntityRef, Item, Property, Room};
use hearthledger_lib::store::Store;
use tempfile::tempdir;

const ROOMS: usize = 4;
const CONTAINERS_PER_ROOM: usize = 3;
const ITEMS_PER_CONTAINER: usize = 2;

async fn seed(store: &Store) -> Result<hearthledger_lib::id::EntityId> {
    let property = store
        .commit(|graph: &mut Graph| {
            let property = graph.insert(Property::new("Lake house"))?;
            for r in 0..ROOMS {
                let room = graph.insert(Room::new(format!("Room {r}")).in_property(property))?;
                for c in 0..CONTAINERS_PER_ROOM {
                    let container =
                        graph.insert(Container::new(format!("Box {r}.{c}")).in_room(room))?;
                    for i in 0..ITEMS_PER_CONTAINER {
                        let mut item = Item::new(format!("Thing {r}.{c}.{i}"));
                        item.room_id = Some(room);
                        item.container_id = Some(container);
                        graph.insert(item)?;
                    }
                }
            }
            Ok(property)
        })
        .await?;
    Ok(property)
}

#[tokio::test]
async fn deleting_property_cascades_rooms_and_containers_but_keeps_items() -> Result<()> {
    let dir = tempdir()?;
    let config = LedgerConfig::with_data_dir(dir.path());
    let registry = MigrationRegistry::standard();
    let store = Store::open(&config, &registry).await?;
    let property = seed(&store).await?;

    let plan = store
        .delete(EntityRef::new(EntityKind::Property, property))
        .await?;
    assert_eq!(plan.removed_count(EntityKind::Room), ROOMS);
    assert_eq!(
        plan.removed_count(EntityKind::Container),
        ROOMS * CONTAINERS_PER_ROOM
    );
    assert_eq!(plan.removed.last(), Some(&plan.target));

    let items = ROOMS * CONTAINERS_PER_ROOM * ITEMS_PER_CONTAINER;
    let graph = store.snapshot();
    assert_eq!(graph.count(EntityKind::Item), items);
    assert!(graph
        .all::<Item>()
        .all(|item| item.room_id.is_none() && item.container_id.is_none()));
    assert!(graph.check_integrity().is_empty());
    drop(store);

    // The on-disk state matches what was published.
    let reopened = Store::open(&config, &registry).await?;
    let persisted = reopened.snapshot();
    assert_eq!(persisted.count(EntityKind::Property), 0);
    assert_eq!(persisted.count(EntityKind::Room), 0);
    assert_eq!(persisted.count(EntityKind::Container), 0);
    assert_eq!(persisted.count(EntityKind::Item), items);
    assert!(persisted.is_retired(property));
    Ok(())
}

#[tokio::test]
async fn deleting_room_keeps_sibling_rooms_intact() -> Result<()> {
    let store = Store::open_in_memory(&MigrationRegistry::standard()).await?;
    let property = seed(&store).await?;
    let graph = store.snapshot();
    let rooms = graph.rooms_in(property);
    let (doomed, survivor) = (rooms[0].id, rooms[1].id);
    let survivor_items = graph.items_in_room(survivor).len();

    store.delete(EntityRef::new(EntityKind::Room, doomed)).await?;
    let graph = store.snapshot();
    assert_eq!(graph.rooms_in(property).len(), ROOMS - 1);
    assert_eq!(graph.containers_in(survivor).len(), CONTAINERS_PER_ROOM);
    assert_eq!(graph.items_in_room(survivor).len(), survivor_items);
    assert!(graph.containers_in(doomed).is_empty());
    Ok(())
}

#[tokio::test]
async fn readers_see_whole_commits_only() -> Result<()> {
    let store = Store::open_in_memory(&MigrationRegistry::standard()).await?;
    let before = store.snapshot();
    seed(&store).await?;
    assert!(before.is_empty());
    let after = store.snapshot();
    assert_eq!(after.count(EntityKind::Room), ROOMS);
    assert_eq!(
        after.count(EntityKind::Item),
        ROOMS * CONTAINERS_PER_ROOM * ITEMS_PER_CONTAINER
    );
    Ok(())
}
