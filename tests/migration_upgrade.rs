use anyhow::Result;
use hearthledger_lib::config::LedgerConfig;
use hearthledger_lib::db::{self, Changeset};
use hearthledger_lib::graph::Graph;
use hearthledger_lib::migrate::{
    MigrationRegistry, MigrationStage, SchemaVersion, CURRENT_SCHEMA_VERSION,
    MIGRATION_MISSING_STAGE, MIGRATION_NEWER_THAN_SUPPORTED, V1_INITIAL,
};
use hearthledger_lib::model::{EntityKind, Item, Property, Room, DEFAULT_PROPERTY_NAME};
use hearthledger_lib::store::Store;
use tempfile::tempdir;

fn legacy_graph() -> Graph {
    let mut graph = Graph::new();
    let kitchen = graph.insert(Room::new("Kitchen")).unwrap();
    graph.insert(Room::new("Bedroom")).unwrap();
    let mut mixer = Item::new("Stand mixer");
    mixer.room_id = Some(kitchen);
    graph.insert(mixer).unwrap();
    graph
}

async fn write_store(config: &LedgerConfig, graph: &Graph, version: u32) -> Result<()> {
    let pool = db::open_sqlite_pool(&config.db_path()).await?;
    db::commit_changeset(&pool, Changeset::full(graph)?, Some(version)).await?;
    pool.close().await;
    Ok(())
}

#[tokio::test]
async fn v1_store_gains_default_property_on_open() -> Result<()> {
    let dir = tempdir()?;
    let config = LedgerConfig::with_data_dir(dir.path());
    let legacy = legacy_graph();
    write_store(&config, &legacy, V1_INITIAL).await?;

    let registry = MigrationRegistry::standard();
    let store = Store::open(&config, &registry).await?;
    assert_eq!(store.schema_version(), CURRENT_SCHEMA_VERSION);

    let graph = store.snapshot();
    let home = graph.default_property().expect("default property created");
    assert_eq!(home.name, DEFAULT_PROPERTY_NAME);
    assert!(graph.all::<Room>().all(|r| r.property_id == Some(home.id)));
    assert_eq!(graph.count(EntityKind::Item), 1);
    let mixer = graph.all::<Item>().next().unwrap();
    assert_eq!(mixer, legacy.get::<Item>(mixer.id).unwrap());
    drop(store);

    let pool = db::open_sqlite_pool(&config.db_path()).await?;
    assert_eq!(db::schema_version(&pool).await?, Some(CURRENT_SCHEMA_VERSION));
    pool.close().await;
    Ok(())
}

#[tokio::test]
async fn reopening_a_migrated_store_changes_nothing() -> Result<()> {
    let dir = tempdir()?;
    let config = LedgerConfig::with_data_dir(dir.path());
    write_store(&config, &legacy_graph(), V1_INITIAL).await?;
    let registry = MigrationRegistry::standard();

    let first = Store::open(&config, &registry).await?.snapshot();
    let second = Store::open(&config, &registry).await?.snapshot();
    assert_eq!(first, second);
    assert_eq!(second.count(EntityKind::Property), 1);
    Ok(())
}

#[tokio::test]
async fn backfill_reuses_existing_default_property() -> Result<()> {
    let mut legacy = legacy_graph();
    let mut flat = Property::new("Flat 2B");
    flat.is_default = true;
    let flat = legacy.insert(flat)?;

    let upgrade = MigrationRegistry::standard().upgrade(&legacy, V1_INITIAL)?;
    assert_eq!(upgrade.graph.count(EntityKind::Property), 1);
    assert!(upgrade
        .graph
        .all::<Room>()
        .all(|room| room.property_id == Some(flat)));
    Ok(())
}

#[tokio::test]
async fn newer_store_is_refused_untouched() -> Result<()> {
    let dir = tempdir()?;
    let config = LedgerConfig::with_data_dir(dir.path());
    write_store(&config, &legacy_graph(), CURRENT_SCHEMA_VERSION + 1).await?;

    let err = Store::open(&config, &MigrationRegistry::standard())
        .await
        .unwrap_err();
    assert_eq!(err.code(), MIGRATION_NEWER_THAN_SUPPORTED);

    let pool = db::open_sqlite_pool(&config.db_path()).await?;
    assert_eq!(
        db::schema_version(&pool).await?,
        Some(CURRENT_SCHEMA_VERSION + 1)
    );
    pool.close().await;
    Ok(())
}

#[test]
fn gap_in_chain_fails_before_any_stage_runs() {
    let registry = MigrationRegistry::new(
        vec![
            SchemaVersion::new(1, "one", &[EntityKind::Item]),
            SchemaVersion::new(2, "two", &[EntityKind::Item]),
            SchemaVersion::new(3, "three", &[EntityKind::Item]),
        ],
        vec![MigrationStage::lightweight(1, 2)],
    )
    .unwrap();
    assert!(registry.path(2).is_err());
    let err = registry.upgrade(&legacy_graph(), 1).unwrap_err();
    assert_eq!(err.code(), MIGRATION_MISSING_STAGE);
}
