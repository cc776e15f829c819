//! Durable handle over the entity graph.
//!
//! Readers take an `Arc<Graph>` snapshot and never block writers. Writers
//! serialize through one async gate: clone the published graph, mutate the
//! clone, check integrity, persist the row diff in a single transaction, and
//! only then publish the clone. A failure at any step leaves both the
//! database and the published graph as they were.

use std::sync::{Arc, RwLock};

use sqlx::SqlitePool;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

use crate::config::LedgerConfig;
use crate::db::{self, Changeset};
use crate::graph::{DeletePlan, Graph};
use crate::id::EntityId;
use crate::migrate::MigrationRegistry;
use crate::model::{EntityKind, EntityRef, Item, Record, Room, DEFAULT_CURRENCY};
use crate::{AppError, AppResult};

pub const ROOM_DEFAULT_PROTECTED: &str = "ROOM/DEFAULT_PROTECTED";

pub struct Store {
    pool: SqlitePool,
    graph: RwLock<Arc<Graph>>,
    write_gate: Mutex<()>,
    schema_version: u32,
    default_currency: String,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("schema_version", &self.schema_version)
            .field("entities", &self.snapshot().len())
            .finish()
    }
}

impl Store {
    /// Open (or create) the store under `config.data_dir`, migrating an older
    /// schema in place. Stores newer than `registry` supports are refused.
    pub async fn open(config: &LedgerConfig, registry: &MigrationRegistry) -> AppResult<Self> {
        let pool = db::open_sqlite_pool(&config.db_path()).await?;
        let mut store = Self::open_with_pool(pool, registry).await?;
        store.default_currency = config.default_currency.clone();
        Ok(store)
    }

    pub async fn open_in_memory(registry: &MigrationRegistry) -> AppResult<Self> {
        let pool = db::open_memory_pool().await?;
        Self::open_with_pool(pool, registry).await
    }

    pub async fn open_with_pool(pool: SqlitePool, registry: &MigrationRegistry) -> AppResult<Self> {
        db::ensure_schema(&pool).await?;
        let current = registry.current();
        let stamped = db::schema_version(&pool).await?;
        let rows = db::entity_count(&pool).await?;

        let found = match stamped {
            Some(version) => version,
            None if rows == 0 => {
                db::commit_changeset(&pool, Changeset::default(), Some(current)).await?;
                current
            }
            None => {
                let oldest = registry.versions().first().map(|v| v.number).unwrap_or(current);
                warn!(
                    target: "hearthledger",
                    event = "store_unstamped",
                    rows,
                    assumed_version = oldest
                );
                oldest
            }
        };

        // Refuse before decoding anything a newer build may have written.
        registry.path(found)?;
        let loaded = db::load_graph(&pool).await?;
        let graph = if found == current {
            loaded
        } else {
            let upgrade = registry.upgrade(&loaded, found)?;
            db::replace_all(&pool, &upgrade.graph, current).await?;
            info!(
                target: "hearthledger",
                event = "store_migrated",
                from = found,
                to = current,
                stages = upgrade.applied.len()
            );
            upgrade.graph
        };

        info!(
            target: "hearthledger",
            event = "store_open",
            schema_version = current,
            entities = graph.len()
        );

        Ok(Self {
            pool,
            graph: RwLock::new(Arc::new(graph)),
            write_gate: Mutex::new(()),
            schema_version: current,
            default_currency: DEFAULT_CURRENCY.to_string(),
        })
    }

    /// A consistent, immutable view of the graph as of the last commit.
    pub fn snapshot(&self) -> Arc<Graph> {
        self.graph.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// A fresh item carrying the configured default currency.
    pub fn new_item(&self, name: impl Into<String>) -> Item {
        let mut item = Item::new(name);
        item.currency_code = self.default_currency.clone();
        item
    }

    fn publish(&self, graph: Graph) {
        let mut guard = self.graph.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(graph);
    }

    /// Hold the write gate. Every write path goes through one of these, so
    /// whatever is read from [`StoreWriter::live`] stays current until the
    /// writer is dropped.
    pub async fn writer(&self) -> StoreWriter<'_> {
        StoreWriter {
            store: self,
            _gate: self.write_gate.lock().await,
        }
    }

    /// Run `mutate` against a private copy of the graph and commit the
    /// result as one transaction. Nothing is visible to readers until the
    /// database commit succeeds.
    pub async fn commit<R>(&self, mutate: impl FnOnce(&mut Graph) -> AppResult<R>) -> AppResult<R> {
        self.writer().await.commit(mutate).await
    }

    pub async fn create(&self, record: impl Into<Record>) -> AppResult<EntityId> {
        let record = record.into();
        let kind = record.kind();
        let id = self.commit(move |graph| graph.insert(record)).await?;
        info!(target: "hearthledger", event = "entity_created", kind = %kind, id = %id);
        Ok(id)
    }

    pub async fn update(&self, record: impl Into<Record>) -> AppResult<()> {
        let record = record.into();
        let entity = record.entity_ref();
        self.commit(move |graph| graph.update(record)).await?;
        info!(target: "hearthledger", event = "entity_updated", entity = %entity);
        Ok(())
    }

    /// User-facing delete. Default rooms are refused here; the graph itself
    /// will still cascade them when their property goes.
    pub async fn delete(&self, target: EntityRef) -> AppResult<DeletePlan> {
        let plan = self
            .commit(move |graph| {
                if target.kind == EntityKind::Room
                    && graph.get::<Room>(target.id).is_some_and(|room| room.is_default)
                {
                    return Err(AppError::new(
                        ROOM_DEFAULT_PROTECTED,
                        "The default room cannot be deleted",
                    )
                    .with_context("entity", target.to_string()));
                }
                graph.delete(target)
            })
            .await?;
        info!(
            target: "hearthledger",
            event = "entity_deleted",
            entity = %target,
            removed = plan.removed.len(),
            nullified = plan.nullified.len()
        );
        Ok(plan)
    }

    /// Swap in a whole new graph, rewriting every row in one transaction.
    pub async fn replace_graph(&self, graph: Graph) -> AppResult<()> {
        self.writer().await.replace_graph(graph).await
    }
}

/// Exclusive write access to a [`Store`]. Other writers wait until this is
/// dropped; readers keep seeing the last published graph.
pub struct StoreWriter<'a> {
    store: &'a Store,
    _gate: MutexGuard<'a, ()>,
}

impl StoreWriter<'_> {
    /// The published graph. No other write can land while `self` is held.
    pub fn live(&self) -> Arc<Graph> {
        self.store.snapshot()
    }

    pub async fn commit<R>(&self, mutate: impl FnOnce(&mut Graph) -> AppResult<R>) -> AppResult<R> {
        let current = self.live();
        let mut working = Graph::clone(&current);
        let out = mutate(&mut working)?;
        working.ensure_integrity()?;

        let changes = Changeset::diff(&current, &working)?;
        if !changes.is_empty() {
            db::commit_changeset(&self.store.pool, changes, None).await?;
            self.store.publish(working);
        }
        Ok(out)
    }

    pub async fn replace_graph(&self, graph: Graph) -> AppResult<()> {
        graph.ensure_integrity()?;
        db::replace_all(&self.store.pool, &graph, self.store.schema_version).await?;
        info!(
            target: "hearthledger",
            event = "store_replaced",
            entities = graph.len(),
            retired = graph.retired().len()
        );
        self.store.publish(graph);
        Ok(())
    }
}
