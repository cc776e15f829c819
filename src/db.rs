use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use futures::future::BoxFuture;
use futures::FutureExt;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite, Transaction};

use crate::graph::Graph;
use crate::id::EntityId;
use crate::model::{EntityKind, EntityRef, Record};
use crate::time::now_ms;
use crate::{AppError, AppResult};

pub const STORE_CORRUPT_ROW: &str = "STORE/CORRUPT_ROW";
pub const STORE_BAD_VERSION: &str = "STORE/BAD_SCHEMA_VERSION";

const SCHEMA_VERSION_KEY: &str = "schema_version";
const CREATED_AT_KEY: &str = "created_at";

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS ledger_meta (\
       key   TEXT PRIMARY KEY,\
       value TEXT NOT NULL\
     )",
    "CREATE TABLE IF NOT EXISTS entities (\
       kind       TEXT NOT NULL,\
       id         TEXT NOT NULL,\
       body       TEXT NOT NULL,\
       updated_at INTEGER NOT NULL,\
       PRIMARY KEY (kind, id)\
     )",
    "CREATE INDEX IF NOT EXISTS entities_id_idx ON entities(id)",
    "CREATE TABLE IF NOT EXISTS retired_ids (\
       id         TEXT PRIMARY KEY,\
       retired_at INTEGER NOT NULL\
     )",
];

pub async fn open_sqlite_pool(db_path: &Path) -> AppResult<Pool<Sqlite>> {
    if let Some(dir) = db_path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| {
            tracing::error!(
                target: "hearthledger",
                event = "data_dir_create_failed",
                error = %e,
                path = %dir.display()
            );
            AppError::from(e).with_context("path", dir.display().to_string())
        })?;
    }
    tracing::info!(target: "hearthledger", event = "db_path", path = %db_path.display());

    let opts = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full)
        .busy_timeout(std::time::Duration::from_millis(5000));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .after_connect(|conn, _| {
            Box::pin(async move {
                sqlx::query("PRAGMA wal_autocheckpoint = 1000;")
                    .execute(&mut *conn)
                    .await?;
                Ok::<_, sqlx::Error>(())
            })
        })
        .connect_with(opts)
        .await?;

    log_effective_pragmas(&pool).await;
    ensure_schema(&pool).await?;
    Ok(pool)
}

/// A private in-memory database. One connection that never idles out, since
/// every new connection would see an empty database.
pub async fn open_memory_pool() -> AppResult<Pool<Sqlite>> {
    let opts = SqliteConnectOptions::from_str("sqlite::memory:")?;
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(opts)
        .await?;
    ensure_schema(&pool).await?;
    Ok(pool)
}

async fn log_effective_pragmas(pool: &Pool<Sqlite>) {
    use tracing::{info, warn};

    let (sqlite_ver,): (String,) = sqlx::query_as("select sqlite_version()")
        .fetch_one(pool)
        .await
        .unwrap_or((String::from("unknown"),));

    let jm: (String,) = sqlx::query_as("PRAGMA journal_mode;")
        .fetch_one(pool)
        .await
        .unwrap_or((String::from("unknown"),));

    let sync: (i64,) = sqlx::query_as("PRAGMA synchronous;")
        .fetch_one(pool)
        .await
        .unwrap_or((i64::MIN,));

    info!(
        target: "hearthledger",
        event = "db_open",
        sqlite_version = %sqlite_ver,
        journal_mode = %jm.0,
        synchronous = %sync.0
    );

    if !jm.0.eq_ignore_ascii_case("wal") {
        warn!(
            target: "hearthledger",
            event = "db_open_warning",
            msg = "journal_mode != WAL; running with reduced crash safety"
        );
    }
}

pub async fn ensure_schema(pool: &Pool<Sqlite>) -> AppResult<()> {
    for stmt in SCHEMA {
        sqlx::query(stmt).execute(pool).await?;
    }
    Ok(())
}

/// Run work inside a transaction. Commits on success, rolls back on error.
pub async fn run_in_tx<R, E, F>(pool: &Pool<Sqlite>, f: F) -> Result<R, E>
where
    E: From<sqlx::Error> + std::fmt::Display,
    F: for<'c> FnOnce(&'c mut Transaction<'static, Sqlite>) -> BoxFuture<'c, Result<R, E>>,
{
    use tracing::{debug, error, warn};

    let mut tx = pool.begin().await.map_err(E::from)?;
    debug!(target: "hearthledger", event = "db_tx_begin");
    match f(&mut tx).await {
        Ok(val) => {
            tx.commit().await.map_err(E::from)?;
            debug!(target: "hearthledger", event = "db_tx_commit");
            Ok(val)
        }
        Err(e) => {
            if let Err(rb) = tx.rollback().await {
                error!(target: "hearthledger", event = "db_tx_rollback_failed", error = %rb);
            } else {
                warn!(target: "hearthledger", event = "db_tx_rollback", error = %e);
            }
            Err(e)
        }
    }
}

/// `None` for a database that has never been stamped.
pub async fn schema_version(pool: &Pool<Sqlite>) -> AppResult<Option<u32>> {
    let value: Option<String> =
        sqlx::query_scalar("SELECT value FROM ledger_meta WHERE key = ?")
            .bind(SCHEMA_VERSION_KEY)
            .fetch_optional(pool)
            .await?;
    value
        .map(|raw| {
            raw.trim().parse::<u32>().map_err(|_| {
                AppError::new(STORE_BAD_VERSION, "Stored schema version is not a number")
                    .with_context("value", raw.clone())
            })
        })
        .transpose()
}

pub async fn entity_count(pool: &Pool<Sqlite>) -> AppResult<i64> {
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM entities")
        .fetch_one(pool)
        .await?)
}

pub async fn load_graph(pool: &Pool<Sqlite>) -> AppResult<Graph> {
    let rows: Vec<(String, String, String)> =
        sqlx::query_as("SELECT kind, id, body FROM entities ORDER BY kind, id")
            .fetch_all(pool)
            .await?;
    let mut records = Vec::with_capacity(rows.len());
    for (kind, id, body) in rows {
        let entity_kind = EntityKind::parse(&kind).ok_or_else(|| {
            AppError::new(STORE_CORRUPT_ROW, "Unknown entity kind")
                .with_context("kind", kind.clone())
                .with_context("id", id.clone())
        })?;
        let record = Record::from_json(entity_kind, &body).map_err(|e| {
            AppError::new(STORE_CORRUPT_ROW, "Entity body could not be decoded")
                .with_context("kind", kind.clone())
                .with_context("id", id.clone())
                .with_cause(e)
        })?;
        records.push(record);
    }

    let retired_rows: Vec<String> = sqlx::query_scalar("SELECT id FROM retired_ids")
        .fetch_all(pool)
        .await?;
    let mut retired = Vec::with_capacity(retired_rows.len());
    for raw in retired_rows {
        let id = EntityId::from_str(&raw).map_err(|_| {
            AppError::new(STORE_CORRUPT_ROW, "Retired id is not a UUID").with_context("id", raw.clone())
        })?;
        retired.push(id);
    }

    Graph::from_records(records, retired)
}

#[derive(Debug, Clone, PartialEq)]
struct EntityRow {
    kind: EntityKind,
    id: EntityId,
    body: String,
    updated_at: i64,
}

impl EntityRow {
    fn encode(record: &Record) -> AppResult<Self> {
        Ok(Self {
            kind: record.kind(),
            id: record.id(),
            body: record.body_json()?,
            updated_at: record.updated_at(),
        })
    }
}

/// The row-level difference between two graphs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changeset {
    upserts: Vec<EntityRow>,
    deletes: Vec<EntityRef>,
    retired: Vec<EntityId>,
}

impl Changeset {
    pub fn diff(before: &Graph, after: &Graph) -> AppResult<Self> {
        let previous: HashMap<EntityRef, Record> = before
            .records()
            .into_iter()
            .map(|r| (r.entity_ref(), r))
            .collect();

        let mut changes = Changeset::default();
        for record in after.records() {
            if previous.get(&record.entity_ref()) != Some(&record) {
                changes.upserts.push(EntityRow::encode(&record)?);
            }
        }
        let mut deletes: Vec<EntityRef> = previous
            .keys()
            .filter(|entity| !after.contains_ref(**entity))
            .copied()
            .collect();
        deletes.sort_by_key(|entity| {
            (
                std::cmp::Reverse(kind_rank(entity.kind)),
                entity.id,
            )
        });
        changes.deletes = deletes;
        changes.retired = after
            .retired()
            .difference(before.retired())
            .copied()
            .collect();
        Ok(changes)
    }

    /// Every row of `graph`, for a full rewrite.
    pub fn full(graph: &Graph) -> AppResult<Self> {
        Ok(Changeset {
            upserts: graph
                .records()
                .iter()
                .map(EntityRow::encode)
                .collect::<AppResult<_>>()?,
            deletes: Vec::new(),
            retired: graph.retired().iter().copied().collect(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.deletes.is_empty() && self.retired.is_empty()
    }

    pub fn upserted(&self) -> usize {
        self.upserts.len()
    }

    pub fn deleted(&self) -> usize {
        self.deletes.len()
    }
}

fn kind_rank(kind: EntityKind) -> usize {
    EntityKind::ALL
        .iter()
        .position(|k| *k == kind)
        .unwrap_or(EntityKind::ALL.len())
}

async fn write_changeset(
    tx: &mut Transaction<'static, Sqlite>,
    changes: &Changeset,
) -> Result<(), sqlx::Error> {
    for entity in &changes.deletes {
        sqlx::query("DELETE FROM entities WHERE kind = ? AND id = ?")
            .bind(entity.kind.as_str())
            .bind(entity.id.to_string())
            .execute(&mut **tx)
            .await?;
    }
    for row in &changes.upserts {
        sqlx::query(
            "INSERT INTO entities (kind, id, body, updated_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT(kind, id) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
        )
        .bind(row.kind.as_str())
        .bind(row.id.to_string())
        .bind(&row.body)
        .bind(row.updated_at)
        .execute(&mut **tx)
        .await?;
    }
    let retired_at = now_ms();
    for id in &changes.retired {
        sqlx::query("INSERT OR IGNORE INTO retired_ids (id, retired_at) VALUES (?, ?)")
            .bind(id.to_string())
            .bind(retired_at)
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

async fn write_schema_version(
    tx: &mut Transaction<'static, Sqlite>,
    version: u32,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO ledger_meta (key, value) VALUES (?, ?) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(SCHEMA_VERSION_KEY)
    .bind(version.to_string())
    .execute(&mut **tx)
    .await?;
    sqlx::query("INSERT OR IGNORE INTO ledger_meta (key, value) VALUES (?, ?)")
        .bind(CREATED_AT_KEY)
        .bind(now_ms().to_string())
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Persist a changeset, optionally restamping the schema version, in one
/// transaction.
pub async fn commit_changeset(
    pool: &Pool<Sqlite>,
    changes: Changeset,
    schema_version: Option<u32>,
) -> AppResult<()> {
    run_in_tx(pool, move |tx| {
        async move {
            write_changeset(tx, &changes).await?;
            if let Some(version) = schema_version {
                write_schema_version(tx, version).await?;
            }
            Ok::<_, AppError>(())
        }
        .boxed()
    })
    .await
}

/// Rewrite the whole database to hold exactly `graph`. Live rows are deleted
/// children first before the new rows go in, all in one transaction.
pub async fn replace_all(pool: &Pool<Sqlite>, graph: &Graph, schema_version: u32) -> AppResult<()> {
    let changes = Changeset::full(graph)?;
    run_in_tx(pool, move |tx| {
        async move {
            for kind in EntityKind::ALL.iter().rev() {
                sqlx::query("DELETE FROM entities WHERE kind = ?")
                    .bind(kind.as_str())
                    .execute(&mut **tx)
                    .await?;
            }
            write_changeset(tx, &changes).await?;
            write_schema_version(tx, schema_version).await?;
            Ok::<_, AppError>(())
        }
        .boxed()
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Item, Room};

    #[tokio::test]
    async fn changeset_roundtrips_through_sqlite() {
        let pool = open_memory_pool().await.unwrap();
        let empty = Graph::new();
        let mut graph = Graph::new();
        let room = graph.insert(Room::new("Garage")).unwrap();
        let mut item = Item::new("Mower");
        item.room_id = Some(room);
        graph.insert(item).unwrap();

        let changes = Changeset::diff(&empty, &graph).unwrap();
        assert_eq!(changes.upserted(), 2);
        commit_changeset(&pool, changes, Some(4)).await.unwrap();

        assert_eq!(load_graph(&pool).await.unwrap(), graph);
        assert_eq!(schema_version(&pool).await.unwrap(), Some(4));
    }

    #[tokio::test]
    async fn deletes_and_retirements_persist() {
        let pool = open_memory_pool().await.unwrap();
        let mut graph = Graph::new();
        let room = graph.insert(Room::new("Garage")).unwrap();
        commit_changeset(&pool, Changeset::full(&graph).unwrap(), Some(4))
            .await
            .unwrap();

        let before = graph.clone();
        graph.delete(EntityRef::new(EntityKind::Room, room)).unwrap();
        let changes = Changeset::diff(&before, &graph).unwrap();
        assert_eq!(changes.deleted(), 1);
        commit_changeset(&pool, changes, None).await.unwrap();

        let loaded = load_graph(&pool).await.unwrap();
        assert!(loaded.is_empty());
        assert!(loaded.is_retired(room));
    }

    #[tokio::test]
    async fn failed_transaction_rolls_back() {
        let pool = open_memory_pool().await.unwrap();
        let res: AppResult<()> = run_in_tx(&pool, |tx| {
            async move {
                sqlx::query("INSERT INTO ledger_meta (key, value) VALUES ('k', 'v')")
                    .execute(&mut **tx)
                    .await?;
                sqlx::query("INSERT INTO ledger_meta (key, value) VALUES ('k', 'again')")
                    .execute(&mut **tx)
                    .await?;
                Ok::<_, AppError>(())
            }
            .boxed()
        })
        .await;
        assert!(res.is_err());
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ledger_meta")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
