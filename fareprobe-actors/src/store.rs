//! SQLite-backed persistence for the address corpus, route results and
//! direction payloads.
//!
//! Reads (corpus sampling) go straight to the pool. Writes are serialized
//! through [`StoreActor`]; failures are logged by the actor and never reach
//! the sender, matching the best-effort contract of both sinks.
use crate::actor::{Actor, Addr, Context};
use crate::StoreMsg;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use fareprobe_common::persistence::{AddressCorpus, DirectionSink, RouteSink};
use fareprobe_common::{AddressRecord, DirectionRecord, ProbeError, RouteResult};
use sqlx::{Row, SqlitePool};
use tracing::{debug, error, info};

pub struct StoreActor {
    pool: SqlitePool,
}

impl StoreActor {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Actor for StoreActor {
    type Msg = StoreMsg;

    async fn handle(&mut self, msg: Self::Msg, _ctx: &mut Context<Self>) -> Result<()> {
        match msg {
            StoreMsg::InsertRoute(result) => {
                let pickup = result.pickup_id.clone();
                let destination = result.destination_id.clone();
                if let Err(err) = insert_route(&self.pool, &result).await {
                    error!(error = ?err, %pickup, %destination, "store.insert_route.failed");
                }
            }
            StoreMsg::InsertDirection(record) => {
                if let Err(err) = insert_direction(&self.pool, &record).await {
                    error!(
                        error = ?err,
                        pickup = %record.pickup_id,
                        destination = %record.destination_id,
                        "store.insert_direction.failed"
                    );
                }
            }
        }
        Ok(())
    }
}

/// Create the corpus, route and direction tables plus their indexes if missing.
pub async fn ensure_schema(pool: &SqlitePool, address_table: &str) -> Result<()> {
    let statements = [
        format!(
            r#"CREATE TABLE IF NOT EXISTS {address_table} (
                 hash     TEXT PRIMARY KEY,
                 lat      REAL NOT NULL,
                 lon      REAL NOT NULL,
                 number   TEXT NOT NULL,
                 street   TEXT NOT NULL,
                 postcode TEXT NOT NULL
               )"#
        ),
        r#"CREATE TABLE IF NOT EXISTS routes (
             id          INTEGER PRIMARY KEY AUTOINCREMENT,
             pickup      TEXT NOT NULL,
             destination TEXT NOT NULL,
             distance    REAL NOT NULL,
             prices      TEXT NOT NULL,
             timestamp   INTEGER NOT NULL
           )"#
        .to_string(),
        r#"CREATE TABLE IF NOT EXISTS directions (
             id          INTEGER PRIMARY KEY AUTOINCREMENT,
             pickup      TEXT NOT NULL,
             destination TEXT NOT NULL,
             data        TEXT NOT NULL
           )"#
        .to_string(),
        "CREATE UNIQUE INDEX IF NOT EXISTS directions_pair ON directions (pickup, destination)"
            .to_string(),
        "CREATE INDEX IF NOT EXISTS routes_pair ON routes (pickup, destination)".to_string(),
    ];

    for statement in &statements {
        sqlx::query(statement).execute(pool).await?;
    }
    info!(address_table, "store.ensure_schema");
    Ok(())
}

/// Draw `size` random rows from the address table.
pub async fn sample_addresses(
    pool: &SqlitePool,
    address_table: &str,
    size: usize,
) -> Result<Vec<AddressRecord>> {
    let rows = sqlx::query(&format!(
        "SELECT hash, lat, lon, number, street, postcode FROM {address_table} ORDER BY RANDOM() LIMIT ?"
    ))
    .bind(size as i64)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|r| -> Result<AddressRecord> {
            Ok(AddressRecord {
                id: r.try_get("hash")?,
                latitude: r.try_get("lat")?,
                longitude: r.try_get("lon")?,
                house_number: r.try_get("number")?,
                street: r.try_get("street")?,
                postcode: r.try_get("postcode")?,
            })
        })
        .collect()
}

pub async fn insert_route(pool: &SqlitePool, result: &RouteResult) -> Result<()> {
    let prices = serde_json::to_string(&result.prices)?;
    let res = sqlx::query(
        r#"INSERT INTO routes (pickup, destination, distance, prices, timestamp)
           VALUES (?1, ?2, ?3, ?4, ?5)"#,
    )
    .bind(result.pickup_id.as_str())
    .bind(result.destination_id.as_str())
    .bind(result.distance_meters)
    .bind(prices)
    .bind(result.timestamp.timestamp_millis())
    .execute(pool)
    .await?;
    info!(
        pickup = %result.pickup_id,
        destination = %result.destination_id,
        quotes = result.prices.len(),
        rows = res.rows_affected(),
        "store.insert_route"
    );
    Ok(())
}

/// Insert a direction payload. A second insert for the same pair fails on the
/// unique index.
pub async fn insert_direction(pool: &SqlitePool, record: &DirectionRecord) -> Result<()> {
    let res = sqlx::query(
        r#"INSERT INTO directions (pickup, destination, data)
           VALUES (?1, ?2, ?3)"#,
    )
    .bind(record.pickup_id.as_str())
    .bind(record.destination_id.as_str())
    .bind(record.payload.to_string())
    .execute(pool)
    .await?;
    info!(
        pickup = %record.pickup_id,
        destination = %record.destination_id,
        rows = res.rows_affected(),
        "store.insert_direction"
    );
    Ok(())
}

/// Address corpus read directly from the pool.
#[derive(Clone)]
pub struct SqliteCorpus {
    pool: SqlitePool,
    table: String,
}

impl SqliteCorpus {
    pub fn new(pool: SqlitePool, table: impl Into<String>) -> Self {
        Self {
            pool,
            table: table.into(),
        }
    }
}

#[async_trait]
impl AddressCorpus for SqliteCorpus {
    async fn sample(&self, size: usize) -> fareprobe_common::Result<Vec<AddressRecord>> {
        let records = sample_addresses(&self.pool, &self.table, size)
            .await
            .map_err(|err| ProbeError::CorpusExhausted {
                draws: 0,
                detail: format!("corpus query failed: {err}"),
            })?;
        if records.len() < size {
            return Err(ProbeError::CorpusExhausted {
                draws: 0,
                detail: format!(
                    "`{}` holds {} records, {size} needed",
                    self.table,
                    records.len()
                ),
            });
        }
        debug!(table = %self.table, size, "store.sample_addresses");
        Ok(records)
    }
}

#[async_trait]
impl RouteSink for Addr<StoreActor> {
    async fn insert_route(&self, result: RouteResult) -> fareprobe_common::Result<()> {
        self.send(StoreMsg::InsertRoute(result))
            .await
            .map_err(|_| ProbeError::PersistenceWrite {
                sink: "routes",
                source: anyhow!("store mailbox closed"),
            })
    }
}

#[async_trait]
impl DirectionSink for Addr<StoreActor> {
    async fn insert_direction(&self, record: DirectionRecord) -> fareprobe_common::Result<()> {
        self.send(StoreMsg::InsertDirection(record))
            .await
            .map_err(|_| ProbeError::PersistenceWrite {
                sink: "directions",
                source: anyhow!("store mailbox closed"),
            })
    }
}
