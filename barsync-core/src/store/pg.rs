//! PostgreSQL / TimescaleDB store.
//!
//! Features:
//! - One transaction per logical write (DDL, or one upsert batch)
//! - Bulk upsert: binary COPY into a transaction-scoped staging table,
//!   then a single `INSERT ... ON CONFLICT DO UPDATE`
//! - Optional hypertable conversion for new tables
//! - Database bootstrap through an admin connection

use super::sql;
use super::{BarStore, StoreError};
use crate::domain::{dedup_keep_first, Bar};
use crate::secrets::DbCredentials;
use chrono::{DateTime, Utc};
use postgres::binary_copy::BinaryCopyInWriter;
use postgres::types::Type;
use postgres::{Client, NoTls, Row};
use tracing::{debug, error, info};

/// Column types for the binary COPY, in `sql::COLUMNS` order.
const COPY_TYPES: [Type; 8] = [
    Type::TIMESTAMPTZ,
    Type::FLOAT8,
    Type::FLOAT8,
    Type::FLOAT8,
    Type::FLOAT8,
    Type::FLOAT8,
    Type::FLOAT8,
    Type::INT4,
];

/// Blocking PostgreSQL store holding a single connection for the whole run.
pub struct PgStore {
    client: Client,
    hypertable_chunk_interval: Option<String>,
}

fn open(creds: &DbCredentials) -> Result<Client, StoreError> {
    let mut config = postgres::Config::new();
    config
        .host(&creds.host)
        .port(creds.port)
        .dbname(&creds.dbname)
        .user(&creds.username)
        .password(&creds.password);

    config.connect(NoTls).map_err(|e| {
        StoreError::Connect(format!(
            "{}@{}:{}/{}: {e}",
            creds.username, creds.host, creds.port, creds.dbname
        ))
    })
}

impl PgStore {
    pub fn connect(creds: &DbCredentials) -> Result<Self, StoreError> {
        let client = open(creds)?;
        info!(host = %creds.host, dbname = %creds.dbname, "connected to database");
        Ok(Self {
            client,
            hypertable_chunk_interval: None,
        })
    }

    /// Convert newly created tables to hypertables with this chunk interval (e.g. `"1 year"`).
    pub fn with_hypertables(mut self, chunk_interval: impl Into<String>) -> Self {
        self.hypertable_chunk_interval = Some(chunk_interval.into());
        self
    }

    /// Create database `name` if absent, connecting through `admin`'s database.
    ///
    /// Returns true if the database was created.
    pub fn ensure_database(admin: &DbCredentials, name: &str) -> Result<bool, StoreError> {
        let mut client = open(admin)?;

        let exists = client
            .query_opt(sql::DATABASE_EXISTS, &[&name])
            .map_err(|e| query_err("database lookup", name, e))?
            .is_some();

        if exists {
            info!(database = name, "database already exists");
            return Ok(false);
        }

        // CREATE DATABASE cannot run inside a transaction block.
        client
            .batch_execute(&sql::create_database(name))
            .map_err(|e| query_err("create database", name, e))?;
        info!(database = name, "database created");
        Ok(true)
    }

    fn edge(&mut self, schema: &str, table: &str, ascending: bool) -> Result<Option<Bar>, StoreError> {
        let target = sql::qualified(schema, table);
        let operation = if ascending { "earliest lookup" } else { "latest lookup" };
        let row = self
            .client
            .query_opt(sql::select_edge(schema, table, ascending).as_str(), &[])
            .map_err(|e| query_err(operation, &target, e))?;

        row.map(|r| row_to_bar(&r).map_err(|e| query_err(operation, &target, e)))
            .transpose()
    }
}

fn query_err(operation: &'static str, target: &str, e: postgres::Error) -> StoreError {
    StoreError::Query {
        operation,
        target: target.to_string(),
        reason: e.to_string(),
    }
}

/// Nullable price columns read back as NaN, a NULL count as zero.
fn row_to_bar(row: &Row) -> Result<Bar, postgres::Error> {
    let timestamp: DateTime<Utc> = row.try_get("timestamp")?;
    let price = |name: &str| -> Result<f64, postgres::Error> {
        Ok(row.try_get::<_, Option<f64>>(name)?.unwrap_or(f64::NAN))
    };
    let bar_count: Option<i32> = row.try_get("bar_count")?;

    Ok(Bar {
        timestamp,
        open: price("open")?,
        high: price("high")?,
        low: price("low")?,
        close: price("close")?,
        volume: price("volume")?,
        average: price("average")?,
        bar_count: bar_count.unwrap_or(0).max(0) as u32,
    })
}

impl BarStore for PgStore {
    fn ensure_schema(&mut self, schema: &str) -> Result<(), StoreError> {
        self.client
            .batch_execute(&sql::create_schema(schema))
            .map_err(|e| query_err("create schema", schema, e))?;
        debug!(schema, "schema ensured");
        Ok(())
    }

    fn table_exists(&mut self, schema: &str, table: &str) -> Result<bool, StoreError> {
        let row = self
            .client
            .query_one(sql::TABLE_EXISTS, &[&schema, &table])
            .map_err(|e| query_err("table lookup", &sql::qualified(schema, table), e))?;
        row.try_get(0)
            .map_err(|e| query_err("table lookup", &sql::qualified(schema, table), e))
    }

    fn create_table_if_absent(&mut self, schema: &str, table: &str) -> Result<bool, StoreError> {
        let target = sql::qualified(schema, table);
        let ddl_err = |e| query_err("create table", &target, e);

        let mut tx = self.client.transaction().map_err(ddl_err)?;

        let exists: bool = tx
            .query_one(sql::TABLE_EXISTS, &[&schema, &table])
            .and_then(|row| row.try_get(0))
            .map_err(ddl_err)?;

        if exists {
            debug!(table = %target, "table already exists");
        } else {
            tx.batch_execute(&sql::create_table(schema, table))
                .map_err(ddl_err)?;
            if let Some(interval) = &self.hypertable_chunk_interval {
                tx.execute(sql::CREATE_HYPERTABLE, &[&target, interval])
                    .map_err(ddl_err)?;
                info!(table = %target, chunk_interval = %interval, "hypertable created");
            }
        }

        tx.commit().map_err(ddl_err)?;
        if !exists {
            info!(table = %target, "table created");
        }
        Ok(!exists)
    }

    fn earliest(&mut self, schema: &str, table: &str) -> Result<Option<Bar>, StoreError> {
        self.edge(schema, table, true)
    }

    fn latest(&mut self, schema: &str, table: &str) -> Result<Option<Bar>, StoreError> {
        self.edge(schema, table, false)
    }

    fn upsert_bars(&mut self, schema: &str, table: &str, bars: &[Bar]) -> Result<u64, StoreError> {
        if bars.is_empty() {
            return Ok(0);
        }

        let batch = dedup_keep_first(bars.to_vec());
        let target = sql::qualified(schema, table);
        let rows = batch.len();
        let write_err = |reason: String| write_failure(&target, rows, reason);

        // Any early return drops `tx`, which rolls the whole batch back.
        let mut tx = self
            .client
            .transaction()
            .map_err(|e| write_err(e.to_string()))?;

        tx.batch_execute(&sql::create_staging(schema, table))
            .map_err(|e| write_err(format!("staging table: {e}")))?;

        let sink = tx
            .copy_in(sql::copy_into_staging().as_str())
            .map_err(|e| write_err(format!("copy start: {e}")))?;
        let mut writer = BinaryCopyInWriter::new(sink, &COPY_TYPES);
        for bar in &batch {
            let count = i32::try_from(bar.bar_count)
                .map_err(|_| write_err(format!("bar_count {} exceeds INTEGER", bar.bar_count)))?;
            writer
                .write(&[
                    &bar.timestamp,
                    &bar.open,
                    &bar.high,
                    &bar.low,
                    &bar.close,
                    &bar.volume,
                    &bar.average,
                    &count,
                ])
                .map_err(|e| write_err(format!("copy row: {e}")))?;
        }
        writer
            .finish()
            .map_err(|e| write_err(format!("copy finish: {e}")))?;

        let written = tx
            .execute(sql::upsert_from_staging(schema, table).as_str(), &[])
            .map_err(|e| write_err(format!("upsert: {e}")))?;

        tx.commit()
            .map_err(|e| write_err(format!("commit: {e}")))?;

        info!(table = %target, rows = written, "wrote/updated bars");
        Ok(written)
    }
}

/// Log a failed batch write and build its error. The batch has been rolled back.
fn write_failure(table: &str, rows: usize, reason: String) -> StoreError {
    error!(table, rows, reason = %reason, "bar write failed; batch rolled back");
    StoreError::Write {
        table: table.to_string(),
        rows,
        reason,
    }
}
