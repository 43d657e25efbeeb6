//! Time-series store: one table per instrument and granularity, keyed by timestamp.
//!
//! The BarStore trait is the seam between the sync engine and persistence.
//! `PgStore` is the production implementation; `MemoryStore` has the same
//! semantics in-process and backs the tests.
//!
//! Failures are always returned to the caller. A failed upsert is rolled back
//! as a whole and never reported as success.

pub mod memory;
pub mod pg;
pub mod sql;

pub use self::memory::MemoryStore;
pub use self::pg::PgStore;

use crate::domain::Bar;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured error types for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database connection failed: {0}")]
    Connect(String),

    #[error("{operation} on {target} failed: {reason}")]
    Query {
        operation: &'static str,
        target: String,
        reason: String,
    },

    #[error("upsert of {rows} bars into {table} failed and was rolled back: {reason}")]
    Write {
        table: String,
        rows: usize,
        reason: String,
    },

    #[error("table {0} does not exist")]
    MissingTable(String),
}

/// Min/max stored timestamps for a table, computed on demand.
///
/// Both ends are `None` for an empty or freshly created table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    pub earliest: Option<DateTime<Utc>>,
    pub latest: Option<DateTime<Utc>>,
}

impl SyncCursor {
    pub fn is_empty(&self) -> bool {
        self.earliest.is_none() && self.latest.is_none()
    }
}

/// Trait for bar persistence.
pub trait BarStore {
    /// Create the schema namespace if it does not exist.
    fn ensure_schema(&mut self, schema: &str) -> Result<(), StoreError>;

    fn table_exists(&mut self, schema: &str, table: &str) -> Result<bool, StoreError>;

    /// Idempotent DDL. Returns true if the table was created by this call.
    fn create_table_if_absent(&mut self, schema: &str, table: &str) -> Result<bool, StoreError>;

    /// Row with the smallest timestamp, `None` when the table is empty.
    fn earliest(&mut self, schema: &str, table: &str) -> Result<Option<Bar>, StoreError>;

    /// Row with the largest timestamp, `None` when the table is empty.
    fn latest(&mut self, schema: &str, table: &str) -> Result<Option<Bar>, StoreError>;

    fn cursor(&mut self, schema: &str, table: &str) -> Result<SyncCursor, StoreError> {
        Ok(SyncCursor {
            earliest: self.earliest(schema, table)?.map(|b| b.timestamp),
            latest: self.latest(schema, table)?.map(|b| b.timestamp),
        })
    }

    /// Insert new rows and overwrite rows sharing a timestamp, atomically.
    ///
    /// Repeated timestamps inside `bars` keep their first occurrence.
    /// Returns the number of rows written.
    fn upsert_bars(&mut self, schema: &str, table: &str, bars: &[Bar]) -> Result<u64, StoreError>;
}
