//! In-process store with the same upsert semantics as the PostgreSQL store.

use super::{sql, BarStore, StoreError};
use crate::domain::{dedup_keep_first, Bar};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};

type TableKey = (String, String);

/// Tables keyed by (schema, table), rows ordered by timestamp.
#[derive(Debug, Default)]
pub struct MemoryStore {
    schemas: HashSet<String>,
    tables: HashMap<TableKey, BTreeMap<DateTime<Utc>, Bar>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `bars` in an existing table.
    pub fn with_rows(schema: &str, table: &str, bars: &[Bar]) -> Self {
        let mut store = Self::new();
        store.schemas.insert(schema.to_string());
        store
            .tables
            .entry(key(schema, table))
            .or_default()
            .extend(bars.iter().map(|b| (b.timestamp, b.clone())));
        store
    }

    /// All rows of a table in ascending timestamp order. Empty if the table is absent.
    pub fn rows(&self, schema: &str, table: &str) -> Vec<Bar> {
        self.tables
            .get(&key(schema, table))
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn has_schema(&self, schema: &str) -> bool {
        self.schemas.contains(schema)
    }

    fn table(&self, schema: &str, table: &str) -> Result<&BTreeMap<DateTime<Utc>, Bar>, StoreError> {
        self.tables
            .get(&key(schema, table))
            .ok_or_else(|| StoreError::MissingTable(sql::qualified(schema, table)))
    }
}

fn key(schema: &str, table: &str) -> TableKey {
    (schema.to_string(), table.to_string())
}

impl BarStore for MemoryStore {
    fn ensure_schema(&mut self, schema: &str) -> Result<(), StoreError> {
        self.schemas.insert(schema.to_string());
        Ok(())
    }

    fn table_exists(&mut self, schema: &str, table: &str) -> Result<bool, StoreError> {
        Ok(self.tables.contains_key(&key(schema, table)))
    }

    fn create_table_if_absent(&mut self, schema: &str, table: &str) -> Result<bool, StoreError> {
        if !self.schemas.contains(schema) {
            return Err(StoreError::Query {
                operation: "create table",
                target: sql::qualified(schema, table),
                reason: format!("schema {schema} does not exist"),
            });
        }
        let k = key(schema, table);
        if self.tables.contains_key(&k) {
            return Ok(false);
        }
        self.tables.insert(k, BTreeMap::new());
        Ok(true)
    }

    fn earliest(&mut self, schema: &str, table: &str) -> Result<Option<Bar>, StoreError> {
        Ok(self.table(schema, table)?.values().next().cloned())
    }

    fn latest(&mut self, schema: &str, table: &str) -> Result<Option<Bar>, StoreError> {
        Ok(self.table(schema, table)?.values().next_back().cloned())
    }

    fn upsert_bars(&mut self, schema: &str, table: &str, bars: &[Bar]) -> Result<u64, StoreError> {
        if bars.is_empty() {
            return Ok(0);
        }
        let rows = self
            .tables
            .get_mut(&key(schema, table))
            .ok_or_else(|| StoreError::MissingTable(sql::qualified(schema, table)))?;

        let batch = dedup_keep_first(bars.to_vec());
        let written = batch.len() as u64;
        rows.extend(batch.into_iter().map(|b| (b.timestamp, b)));
        Ok(written)
    }
}
