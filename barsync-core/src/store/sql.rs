//! SQL text builders. Identifiers are always quoted; values go through parameters.

/// Bar columns in storage order. `timestamp` is the primary key.
pub const COLUMNS: [&str; 8] = [
    "timestamp",
    "open",
    "high",
    "low",
    "close",
    "volume",
    "average",
    "bar_count",
];

/// Name of the per-transaction staging table used by bulk upserts.
pub const STAGING_TABLE: &str = "barsync_staging";

/// Quote an identifier, doubling embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// `"schema"."table"`
pub fn qualified(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

fn column_list() -> String {
    COLUMNS
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn create_schema(schema: &str) -> String {
    format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(schema))
}

pub fn create_table(schema: &str, table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (
            \"timestamp\" TIMESTAMPTZ PRIMARY KEY,
            \"open\" DOUBLE PRECISION,
            \"high\" DOUBLE PRECISION,
            \"low\" DOUBLE PRECISION,
            \"close\" DOUBLE PRECISION,
            \"volume\" DOUBLE PRECISION,
            \"average\" DOUBLE PRECISION,
            \"bar_count\" INTEGER
        )",
        qualified(schema, table)
    )
}

/// Convert a table to a TimescaleDB hypertable. Takes `$1` = qualified name, `$2` = chunk interval.
pub const CREATE_HYPERTABLE: &str = "SELECT create_hypertable($1::text::regclass, 'timestamp', \
     chunk_time_interval => $2::text::interval, if_not_exists => TRUE)";

pub const TABLE_EXISTS: &str = "SELECT EXISTS (
        SELECT FROM information_schema.tables
        WHERE table_schema = $1 AND table_name = $2
    )";

pub const DATABASE_EXISTS: &str = "SELECT 1 FROM pg_catalog.pg_database WHERE datname = $1";

pub fn create_database(name: &str) -> String {
    format!("CREATE DATABASE {}", quote_ident(name))
}

/// Single-row lookup ordered by timestamp. `ascending` picks the earliest row.
pub fn select_edge(schema: &str, table: &str, ascending: bool) -> String {
    format!(
        "SELECT {} FROM {} ORDER BY \"timestamp\" {} LIMIT 1",
        column_list(),
        qualified(schema, table),
        if ascending { "ASC" } else { "DESC" }
    )
}

pub fn create_staging(schema: &str, table: &str) -> String {
    format!(
        "CREATE TEMP TABLE {STAGING_TABLE} (LIKE {} INCLUDING DEFAULTS) ON COMMIT DROP",
        qualified(schema, table)
    )
}

pub fn copy_into_staging() -> String {
    format!(
        "COPY {STAGING_TABLE} ({}) FROM STDIN (FORMAT BINARY)",
        column_list()
    )
}

/// Move staged rows into the target, overwriting every non-key column on conflict.
pub fn upsert_from_staging(schema: &str, table: &str) -> String {
    let updates = COLUMNS[1..]
        .iter()
        .map(|c| format!("{col} = EXCLUDED.{col}", col = quote_ident(c)))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {target} ({cols}) SELECT {cols} FROM {STAGING_TABLE} \
         ON CONFLICT (\"timestamp\") DO UPDATE SET {updates}",
        target = qualified(schema, table),
        cols = column_list(),
    )
}
