//! Statement text for the weather tables.
//!
//! Identifiers are always validated [`SqlIdent`]s rendered quoted; values
//! are always bound as `$n` parameters.

use std::fmt;

use wxsync_core::WEATHER_COLUMNS;

use crate::{ConflictPolicy, RangePredicate, StoreError};

/// Postgres truncates identifiers longer than this.
const MAX_IDENT_LEN: usize = 63;

/// A validated, unquoted SQL identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SqlIdent(String);

impl SqlIdent {
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        let mut chars = raw.chars();
        let valid_start = chars
            .next()
            .map(|c| c.is_ascii_alphabetic() || c == '_')
            .unwrap_or(false);
        let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid_start || !valid_rest || raw.len() > MAX_IDENT_LEN {
            return Err(StoreError::InvalidIdentifier(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SqlIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.0)
    }
}

/// Schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub schema: SqlIdent,
    pub table: SqlIdent,
}

impl TableRef {
    pub fn new(schema: &str, table: &str) -> Result<Self, StoreError> {
        Ok(Self {
            schema: SqlIdent::parse(schema)?,
            table: SqlIdent::parse(table)?,
        })
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

fn tablespace_clause(tablespace: Option<&SqlIdent>) -> String {
    tablespace
        .map(|ts| format!(" TABLESPACE {ts}"))
        .unwrap_or_default()
}

fn update_all_columns() -> String {
    WEATHER_COLUMNS[1..]
        .iter()
        .map(|c| format!("{c} = EXCLUDED.{c}"))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn create_weather_table(table: &TableRef, tablespace: Option<&SqlIdent>) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (\
         city_id BIGINT PRIMARY KEY, \
         city_name TEXT NOT NULL, \
         weather_description TEXT NOT NULL, \
         temperature DOUBLE PRECISION NOT NULL, \
         pressure INTEGER NOT NULL, \
         humidity INTEGER NOT NULL, \
         visibility INTEGER NOT NULL, \
         wind_speed DOUBLE PRECISION NOT NULL, \
         wind_dir INTEGER NOT NULL, \
         clouds_all INTEGER NOT NULL\
         ){}",
        tablespace_clause(tablespace)
    )
}

pub fn create_table_like(
    destination: &TableRef,
    source: &TableRef,
    tablespace: Option<&SqlIdent>,
) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {destination} (LIKE {source} INCLUDING ALL){}",
        tablespace_clause(tablespace)
    )
}

pub fn upsert_weather(table: &TableRef) -> String {
    let placeholders = (1..=WEATHER_COLUMNS.len())
        .map(|n| format!("${n}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {table} ({}) VALUES ({placeholders}) \
         ON CONFLICT (city_id) DO UPDATE SET {}",
        WEATHER_COLUMNS.join(", "),
        update_all_columns()
    )
}

/// Bulk copy with the range bound as `$1` (low) and `$2` (high).
pub fn copy_temperature_range(
    source: &TableRef,
    destination: &TableRef,
    predicate: RangePredicate,
    on_conflict: ConflictPolicy,
) -> String {
    let columns = WEATHER_COLUMNS.join(", ");
    let condition = match predicate {
        RangePredicate::Between => "temperature > $1 AND temperature < $2",
        RangePredicate::Outside => "temperature < $1 OR temperature > $2",
    };
    let conflict = match on_conflict {
        ConflictPolicy::Overwrite => format!("DO UPDATE SET {}", update_all_columns()),
        ConflictPolicy::Skip => "DO NOTHING".to_string(),
    };
    format!(
        "INSERT INTO {destination} ({columns}) \
         SELECT {columns} FROM {source} WHERE {condition} \
         ON CONFLICT (city_id) {conflict}"
    )
}
