use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use polars::prelude::{Column, DataType, PolarsResult};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::table::Table;

/// Bound parameters allowed per statement by the bundled SQLite.
const MAX_VARIABLES: usize = 32_766;

/// Name of the stored row-position column when `index` is enabled.
pub const INDEX_COLUMN: &str = "index";

/// What to do when the target table already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IfExists {
    /// Refuse to write and leave existing data untouched.
    #[default]
    Fail,
    /// Drop the table and recreate it with exactly the new rows.
    Replace,
    /// Add the new rows to whatever is already stored.
    Append,
}

impl IfExists {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Fail => "fail",
            Self::Replace => "replace",
            Self::Append => "append",
        }
    }
}

/// One batch of rows handed to an insertion strategy.
pub struct InsertBatch<'a> {
    pub table: &'a str,
    pub connection: &'a Connection,
    pub columns: &'a [String],
    pub rows: &'a mut dyn Iterator<Item = Vec<Value>>,
}

type InsertFn = dyn Fn(InsertBatch<'_>) -> rusqlite::Result<usize> + Send + Sync;

/// How rows are turned into `INSERT` statements.
#[derive(Clone, Default)]
pub enum InsertMethod {
    /// One prepared `INSERT` per row.
    #[default]
    Single,
    /// Multi-row `VALUES` lists, bounded by the SQLite variable limit.
    Multi,
    /// Caller-supplied strategy; returns the number of rows inserted.
    Custom(Arc<InsertFn>),
}

impl InsertMethod {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(InsertBatch<'_>) -> rusqlite::Result<usize> + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    fn insert(&self, batch: InsertBatch<'_>) -> rusqlite::Result<usize> {
        match self {
            Self::Single => insert_single(batch),
            Self::Multi => insert_multi(batch),
            Self::Custom(f) => f(batch),
        }
    }
}

impl fmt::Debug for InsertMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single => f.write_str("Single"),
            Self::Multi => f.write_str("Multi"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Target table in a local SQLite database file.
#[derive(Debug, Clone)]
pub struct RelationalLoader {
    database: String,
    table: String,
    if_exists: IfExists,
    index: bool,
    output_directory: PathBuf,
    insert_method: InsertMethod,
    chunk_size: Option<usize>,
}

impl RelationalLoader {
    pub fn new(
        database: impl Into<String>,
        table: impl Into<String>,
        if_exists: IfExists,
        output_directory: impl Into<PathBuf>,
    ) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
            if_exists,
            index: false,
            output_directory: output_directory.into(),
            insert_method: InsertMethod::Single,
            chunk_size: None,
        }
    }

    /// Store the row position as a leading `index` column.
    pub fn with_index(mut self, index: bool) -> Self {
        self.index = index;
        self
    }

    pub fn with_insert_method(mut self, method: InsertMethod) -> Self {
        self.insert_method = method;
        self
    }

    /// Rows per batch handed to the insertion strategy.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size.max(1));
        self
    }

    pub fn with_output_directory(mut self, output_directory: impl Into<PathBuf>) -> Self {
        self.output_directory = output_directory.into();
        self
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn if_exists(&self) -> IfExists {
        self.if_exists
    }

    pub fn index(&self) -> bool {
        self.index
    }

    pub fn output_directory(&self) -> &Path {
        &self.output_directory
    }

    pub fn database_path(&self) -> PathBuf {
        self.output_directory.join(&self.database)
    }

    /// Persist `df` under the configured conflict policy; returns rows written.
    ///
    /// Everything runs in one transaction, so a failed write leaves the
    /// database as it was. The connection is closed on every exit path.
    pub fn write(&self, df: &Table) -> Result<usize, StoreError> {
        if df.width() == 0 {
            return Err(StoreError::EmptySchema {
                table: self.table.clone(),
            });
        }
        fs::create_dir_all(&self.output_directory).map_err(|source| {
            StoreError::OutputDirectory {
                path: self.output_directory.clone(),
                source,
            }
        })?;

        let columns = self.load_columns(df)?;
        let path = self.database_path();
        let sqlite_err = |source| StoreError::Sqlite {
            database: path.clone(),
            source,
        };

        let mut conn = Connection::open(&path).map_err(sqlite_err)?;
        let written = self.write_in(&mut conn, &columns, df.height())?;
        conn.close().map_err(|(_, source)| sqlite_err(source))?;

        info!(
            database = %path.display(),
            table = %self.table,
            policy = self.if_exists.name(),
            rows = written,
            "Table written"
        );
        Ok(written)
    }

    fn write_in(
        &self,
        conn: &mut Connection,
        columns: &[LoadColumn],
        height: usize,
    ) -> Result<usize, StoreError> {
        let database = self.database_path();
        let sqlite_err = |source| StoreError::Sqlite {
            database: database.clone(),
            source,
        };

        let tx = conn.transaction().map_err(sqlite_err)?;
        let exists = table_exists(&tx, &self.table).map_err(sqlite_err)?;

        match (self.if_exists, exists) {
            (IfExists::Fail, true) => {
                return Err(StoreError::TableExists {
                    database: database.clone(),
                    table: self.table.clone(),
                });
            }
            (IfExists::Replace, true) => {
                debug!(table = %self.table, "Dropping existing table");
                tx.execute_batch(&format!("DROP TABLE {}", quote(&self.table)))
                    .map_err(sqlite_err)?;
                self.create_table(&tx, columns).map_err(sqlite_err)?;
            }
            (IfExists::Append, true) => {}
            (_, false) => self.create_table(&tx, columns).map_err(sqlite_err)?,
        }

        let names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
        let batch_size = self.chunk_size.unwrap_or(height).max(1);
        let mut written = 0;
        let mut start = 0;
        while start < height {
            let end = (start + batch_size).min(height);
            let mut rows = (start..end).map(|row| {
                columns
                    .iter()
                    .map(|column| column.values[row].clone())
                    .collect::<Vec<Value>>()
            });
            written += self
                .insert_method
                .insert(InsertBatch {
                    table: &self.table,
                    connection: &tx,
                    columns: &names,
                    rows: &mut rows,
                })
                .map_err(sqlite_err)?;
            start = end;
        }

        tx.commit().map_err(sqlite_err)?;
        Ok(written)
    }

    fn create_table(&self, conn: &Connection, columns: &[LoadColumn]) -> rusqlite::Result<()> {
        let definitions: Vec<String> = columns
            .iter()
            .map(|column| format!("{} {}", quote(&column.name), column.sql_type))
            .collect();
        let ddl = format!(
            "CREATE TABLE {} (\n\t{}\n)",
            quote(&self.table),
            definitions.join(",\n\t")
        );
        debug!(%ddl, "Creating table");
        conn.execute_batch(&ddl)?;

        if self.index {
            conn.execute_batch(&format!(
                "CREATE INDEX {} ON {} ({})",
                quote(&format!("ix_{}_{}", self.table, INDEX_COLUMN)),
                quote(&self.table),
                quote(INDEX_COLUMN)
            ))?;
        }
        Ok(())
    }

    fn load_columns(&self, df: &Table) -> Result<Vec<LoadColumn>, StoreError> {
        let mut columns = Vec::with_capacity(df.width() + usize::from(self.index));
        if self.index {
            columns.push(LoadColumn {
                name: INDEX_COLUMN.to_string(),
                sql_type: "INTEGER",
                values: (0..df.height() as i64).map(Value::Integer).collect(),
            });
        }
        for column in df.get_columns() {
            let values = column_values(column).map_err(|source| StoreError::Column {
                column: column.name().to_string(),
                source,
            })?;
            columns.push(LoadColumn {
                name: column.name().to_string(),
                sql_type: sql_type(column.dtype()),
                values,
            });
        }
        Ok(columns)
    }
}

struct LoadColumn {
    name: String,
    sql_type: &'static str,
    values: Vec<Value>,
}

/// Column DDL type for a table dtype.
pub fn sql_type(dtype: &DataType) -> &'static str {
    match dtype {
        DataType::Boolean => "BOOLEAN",
        DataType::Date => "DATE",
        DataType::Datetime(..) => "TIMESTAMP",
        dtype if dtype.is_float() => "FLOAT",
        dtype if dtype.is_integer() => "INTEGER",
        _ => "VARCHAR(255)",
    }
}

fn column_values(column: &Column) -> PolarsResult<Vec<Value>> {
    let series = column.as_materialized_series();
    let dtype = series.dtype();

    if dtype.is_integer() {
        let cast = series.cast(&DataType::Int64)?;
        return Ok(cast
            .i64()?
            .into_iter()
            .map(|v| v.map_or(Value::Null, Value::Integer))
            .collect());
    }
    if dtype.is_float() {
        let cast = series.cast(&DataType::Float64)?;
        return Ok(cast
            .f64()?
            .into_iter()
            .map(|v| v.map_or(Value::Null, Value::Real))
            .collect());
    }
    if dtype == &DataType::Boolean {
        return Ok(series
            .bool()?
            .into_iter()
            .map(|v| v.map_or(Value::Null, |b| Value::Integer(i64::from(b))))
            .collect());
    }

    let cast = series.cast(&DataType::String)?;
    Ok(cast
        .str()?
        .into_iter()
        .map(|v| v.map_or(Value::Null, |text| Value::Text(text.to_string())))
        .collect())
}

fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

fn insert_sql(table: &str, columns: &[String], rows: usize) -> String {
    let quoted: Vec<String> = columns.iter().map(|c| quote(c)).collect();
    let placeholders = format!("({})", vec!["?"; columns.len()].join(", "));
    format!(
        "INSERT INTO {} ({}) VALUES {}",
        quote(table),
        quoted.join(", "),
        vec![placeholders; rows].join(", ")
    )
}

fn insert_single(batch: InsertBatch<'_>) -> rusqlite::Result<usize> {
    let sql = insert_sql(batch.table, batch.columns, 1);
    let mut stmt = batch.connection.prepare_cached(&sql)?;
    let mut written = 0;
    for row in batch.rows {
        written += stmt.execute(params_from_iter(row.iter()))?;
    }
    Ok(written)
}

fn insert_multi(batch: InsertBatch<'_>) -> rusqlite::Result<usize> {
    let per_statement = (MAX_VARIABLES / batch.columns.len().max(1)).max(1);
    let mut pending: Vec<Vec<Value>> = Vec::with_capacity(per_statement.min(1024));
    let mut written = 0;

    let mut flush = |pending: &mut Vec<Vec<Value>>| -> rusqlite::Result<()> {
        if pending.is_empty() {
            return Ok(());
        }
        let sql = insert_sql(batch.table, batch.columns, pending.len());
        written += batch
            .connection
            .execute(&sql, params_from_iter(pending.iter().flatten()))?;
        pending.clear();
        Ok(())
    };

    for row in batch.rows {
        pending.push(row);
        if pending.len() == per_statement {
            flush(&mut pending)?;
        }
    }
    flush(&mut pending)?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::TimeUnit;

    #[test]
    fn maps_dtypes_to_column_types() {
        assert_eq!(sql_type(&DataType::String), "VARCHAR(255)");
        assert_eq!(sql_type(&DataType::Int64), "INTEGER");
        assert_eq!(sql_type(&DataType::UInt8), "INTEGER");
        assert_eq!(sql_type(&DataType::Float32), "FLOAT");
        assert_eq!(
            sql_type(&DataType::Datetime(TimeUnit::Microseconds, None)),
            "TIMESTAMP"
        );
        assert_eq!(sql_type(&DataType::Date), "DATE");
        assert_eq!(sql_type(&DataType::Boolean), "BOOLEAN");
    }

    #[test]
    fn builds_multi_row_insert() {
        let sql = insert_sql("t", &["a".to_string(), "b\"c".to_string()], 2);
        assert_eq!(
            sql,
            "INSERT INTO \"t\" (\"a\", \"b\"\"c\") VALUES (?, ?), (?, ?)"
        );
    }
}
