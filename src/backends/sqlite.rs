//! SQLite statement runner
//!
//! Plain functions over a `&rusqlite::Connection`, shared by the blocking
//! and the async handle: schema discovery, statement execution, row
//! conversion and transaction control.

use crate::core::catalog::{CatalogSnapshot, ColumnDescriptor, TableDescriptor};
use crate::core::error::{DatabaseError, Result};
use crate::core::mutation::{CompiledInsert, InsertResult};
use crate::core::row::Row;
use crate::core::statement::{BatchStatement, Statement};
use crate::core::transaction::TransactionMode;
use crate::core::value::DatabaseValue;
use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::{params_from_iter, Connection, ToSql};
use std::sync::Arc;
use std::time::Duration;

/// Table label used in errors for hand-written statements
const RAW_TABLE: &str = "<raw>";

impl ToSql for DatabaseValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            DatabaseValue::Null => ToSqlOutput::Owned(Value::Null),
            DatabaseValue::Bool(v) => ToSqlOutput::Owned(Value::Integer(i64::from(*v))),
            DatabaseValue::Int(v) => ToSqlOutput::Owned(Value::Integer(i64::from(*v))),
            DatabaseValue::Long(v) => ToSqlOutput::Owned(Value::Integer(*v)),
            DatabaseValue::Float(v) => ToSqlOutput::Owned(Value::Real(f64::from(*v))),
            DatabaseValue::Double(v) => ToSqlOutput::Owned(Value::Real(*v)),
            DatabaseValue::String(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            DatabaseValue::Bytes(v) => ToSqlOutput::Borrowed(ValueRef::Blob(v)),
            DatabaseValue::Timestamp(v) => ToSqlOutput::Owned(Value::Integer(*v)),
        })
    }
}

/// Convert a column value read from SQLite
fn value_from_ref(value: ValueRef<'_>) -> DatabaseValue {
    match value {
        ValueRef::Null => DatabaseValue::Null,
        ValueRef::Integer(v) => DatabaseValue::Long(v),
        ValueRef::Real(v) => DatabaseValue::Double(v),
        ValueRef::Text(v) => DatabaseValue::String(String::from_utf8_lossy(v).to_string()),
        ValueRef::Blob(v) => DatabaseValue::Bytes(v.to_vec()),
    }
}

/// Per-connection settings applied right after a connection is opened
pub(crate) fn configure(conn: &Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.busy_timeout(busy_timeout)?;
    conn.execute_batch("PRAGMA foreign_keys = ON")?;
    Ok(())
}

/// Discover every user table and view with its columns
pub fn discover(conn: &Connection) -> Result<CatalogSnapshot> {
    let listed = {
        let mut stmt = conn
            .prepare(
                "SELECT name, wr FROM pragma_table_list \
                 WHERE schema = 'main' AND type IN ('table', 'view') \
                 AND name NOT LIKE 'sqlite_%' \
                 ORDER BY name",
            )
            .map_err(|e| DatabaseError::from_sqlite("pragma_table_list", e))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?)))
            .map_err(|e| DatabaseError::from_sqlite("pragma_table_list", e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| DatabaseError::from_sqlite("pragma_table_list", e))?
    };

    let mut tables = Vec::with_capacity(listed.len());
    for (name, without_rowid) in listed {
        let columns = describe_table(conn, &name)?;
        let table = TableDescriptor::new(name, columns);
        tables.push(if without_rowid { table.without_rowid() } else { table });
    }

    tracing::info!(tables = tables.len(), "discovered database schema");
    Ok(CatalogSnapshot::new(tables))
}

fn describe_table(conn: &Connection, table: &str) -> Result<Vec<ColumnDescriptor>> {
    let mut stmt = conn
        .prepare("SELECT name, type, \"notnull\", pk FROM pragma_table_info(?1) ORDER BY cid")
        .map_err(|e| DatabaseError::from_sqlite(table, e))?;
    let rows = stmt
        .query_map([table], |row| {
            let name: String = row.get(0)?;
            let declared: String = row.get(1)?;
            let not_null: bool = row.get(2)?;
            let pk: i64 = row.get(3)?;

            let mut column = ColumnDescriptor::new(name, declared);
            if not_null {
                column = column.not_null();
            }
            if pk > 0 {
                column = column.primary_key();
            }
            Ok(column)
        })
        .map_err(|e| DatabaseError::from_sqlite(table, e))?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| DatabaseError::from_sqlite(table, e))
}

fn log_statement(echo: bool, table: &str, sql: &str, params: usize) {
    if echo {
        tracing::debug!(table, sql, params, "executing statement");
    }
}

fn failed(table: &str, err: rusqlite::Error) -> DatabaseError {
    let err = DatabaseError::from_sqlite(table, err);
    tracing::error!(table, error = %err, "statement failed");
    err
}

/// Run a SELECT and collect its rows
pub fn query(conn: &Connection, stmt: &Statement, echo: bool) -> Result<Vec<Row>> {
    log_statement(echo, &stmt.table, &stmt.sql, stmt.params.len());

    let mut prepared = conn
        .prepare_cached(&stmt.sql)
        .map_err(|e| failed(&stmt.table, e))?;
    let columns: Arc<[String]> = prepared
        .column_names()
        .into_iter()
        .map(String::from)
        .collect();
    let count = columns.len();

    let rows = prepared
        .query_map(params_from_iter(stmt.params.iter()), |row| {
            let mut values = Vec::with_capacity(count);
            for i in 0..count {
                values.push(value_from_ref(row.get_ref(i)?));
            }
            Ok(Row::new(Arc::clone(&columns), values))
        })
        .map_err(|e| failed(&stmt.table, e))?;

    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| failed(&stmt.table, e))
}

/// Run a statement that returns no rows; reports the affected row count
pub fn execute(conn: &Connection, stmt: &Statement, echo: bool) -> Result<usize> {
    log_statement(echo, &stmt.table, &stmt.sql, stmt.params.len());

    let mut prepared = conn
        .prepare_cached(&stmt.sql)
        .map_err(|e| failed(&stmt.table, e))?;
    prepared
        .execute(params_from_iter(stmt.params.iter()))
        .map_err(|e| failed(&stmt.table, e))
}

/// Prepare `batch` once and execute it for every parameter set
pub fn execute_many(conn: &Connection, batch: &BatchStatement, echo: bool) -> Result<usize> {
    log_statement(echo, &batch.table, &batch.sql, batch.len());

    let mut prepared = conn
        .prepare_cached(&batch.sql)
        .map_err(|e| failed(&batch.table, e))?;
    let mut affected = 0;
    for params in &batch.param_sets {
        affected += prepared
            .execute(params_from_iter(params.iter()))
            .map_err(|e| failed(&batch.table, e))?;
    }
    Ok(affected)
}

/// Execute a compiled insert
pub fn insert(conn: &Connection, insert: &CompiledInsert, echo: bool) -> Result<InsertResult> {
    let affected = execute_many(conn, &insert.batch, echo)?;
    let last_id = insert.reports_last_id.then(|| conn.last_insert_rowid());
    Ok(InsertResult { last_id, affected })
}

/// Execute one bulk-update chunk in its own transaction
pub fn update_chunk(
    conn: &Connection,
    batch: &BatchStatement,
    index: usize,
    echo: bool,
) -> Result<usize> {
    let affected = in_transaction(conn, TransactionMode::Immediate, |conn| {
        execute_many(conn, batch, echo)
    })?;
    tracing::info!(
        table = %batch.table,
        chunk = index,
        records = batch.len(),
        affected,
        "processed bulk update chunk"
    );
    Ok(affected)
}

/// Hand-written statement with bound parameters
pub fn execute_raw(conn: &Connection, sql: &str, params: &[DatabaseValue], echo: bool) -> Result<usize> {
    execute(conn, &Statement::new(RAW_TABLE, sql, params.to_vec()), echo)
}

/// Hand-written query with bound parameters
pub fn query_raw(conn: &Connection, sql: &str, params: &[DatabaseValue], echo: bool) -> Result<Vec<Row>> {
    query(conn, &Statement::new(RAW_TABLE, sql, params.to_vec()), echo)
}

/// `SELECT 1`
pub fn ping(conn: &Connection) -> Result<()> {
    conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
        .map(|_| ())
        .map_err(|e| DatabaseError::connection(format!("health check failed: {}", e)))
}

pub fn begin(conn: &Connection, mode: TransactionMode) -> Result<()> {
    conn.execute_batch(mode.begin_sql())
        .map_err(|e| DatabaseError::transaction(format!("Failed to begin transaction: {}", e)))
}

pub fn commit(conn: &Connection) -> Result<()> {
    conn.execute_batch("COMMIT")
        .map_err(|e| DatabaseError::transaction(format!("Failed to commit transaction: {}", e)))
}

/// Roll back if a transaction is open; a no-op otherwise
pub fn rollback(conn: &Connection) -> Result<()> {
    if conn.is_autocommit() {
        return Ok(());
    }
    tracing::warn!("rolling back transaction");
    conn.execute_batch("ROLLBACK")
        .map_err(|e| DatabaseError::transaction(format!("Failed to roll back transaction: {}", e)))
}

/// Run `f` inside a transaction: commit on success, roll back on error
///
/// When a transaction is already open on `conn` the statements simply join
/// it and the outer scope decides the outcome.
pub fn in_transaction<T, F>(conn: &Connection, mode: TransactionMode, f: F) -> Result<T>
where
    F: FnOnce(&Connection) -> Result<T>,
{
    if !conn.is_autocommit() {
        return f(conn);
    }

    begin(conn, mode)?;
    match f(conn) {
        Ok(value) => match commit(conn) {
            Ok(()) => Ok(value),
            Err(e) => {
                let _ = rollback(conn);
                Err(e)
            }
        },
        Err(e) => {
            if let Err(rb) = rollback(conn) {
                tracing::error!(error = %rb, "rollback after failure did not complete");
            }
            Err(e)
        }
    }
}
