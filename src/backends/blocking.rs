//! Blocking SQLite backend
//!
//! A small connection pool built on `parking_lot::{Mutex, Condvar}` and a
//! thread-per-request handle on top of it. Every call draws one connection
//! from the pool and returns it on every exit path.

use super::sqlite;
use crate::core::catalog::{CatalogSnapshot, SchemaCatalog};
use crate::core::config::PoolConfig;
use crate::core::database::{BlockingDataAccess, PoolStats};
use crate::core::error::{DatabaseError, Result};
use crate::core::filter::Filter;
use crate::core::mutation::{
    compile_bulk_update, compile_delete, compile_insert, compile_update, BulkUpdateReport,
    InsertResult, InsertRows,
};
use crate::core::query_builder::SelectBuilder;
use crate::core::row::Row;
use crate::core::transaction::{MutationTracker, TransactionMode};
use crate::core::value::{DatabaseValue, RowValues};
use parking_lot::{Condvar, Mutex};
use rusqlite::Connection;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Default)]
struct PoolState {
    idle: Vec<Connection>,
    /// Open connections, idle or checked out
    total: usize,
    waiting: usize,
}

/// Fixed-size pool of blocking SQLite connections
#[derive(Debug)]
pub struct BlockingPool {
    config: PoolConfig,
    state: Mutex<PoolState>,
    available: Condvar,
}

impl BlockingPool {
    /// Create a pool and open its first connection
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or the database cannot
    /// be opened
    pub fn new(config: PoolConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let pool = Arc::new(Self {
            config,
            state: Mutex::new(PoolState::default()),
            available: Condvar::new(),
        });

        // keep one connection open so a shared-cache memory database persists
        let first = pool.open()?;
        {
            let mut state = pool.state.lock();
            state.idle.push(first);
            state.total = 1;
        }
        Ok(pool)
    }

    fn open(&self) -> Result<Connection> {
        let conn = Connection::open(&self.config.connection_string).map_err(|e| {
            DatabaseError::connection(format!(
                "Failed to open '{}': {}",
                self.config.connection_string, e
            ))
        })?;
        sqlite::configure(&conn, self.config.busy_timeout)
            .map_err(|e| DatabaseError::connection(format!("Failed to configure connection: {}", e)))?;
        Ok(conn)
    }

    /// Check out a connection, waiting up to the configured timeout
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::PoolExhausted`] when no connection frees up
    /// in time
    pub fn get(self: &Arc<Self>) -> Result<PooledConnection> {
        let deadline = Instant::now() + self.config.timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(conn) = state.idle.pop() {
                return Ok(PooledConnection {
                    pool: Arc::clone(self),
                    conn: Some(conn),
                });
            }

            if state.total < self.config.max_size {
                state.total += 1;
                drop(state);
                return match self.open() {
                    Ok(conn) => Ok(PooledConnection {
                        pool: Arc::clone(self),
                        conn: Some(conn),
                    }),
                    Err(e) => {
                        self.state.lock().total -= 1;
                        self.available.notify_one();
                        Err(e)
                    }
                };
            }

            state.waiting += 1;
            let timed_out = self.available.wait_until(&mut state, deadline).timed_out();
            state.waiting -= 1;
            if timed_out && state.idle.is_empty() && state.total >= self.config.max_size {
                tracing::warn!(max = self.config.max_size, "connection pool exhausted");
                return Err(DatabaseError::pool_exhausted(
                    state.total - state.idle.len(),
                    self.config.max_size,
                ));
            }
        }
    }

    fn release(&self, conn: Connection) {
        let mut state = self.state.lock();
        state.idle.push(conn);
        drop(state);
        self.available.notify_one();
    }

    fn discard(&self) {
        self.state.lock().total -= 1;
        self.available.notify_one();
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            size: state.total,
            available: state.idle.len(),
            waiting: state.waiting,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }
}

/// A connection checked out of a [`BlockingPool`]
///
/// Dropping it rolls back any transaction left open and returns the
/// connection to the pool; a connection that cannot be rolled back is closed
/// instead.
pub struct PooledConnection {
    pool: Arc<BlockingPool>,
    conn: Option<Connection>,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        match &self.conn {
            Some(conn) => conn,
            // only taken in drop
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if !conn.is_autocommit() {
            tracing::warn!("connection returned with an open transaction");
            if let Err(e) = sqlite::rollback(&conn) {
                tracing::error!(error = %e, "discarding connection after failed rollback");
                drop(conn);
                self.pool.discard();
                return;
            }
        }
        self.pool.release(conn);
    }
}

/// Blocking database handle
///
/// # Example
///
/// ```no_run
/// use rust_data_layer::prelude::*;
///
/// fn main() -> Result<()> {
///     let db = SyncDatabase::connect(PoolConfig::new("app.db"))?;
///     let rows = db.select(
///         &SelectBuilder::new("stocks")
///             .filter(Filter::new().with("price__gte", 100))
///             .limit(10),
///     )?;
///     println!("{} rows", rows.len());
///     Ok(())
/// }
/// ```
pub struct SyncDatabase {
    pool: Arc<BlockingPool>,
    catalog: Arc<SchemaCatalog>,
}

impl SyncDatabase {
    /// Open the pool and discover the schema
    pub fn connect(config: PoolConfig) -> Result<Self> {
        let db = Self::with_catalog(config, Arc::new(SchemaCatalog::default()))?;
        db.reload_catalog()?;
        Ok(db)
    }

    /// Open the pool around an existing catalog, without discovery
    pub fn with_catalog(config: PoolConfig, catalog: Arc<SchemaCatalog>) -> Result<Self> {
        tracing::info!(
            connection = %config.connection_string,
            max_size = config.max_size,
            "opening blocking pool"
        );
        Ok(Self {
            pool: BlockingPool::new(config)?,
            catalog,
        })
    }

    /// The shared catalog handle
    pub fn catalog_handle(&self) -> Arc<SchemaCatalog> {
        Arc::clone(&self.catalog)
    }

    /// Rediscover the schema and swap the new snapshot in
    pub fn reload_catalog(&self) -> Result<()> {
        let conn = self.pool.get()?;
        self.catalog.reload(|| sqlite::discover(&conn))
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    fn echo(&self) -> bool {
        self.pool.config().echo
    }

    /// Run `f` on one connection inside a deferred transaction
    ///
    /// Commits when `f` returns `Ok`, rolls back when it returns `Err`.
    pub fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Session<'_>) -> Result<T>,
    {
        self.scope(TransactionMode::Deferred, f)
    }

    /// Run `f` on one connection inside an immediate (write) transaction
    pub fn with_transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Session<'_>) -> Result<T>,
    {
        self.scope(TransactionMode::Immediate, f)
    }

    fn scope<T, F>(&self, mode: TransactionMode, f: F) -> Result<T>
    where
        F: FnOnce(&Session<'_>) -> Result<T>,
    {
        let conn = self.pool.get()?;
        let session = Session {
            conn: &conn,
            snapshot: self.catalog.snapshot(),
            echo: self.echo(),
        };
        sqlite::in_transaction(&conn, mode, |_| f(&session))
    }

    fn session<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Session<'_>) -> Result<T>,
    {
        let conn = self.pool.get()?;
        f(&Session {
            conn: &conn,
            snapshot: self.catalog.snapshot(),
            echo: self.echo(),
        })
    }

    /// Run a hand-written statement
    pub fn execute_raw(&self, sql: &str, params: &[DatabaseValue]) -> Result<usize> {
        self.session(|s| s.execute_raw(sql, params))
    }

    /// Run a hand-written query
    pub fn query_raw(&self, sql: &str, params: &[DatabaseValue]) -> Result<Vec<Row>> {
        self.session(|s| s.query_raw(sql, params))
    }
}

impl BlockingDataAccess for SyncDatabase {
    fn catalog(&self) -> Arc<CatalogSnapshot> {
        self.catalog.snapshot()
    }

    fn select(&self, query: &SelectBuilder) -> Result<Vec<Row>> {
        // compile before a connection is taken
        let stmt = query.build(&self.catalog.snapshot())?;
        let conn = self.pool.get()?;
        sqlite::query(&conn, &stmt, self.echo())
    }

    fn insert(&self, table: &str, rows: InsertRows) -> Result<InsertResult> {
        self.session(|s| s.insert(table, rows))
    }

    fn update(&self, table: &str, set: &RowValues, filter: &Filter) -> Result<usize> {
        self.session(|s| s.update(table, set, filter))
    }

    fn delete(&self, table: &str, filter: &Filter) -> Result<usize> {
        self.session(|s| s.delete(table, filter))
    }

    fn bulk_update(
        &self,
        table: &str,
        rows: &[RowValues],
        keys: &[&str],
        chunk_size: Option<usize>,
    ) -> Result<BulkUpdateReport> {
        let config = self.pool.config();
        let chunk_size = chunk_size.unwrap_or(config.default_chunk_size);

        let mut tracker = MutationTracker::start(table, "bulk update");
        let batches = tracker.compiled(compile_bulk_update(
            &self.catalog.snapshot(),
            table,
            rows,
            keys,
            chunk_size,
        ))?;

        let mut report = BulkUpdateReport::default();
        for (index, batch) in batches.iter().enumerate() {
            if index > 0 && !config.chunk_pause.is_zero() {
                std::thread::sleep(config.chunk_pause);
            }
            let outcome = self
                .pool
                .get()
                .and_then(|conn| sqlite::update_chunk(&conn, batch, index, config.echo));
            match outcome {
                Ok(affected) => {
                    report.chunks += 1;
                    report.affected += affected;
                }
                Err(e) => {
                    tracing::error!(
                        table,
                        committed_chunks = report.chunks,
                        total_chunks = batches.len(),
                        error = %e,
                        "bulk update stopped"
                    );
                    return tracker.finish(Err(e));
                }
            }
        }
        tracker.finish(Ok(report))
    }

    fn check_connection(&self) -> bool {
        match self.pool.get().and_then(|conn| sqlite::ping(&conn)) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, "database connection check failed");
                false
            }
        }
    }
}

/// One connection, handed to [`SyncDatabase::with_connection`] and
/// [`SyncDatabase::with_transaction`]
///
/// Statements run in the order issued and share the scope's transaction.
pub struct Session<'c> {
    conn: &'c Connection,
    snapshot: Arc<CatalogSnapshot>,
    echo: bool,
}

impl Session<'_> {
    /// Catalog snapshot taken when the session started
    pub fn catalog(&self) -> &CatalogSnapshot {
        &self.snapshot
    }

    pub fn select(&self, query: &SelectBuilder) -> Result<Vec<Row>> {
        let stmt = query.build(&self.snapshot)?;
        sqlite::query(self.conn, &stmt, self.echo)
    }

    pub fn insert(&self, table: &str, rows: impl Into<InsertRows>) -> Result<InsertResult> {
        let rows = rows.into();
        let mut tracker = MutationTracker::start(table, "insert");
        let compiled = tracker.compiled(compile_insert(&self.snapshot, table, &rows))?;
        let outcome = sqlite::in_transaction(self.conn, TransactionMode::Immediate, |conn| {
            sqlite::insert(conn, &compiled, self.echo)
        });
        tracker.finish(outcome)
    }

    pub fn update(&self, table: &str, set: &RowValues, filter: &Filter) -> Result<usize> {
        let mut tracker = MutationTracker::start(table, "update");
        let stmt = tracker.compiled(compile_update(&self.snapshot, table, set, filter))?;
        let outcome = sqlite::in_transaction(self.conn, TransactionMode::Immediate, |conn| {
            sqlite::execute(conn, &stmt, self.echo)
        });
        tracker.finish(outcome)
    }

    pub fn delete(&self, table: &str, filter: &Filter) -> Result<usize> {
        let mut tracker = MutationTracker::start(table, "delete");
        let stmt = tracker.compiled(compile_delete(&self.snapshot, table, filter))?;
        let outcome = sqlite::in_transaction(self.conn, TransactionMode::Immediate, |conn| {
            sqlite::execute(conn, &stmt, self.echo)
        });
        tracker.finish(outcome)
    }

    /// Bulk update on this session's connection
    ///
    /// Inside a scope the chunks join the scope's transaction, so they commit
    /// or roll back together, and no pause is taken between them.
    pub fn bulk_update(
        &self,
        table: &str,
        rows: &[RowValues],
        keys: &[&str],
        chunk_size: usize,
    ) -> Result<BulkUpdateReport> {
        let mut tracker = MutationTracker::start(table, "bulk update");
        let batches = tracker.compiled(compile_bulk_update(
            &self.snapshot,
            table,
            rows,
            keys,
            chunk_size,
        ))?;

        let outcome = batches.iter().enumerate().try_fold(
            BulkUpdateReport::default(),
            |mut report, (index, batch)| -> Result<BulkUpdateReport> {
                report.affected += sqlite::update_chunk(self.conn, batch, index, self.echo)?;
                report.chunks += 1;
                Ok(report)
            },
        );
        tracker.finish(outcome)
    }

    pub fn execute_raw(&self, sql: &str, params: &[DatabaseValue]) -> Result<usize> {
        sqlite::execute_raw(self.conn, sql, params, self.echo)
    }

    pub fn query_raw(&self, sql: &str, params: &[DatabaseValue]) -> Result<Vec<Row>> {
        sqlite::query_raw(self.conn, sql, params, self.echo)
    }
}
