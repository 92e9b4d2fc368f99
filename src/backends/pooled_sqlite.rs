//! Pooled async SQLite backend
//!
//! This module provides the suspension-capable handle. Connections come from
//! a `deadpool-sqlite` pool and every statement runs through
//! `Object::interact` on Tokio's blocking pool, so acquiring a connection and
//! awaiting a statement are the only points where a task parks.

use super::sqlite;
use crate::core::catalog::{CatalogSnapshot, SchemaCatalog};
use crate::core::config::PoolConfig;
use crate::core::database::{DataAccess, PoolStats};
use crate::core::error::{DatabaseError, Result};
use crate::core::filter::Filter;
use crate::core::mutation::{
    compile_bulk_update, compile_delete, compile_insert, compile_update, BulkUpdateReport,
    InsertResult, InsertRows,
};
use crate::core::query_builder::SelectBuilder;
use crate::core::row::Row;
use crate::core::statement::Statement;
use crate::core::transaction::{MutationTracker, TransactionMode};
use crate::core::value::{DatabaseValue, RowValues};
use async_trait::async_trait;
use deadpool_sqlite::{Config, InteractError, Object, Pool, PoolError, Runtime};
use rusqlite::{Connection, InterruptHandle};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn interact_error(e: InteractError) -> DatabaseError {
    DatabaseError::other(format!("Interact error: {}", e))
}

/// Current-thread runtime for releasing connections when no runtime is
/// running; pooled connections close on Tokio's blocking pool
fn cleanup_runtime() -> Option<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| tracing::error!(error = %e, "failed to build runtime for connection cleanup"))
        .ok()
}

/// Roll back an abandoned transaction, closing the connection if that fails
async fn release_open_transaction(conn: Object) {
    let outcome = conn.interact(|conn| sqlite::rollback(conn)).await;
    let failure = match outcome {
        Ok(Ok(())) => return,
        Ok(Err(e)) => e,
        Err(e) => interact_error(e),
    };
    tracing::error!(error = %failure, "closing connection after failed rollback");
    drop(Object::take(conn));
}

/// Interrupts the connection's in-flight statement when dropped while armed
///
/// Armed around every awaited statement: a caller that is cancelled, or a
/// statement that outlives the operation timeout, aborts the statement so the
/// connection goes back to the pool promptly. Work that has not reached the
/// connection yet sees the cancellation flag and never starts.
struct InterruptOnDrop {
    handle: Arc<InterruptHandle>,
    cancelled: Arc<AtomicBool>,
    armed: bool,
}

impl InterruptOnDrop {
    fn arm(handle: &Arc<InterruptHandle>) -> Self {
        Self {
            handle: Arc::clone(handle),
            cancelled: Arc::new(AtomicBool::new(false)),
            armed: true,
        }
    }

    fn cancellation(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for InterruptOnDrop {
    fn drop(&mut self) {
        if self.armed {
            tracing::debug!("interrupting in-flight statement");
            self.cancelled.store(true, Ordering::SeqCst);
            self.handle.interrupt();
        }
    }
}

/// Async database handle
///
/// # Example
///
/// ```no_run
/// use rust_data_layer::prelude::*;
///
/// #[tokio::main]
/// async fn main() -> Result<()> {
///     let db = AsyncDatabase::connect(PoolConfig::new("app.db")).await?;
///
///     let affected = db
///         .update(
///             "stocks",
///             &values([("price", 101.5)]),
///             &Filter::new().with("ticker", "ACME"),
///         )
///         .await?;
///     println!("updated {} rows", affected);
///     Ok(())
/// }
/// ```
pub struct AsyncDatabase {
    pool: Pool,
    catalog: Arc<SchemaCatalog>,
    config: Arc<PoolConfig>,
}

impl AsyncDatabase {
    /// Create the pool and discover the schema
    ///
    /// # Errors
    ///
    /// Returns error if pool creation, the first connection or discovery fails
    pub async fn connect(config: PoolConfig) -> Result<Self> {
        let db = Self::with_catalog(config, Arc::new(SchemaCatalog::default())).await?;
        db.reload_catalog().await?;
        Ok(db)
    }

    /// Create the pool around an existing catalog, without discovery
    ///
    /// The same catalog can back a [`SyncDatabase`](super::SyncDatabase) on
    /// the same database.
    pub async fn with_catalog(config: PoolConfig, catalog: Arc<SchemaCatalog>) -> Result<Self> {
        config.validate()?;
        tracing::info!(
            connection = %config.connection_string,
            max_size = config.max_size,
            "opening async pool"
        );

        let mut pool_config = Config::new(config.connection_string.clone());
        let mut limits = deadpool_sqlite::PoolConfig::new(config.max_size);
        limits.timeouts.wait = Some(config.timeout);
        limits.timeouts.create = Some(config.timeout);
        limits.timeouts.recycle = Some(config.timeout);
        pool_config.pool = Some(limits);

        let pool = pool_config
            .create_pool(Runtime::Tokio1)
            .map_err(|e| DatabaseError::connection(format!("Failed to create pool: {}", e)))?;

        let db = Self {
            pool,
            catalog,
            config: Arc::new(config),
        };
        // fail fast on an unreachable database
        db.session().await?;
        Ok(db)
    }

    /// The shared catalog handle
    pub fn catalog_handle(&self) -> Arc<SchemaCatalog> {
        Arc::clone(&self.catalog)
    }

    /// Rediscover the schema and swap the new snapshot in
    ///
    /// Discovery and swap run on a blocking thread under the catalog's
    /// reload lock, serialized with every other reload of the same catalog.
    pub async fn reload_catalog(&self) -> Result<()> {
        let session = self.session().await?;
        let catalog = Arc::clone(&self.catalog);
        session
            .run(move |conn| catalog.reload(|| sqlite::discover(conn)))
            .await
    }

    /// Get pool statistics
    pub fn stats(&self) -> PoolStats {
        let status = self.pool.status();
        PoolStats {
            size: status.size,
            available: status.available,
            waiting: status.waiting,
        }
    }

    async fn acquire(&self) -> Result<Object> {
        self.pool.get().await.map_err(|e| match e {
            PoolError::Timeout(_) => {
                DatabaseError::connection_timeout(self.config.timeout.as_millis() as u64)
            }
            other => DatabaseError::connection(format!("Failed to acquire connection: {}", other)),
        })
    }

    /// Check out one connection as a session in autocommit mode
    ///
    /// Each statement on the session commits on its own unless the session
    /// is used inside [`AsyncDatabase::with_transaction`].
    pub async fn session(&self) -> Result<AsyncSession> {
        let conn = self.acquire().await?;
        let busy_timeout = self.config.busy_timeout;
        let interrupt = conn
            .interact(move |conn| {
                sqlite::configure(conn, busy_timeout)?;
                Ok::<_, rusqlite::Error>(conn.get_interrupt_handle())
            })
            .await
            .map_err(interact_error)?
            .map_err(|e| DatabaseError::connection(format!("Failed to configure connection: {}", e)))?;

        Ok(AsyncSession {
            conn: Some(conn),
            interrupt: Arc::new(interrupt),
            snapshot: self.catalog.snapshot(),
            config: Arc::clone(&self.config),
            transaction_open: AtomicBool::new(false),
        })
    }

    /// Run `f` on one connection inside a deferred transaction
    ///
    /// Commits when the future resolves to `Ok`, rolls back when it resolves
    /// to `Err`. If the returned future is dropped mid-way, the in-flight
    /// statement is interrupted and the transaction rolled back.
    pub async fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        F: for<'a> FnOnce(
                &'a AsyncSession,
            ) -> Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>
            + Send,
        T: Send,
    {
        self.scope(TransactionMode::Deferred, f).await
    }

    /// Run `f` on one connection inside an immediate (write) transaction
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use rust_data_layer::prelude::*;
    /// # async fn example(db: &AsyncDatabase) -> Result<()> {
    /// db.with_transaction(|session| {
    ///     Box::pin(async move {
    ///         session.insert("accounts", values([("id", 1), ("balance", 100)])).await?;
    ///         session
    ///             .update("accounts", &values([("balance__inc", -100)]), &Filter::new().with("id", 2))
    ///             .await?;
    ///         Ok(())
    ///     })
    /// })
    /// .await
    /// # }
    /// ```
    pub async fn with_transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: for<'a> FnOnce(
                &'a AsyncSession,
            ) -> Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>
            + Send,
        T: Send,
    {
        self.scope(TransactionMode::Immediate, f).await
    }

    async fn scope<T, F>(&self, mode: TransactionMode, f: F) -> Result<T>
    where
        F: for<'a> FnOnce(
                &'a AsyncSession,
            ) -> Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>
            + Send,
        T: Send,
    {
        let session = self.session().await?;
        session.begin(mode).await?;

        match f(&session).await {
            Ok(result) => match session.commit().await {
                Ok(()) => Ok(result),
                Err(e) => {
                    session.rollback_quietly().await;
                    Err(e)
                }
            },
            Err(e) => {
                session.rollback_quietly().await;
                Err(e)
            }
        }
    }

    /// Run a hand-written statement
    pub async fn execute_raw(&self, sql: &str, params: &[DatabaseValue]) -> Result<usize> {
        self.session().await?.execute_raw(sql, params).await
    }

    /// Run a hand-written query
    pub async fn query_raw(&self, sql: &str, params: &[DatabaseValue]) -> Result<Vec<Row>> {
        self.session().await?.query_raw(sql, params).await
    }
}

#[async_trait]
impl DataAccess for AsyncDatabase {
    fn catalog(&self) -> Arc<CatalogSnapshot> {
        self.catalog.snapshot()
    }

    async fn select(&self, query: &SelectBuilder) -> Result<Vec<Row>> {
        // compile before a connection is taken
        let stmt = query.build(&self.catalog.snapshot())?;
        let echo = self.config.echo;
        self.session()
            .await?
            .run(move |conn| sqlite::query(conn, &stmt, echo))
            .await
    }

    async fn insert(&self, table: &str, rows: InsertRows) -> Result<InsertResult> {
        self.session().await?.insert(table, rows).await
    }

    async fn update(&self, table: &str, set: &RowValues, filter: &Filter) -> Result<usize> {
        self.session().await?.update(table, set, filter).await
    }

    async fn delete(&self, table: &str, filter: &Filter) -> Result<usize> {
        self.session().await?.delete(table, filter).await
    }

    async fn bulk_update(
        &self,
        table: &str,
        rows: &[RowValues],
        keys: &[&str],
        chunk_size: Option<usize>,
    ) -> Result<BulkUpdateReport> {
        let chunk_size = chunk_size.unwrap_or(self.config.default_chunk_size);
        let pause = self.config.chunk_pause;
        let echo = self.config.echo;

        let mut tracker = MutationTracker::start(table, "bulk update");
        let batches = tracker.compiled(compile_bulk_update(
            &self.catalog.snapshot(),
            table,
            rows,
            keys,
            chunk_size,
        ))?;
        let total = batches.len();

        let mut report = BulkUpdateReport::default();
        for (index, batch) in batches.into_iter().enumerate() {
            // cancellation is observed here, between chunks
            if index > 0 && !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
            let outcome = match self.session().await {
                Ok(session) => {
                    session
                        .run_to_completion(move |conn| sqlite::update_chunk(conn, &batch, index, echo))
                        .await
                }
                Err(e) => Err(e),
            };
            match outcome {
                Ok(affected) => {
                    report.chunks += 1;
                    report.affected += affected;
                }
                Err(e) => {
                    tracing::error!(
                        table,
                        committed_chunks = report.chunks,
                        total_chunks = total,
                        error = %e,
                        "bulk update stopped"
                    );
                    return tracker.finish(Err(e));
                }
            }
        }
        tracker.finish(Ok(report))
    }

    async fn check_connection(&self) -> bool {
        let outcome = match self.session().await {
            Ok(session) => session.run(|conn| sqlite::ping(conn)).await,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, "database connection check failed");
                false
            }
        }
    }
}

/// One pooled connection, held for the lifetime of the session
///
/// Statements run in the order issued. A session dropped with its
/// transaction still open is rolled back in the background; if that is not
/// possible the connection is closed instead of being returned to the pool.
pub struct AsyncSession {
    conn: Option<Object>,
    interrupt: Arc<InterruptHandle>,
    snapshot: Arc<CatalogSnapshot>,
    config: Arc<PoolConfig>,
    transaction_open: AtomicBool,
}

impl AsyncSession {
    /// Catalog snapshot taken when the session started
    pub fn catalog(&self) -> &CatalogSnapshot {
        &self.snapshot
    }

    fn connection(&self) -> Result<&Object> {
        self.conn
            .as_ref()
            .ok_or_else(|| DatabaseError::transaction("Session already released"))
    }

    /// Run `f` on the connection, bounded by the operation timeout and
    /// interrupted if the caller goes away
    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.connection()?;
        let timeout = self.config.operation_timeout;

        let guard = InterruptOnDrop::arm(&self.interrupt);
        let cancelled = guard.cancellation();
        let work = conn.interact(move |conn| {
            // a timed-out caller must not have its statement run late
            if cancelled.load(Ordering::SeqCst) {
                return Err(DatabaseError::other("statement cancelled before it started"));
            }
            f(conn)
        });
        match tokio::time::timeout(timeout, work).await {
            Ok(result) => {
                guard.disarm();
                result.map_err(interact_error)?
            }
            Err(_) => {
                drop(guard);
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, "statement timed out");
                Err(DatabaseError::query_timeout(timeout.as_millis() as u64))
            }
        }
    }

    /// Run `f` without timeout or interrupt; it always finishes once started
    async fn run_to_completion<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.connection()?
            .interact(move |conn| f(conn))
            .await
            .map_err(interact_error)?
    }

    async fn begin(&self, mode: TransactionMode) -> Result<()> {
        self.run(move |conn| sqlite::begin(conn, mode)).await?;
        self.transaction_open.store(true, Ordering::Release);
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        self.run(|conn| sqlite::commit(conn)).await?;
        self.transaction_open.store(false, Ordering::Release);
        Ok(())
    }

    async fn rollback_quietly(&self) {
        match self.run(|conn| sqlite::rollback(conn)).await {
            Ok(()) => self.transaction_open.store(false, Ordering::Release),
            Err(e) => tracing::warn!(error = %e, "rollback failed, leaving it to session drop"),
        }
    }

    pub async fn select(&self, query: &SelectBuilder) -> Result<Vec<Row>> {
        let stmt = query.build(&self.snapshot)?;
        let echo = self.config.echo;
        self.run(move |conn| sqlite::query(conn, &stmt, echo)).await
    }

    pub async fn insert(&self, table: &str, rows: impl Into<InsertRows> + Send) -> Result<InsertResult> {
        let rows = rows.into();
        let mut tracker = MutationTracker::start(table, "insert");
        let compiled = tracker.compiled(compile_insert(&self.snapshot, table, &rows))?;
        let echo = self.config.echo;
        let outcome = self
            .run(move |conn| {
                sqlite::in_transaction(conn, TransactionMode::Immediate, |conn| {
                    sqlite::insert(conn, &compiled, echo)
                })
            })
            .await;
        tracker.finish(outcome)
    }

    pub async fn update(&self, table: &str, set: &RowValues, filter: &Filter) -> Result<usize> {
        let mut tracker = MutationTracker::start(table, "update");
        let stmt = tracker.compiled(compile_update(&self.snapshot, table, set, filter))?;
        let outcome = self.execute_in_transaction(stmt).await;
        tracker.finish(outcome)
    }

    pub async fn delete(&self, table: &str, filter: &Filter) -> Result<usize> {
        let mut tracker = MutationTracker::start(table, "delete");
        let stmt = tracker.compiled(compile_delete(&self.snapshot, table, filter))?;
        let outcome = self.execute_in_transaction(stmt).await;
        tracker.finish(outcome)
    }

    async fn execute_in_transaction(&self, stmt: Statement) -> Result<usize> {
        let echo = self.config.echo;
        self.run(move |conn| {
            sqlite::in_transaction(conn, TransactionMode::Immediate, |conn| {
                sqlite::execute(conn, &stmt, echo)
            })
        })
        .await
    }

    /// Bulk update on this session's connection
    ///
    /// Inside a scope the chunks join the scope's transaction, so they commit
    /// or roll back together, and no pause is taken between them.
    pub async fn bulk_update(
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
        let echo = self.config.echo;

        let outcome = self
            .run_to_completion(move |conn| {
                batches.iter().enumerate().try_fold(
                    BulkUpdateReport::default(),
                    |mut report, (index, batch)| -> Result<BulkUpdateReport> {
                        report.affected += sqlite::update_chunk(conn, batch, index, echo)?;
                        report.chunks += 1;
                        Ok(report)
                    },
                )
            })
            .await;
        tracker.finish(outcome)
    }

    pub async fn execute_raw(&self, sql: &str, params: &[DatabaseValue]) -> Result<usize> {
        let sql = sql.to_string();
        let params = params.to_vec();
        let echo = self.config.echo;
        self.run(move |conn| sqlite::execute_raw(conn, &sql, &params, echo))
            .await
    }

    pub async fn query_raw(&self, sql: &str, params: &[DatabaseValue]) -> Result<Vec<Row>> {
        let sql = sql.to_string();
        let params = params.to_vec();
        let echo = self.config.echo;
        self.run(move |conn| sqlite::query_raw(conn, &sql, &params, echo))
            .await
    }
}

impl Drop for AsyncDatabase {
    fn drop(&mut self) {
        if tokio::runtime::Handle::try_current().is_ok() {
            return;
        }
        // idle connections close through spawn_blocking
        match cleanup_runtime() {
            Some(runtime) => {
                let _entered = runtime.enter();
                self.pool.close();
            }
            None => {
                tracing::error!("leaking pool dropped outside a runtime");
                std::mem::forget(self.pool.clone());
            }
        }
    }
}

impl Drop for AsyncSession {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        let open = self.transaction_open.load(Ordering::Acquire);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                if open {
                    tracing::warn!("session dropped with an open transaction, rolling back");
                    handle.spawn(release_open_transaction(conn));
                }
            }
            Err(_) => match cleanup_runtime() {
                Some(runtime) => {
                    if open {
                        tracing::warn!("session dropped outside a runtime, rolling back");
                        runtime.block_on(release_open_transaction(conn));
                    } else {
                        let _entered = runtime.enter();
                        drop(conn);
                    }
                }
                None => {
                    tracing::error!("leaking connection dropped outside a runtime");
                    std::mem::forget(conn);
                }
            },
        }
    }
}
