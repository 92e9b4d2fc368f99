//! Data-access traits
//!
//! This module defines the operations every handle exposes, in an async and
//! a blocking flavour. Both flavours share the same compilers; they differ
//! only in how a connection is acquired and a statement awaited.

use super::catalog::CatalogSnapshot;
use super::error::Result;
use super::filter::Filter;
use super::mutation::{BulkUpdateReport, InsertResult, InsertRows};
use super::query_builder::SelectBuilder;
use super::row::Row;
use super::value::RowValues;
use async_trait::async_trait;
use std::sync::Arc;

/// Suspension-capable data access
///
/// Acquiring a connection and awaiting a statement are the only points where
/// the calling task may be parked. Compilation never suspends.
#[async_trait]
pub trait DataAccess: Send + Sync {
    /// Catalog snapshot requests are compiled against
    fn catalog(&self) -> Arc<CatalogSnapshot>;

    /// Run a SELECT
    async fn select(&self, query: &SelectBuilder) -> Result<Vec<Row>>;

    /// Insert one row or many rows sharing the same columns
    async fn insert(&self, table: &str, rows: InsertRows) -> Result<InsertResult>;

    /// Update the rows matching `filter`; an empty filter is refused
    async fn update(&self, table: &str, set: &RowValues, filter: &Filter) -> Result<usize>;

    /// Delete the rows matching `filter`; an empty filter is refused
    async fn delete(&self, table: &str, filter: &Filter) -> Result<usize>;

    /// Update rows addressed by `keys`, one batched statement per chunk
    ///
    /// Atomic per chunk only: chunks that committed before a failure stay
    /// committed. `chunk_size` falls back to the configured default.
    async fn bulk_update(
        &self,
        table: &str,
        rows: &[RowValues],
        keys: &[&str],
        chunk_size: Option<usize>,
    ) -> Result<BulkUpdateReport>;

    /// Run `SELECT 1`; failures are logged and reported as `false`
    async fn check_connection(&self) -> bool;
}

/// Blocking data access, one pooled connection per call
pub trait BlockingDataAccess: Send + Sync {
    fn catalog(&self) -> Arc<CatalogSnapshot>;

    fn select(&self, query: &SelectBuilder) -> Result<Vec<Row>>;

    fn insert(&self, table: &str, rows: InsertRows) -> Result<InsertResult>;

    fn update(&self, table: &str, set: &RowValues, filter: &Filter) -> Result<usize>;

    fn delete(&self, table: &str, filter: &Filter) -> Result<usize>;

    fn bulk_update(
        &self,
        table: &str,
        rows: &[RowValues],
        keys: &[&str],
        chunk_size: Option<usize>,
    ) -> Result<BulkUpdateReport>;

    fn check_connection(&self) -> bool;
}

/// Pool statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Total number of connections in the pool
    pub size: usize,
    /// Number of available connections
    pub available: usize,
    /// Number of requests waiting for a connection
    pub waiting: usize,
}
