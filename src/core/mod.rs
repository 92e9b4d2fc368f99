//! Core data-access types and traits
//!
//! This module provides the backend-neutral building blocks: the schema
//! catalog, the filter grammar and its compiler, the query and mutation
//! compilers, values and rows, configuration and errors. Nothing in here
//! blocks or suspends.

pub mod catalog;
pub mod config;
pub mod database;
pub mod error;
pub mod filter;
pub mod mutation;
pub mod predicate;
pub mod query_builder;
pub mod row;
pub mod statement;
pub mod transaction;
pub mod value;

// Re-export commonly used types
pub use catalog::{CatalogSnapshot, ColumnDescriptor, ColumnType, SchemaCatalog, TableDescriptor};
pub use config::PoolConfig;
pub use database::{BlockingDataAccess, DataAccess, PoolStats};
pub use error::{DatabaseError, Result};
pub use filter::{Filter, FilterValue, Operator};
pub use mutation::{BulkUpdateReport, InsertResult, InsertRows};
pub use predicate::Predicate;
pub use query_builder::{AggregateFunction, JoinSpec, OrderDirection, SelectBuilder};
pub use row::Row;
pub use statement::{BatchStatement, Statement};
pub use transaction::{MutationPhase, TransactionMode};
pub use value::{values, DatabaseValue, RowValues};
