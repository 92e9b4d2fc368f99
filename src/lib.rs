//! # Rust Data Layer
//!
//! A declarative data-access layer over a relational store whose schema is
//! discovered at startup. Callers describe reads and writes with table
//! names, column lists and filter mappings; the layer validates every name
//! against the discovered catalog, compiles the request into a parameterized
//! statement and runs it inside a scoped connection.
//!
//! ## Features
//!
//! - **Schema Catalog**: tables and columns discovered from the database,
//!   swapped atomically on reload
//! - **Filter Grammar**: `field` / `field__op` keys with `not, gt, gte, lt,
//!   lte, in, notin, like`, plus nested `or__` groups
//! - **Query Builder**: projection, DISTINCT, joins, GROUP BY, aggregates
//!   (`count, sum, avg, min, max`), ordering and pagination
//! - **Mutations**: single and bulk inserts, guarded updates and deletes,
//!   `field__inc` relative updates, chunked bulk updates
//! - **Connection Scopes**: commit on success, rollback on error, in a
//!   blocking and an async flavour sharing the same compilers
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! rust_data_layer = "0.1"
//! tokio = { version = "1", features = ["full"] }
//! ```
//!
//! ### Basic Usage
//!
//! ```rust,no_run
//! use rust_data_layer::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let db = AsyncDatabase::connect(PoolConfig::new("app.db")).await?;
//!
//!     // status = 'a' AND (kind = 'x' OR kind = 'y'), newest first
//!     let rows = db
//!         .select(
//!             &SelectBuilder::new("items")
//!                 .columns(&["id", "status"])
//!                 .filter(
//!                     Filter::new()
//!                         .with("status", "a")
//!                         .or([Filter::new().with("kind", "x"), Filter::new().with("kind", "y")]),
//!                 )
//!                 .order_by("id")
//!                 .limit(20),
//!         )
//!         .await?;
//!
//!     for row in &rows {
//!         println!("{} {}", row[0].as_string(), row["status"].as_string());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ### Bulk Updates
//!
//! ```rust,no_run
//! use rust_data_layer::prelude::*;
//!
//! fn main() -> Result<()> {
//!     let db = SyncDatabase::connect(PoolConfig::from_env()?)?;
//!     let rows: Vec<RowValues> = (1..=5000)
//!         .map(|id| values([("id", DatabaseValue::from(id)), ("status", "done".into())]))
//!         .collect();
//!
//!     // one batched statement per 1000 rows, each chunk in its own transaction
//!     let report = db.bulk_update("items", &rows, &["id"], Some(1000))?;
//!     assert_eq!(report.chunks, 5);
//!     Ok(())
//! }
//! ```

/// Core data-access types and traits
pub mod core;

/// Database backend implementations
pub mod backends;

/// Prelude for convenient imports
///
/// ```rust
/// use rust_data_layer::prelude::*;
///
/// let filter = Filter::new().with("price__gte", 100);
/// assert_eq!(filter.len(), 1);
/// ```
pub mod prelude {
    pub use crate::core::{
        values, BlockingDataAccess, BulkUpdateReport, DataAccess, DatabaseError, DatabaseValue,
        Filter, InsertResult, InsertRows, JoinSpec, PoolConfig, Result, Row, RowValues,
        SchemaCatalog, SelectBuilder,
    };

    #[cfg(feature = "sqlite")]
    pub use crate::backends::{AsyncDatabase, AsyncSession, Session, SyncDatabase};
}

// Re-export at root level for convenience
pub use core::{
    BlockingDataAccess, DataAccess, DatabaseError, DatabaseValue, Filter, PoolConfig, Result, Row,
    SchemaCatalog, SelectBuilder,
};

#[cfg(feature = "sqlite")]
pub use backends::{AsyncDatabase, SyncDatabase};
