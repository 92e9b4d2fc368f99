//! Database backend implementations
//!
//! This module contains the SQLite statement runner and the two handles
//! built on it: a blocking one and an async one.

#[cfg(feature = "sqlite")]
pub mod blocking;
#[cfg(feature = "sqlite")]
pub mod pooled_sqlite;
#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "sqlite")]
pub use blocking::{BlockingPool, PooledConnection, Session, SyncDatabase};
#[cfg(feature = "sqlite")]
pub use pooled_sqlite::{AsyncDatabase, AsyncSession};
