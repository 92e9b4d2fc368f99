//! Schema catalog
//!
//! The catalog is the single source of truth for "does this table / column
//! exist". It is discovered from the connected database at startup and
//! replaced wholesale on reload: readers clone an `Arc` to an immutable
//! [`CatalogSnapshot`] and never observe a half-built catalog.

use super::error::{DatabaseError, Result};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Logical column type, derived from the declared type with SQLite's
/// affinity rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
    Blob,
    Numeric,
}

impl ColumnType {
    /// Derive the logical type from a declared column type
    pub fn from_declared(declared: &str) -> Self {
        let declared = declared.to_ascii_uppercase();
        if declared.contains("INT") {
            ColumnType::Integer
        } else if declared.contains("CHAR") || declared.contains("CLOB") || declared.contains("TEXT")
        {
            ColumnType::Text
        } else if declared.is_empty() || declared.contains("BLOB") {
            ColumnType::Blob
        } else if declared.contains("REAL") || declared.contains("FLOA") || declared.contains("DOUB")
        {
            ColumnType::Real
        } else {
            ColumnType::Numeric
        }
    }

    /// Whether arithmetic (`__inc`, `sum`, `avg`) makes sense on this type
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ColumnType::Integer | ColumnType::Real | ColumnType::Numeric
        )
    }
}

/// One column of a discovered table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub declared_type: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub primary_key: bool,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, declared_type: impl Into<String>) -> Self {
        let declared_type = declared_type.into();
        Self {
            name: name.into(),
            column_type: ColumnType::from_declared(&declared_type),
            declared_type,
            nullable: true,
            primary_key: false,
        }
    }

    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }
}

/// A discovered table: name plus ordered columns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    name: String,
    columns: Vec<ColumnDescriptor>,
    without_rowid: bool,
}

impl TableDescriptor {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDescriptor>) -> Self {
        Self {
            name: name.into(),
            columns,
            without_rowid: false,
        }
    }

    /// Mark the table as declared `WITHOUT ROWID`
    #[must_use]
    pub fn without_rowid(mut self) -> Self {
        self.without_rowid = true;
        self
    }

    pub fn has_rowid(&self) -> bool {
        !self.without_rowid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Look up a column or fail with [`DatabaseError::UnknownColumn`]
    pub fn require_column(&self, name: &str) -> Result<&ColumnDescriptor> {
        self.column(name)
            .ok_or_else(|| DatabaseError::unknown_column(&self.name, name))
    }

    /// The column aliasing SQLite's rowid, if any
    ///
    /// That is a single-column primary key declared exactly `INTEGER` on a
    /// rowid table; its value is what `last_insert_rowid()` reports.
    pub fn rowid_alias(&self) -> Option<&ColumnDescriptor> {
        if self.without_rowid {
            return None;
        }
        let mut keys = self.columns.iter().filter(|c| c.primary_key);
        match (keys.next(), keys.next()) {
            (Some(key), None) if key.declared_type.eq_ignore_ascii_case("INTEGER") => Some(key),
            _ => None,
        }
    }
}

/// Immutable set of tables as of one discovery
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    tables: HashMap<String, Arc<TableDescriptor>>,
}

impl CatalogSnapshot {
    pub fn new(tables: impl IntoIterator<Item = TableDescriptor>) -> Self {
        Self {
            tables: tables
                .into_iter()
                .map(|t| (t.name.clone(), Arc::new(t)))
                .collect(),
        }
    }

    /// Resolve a table or fail with [`DatabaseError::UnknownTable`]
    pub fn resolve(&self, table: &str) -> Result<Arc<TableDescriptor>> {
        self.tables
            .get(table)
            .cloned()
            .ok_or_else(|| DatabaseError::unknown_table(table))
    }

    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    /// Table names, sorted
    pub fn table_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tables.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Process-wide catalog handle shared by every database handle
///
/// Reads take a short read lock to clone the current `Arc`; a reload builds
/// a complete new snapshot first and swaps it in under the write lock.
/// Reloads are serialized: discovery and swap happen under one reload lock,
/// so a slow reload can never install an older schema over a newer one.
#[derive(Debug, Default)]
pub struct SchemaCatalog {
    current: RwLock<Arc<CatalogSnapshot>>,
    reload_lock: Mutex<()>,
    generation: AtomicU64,
}

impl SchemaCatalog {
    pub fn new(snapshot: CatalogSnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
            reload_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    /// The snapshot in effect right now
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        Arc::clone(&self.current.read())
    }

    /// Resolve a table against the current snapshot
    pub fn resolve(&self, table: &str) -> Result<Arc<TableDescriptor>> {
        self.snapshot().resolve(table)
    }

    /// Swap in a freshly discovered snapshot
    ///
    /// Waits for any reload in progress.
    pub fn replace(&self, snapshot: CatalogSnapshot) {
        let _reload = self.reload_lock.lock();
        self.install(snapshot);
    }

    fn install(&self, snapshot: CatalogSnapshot) {
        let tables = snapshot.len();
        *self.current.write() = Arc::new(snapshot);
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::info!(tables, generation, "schema catalog replaced");
    }

    /// Rediscover with `discover` and swap the result in
    ///
    /// The old snapshot stays in effect if discovery fails. Blocks while
    /// another reload is running; callers on an async runtime run this on a
    /// blocking thread.
    pub fn reload<F>(&self, discover: F) -> Result<()>
    where
        F: FnOnce() -> Result<CatalogSnapshot>,
    {
        let _reload = self.reload_lock.lock();
        let snapshot = discover()?;
        self.install(snapshot);
        Ok(())
    }

    /// Number of completed replacements since construction
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}
