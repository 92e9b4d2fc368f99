//! Error types for the data-access layer
//!
//! This module defines every failure the layer reports, from filter
//! compilation through driver execution. Each variant carries the table,
//! field, operator or function that caused it.

/// Result type alias for data-access operations
pub type Result<T> = std::result::Result<T, DatabaseError>;

/// Error types for data-access operations
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// Table is not present in the schema catalog
    #[error("Unknown table: {0}")]
    UnknownTable(String),

    /// Field does not resolve to a column of the target table
    #[error("Unknown column '{column}' in table '{table}'")]
    UnknownColumn { table: String, column: String },

    /// Operator suffix outside the closed operator set
    #[error("Unsupported operator '{operator}' on field '{field}'")]
    UnsupportedOperator { field: String, operator: String },

    /// Aggregate function outside the allow-list
    #[error("Unsupported aggregate function '{function}' for alias '{alias}'")]
    UnsupportedAggregateFunction { alias: String, function: String },

    /// UPDATE / DELETE requested without any condition
    #[error("{operation} on '{table}' requires at least one condition")]
    MissingCondition {
        table: String,
        operation: &'static str,
    },

    /// Uniqueness or foreign-key violation on write
    #[error("Constraint violation on '{table}': {message}")]
    ConstraintViolation { table: String, message: String },

    /// Any other driver-level failure
    #[error("Execution failed on '{table}': {message}")]
    ExecutionFailure {
        table: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Malformed request shape (wrong value kind, non-uniform batch, ...)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Named access on a row that has no such column
    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    /// Connection error (generic)
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Connection timeout
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout { timeout_ms: u64 },

    /// Connection pool exhausted
    #[error("Connection pool exhausted: {active}/{max} connections in use")]
    PoolExhausted { active: usize, max: usize },

    /// Query timeout
    #[error("Query timeout after {timeout_ms}ms")]
    QueryTimeout { timeout_ms: u64 },

    /// Transaction error
    #[error("Transaction error: {0}")]
    TransactionError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl DatabaseError {
    /// Create an unknown table error
    pub fn unknown_table(table: impl Into<String>) -> Self {
        DatabaseError::UnknownTable(table.into())
    }

    /// Create an unknown column error
    pub fn unknown_column(table: impl Into<String>, column: impl Into<String>) -> Self {
        DatabaseError::UnknownColumn {
            table: table.into(),
            column: column.into(),
        }
    }

    /// Create an unsupported operator error
    pub fn unsupported_operator(field: impl Into<String>, operator: impl Into<String>) -> Self {
        DatabaseError::UnsupportedOperator {
            field: field.into(),
            operator: operator.into(),
        }
    }

    /// Create an unsupported aggregate function error
    pub fn unsupported_aggregate(alias: impl Into<String>, function: impl Into<String>) -> Self {
        DatabaseError::UnsupportedAggregateFunction {
            alias: alias.into(),
            function: function.into(),
        }
    }

    /// Create a missing condition error
    pub fn missing_condition(table: impl Into<String>, operation: &'static str) -> Self {
        DatabaseError::MissingCondition {
            table: table.into(),
            operation,
        }
    }

    /// Create an execution failure without an underlying driver error
    pub fn execution(table: impl Into<String>, message: impl Into<String>) -> Self {
        DatabaseError::ExecutionFailure {
            table: table.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create an invalid request error
    pub fn invalid<S: Into<String>>(msg: S) -> Self {
        DatabaseError::InvalidRequest(msg.into())
    }

    /// Create a new connection error (generic)
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        DatabaseError::ConnectionError(msg.into())
    }

    /// Create a connection timeout error
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        DatabaseError::ConnectionTimeout { timeout_ms }
    }

    /// Create a pool exhausted error
    pub fn pool_exhausted(active: usize, max: usize) -> Self {
        DatabaseError::PoolExhausted { active, max }
    }

    /// Create a query timeout error
    pub fn query_timeout(timeout_ms: u64) -> Self {
        DatabaseError::QueryTimeout { timeout_ms }
    }

    /// Create a new transaction error
    pub fn transaction<S: Into<String>>(msg: S) -> Self {
        DatabaseError::TransactionError(msg.into())
    }

    /// Create a generic error
    pub fn other<S: Into<String>>(msg: S) -> Self {
        DatabaseError::Other(msg.into())
    }

    /// Classify a SQLite error raised while working on `table`
    ///
    /// Constraint failures (UNIQUE, FOREIGN KEY, NOT NULL, CHECK) become
    /// [`DatabaseError::ConstraintViolation`]; everything else is an
    /// [`DatabaseError::ExecutionFailure`] that keeps the driver error as source.
    #[cfg(feature = "sqlite")]
    pub fn from_sqlite(table: impl Into<String>, err: rusqlite::Error) -> Self {
        let table = table.into();
        if let rusqlite::Error::SqliteFailure(code, message) = &err {
            if code.code == rusqlite::ErrorCode::ConstraintViolation {
                return DatabaseError::ConstraintViolation {
                    table,
                    message: message.clone().unwrap_or_else(|| code.to_string()),
                };
            }
        }
        DatabaseError::ExecutionFailure {
            table,
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }

    /// Whether this error was raised before any statement reached the driver
    pub fn is_compile_error(&self) -> bool {
        matches!(
            self,
            DatabaseError::UnknownTable(_)
                | DatabaseError::UnknownColumn { .. }
                | DatabaseError::UnsupportedOperator { .. }
                | DatabaseError::UnsupportedAggregateFunction { .. }
                | DatabaseError::MissingCondition { .. }
                | DatabaseError::InvalidRequest(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = DatabaseError::unknown_column("users", "nickname");
        assert!(matches!(err, DatabaseError::UnknownColumn { .. }));

        let err = DatabaseError::missing_condition("users", "update");
        assert!(matches!(err, DatabaseError::MissingCondition { .. }));
        assert!(err.is_compile_error());

        let err = DatabaseError::connection("refused");
        assert!(!err.is_compile_error());
    }

    #[test]
    fn test_error_display() {
        let err = DatabaseError::unsupported_operator("price", "between");
        assert_eq!(
            err.to_string(),
            "Unsupported operator 'between' on field 'price'"
        );

        let err = DatabaseError::missing_condition("orders", "delete");
        assert_eq!(
            err.to_string(),
            "delete on 'orders' requires at least one condition"
        );

        let err = DatabaseError::unsupported_aggregate("total", "median");
        assert_eq!(
            err.to_string(),
            "Unsupported aggregate function 'median' for alias 'total'"
        );
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn test_sqlite_constraint_classification() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY)")
            .unwrap();
        conn.execute("INSERT INTO t (id) VALUES (1)", []).unwrap();
        let err = conn.execute("INSERT INTO t (id) VALUES (1)", []).unwrap_err();

        let err = DatabaseError::from_sqlite("t", err);
        assert!(matches!(err, DatabaseError::ConstraintViolation { ref table, .. } if table == "t"));

        let err = conn.execute("SELECT nope FROM t", []).unwrap_err();
        let err = DatabaseError::from_sqlite("t", err);
        assert!(matches!(err, DatabaseError::ExecutionFailure { .. }));
    }
}
