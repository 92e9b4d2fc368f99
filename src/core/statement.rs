//! Compiled statements
//!
//! The output of the query builder and mutation compiler: SQL text with
//! positional `?` placeholders and the values bound to them, in order.

use super::value::DatabaseValue;

/// A single parameterized statement
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// Primary table the statement targets (used for error context)
    pub table: String,
    pub sql: String,
    pub params: Vec<DatabaseValue>,
}

impl Statement {
    pub fn new(table: impl Into<String>, sql: impl Into<String>, params: Vec<DatabaseValue>) -> Self {
        Self {
            table: table.into(),
            sql: sql.into(),
            params,
        }
    }
}

/// One statement executed once per parameter set, over a single prepared
/// handle and round trip
#[derive(Debug, Clone, PartialEq)]
pub struct BatchStatement {
    pub table: String,
    pub sql: String,
    pub param_sets: Vec<Vec<DatabaseValue>>,
}

impl BatchStatement {
    /// Number of parameter sets (rows) in the batch
    pub fn len(&self) -> usize {
        self.param_sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.param_sets.is_empty()
    }
}

/// Quote an identifier for SQL, doubling embedded quotes
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `"table"."column"`
pub fn qualified(table: &str, column: &str) -> String {
    format!("{}.{}", quote_ident(table), quote_ident(column))
}

/// `?, ?, ?` for `n` placeholders
pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quoting() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(qualified("t", "id"), "\"t\".\"id\"");
        assert_eq!(placeholders(3), "?, ?, ?");
        assert_eq!(placeholders(0), "");
    }
}
