//! Result rows
//!
//! A [`Row`] is addressable both by position and by column name. All rows of
//! one result share the same column list.

use super::error::{DatabaseError, Result};
use super::value::{DatabaseValue, RowValues};
use std::ops::Index;
use std::sync::Arc;

/// One row of a query result
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<DatabaseValue>,
}

impl Row {
    /// Create a row over a shared column list
    ///
    /// `values` must be in the same order as `columns`.
    pub fn new(columns: Arc<[String]>, values: Vec<DatabaseValue>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    /// Number of columns
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no columns
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Column names in result order
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Values in result order
    pub fn values(&self) -> &[DatabaseValue] {
        &self.values
    }

    /// Value at `index`
    pub fn get_index(&self, index: usize) -> Option<&DatabaseValue> {
        self.values.get(index)
    }

    /// Value of the first column called `name`
    pub fn get(&self, name: &str) -> Option<&DatabaseValue> {
        self.columns
            .iter()
            .position(|c| c == name)
            .and_then(|i| self.values.get(i))
    }

    /// Like [`Row::get`] but fails with [`DatabaseError::ColumnNotFound`]
    pub fn try_get(&self, name: &str) -> Result<&DatabaseValue> {
        self.get(name)
            .ok_or_else(|| DatabaseError::ColumnNotFound(name.to_string()))
    }

    /// Iterate `(column, value)` pairs in result order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &DatabaseValue)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    /// Convert into a name-keyed map; later duplicate names overwrite earlier ones
    pub fn into_values(self) -> RowValues {
        self.columns
            .iter()
            .cloned()
            .zip(self.values)
            .collect()
    }

    /// Render as a JSON object
    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_json()))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }
}

impl Index<usize> for Row {
    type Output = DatabaseValue;

    fn index(&self, index: usize) -> &Self::Output {
        &self.values[index]
    }
}

impl Index<&str> for Row {
    type Output = DatabaseValue;

    /// Panics when the column is absent; use [`Row::get`] to check first.
    fn index(&self, name: &str) -> &Self::Output {
        match self.get(name) {
            Some(v) => v,
            None => panic!("no column named '{}' in row", name),
        }
    }
}
