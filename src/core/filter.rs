//! Declarative filter grammar
//!
//! A filter is an ordered mapping from `"field"` or `"field__operator"` to a
//! value. The reserved key `or__` holds a list of member filters that are
//! OR-combined; everything at one level is AND-combined.
//!
//! ```
//! use rust_data_layer::core::filter::Filter;
//!
//! // status = 'a' AND price >= 100 AND (kind = 'x' OR kind = 'y')
//! let filter = Filter::new()
//!     .with("status", "a")
//!     .with("price__gte", 100)
//!     .or([Filter::new().with("kind", "x"), Filter::new().with("kind", "y")]);
//! assert_eq!(filter.len(), 3);
//! ```

use super::catalog::TableDescriptor;
use super::error::{DatabaseError, Result};
use super::value::DatabaseValue;
use std::fmt;

/// Key that introduces an OR group
pub const OR_KEY: &str = "or__";

/// Separator between a field name and its operator suffix
pub const FIELD_DELIMITER: &str = "__";

/// Comparison operators of the filter grammar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// Equality, the default when no suffix is given
    Eq,
    /// `__not`
    Not,
    /// `__gt`
    Gt,
    /// `__gte`
    Gte,
    /// `__lt`
    Lt,
    /// `__lte`
    Lte,
    /// `__in`
    In,
    /// `__notin`
    NotIn,
    /// `__like`
    Like,
}

impl Operator {
    /// Parse an operator suffix (the text after `__`)
    ///
    /// Equality has no suffix, so `"eq"` is not accepted.
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "not" => Some(Operator::Not),
            "gt" => Some(Operator::Gt),
            "gte" => Some(Operator::Gte),
            "lt" => Some(Operator::Lt),
            "lte" => Some(Operator::Lte),
            "in" => Some(Operator::In),
            "notin" => Some(Operator::NotIn),
            "like" => Some(Operator::Like),
            _ => None,
        }
    }

    /// The suffix that selects this operator, `None` for equality
    pub fn suffix(&self) -> Option<&'static str> {
        match self {
            Operator::Eq => None,
            Operator::Not => Some("not"),
            Operator::Gt => Some("gt"),
            Operator::Gte => Some("gte"),
            Operator::Lt => Some("lt"),
            Operator::Lte => Some("lte"),
            Operator::In => Some("in"),
            Operator::NotIn => Some("notin"),
            Operator::Like => Some("like"),
        }
    }

    /// Whether the operator takes a list operand
    pub fn takes_list(&self) -> bool {
        matches!(self, Operator::In | Operator::NotIn)
    }

    pub(crate) fn as_sql(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Not => "!=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::In => "IN",
            Operator::NotIn => "NOT IN",
            Operator::Like => "LIKE",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix().unwrap_or("eq"))
    }
}

/// Right-hand side of a filter entry
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Scalar(DatabaseValue),
    List(Vec<DatabaseValue>),
    /// Members of an `or__` group
    Group(Vec<Filter>),
}

impl FilterValue {
    fn kind(&self) -> &'static str {
        match self {
            FilterValue::Scalar(_) => "scalar",
            FilterValue::List(_) => "list",
            FilterValue::Group(_) => "group",
        }
    }
}

/// Ordered `key -> value` filter mapping
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    entries: Vec<(String, FilterValue)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a scalar entry (`"field"` or `"field__op"`)
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<DatabaseValue>) -> Self {
        self.insert(key, FilterValue::Scalar(value.into()));
        self
    }

    /// Add a list entry, for `__in` / `__notin`
    #[must_use]
    pub fn with_list<I, V>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<DatabaseValue>,
    {
        let list = values.into_iter().map(Into::into).collect();
        self.insert(key, FilterValue::List(list));
        self
    }

    /// Add an `or__` group
    #[must_use]
    pub fn or(mut self, members: impl IntoIterator<Item = Filter>) -> Self {
        self.insert(OR_KEY, FilterValue::Group(members.into_iter().collect()));
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: FilterValue) {
        self.entries.push((key.into(), value));
    }

    pub fn entries(&self) -> &[(String, FilterValue)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse a filter from a JSON object
    ///
    /// Scalars become scalar entries, arrays become lists, and `or__` must be
    /// an array of objects. Anything else is rejected.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| DatabaseError::invalid("filter must be a JSON object"))?;

        let mut filter = Filter::new();
        for (key, value) in object {
            let entry = if key == OR_KEY {
                let members = value.as_array().ok_or_else(|| {
                    DatabaseError::invalid(format!("'{}' must be an array of objects", OR_KEY))
                })?;
                let members = members
                    .iter()
                    .map(Filter::from_json)
                    .collect::<Result<Vec<_>>>()?;
                FilterValue::Group(members)
            } else {
                match value {
                    serde_json::Value::Array(items) => {
                        if items.iter().any(|i| i.is_array() || i.is_object()) {
                            return Err(DatabaseError::invalid(format!(
                                "list for '{}' must contain scalars only",
                                key
                            )));
                        }
                        FilterValue::List(items.iter().map(DatabaseValue::from).collect())
                    }
                    serde_json::Value::Object(_) => {
                        return Err(DatabaseError::invalid(format!(
                            "value for '{}' must be a scalar or a list",
                            key
                        )));
                    }
                    scalar => FilterValue::Scalar(DatabaseValue::from(scalar)),
                }
            };
            filter.insert(key.clone(), entry);
        }
        Ok(filter)
    }
}

/// Split a key into `(field, operator suffix)` against `table`'s columns
///
/// Field names may themselves contain `__`, so the whole key is tried first,
/// then every prefix ending before a `__`, longest first. The first prefix
/// that names a column wins and the rest of the key is the suffix.
pub fn split_key<'k>(table: &TableDescriptor, key: &'k str) -> Result<(&'k str, Option<&'k str>)> {
    if table.has_column(key) {
        return Ok((key, None));
    }
    for (pos, _) in key.rmatch_indices(FIELD_DELIMITER) {
        let field = &key[..pos];
        if table.has_column(field) {
            return Ok((field, Some(&key[pos + FIELD_DELIMITER.len()..])));
        }
    }
    Err(DatabaseError::unknown_column(table.name(), key))
}

/// Resolve a filter key into a field and an [`Operator`]
pub fn parse_key<'k>(table: &TableDescriptor, key: &'k str) -> Result<(&'k str, Operator)> {
    let (field, suffix) = split_key(table, key)?;
    match suffix {
        None => Ok((field, Operator::Eq)),
        Some(suffix) => Operator::from_suffix(suffix)
            .map(|op| (field, op))
            .ok_or_else(|| DatabaseError::unsupported_operator(field, suffix)),
    }
}

pub(crate) fn shape_error(key: &str, expected: &str, value: &FilterValue) -> DatabaseError {
    DatabaseError::invalid(format!(
        "'{}' expects a {} value, got a {}",
        key,
        expected,
        value.kind()
    ))
}
