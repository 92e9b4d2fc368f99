//! Mutation compiler
//!
//! Compiles INSERT, UPDATE, DELETE and chunked bulk UPDATE requests into
//! [`Statement`]s and [`BatchStatement`]s. Nothing here touches a
//! connection; the backends execute what this module produces.

use super::catalog::{CatalogSnapshot, TableDescriptor};
use super::error::{DatabaseError, Result};
use super::filter::{split_key, Filter};
use super::predicate::{compile, Predicate};
use super::statement::{placeholders, quote_ident, BatchStatement, Statement};
use super::value::{DatabaseValue, RowValues};
use serde::{Deserialize, Serialize};

/// SET-map suffix for a relative update: `field__inc: n` is `field = field + n`
pub const INCREMENT_SUFFIX: &str = "inc";

/// Rows handed to an insert: one mapping or a sequence of mappings
#[derive(Debug, Clone, PartialEq)]
pub enum InsertRows {
    Single(RowValues),
    Many(Vec<RowValues>),
}

impl InsertRows {
    pub fn len(&self) -> usize {
        match self {
            InsertRows::Single(_) => 1,
            InsertRows::Many(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<RowValues> for InsertRows {
    fn from(row: RowValues) -> Self {
        InsertRows::Single(row)
    }
}

impl From<Vec<RowValues>> for InsertRows {
    fn from(rows: Vec<RowValues>) -> Self {
        InsertRows::Many(rows)
    }
}

/// Outcome of an insert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InsertResult {
    /// Generated identifier, for single-row inserts into a table whose
    /// primary key aliases the rowid
    pub last_id: Option<i64>,
    pub affected: usize,
}

/// Outcome of a bulk update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BulkUpdateReport {
    /// Number of batched statements executed, one per chunk
    pub chunks: usize,
    pub affected: usize,
}

/// A compiled insert
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledInsert {
    pub batch: BatchStatement,
    /// Whether `last_insert_rowid()` should be reported
    pub reports_last_id: bool,
}

/// Compile an insert of one or many rows into `table`
///
/// Every row must carry the same set of columns. An empty single row
/// inserts the column defaults.
pub fn compile_insert(catalog: &CatalogSnapshot, table: &str, rows: &InsertRows) -> Result<CompiledInsert> {
    let descriptor = catalog.resolve(table)?;
    let (rows, single): (&[RowValues], bool) = match rows {
        InsertRows::Single(row) => (std::slice::from_ref(row), true),
        InsertRows::Many(rows) => (rows.as_slice(), false),
    };
    let first = rows
        .first()
        .ok_or_else(|| DatabaseError::invalid(format!("insert into '{}' has no rows", table)))?;

    let columns = first
        .keys()
        .map(|key| resolve_plain_column(&descriptor, key))
        .collect::<Result<Vec<_>>>()?;
    check_uniform(table, first, rows)?;

    let sql = if columns.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES", quote_ident(descriptor.name()))
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(descriptor.name()),
            columns
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Vec<_>>()
                .join(", "),
            placeholders(columns.len())
        )
    };

    let param_sets = rows
        .iter()
        .map(|row| row.values().cloned().collect())
        .collect();

    Ok(CompiledInsert {
        batch: BatchStatement {
            table: descriptor.name().to_string(),
            sql,
            param_sets,
        },
        reports_last_id: single && descriptor.rowid_alias().is_some(),
    })
}

/// Compile `UPDATE table SET ... WHERE filter`
///
/// Keys of `set` are plain columns or `column__inc`. The filter must compile
/// to an actual restriction, otherwise [`DatabaseError::MissingCondition`].
pub fn compile_update(
    catalog: &CatalogSnapshot,
    table: &str,
    set: &RowValues,
    filter: &Filter,
) -> Result<Statement> {
    let descriptor = catalog.resolve(table)?;
    if set.is_empty() {
        return Err(DatabaseError::invalid(format!(
            "update of '{}' has nothing to set",
            table
        )));
    }
    let predicate = required_predicate(&descriptor, filter, "update")?;

    let mut params = Vec::with_capacity(set.len());
    let assignments = set
        .iter()
        .map(|(key, value)| {
            params.push(value.clone());
            assignment(&descriptor, key)
        })
        .collect::<Result<Vec<_>>>()?;

    let mut sql = format!(
        "UPDATE {} SET {} WHERE ",
        quote_ident(descriptor.name()),
        assignments.join(", ")
    );
    predicate.render(&mut sql, &mut params);
    Ok(Statement::new(descriptor.name(), sql, params))
}

/// Compile `DELETE FROM table WHERE filter`, with the same guard as update
pub fn compile_delete(catalog: &CatalogSnapshot, table: &str, filter: &Filter) -> Result<Statement> {
    let descriptor = catalog.resolve(table)?;
    let predicate = required_predicate(&descriptor, filter, "delete")?;

    let mut params = Vec::new();
    let mut sql = format!("DELETE FROM {} WHERE ", quote_ident(descriptor.name()));
    predicate.render(&mut sql, &mut params);
    Ok(Statement::new(descriptor.name(), sql, params))
}

/// Compile a bulk update into one [`BatchStatement`] per chunk
///
/// Each row addresses an existing row by equality on `keys` and sets its
/// remaining columns. Rows must share one column set that contains every
/// key column and at least one other column. The whole request is
/// validated before the first chunk is produced.
pub fn compile_bulk_update(
    catalog: &CatalogSnapshot,
    table: &str,
    rows: &[RowValues],
    keys: &[&str],
    chunk_size: usize,
) -> Result<Vec<BatchStatement>> {
    let descriptor = catalog.resolve(table)?;
    if keys.is_empty() {
        return Err(DatabaseError::missing_condition(table, "bulk update"));
    }
    if chunk_size == 0 {
        return Err(DatabaseError::invalid("chunk size must be greater than zero"));
    }
    for key in keys {
        descriptor.require_column(key)?;
    }
    let Some(first) = rows.first() else {
        return Ok(Vec::new());
    };

    for key in keys {
        if !first.contains_key(*key) {
            return Err(DatabaseError::invalid(format!(
                "bulk update rows for '{}' must contain key column '{}'",
                table, key
            )));
        }
    }
    check_uniform(table, first, rows)?;

    let set_keys: Vec<&String> = first.keys().filter(|k| !keys.contains(&k.as_str())).collect();
    if set_keys.is_empty() {
        return Err(DatabaseError::invalid(format!(
            "bulk update of '{}' has nothing to set besides the key columns",
            table
        )));
    }
    let assignments = set_keys
        .iter()
        .map(|key| assignment(&descriptor, key))
        .collect::<Result<Vec<_>>>()?;
    let conditions = keys
        .iter()
        .map(|key| format!("{} = ?", quote_ident(key)))
        .collect::<Vec<_>>();

    let sql = format!(
        "UPDATE {} SET {} WHERE {}",
        quote_ident(descriptor.name()),
        assignments.join(", "),
        conditions.join(" AND ")
    );

    let mut param_sets = Vec::with_capacity(rows.len());
    for (index, row) in rows.iter().enumerate() {
        let mut params: Vec<DatabaseValue> = set_keys.iter().map(|k| row[*k].clone()).collect();
        for key in keys {
            let value = &row[*key];
            if value.is_null() {
                return Err(DatabaseError::invalid(format!(
                    "bulk update row {} has a null key column '{}'",
                    index, key
                )));
            }
            params.push(value.clone());
        }
        param_sets.push(params);
    }

    Ok(param_sets
        .chunks(chunk_size)
        .map(|chunk| BatchStatement {
            table: descriptor.name().to_string(),
            sql: sql.clone(),
            param_sets: chunk.to_vec(),
        })
        .collect())
}

fn required_predicate(
    table: &TableDescriptor,
    filter: &Filter,
    operation: &'static str,
) -> Result<Predicate> {
    if filter.is_empty() {
        return Err(DatabaseError::missing_condition(table.name(), operation));
    }
    let predicate = compile(table, filter)?;
    // a filter that restricts nothing would touch every row
    if matches!(predicate, Predicate::True | Predicate::Const(true)) {
        return Err(DatabaseError::missing_condition(table.name(), operation));
    }
    Ok(predicate)
}

/// `"c" = ?` or, for `c__inc` on a numeric column, `"c" = "c" + ?`
fn assignment(table: &TableDescriptor, key: &str) -> Result<String> {
    match split_key(table, key)? {
        (field, None) => Ok(format!("{} = ?", quote_ident(field))),
        (field, Some(INCREMENT_SUFFIX)) => {
            if !table.require_column(field)?.column_type.is_numeric() {
                return Err(DatabaseError::unsupported_operator(field, INCREMENT_SUFFIX));
            }
            let column = quote_ident(field);
            Ok(format!("{} = {} + ?", column, column))
        }
        (field, Some(suffix)) => Err(DatabaseError::unsupported_operator(field, suffix)),
    }
}

/// A key that must name a column exactly (no operator suffix)
fn resolve_plain_column<'k>(table: &TableDescriptor, key: &'k str) -> Result<&'k str> {
    match split_key(table, key)? {
        (field, None) => Ok(field),
        (field, Some(suffix)) => Err(DatabaseError::unsupported_operator(field, suffix)),
    }
}

fn check_uniform(table: &str, first: &RowValues, rows: &[RowValues]) -> Result<()> {
    for (index, row) in rows.iter().enumerate().skip(1) {
        if row.len() != first.len() || !row.keys().eq(first.keys()) {
            return Err(DatabaseError::invalid(format!(
                "row {} for '{}' does not have the same columns as row 0",
                index, table
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::catalog::ColumnDescriptor;
    use crate::core::value::values;

    fn catalog() -> CatalogSnapshot {
        CatalogSnapshot::new(vec![
            TableDescriptor::new(
                "t",
                vec![
                    ColumnDescriptor::new("id", "INTEGER").primary_key(),
                    ColumnDescriptor::new("status", "TEXT"),
                    ColumnDescriptor::new("views", "INTEGER"),
                ],
            ),
            TableDescriptor::new(
                "tags",
                vec![
                    ColumnDescriptor::new("code", "TEXT").primary_key(),
                    ColumnDescriptor::new("label", "TEXT"),
                ],
            ),
        ])
    }

    #[test]
    fn test_single_insert() {
        let rows = InsertRows::from(values([("status", "a")]));
        let insert = compile_insert(&catalog(), "t", &rows).unwrap();
        assert_eq!(insert.batch.sql, "INSERT INTO \"t\" (\"status\") VALUES (?)");
        assert_eq!(insert.batch.param_sets, vec![vec![DatabaseValue::from("a")]]);
        assert!(insert.reports_last_id);
    }

    #[test]
    fn test_many_insert_and_last_id_rules() {
        let rows = InsertRows::from(vec![
            values([("id", DatabaseValue::from(1)), ("status", "a".into())]),
            values([("id", DatabaseValue::from(2)), ("status", "b".into())]),
        ]);
        let insert = compile_insert(&catalog(), "t", &rows).unwrap();
        assert_eq!(insert.batch.len(), 2);
        assert!(!insert.reports_last_id);

        // TEXT primary key does not alias the rowid
        let rows = InsertRows::from(values([("code", "x")]));
        assert!(!compile_insert(&catalog(), "tags", &rows).unwrap().reports_last_id);
    }

    #[test]
    fn test_empty_row_inserts_defaults() {
        let rows = InsertRows::from(RowValues::new());
        let insert = compile_insert(&catalog(), "t", &rows).unwrap();
        assert_eq!(insert.batch.sql, "INSERT INTO \"t\" DEFAULT VALUES");
    }

    #[test]
    fn test_insert_rejects_bad_rows() {
        let cat = catalog();
        let ragged = InsertRows::from(vec![
            values([("status", "a")]),
            values([("views", 1)]),
        ]);
        assert!(matches!(
            compile_insert(&cat, "t", &ragged),
            Err(DatabaseError::InvalidRequest(_))
        ));
        assert!(matches!(
            compile_insert(&cat, "t", &InsertRows::Many(Vec::new())),
            Err(DatabaseError::InvalidRequest(_))
        ));
        assert!(matches!(
            compile_insert(&cat, "t", &InsertRows::from(values([("views__inc", 1)]))),
            Err(DatabaseError::UnsupportedOperator { .. })
        ));
        assert!(matches!(
            compile_insert(&cat, "t", &InsertRows::from(values([("owner", 1)]))),
            Err(DatabaseError::UnknownColumn { .. })
        ));
        assert!(matches!(
            compile_insert(&cat, "nope", &InsertRows::from(values([("id", 1)]))),
            Err(DatabaseError::UnknownTable(_))
        ));
    }

    #[test]
    fn test_update_with_increment() {
        let set = values([("status", DatabaseValue::from("x")), ("views__inc", 2.into())]);
        let stmt = compile_update(&catalog(), "t", &set, &Filter::new().with("id", 1)).unwrap();
        assert_eq!(
            stmt.sql,
            "UPDATE \"t\" SET \"status\" = ?, \"views\" = \"views\" + ? WHERE \"t\".\"id\" = ?"
        );
        assert_eq!(
            stmt.params,
            vec![
                DatabaseValue::from("x"),
                DatabaseValue::Int(2),
                DatabaseValue::Int(1)
            ]
        );
    }

    #[test]
    fn test_increment_requires_numeric_column() {
        let set = values([("status__inc", 1)]);
        let err = compile_update(&catalog(), "t", &set, &Filter::new().with("id", 1)).unwrap_err();
        assert!(matches!(
            err,
            DatabaseError::UnsupportedOperator { ref field, ref operator }
                if field == "status" && operator == "inc"
        ));
    }

    #[test]
    fn test_update_and_delete_require_conditions() {
        let cat = catalog();
        let set = values([("status", "x")]);
        assert!(matches!(
            compile_update(&cat, "t", &set, &Filter::new()),
            Err(DatabaseError::MissingCondition { operation: "update", .. })
        ));
        assert!(matches!(
            compile_delete(&cat, "t", &Filter::new()),
            Err(DatabaseError::MissingCondition { operation: "delete", .. })
        ));
        // filters that compile to "every row" are refused too
        assert!(matches!(
            compile_delete(&cat, "t", &Filter::new().or(Vec::new())),
            Err(DatabaseError::MissingCondition { .. })
        ));
        assert!(matches!(
            compile_delete(&cat, "t", &Filter::new().with_list("id__notin", Vec::<i64>::new())),
            Err(DatabaseError::MissingCondition { .. })
        ));
        let always = Filter::new().or([
            Filter::new().with_list("id__notin", Vec::<i64>::new()),
            Filter::new().with("id", 1),
        ]);
        assert!(matches!(
            compile_delete(&cat, "t", &always),
            Err(DatabaseError::MissingCondition { .. })
        ));
        assert!(matches!(
            compile_update(&cat, "t", &set, &always),
            Err(DatabaseError::MissingCondition { .. })
        ));
        assert!(matches!(
            compile_update(&cat, "t", &RowValues::new(), &Filter::new().with("id", 1)),
            Err(DatabaseError::InvalidRequest(_))
        ));
        assert!(matches!(
            compile_update(&cat, "t", &values([("status__set", "x")]), &Filter::new().with("id", 1)),
            Err(DatabaseError::UnsupportedOperator { .. })
        ));
    }

    #[test]
    fn test_delete() {
        let stmt = compile_delete(&catalog(), "t", &Filter::new().with("status__in", "a")).err();
        assert!(matches!(stmt, Some(DatabaseError::InvalidRequest(_))));

        let stmt = compile_delete(&catalog(), "t", &Filter::new().with_list("status__in", ["a"]))
            .unwrap();
        assert_eq!(stmt.sql, "DELETE FROM \"t\" WHERE \"t\".\"status\" IN (?)");
    }

    #[test]
    fn test_bulk_update_chunks() {
        let rows: Vec<RowValues> = (1..=5)
            .map(|i| values([("id", DatabaseValue::from(i)), ("status", "x".into())]))
            .collect();
        let batches = compile_bulk_update(&catalog(), "t", &rows, &["id"], 2).unwrap();
        assert_eq!(batches.len(), 3);
        assert_eq!(
            batches.iter().map(BatchStatement::len).collect::<Vec<_>>(),
            vec![2, 2, 1]
        );
        assert_eq!(batches[0].sql, "UPDATE \"t\" SET \"status\" = ? WHERE \"id\" = ?");
        assert_eq!(
            batches[0].param_sets[1],
            vec![DatabaseValue::from("x"), DatabaseValue::Int(2)]
        );
    }

    #[test]
    fn test_bulk_update_validation() {
        let cat = catalog();
        let rows = vec![values([("id", DatabaseValue::from(1)), ("status", "x".into())])];
        assert!(matches!(
            compile_bulk_update(&cat, "t", &rows, &[], 10),
            Err(DatabaseError::MissingCondition { .. })
        ));
        assert!(matches!(
            compile_bulk_update(&cat, "t", &rows, &["id"], 0),
            Err(DatabaseError::InvalidRequest(_))
        ));
        assert!(matches!(
            compile_bulk_update(&cat, "t", &rows, &["views"], 10),
            Err(DatabaseError::InvalidRequest(_))
        ));
        assert!(matches!(
            compile_bulk_update(&cat, "t", &rows, &["owner"], 10),
            Err(DatabaseError::UnknownColumn { .. })
        ));
        let only_keys = vec![values([("id", 1)])];
        assert!(matches!(
            compile_bulk_update(&cat, "t", &only_keys, &["id"], 10),
            Err(DatabaseError::InvalidRequest(_))
        ));
        let null_key = vec![values([("id", DatabaseValue::Null), ("status", "x".into())])];
        assert!(matches!(
            compile_bulk_update(&cat, "t", &null_key, &["id"], 10),
            Err(DatabaseError::InvalidRequest(_))
        ));
        assert!(compile_bulk_update(&cat, "t", &[], &["id"], 10)
            .unwrap()
            .is_empty());
    }
}
