//! Condition compiler
//!
//! Turns a [`Filter`] into a [`Predicate`] tree bound against the columns of
//! one [`TableDescriptor`]. Compilation is pure: every field and operator is
//! validated here, so a malformed filter fails before any statement exists.

use super::catalog::TableDescriptor;
use super::error::{DatabaseError, Result};
use super::filter::{parse_key, shape_error, Filter, FilterValue, Operator, OR_KEY};
use super::statement::{placeholders, qualified};
use super::value::DatabaseValue;

/// Operand of a single condition
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Value(DatabaseValue),
    List(Vec<DatabaseValue>),
}

/// `{field, operator, value}` bound to a table
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub table: String,
    pub field: String,
    pub operator: Operator,
    pub operand: Operand,
}

/// Composable boolean expression over table columns
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// No restriction (compiled from an empty filter or an empty `or__`)
    True,
    /// Constant outcome, e.g. `IN ()` is always false
    Const(bool),
    Condition(Condition),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    /// AND-combine, folding constants
    ///
    /// A false constant makes the whole conjunction false. True constants
    /// drop out, but a conjunction of nothing else stays `Const(true)` so
    /// it is not mistaken for an empty filter.
    pub fn and(parts: Vec<Predicate>) -> Predicate {
        let mut constant = false;
        let mut kept = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                Predicate::Const(false) => return Predicate::Const(false),
                Predicate::Const(true) => constant = true,
                Predicate::True => {}
                other => kept.push(other),
            }
        }
        match kept.len() {
            0 if constant => Predicate::Const(true),
            0 => Predicate::True,
            1 => kept.remove(0),
            _ => Predicate::And(kept),
        }
    }

    /// OR-combine, folding constants; an empty group is no predicate at all
    ///
    /// Any always-true member makes the group `Const(true)`; false members
    /// drop out.
    pub fn or(parts: Vec<Predicate>) -> Predicate {
        if parts.is_empty() {
            return Predicate::True;
        }
        let mut kept = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                Predicate::Const(true) | Predicate::True => return Predicate::Const(true),
                Predicate::Const(false) => {}
                other => kept.push(other),
            }
        }
        match kept.len() {
            0 => Predicate::Const(false),
            1 => kept.remove(0),
            _ => Predicate::Or(kept),
        }
    }

    /// Whether this predicate places no restriction at all
    pub fn is_unrestricted(&self) -> bool {
        matches!(self, Predicate::True)
    }

    /// Append the SQL for this predicate to `sql` and its values to `params`
    pub fn render(&self, sql: &mut String, params: &mut Vec<DatabaseValue>) {
        match self {
            Predicate::True | Predicate::Const(true) => sql.push_str("1 = 1"),
            Predicate::Const(false) => sql.push_str("1 = 0"),
            Predicate::Condition(cond) => cond.render(sql, params),
            Predicate::And(parts) => Self::render_joined(parts, " AND ", sql, params),
            Predicate::Or(parts) => Self::render_joined(parts, " OR ", sql, params),
        }
    }

    fn render_joined(
        parts: &[Predicate],
        separator: &str,
        sql: &mut String,
        params: &mut Vec<DatabaseValue>,
    ) {
        sql.push('(');
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                sql.push_str(separator);
            }
            part.render(sql, params);
        }
        sql.push(')');
    }

    /// Render into a fresh `(sql, params)` pair
    pub fn to_sql(&self) -> (String, Vec<DatabaseValue>) {
        let mut sql = String::new();
        let mut params = Vec::new();
        self.render(&mut sql, &mut params);
        (sql, params)
    }
}

impl Condition {
    fn render(&self, sql: &mut String, params: &mut Vec<DatabaseValue>) {
        let column = qualified(&self.table, &self.field);
        match (&self.operand, self.operator) {
            (Operand::Value(DatabaseValue::Null), Operator::Eq) => {
                sql.push_str(&format!("{} IS NULL", column));
            }
            (Operand::Value(DatabaseValue::Null), Operator::Not) => {
                sql.push_str(&format!("{} IS NOT NULL", column));
            }
            (Operand::Value(value), op) => {
                sql.push_str(&format!("{} {} ?", column, op.as_sql()));
                params.push(value.clone());
            }
            (Operand::List(values), op) => {
                let marks = placeholders(values.len());
                sql.push_str(&format!("{} {} ({})", column, op.as_sql(), marks));
                params.extend(values.iter().cloned());
            }
        }
    }
}

/// Compile `filter` against `table`
///
/// Top-level entries and `or__` groups are AND-combined. An empty filter
/// compiles to [`Predicate::True`].
pub fn compile(table: &TableDescriptor, filter: &Filter) -> Result<Predicate> {
    let mut parts = Vec::with_capacity(filter.len());
    for (key, value) in filter.entries() {
        if key == OR_KEY {
            parts.push(compile_or_group(table, value)?);
        } else {
            parts.push(compile_entry(table, key, value)?);
        }
    }
    Ok(Predicate::and(parts))
}

fn compile_or_group(table: &TableDescriptor, value: &FilterValue) -> Result<Predicate> {
    let FilterValue::Group(members) = value else {
        return Err(shape_error(OR_KEY, "group", value));
    };

    let mut parts = Vec::with_capacity(members.len());
    for member in members {
        let compiled = compile(table, member)?;
        // an unrestricted member would silently turn the whole group into "all rows"
        if compiled.is_unrestricted() {
            return Err(DatabaseError::invalid(format!(
                "'{}' members must contain at least one condition",
                OR_KEY
            )));
        }
        parts.push(compiled);
    }
    Ok(Predicate::or(parts))
}

fn compile_entry(table: &TableDescriptor, key: &str, value: &FilterValue) -> Result<Predicate> {
    let (field, operator) = parse_key(table, key)?;

    let operand = match (value, operator.takes_list()) {
        (FilterValue::List(values), true) => {
            if values.is_empty() {
                return Ok(Predicate::Const(operator == Operator::NotIn));
            }
            Operand::List(values.clone())
        }
        (FilterValue::Scalar(value), false) => Operand::Value(value.clone()),
        (other, true) => return Err(shape_error(key, "list", other)),
        (other, false) => return Err(shape_error(key, "scalar", other)),
    };

    Ok(Predicate::Condition(Condition {
        table: table.name().to_string(),
        field: field.to_string(),
        operator,
        operand,
    }))
}
