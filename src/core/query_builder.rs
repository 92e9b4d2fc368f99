//! SELECT query builder
//!
//! Provides a fluent API for describing a read and compiles it against a
//! [`CatalogSnapshot`] into a parameterized [`Statement`]. Every identifier
//! is validated against the catalog and quoted; every value is bound.

use super::catalog::{CatalogSnapshot, TableDescriptor};
use super::error::{DatabaseError, Result};
use super::filter::Filter;
use super::predicate::compile;
use super::statement::{qualified, quote_ident, Statement};
use super::value::DatabaseValue;
use std::str::FromStr;

/// ORDER BY direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderDirection {
    /// Ascending order
    Asc,
    /// Descending order ("most recent / highest first")
    #[default]
    Desc,
}

impl OrderDirection {
    fn as_sql(&self) -> &'static str {
        match self {
            OrderDirection::Asc => "ASC",
            OrderDirection::Desc => "DESC",
        }
    }
}

/// Allow-listed aggregate functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunction {
    /// `sum` and `avg` need a numeric column
    fn is_arithmetic(&self) -> bool {
        matches!(self, AggregateFunction::Sum | AggregateFunction::Avg)
    }

    fn as_sql(&self) -> &'static str {
        match self {
            AggregateFunction::Count => "COUNT",
            AggregateFunction::Sum => "SUM",
            AggregateFunction::Avg => "AVG",
            AggregateFunction::Min => "MIN",
            AggregateFunction::Max => "MAX",
        }
    }
}

impl FromStr for AggregateFunction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "count" => Ok(AggregateFunction::Count),
            "sum" => Ok(AggregateFunction::Sum),
            "avg" => Ok(AggregateFunction::Avg),
            "min" => Ok(AggregateFunction::Min),
            "max" => Ok(AggregateFunction::Max),
            _ => Err(format!("Invalid aggregate function: '{}'", s)),
        }
    }
}

/// `alias -> (column, function)` as supplied by the caller
///
/// The function name stays a string until build time so that an unknown
/// name fails there with [`DatabaseError::UnsupportedAggregateFunction`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregate {
    pub alias: String,
    pub column: String,
    pub function: String,
}

/// Join of the queried table with a secondary table
#[derive(Debug, Clone, PartialEq)]
pub struct JoinSpec {
    pub primary_table: String,
    pub secondary_table: String,
    pub primary_column: String,
    pub secondary_column: String,
    /// Secondary columns to project
    pub columns: Vec<String>,
    /// LEFT OUTER JOIN instead of INNER JOIN
    pub is_outer: bool,
    /// Extra conditions on the secondary table, added to the ON clause
    pub secondary_condition: Filter,
}

impl JoinSpec {
    /// `primary_table.primary_column = secondary_table.secondary_column`
    pub fn new(
        primary_table: impl Into<String>,
        primary_column: impl Into<String>,
        secondary_table: impl Into<String>,
        secondary_column: impl Into<String>,
    ) -> Self {
        Self {
            primary_table: primary_table.into(),
            secondary_table: secondary_table.into(),
            primary_column: primary_column.into(),
            secondary_column: secondary_column.into(),
            columns: Vec::new(),
            is_outer: false,
            secondary_condition: Filter::new(),
        }
    }

    /// Project these secondary columns
    #[must_use]
    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Use a LEFT OUTER JOIN
    #[must_use]
    pub fn outer(mut self) -> Self {
        self.is_outer = true;
        self
    }

    /// Restrict the secondary side
    #[must_use]
    pub fn secondary_condition(mut self, filter: Filter) -> Self {
        self.secondary_condition = filter;
        self
    }
}

/// SELECT query builder
#[derive(Debug, Clone)]
pub struct SelectBuilder {
    table: String,
    columns: Vec<String>,
    filter: Filter,
    join: Option<JoinSpec>,
    group_by: Vec<String>,
    aggregates: Vec<Aggregate>,
    order: Option<String>,
    direction: OrderDirection,
    distinct: bool,
    limit: usize,
    offset: usize,
}

impl SelectBuilder {
    /// Create a new SELECT query builder
    ///
    /// # Example
    ///
    /// ```
    /// use rust_data_layer::core::filter::Filter;
    /// use rust_data_layer::core::query_builder::SelectBuilder;
    ///
    /// let query = SelectBuilder::new("users")
    ///     .columns(&["id", "name"])
    ///     .filter(Filter::new().with("status", "active"))
    ///     .order_by("id")
    ///     .limit(10);
    /// assert_eq!(query.table(), "users");
    /// ```
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            filter: Filter::new(),
            join: None,
            group_by: Vec::new(),
            aggregates: Vec::new(),
            order: None,
            direction: OrderDirection::Desc,
            distinct: false,
            limit: 0,
            offset: 0,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Select specific columns of the primary table
    #[must_use]
    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Select all columns of the primary table
    #[must_use]
    pub fn all_columns(mut self) -> Self {
        self.columns.clear();
        self
    }

    /// Set the WHERE filter
    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    /// Join a secondary table
    #[must_use]
    pub fn join(mut self, join: JoinSpec) -> Self {
        self.join = Some(join);
        self
    }

    /// Add GROUP BY clause
    #[must_use]
    pub fn group_by(mut self, columns: &[&str]) -> Self {
        self.group_by = columns.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Project `function(column) AS alias`
    #[must_use]
    pub fn aggregate(
        mut self,
        alias: impl Into<String>,
        column: impl Into<String>,
        function: impl Into<String>,
    ) -> Self {
        self.aggregates.push(Aggregate {
            alias: alias.into(),
            column: column.into(),
            function: function.into(),
        });
        self
    }

    /// Order by a primary column or an aggregate alias, descending unless
    /// [`SelectBuilder::ascending`] is set
    #[must_use]
    pub fn order_by(mut self, column: impl Into<String>) -> Self {
        self.order = Some(column.into());
        self
    }

    /// Choose the ORDER BY direction
    #[must_use]
    pub fn ascending(mut self, ascending: bool) -> Self {
        self.direction = if ascending {
            OrderDirection::Asc
        } else {
            OrderDirection::Desc
        };
        self
    }

    /// Add ORDER BY ASC
    #[must_use]
    pub fn order_by_asc(self, column: &str) -> Self {
        self.order_by(column).ascending(true)
    }

    /// Add ORDER BY DESC
    #[must_use]
    pub fn order_by_desc(self, column: &str) -> Self {
        self.order_by(column).ascending(false)
    }

    #[must_use]
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Row cap; `0` means unlimited
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    #[must_use]
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Compile against `catalog`
    ///
    /// Resolution follows a fixed order: projection, DISTINCT, WHERE, JOIN,
    /// GROUP BY, ORDER BY, LIMIT/OFFSET. Any unknown table, column, operator
    /// or aggregate function fails here.
    pub fn build(&self, catalog: &CatalogSnapshot) -> Result<Statement> {
        let table = catalog.resolve(&self.table)?;
        let secondary = match &self.join {
            Some(join) => {
                if join.primary_table != self.table {
                    return Err(DatabaseError::invalid(format!(
                        "join primary table '{}' must be the queried table '{}'",
                        join.primary_table, self.table
                    )));
                }
                Some((join, catalog.resolve(&join.secondary_table)?))
            }
            None => None,
        };

        // (1) projection
        let mut projection = Vec::new();
        if self.columns.is_empty() {
            for column in table.columns() {
                projection.push(qualified(table.name(), &column.name));
            }
        } else {
            for column in &self.columns {
                table.require_column(column)?;
                projection.push(qualified(table.name(), column));
            }
        }
        if let Some((join, secondary)) = &secondary {
            for column in &join.columns {
                secondary.require_column(column)?;
                projection.push(qualified(secondary.name(), column));
            }
        }
        for aggregate in &self.aggregates {
            let function: AggregateFunction = aggregate.function.parse().map_err(|_| {
                DatabaseError::unsupported_aggregate(&aggregate.alias, &aggregate.function)
            })?;
            let column = table.require_column(&aggregate.column)?;
            if function.is_arithmetic() && !column.column_type.is_numeric() {
                return Err(DatabaseError::unsupported_aggregate(
                    &aggregate.alias,
                    &aggregate.function,
                ));
            }
            projection.push(format!(
                "{}({}) AS {}",
                function.as_sql(),
                qualified(table.name(), &aggregate.column),
                quote_ident(&aggregate.alias)
            ));
        }

        // (2) distinct
        let mut sql = String::from("SELECT ");
        if self.distinct {
            sql.push_str("DISTINCT ");
        }
        sql.push_str(&projection.join(", "));

        // (3) where, compiled now and rendered after the FROM clause
        let predicate = compile(&table, &self.filter)?;

        // (4) join
        let mut params = Vec::new();
        sql.push_str(" FROM ");
        sql.push_str(&quote_ident(table.name()));
        if let Some((join, secondary)) = &secondary {
            Self::render_join(&table, join, secondary, &mut sql, &mut params)?;
        }
        if !predicate.is_unrestricted() {
            sql.push_str(" WHERE ");
            predicate.render(&mut sql, &mut params);
        }

        // (5) group by
        if !self.group_by.is_empty() {
            let columns = self
                .group_by
                .iter()
                .map(|c| {
                    table
                        .require_column(c)
                        .map(|_| qualified(table.name(), c))
                })
                .collect::<Result<Vec<_>>>()?;
            sql.push_str(&format!(" GROUP BY {}", columns.join(", ")));
        }

        // (6) order by
        if let Some(order) = &self.order {
            let target = if table.has_column(order) {
                qualified(table.name(), order)
            } else if self.aggregates.iter().any(|a| &a.alias == order) {
                quote_ident(order)
            } else {
                return Err(DatabaseError::unknown_column(table.name(), order));
            };
            sql.push_str(&format!(" ORDER BY {} {}", target, self.direction.as_sql()));
        }

        // (7) limit / offset; 0 means "no limit", and SQLite needs a LIMIT before OFFSET
        if self.limit > 0 {
            sql.push_str(&format!(" LIMIT {}", self.limit));
        } else if self.offset > 0 {
            sql.push_str(" LIMIT -1");
        }
        if self.offset > 0 {
            sql.push_str(&format!(" OFFSET {}", self.offset));
        }

        Ok(Statement::new(table.name(), sql, params))
    }

    fn render_join(
        table: &TableDescriptor,
        join: &JoinSpec,
        secondary: &TableDescriptor,
        sql: &mut String,
        params: &mut Vec<DatabaseValue>,
    ) -> Result<()> {
        table.require_column(&join.primary_column)?;
        secondary.require_column(&join.secondary_column)?;
        let extra = compile(secondary, &join.secondary_condition)?;

        sql.push_str(if join.is_outer {
            " LEFT OUTER JOIN "
        } else {
            " INNER JOIN "
        });
        sql.push_str(&quote_ident(secondary.name()));
        sql.push_str(&format!(
            " ON {} = {}",
            qualified(table.name(), &join.primary_column),
            qualified(secondary.name(), &join.secondary_column)
        ));
        if !extra.is_unrestricted() {
            sql.push_str(" AND ");
            extra.render(sql, params);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::catalog::ColumnDescriptor;

    fn catalog() -> CatalogSnapshot {
        CatalogSnapshot::new(vec![
            TableDescriptor::new(
                "stocks",
                vec![
                    ColumnDescriptor::new("ticker", "TEXT").primary_key(),
                    ColumnDescriptor::new("name", "TEXT"),
                    ColumnDescriptor::new("sector", "TEXT"),
                    ColumnDescriptor::new("price", "REAL"),
                ],
            ),
            TableDescriptor::new(
                "factors",
                vec![
                    ColumnDescriptor::new("ticker", "TEXT"),
                    ColumnDescriptor::new("score", "REAL"),
                    ColumnDescriptor::new("kind", "TEXT"),
                ],
            ),
        ])
    }

    #[test]
    fn test_select_all_columns() {
        let stmt = SelectBuilder::new("stocks").build(&catalog()).unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT \"stocks\".\"ticker\", \"stocks\".\"name\", \"stocks\".\"sector\", \"stocks\".\"price\" FROM \"stocks\""
        );
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn test_select_where_order_limit() {
        let stmt = SelectBuilder::new("stocks")
            .columns(&["ticker", "price"])
            .filter(Filter::new().with("price__gte", 100))
            .order_by("price")
            .limit(10)
            .build(&catalog())
            .unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT \"stocks\".\"ticker\", \"stocks\".\"price\" FROM \"stocks\" WHERE \"stocks\".\"price\" >= ? ORDER BY \"stocks\".\"price\" DESC LIMIT 10"
        );
        assert_eq!(stmt.params, vec![DatabaseValue::Int(100)]);
    }

    #[test]
    fn test_ascending_and_distinct() {
        let stmt = SelectBuilder::new("stocks")
            .columns(&["sector"])
            .distinct()
            .order_by_asc("sector")
            .build(&catalog())
            .unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT DISTINCT \"stocks\".\"sector\" FROM \"stocks\" ORDER BY \"stocks\".\"sector\" ASC"
        );
    }

    #[test]
    fn test_zero_limit_is_unlimited() {
        let stmt = SelectBuilder::new("stocks")
            .columns(&["ticker"])
            .limit(0)
            .build(&catalog())
            .unwrap();
        assert!(!stmt.sql.contains("LIMIT"));

        let stmt = SelectBuilder::new("stocks")
            .columns(&["ticker"])
            .offset(5)
            .build(&catalog())
            .unwrap();
        assert!(stmt.sql.ends_with("LIMIT -1 OFFSET 5"));
    }

    #[test]
    fn test_join_with_secondary_condition() {
        let join = JoinSpec::new("stocks", "ticker", "factors", "ticker")
            .columns(&["score"])
            .outer()
            .secondary_condition(Filter::new().with("kind", "value"));
        let stmt = SelectBuilder::new("stocks")
            .columns(&["ticker"])
            .join(join)
            .filter(Filter::new().with("sector", "tech"))
            .build(&catalog())
            .unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT \"stocks\".\"ticker\", \"factors\".\"score\" FROM \"stocks\" LEFT OUTER JOIN \"factors\" ON \"stocks\".\"ticker\" = \"factors\".\"ticker\" AND \"factors\".\"kind\" = ? WHERE \"stocks\".\"sector\" = ?"
        );
        // ON-clause values bind before WHERE values
        assert_eq!(
            stmt.params,
            vec![DatabaseValue::from("value"), DatabaseValue::from("tech")]
        );
    }

    #[test]
    fn test_group_by_with_aggregates() {
        let stmt = SelectBuilder::new("stocks")
            .columns(&["sector"])
            .aggregate("avg_price", "price", "avg")
            .aggregate("n", "ticker", "count")
            .group_by(&["sector"])
            .order_by("n")
            .build(&catalog())
            .unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT \"stocks\".\"sector\", AVG(\"stocks\".\"price\") AS \"avg_price\", COUNT(\"stocks\".\"ticker\") AS \"n\" FROM \"stocks\" GROUP BY \"stocks\".\"sector\" ORDER BY \"n\" DESC"
        );
    }

    #[test]
    fn test_unknown_aggregate_fails_closed() {
        let err = SelectBuilder::new("stocks")
            .aggregate("m", "price", "median")
            .build(&catalog())
            .unwrap_err();
        assert!(matches!(
            err,
            DatabaseError::UnsupportedAggregateFunction { ref function, .. } if function == "median"
        ));
    }

    #[test]
    fn test_sum_requires_numeric_column() {
        let err = SelectBuilder::new("stocks")
            .aggregate("total", "sector", "sum")
            .build(&catalog())
            .unwrap_err();
        assert!(matches!(
            err,
            DatabaseError::UnsupportedAggregateFunction { ref alias, ref function }
                if alias == "total" && function == "sum"
        ));

        // min/max order text fine
        assert!(SelectBuilder::new("stocks")
            .aggregate("first", "sector", "min")
            .build(&catalog())
            .is_ok());
    }

    #[test]
    fn test_unknown_names_fail() {
        let cat = catalog();
        assert!(matches!(
            SelectBuilder::new("nope").build(&cat),
            Err(DatabaseError::UnknownTable(_))
        ));
        assert!(matches!(
            SelectBuilder::new("stocks").columns(&["volume"]).build(&cat),
            Err(DatabaseError::UnknownColumn { .. })
        ));
        assert!(matches!(
            SelectBuilder::new("stocks").order_by("volume").build(&cat),
            Err(DatabaseError::UnknownColumn { .. })
        ));
        let join = JoinSpec::new("stocks", "ticker", "missing", "ticker");
        assert!(matches!(
            SelectBuilder::new("stocks").join(join).build(&cat),
            Err(DatabaseError::UnknownTable(_))
        ));
        let join = JoinSpec::new("factors", "ticker", "stocks", "ticker");
        assert!(matches!(
            SelectBuilder::new("stocks").join(join).build(&cat),
            Err(DatabaseError::InvalidRequest(_))
        ));
    }
}
