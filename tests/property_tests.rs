//! Property-based tests for filter compilation, pagination and bulk updates using proptest

use proptest::prelude::*;
use rust_data_layer::core::catalog::{CatalogSnapshot, ColumnDescriptor, TableDescriptor};
use rust_data_layer::core::predicate::compile;
use rust_data_layer::prelude::*;
use std::sync::OnceLock;
use std::time::Duration;

fn stocks() -> TableDescriptor {
    TableDescriptor::new(
        "stocks",
        vec![
            ColumnDescriptor::new("id", "INTEGER").primary_key(),
            ColumnDescriptor::new("price", "REAL"),
            ColumnDescriptor::new("net__income", "REAL"),
        ],
    )
}

// ============================================================================
// Filter Compilation
// ============================================================================

proptest! {
    /// A single comparison compiles to one placeholder bound to the value
    #[test]
    fn test_price_gte_binds_value(value in any::<i64>()) {
        let filter = Filter::new().with("price__gte", value);
        let (sql, params) = compile(&stocks(), &filter).unwrap().to_sql();
        prop_assert_eq!(sql, "\"stocks\".\"price\" >= ?");
        prop_assert_eq!(params, vec![DatabaseValue::Long(value)]);
    }

    /// IN lists bind exactly one parameter per element
    #[test]
    fn test_in_list_binds_each_element(items in prop::collection::vec(any::<i64>(), 1..20)) {
        let filter = Filter::new().with_list("id__in", items.clone());
        let (sql, params) = compile(&stocks(), &filter).unwrap().to_sql();
        prop_assert_eq!(sql.matches('?').count(), items.len());
        prop_assert_eq!(params.len(), items.len());
    }

    /// Column names containing `__` still take their operator suffix
    #[test]
    fn test_double_underscore_column(value in -1.0e9f64..1.0e9) {
        let filter = Filter::new().with("net__income__lt", value);
        let (sql, params) = compile(&stocks(), &filter).unwrap().to_sql();
        prop_assert_eq!(sql, "\"stocks\".\"net__income\" < ?");
        prop_assert_eq!(params.len(), 1);
    }

    /// Keys that do not start with a known column are rejected
    #[test]
    fn test_unknown_field_rejected(field in "[a-z]{3,10}") {
        prop_assume!(field != "price");
        let filter = Filter::new().with(format!("{}__gte", field), 1);
        let result = compile(&stocks(), &filter);
        let unknown = matches!(result, Err(DatabaseError::UnknownColumn { .. }));
        prop_assert!(unknown);
    }

    /// Statement placeholders always match the bound parameters
    #[test]
    fn test_select_placeholders_match_params(
        low in any::<i32>(),
        ids in prop::collection::vec(any::<i32>(), 0..8),
        limit in 0usize..50,
    ) {
        let catalog = CatalogSnapshot::new(vec![stocks()]);
        let stmt = SelectBuilder::new("stocks")
            .filter(
                Filter::new()
                    .with("price__gte", low)
                    .or([Filter::new().with_list("id__in", ids)]),
            )
            .limit(limit)
            .build(&catalog)
            .unwrap();
        prop_assert_eq!(stmt.sql.matches('?').count(), stmt.params.len());
    }
}

// ============================================================================
// Pagination
// ============================================================================

const SEEDED_ROWS: usize = 25;

fn seeded() -> &'static SyncDatabase {
    static DB: OnceLock<SyncDatabase> = OnceLock::new();
    DB.get_or_init(|| {
        let config = PoolConfig::new("file:prop_paging?mode=memory&cache=shared")
            .with_max_size(1)
            .with_timeout(Duration::from_secs(10));
        let db = SyncDatabase::connect(config).unwrap();
        db.execute_raw("CREATE TABLE stocks (id INTEGER PRIMARY KEY, price REAL)", &[])
            .unwrap();
        db.reload_catalog().unwrap();

        let rows: Vec<RowValues> = (1..=SEEDED_ROWS as i64)
            .map(|id| values([("id", DatabaseValue::from(id)), ("price", (id as f64).into())]))
            .collect();
        db.insert("stocks", rows.into()).unwrap();
        db
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// `limit(0)` returns everything; `limit(k)` returns the first k rows in order
    #[test]
    fn test_limit_returns_ordered_prefix(limit in 0usize..40) {
        let db = seeded();
        let rows = db
            .select(&SelectBuilder::new("stocks").order_by("id").limit(limit))
            .unwrap();

        let expected = if limit == 0 { SEEDED_ROWS } else { limit.min(SEEDED_ROWS) };
        prop_assert_eq!(rows.len(), expected);

        let ids: Vec<i64> = rows.iter().filter_map(|r| r["id"].as_long()).collect();
        let descending: Vec<i64> = (1..=SEEDED_ROWS as i64).rev().take(expected).collect();
        prop_assert_eq!(ids, descending);
    }

    /// A gte filter keeps exactly the rows at or above the threshold
    #[test]
    fn test_price_gte_matches_rows(threshold in 0i64..30) {
        let db = seeded();
        let rows = db
            .select(&SelectBuilder::new("stocks").filter(Filter::new().with("price__gte", threshold)))
            .unwrap();
        let expected = (1..=SEEDED_ROWS as i64).filter(|id| *id >= threshold).count();
        prop_assert_eq!(rows.len(), expected);
    }
}

// ============================================================================
// Bulk Updates
// ============================================================================

const BULK_ROWS: i64 = 50;

fn bulk_seeded() -> &'static SyncDatabase {
    static DB: OnceLock<SyncDatabase> = OnceLock::new();
    DB.get_or_init(|| {
        let config = PoolConfig::new("file:prop_bulk?mode=memory&cache=shared")
            .with_max_size(1)
            .with_timeout(Duration::from_secs(10))
            .with_chunk_pause(Duration::ZERO);
        let db = SyncDatabase::connect(config).unwrap();
        db.execute_raw("CREATE TABLE bulk (id INTEGER PRIMARY KEY, status TEXT)", &[])
            .unwrap();
        db.reload_catalog().unwrap();

        let rows: Vec<RowValues> = (1..=BULK_ROWS)
            .map(|id| values([("id", DatabaseValue::from(id)), ("status", "seed".into())]))
            .collect();
        db.insert("bulk", rows.into()).unwrap();
        db
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// N rows in chunks of C commit as ceil(N / C) chunks, and every row
    /// ends up with the value written for it
    #[test]
    fn test_bulk_update_chunking(n in 0usize..50, chunk in 1usize..10, tag in "[a-z]{1,8}") {
        let db = bulk_seeded();
        let ids: Vec<i64> = (1..=n as i64).collect();
        let rows: Vec<RowValues> = ids
            .iter()
            .map(|id| {
                values([
                    ("id", DatabaseValue::from(*id)),
                    ("status", format!("{}-{}", tag, id).into()),
                ])
            })
            .collect();

        let report = db.bulk_update("bulk", &rows, &["id"], Some(chunk)).unwrap();
        prop_assert_eq!(report.chunks, (n + chunk - 1) / chunk);
        prop_assert_eq!(report.affected, n);

        if n > 0 {
            let written = db
                .select(
                    &SelectBuilder::new("bulk")
                        .filter(Filter::new().with_list("id__in", ids.clone()))
                        .order_by("id"),
                )
                .unwrap();
            prop_assert_eq!(written.len(), n);
            for row in &written {
                let id = row["id"].as_long().unwrap();
                prop_assert_eq!(row["status"].as_string(), format!("{}-{}", tag, id));
            }
        }
    }
}
