//! Criterion benchmarks for rust_data_layer

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rust_data_layer::core::catalog::{CatalogSnapshot, ColumnDescriptor, TableDescriptor};
use rust_data_layer::core::mutation::compile_bulk_update;
use rust_data_layer::core::predicate::compile;
use rust_data_layer::prelude::*;
use std::time::Duration;

fn catalog() -> CatalogSnapshot {
    CatalogSnapshot::new(vec![
        TableDescriptor::new(
            "stocks",
            vec![
                ColumnDescriptor::new("ticker", "TEXT").primary_key(),
                ColumnDescriptor::new("name", "TEXT"),
                ColumnDescriptor::new("sector", "TEXT"),
                ColumnDescriptor::new("price", "REAL"),
                ColumnDescriptor::new("net__income", "REAL"),
            ],
        ),
        TableDescriptor::new(
            "factors",
            vec![
                ColumnDescriptor::new("ticker", "TEXT").primary_key(),
                ColumnDescriptor::new("momentum", "REAL"),
            ],
        ),
    ])
}

// ============================================================================
// Filter Compilation Benchmarks
// ============================================================================

fn bench_filter_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("filter_compile");
    group.throughput(Throughput::Elements(1));
    let snapshot = catalog();
    let stocks = snapshot.resolve("stocks").unwrap();

    let simple = Filter::new().with("price__gte", 100);
    group.bench_function("simple", |b| {
        b.iter(|| black_box(compile(&stocks, black_box(&simple)).unwrap()));
    });

    let nested = Filter::new()
        .with("sector", "tech")
        .with("net__income__gt", 0)
        .or([
            Filter::new().with("price__lt", 10),
            Filter::new().with_list("ticker__in", ["AAA", "BBB", "CCC"]),
        ]);
    group.bench_function("nested_or", |b| {
        b.iter(|| black_box(compile(&stocks, black_box(&nested)).unwrap()));
    });

    group.finish();
}

fn bench_in_list_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("in_list");
    let snapshot = catalog();
    let stocks = snapshot.resolve("stocks").unwrap();

    for size in [10, 100, 1000].iter() {
        let filter = Filter::new().with_list("ticker__in", (0..*size).map(|i| format!("T{}", i)));
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &filter, |b, filter| {
            b.iter(|| black_box(compile(&stocks, filter).unwrap().to_sql()));
        });
    }

    group.finish();
}

// ============================================================================
// Query Builder Benchmarks
// ============================================================================

fn bench_select_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("select_build");
    let snapshot = catalog();

    let plain = SelectBuilder::new("stocks")
        .filter(Filter::new().with("price__gte", 100))
        .limit(20);
    group.bench_function("plain", |b| {
        b.iter(|| black_box(plain.build(&snapshot).unwrap()));
    });

    let joined = SelectBuilder::new("stocks")
        .columns(&["ticker", "price"])
        .join(
            JoinSpec::new("stocks", "ticker", "factors", "ticker")
                .columns(&["momentum"])
                .outer()
                .secondary_condition(Filter::new().with("momentum__gt", 0)),
        )
        .filter(Filter::new().with("sector", "tech"))
        .order_by("price")
        .limit(50)
        .offset(100);
    group.bench_function("join", |b| {
        b.iter(|| black_box(joined.build(&snapshot).unwrap()));
    });

    let grouped = SelectBuilder::new("stocks")
        .columns(&["sector"])
        .group_by(&["sector"])
        .aggregate("avg_price", "price", "avg")
        .aggregate("n", "ticker", "count")
        .order_by("avg_price");
    group.bench_function("aggregate", |b| {
        b.iter(|| black_box(grouped.build(&snapshot).unwrap()));
    });

    group.finish();
}

// ============================================================================
// Bulk Update Benchmarks
// ============================================================================

fn bench_bulk_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("bulk_compile");
    let snapshot = catalog();

    for size in [100, 1000, 10000].iter() {
        let rows: Vec<RowValues> = (0..*size)
            .map(|i| values([("ticker", DatabaseValue::from(format!("T{}", i))), ("price", (i as f64).into())]))
            .collect();
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &rows, |b, rows| {
            b.iter(|| black_box(compile_bulk_update(&snapshot, "stocks", rows, &["ticker"], 1000).unwrap()));
        });
    }

    group.finish();
}

// ============================================================================
// End-to-end Benchmarks
// ============================================================================

fn bench_sync_select(c: &mut Criterion) {
    let config = PoolConfig::new("file:bench_select?mode=memory&cache=shared")
        .with_max_size(1)
        .with_chunk_pause(Duration::ZERO);
    let db = SyncDatabase::connect(config).unwrap();
    db.execute_raw("CREATE TABLE stocks (id INTEGER PRIMARY KEY, price REAL)", &[])
        .unwrap();
    db.reload_catalog().unwrap();
    let rows: Vec<RowValues> = (1..=1000)
        .map(|id| values([("id", DatabaseValue::from(id)), ("price", f64::from(id).into())]))
        .collect();
    db.insert("stocks", rows.into()).unwrap();

    let query = SelectBuilder::new("stocks")
        .filter(Filter::new().with("price__gte", 500))
        .order_by("id")
        .limit(100);
    c.bench_function("sync_select_100", |b| {
        b.iter(|| black_box(db.select(&query).unwrap()));
    });
}

criterion_group!(
    benches,
    bench_filter_compile,
    bench_in_list_sizes,
    bench_select_build,
    bench_bulk_compile,
    bench_sync_select
);
criterion_main!(benches);
