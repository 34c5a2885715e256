use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use quarry::ops::{ColumnScan, Operator, SeqScan};
use strata::{
    BufferPool, ColumnFile, DbFile, FieldDef, FieldKind, FieldValue, HeapFile, TransactionId,
    Tuple, TupleDesc,
};
use tempfile::TempDir;

const ROWS: usize = 2000;

fn wide_desc() -> TupleDesc {
    TupleDesc::new(vec![
        FieldDef::new("id", FieldKind::Int),
        FieldDef::new("name", FieldKind::String),
        FieldDef::new("salary", FieldKind::Int),
        FieldDef::new("bonus", FieldKind::Int),
        FieldDef::new("age", FieldKind::Int),
        FieldDef::new("email", FieldKind::String),
    ])
}

fn row(i: usize) -> Tuple {
    Tuple::new(
        wide_desc(),
        vec![
            FieldValue::Int(i as i64),
            FieldValue::String(format!("name{i}")),
            FieldValue::Int((i * 10) as i64),
            FieldValue::Int((i % 7) as i64),
            FieldValue::Int((20 + i % 50) as i64),
            FieldValue::String(format!("name{i}@example.com")),
        ],
    )
}

fn scan_count(op: &dyn Operator, pool: &Arc<BufferPool>) -> usize {
    let tid = TransactionId::fresh();
    pool.begin(tid).unwrap();
    let mut iter = op.iterator(tid).unwrap();
    let mut n = 0;
    while let Some(t) = iter.next().unwrap() {
        n += black_box(t.values.len());
    }
    pool.commit(tid).unwrap();
    n
}

fn bench_scans(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let pool = BufferPool::new(512);

    let heap: Arc<dyn DbFile> =
        HeapFile::open(dir.path().join("wide.dat"), wide_desc(), Arc::clone(&pool)).unwrap();
    let columns = ColumnFile::open(
        (0..wide_desc().len())
            .map(|i| dir.path().join(format!("wide_col{i}.dat")))
            .collect(),
        wide_desc(),
        Arc::clone(&pool),
    )
    .unwrap();
    let columns_dyn: Arc<dyn DbFile> = Arc::clone(&columns) as Arc<dyn DbFile>;

    let tid = TransactionId::fresh();
    pool.begin(tid).unwrap();
    for i in 0..ROWS {
        Arc::clone(&heap).insert_tuple(&row(i), tid).unwrap();
        Arc::clone(&columns_dyn).insert_tuple(&row(i), tid).unwrap();
    }
    pool.commit(tid).unwrap();

    let full = SeqScan::new(Arc::clone(&heap));
    c.bench_function("heap_full_scan", |b| {
        b.iter(|| scan_count(&full, &pool))
    });

    let one_column = ColumnScan::new(Arc::clone(&columns), vec![4]).unwrap();
    c.bench_function("column_scan_one_of_six", |b| {
        b.iter(|| scan_count(&one_column, &pool))
    });
}

criterion_group!(benches, bench_scans);
criterion_main!(benches);
