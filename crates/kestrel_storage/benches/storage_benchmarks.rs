//! Benchmarks for the Kestrel storage layer.
//!
//! Run with: `cargo bench --package kestrel_storage`

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use kestrel_foundation::Value;
use kestrel_storage::{FactSchema, FactSource, FactStore, FactType, TypeRegistry};

fn registry() -> TypeRegistry {
    let mut reg = TypeRegistry::new();
    reg.register(FactSchema::new("Order").with_identity_field("id"))
        .expect("register");
    reg
}

fn order(i: i64) -> Value {
    Value::record([("id", Value::Int(i)), ("amount", Value::Int(i * 10))])
}

// =============================================================================
// Fact Store Benchmarks
// =============================================================================

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("fact_store/insert");
    let reg = registry();
    let t = FactType::from("Order");

    for size in [100, 1_000, 10_000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let mut store = FactStore::new();
                for i in 0..size {
                    store
                        .insert(&reg, &t, order(i), FactSource::Value)
                        .expect("insert");
                }
                black_box(store)
            })
        });
    }

    group.finish();
}

fn bench_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("fact_store/resolve");
    let reg = registry();
    let t = FactType::from("Order");

    for size in [100i64, 10_000] {
        let mut store = FactStore::new();
        for i in 0..size {
            store
                .insert(&reg, &t, order(i), FactSource::Value)
                .expect("insert");
        }
        let probe = order(size / 2);
        group.bench_with_input(BenchmarkId::from_parameter(size), &probe, |b, probe| {
            b.iter(|| black_box(store.resolve(&reg, &t, probe)))
        });
    }

    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let reg = registry();
    let t = FactType::from("Order");
    let mut store = FactStore::new();
    for i in 0..10_000 {
        store
            .insert(&reg, &t, order(i), FactSource::Value)
            .expect("insert");
    }

    c.bench_function("fact_store/snapshot_10000", |b| {
        b.iter(|| black_box(store.clone()))
    });
}

criterion_group!(benches, bench_insert, bench_resolve, bench_snapshot);
criterion_main!(benches);
