use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use std::sync::Arc;
use uuid::Uuid;

use latticed::state::Registry;
use lattice_crdt::{decode, encode, Replica, ReplicaKind};

// Baseline costs of the hot path: merge, wire codec, and a registry
// read-modify-write with no subscribers attached.

fn merge_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge");
    group.throughput(Throughput::Elements(1));

    let mut left = Replica::empty(ReplicaKind::GCounter);
    let mut right = Replica::empty(ReplicaKind::GCounter);
    for i in 0..32u64 {
        left.increment_by(&format!("node-{i}"), i).unwrap();
        right.increment_by(&format!("node-{}", 64 - i), i).unwrap();
    }

    group.bench_function("gcounter_32_nodes", |b| {
        b.iter(|| {
            let mut out = left.clone();
            out.merge(&right).unwrap();
            out
        })
    });

    group.finish();
}

fn wire_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("wire");
    group.throughput(Throughput::Elements(1));

    let mut set = Replica::empty(ReplicaKind::OrSet);
    for i in 0..64 {
        set.add(&format!("element-{i}"), "node-A").unwrap();
    }
    let wire = encode(&set);

    group.bench_function("encode_orset_64", |b| b.iter(|| encode(&set)));
    group.bench_function("decode_orset_64", |b| b.iter(|| decode(&wire).unwrap()));

    group.finish();
}

fn registry_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry");
    group.throughput(Throughput::Elements(1));

    let registry = Arc::new(Registry::new());
    registry.get_or_create("bench", ReplicaKind::GCounter).unwrap();
    let origin = Uuid::new_v4();

    group.bench_function("update_increment", |b| {
        b.iter(|| {
            registry
                .update("bench", origin, |r| r.increment_by("node-A", 1))
                .unwrap()
        })
    });

    group.finish();
}

criterion_group!(benches, merge_benchmark, wire_benchmark, registry_benchmark);
criterion_main!(benches);
