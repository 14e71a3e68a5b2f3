//! Object graph benchmarks
//!
//! - store: one new entity per commit, and a 1,000-node linked list per commit
//! - load: the same list from a freshly opened storage
//! - update: re-storing a known entity, which supersedes its old record

use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use std::sync::Arc;
use tempfile::TempDir;
use tessera_core::{ObjectId, Value};
use tessera_engine::{entity_ref, EmbeddedStorage, Entity, StorageConfig};
use tessera_types::TypeLayout;

const LIST_LENGTH: u64 = 1_000;

fn config() -> StorageConfig {
    StorageConfig {
        channel_count: 4,
        housekeeping_interval_ms: 0,
        ..StorageConfig::default()
    }
}

fn setup() -> (EmbeddedStorage, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let storage = EmbeddedStorage::open_with_config(temp_dir.path(), config()).unwrap();
    (storage, temp_dir)
}

fn node_layout() -> Arc<TypeLayout> {
    Arc::new(
        TypeLayout::builder("bench.Node")
            .long("value")
            .text("label")
            .reference("next")
            .build()
            .unwrap(),
    )
}

fn list(layout: &Arc<TypeLayout>, length: u64) -> Arc<Entity> {
    let mut next = Value::Ref(None);
    let mut head = None;
    for i in (0..length).rev() {
        let node = Entity::new(
            Arc::clone(layout),
            vec![Value::Long(i as i64), Value::Text(format!("node-{}", i)), next],
        )
        .unwrap();
        next = entity_ref(&node);
        head = Some(node);
    }
    head.unwrap()
}

fn bench_store(c: &mut Criterion) {
    let (storage, _temp) = setup();
    let layout = node_layout();

    let mut group = c.benchmark_group("store");
    group.throughput(Throughput::Elements(1));
    group.bench_function("single_entity", |b| {
        b.iter_batched(
            || list(&layout, 1),
            |entity| storage.store(&entity).unwrap(),
            BatchSize::SmallInput,
        )
    });

    group.throughput(Throughput::Elements(LIST_LENGTH));
    group.bench_function("linked_list_1000", |b| {
        b.iter_batched(
            || list(&layout, LIST_LENGTH),
            |head| storage.store(&head).unwrap(),
            BatchSize::LargeInput,
        )
    });
    group.finish();
}

fn bench_load(c: &mut Criterion) {
    let temp_dir = TempDir::new().unwrap();
    let head_id: ObjectId = {
        let storage = EmbeddedStorage::open_with_config(temp_dir.path(), config()).unwrap();
        storage.store(&list(&node_layout(), LIST_LENGTH)).unwrap()
    };

    let mut group = c.benchmark_group("load");
    group.throughput(Throughput::Elements(LIST_LENGTH));
    group.sample_size(20);
    group.bench_function("linked_list_1000", |b| {
        b.iter_batched(
            || EmbeddedStorage::open_with_config(temp_dir.path(), config()).unwrap(),
            |storage| {
                let head = storage.load(head_id).unwrap();
                (storage, head)
            },
            BatchSize::PerIteration,
        )
    });
    group.finish();
}

fn bench_update(c: &mut Criterion) {
    let (storage, _temp) = setup();
    let entity = list(&node_layout(), 1);
    storage.store(&entity).unwrap();

    let mut group = c.benchmark_group("update");
    group.throughput(Throughput::Elements(1));
    let mut value = 0i64;
    group.bench_function("supersede", |b| {
        b.iter(|| {
            value += 1;
            entity.set("value", Value::Long(value)).unwrap();
            storage.store(&entity).unwrap()
        })
    });
    group.finish();
}

criterion_group!(benches, bench_store, bench_load, bench_update);
criterion_main!(benches);
