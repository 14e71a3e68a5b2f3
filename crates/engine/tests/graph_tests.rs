//! Object graph round trips through a storage directory
//!
//! These tests verify that:
//! 1. Cycles load as cycles, checked by identity
//! 2. Shared references load as one instance
//! 3. Sized arrays keep their element count and exact record length
//! 4. Mutually typed references resolve their types in one commit
//! 5. Lazy references load on first access and can be released again
//! 6. Every field kind survives a reopen

use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tessera_core::{ObjectId, PrimitiveKind, Value};
use tessera_engine::{
    entity_ref, lazy_ref, EmbeddedStorage, Entity, Lazy, StorageConfig, StorerMode,
};
use tessera_types::{ElementKind, TypeLayout};

fn config() -> StorageConfig {
    StorageConfig {
        channel_count: 4,
        housekeeping_interval_ms: 0,
        ..StorageConfig::default()
    }
}

fn open(dir: &Path) -> EmbeddedStorage {
    EmbeddedStorage::open_with_config(dir, config()).unwrap()
}

fn node_layout() -> Arc<TypeLayout> {
    Arc::new(
        TypeLayout::builder("app.Node")
            .long("value")
            .reference("next")
            .build()
            .unwrap(),
    )
}

fn node(layout: &Arc<TypeLayout>, value: i64) -> Arc<Entity> {
    Entity::new(Arc::clone(layout), vec![Value::Long(value), Value::Ref(None)]).unwrap()
}

#[test]
fn test_two_node_cycle_round_trip() {
    let dir = TempDir::new().unwrap();
    {
        let storage = open(dir.path());
        let layout = node_layout();
        let a = node(&layout, 1);
        let b = node(&layout, 2);
        a.set("next", entity_ref(&b)).unwrap();
        b.set("next", entity_ref(&a)).unwrap();
        storage.set_root(&a).unwrap();
        let report = storage.store_root().unwrap();
        assert_eq!(report.records, 3);
    }

    let storage = open(dir.path());
    let a = storage.root().unwrap();
    let b = a.reference("next").unwrap();
    assert_eq!(a.get("value"), Some(Value::Long(1)));
    assert_eq!(b.get("value"), Some(Value::Long(2)));
    assert!(Arc::ptr_eq(&b.reference("next").unwrap(), &a));
}

#[test]
fn test_shared_reference_loads_once() {
    let dir = TempDir::new().unwrap();
    let pair_id;
    {
        let storage = open(dir.path());
        let layout = node_layout();
        let shared = node(&layout, 7);
        let pair_layout = Arc::new(
            TypeLayout::builder("app.Pair")
                .reference("left")
                .reference("right")
                .build()
                .unwrap(),
        );
        let pair = Entity::new(pair_layout, vec![entity_ref(&shared), entity_ref(&shared)])
            .unwrap();
        pair_id = storage.store(&pair).unwrap();
    }

    let storage = open(dir.path());
    let pair = storage.load(pair_id).unwrap();
    let left = pair.reference("left").unwrap();
    let right = pair.reference("right").unwrap();
    assert!(Arc::ptr_eq(&left, &right));
    assert!(Arc::ptr_eq(&storage.load(pair_id).unwrap(), &pair));
}

#[test]
fn test_large_long_array() {
    let dir = TempDir::new().unwrap();
    let storage = open(dir.path());
    let layout = Arc::new(
        TypeLayout::builder("app.Series")
            .primitive_array("values", PrimitiveKind::Long)
            .build()
            .unwrap(),
    );
    let values: Vec<_> = (0..100_000i64).map(Value::Long).collect();
    let series = Entity::new(layout, vec![Value::Array(values)]).unwrap();
    let id = storage.store(&series).unwrap();

    let stats = storage.file_statistics();
    assert_eq!(stats.entity_count(), 1);
    assert_eq!(stats.data_length(), 24 + 8 + 100_000 * 8);
    drop(series);
    drop(storage);

    let storage = open(dir.path());
    let series = storage.load(id).unwrap();
    let loaded = series.get("values").unwrap();
    let items = loaded.as_array().unwrap();
    assert_eq!(items.len(), 100_000);
    assert_eq!(items[99_999], Value::Long(99_999));
}

#[test]
fn test_mutually_typed_references() {
    let dir = TempDir::new().unwrap();
    let storage = open(dir.path());
    let owner_layout = Arc::new(
        TypeLayout::builder("app.Owner")
            .text("name")
            .reference_to("pet", "app.Pet")
            .build()
            .unwrap(),
    );
    let pet_layout = Arc::new(
        TypeLayout::builder("app.Pet")
            .text("name")
            .reference_to("owner", "app.Owner")
            .build()
            .unwrap(),
    );
    let owner = Entity::new(
        owner_layout,
        vec![Value::Text("Ann".to_string()), Value::Ref(None)],
    )
    .unwrap();
    let pet = Entity::new(
        pet_layout,
        vec![Value::Text("Rex".to_string()), entity_ref(&owner)],
    )
    .unwrap();
    owner.set("pet", entity_ref(&pet)).unwrap();

    storage.store(&owner).unwrap();
    assert!(storage.types().current("app.Owner").is_some());
    assert!(storage.types().current("app.Pet").is_some());
}

#[test]
fn test_lazy_reference_loads_on_access() {
    let dir = TempDir::new().unwrap();
    let holder_id;
    let payload_id;
    {
        let storage = open(dir.path());
        let payload = node(&node_layout(), 42);
        let holder_layout = Arc::new(
            TypeLayout::builder("app.Holder")
                .lazy("payload")
                .build()
                .unwrap(),
        );
        let lazy = Lazy::new(Arc::clone(&payload));
        let holder = Entity::new(holder_layout, vec![lazy_ref(&lazy)]).unwrap();
        holder_id = storage.store(&holder).unwrap();
        payload_id = lazy.object_id().unwrap();
        assert_eq!(storage.object_id_of(&payload), Some(payload_id));
        assert!(lazy.clear());
        assert!(!lazy.is_loaded());
    }

    let storage = open(dir.path());
    let holder = storage.load(holder_id).unwrap();
    let lazy = holder.lazy("payload").unwrap();
    assert_eq!(lazy.object_id(), Some(payload_id));
    assert!(!lazy.is_loaded());

    let payload = lazy.get().unwrap();
    assert_eq!(payload.get("value"), Some(Value::Long(42)));
    assert!(Arc::ptr_eq(&lazy.get().unwrap(), &payload));

    assert!(lazy.clear());
    drop(payload);
    assert_eq!(lazy.get().unwrap().get("value"), Some(Value::Long(42)));
}

#[test]
fn test_unloaded_lazy_survives_restore() {
    let dir = TempDir::new().unwrap();
    let storage = open(dir.path());
    let holder_layout = Arc::new(
        TypeLayout::builder("app.Holder")
            .long("version")
            .lazy("payload")
            .build()
            .unwrap(),
    );
    let lazy = Lazy::new(node(&node_layout(), 5));
    let holder = Entity::new(holder_layout, vec![Value::Long(1), lazy_ref(&lazy)]).unwrap();
    let id = storage.store(&holder).unwrap();
    let payload_id = lazy.object_id().unwrap();
    lazy.clear();

    holder.set("version", Value::Long(2)).unwrap();
    let mut storer = storage.create_storer(StorerMode::Eager);
    storer.store(&holder).unwrap();
    assert_eq!(storer.pending_count(), 1);
    storer.commit().unwrap();

    assert_eq!(lazy.object_id(), Some(payload_id));
    assert!(Arc::ptr_eq(&storage.load(id).unwrap(), &holder));
}

#[test]
fn test_every_field_kind_round_trips() {
    let dir = TempDir::new().unwrap();
    let layout = Arc::new(
        TypeLayout::builder("app.Everything")
            .bool("flag")
            .primitive("byte", PrimitiveKind::Byte)
            .primitive("short", PrimitiveKind::Short)
            .primitive("char", PrimitiveKind::Char)
            .int("int")
            .primitive("float", PrimitiveKind::Float)
            .long("long")
            .double("double")
            .text("text")
            .reference("ref")
            .reference_array("refs")
            .array("empty", ElementKind::Primitive(PrimitiveKind::Int))
            .build()
            .unwrap(),
    );
    let leaf = node(&node_layout(), 3);
    let values = vec![
        Value::Bool(true),
        Value::Byte(-3),
        Value::Short(-300),
        Value::Char('λ'),
        Value::Int(70_000),
        Value::Float(1.5),
        Value::Long(-1),
        Value::Double(2.25),
        Value::Text("grüße".to_string()),
        Value::Ref(None),
        Value::Array(vec![entity_ref(&leaf), Value::Ref(None), entity_ref(&leaf)]),
        Value::Array(Vec::new()),
    ];
    let id = {
        let storage = open(dir.path());
        let everything = Entity::new(layout, values).unwrap();
        storage.store(&everything).unwrap()
    };

    let storage = open(dir.path());
    let loaded = storage.load(id).unwrap();
    assert_eq!(loaded.get("flag"), Some(Value::Bool(true)));
    assert_eq!(loaded.get("byte"), Some(Value::Byte(-3)));
    assert_eq!(loaded.get("short"), Some(Value::Short(-300)));
    assert_eq!(loaded.get("char"), Some(Value::Char('λ')));
    assert_eq!(loaded.get("int"), Some(Value::Int(70_000)));
    assert_eq!(loaded.get("float"), Some(Value::Float(1.5)));
    assert_eq!(loaded.get("long"), Some(Value::Long(-1)));
    assert_eq!(loaded.get("double"), Some(Value::Double(2.25)));
    assert_eq!(loaded.get("text"), Some(Value::Text("grüße".to_string())));
    assert_eq!(loaded.get("ref"), Some(Value::Ref(None)));
    assert_eq!(loaded.get("empty"), Some(Value::Array(Vec::new())));

    let refs = loaded.get("refs").unwrap();
    let items = refs.as_array().unwrap();
    assert_eq!(items.len(), 3);
    assert_eq!(items[1], Value::Ref(None));
    let first = items[0].as_ref_target().unwrap().as_entity().unwrap();
    let last = items[2].as_ref_target().unwrap().as_entity().unwrap();
    assert!(Arc::ptr_eq(first, last));
    assert_eq!(first.get("value"), Some(Value::Long(3)));
}

#[test]
fn test_object_ids_are_not_reused_after_reopen() {
    let dir = TempDir::new().unwrap();
    let first = {
        let storage = open(dir.path());
        storage.store(&node(&node_layout(), 1)).unwrap()
    };
    let storage = open(dir.path());
    let second = storage.store(&node(&node_layout(), 2)).unwrap();
    assert!(second > first);
    assert_ne!(second, ObjectId::ROOTS);
}
