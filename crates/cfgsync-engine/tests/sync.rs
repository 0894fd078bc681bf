//! Integration tests for saving, loading and tracking configuration trees.

use cfgsync_core::{Schema, StructSchema, Value};
use cfgsync_engine::{ConfigSync, SyncError};
use cfgsync_storage::{
    Action, DeleteOptions, InMemoryStore, KvTransport, SetOptions, StoreNode,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn config_schema() -> StructSchema {
    let sub1 = StructSchema::new("SubConfig1")
        .field("Subkey1", "subkey1", Schema::string())
        .field("Subkey2", "subkey2", Schema::integer());
    let sub2 = StructSchema::new("SubConfig2")
        .field("Subkey1", "subkey1", Schema::integer())
        .field("Subkey2", "subkey2", Schema::boolean());
    StructSchema::new("Config")
        .field("Key1", "key1", sub1)
        .field("Key2", "key2", Schema::sequence(sub2.into()))
        .field("Key3", "key3", Schema::mapping(Schema::string()))
}

fn config_value() -> Value {
    Value::from_json_str(
        &config_schema().into(),
        r#"{
            "Key1": {"Subkey1": "a", "Subkey2": 1},
            "Key2": [{"Subkey1": 301, "Subkey2": true}],
            "Key3": {"m1": "v1"}
        }"#,
    )
    .unwrap()
}

fn saved(store: &InMemoryStore) -> ConfigSync<&InMemoryStore> {
    let mut sync = ConfigSync::with_value(store, "ns", config_schema(), config_value()).unwrap();
    sync.save().unwrap();
    sync
}

fn dump(store: &impl KvTransport, key: &str) -> String {
    fn walk(nodes: &[StoreNode], out: &mut Vec<String>) {
        for node in nodes {
            if node.dir {
                out.push(format!("{}/ [{}]", node.key, node.modified_index));
                walk(&node.nodes, out);
            } else {
                out.push(format!("{} = {} [{}]", node.key, node.value, node.modified_index));
            }
        }
    }
    let mut out = Vec::new();
    walk(&store.get(key, true).unwrap().nodes, &mut out);
    out.join("\n")
}

#[test]
fn save_writes_the_expected_layout() {
    init_tracing();
    let store = InMemoryStore::new();
    saved(&store);

    insta::assert_snapshot!(dump(&store, "/ns"), @r###"
    /ns/key1/ [1]
    /ns/key1/subkey1 = a [1]
    /ns/key1/subkey2 = 1 [2]
    /ns/key2/ [3]
    /ns/key2/0/ [4]
    /ns/key2/0/subkey1 = 301 [4]
    /ns/key2/0/subkey2 = true [5]
    /ns/key3/ [6]
    /ns/key3/m1 = v1 [7]
    "###);
}

#[test]
fn load_reproduces_the_saved_tree() {
    let store = InMemoryStore::new();
    saved(&store);

    let mut fresh = ConfigSync::new(&store, "ns", config_schema()).unwrap();
    fresh.load().unwrap();
    assert_eq!(fresh.value(), &config_value());

    let key2 = fresh.handle("Key2").unwrap();
    let Value::Sequence(items) = fresh.get(key2).unwrap() else {
        panic!("Key2 is not a sequence");
    };
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].field("Subkey1"), Some(&Value::Integer(301)));
}

#[test]
fn versions_after_load_match_the_store() {
    let store = InMemoryStore::new();
    saved(&store);
    let mut sync = ConfigSync::new(&store, "ns", config_schema()).unwrap();
    sync.load().unwrap();

    let version = |sync: &ConfigSync<&InMemoryStore>, name: &str| {
        sync.version(sync.handle(name).unwrap()).unwrap()
    };
    assert_eq!(version(&sync, "Key1"), 1);
    assert_eq!(version(&sync, "Key1.Subkey1"), 1);
    assert_eq!(version(&sync, "Key1.Subkey2"), 2);
    assert_eq!(version(&sync, "Key2"), 3);
    assert_eq!(version(&sync, "Key3"), 6);

    let element = sync.handle_at("/ns/key2/0/subkey2").unwrap();
    assert_eq!(sync.version(element).unwrap(), 5);

    sync.load().unwrap();
    assert_eq!(version(&sync, "Key1.Subkey2"), 2);

    store
        .set("/ns/key1/subkey2", "7", &SetOptions::default())
        .unwrap();
    sync.load().unwrap();
    assert_eq!(version(&sync, "Key1.Subkey2"), 8);
    assert_eq!(version(&sync, "Key1.Subkey1"), 1);
}

#[test]
fn save_field_touches_only_its_path() {
    let store = InMemoryStore::new();
    let mut sync = saved(&store);
    let subkey1 = sync.handle("Key1.Subkey1").unwrap();
    let subkey2 = sync.handle("Key1.Subkey2").unwrap();
    let before = sync.version(subkey2).unwrap();
    let sibling_before = store.get("/ns/key1/subkey2", false).unwrap();
    let mapping_before = store.get("/ns/key3", true).unwrap();

    sync.set(subkey1, "b").unwrap();
    sync.save_field(subkey1).unwrap();

    assert_eq!(store.get_value("/ns/key1/subkey1").unwrap(), "b");
    assert_eq!(store.index().unwrap(), 8);
    assert_eq!(sync.version(subkey1).unwrap(), 8);
    assert_eq!(sync.version(subkey2).unwrap(), before);
    assert_eq!(store.get("/ns/key1/subkey2", false).unwrap(), sibling_before);
    assert_eq!(store.get("/ns/key3", true).unwrap(), mapping_before);
}

#[test]
fn save_field_on_a_sequence_element() {
    let store = InMemoryStore::new();
    saved(&store);
    let mut sync = ConfigSync::new(&store, "ns", config_schema()).unwrap();
    sync.load().unwrap();

    let element = sync.handle_at("/ns/key2/0/subkey1").unwrap();
    sync.set(element, 302_i64).unwrap();
    sync.save_field(element).unwrap();

    assert_eq!(store.get_value("/ns/key2/0/subkey1").unwrap(), "302");
    assert_eq!(store.get_value("/ns/key2/0/subkey2").unwrap(), "true");
    assert_eq!(sync.version(element).unwrap(), 8);
}

#[test]
fn static_fields_start_at_version_zero() {
    let store = InMemoryStore::new();
    let mut sync = ConfigSync::new(&store, "ns", config_schema()).unwrap();
    let subkey1 = sync.handle("Key1.Subkey1").unwrap();
    assert_eq!(sync.version(subkey1).unwrap(), 0);
    assert_eq!(sync.version(sync.handle("Key2").unwrap()).unwrap(), 0);
    assert_eq!(store.index().unwrap(), 0);

    sync.set(subkey1, "first").unwrap();
    sync.save_field(subkey1).unwrap();
    assert_eq!(store.get_value("/ns/key1/subkey1").unwrap(), "first");
    assert_eq!(sync.version(subkey1).unwrap(), 1);
}

#[test]
fn unrecorded_elements_are_not_mapped() {
    let store = InMemoryStore::new();
    let mut sync = saved(&store);
    let element = sync.handle_at("/ns/key2/0/subkey1").unwrap();
    assert_eq!(sync.version(element).unwrap(), 4);

    store.delete("/ns/key2", &DeleteOptions::tree()).unwrap();
    store.make_dir("/ns/key2", None).unwrap();
    sync.load().unwrap();

    assert!(matches!(
        sync.version(element),
        Err(SyncError::FieldNotMapped { handle }) if handle == element
    ));
    assert!(matches!(
        sync.save_field(element),
        Err(SyncError::FieldNotMapped { .. })
    ));
    assert_eq!(sync.version(sync.handle("Key2").unwrap()).unwrap(), 9);
}

#[test]
fn unknown_field_names_are_rejected() {
    let store = InMemoryStore::new();
    let sync = ConfigSync::new(&store, "ns", config_schema()).unwrap();
    assert!(matches!(
        sync.handle("Key1.Nope"),
        Err(SyncError::Core(cfgsync_core::CoreError::UnknownField { .. }))
    ));
}

#[test]
fn struct_nodes_report_version_zero_after_save() {
    let store = InMemoryStore::new();
    let sync = saved(&store);
    assert_eq!(sync.version(sync.handle("").unwrap()).unwrap(), 0);
    assert_eq!(sync.version(sync.handle("Key1").unwrap()).unwrap(), 0);
    assert_eq!(sync.version(sync.handle("Key1.Subkey2").unwrap()).unwrap(), 2);
}

#[test]
fn shrinking_a_sequence_unaddresses_its_elements() {
    let store = InMemoryStore::new();
    let mut sync = saved(&store);
    let element = sync.handle_at("/ns/key2/0/subkey1").unwrap();
    let key2 = sync.handle("Key2").unwrap();

    sync.set(key2, Value::Sequence(vec![])).unwrap();
    assert!(matches!(
        sync.version(element),
        Err(SyncError::FieldNotAddressable { .. })
    ));
}

#[test]
fn kind_checked_assignment() {
    let store = InMemoryStore::new();
    let mut sync = ConfigSync::new(&store, "ns", config_schema()).unwrap();
    let subkey2 = sync.handle("Key1.Subkey2").unwrap();
    assert!(matches!(
        sync.set(subkey2, "not a number"),
        Err(SyncError::Core(cfgsync_core::CoreError::KindMismatch { .. }))
    ));
}

#[test]
fn scalar_sequences_are_append_only() {
    let schema = StructSchema::new("Tagged").field("Tags", "tags", Schema::sequence(Schema::string()));
    let store = InMemoryStore::new();
    let mut sync = ConfigSync::new(&store, "ns", schema.clone()).unwrap();
    let tags = sync.handle("Tags").unwrap();
    sync.set(tags, Value::Sequence(vec!["x".into(), "y".into()]))
        .unwrap();
    sync.save().unwrap();
    sync.save().unwrap();

    let mut fresh = ConfigSync::new(&store, "ns", schema).unwrap();
    fresh.load().unwrap();
    let expected: Vec<Value> = ["x", "y", "x", "y"].into_iter().map(Value::from).collect();
    assert_eq!(fresh.get(tags).unwrap(), &Value::Sequence(expected));

    // Each element is tracked under the key the store assigned to it.
    let first = fresh.handle_at("/ns/tags/00000000000000000002").unwrap();
    assert_eq!(fresh.version(first).unwrap(), 2);
}

#[test]
fn bad_integer_text_aborts_load() {
    let store = InMemoryStore::new();
    saved(&store);
    store
        .set("/ns/key1/subkey2", "x1", &SetOptions::default())
        .unwrap();

    let mut sync = ConfigSync::new(&store, "ns", config_schema()).unwrap();
    match sync.load() {
        Err(SyncError::Parse { path, value, .. }) => {
            assert_eq!(path, "/ns/key1/subkey2");
            assert_eq!(value, "x1");
        }
        other => panic!("expected parse error, got {other:?}"),
    }
}

#[test]
fn bad_boolean_text_aborts_load() {
    let store = InMemoryStore::new();
    saved(&store);
    store
        .set("/ns/key2/0/subkey2", "yes", &SetOptions::default())
        .unwrap();
    let mut sync = ConfigSync::new(&store, "ns", config_schema()).unwrap();
    assert!(matches!(sync.load(), Err(SyncError::Parse { .. })));
}

#[test]
fn directory_in_place_of_a_scalar() {
    let store = InMemoryStore::new();
    store
        .set("/ns/key1/subkey1/oops", "v", &SetOptions::default())
        .unwrap();
    let mut sync = ConfigSync::new(&store, "ns", config_schema()).unwrap();
    assert!(matches!(
        sync.load(),
        Err(SyncError::UnexpectedDirectory { path }) if path == "/ns/key1/subkey1"
    ));
}

#[test]
fn missing_top_level_field_aborts_load() {
    let store = InMemoryStore::new();
    store
        .set("/ns/key1/subkey1", "a", &SetOptions::default())
        .unwrap();
    let mut sync = ConfigSync::new(&store, "ns", config_schema()).unwrap();
    let err = sync.load().unwrap_err();
    assert!(err.transport().is_some_and(|e| e.is_key_not_found()));
    // The field read before the failure stays loaded.
    let subkey1 = sync.handle("Key1.Subkey1").unwrap();
    assert_eq!(sync.get(subkey1).unwrap(), &Value::from("a"));
}

#[test]
fn slash_in_segment_is_an_invalid_schema() {
    let schema = StructSchema::new("Bad").field("Key", "a/b", Schema::string());
    let result = ConfigSync::new(InMemoryStore::new(), "ns", schema);
    assert!(matches!(result, Err(SyncError::InvalidSchema { .. })));
}

#[test]
fn empty_namespace_stores_under_root() {
    let store = InMemoryStore::new();
    let mut sync = ConfigSync::with_value(&store, "", config_schema(), config_value()).unwrap();
    assert_eq!(sync.root_path(), "/");
    sync.save().unwrap();
    assert_eq!(store.get_value("/key1/subkey1").unwrap(), "a");

    let root = sync.handle("").unwrap();
    sync.save_field(root).unwrap();
    assert_eq!(store.get_value("/key3/m1").unwrap(), "v1");

    sync.purge().unwrap();
    assert!(store.get("/", true).unwrap().nodes.is_empty());
}

#[test]
fn purge_clears_store_and_versions() {
    let store = InMemoryStore::new();
    let mut sync = saved(&store);
    let subkey1 = sync.handle("Key1.Subkey1").unwrap();
    let element = sync.handle_at("/ns/key2/0/subkey1").unwrap();
    sync.purge().unwrap();

    assert!(store.get("/ns", true).unwrap_err().is_key_not_found());
    assert_eq!(sync.version(subkey1).unwrap(), 0);
    assert!(matches!(
        sync.version(element),
        Err(SyncError::FieldNotMapped { .. })
    ));
    sync.purge().unwrap();
}

#[test]
fn doubled_slashes_in_namespace_collapse() {
    let store = InMemoryStore::new();
    let mut sync = ConfigSync::with_value(&store, "x//y/", config_schema(), config_value()).unwrap();
    assert_eq!(sync.namespace(), "x/y");
    assert_eq!(sync.root_path(), "/x/y");
    sync.save().unwrap();
    assert_eq!(store.get_value("/x/y/key1/subkey1").unwrap(), "a");

    let mut fresh = ConfigSync::new(&store, "x//y", config_schema()).unwrap();
    fresh.load().unwrap();
    let subkey1 = fresh.handle("Key1.Subkey1").unwrap();
    assert_eq!(fresh.handle_at("/x/y/key1/subkey1"), Some(subkey1));
    assert_eq!(fresh.version(subkey1).unwrap(), 1);
    assert_eq!(fresh.value(), &config_value());
}

#[test]
fn reload_picks_up_external_changes() {
    let store = InMemoryStore::new();
    let mut sync = saved(&store);
    store.set("/ns/key3/m2", "v2", &SetOptions::default()).unwrap();

    let key3 = sync.handle("Key3").unwrap();
    sync.reload(key3).unwrap();
    let Value::Mapping(entries) = sync.get(key3).unwrap() else {
        panic!("Key3 is not a mapping");
    };
    assert_eq!(entries.get("m2"), Some(&Value::from("v2")));
    assert_eq!(sync.version(key3).unwrap(), 6);
}

#[test]
fn watch_reports_field_changes() {
    let store = InMemoryStore::new();
    let mut sync = saved(&store);
    let key1 = sync.handle("Key1").unwrap();
    let subkey1 = sync.handle("Key1.Subkey1").unwrap();
    let mut sub = sync.watch(key1).unwrap();

    sync.set(subkey1, "c").unwrap();
    sync.save_field(subkey1).unwrap();
    store.set("/ns/key3/m1", "elsewhere", &SetOptions::default()).unwrap();

    let event = sub.try_recv().unwrap().unwrap();
    assert_eq!(event.action, Action::Set);
    assert_eq!(event.node.key, "/ns/key1/subkey1");
    assert_eq!(event.node.value, "c");
    assert!(sub.try_recv().unwrap().is_none());
}
