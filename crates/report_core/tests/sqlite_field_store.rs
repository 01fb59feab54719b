use report_core::db::{open_db, open_db_in_memory};
use report_core::{
    FieldStore, GroupKind, ReportConfig, ReportEngine, SectionScope, SqliteFieldStore,
    StoreChange, StoreError,
};
use rusqlite::Connection;
use serde_json::{json, Map};
use std::cell::RefCell;
use std::rc::Rc;

#[test]
fn values_round_trip_through_json_text() {
    let conn = open_db_in_memory().unwrap();
    let mut store = SqliteFieldStore::try_new(&conn).unwrap();

    store.set_field("3.1", "altitud", json!(3250)).unwrap();
    store.set_field("3.1", "altitud", json!("3 250 m")).unwrap();
    assert_eq!(store.get_field("3.1", "altitud").unwrap(), Some(json!("3 250 m")));
    assert_eq!(store.get_field("3.1", "latitud").unwrap(), None);

    let mut row = Map::new();
    row.insert("casos".to_string(), json!(7));
    store.set_table("3.1", "cuadroPea", vec![row.clone()]).unwrap();
    assert_eq!(store.get_table("3.1", "cuadroPea").unwrap(), Some(vec![row]));
}

#[test]
fn values_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.db");
    {
        let conn = open_db(&path).unwrap();
        let mut store = SqliteFieldStore::try_new(&conn).unwrap();
        store.set_field("1", "titulo", json!("Línea base")).unwrap();
    }

    let conn = open_db(&path).unwrap();
    let store = SqliteFieldStore::try_new(&conn).unwrap();
    assert_eq!(store.get_field("1", "titulo").unwrap(), Some(json!("Línea base")));
}

#[test]
fn suffix_migration_renames_and_removes_exact_suffixes() {
    let conn = open_db_in_memory().unwrap();
    let mut store = SqliteFieldStore::try_new(&conn).unwrap();
    store.set_field("3", "nombre_A1", json!("uno")).unwrap();
    store.set_field("3", "nombre_A11", json!("once")).unwrap();
    store.set_field("3", "nombre_A2", json!("dos")).unwrap();
    store.set_table("3", "cuadro_A2", Vec::new()).unwrap();

    assert_eq!(store.remove_suffix("_A1").unwrap(), 1);
    assert_eq!(store.rename_suffix("_A2", "_A1").unwrap(), 2);

    assert_eq!(store.get_field("3", "nombre_A1").unwrap(), Some(json!("dos")));
    assert_eq!(store.get_field("3", "nombre_A11").unwrap(), Some(json!("once")));
    assert_eq!(store.get_field("3", "nombre_A2").unwrap(), None);
    assert_eq!(store.get_table("3", "cuadro_A1").unwrap(), Some(Vec::new()));
}

#[test]
fn listeners_observe_writes_until_unsubscribed() {
    let conn = open_db_in_memory().unwrap();
    let mut store = SqliteFieldStore::try_new(&conn).unwrap();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    let id = store.subscribe(Box::new(move |change: &StoreChange| {
        sink.borrow_mut().push(change.clone())
    }));

    store.set_field("2", "campo", json!(1)).unwrap();
    assert!(store.unsubscribe(id));
    store.set_field("2", "campo", json!(2)).unwrap();

    assert_eq!(
        seen.borrow().as_slice(),
        &[StoreChange::Field {
            section_id: "2".to_string(),
            field_name: "campo".to_string(),
        }]
    );
}

#[test]
fn unmigrated_connection_is_rejected() {
    let conn = Connection::open_in_memory().unwrap();
    let err = SqliteFieldStore::try_new(&conn).err().unwrap();
    assert!(matches!(
        err,
        StoreError::UninitializedConnection {
            actual_version: 0,
            ..
        }
    ));
}

#[test]
fn corrupt_value_is_reported_and_resolved_as_missing() {
    let conn = open_db_in_memory().unwrap();
    conn.execute(
        "INSERT INTO field_values (section_id, field_name, value_json) VALUES ('3', 'x_A1', '{');",
        [],
    )
    .unwrap();
    let mut store = SqliteFieldStore::try_new(&conn).unwrap();
    assert!(matches!(
        store.get_field("3", "x_A1"),
        Err(StoreError::InvalidData(_))
    ));
    store.set_field("3", "x", json!("shared")).unwrap();

    let config = ReportConfig::from_json_str(
        r#"{ "sections": [{ "id": "3", "repeatable": "primary" }] }"#,
    )
    .unwrap();
    let mut engine = ReportEngine::from_config(store, &config).unwrap();
    engine.replace_groups(GroupKind::Primary, &["Uno".to_string()]);
    assert_eq!(
        engine.resolve_text(&SectionScope::instance("3", 1), "x"),
        "shared"
    );
}
