use report_core::db::open_db_in_memory;
use report_core::{
    FieldStore, GroupKind, GroupRepoError, GroupRepository, MemoryFieldStore, ReportConfig,
    ReportEngine, SectionScope, SqliteFieldStore, SqliteGroupRepository,
};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

const REPEATABLE_CONFIG: &str =
    r#"{ "sections": [{ "id": "3", "repeatable": "primary", "tables": ["cuadro"] }] }"#;

fn names(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

#[test]
fn replace_assigns_contiguous_ordinals_per_kind() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteGroupRepository::try_new(&conn).unwrap();

    repo.replace_instances(GroupKind::Primary, &names(&["Old"]))
        .unwrap();
    let created = repo
        .replace_instances(GroupKind::Primary, &names(&[" Ccollpa ", "Uchuypampa"]))
        .unwrap();
    repo.replace_instances(GroupKind::Secondary, &names(&["Huanta"]))
        .unwrap();

    let listed = repo.list_instances(GroupKind::Primary).unwrap();
    assert_eq!(listed, created);
    assert_eq!(listed[0].display_name, "Ccollpa");
    assert_eq!(listed[0].prefix().as_str(), "_A1");
    assert_eq!(listed[1].ordinal, 2);

    let secondary = repo.list_instances(GroupKind::Secondary).unwrap();
    assert_eq!(secondary.len(), 1);
    assert_eq!(secondary[0].prefix().as_str(), "_B1");
}

#[test]
fn blank_display_name_rejects_whole_batch() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteGroupRepository::try_new(&conn).unwrap();
    repo.replace_instances(GroupKind::Primary, &names(&["Keep"]))
        .unwrap();

    let err = repo
        .replace_instances(GroupKind::Primary, &names(&["Ok", "  "]))
        .unwrap_err();
    assert!(matches!(err, GroupRepoError::InvalidDisplayName));
    assert_eq!(repo.list_instances(GroupKind::Primary).unwrap().len(), 1);
}

#[test]
fn remove_compacts_later_ordinals() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteGroupRepository::try_new(&conn).unwrap();
    let created = repo
        .replace_instances(GroupKind::Primary, &names(&["A1", "A2", "A3", "A4"]))
        .unwrap();

    let removed = repo.remove_instance(created[1].id).unwrap();
    assert_eq!(removed.ordinal, 2);

    let listed = repo.list_instances(GroupKind::Primary).unwrap();
    let summary: Vec<(u32, &str)> = listed
        .iter()
        .map(|instance| (instance.ordinal, instance.display_name.as_str()))
        .collect();
    assert_eq!(summary, vec![(1, "A1"), (2, "A3"), (3, "A4")]);

    let missing = repo.remove_instance(Uuid::new_v4()).unwrap_err();
    assert!(matches!(missing, GroupRepoError::InstanceNotFound(_)));
}

#[test]
fn engine_loads_persisted_instances() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteGroupRepository::try_new(&conn).unwrap();
    repo.replace_instances(GroupKind::Primary, &names(&["Uno", "Dos"]))
        .unwrap();

    let config = ReportConfig::from_json_str(REPEATABLE_CONFIG).unwrap();
    let mut engine = ReportEngine::from_config(MemoryFieldStore::new(), &config).unwrap();
    assert_eq!(engine.outline().len(), 0);

    assert_eq!(engine.load_groups_from(&repo, GroupKind::Primary).unwrap(), 2);
    assert_eq!(engine.outline().len(), 2);
    assert_eq!(engine.tree().group_instances(GroupKind::Primary)[1].display_name, "Dos");
}

#[test]
fn unmigrated_connection_is_rejected() {
    let conn = Connection::open_in_memory().unwrap();
    let err = SqliteGroupRepository::try_new(&conn).err().unwrap();
    assert!(matches!(err, GroupRepoError::UninitializedConnection { .. }));
}

#[test]
fn persisted_removal_survives_reload() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteGroupRepository::try_new(&conn).unwrap();
    let config = ReportConfig::from_json_str(REPEATABLE_CONFIG).unwrap();

    {
        let store = SqliteFieldStore::try_new(&conn).unwrap();
        let mut engine = ReportEngine::from_config(store, &config).unwrap();
        let count = engine
            .replace_groups_persisted(&repo, GroupKind::Primary, &names(&["Uno", "Dos", "Tres"]))
            .unwrap();
        assert_eq!(count, 3);
        for (ordinal, name) in [(1, "uno"), (2, "dos"), (3, "tres")] {
            engine
                .store_mut()
                .set_field("3", &format!("nombre_A{ordinal}"), json!(name))
                .unwrap();
        }

        let removed = engine
            .remove_group_persisted(&repo, GroupKind::Primary, 2)
            .unwrap()
            .unwrap();
        assert_eq!(removed.display_name, "Dos");
        assert!(engine
            .remove_group_persisted(&repo, GroupKind::Primary, 5)
            .unwrap()
            .is_none());
    }

    let store = SqliteFieldStore::try_new(&conn).unwrap();
    let mut reloaded = ReportEngine::from_config(store, &config).unwrap();
    assert_eq!(reloaded.load_groups_from(&repo, GroupKind::Primary).unwrap(), 2);
    let instances = reloaded.tree().group_instances(GroupKind::Primary);
    assert_eq!(instances[1].display_name, "Tres");
    assert_eq!(instances[1].ordinal, 2);
    assert_eq!(
        reloaded.resolve_text(&SectionScope::instance("3", 2), "nombre"),
        "tres"
    );
    assert_eq!(reloaded.store().get_field("3", "nombre_A3").unwrap(), None);
}
