//! Group-aware field resolution.
//!
//! # Responsibility
//! - Resolve a bare field name for one section instance to its group-prefixed
//!   value, else the shared value, else a caller default.
//! - Apply the same fallback chain to table-valued fields.
//!
//! # Invariants
//! - A prefixed value that is set and non-blank always wins.
//! - Candidate keys are evaluated lazily and in order; lookup stops at the
//!   first accepted value.
//! - Resolution never fails: store errors are logged and treated as missing.

use crate::model::field::{display_value, FieldSlot, TableRow};
use crate::model::section::{GroupPrefix, SectionScope, SectionTree};
use crate::repo::field_store::FieldStore;
use log::warn;
use serde_json::Value;

/// Read-only resolver over one store snapshot and section tree.
pub struct FieldResolver<'a, S: FieldStore + ?Sized> {
    store: &'a S,
    tree: &'a SectionTree,
}

impl<'a, S: FieldStore + ?Sized> FieldResolver<'a, S> {
    pub fn new(store: &'a S, tree: &'a SectionTree) -> Self {
        Self { store, tree }
    }

    pub fn tree(&self) -> &'a SectionTree {
        self.tree
    }

    /// Group prefix for `scope`.
    pub fn prefix(&self, scope: &SectionScope) -> GroupPrefix {
        self.tree.prefix_for(scope)
    }

    /// Ordered store keys tried for `field` in `scope`.
    pub fn candidate_keys(&self, scope: &SectionScope, field: &str) -> Vec<String> {
        let prefix = self.prefix(scope);
        if prefix.is_empty() {
            vec![field.to_string()]
        } else {
            vec![prefix.apply(field), field.to_string()]
        }
    }

    /// Looks up one scalar field through the fallback chain.
    pub fn lookup(&self, scope: &SectionScope, field: &str) -> FieldSlot<Value> {
        first_accepted(self.candidate_keys(scope, field), |key| {
            self.fetch_field(scope, key)
        })
    }

    /// Looks up `field` under the group prefix only, without shared fallback.
    pub fn lookup_own(&self, scope: &SectionScope, field: &str) -> FieldSlot<Value> {
        self.fetch_field(scope, &self.prefix(scope).apply(field))
    }

    /// Whether the group-prefixed key of `field` holds any stored value,
    /// blank included. Always false for the empty prefix.
    pub fn has_own_entry(&self, scope: &SectionScope, field: &str) -> bool {
        let prefix = self.prefix(scope);
        if prefix.is_empty() {
            return false;
        }
        let key = prefix.apply(field);
        match self.store.get_field(&scope.section_id, &key) {
            Ok(value) => value.is_some(),
            Err(err) => {
                // A row exists even if it cannot be decoded.
                warn!(
                    "event=field_lookup module=resolution status=error section={} field={} error={}",
                    scope.section_id, key, err
                );
                true
            }
        }
    }

    fn fetch_field(&self, scope: &SectionScope, key: &str) -> FieldSlot<Value> {
        match self.store.get_field(&scope.section_id, key) {
            Ok(value) => FieldSlot::from_stored(value),
            Err(err) => {
                warn!(
                    "event=field_lookup module=resolution status=error section={} field={} error={}",
                    scope.section_id, key, err
                );
                FieldSlot::Unset
            }
        }
    }

    /// Resolves one scalar field, returning `default` when nothing is set.
    pub fn resolve(&self, scope: &SectionScope, field: &str, default: Value) -> Value {
        self.lookup(scope, field).into_option().unwrap_or(default)
    }

    /// Resolves one scalar field for prose; unset renders as `____`.
    pub fn resolve_text(&self, scope: &SectionScope, field: &str) -> String {
        display_value(&self.lookup(scope, field))
    }

    /// Looks up one table-valued field through the fallback chain.
    pub fn lookup_table(&self, scope: &SectionScope, table: &str) -> FieldSlot<Vec<TableRow>> {
        first_accepted(self.candidate_keys(scope, table), |key| {
            match self.store.get_table(&scope.section_id, key) {
                Ok(rows) => FieldSlot::from_stored_rows(rows),
                Err(err) => {
                    warn!(
                        "event=table_lookup module=resolution status=error section={} table={} error={}",
                        scope.section_id, key, err
                    );
                    FieldSlot::Unset
                }
            }
        })
    }

    /// Resolves one table, returning `default` when nothing is set.
    pub fn resolve_table(
        &self,
        scope: &SectionScope,
        table: &str,
        default: Vec<TableRow>,
    ) -> Vec<TableRow> {
        self.lookup_table(scope, table)
            .into_option()
            .unwrap_or(default)
    }
}

fn first_accepted<T>(
    candidates: Vec<String>,
    mut fetch: impl FnMut(&str) -> FieldSlot<T>,
) -> FieldSlot<T> {
    candidates
        .iter()
        .map(|key| fetch(key.as_str()))
        .find(FieldSlot::is_set)
        .unwrap_or(FieldSlot::Unset)
}

#[cfg(test)]
mod tests {
    use super::FieldResolver;
    use crate::model::field::FieldSlot;
    use crate::model::section::{GroupKind, SectionDeclarations, SectionScope, SectionTree};
    use crate::repo::field_store::{FieldStore, MemoryFieldStore};
    use serde_json::{json, Map, Value};

    fn tree() -> SectionTree {
        let mut tree = SectionTree::new();
        tree.insert(None, "3", None, SectionDeclarations::default())
            .unwrap();
        tree.insert(
            Some("3"),
            "3.1",
            Some(GroupKind::Primary),
            SectionDeclarations::default(),
        )
        .unwrap();
        tree.insert(Some("3.1"), "3.1.5", None, SectionDeclarations::default())
            .unwrap();
        tree
    }

    #[test]
    fn prefixed_value_wins_over_shared() {
        let tree = tree();
        let mut store = MemoryFieldStore::new();
        store.set_field("3.1.5", "poblacion", json!("shared")).unwrap();
        store.set_field("3.1.5", "poblacion_A2", json!("second")).unwrap();

        let resolver = FieldResolver::new(&store, &tree);
        assert_eq!(
            resolver.resolve(&SectionScope::instance("3.1.5", 2), "poblacion", Value::Null),
            json!("second")
        );
        assert_eq!(
            resolver.resolve(&SectionScope::instance("3.1.5", 1), "poblacion", Value::Null),
            json!("shared")
        );
    }

    #[test]
    fn blank_and_sentinel_prefixed_values_fall_back() {
        let tree = tree();
        let mut store = MemoryFieldStore::new();
        store.set_field("3.1.5", "capital", json!("Huanta")).unwrap();
        store.set_field("3.1.5", "capital_A1", json!("____")).unwrap();
        store.set_field("3.1.5", "capital_A2", json!("  ")).unwrap();

        let resolver = FieldResolver::new(&store, &tree);
        for ordinal in [1, 2] {
            assert_eq!(
                resolver.resolve_text(&SectionScope::instance("3.1.5", ordinal), "capital"),
                "Huanta"
            );
        }
        assert_eq!(
            resolver.resolve_text(&SectionScope::shared("3.1.5"), "altitud"),
            "____"
        );
        assert_eq!(
            resolver.resolve(&SectionScope::shared("3.1.5"), "altitud", json!("n/d")),
            json!("n/d")
        );
    }

    #[test]
    fn shared_scope_only_tries_bare_key() {
        let tree = tree();
        let store = MemoryFieldStore::new();
        let resolver = FieldResolver::new(&store, &tree);
        assert_eq!(
            resolver.candidate_keys(&SectionScope::shared("3.1.5"), "grupo"),
            vec!["grupo".to_string()]
        );
        assert_eq!(
            resolver.candidate_keys(&SectionScope::instance("3.1.5", 3), "grupo"),
            vec!["grupo_A3".to_string(), "grupo".to_string()]
        );
    }

    #[test]
    fn own_lookup_ignores_shared_value() {
        let tree = tree();
        let mut store = MemoryFieldStore::new();
        store.set_field("3.1.5", "foto1Imagen", json!("shared")).unwrap();
        store.set_field("3.1.5", "foto1Imagen_A1", json!("")).unwrap();

        let resolver = FieldResolver::new(&store, &tree);
        let first = SectionScope::instance("3.1.5", 1);
        let second = SectionScope::instance("3.1.5", 2);
        assert_eq!(resolver.lookup_own(&first, "foto1Imagen"), FieldSlot::Unset);
        assert!(resolver.has_own_entry(&first, "foto1Imagen"));
        assert!(!resolver.has_own_entry(&second, "foto1Imagen"));
        assert!(!resolver.has_own_entry(&SectionScope::shared("3.1.5"), "foto1Imagen"));
    }

    #[test]
    fn empty_prefixed_table_falls_back_to_shared_rows() {
        let tree = tree();
        let mut store = MemoryFieldStore::new();
        let mut row = Map::new();
        row.insert("categoria".to_string(), json!("Agricultura"));
        store
            .set_table("3.1.5", "cuadroPea", vec![row.clone()])
            .unwrap();
        store.set_table("3.1.5", "cuadroPea_A1", Vec::new()).unwrap();

        let resolver = FieldResolver::new(&store, &tree);
        let scope = SectionScope::instance("3.1.5", 1);
        assert_eq!(resolver.lookup_table(&scope, "cuadroPea"), FieldSlot::Set(vec![row]));
        assert!(resolver
            .resolve_table(&scope, "cuadroOtros", Vec::new())
            .is_empty());
    }
}
