//! Document-wide table and photograph numbering.
//!
//! # Responsibility
//! - Assign each table and image-bearing photo slot a global sequence number
//!   following reader-visible document order.
//! - Memoize the assignment until a structural change invalidates it.
//! - Own the number display format.
//!
//! # Invariants
//! - Numbers of one artifact kind start at 1, are unique and strictly
//!   increasing in traversal order.
//! - Traversal is pre-order over the section tree; a repeatable section
//!   expands its whole subtree once per group instance in ordinal order;
//!   within a section, declaration order is authoritative.
//! - Repeated lookups between invalidations return identical numbers.
//! - Lookups for positions absent from the current snapshot return
//!   `ArtifactNumber::Unassigned`, never an error.

use crate::model::artifact::{ArtifactKind, ArtifactNumber, NumberStyle};
use crate::model::section::{GroupPrefix, SectionScope};
use crate::repo::field_store::FieldStore;
use crate::service::photo_service::image_bearing_slots;
use crate::service::resolution::FieldResolver;
use log::debug;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct NumberingKey {
    kind: ArtifactKind,
    section_id: String,
    prefix: GroupPrefix,
    /// Photo-group prefix; empty for tables.
    photo_prefix: String,
    local_index: usize,
}

/// One assigned number, as listed by `NumberingAllocator::outline`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberingEntry {
    pub kind: ArtifactKind,
    pub scope: SectionScope,
    pub prefix: GroupPrefix,
    /// Table name or photo-group prefix.
    pub artifact: String,
    pub local_index: usize,
    pub number: u32,
}

#[derive(Debug, Default)]
struct NumberingSnapshot {
    numbers: HashMap<NumberingKey, u32>,
    entries: Vec<NumberingEntry>,
    next_table: u32,
    next_photo: u32,
}

impl NumberingSnapshot {
    fn assign(
        &mut self,
        kind: ArtifactKind,
        scope: &SectionScope,
        prefix: &GroupPrefix,
        artifact: &str,
        local_index: usize,
    ) {
        let counter = match kind {
            ArtifactKind::Table => &mut self.next_table,
            ArtifactKind::Photo => &mut self.next_photo,
        };
        *counter += 1;
        let number = *counter;

        let photo_prefix = match kind {
            ArtifactKind::Table => String::new(),
            ArtifactKind::Photo => artifact.to_string(),
        };
        self.numbers.insert(
            NumberingKey {
                kind,
                section_id: scope.section_id.clone(),
                prefix: prefix.clone(),
                photo_prefix,
                local_index,
            },
            number,
        );
        self.entries.push(NumberingEntry {
            kind,
            scope: scope.clone(),
            prefix: prefix.clone(),
            artifact: artifact.to_string(),
            local_index,
            number,
        });
    }
}

/// Memoizing allocator of global artifact numbers.
///
/// Interior mutability lets read paths fill the memo; the host is
/// single-threaded so the type is intentionally `!Sync`.
#[derive(Debug, Default)]
pub struct NumberingAllocator {
    style: NumberStyle,
    snapshot: RefCell<Option<NumberingSnapshot>>,
    generation: Cell<u64>,
}

impl NumberingAllocator {
    pub fn new(style: NumberStyle) -> Self {
        Self {
            style,
            snapshot: RefCell::new(None),
            generation: Cell::new(0),
        }
    }

    pub fn style(&self) -> NumberStyle {
        self.style
    }

    /// Drops the memoized assignment; the next lookup recomputes it.
    ///
    /// Must be called after any tree restructuring, group instance change, or
    /// photo addition/removal.
    pub fn invalidate(&self) {
        self.snapshot.replace(None);
        self.generation.set(self.generation.get() + 1);
    }

    /// Counter bumped by every invalidation.
    pub fn generation(&self) -> u64 {
        self.generation.get()
    }

    /// Global number of the `local_index`-th (0-based) declared table of
    /// `scope`.
    pub fn table_number<S: FieldStore + ?Sized>(
        &self,
        resolver: &FieldResolver<'_, S>,
        scope: &SectionScope,
        local_index: usize,
    ) -> ArtifactNumber {
        self.lookup(resolver, ArtifactKind::Table, scope, "", local_index)
    }

    /// Global number of the `local_index`-th (0-based) image-bearing photo of
    /// group `photo_prefix` in `scope`.
    pub fn photo_number<S: FieldStore + ?Sized>(
        &self,
        resolver: &FieldResolver<'_, S>,
        scope: &SectionScope,
        photo_prefix: &str,
        local_index: usize,
    ) -> ArtifactNumber {
        self.lookup(resolver, ArtifactKind::Photo, scope, photo_prefix, local_index)
    }

    /// Formats `number` in the configured style for `scope`.
    pub fn render(&self, number: ArtifactNumber, scope: &SectionScope) -> String {
        number.render(self.style, &scope.section_id)
    }

    /// Every assigned number of the current snapshot in traversal order.
    pub fn outline<S: FieldStore + ?Sized>(
        &self,
        resolver: &FieldResolver<'_, S>,
    ) -> Vec<NumberingEntry> {
        self.ensure_snapshot(resolver);
        self.snapshot
            .borrow()
            .as_ref()
            .map(|snapshot| snapshot.entries.clone())
            .unwrap_or_default()
    }

    fn lookup<S: FieldStore + ?Sized>(
        &self,
        resolver: &FieldResolver<'_, S>,
        kind: ArtifactKind,
        scope: &SectionScope,
        photo_prefix: &str,
        local_index: usize,
    ) -> ArtifactNumber {
        self.ensure_snapshot(resolver);
        let key = NumberingKey {
            kind,
            section_id: scope.section_id.clone(),
            prefix: resolver.prefix(scope),
            photo_prefix: photo_prefix.to_string(),
            local_index,
        };
        let found = self
            .snapshot
            .borrow()
            .as_ref()
            .and_then(|snapshot| snapshot.numbers.get(&key).copied());
        match found {
            Some(number) => ArtifactNumber::Assigned(number),
            None => {
                debug!(
                    "event=numbering_lookup module=numbering status=unassigned kind={:?} section={} prefix={} photo_prefix={} index={}",
                    kind, scope.section_id, key.prefix, photo_prefix, local_index
                );
                ArtifactNumber::Unassigned
            }
        }
    }

    fn ensure_snapshot<S: FieldStore + ?Sized>(&self, resolver: &FieldResolver<'_, S>) {
        if self.snapshot.borrow().is_some() {
            return;
        }
        let started_at = Instant::now();
        let snapshot = compute_snapshot(resolver);
        debug!(
            "event=numbering_recompute module=numbering status=ok tables={} photos={} duration_us={}",
            snapshot.next_table,
            snapshot.next_photo,
            started_at.elapsed().as_micros()
        );
        self.snapshot.replace(Some(snapshot));
    }
}

fn compute_snapshot<S: FieldStore + ?Sized>(resolver: &FieldResolver<'_, S>) -> NumberingSnapshot {
    let mut snapshot = NumberingSnapshot::default();
    for root in resolver.tree().roots() {
        visit(resolver, &mut snapshot, root, None);
    }
    snapshot
}

fn visit<S: FieldStore + ?Sized>(
    resolver: &FieldResolver<'_, S>,
    snapshot: &mut NumberingSnapshot,
    section_id: &str,
    instance: Option<u32>,
) {
    let tree = resolver.tree();
    let Some(node) = tree.node(section_id) else {
        return;
    };

    if node.repeatable.is_some() && instance.is_none() {
        for group in tree.group_instances_for(section_id) {
            visit(resolver, snapshot, section_id, Some(group.ordinal));
        }
        return;
    }

    let scope = SectionScope {
        section_id: section_id.to_string(),
        instance,
    };
    let prefix = resolver.prefix(&scope);

    for (index, table) in node.declarations.tables.iter().enumerate() {
        snapshot.assign(ArtifactKind::Table, &scope, &prefix, table, index);
    }
    for photo_prefix in &node.declarations.photo_groups {
        let count = image_bearing_slots(resolver, &scope, photo_prefix).len();
        for index in 0..count {
            snapshot.assign(ArtifactKind::Photo, &scope, &prefix, photo_prefix, index);
        }
    }

    for child in &node.children {
        visit(resolver, snapshot, child, instance);
    }
}

#[cfg(test)]
mod tests {
    use super::NumberingAllocator;
    use crate::model::artifact::{ArtifactNumber, NumberStyle};
    use crate::model::section::{
        GroupInstance, GroupKind, SectionDeclarations, SectionScope, SectionTree,
    };
    use crate::repo::field_store::{FieldStore, MemoryFieldStore};
    use crate::service::resolution::FieldResolver;
    use serde_json::json;

    fn declarations(tables: &[&str], photos: &[&str]) -> SectionDeclarations {
        SectionDeclarations {
            tables: tables.iter().map(|name| name.to_string()).collect(),
            photo_groups: photos.iter().map(|name| name.to_string()).collect(),
        }
    }

    fn tree_with_groups(count: usize) -> SectionTree {
        let mut tree = SectionTree::new();
        tree.insert(None, "1", None, declarations(&["intro"], &[]))
            .unwrap();
        tree.insert(
            None,
            "3",
            Some(GroupKind::Primary),
            declarations(&["ubicacion"], &[]),
        )
        .unwrap();
        tree.insert(
            Some("3"),
            "3.1",
            None,
            declarations(&["poblacion", "pea"], &["foto"]),
        )
        .unwrap();
        tree.insert(None, "4", None, declarations(&["cierre"], &[]))
            .unwrap();
        tree.set_group_instances(
            GroupKind::Primary,
            (1..=count)
                .map(|index| GroupInstance::new(GroupKind::Primary, 0, format!("CC {index}")))
                .collect(),
        );
        tree
    }

    #[test]
    fn tables_follow_document_order_across_instances() {
        let tree = tree_with_groups(2);
        let store = MemoryFieldStore::new();
        let resolver = FieldResolver::new(&store, &tree);
        let allocator = NumberingAllocator::new(NumberStyle::Plain);

        let number = |scope: SectionScope, index| allocator.table_number(&resolver, &scope, index);
        assert_eq!(number(SectionScope::shared("1"), 0), ArtifactNumber::Assigned(1));
        assert_eq!(number(SectionScope::instance("3", 1), 0), ArtifactNumber::Assigned(2));
        assert_eq!(number(SectionScope::instance("3.1", 1), 0), ArtifactNumber::Assigned(3));
        assert_eq!(number(SectionScope::instance("3.1", 1), 1), ArtifactNumber::Assigned(4));
        assert_eq!(number(SectionScope::instance("3", 2), 0), ArtifactNumber::Assigned(5));
        assert_eq!(number(SectionScope::instance("3.1", 2), 1), ArtifactNumber::Assigned(7));
        assert_eq!(number(SectionScope::shared("4"), 0), ArtifactNumber::Assigned(8));
    }

    #[test]
    fn unknown_positions_are_unassigned() {
        let tree = tree_with_groups(1);
        let store = MemoryFieldStore::new();
        let resolver = FieldResolver::new(&store, &tree);
        let allocator = NumberingAllocator::new(NumberStyle::Plain);

        assert_eq!(
            allocator.table_number(&resolver, &SectionScope::instance("3.1", 1), 5),
            ArtifactNumber::Unassigned
        );
        assert_eq!(
            allocator.table_number(&resolver, &SectionScope::instance("3.1", 4), 0),
            ArtifactNumber::Unassigned
        );
        assert_eq!(
            allocator.table_number(&resolver, &SectionScope::shared("3.1"), 0),
            ArtifactNumber::Unassigned
        );
    }

    #[test]
    fn memo_is_kept_until_invalidated() {
        let tree = tree_with_groups(1);
        let mut store = MemoryFieldStore::new();
        store.set_field("3.1", "foto1Imagen_A1", json!("img-a")).unwrap();
        let allocator = NumberingAllocator::new(NumberStyle::Plain);
        let scope = SectionScope::instance("3.1", 1);

        {
            let resolver = FieldResolver::new(&store, &tree);
            assert_eq!(
                allocator.photo_number(&resolver, &scope, "foto", 0),
                ArtifactNumber::Assigned(1)
            );
            assert_eq!(
                allocator.photo_number(&resolver, &scope, "foto", 1),
                ArtifactNumber::Unassigned
            );
        }

        store.set_field("3.1", "foto2Imagen_A1", json!("img-b")).unwrap();
        let resolver = FieldResolver::new(&store, &tree);
        assert_eq!(
            allocator.photo_number(&resolver, &scope, "foto", 1),
            ArtifactNumber::Unassigned
        );

        let before = allocator.generation();
        allocator.invalidate();
        assert_eq!(allocator.generation(), before + 1);
        assert_eq!(
            allocator.photo_number(&resolver, &scope, "foto", 1),
            ArtifactNumber::Assigned(2)
        );
    }

    #[test]
    fn outline_lists_entries_in_traversal_order() {
        let tree = tree_with_groups(1);
        let store = MemoryFieldStore::new();
        let resolver = FieldResolver::new(&store, &tree);
        let allocator = NumberingAllocator::new(NumberStyle::Dotted);

        let outline = allocator.outline(&resolver);
        let artifacts: Vec<&str> = outline.iter().map(|entry| entry.artifact.as_str()).collect();
        assert_eq!(artifacts, vec!["intro", "ubicacion", "poblacion", "pea", "cierre"]);
        assert_eq!(
            allocator.render(
                ArtifactNumber::Assigned(outline[2].number),
                &outline[2].scope
            ),
            "3.3"
        );
    }
}
