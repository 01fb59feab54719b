//! Report engine facade.
//!
//! # Responsibility
//! - Own the store, section tree, numbering allocator and photo caches of one
//!   authoring session.
//! - Expose resolution, numbering, photo and aggregation operations behind a
//!   single entry point that performs invalidation on its own mutation paths.
//!
//! # Invariants
//! - Every group-instance or photo mutation made through the engine
//!   invalidates numbering before returning.
//! - Removing a group instance migrates prefixed store keys so later
//!   instances keep their values under their new prefixes.
//! - The in-memory instance list only changes after the store migration (and
//!   the repository write, for persisted variants) succeeded.

use crate::config::{ConfigError, ReportConfig};
use crate::model::artifact::{ArtifactNumber, NumberStyle};
use crate::model::field::TableRow;
use crate::model::photo::PhotoRecord;
use crate::model::section::{GroupInstance, GroupKind, GroupPrefix, SectionScope, SectionTree};
use crate::repo::field_store::{FieldStore, StoreError, StoreResult};
use crate::repo::group_repo::{GroupRepoError, GroupRepoResult, GroupRepository};
use crate::service::aggregation::{with_default_percentages, PercentageSpec};
use crate::service::numbering::{NumberingAllocator, NumberingEntry};
use crate::service::photo_service::{PhotoCoordinator, PhotoGroup};
use crate::service::resolution::FieldResolver;
use log::{error, info};
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Result type used by engine operations that touch persistence.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors from engine operations spanning the field store and the group
/// repository.
#[derive(Debug)]
pub enum EngineError {
    Store(StoreError),
    Repo(GroupRepoError),
}

impl Display for EngineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(err) => write!(f, "field store: {err}"),
            Self::Repo(err) => write!(f, "group repository: {err}"),
        }
    }
}

impl Error for EngineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            Self::Repo(err) => Some(err),
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<GroupRepoError> for EngineError {
    fn from(value: GroupRepoError) -> Self {
        Self::Repo(value)
    }
}

/// Single-session facade over the resolution, numbering and photo services.
pub struct ReportEngine<S: FieldStore> {
    store: S,
    tree: SectionTree,
    allocator: NumberingAllocator,
    photos: PhotoCoordinator,
}

impl<S: FieldStore> ReportEngine<S> {
    pub fn new(store: S, tree: SectionTree, style: NumberStyle) -> Self {
        Self {
            store,
            tree,
            allocator: NumberingAllocator::new(style),
            photos: PhotoCoordinator::new(),
        }
    }

    /// Builds an engine from a validated report config.
    pub fn from_config(store: S, config: &ReportConfig) -> Result<Self, ConfigError> {
        let tree = config.build_tree()?;
        info!(
            "event=engine_init module=engine status=ok sections={} number_style={:?}",
            tree.len(),
            config.number_style
        );
        Ok(Self::new(store, tree, config.number_style))
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Mutable store access for plain field edits.
    ///
    /// Edits that add or remove photo images must be followed by
    /// `invalidate_numbering`.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn tree(&self) -> &SectionTree {
        &self.tree
    }

    pub fn resolver(&self) -> FieldResolver<'_, S> {
        FieldResolver::new(&self.store, &self.tree)
    }

    /// Parses a concrete section id such as `3.1.4.A.2.5`.
    pub fn scope(&self, concrete_id: &str) -> SectionScope {
        self.tree.parse_scope(concrete_id)
    }

    pub fn resolve(&self, scope: &SectionScope, field: &str, default: Value) -> Value {
        self.resolver().resolve(scope, field, default)
    }

    pub fn resolve_text(&self, scope: &SectionScope, field: &str) -> String {
        self.resolver().resolve_text(scope, field)
    }

    pub fn resolve_table(
        &self,
        scope: &SectionScope,
        table: &str,
        default: Vec<TableRow>,
    ) -> Vec<TableRow> {
        self.resolver().resolve_table(scope, table, default)
    }

    pub fn table_number(&self, scope: &SectionScope, local_index: usize) -> ArtifactNumber {
        self.allocator
            .table_number(&self.resolver(), scope, local_index)
    }

    pub fn photo_number(
        &self,
        scope: &SectionScope,
        photo_prefix: &str,
        local_index: usize,
    ) -> ArtifactNumber {
        self.allocator
            .photo_number(&self.resolver(), scope, photo_prefix, local_index)
    }

    /// Formats a number in the configured style.
    pub fn render_number(&self, number: ArtifactNumber, scope: &SectionScope) -> String {
        self.allocator.render(number, scope)
    }

    pub fn outline(&self) -> Vec<NumberingEntry> {
        self.allocator.outline(&self.resolver())
    }

    /// Drops memoized numbers after an external structural edit.
    pub fn invalidate_numbering(&self) {
        self.allocator.invalidate();
    }

    pub fn load_photos(&mut self, scope: &SectionScope, photo_prefix: &str) -> Vec<PhotoRecord> {
        let resolver = FieldResolver::new(&self.store, &self.tree);
        self.photos
            .load(&resolver, &self.allocator, scope, photo_prefix)
    }

    /// Loads every declared photo group of the section.
    pub fn load_photo_groups(&mut self, scope: &SectionScope) -> Vec<PhotoGroup> {
        let resolver = FieldResolver::new(&self.store, &self.tree);
        let declared: Vec<&str> = self
            .tree
            .node(&scope.section_id)
            .map(|node| {
                node.declarations
                    .photo_groups
                    .iter()
                    .map(String::as_str)
                    .collect()
            })
            .unwrap_or_default();
        self.photos
            .load_groups(&resolver, &self.allocator, scope, &declared)
    }

    pub fn save_photos(
        &mut self,
        scope: &SectionScope,
        photo_prefix: &str,
        records: Vec<PhotoRecord>,
    ) -> Vec<PhotoRecord> {
        self.photos.save(
            &mut self.store,
            &self.tree,
            &self.allocator,
            scope,
            photo_prefix,
            records,
        )
    }

    pub fn cached_photos(&self, scope: &SectionScope) -> &[PhotoRecord] {
        self.photos.cached_flat(scope)
    }

    /// Resolves a table and fills its percentage columns.
    pub fn percentages(
        &self,
        scope: &SectionScope,
        table: &str,
        spec: &PercentageSpec,
    ) -> Vec<TableRow> {
        let rows = self.resolve_table(scope, table, Vec::new());
        with_default_percentages(&rows, spec)
    }

    /// Replaces every instance of `kind` (re-ingestion of a data file).
    pub fn replace_groups(&mut self, kind: GroupKind, display_names: &[String]) {
        let instances = display_names
            .iter()
            .enumerate()
            .map(|(index, name)| GroupInstance::new(kind, index as u32 + 1, name.trim()))
            .collect();
        self.set_groups(kind, instances);
    }

    /// Installs already materialized instances of `kind`.
    pub fn set_groups(&mut self, kind: GroupKind, instances: Vec<GroupInstance>) {
        let count = instances.len();
        self.tree.set_group_instances(kind, instances);
        self.structure_changed();
        info!(
            "event=groups_replace module=engine status=ok kind={:?} count={}",
            kind, count
        );
    }

    /// Loads persisted instances of `kind` from a repository.
    pub fn load_groups_from(
        &mut self,
        repo: &dyn GroupRepository,
        kind: GroupKind,
    ) -> GroupRepoResult<usize> {
        let instances = repo.list_instances(kind)?;
        let count = instances.len();
        self.set_groups(kind, instances);
        Ok(count)
    }

    /// Persists `display_names` as the instances of `kind`, then installs
    /// them with their repository ids.
    pub fn replace_groups_persisted(
        &mut self,
        repo: &dyn GroupRepository,
        kind: GroupKind,
        display_names: &[String],
    ) -> GroupRepoResult<usize> {
        let instances = repo.replace_instances(kind, display_names)?;
        let count = instances.len();
        self.set_groups(kind, instances);
        Ok(count)
    }

    /// Removes the instance with `ordinal` of `kind` and compacts later ones.
    ///
    /// Store keys of the removed prefix are deleted and later prefixes are
    /// renamed down by one. Returns the removed instance, or `None` for an
    /// unknown ordinal. When the store migration fails the instance list is
    /// left untouched and caches are dropped, since the store may be half
    /// migrated.
    pub fn remove_group(
        &mut self,
        kind: GroupKind,
        ordinal: u32,
    ) -> StoreResult<Option<GroupInstance>> {
        let mut instances = self.tree.group_instances(kind).to_vec();
        let Some(position) = instances
            .iter()
            .position(|instance| instance.ordinal == ordinal)
        else {
            return Ok(None);
        };
        let total = instances.len() as u32;

        if let Err(err) = self.migrate_group_keys(kind, ordinal, total) {
            error!(
                "event=group_remove module=engine status=error kind={:?} ordinal={} error={}",
                kind, ordinal, err
            );
            self.structure_changed();
            return Err(err);
        }

        let removed = instances.remove(position);
        self.tree.set_group_instances(kind, instances);
        self.structure_changed();
        info!(
            "event=group_remove module=engine status=ok kind={:?} ordinal={} remaining={}",
            kind,
            ordinal,
            total - 1
        );
        Ok(Some(removed))
    }

    /// `remove_group` that also removes the instance from `repo` first.
    ///
    /// Nothing is migrated when the repository rejects the removal.
    pub fn remove_group_persisted(
        &mut self,
        repo: &dyn GroupRepository,
        kind: GroupKind,
        ordinal: u32,
    ) -> EngineResult<Option<GroupInstance>> {
        let Some(id) = self
            .tree
            .group_instances(kind)
            .iter()
            .find(|instance| instance.ordinal == ordinal)
            .map(|instance| instance.id)
        else {
            return Ok(None);
        };
        repo.remove_instance(id)?;
        Ok(self.remove_group(kind, ordinal)?)
    }

    fn migrate_group_keys(&mut self, kind: GroupKind, ordinal: u32, total: u32) -> StoreResult<()> {
        let removed_prefix = GroupPrefix::for_instance(kind, ordinal);
        self.store.remove_suffix(removed_prefix.as_str())?;
        for later in ordinal + 1..=total {
            let from = GroupPrefix::for_instance(kind, later);
            let to = GroupPrefix::for_instance(kind, later - 1);
            self.store.rename_suffix(from.as_str(), to.as_str())?;
        }
        Ok(())
    }

    fn structure_changed(&mut self) {
        self.allocator.invalidate();
        self.photos.clear();
    }
}
