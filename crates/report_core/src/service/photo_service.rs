//! Photo group coordination.
//!
//! # Responsibility
//! - Materialize named photo groups of one section instance from indexed
//!   store slots, and write them back on every mutation.
//! - Keep per-section denormalized caches (flat list and per-prefix map) in
//!   sync so read-mostly views avoid re-querying the store.
//! - Refresh display numbers through the numbering allocator.
//!
//! # Invariants
//! - A group holds at most `MAX_PHOTOS_PER_GROUP` records, all with an image.
//! - Once a group instance stores any own image slot of a photo group, the
//!   shared slots of that group no longer show through for it; what `save`
//!   writes is exactly what `load` reads back.
//! - The coordinator is the only writer of its caches.
//! - Public operations never fail; store errors and cache inconsistencies are
//!   logged and the previous cache value is kept.

use crate::model::artifact::ArtifactNumber;
use crate::model::field::FieldSlot;
use crate::model::photo::{photo_field_name, PhotoField, PhotoRecord, MAX_PHOTOS_PER_GROUP};
use crate::model::section::{SectionScope, SectionTree};
use crate::repo::field_store::FieldStore;
use crate::service::numbering::NumberingAllocator;
use crate::service::resolution::FieldResolver;
use log::{info, warn};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// One named photo group of a section instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoGroup {
    pub photo_prefix: String,
    pub records: Vec<PhotoRecord>,
}

/// Slots (1-based) of `photo_prefix` in `scope` that resolve to an image.
pub fn image_bearing_slots<S: FieldStore + ?Sized>(
    resolver: &FieldResolver<'_, S>,
    scope: &SectionScope,
    photo_prefix: &str,
) -> Vec<usize> {
    let owned = owns_group(resolver, scope, photo_prefix);
    (1..=MAX_PHOTOS_PER_GROUP)
        .filter(|slot| {
            slot_text(resolver, scope, photo_prefix, *slot, PhotoField::Image, owned).is_some()
        })
        .collect()
}

/// Whether the group instance of `scope` has taken over `photo_prefix` by
/// storing any own image slot, blank included.
fn owns_group<S: FieldStore + ?Sized>(
    resolver: &FieldResolver<'_, S>,
    scope: &SectionScope,
    photo_prefix: &str,
) -> bool {
    (1..=MAX_PHOTOS_PER_GROUP).any(|slot| {
        resolver.has_own_entry(scope, &photo_field_name(photo_prefix, slot, PhotoField::Image))
    })
}

fn slot_text<S: FieldStore + ?Sized>(
    resolver: &FieldResolver<'_, S>,
    scope: &SectionScope,
    photo_prefix: &str,
    slot: usize,
    field: PhotoField,
    owned: bool,
) -> Option<String> {
    let name = photo_field_name(photo_prefix, slot, field);
    let found = if owned {
        resolver.lookup_own(scope, &name)
    } else {
        resolver.lookup(scope, &name)
    };
    match found {
        FieldSlot::Set(Value::String(text)) => Some(text),
        FieldSlot::Set(Value::Null) | FieldSlot::Unset => None,
        FieldSlot::Set(other) => Some(other.to_string()),
    }
}

/// Denormalized photo views of one section instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct SectionPhotoCache {
    /// Every cached record, groups in display order.
    flat: Vec<PhotoRecord>,
    by_prefix: BTreeMap<String, Vec<PhotoRecord>>,
    /// Display order of group prefixes.
    order: Vec<String>,
}

impl SectionPhotoCache {
    /// Returns a copy with `photo_prefix` replaced, or an error message when
    /// the result would break cache invariants.
    fn with_group(
        &self,
        declared: &[String],
        photo_prefix: &str,
        records: &[PhotoRecord],
    ) -> Result<Self, String> {
        let mut next = self.clone();
        next.by_prefix
            .insert(photo_prefix.to_string(), records.to_vec());

        let mut order: Vec<String> = declared
            .iter()
            .filter(|prefix| next.by_prefix.contains_key(prefix.as_str()))
            .cloned()
            .collect();
        for prefix in self.order.iter().map(String::as_str).chain([photo_prefix]) {
            if !order.iter().any(|known| known == prefix) {
                order.push(prefix.to_string());
            }
        }
        next.order = order;
        next.flat = next
            .order
            .iter()
            .filter_map(|prefix| next.by_prefix.get(prefix))
            .flatten()
            .cloned()
            .collect();

        next.validate()?;
        Ok(next)
    }

    fn validate(&self) -> Result<(), String> {
        let mapped: usize = self.by_prefix.values().map(Vec::len).sum();
        if mapped != self.flat.len() || self.order.len() != self.by_prefix.len() {
            return Err(format!(
                "flat list has {} records but groups hold {mapped}",
                self.flat.len()
            ));
        }
        if let Some((prefix, _)) = self
            .by_prefix
            .iter()
            .find(|(_, records)| records.len() > MAX_PHOTOS_PER_GROUP)
        {
            return Err(format!("group `{prefix}` exceeds {MAX_PHOTOS_PER_GROUP} records"));
        }
        if self.flat.iter().any(|record| !record.has_image()) {
            return Err("cached record without image".to_string());
        }
        Ok(())
    }
}

/// Loads, saves and caches photo groups per section instance.
#[derive(Debug, Default)]
pub struct PhotoCoordinator {
    caches: HashMap<SectionScope, SectionPhotoCache>,
}

impl PhotoCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads image-bearing records of `photo_prefix` in `scope`, numbered.
    pub fn load<S: FieldStore + ?Sized>(
        &mut self,
        resolver: &FieldResolver<'_, S>,
        allocator: &NumberingAllocator,
        scope: &SectionScope,
        photo_prefix: &str,
    ) -> Vec<PhotoRecord> {
        let owned = owns_group(resolver, scope, photo_prefix);
        let records: Vec<PhotoRecord> = image_bearing_slots(resolver, scope, photo_prefix)
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                let text = |field| {
                    slot_text(resolver, scope, photo_prefix, slot, field, owned).unwrap_or_default()
                };
                PhotoRecord {
                    title: text(PhotoField::Title),
                    source: text(PhotoField::Source),
                    image: text(PhotoField::Image),
                    number: allocator.photo_number(resolver, scope, photo_prefix, index),
                }
            })
            .collect();

        self.update_cache(resolver.tree(), scope, photo_prefix, &records);
        records
    }

    /// Loads several named groups of one section instance.
    pub fn load_groups<S: FieldStore + ?Sized>(
        &mut self,
        resolver: &FieldResolver<'_, S>,
        allocator: &NumberingAllocator,
        scope: &SectionScope,
        photo_prefixes: &[&str],
    ) -> Vec<PhotoGroup> {
        photo_prefixes
            .iter()
            .map(|photo_prefix| PhotoGroup {
                photo_prefix: photo_prefix.to_string(),
                records: self.load(resolver, allocator, scope, photo_prefix),
            })
            .collect()
    }

    /// Writes `records` to the indexed slots of `photo_prefix` in `scope`.
    ///
    /// Records without an image are dropped and the rest truncated to the
    /// group capacity. Remaining slots are cleared, which for a group instance
    /// also hides the shared slots of the group. Numbering is invalidated and
    /// the returned records carry refreshed numbers in save order.
    pub fn save<S: FieldStore + ?Sized>(
        &mut self,
        store: &mut S,
        tree: &SectionTree,
        allocator: &NumberingAllocator,
        scope: &SectionScope,
        photo_prefix: &str,
        records: Vec<PhotoRecord>,
    ) -> Vec<PhotoRecord> {
        let submitted = records.len();
        let mut kept: Vec<PhotoRecord> = records.into_iter().filter(PhotoRecord::has_image).collect();
        if kept.len() > MAX_PHOTOS_PER_GROUP {
            warn!(
                "event=photo_save module=photos status=truncated section={} photo_prefix={} with_image={} kept={}",
                scope.section_id,
                photo_prefix,
                kept.len(),
                MAX_PHOTOS_PER_GROUP
            );
            kept.truncate(MAX_PHOTOS_PER_GROUP);
        }

        let prefix = tree.prefix_for(scope);
        let mut failed_writes = 0usize;
        for slot in 1..=MAX_PHOTOS_PER_GROUP {
            let record = kept.get(slot - 1);
            for field in [PhotoField::Title, PhotoField::Source, PhotoField::Image] {
                let value = record.map_or(String::new(), |record| match field {
                    PhotoField::Title => record.title.clone(),
                    PhotoField::Source => record.source.clone(),
                    PhotoField::Image => record.image.clone(),
                });
                let key = prefix.apply(&photo_field_name(photo_prefix, slot, field));
                if let Err(err) = store.set_field(&scope.section_id, &key, Value::String(value)) {
                    failed_writes += 1;
                    warn!(
                        "event=photo_save module=photos status=error section={} field={} error={}",
                        scope.section_id, key, err
                    );
                }
            }
        }

        allocator.invalidate();
        let resolver = FieldResolver::new(&*store, tree);
        for (index, record) in kept.iter_mut().enumerate() {
            record.number = allocator.photo_number(&resolver, scope, photo_prefix, index);
        }
        self.update_cache(tree, scope, photo_prefix, &kept);
        self.renumber_cached(&resolver, allocator);

        info!(
            "event=photo_save module=photos status=ok section={} prefix={} photo_prefix={} submitted={} saved={} failed_writes={}",
            scope.section_id,
            prefix,
            photo_prefix,
            submitted,
            kept.len(),
            failed_writes
        );
        kept
    }

    /// Cached flat list of one section instance, groups in display order.
    ///
    /// A malformed cache is logged and reads as empty.
    pub fn cached_flat(&self, scope: &SectionScope) -> &[PhotoRecord] {
        self.checked_cache(scope)
            .map(|cache| cache.flat.as_slice())
            .unwrap_or(&[])
    }

    /// Cached records of one named group, if loaded or saved before.
    pub fn cached_group(&self, scope: &SectionScope, photo_prefix: &str) -> Option<&[PhotoRecord]> {
        self.checked_cache(scope)
            .and_then(|cache| cache.by_prefix.get(photo_prefix))
            .map(Vec::as_slice)
    }

    fn checked_cache(&self, scope: &SectionScope) -> Option<&SectionPhotoCache> {
        let cache = self.caches.get(scope)?;
        match cache.validate() {
            Ok(()) => Some(cache),
            Err(message) => {
                warn!(
                    "event=photo_cache module=photos status=malformed section={} error={}",
                    scope.section_id, message
                );
                None
            }
        }
    }

    /// Drops every cache; used after group instances change.
    pub fn clear(&mut self) {
        self.caches.clear();
    }

    fn update_cache(
        &mut self,
        tree: &SectionTree,
        scope: &SectionScope,
        photo_prefix: &str,
        records: &[PhotoRecord],
    ) {
        let declared = tree
            .node(&scope.section_id)
            .map(|node| node.declarations.photo_groups.as_slice())
            .unwrap_or(&[]);
        let current = self.caches.get(scope).cloned().unwrap_or_default();
        match current.with_group(declared, photo_prefix, records) {
            Ok(next) => {
                self.caches.insert(scope.clone(), next);
            }
            Err(message) => {
                warn!(
                    "event=photo_cache module=photos status=malformed section={} photo_prefix={} error={}",
                    scope.section_id, photo_prefix, message
                );
            }
        }
    }

    /// Refreshes numbers of every cached record after an invalidation.
    fn renumber_cached<S: FieldStore + ?Sized>(
        &mut self,
        resolver: &FieldResolver<'_, S>,
        allocator: &NumberingAllocator,
    ) {
        for (scope, cache) in self.caches.iter_mut() {
            if let Err(message) = cache.validate() {
                warn!(
                    "event=photo_renumber module=photos status=malformed section={} error={}",
                    scope.section_id, message
                );
                continue;
            }
            for (photo_prefix, records) in cache.by_prefix.iter_mut() {
                for (index, record) in records.iter_mut().enumerate() {
                    record.number = allocator.photo_number(resolver, scope, photo_prefix, index);
                }
            }
            let mut numbers = cache
                .order
                .iter()
                .filter_map(|prefix| cache.by_prefix.get(prefix))
                .flatten()
                .map(|record| record.number);
            for record in cache.flat.iter_mut() {
                record.number = numbers.next().unwrap_or(ArtifactNumber::Unassigned);
            }
        }
    }
}
