//! Section tree and group instance model.
//!
//! # Responsibility
//! - Hold the report section template tree with per-section declarations.
//! - Hold the group instances discovered at data-load time.
//! - Derive group prefixes as one pure function over that data.
//!
//! # Invariants
//! - Children are kept in document order.
//! - A repeatable section never has a repeatable ancestor.
//! - Group instances of one kind are sorted by ordinal and ordinals are
//!   contiguous from 1.

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

static SECTION_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9A-Za-z]+(\.[0-9A-Za-z]+)*$").expect("valid section id regex")
});

/// Stable identifier of one group instance.
pub type GroupInstanceId = Uuid;

/// Kind of real-world entity a repeatable section expands into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKind {
    /// Directly affected communities; prefixed `_A{n}`.
    Primary,
    /// Indirectly affected districts; prefixed `_B{n}`.
    Secondary,
}

impl GroupKind {
    fn prefix_letter(self) -> char {
        match self {
            Self::Primary => 'A',
            Self::Secondary => 'B',
        }
    }

    pub(crate) fn as_db(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }

    pub(crate) fn from_db(value: &str) -> Option<Self> {
        match value {
            "primary" => Some(Self::Primary),
            "secondary" => Some(Self::Secondary),
            _ => None,
        }
    }
}

/// Field-name suffix namespacing values to one group instance.
///
/// The empty prefix addresses the shared, unprefixed value.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupPrefix(String);

impl GroupPrefix {
    /// Empty prefix used by non-repeatable branches.
    pub fn none() -> Self {
        Self(String::new())
    }

    /// Prefix for the instance with `ordinal` (1-based) of `kind`.
    pub fn for_instance(kind: GroupKind, ordinal: u32) -> Self {
        Self(format!("_{}{}", kind.prefix_letter(), ordinal))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns `field` namespaced by this prefix (`<field><prefix>`).
    pub fn apply(&self, field: &str) -> String {
        format!("{field}{}", self.0)
    }
}

impl Display for GroupPrefix {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One concrete community/district discovered from uploaded data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInstance {
    pub id: GroupInstanceId,
    pub kind: GroupKind,
    /// 1-based position among instances of the same kind.
    pub ordinal: u32,
    pub display_name: String,
}

impl GroupInstance {
    pub fn new(kind: GroupKind, ordinal: u32, display_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            ordinal,
            display_name: display_name.into(),
        }
    }

    pub fn prefix(&self) -> GroupPrefix {
        GroupPrefix::for_instance(self.kind, self.ordinal)
    }
}

/// Address of one section instance: template section plus optional ordinal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SectionScope {
    pub section_id: String,
    pub instance: Option<u32>,
}

impl SectionScope {
    /// Scope outside of any group instance.
    pub fn shared(section_id: impl Into<String>) -> Self {
        Self {
            section_id: section_id.into(),
            instance: None,
        }
    }

    /// Scope bound to the group instance with `ordinal`.
    pub fn instance(section_id: impl Into<String>, ordinal: u32) -> Self {
        Self {
            section_id: section_id.into(),
            instance: Some(ordinal),
        }
    }
}

/// Static per-section artifact declarations, in reader-visible order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionDeclarations {
    #[serde(default)]
    pub tables: Vec<String>,
    #[serde(default)]
    pub photo_groups: Vec<String>,
}

/// One node of the section template tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionNode {
    pub id: String,
    pub parent: Option<String>,
    pub children: Vec<String>,
    /// Group kind this section (and its subtree) is instantiated for.
    pub repeatable: Option<GroupKind>,
    pub declarations: SectionDeclarations,
}

/// Errors from section tree construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectionTreeError {
    InvalidSectionId(String),
    DuplicateSection(String),
    ParentNotFound(String),
    /// Child id does not extend its parent's dotted path.
    ChildOutsideParent { parent: String, child: String },
    /// Repeatable section placed under another repeatable section.
    NestedRepeatable { section: String, ancestor: String },
}

impl Display for SectionTreeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidSectionId(id) => write!(f, "invalid section id `{id}`"),
            Self::DuplicateSection(id) => write!(f, "section already declared: {id}"),
            Self::ParentNotFound(id) => write!(f, "parent section not found: {id}"),
            Self::ChildOutsideParent { parent, child } => {
                write!(f, "section `{child}` is not a sub-path of parent `{parent}`")
            }
            Self::NestedRepeatable { section, ancestor } => write!(
                f,
                "repeatable section `{section}` is nested under repeatable `{ancestor}`"
            ),
        }
    }
}

impl Error for SectionTreeError {}

/// Section template tree plus the group instances it expands into.
#[derive(Debug, Clone, Default)]
pub struct SectionTree {
    nodes: HashMap<String, SectionNode>,
    roots: Vec<String>,
    instances: BTreeMap<GroupKind, Vec<GroupInstance>>,
}

impl SectionTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one section as last child of `parent` (or as last root).
    pub fn insert(
        &mut self,
        parent: Option<&str>,
        id: &str,
        repeatable: Option<GroupKind>,
        declarations: SectionDeclarations,
    ) -> Result<(), SectionTreeError> {
        if !SECTION_ID_RE.is_match(id) {
            return Err(SectionTreeError::InvalidSectionId(id.to_string()));
        }
        if self.nodes.contains_key(id) {
            return Err(SectionTreeError::DuplicateSection(id.to_string()));
        }
        if let Some(parent_id) = parent {
            if !self.nodes.contains_key(parent_id) {
                return Err(SectionTreeError::ParentNotFound(parent_id.to_string()));
            }
            if !id.starts_with(&format!("{parent_id}.")) {
                return Err(SectionTreeError::ChildOutsideParent {
                    parent: parent_id.to_string(),
                    child: id.to_string(),
                });
            }
            if repeatable.is_some() {
                if let Some(ancestor) = self.repeatable_ancestor(parent_id) {
                    return Err(SectionTreeError::NestedRepeatable {
                        section: id.to_string(),
                        ancestor: ancestor.id.clone(),
                    });
                }
            }
        }

        self.nodes.insert(
            id.to_string(),
            SectionNode {
                id: id.to_string(),
                parent: parent.map(str::to_string),
                children: Vec::new(),
                repeatable,
                declarations,
            },
        );
        match parent.and_then(|parent_id| self.nodes.get_mut(parent_id)) {
            Some(parent_node) => parent_node.children.push(id.to_string()),
            None => self.roots.push(id.to_string()),
        }
        Ok(())
    }

    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    pub fn node(&self, id: &str) -> Option<&SectionNode> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Children of `id` in document order; empty for unknown sections.
    pub fn children(&self, id: &str) -> &[String] {
        self.nodes
            .get(id)
            .map(|node| node.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_repeatable(&self, id: &str) -> bool {
        self.nodes
            .get(id)
            .is_some_and(|node| node.repeatable.is_some())
    }

    /// Nearest repeatable section walking up from `id`, `id` included.
    pub fn repeatable_ancestor(&self, id: &str) -> Option<&SectionNode> {
        let mut cursor = self.nodes.get(id);
        while let Some(node) = cursor {
            if node.repeatable.is_some() {
                return Some(node);
            }
            cursor = node.parent.as_deref().and_then(|parent| self.nodes.get(parent));
        }
        None
    }

    /// Group instances of `kind` in ordinal order.
    pub fn group_instances(&self, kind: GroupKind) -> &[GroupInstance] {
        self.instances
            .get(&kind)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Group instances the repeatable section `id` expands into.
    pub fn group_instances_for(&self, id: &str) -> &[GroupInstance] {
        match self.nodes.get(id).and_then(|node| node.repeatable) {
            Some(kind) => self.group_instances(kind),
            None => &[],
        }
    }

    /// Replaces all instances of `kind`; ordinals are reassigned 1..=n in the
    /// given order.
    pub fn set_group_instances(&mut self, kind: GroupKind, mut instances: Vec<GroupInstance>) {
        for (index, instance) in instances.iter_mut().enumerate() {
            instance.kind = kind;
            instance.ordinal = index as u32 + 1;
        }
        if instances.is_empty() {
            self.instances.remove(&kind);
        } else {
            self.instances.insert(kind, instances);
        }
    }

    /// Derives the group prefix for one section instance.
    ///
    /// Returns the empty prefix for non-repeatable branches and for scopes
    /// that carry no instance ordinal.
    pub fn prefix_for(&self, scope: &SectionScope) -> GroupPrefix {
        let Some(ordinal) = scope.instance else {
            return GroupPrefix::none();
        };
        match self
            .repeatable_ancestor(&scope.section_id)
            .and_then(|node| node.repeatable)
        {
            Some(kind) => GroupPrefix::for_instance(kind, ordinal),
            None => GroupPrefix::none(),
        }
    }

    /// Parses a concrete dotted id such as `3.1.4.A.2.5` into its template
    /// section and instance ordinal.
    ///
    /// A numeric segment right after a repeatable section id is read as the
    /// instance ordinal. Ids naming a known template section are returned
    /// unchanged without an instance, even when they could also be read as
    /// an instance of their repeatable parent (`3.1.4.A.5`); build such a
    /// scope with `SectionScope::instance` instead.
    pub fn parse_scope(&self, concrete_id: &str) -> SectionScope {
        if self.nodes.contains_key(concrete_id) {
            let shadowed = concrete_id.rsplit_once('.').is_some_and(|(parent, last)| {
                self.is_repeatable(parent) && last.parse::<u32>().is_ok()
            });
            if shadowed {
                debug!(
                    "event=scope_parse module=section status=ambiguous id={} resolved=template",
                    concrete_id
                );
            }
            return SectionScope::shared(concrete_id);
        }

        let mut template: Vec<&str> = Vec::new();
        let mut instance = None;
        let mut segments = concrete_id.split('.').peekable();
        while let Some(segment) = segments.next() {
            template.push(segment);
            if instance.is_some() || !self.is_repeatable(&template.join(".")) {
                continue;
            }
            if let Some(ordinal) = segments.peek().and_then(|next| next.parse::<u32>().ok()) {
                instance = Some(ordinal);
                segments.next();
            }
        }

        SectionScope {
            section_id: template.join("."),
            instance,
        }
    }
}

/// First dotted segment of a section id, used as chapter label.
pub fn chapter_of(section_id: &str) -> &str {
    section_id.split('.').next().unwrap_or(section_id)
}

#[cfg(test)]
mod tests {
    use super::{
        chapter_of, GroupInstance, GroupKind, GroupPrefix, SectionDeclarations, SectionScope,
        SectionTree, SectionTreeError,
    };

    fn sample_tree() -> SectionTree {
        let mut tree = SectionTree::new();
        tree.insert(None, "3", None, SectionDeclarations::default())
            .unwrap();
        tree.insert(Some("3"), "3.1", None, SectionDeclarations::default())
            .unwrap();
        tree.insert(
            Some("3.1"),
            "3.1.4",
            None,
            SectionDeclarations::default(),
        )
        .unwrap();
        tree.insert(
            Some("3.1.4"),
            "3.1.4.A",
            Some(GroupKind::Primary),
            SectionDeclarations::default(),
        )
        .unwrap();
        tree.insert(
            Some("3.1.4.A"),
            "3.1.4.A.5",
            None,
            SectionDeclarations::default(),
        )
        .unwrap();
        tree.insert(
            Some("3.1.4"),
            "3.1.4.B",
            Some(GroupKind::Secondary),
            SectionDeclarations::default(),
        )
        .unwrap();
        tree
    }

    #[test]
    fn prefix_uses_nearest_repeatable_ancestor() {
        let tree = sample_tree();
        assert_eq!(
            tree.prefix_for(&SectionScope::instance("3.1.4.A.5", 2)),
            GroupPrefix::for_instance(GroupKind::Primary, 2)
        );
        assert_eq!(
            tree.prefix_for(&SectionScope::instance("3.1.4.B", 1)).as_str(),
            "_B1"
        );
        assert!(tree
            .prefix_for(&SectionScope::instance("3.1", 3))
            .is_empty());
        assert!(tree.prefix_for(&SectionScope::shared("3.1.4.A.5")).is_empty());
    }

    #[test]
    fn parse_scope_reads_instance_segment() {
        let tree = sample_tree();
        assert_eq!(
            tree.parse_scope("3.1.4.A.2.5"),
            SectionScope::instance("3.1.4.A.5", 2)
        );
        assert_eq!(tree.parse_scope("3.1.4.A.5"), SectionScope::shared("3.1.4.A.5"));
        assert_eq!(
            tree.parse_scope("3.1.4.B.1"),
            SectionScope::instance("3.1.4.B", 1)
        );
    }

    #[test]
    fn template_id_wins_over_instance_reading() {
        let mut tree = sample_tree();
        let instances = (1..=5)
            .map(|ordinal| GroupInstance::new(GroupKind::Primary, ordinal, format!("C{ordinal}")))
            .collect();
        tree.set_group_instances(GroupKind::Primary, instances);

        assert_eq!(tree.parse_scope("3.1.4.A.5"), SectionScope::shared("3.1.4.A.5"));
        assert_eq!(
            tree.parse_scope("3.1.4.A.4"),
            SectionScope::instance("3.1.4.A", 4)
        );
        assert_eq!(
            tree.parse_scope("3.1.4.A.5.5"),
            SectionScope::instance("3.1.4.A.5", 5)
        );
    }

    #[test]
    fn insert_rejects_nested_repeatable_and_bad_paths() {
        let mut tree = sample_tree();
        let err = tree
            .insert(
                Some("3.1.4.A"),
                "3.1.4.A.6",
                Some(GroupKind::Secondary),
                SectionDeclarations::default(),
            )
            .unwrap_err();
        assert!(matches!(err, SectionTreeError::NestedRepeatable { .. }));

        let err = tree
            .insert(Some("3.1"), "4.2", None, SectionDeclarations::default())
            .unwrap_err();
        assert!(matches!(err, SectionTreeError::ChildOutsideParent { .. }));

        let err = tree
            .insert(None, "3..1", None, SectionDeclarations::default())
            .unwrap_err();
        assert_eq!(err, SectionTreeError::InvalidSectionId("3..1".to_string()));
    }

    #[test]
    fn set_group_instances_reassigns_contiguous_ordinals() {
        let mut tree = sample_tree();
        tree.set_group_instances(
            GroupKind::Primary,
            vec![
                GroupInstance::new(GroupKind::Primary, 7, "Quispe"),
                GroupInstance::new(GroupKind::Primary, 3, "Pampa"),
            ],
        );
        let ordinals: Vec<u32> = tree
            .group_instances_for("3.1.4.A")
            .iter()
            .map(|instance| instance.ordinal)
            .collect();
        assert_eq!(ordinals, vec![1, 2]);
        assert!(tree.group_instances(GroupKind::Secondary).is_empty());
    }

    #[test]
    fn chapter_is_first_segment() {
        assert_eq!(chapter_of("3.1.4.A.5"), "3");
        assert_eq!(chapter_of("7"), "7");
    }
}
