//! Report structure configuration.
//!
//! # Responsibility
//! - Deserialize the static section template (ids, repeatable markers, table
//!   and photo-group declarations) and the number display style.
//! - Validate declarations and build a `SectionTree`.
//!
//! # Invariants
//! - Declaration order in the config is the reader-visible order.
//! - Table names and photo prefixes are unique and non-blank per section.

use crate::model::artifact::NumberStyle;
use crate::model::section::{GroupKind, SectionDeclarations, SectionTree, SectionTreeError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;

/// Errors from config loading and validation.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    Tree(SectionTreeError),
    /// Blank or repeated table/photo-group declaration.
    InvalidDeclaration { section: String, name: String },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "failed to read report config: {err}"),
            Self::Parse(err) => write!(f, "invalid report config: {err}"),
            Self::Tree(err) => write!(f, "invalid section tree: {err}"),
            Self::InvalidDeclaration { section, name } => write!(
                f,
                "section `{section}` has a blank or repeated declaration `{name}`"
            ),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Parse(err) => Some(err),
            Self::Tree(err) => Some(err),
            Self::InvalidDeclaration { .. } => None,
        }
    }
}

impl From<SectionTreeError> for ConfigError {
    fn from(value: SectionTreeError) -> Self {
        Self::Tree(value)
    }
}

/// One section of the template, with nested children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionConfig {
    pub id: String,
    #[serde(default)]
    pub repeatable: Option<GroupKind>,
    #[serde(default)]
    pub tables: Vec<String>,
    #[serde(default)]
    pub photo_groups: Vec<String>,
    #[serde(default)]
    pub children: Vec<SectionConfig>,
}

/// Top-level report configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default)]
    pub number_style: NumberStyle,
    pub sections: Vec<SectionConfig>,
}

impl ReportConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(raw).map_err(ConfigError::Parse)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_json_str(&raw)
    }

    /// Validates declarations and builds the section template tree.
    pub fn build_tree(&self) -> Result<SectionTree, ConfigError> {
        let mut tree = SectionTree::new();
        let mut pending: Vec<(Option<&str>, &SectionConfig)> =
            self.sections.iter().rev().map(|section| (None, section)).collect();

        // Depth-first, pushing children reversed so they are inserted in order.
        while let Some((parent, section)) = pending.pop() {
            validate_names(&section.id, &section.tables)?;
            validate_names(&section.id, &section.photo_groups)?;
            tree.insert(
                parent,
                &section.id,
                section.repeatable,
                SectionDeclarations {
                    tables: section.tables.clone(),
                    photo_groups: section.photo_groups.clone(),
                },
            )?;
            for child in section.children.iter().rev() {
                pending.push((Some(section.id.as_str()), child));
            }
        }
        Ok(tree)
    }
}

fn validate_names(section: &str, names: &[String]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for name in names {
        if name.trim().is_empty() || !seen.insert(name.as_str()) {
            return Err(ConfigError::InvalidDeclaration {
                section: section.to_string(),
                name: name.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, ReportConfig};
    use crate::model::artifact::NumberStyle;
    use crate::model::section::GroupKind;

    const SAMPLE: &str = r#"{
        "number_style": "dotted",
        "sections": [
            {
                "id": "3",
                "tables": ["cuadroUbicacion"],
                "children": [
                    {
                        "id": "3.1",
                        "repeatable": "primary",
                        "photo_groups": ["fotografiaActividades", "fotografiaMercado"],
                        "children": [{ "id": "3.1.2", "tables": ["cuadroPoblacion"] }]
                    },
                    { "id": "3.2" }
                ]
            }
        ]
    }"#;

    #[test]
    fn build_tree_keeps_declaration_order() {
        let config = ReportConfig::from_json_str(SAMPLE).unwrap();
        assert_eq!(config.number_style, NumberStyle::Dotted);

        let tree = config.build_tree().unwrap();
        assert_eq!(tree.roots(), &["3".to_string()]);
        assert_eq!(tree.children("3"), &["3.1".to_string(), "3.2".to_string()]);
        assert_eq!(tree.node("3.1").unwrap().repeatable, Some(GroupKind::Primary));
        assert_eq!(
            tree.node("3.1").unwrap().declarations.photo_groups,
            vec!["fotografiaActividades", "fotografiaMercado"]
        );
        assert_eq!(tree.len(), 4);
    }

    #[test]
    fn repeated_table_name_is_rejected() {
        let raw = r#"{ "sections": [{ "id": "1", "tables": ["t", "t"] }] }"#;
        let err = ReportConfig::from_json_str(raw)
            .unwrap()
            .build_tree()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDeclaration { ref name, .. } if name == "t"));
    }

    #[test]
    fn malformed_json_is_parse_error() {
        let err = ReportConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
