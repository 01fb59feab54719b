//! Numbered artifact model.
//!
//! # Responsibility
//! - Name the artifact kinds that receive document-wide numbers.
//! - Own the number display formats (plain and dotted).
//!
//! # Invariants
//! - `Unassigned` always renders as the unset placeholder.

use crate::model::field::UNSET_TOKEN;
use crate::model::section::chapter_of;
use serde::{Deserialize, Serialize};

/// Artifact sequences numbered independently of each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArtifactKind {
    Table,
    Photo,
}

/// Display format for artifact numbers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumberStyle {
    /// `"12"`.
    #[default]
    Plain,
    /// `"<chapter>.<sequence>"`, e.g. `"3.12"`.
    Dotted,
}

/// Result of one allocator lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactNumber {
    Assigned(u32),
    /// No artifact at the requested position in the current declarations.
    Unassigned,
}

impl ArtifactNumber {
    pub fn value(self) -> Option<u32> {
        match self {
            Self::Assigned(value) => Some(value),
            Self::Unassigned => None,
        }
    }

    /// Formats this number for a section in `section_id`.
    pub fn render(self, style: NumberStyle, section_id: &str) -> String {
        match (self, style) {
            (Self::Unassigned, _) => UNSET_TOKEN.to_string(),
            (Self::Assigned(value), NumberStyle::Plain) => value.to_string(),
            (Self::Assigned(value), NumberStyle::Dotted) => {
                format!("{}.{value}", chapter_of(section_id))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ArtifactNumber, NumberStyle};

    #[test]
    fn render_formats_each_style() {
        let number = ArtifactNumber::Assigned(12);
        assert_eq!(number.render(NumberStyle::Plain, "3.1.4.A.5"), "12");
        assert_eq!(number.render(NumberStyle::Dotted, "3.1.4.A.5"), "3.12");
        assert_eq!(
            ArtifactNumber::Unassigned.render(NumberStyle::Dotted, "3.1"),
            "____"
        );
    }
}
