//! Photograph record model and indexed-slot wire naming.
//!
//! # Invariants
//! - Slot field names follow `<photoPrefix><n><Titulo|Fuente|Imagen>` with
//!   `n` in `1..=MAX_PHOTOS_PER_GROUP`.
//! - Records without an image payload are never counted nor numbered.

use crate::model::artifact::ArtifactNumber;
use crate::model::field::is_acceptable_text;

/// Slot capacity of one photo group.
pub const MAX_PHOTOS_PER_GROUP: usize = 10;

/// One of the three per-slot fields of a photo group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhotoField {
    Title,
    Source,
    Image,
}

impl PhotoField {
    fn wire_suffix(self) -> &'static str {
        match self {
            Self::Title => "Titulo",
            Self::Source => "Fuente",
            Self::Image => "Imagen",
        }
    }
}

/// Base (unprefixed) field name of one slot field.
pub fn photo_field_name(photo_prefix: &str, slot: usize, field: PhotoField) -> String {
    format!("{photo_prefix}{slot}{}", field.wire_suffix())
}

/// One photograph as shown in the report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoRecord {
    pub title: String,
    pub source: String,
    /// Image payload (data URL or storage reference).
    pub image: String,
    /// Document-wide number; refreshed by the coordinator on load/save.
    pub number: ArtifactNumber,
}

impl PhotoRecord {
    pub fn new(
        title: impl Into<String>,
        source: impl Into<String>,
        image: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            source: source.into(),
            image: image.into(),
            number: ArtifactNumber::Unassigned,
        }
    }

    /// Blank and placeholder payloads do not count as an image.
    pub fn has_image(&self) -> bool {
        is_acceptable_text(&self.image)
    }
}
