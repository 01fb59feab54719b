//! Domain model for group-aware report sections.
//!
//! # Responsibility
//! - Define the section template tree and the group instances it expands into.
//! - Define field values, numbered artifacts and photo records.
//!
//! # Invariants
//! - Group prefixes are derived from tree data only, never concatenated ad hoc.
//! - Absence of data is an explicit enumerant inside the engine; the
//!   four-underscore token only exists at the store/display boundary.

pub mod artifact;
pub mod field;
pub mod photo;
pub mod section;
