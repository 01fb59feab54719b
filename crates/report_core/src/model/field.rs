//! Field value model and the store-boundary "unset" convention.
//!
//! # Responsibility
//! - Define the value shapes held by the field store (scalar JSON values and
//!   table rows).
//! - Translate between stored values and the explicit `FieldSlot` enumerant
//!   used inside the engine.
//!
//! # Invariants
//! - `UNSET_TOKEN` is never treated as real data.
//! - Blank strings and empty row lists are equivalent to absence.

use serde_json::{Map, Value};

/// Four-underscore placeholder stored/displayed for "value not yet provided".
pub const UNSET_TOKEN: &str = "____";

/// One table row as stored: column name -> JSON value.
pub type TableRow = Map<String, Value>;

/// Explicit presence state of one looked-up field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldSlot<T> {
    /// No acceptable value at this key.
    Unset,
    /// Accepted value.
    Set(T),
}

impl<T> FieldSlot<T> {
    /// Returns accepted value, if any.
    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Unset => None,
            Self::Set(value) => Some(value),
        }
    }

    pub fn is_set(&self) -> bool {
        matches!(self, Self::Set(_))
    }
}

impl FieldSlot<Value> {
    /// Applies the store acceptance rule to one raw scalar value.
    pub fn from_stored(value: Option<Value>) -> Self {
        match value {
            Some(value) if is_acceptable_value(&value) => Self::Set(value),
            _ => Self::Unset,
        }
    }
}

impl FieldSlot<Vec<TableRow>> {
    /// Applies the store acceptance rule to one raw table value.
    pub fn from_stored_rows(rows: Option<Vec<TableRow>>) -> Self {
        match rows {
            Some(rows) if !rows.is_empty() => Self::Set(rows),
            _ => Self::Unset,
        }
    }
}

/// Returns whether a text counts as provided data.
pub fn is_acceptable_text(text: &str) -> bool {
    let trimmed = text.trim();
    !trimmed.is_empty() && trimmed != UNSET_TOKEN
}

/// Returns whether a stored scalar counts as provided data.
pub fn is_acceptable_value(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(text) => is_acceptable_text(text),
        Value::Array(items) => !items.is_empty(),
        _ => true,
    }
}

/// Renders a scalar for prose output; unset values become `UNSET_TOKEN`.
pub fn display_value(slot: &FieldSlot<Value>) -> String {
    match slot {
        FieldSlot::Unset => UNSET_TOKEN.to_string(),
        FieldSlot::Set(Value::String(text)) => text.clone(),
        FieldSlot::Set(other) => other.to_string(),
    }
}
