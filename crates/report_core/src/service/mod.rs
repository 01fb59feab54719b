//! Report engine services.
//!
//! # Responsibility
//! - Resolve group-aware field values over a `FieldStore`.
//! - Number tables and photographs in document order.
//! - Coordinate photo groups and compute percentage tables.
//! - Keep hosts decoupled from storage details through `ReportEngine`.

pub mod aggregation;
pub mod engine;
pub mod numbering;
pub mod photo_service;
pub mod resolution;
