//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define the field store contract consumed by the engine.
//! - Isolate SQLite query details from resolution/numbering orchestration.
//!
//! # Invariants
//! - Store APIs report transport/decoding failures as typed errors; deciding
//!   what a missing value means is left to callers.

pub mod field_store;
pub mod group_repo;
