//! Core engine for multi-section technical reports whose content repeats
//! per community or district discovered at data-load time.
//! This crate is the single source of truth for resolution and numbering rules.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::{ConfigError, ReportConfig, SectionConfig};
pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use logging::{default_log_level, init_logging, logging_status, LogSettings, LoggingError};
pub use model::artifact::{ArtifactKind, ArtifactNumber, NumberStyle};
pub use model::field::{FieldSlot, TableRow, UNSET_TOKEN};
pub use model::photo::{PhotoRecord, MAX_PHOTOS_PER_GROUP};
pub use model::section::{
    GroupInstance, GroupInstanceId, GroupKind, GroupPrefix, SectionScope, SectionTree,
    SectionTreeError,
};
pub use repo::field_store::{
    FieldStore, MemoryFieldStore, SqliteFieldStore, StoreChange, StoreError, StoreResult,
};
pub use repo::group_repo::{
    GroupRepoError, GroupRepoResult, GroupRepository, SqliteGroupRepository,
};
pub use service::aggregation::{with_default_percentages, with_percentages, PercentageSpec};
pub use service::engine::{EngineError, EngineResult, ReportEngine};
pub use service::numbering::{NumberingAllocator, NumberingEntry};
pub use service::photo_service::{PhotoCoordinator, PhotoGroup};
pub use service::resolution::FieldResolver;

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
