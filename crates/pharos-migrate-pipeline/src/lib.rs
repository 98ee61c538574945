//! Orchestration of one migration run: paging through the export,
//! remapping legacy pids to new ids and handing records to a
//! [`pharos_migrate_core::Destination`] in dependency order.

mod config;
mod context;
mod migrator;
mod summary;

pub use config::{
    MigrateConfig, ReferencePolicy, API_FILE_BATCH_SIZE, DEFAULT_OBJECT_PAGE_SIZE,
    DEFAULT_WORK_ITEM_PAGE_SIZE,
};
pub use context::MigrationContext;
pub use migrator::Migrator;
pub use summary::MigrationSummary;
