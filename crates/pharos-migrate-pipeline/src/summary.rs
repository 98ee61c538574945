use anyhow::{Context, Result};
use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Counts of every record kind written during one run.
#[derive(Debug, Clone, Default, Serialize, Eq, PartialEq)]
pub struct MigrationSummary {
    pub destination: String,
    pub started_at: String,
    pub finished_at: String,
    pub institutions: usize,
    pub users: usize,
    pub objects: usize,
    pub files: usize,
    pub checksums: usize,
    pub events: usize,
    pub work_items: usize,
    pub work_item_states: usize,
}

pub(crate) fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc().format(&Rfc3339).context("failed to format RFC3339 timestamp")
}
