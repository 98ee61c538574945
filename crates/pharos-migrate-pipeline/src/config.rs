use pharos_migrate_core::DEFAULT_RECEIVING_PREFIX;

/// Objects read from the source per query.
pub const DEFAULT_OBJECT_PAGE_SIZE: u64 = 1000;

/// Work items read from the source per query.
pub const DEFAULT_WORK_ITEM_PAGE_SIZE: u64 = 100;

/// Files per `create_batch` call when writing through the API.
pub const API_FILE_BATCH_SIZE: usize = 100;

/// What to do when a record points at a legacy pid that was never mapped.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub enum ReferencePolicy {
    /// Abort the run with a missing-reference error.
    #[default]
    Strict,
    /// Write a null foreign key and log a warning.
    Lenient,
}

impl ReferencePolicy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Lenient => "lenient",
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct MigrateConfig {
    /// Maximum number of objects, and separately of work items, to import.
    pub limit: Option<u64>,
    /// Source rows to skip before importing objects and work items.
    pub offset: u64,
    /// `None` writes each parent's files in one batch.
    pub file_batch_size: Option<usize>,
    pub object_page_size: u64,
    pub work_item_page_size: u64,
    pub reference_policy: ReferencePolicy,
    pub receiving_bucket_prefix: String,
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            limit: None,
            offset: 0,
            file_batch_size: None,
            object_page_size: DEFAULT_OBJECT_PAGE_SIZE,
            work_item_page_size: DEFAULT_WORK_ITEM_PAGE_SIZE,
            reference_policy: ReferencePolicy::Strict,
            receiving_bucket_prefix: DEFAULT_RECEIVING_PREFIX.to_string(),
        }
    }
}

impl MigrateConfig {
    /// Size of the next page given how many rows the limit still allows.
    pub(crate) fn next_page(page_size: u64, remaining: Option<u64>) -> u64 {
        let page_size = page_size.max(1);
        remaining.map_or(page_size, |remaining| remaining.min(page_size))
    }
}
