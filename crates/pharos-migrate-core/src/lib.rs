use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Marker found in the outcome detail of legacy `ingest` events that were
/// really replication to the Oregon preservation bucket.
pub const REPLICATION_MARKER: &str = "aptrust.preservation.oregon";

/// Outcome-information prefix of events that record a DPN deposit.
pub const ARCHIVAL_MARKER_PREFIX: &str = "DPN";

pub const DEFAULT_RECEIVING_PREFIX: &str = "aptrust.receiving.test.";

pub const INSTITUTION_STATE_ACTIVE: &str = "A";

pub const INSTITUTION_TIMESTAMP: &str = "2015-01-01T00:00:00Z";

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum MigrateError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("missing {kind} mapping for legacy id {old_id:?}")]
    MissingReference { kind: RecordKind, old_id: String },
    #[error("unknown event type {event_type:?} on event {identifier}")]
    UnknownEventType { identifier: String, event_type: String },
    #[error("{key:?} is already mapped to {existing}; refusing to remap it to {attempted}")]
    DuplicateMapping { key: String, existing: String, attempted: String },
    #[error("error saving {record}: expected status {expected}, got {status}\n\n{body}")]
    UnexpectedStatus { record: String, expected: u16, status: u16, body: String },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Institution,
    Object,
}

impl RecordKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Institution => "institution",
            Self::Object => "intellectual object",
        }
    }
}

impl Display for RecordKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Numeric primary key assigned by the destination.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct NewId(pub i64);

impl Display for NewId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reconciles legacy Fedora pids and human-readable identifiers with the
/// numeric ids assigned by the destination.
///
/// Pid entries are append-only for the lifetime of one run: once a pid is
/// mapped, re-mapping it to the same id is a no-op and re-mapping it to a
/// different id fails with [`MigrateError::DuplicateMapping`]. Names are
/// last-write-wins.
#[derive(Debug, Clone, Default)]
pub struct IdentifierMap {
    by_old_id: BTreeMap<String, NewId>,
    by_name: BTreeMap<String, NewId>,
    display_names: BTreeMap<String, String>,
}

impl IdentifierMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a legacy pid to its new id.
    ///
    /// # Errors
    /// Returns an error when `old_id` is blank or already mapped to another id.
    pub fn put(&mut self, old_id: &str, new_id: NewId) -> Result<(), MigrateError> {
        if old_id.trim().is_empty() {
            return Err(MigrateError::Validation("legacy id MUST be non-empty".to_string()));
        }
        match self.by_old_id.get(old_id) {
            Some(existing) if *existing == new_id => Ok(()),
            Some(existing) => Err(MigrateError::DuplicateMapping {
                key: old_id.to_string(),
                existing: existing.to_string(),
                attempted: new_id.to_string(),
            }),
            None => {
                self.by_old_id.insert(old_id.to_string(), new_id);
                Ok(())
            }
        }
    }

    #[must_use]
    pub fn get(&self, old_id: &str) -> Option<NewId> {
        self.by_old_id.get(old_id).copied()
    }

    /// Map a human-readable identifier (e.g. `test.edu/photos`) to its new id.
    /// Blank names are ignored since legacy rows use `''` for "no identifier".
    ///
    /// Unlike pids, names may be reused: a deleted object and its re-ingested
    /// successor share one bag identifier. The latest mapping wins and the
    /// id it replaced is returned.
    pub fn put_by_name(&mut self, name: &str, new_id: NewId) -> Option<NewId> {
        if name.is_empty() {
            return None;
        }
        self.by_name.insert(name.to_string(), new_id).filter(|previous| *previous != new_id)
    }

    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Option<NewId> {
        if name.is_empty() {
            return None;
        }
        self.by_name.get(name).copied()
    }

    /// Remember the display name (institution domain) of a legacy pid.
    ///
    /// # Errors
    /// Returns an error when the pid already carries a different name.
    pub fn put_display_name(&mut self, old_id: &str, name: &str) -> Result<(), MigrateError> {
        match self.display_names.get(old_id) {
            Some(existing) if existing == name => Ok(()),
            Some(existing) => Err(MigrateError::DuplicateMapping {
                key: old_id.to_string(),
                existing: existing.clone(),
                attempted: name.to_string(),
            }),
            None => {
                self.display_names.insert(old_id.to_string(), name.to_string());
                Ok(())
            }
        }
    }

    #[must_use]
    pub fn display_name(&self, old_id: &str) -> Option<&str> {
        self.display_names.get(old_id).map(String::as_str)
    }

    /// Look up a legacy pid that the caller cannot proceed without.
    ///
    /// # Errors
    /// Returns [`MigrateError::MissingReference`] when the pid was never mapped.
    pub fn require(&self, kind: RecordKind, old_id: &str) -> Result<NewId, MigrateError> {
        self.get(old_id)
            .ok_or_else(|| MigrateError::MissingReference { kind, old_id: old_id.to_string() })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_old_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_old_id.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    Restricted,
    Institution,
    Consortia,
}

impl Access {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Restricted => "restricted",
            Self::Institution => "institution",
            Self::Consortia => "consortia",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "restricted" => Some(Self::Restricted),
            "institution" => Some(Self::Institution),
            "consortia" => Some(Self::Consortia),
            _ => None,
        }
    }

    /// Derive access from the number of Solr read groups on a legacy object:
    /// none is restricted, one is institution, two is consortia.
    #[must_use]
    pub fn from_read_group_count(count: usize) -> Option<Self> {
        match count {
            0 => Some(Self::Restricted),
            1 => Some(Self::Institution),
            2 => Some(Self::Consortia),
            _ => None,
        }
    }
}

/// Map a legacy event type onto its Library of Congress PREMIS term.
///
/// Replication was recorded by the old system as a second `ingest`, so an
/// `ingest` whose outcome detail names the Oregon bucket is reclassified.
/// Returns `None` for types outside the table.
#[must_use]
pub fn translate_event_type(event_type: &str, outcome_detail: &str) -> Option<&'static str> {
    if event_type == "ingest" && outcome_detail.contains(REPLICATION_MARKER) {
        return Some("replication");
    }
    match event_type {
        "access_assignment" => Some("access assignment"),
        "delete" => Some("deletion"),
        "fixity_check" => Some("fixity check"),
        "fixity_generation" => Some("message digest calculation"),
        "identifier_assignment" => Some("identifier assignment"),
        "ingest" => Some("ingestion"),
        _ => None,
    }
}

#[must_use]
pub fn capitalize_first(value: Option<&str>) -> Option<String> {
    let value = value?;
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => Some(first.to_uppercase().chain(chars).collect()),
        None => Some(String::new()),
    }
}

/// Extract a DPN UUID from an outcome-information URL such as
/// `DPN/2020/abc-123.tar`. Only `.tar` bag names qualify.
#[must_use]
pub fn archival_uuid(outcome_information: &str) -> Option<String> {
    let tar_file = outcome_information.rsplit('/').next()?;
    match tar_file.strip_suffix(".tar") {
        Some(uuid) if !uuid.is_empty() => Some(uuid.to_string()),
        _ => None,
    }
}

/// Work items do not carry an institution pid, so derive the institution
/// identifier from the object identifier (`test.edu/bag`), then the
/// receiving bucket, then the legacy `institution` column.
#[must_use]
pub fn work_item_institution(
    object_identifier: Option<&str>,
    bucket: Option<&str>,
    institution: Option<&str>,
    receiving_prefix: &str,
) -> Option<String> {
    if let Some(identifier) = non_blank(object_identifier) {
        return identifier.split('/').next().map(str::to_string);
    }
    if let Some(bucket) = non_blank(bucket) {
        return Some(bucket.replacen(receiving_prefix, "", 1));
    }
    non_blank(institution).map(str::to_string)
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|inner| !inner.is_empty())
}

/// Splits an iterator into order-preserving batches of at most `size`
/// items. Iteration ends at the first empty batch.
#[derive(Debug)]
pub struct Batches<I> {
    inner: I,
    size: usize,
    done: bool,
}

pub fn batches<I>(items: I, size: usize) -> Batches<I::IntoIter>
where
    I: IntoIterator,
{
    Batches { inner: items.into_iter(), size: size.max(1), done: false }
}

impl<I> Iterator for Batches<I>
where
    I: Iterator,
{
    type Item = Vec<I::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let batch = self.inner.by_ref().take(self.size).collect::<Vec<_>>();
        if batch.is_empty() {
            self.done = true;
            return None;
        }
        Some(batch)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct InstitutionRecord {
    pub old_id: String,
    pub name: String,
    pub brief_name: Option<String>,
    pub identifier: String,
    pub dpn_uuid: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ResolvedInstitution {
    pub old_id: String,
    pub identifier: String,
    pub new_id: NewId,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct UserRecord {
    pub name: Option<String>,
    pub email: String,
    pub phone_number: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub encrypted_password: Option<String>,
    pub reset_password_token: Option<String>,
    pub remember_created_at: Option<String>,
    pub sign_in_count: Option<i64>,
    pub current_sign_in_at: Option<String>,
    pub last_sign_in_at: Option<String>,
    pub current_sign_in_ip: Option<String>,
    pub last_sign_in_ip: Option<String>,
    pub institution_old_id: Option<String>,
    pub encrypted_api_secret_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ParentRecord {
    pub old_id: String,
    pub identifier: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub alt_identifier: Option<String>,
    pub access: String,
    pub bag_name: Option<String>,
    pub institution_old_id: String,
    pub state: Option<String>,
}

/// Fields derived from auxiliary event and work-item rows. Each one is
/// independently optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct ObjectEnrichment {
    pub created_at: Option<String>,
    pub etag: Option<String>,
    pub dpn_uuid: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChildRecord {
    pub old_id: String,
    pub identifier: String,
    pub file_format: Option<String>,
    pub uri: Option<String>,
    pub size: Option<i64>,
    pub object_old_id: String,
    pub state: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ChecksumRecord {
    pub algorithm: String,
    pub datetime: Option<String>,
    pub digest: String,
    pub file_old_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct EventRecord {
    pub identifier: String,
    pub event_type: String,
    pub date_time: Option<String>,
    pub detail: Option<String>,
    pub outcome: Option<String>,
    pub outcome_detail: Option<String>,
    pub outcome_information: Option<String>,
    pub object: Option<String>,
    pub agent: Option<String>,
    pub object_old_id: Option<String>,
    pub file_old_id: Option<String>,
    pub institution_old_id: Option<String>,
    pub file_identifier: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct WorkItemRecord {
    pub old_id: i64,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub name: Option<String>,
    pub etag: Option<String>,
    pub bucket: Option<String>,
    pub user: Option<String>,
    pub institution: Option<String>,
    pub note: Option<String>,
    pub action: Option<String>,
    pub stage: Option<String>,
    pub status: Option<String>,
    pub outcome: Option<String>,
    pub bag_date: Option<String>,
    pub date: Option<String>,
    pub retry: Option<bool>,
    pub reviewed: Option<bool>,
    pub object_identifier: Option<String>,
    pub generic_file_identifier: Option<String>,
    pub state: Option<String>,
    pub node: Option<String>,
    pub pid: Option<i64>,
    pub needs_admin_review: Option<bool>,
}

impl WorkItemRecord {
    #[must_use]
    pub fn has_state(&self) -> bool {
        self.state.as_deref().is_some_and(|state| !state.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct NewInstitution {
    pub name: String,
    pub brief_name: Option<String>,
    pub identifier: String,
    pub dpn_uuid: Option<String>,
    pub state: String,
    pub created_at: String,
    pub updated_at: String,
}

impl NewInstitution {
    /// # Errors
    /// Returns [`MigrateError::Validation`] when the identifier is blank.
    pub fn from_source(record: &InstitutionRecord) -> Result<Self, MigrateError> {
        if record.identifier.trim().is_empty() {
            return Err(MigrateError::Validation(format!(
                "institution {} MUST have an identifier",
                record.old_id
            )));
        }
        Ok(Self {
            name: record.name.clone(),
            brief_name: record.brief_name.clone(),
            identifier: record.identifier.clone(),
            dpn_uuid: record.dpn_uuid.clone(),
            state: INSTITUTION_STATE_ACTIVE.to_string(),
            created_at: INSTITUTION_TIMESTAMP.to_string(),
            updated_at: INSTITUTION_TIMESTAMP.to_string(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct NewUser {
    pub name: Option<String>,
    pub email: String,
    pub phone_number: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub encrypted_password: Option<String>,
    pub reset_password_token: String,
    pub remember_created_at: Option<String>,
    pub sign_in_count: Option<i64>,
    pub current_sign_in_at: Option<String>,
    pub last_sign_in_at: Option<String>,
    pub current_sign_in_ip: Option<String>,
    pub last_sign_in_ip: Option<String>,
    pub institution_id: Option<NewId>,
    pub encrypted_api_secret_key: Option<String>,
}

impl NewUser {
    /// Build a destination user. A blank legacy reset token is replaced by
    /// `fresh_token()` since the destination column is unique.
    pub fn from_source(
        record: &UserRecord,
        institution_id: Option<NewId>,
        fresh_token: impl FnOnce() -> String,
    ) -> Self {
        let reset_password_token = match record.reset_password_token.as_deref() {
            Some(token) if !token.trim().is_empty() => token.to_string(),
            _ => fresh_token(),
        };
        Self {
            name: record.name.clone(),
            email: record.email.clone(),
            phone_number: record.phone_number.clone(),
            created_at: record.created_at.clone(),
            updated_at: record.updated_at.clone(),
            encrypted_password: record.encrypted_password.clone(),
            reset_password_token,
            remember_created_at: record.remember_created_at.clone(),
            sign_in_count: record.sign_in_count,
            current_sign_in_at: record.current_sign_in_at.clone(),
            last_sign_in_at: record.last_sign_in_at.clone(),
            current_sign_in_ip: record.current_sign_in_ip.clone(),
            last_sign_in_ip: record.last_sign_in_ip.clone(),
            institution_id,
            encrypted_api_secret_key: record.encrypted_api_secret_key.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct NewObject {
    pub identifier: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub alt_identifier: Option<String>,
    pub access: Access,
    pub bag_name: Option<String>,
    pub institution_id: Option<NewId>,
    pub state: Option<String>,
    pub etag: Option<String>,
    pub dpn_uuid: Option<String>,
    pub created_at: Option<String>,
}

impl NewObject {
    /// # Errors
    /// Returns [`MigrateError::Validation`] when the identifier is blank or
    /// the legacy access value is not one of the three known levels.
    pub fn from_source(
        record: &ParentRecord,
        institution_id: Option<NewId>,
        enrichment: ObjectEnrichment,
    ) -> Result<Self, MigrateError> {
        if record.identifier.trim().is_empty() {
            return Err(MigrateError::Validation(format!(
                "intellectual object {} MUST have an identifier",
                record.old_id
            )));
        }
        let access = Access::parse(&record.access).ok_or_else(|| {
            MigrateError::Validation(format!(
                "intellectual object {} has unknown access {:?}",
                record.identifier, record.access
            ))
        })?;
        Ok(Self {
            identifier: record.identifier.clone(),
            title: record.title.clone(),
            description: record.description.clone(),
            alt_identifier: record.alt_identifier.clone(),
            access,
            bag_name: record.bag_name.clone(),
            institution_id,
            state: record.state.clone(),
            etag: enrichment.etag,
            dpn_uuid: enrichment.dpn_uuid,
            created_at: enrichment.created_at,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewFile {
    pub file_format: Option<String>,
    pub uri: Option<String>,
    pub size: Option<i64>,
    pub identifier: String,
    pub intellectual_object_id: NewId,
    pub state: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl NewFile {
    /// The parent id is a [`NewId`], not an option: a file cannot be built
    /// until its object has been written.
    ///
    /// # Errors
    /// Returns [`MigrateError::Validation`] when the identifier is blank.
    pub fn from_source(record: &ChildRecord, object_id: NewId) -> Result<Self, MigrateError> {
        if record.identifier.trim().is_empty() {
            return Err(MigrateError::Validation(format!(
                "generic file {} MUST have an identifier",
                record.old_id
            )));
        }
        Ok(Self {
            file_format: record.file_format.clone(),
            uri: record.uri.clone(),
            size: record.size,
            identifier: record.identifier.clone(),
            intellectual_object_id: object_id,
            state: record.state.clone(),
            created_at: record.created_at.clone(),
            updated_at: record.updated_at.clone(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct NewChecksum {
    pub algorithm: String,
    pub datetime: Option<String>,
    pub digest: String,
}

impl From<&ChecksumRecord> for NewChecksum {
    fn from(record: &ChecksumRecord) -> Self {
        Self {
            algorithm: record.algorithm.clone(),
            datetime: record.datetime.clone(),
            digest: record.digest.clone(),
        }
    }
}

/// Destination ids an event points at, resolved by the caller.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct EventRefs {
    pub object_id: Option<NewId>,
    pub file_id: Option<NewId>,
    pub institution_id: Option<NewId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct NewEvent {
    pub identifier: String,
    pub event_type: String,
    pub date_time: Option<String>,
    pub detail: Option<String>,
    pub outcome: Option<String>,
    pub outcome_detail: Option<String>,
    pub outcome_information: Option<String>,
    pub object: Option<String>,
    pub agent: Option<String>,
    pub intellectual_object_id: Option<NewId>,
    pub generic_file_id: Option<NewId>,
    pub institution_id: Option<NewId>,
    pub intellectual_object_identifier: String,
    pub generic_file_identifier: Option<String>,
}

impl NewEvent {
    /// # Errors
    /// Returns [`MigrateError::UnknownEventType`] when the legacy type has no
    /// PREMIS translation.
    pub fn from_source(
        record: &EventRecord,
        refs: EventRefs,
        object_identifier: &str,
    ) -> Result<Self, MigrateError> {
        let outcome_detail = record.outcome_detail.as_deref().unwrap_or_default();
        let event_type = translate_event_type(&record.event_type, outcome_detail).ok_or_else(
            || MigrateError::UnknownEventType {
                identifier: record.identifier.clone(),
                event_type: record.event_type.clone(),
            },
        )?;
        Ok(Self {
            identifier: record.identifier.clone(),
            event_type: event_type.to_string(),
            date_time: record.date_time.clone(),
            detail: record.detail.clone(),
            outcome: capitalize_first(record.outcome.as_deref()),
            outcome_detail: record.outcome_detail.clone(),
            outcome_information: record.outcome_information.clone(),
            object: record.object.clone(),
            agent: record.agent.clone(),
            intellectual_object_id: refs.object_id,
            generic_file_id: refs.file_id,
            institution_id: refs.institution_id,
            intellectual_object_identifier: object_identifier.to_string(),
            generic_file_identifier: record.file_identifier.clone(),
        })
    }
}

/// One generic file plus the dependents that are written with it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileBundle {
    pub old_id: String,
    pub file: NewFile,
    pub checksums: Vec<NewChecksum>,
    pub events: Vec<NewEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct NewWorkItem {
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub intellectual_object_id: Option<NewId>,
    pub generic_file_id: Option<NewId>,
    pub name: Option<String>,
    pub etag: Option<String>,
    pub bucket: Option<String>,
    pub user: Option<String>,
    pub note: Option<String>,
    pub action: Option<String>,
    pub stage: Option<String>,
    pub status: Option<String>,
    pub outcome: Option<String>,
    pub bag_date: Option<String>,
    pub date: Option<String>,
    pub retry: Option<bool>,
    pub object_identifier: Option<String>,
    pub generic_file_identifier: Option<String>,
    pub node: Option<String>,
    pub pid: Option<i64>,
    pub needs_admin_review: Option<bool>,
    pub institution_id: Option<NewId>,
    pub queued_at: Option<String>,
    pub size: Option<i64>,
    pub stage_started_at: Option<String>,
}

/// Destination ids a work item points at, resolved by name.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct WorkItemRefs {
    pub object_id: Option<NewId>,
    pub file_id: Option<NewId>,
    pub institution_id: Option<NewId>,
}

impl NewWorkItem {
    #[must_use]
    pub fn from_source(record: &WorkItemRecord, refs: WorkItemRefs) -> Self {
        Self {
            created_at: record.created_at.clone(),
            updated_at: record.updated_at.clone(),
            intellectual_object_id: refs.object_id,
            generic_file_id: refs.file_id,
            name: record.name.clone(),
            etag: record.etag.clone(),
            bucket: record.bucket.clone(),
            user: record.user.clone(),
            note: record.note.clone(),
            action: record.action.clone(),
            stage: record.stage.clone(),
            status: capitalize_first(record.status.as_deref()),
            outcome: capitalize_first(record.outcome.as_deref()),
            bag_date: record.bag_date.clone(),
            date: record.date.clone(),
            retry: record.retry,
            object_identifier: record.object_identifier.clone(),
            generic_file_identifier: record.generic_file_identifier.clone(),
            node: record.node.clone(),
            pid: record.pid,
            needs_admin_review: record.needs_admin_review,
            institution_id: refs.institution_id,
            queued_at: record.updated_at.clone(),
            size: None,
            stage_started_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct NewWorkItemState {
    pub work_item_id: NewId,
    pub action: Option<String>,
    pub state: String,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl NewWorkItemState {
    /// Returns `None` when the legacy item carried no state.
    #[must_use]
    pub fn from_source(record: &WorkItemRecord, work_item_id: NewId) -> Option<Self> {
        if !record.has_state() {
            return None;
        }
        let state = record.state.clone()?;
        Some(Self {
            work_item_id,
            action: record.action.clone(),
            state,
            created_at: record.created_at.clone(),
            updated_at: record.updated_at.clone(),
        })
    }
}

/// A store that migrated records are written into.
///
/// Every method is a blocking write; any error is fatal for the run.
pub trait Destination {
    fn name(&self) -> &'static str;

    /// Create or look up every institution and report the ones that exist
    /// in the destination afterwards.
    ///
    /// # Errors
    /// Returns an error when the destination cannot list or create institutions.
    fn resolve_institutions(
        &mut self,
        institutions: &[InstitutionRecord],
    ) -> anyhow::Result<Vec<ResolvedInstitution>>;

    /// # Errors
    /// Returns an error when any user write fails.
    fn create_users(&mut self, users: &[NewUser]) -> anyhow::Result<usize>;

    /// `institution` is the owning institution's identifier (`test.edu`).
    ///
    /// # Errors
    /// Returns an error when the object write fails.
    fn create_object(&mut self, institution: &str, object: &NewObject) -> anyhow::Result<NewId>;

    /// Write one batch of files with their checksums and events and return
    /// the new file ids in the order of `files`.
    ///
    /// # Errors
    /// Returns an error when any write in the batch fails.
    fn create_files(&mut self, object_id: NewId, files: &[FileBundle])
        -> anyhow::Result<Vec<NewId>>;

    /// # Errors
    /// Returns an error when any event write fails.
    fn create_events(&mut self, events: &[NewEvent]) -> anyhow::Result<usize>;

    /// # Errors
    /// Returns an error when the work item write fails.
    fn create_work_item(&mut self, item: &NewWorkItem) -> anyhow::Result<NewId>;

    /// # Errors
    /// Returns an error when the state write fails.
    fn create_work_item_state(&mut self, state: &NewWorkItemState) -> anyhow::Result<NewId>;
}
