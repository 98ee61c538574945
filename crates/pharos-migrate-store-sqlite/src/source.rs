use std::path::Path;

use anyhow::{Context, Result};
use pharos_migrate_core::{
    archival_uuid, ChecksumRecord, ChildRecord, EventRecord, InstitutionRecord, ObjectEnrichment,
    ParentRecord, UserRecord, WorkItemRecord, ARCHIVAL_MARKER_PREFIX,
};
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OptionalExtension, Row};

/// Tables of the legacy export database. Everything but `users` and
/// `processed_items` can be rebuilt from Solr dumps.
const SOURCE_SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS institutions (
  id TEXT PRIMARY KEY,
  name TEXT,
  brief_name TEXT,
  identifier TEXT,
  dpn_uuid TEXT
);

CREATE TABLE IF NOT EXISTS users (
  name TEXT,
  email TEXT,
  phone_number TEXT,
  created_at TEXT,
  updated_at TEXT,
  encrypted_password TEXT,
  reset_password_token TEXT,
  remember_created_at TEXT,
  sign_in_count INTEGER,
  current_sign_in_at TEXT,
  last_sign_in_at TEXT,
  current_sign_in_ip TEXT,
  last_sign_in_ip TEXT,
  institution_pid TEXT,
  encrypted_api_secret_key TEXT
);

CREATE TABLE IF NOT EXISTS intellectual_objects (
  id TEXT PRIMARY KEY,
  identifier TEXT,
  title TEXT,
  description TEXT,
  alt_identifier TEXT,
  access TEXT,
  bag_name TEXT,
  institution_id TEXT,
  state TEXT
);

CREATE TABLE IF NOT EXISTS generic_files (
  id TEXT PRIMARY KEY,
  file_format TEXT,
  uri TEXT,
  size REAL,
  intellectual_object_id TEXT,
  identifier TEXT,
  state TEXT,
  created_at TEXT,
  updated_at TEXT
);

CREATE TABLE IF NOT EXISTS checksums (
  algorithm TEXT,
  datetime TEXT,
  digest TEXT,
  generic_file_id TEXT
);

CREATE TABLE IF NOT EXISTS premis_events_solr (
  intellectual_object_id TEXT,
  generic_file_id TEXT,
  institution_id TEXT,
  generic_file_identifier TEXT,
  identifier TEXT,
  event_type TEXT,
  date_time TEXT,
  detail TEXT,
  outcome TEXT,
  outcome_detail TEXT,
  outcome_information TEXT,
  object TEXT,
  agent TEXT,
  timestamp TEXT,
  generic_file_uri TEXT
);

CREATE TABLE IF NOT EXISTS processed_items (
  id INTEGER PRIMARY KEY,
  created_at TEXT,
  updated_at TEXT,
  name TEXT,
  etag TEXT,
  bucket TEXT,
  user TEXT,
  institution TEXT,
  note TEXT,
  action TEXT,
  stage TEXT,
  status TEXT,
  outcome TEXT,
  bag_date TEXT,
  date TEXT,
  retry BOOLEAN,
  reviewed BOOLEAN,
  object_identifier TEXT,
  generic_file_identifier TEXT,
  state TEXT,
  node TEXT,
  pid INTEGER,
  needs_admin_review BOOLEAN
);
";

const SOURCE_INDEXES_SQL: &str = r"
CREATE INDEX IF NOT EXISTS ix_gf_obj_id ON generic_files(intellectual_object_id);
CREATE INDEX IF NOT EXISTS ix_cs_gf_id ON checksums(generic_file_id);
CREATE INDEX IF NOT EXISTS ix_items_obj_identifier ON processed_items(object_identifier);
CREATE INDEX IF NOT EXISTS ix_event_obj_id ON premis_events_solr(intellectual_object_id);
CREATE INDEX IF NOT EXISTS ix_event_gf_id ON premis_events_solr(generic_file_id);
";

const EVENT_COLUMNS: &str = "identifier, event_type, date_time, detail, outcome, outcome_detail,
    outcome_information, object, agent, intellectual_object_id, generic_file_id,
    institution_id, generic_file_identifier";

/// Read side of the migration: the `SQLite` export of the old Fedora/Solr
/// repository. Queries go through the connection's statement cache, so
/// callers can issue them per record without holding prepared statements.
pub struct SourceStore {
    pub(crate) conn: Connection,
}

impl SourceStore {
    /// Open the export database.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open source database at {}", path.display()))?;
        conn.set_prepared_statement_cache_capacity(32);
        Ok(Self { conn })
    }

    /// Create the export tables if they are missing. Used by the dump loaders
    /// and by fixtures; a real export already has them.
    ///
    /// # Errors
    /// Returns an error when the DDL fails.
    pub fn ensure_schema(&self) -> Result<()> {
        self.conn.execute_batch(SOURCE_SCHEMA_SQL).context("failed to create source tables")
    }

    /// Add the lookup indexes the per-object queries depend on.
    ///
    /// # Errors
    /// Returns an error when an index cannot be created.
    pub fn create_indexes(&self) -> Result<()> {
        self.conn.execute_batch(SOURCE_INDEXES_SQL).context("failed to create source indexes")
    }

    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// # Errors
    /// Returns an error when the table cannot be counted.
    pub fn count(&self, table_name: &str) -> Result<i64> {
        crate::count_rows(&self.conn, table_name)
    }

    /// # Errors
    /// Returns an error when institution rows cannot be read.
    pub fn institutions(&self) -> Result<Vec<InstitutionRecord>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, name, brief_name, identifier, dpn_uuid FROM institutions ORDER BY rowid",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(InstitutionRecord {
                old_id: pid(row, 0)?,
                name: text(row, 1)?.unwrap_or_default(),
                brief_name: text(row, 2)?,
                identifier: text(row, 3)?.unwrap_or_default(),
                dpn_uuid: text(row, 4)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().context("failed to read institutions")
    }

    /// # Errors
    /// Returns an error when user rows cannot be read.
    pub fn users(&self) -> Result<Vec<UserRecord>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT name, email, phone_number, created_at, updated_at, encrypted_password,
                    reset_password_token, remember_created_at, sign_in_count,
                    current_sign_in_at, last_sign_in_at, current_sign_in_ip,
                    last_sign_in_ip, institution_pid, encrypted_api_secret_key
             FROM users ORDER BY rowid",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(UserRecord {
                name: text(row, 0)?,
                email: text(row, 1)?.unwrap_or_default(),
                phone_number: text(row, 2)?,
                created_at: text(row, 3)?,
                updated_at: text(row, 4)?,
                encrypted_password: text(row, 5)?,
                reset_password_token: text(row, 6)?,
                remember_created_at: text(row, 7)?,
                sign_in_count: integer(row, 8)?,
                current_sign_in_at: text(row, 9)?,
                last_sign_in_at: text(row, 10)?,
                current_sign_in_ip: text(row, 11)?,
                last_sign_in_ip: text(row, 12)?,
                institution_old_id: text(row, 13)?.map(|value| value.trim().to_string()),
                encrypted_api_secret_key: text(row, 14)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().context("failed to read users")
    }

    /// Read one page of intellectual objects in export order.
    ///
    /// # Errors
    /// Returns an error when object rows cannot be read.
    pub fn objects(&self, limit: u64, offset: u64) -> Result<Vec<ParentRecord>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, identifier, title, description, alt_identifier, access, bag_name,
                    institution_id, state
             FROM intellectual_objects ORDER BY rowid LIMIT ?1 OFFSET ?2",
        )?;
        let rows = stmt.query_map(params![as_sql_count(limit), as_sql_count(offset)], |row| {
            Ok(ParentRecord {
                old_id: pid(row, 0)?,
                identifier: text(row, 1)?.unwrap_or_default(),
                title: text(row, 2)?,
                description: text(row, 3)?,
                alt_identifier: text(row, 4)?,
                access: text(row, 5)?.unwrap_or_default(),
                bag_name: text(row, 6)?,
                institution_old_id: pid(row, 7)?,
                state: text(row, 8)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().context("failed to read intellectual objects")
    }

    /// Timestamp of the newest object-level `ingest` event.
    ///
    /// # Errors
    /// Returns an error when the lookup query fails.
    pub fn object_created_at(&self, object_pid: &str) -> Result<Option<String>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT date_time FROM premis_events_solr
             WHERE intellectual_object_id = ?1 AND event_type = 'ingest'
               AND COALESCE(generic_file_identifier, '') = ''
             ORDER BY date_time DESC LIMIT 1",
        )?;
        let value = stmt.query_row(params![object_pid], |row| text(row, 0)).optional()?;
        Ok(value.flatten())
    }

    /// Etag of the newest successful `Ingest` work item for an object.
    ///
    /// # Errors
    /// Returns an error when the lookup query fails.
    pub fn object_etag(&self, object_identifier: &str) -> Result<Option<String>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT etag FROM processed_items
             WHERE object_identifier = ?1 AND action = 'Ingest' AND status = 'Success'
             ORDER BY updated_at DESC LIMIT 1",
        )?;
        let value = stmt.query_row(params![object_identifier], |row| text(row, 0)).optional()?;
        Ok(value.flatten())
    }

    /// DPN UUID taken from the newest DPN deposit event, if any.
    ///
    /// # Errors
    /// Returns an error when the lookup query fails.
    pub fn object_dpn_uuid(&self, object_pid: &str) -> Result<Option<String>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT outcome_information FROM premis_events_solr
             WHERE intellectual_object_id = ?1 AND outcome_information LIKE ?2
             ORDER BY date_time DESC LIMIT 1",
        )?;
        let marker = format!("{ARCHIVAL_MARKER_PREFIX}%");
        let value = stmt.query_row(params![object_pid, marker], |row| text(row, 0)).optional()?;
        Ok(value.flatten().as_deref().and_then(archival_uuid))
    }

    /// # Errors
    /// Returns an error when any of the three lookups fails.
    pub fn object_enrichment(&self, object: &ParentRecord) -> Result<ObjectEnrichment> {
        Ok(ObjectEnrichment {
            created_at: self.object_created_at(&object.old_id)?,
            etag: self.object_etag(&object.identifier)?,
            dpn_uuid: self.object_dpn_uuid(&object.old_id)?,
        })
    }

    /// # Errors
    /// Returns an error when file rows cannot be read.
    pub fn files_for_object(&self, object_pid: &str) -> Result<Vec<ChildRecord>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, file_format, uri, size, intellectual_object_id, identifier, state,
                    created_at, updated_at
             FROM generic_files WHERE intellectual_object_id = ?1 ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![object_pid], |row| {
            Ok(ChildRecord {
                old_id: pid(row, 0)?,
                file_format: text(row, 1)?,
                uri: text(row, 2)?,
                size: integer(row, 3)?,
                object_old_id: pid(row, 4)?,
                identifier: text(row, 5)?.unwrap_or_default(),
                state: text(row, 6)?,
                created_at: text(row, 7)?,
                updated_at: text(row, 8)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("failed to read generic files of {object_pid}"))
    }

    /// # Errors
    /// Returns an error when checksum rows cannot be read.
    pub fn checksums_for_file(&self, file_pid: &str) -> Result<Vec<ChecksumRecord>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT algorithm, datetime, digest, generic_file_id
             FROM checksums WHERE generic_file_id = ?1 ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![file_pid], |row| {
            Ok(ChecksumRecord {
                algorithm: text(row, 0)?.unwrap_or_default(),
                datetime: text(row, 1)?,
                digest: text(row, 2)?.unwrap_or_default(),
                file_old_id: pid(row, 3)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("failed to read checksums of {file_pid}"))
    }

    /// # Errors
    /// Returns an error when event rows cannot be read.
    pub fn events_for_file(&self, file_pid: &str) -> Result<Vec<EventRecord>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {EVENT_COLUMNS} FROM premis_events_solr
             WHERE generic_file_id = ?1 ORDER BY rowid"
        ))?;
        let rows = stmt.query_map(params![file_pid], event_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("failed to read events of generic file {file_pid}"))
    }

    /// Events attached to the object itself. The export stores "no file" as
    /// either NULL or `''` depending on which tool wrote the row.
    ///
    /// # Errors
    /// Returns an error when event rows cannot be read.
    pub fn object_level_events(&self, object_pid: &str) -> Result<Vec<EventRecord>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {EVENT_COLUMNS} FROM premis_events_solr
             WHERE intellectual_object_id = ?1 AND COALESCE(generic_file_id, '') = ''
             ORDER BY rowid"
        ))?;
        let rows = stmt.query_map(params![object_pid], event_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("failed to read events of intellectual object {object_pid}"))
    }

    /// Read one page of processed items in id order.
    ///
    /// # Errors
    /// Returns an error when processed item rows cannot be read.
    pub fn work_items(&self, limit: u64, offset: u64) -> Result<Vec<WorkItemRecord>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, created_at, updated_at, name, etag, bucket, user, institution, note,
                    action, stage, status, outcome, bag_date, date, retry, reviewed,
                    object_identifier, generic_file_identifier, state, node, pid,
                    needs_admin_review
             FROM processed_items ORDER BY id LIMIT ?1 OFFSET ?2",
        )?;
        let rows = stmt.query_map(params![as_sql_count(limit), as_sql_count(offset)], |row| {
            Ok(WorkItemRecord {
                old_id: row.get(0)?,
                created_at: text(row, 1)?,
                updated_at: text(row, 2)?,
                name: text(row, 3)?,
                etag: text(row, 4)?,
                bucket: text(row, 5)?,
                user: text(row, 6)?,
                institution: text(row, 7)?,
                note: text(row, 8)?,
                action: text(row, 9)?,
                stage: text(row, 10)?,
                status: text(row, 11)?,
                outcome: text(row, 12)?,
                bag_date: text(row, 13)?,
                date: text(row, 14)?,
                retry: flag(row, 15)?,
                reviewed: flag(row, 16)?,
                object_identifier: text(row, 17)?,
                generic_file_identifier: text(row, 18)?,
                state: text(row, 19)?,
                node: text(row, 20)?,
                pid: integer(row, 21)?,
                needs_admin_review: flag(row, 22)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().context("failed to read processed items")
    }
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<EventRecord> {
    Ok(EventRecord {
        identifier: text(row, 0)?.unwrap_or_default(),
        event_type: text(row, 1)?.unwrap_or_default(),
        date_time: text(row, 2)?,
        detail: text(row, 3)?,
        outcome: text(row, 4)?,
        outcome_detail: text(row, 5)?,
        outcome_information: text(row, 6)?,
        object: text(row, 7)?,
        agent: text(row, 8)?,
        object_old_id: text(row, 9)?.map(|value| value.trim().to_string()),
        file_old_id: text(row, 10)?.map(|value| value.trim().to_string()),
        institution_old_id: text(row, 11)?.map(|value| value.trim().to_string()),
        file_identifier: text(row, 12)?,
    })
}

fn as_sql_count(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Fedora pids were exported with stray whitespace on some rows.
fn pid(row: &Row<'_>, index: usize) -> rusqlite::Result<String> {
    Ok(text(row, index)?.map(|value| value.trim().to_string()).unwrap_or_default())
}

// The export was written by several tools, so declared column types are
// not reliable: a TEXT column may hold integers and vice versa.
fn text(row: &Row<'_>, index: usize) -> rusqlite::Result<Option<String>> {
    Ok(match row.get_ref(index)? {
        ValueRef::Null => None,
        ValueRef::Integer(value) => Some(value.to_string()),
        ValueRef::Real(value) => Some(value.to_string()),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Some(String::from_utf8_lossy(bytes).into_owned())
        }
    })
}

#[allow(clippy::cast_possible_truncation)]
fn integer(row: &Row<'_>, index: usize) -> rusqlite::Result<Option<i64>> {
    Ok(match row.get_ref(index)? {
        ValueRef::Integer(value) => Some(value),
        ValueRef::Real(value) => Some(value.round() as i64),
        ValueRef::Text(bytes) => {
            let raw = String::from_utf8_lossy(bytes);
            let raw = raw.trim();
            raw.parse::<i64>().ok().or_else(|| raw.parse::<f64>().ok().map(|v| v.round() as i64))
        }
        ValueRef::Null | ValueRef::Blob(_) => None,
    })
}

fn flag(row: &Row<'_>, index: usize) -> rusqlite::Result<Option<bool>> {
    Ok(match row.get_ref(index)? {
        ValueRef::Integer(value) => Some(value != 0),
        ValueRef::Real(value) => Some(value != 0.0),
        ValueRef::Text(bytes) => match String::from_utf8_lossy(bytes).trim() {
            "t" | "true" | "TRUE" | "1" => Some(true),
            "f" | "false" | "FALSE" | "0" => Some(false),
            _ => None,
        },
        ValueRef::Null | ValueRef::Blob(_) => None,
    })
}
