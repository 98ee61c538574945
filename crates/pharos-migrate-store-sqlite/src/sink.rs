use std::fs;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use pharos_migrate_core::{
    Destination, FileBundle, InstitutionRecord, NewChecksum, NewEvent, NewId, NewInstitution,
    NewObject, NewUser, NewWorkItem, NewWorkItemState, ResolvedInstitution,
};
use rusqlite::{params, Connection};
use tracing::{debug, info};

use crate::{count_rows, now_rfc3339, table_exists};

const LATEST_SCHEMA_VERSION: i64 = 1;

// Pharos is a Rails app and already owns `schema_migrations`, so the
// importer tracks its own bootstrap separately.
const CREATE_SCHEMA_VERSIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS import_schema_versions (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS institutions (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT NOT NULL,
  brief_name TEXT,
  identifier TEXT NOT NULL,
  dpn_uuid TEXT,
  state TEXT NOT NULL,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS users (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT,
  email TEXT NOT NULL,
  phone_number TEXT,
  created_at TEXT,
  updated_at TEXT,
  encrypted_password TEXT,
  reset_password_token TEXT UNIQUE,
  remember_created_at TEXT,
  sign_in_count INTEGER,
  current_sign_in_at TEXT,
  last_sign_in_at TEXT,
  current_sign_in_ip TEXT,
  last_sign_in_ip TEXT,
  institution_id INTEGER REFERENCES institutions(id),
  encrypted_api_secret_key TEXT
);

CREATE TABLE IF NOT EXISTS intellectual_objects (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  title TEXT,
  description TEXT,
  identifier TEXT NOT NULL,
  alt_identifier TEXT,
  access TEXT NOT NULL CHECK (access IN ('restricted', 'institution', 'consortia')),
  bag_name TEXT,
  institution_id INTEGER REFERENCES institutions(id),
  state TEXT,
  etag TEXT,
  dpn_uuid TEXT,
  created_at TEXT,
  updated_at TEXT
);

CREATE TABLE IF NOT EXISTS generic_files (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  file_format TEXT,
  uri TEXT,
  size INTEGER,
  identifier TEXT NOT NULL,
  intellectual_object_id INTEGER NOT NULL REFERENCES intellectual_objects(id),
  permissions TEXT,
  state TEXT,
  created_at TEXT,
  updated_at TEXT
);

CREATE TABLE IF NOT EXISTS checksums (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  algorithm TEXT NOT NULL,
  datetime TEXT,
  digest TEXT NOT NULL,
  generic_file_id INTEGER NOT NULL REFERENCES generic_files(id),
  created_at TEXT,
  updated_at TEXT
);

CREATE TABLE IF NOT EXISTS premis_events (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  identifier TEXT NOT NULL,
  event_type TEXT NOT NULL,
  date_time TEXT,
  outcome_detail TEXT,
  detail TEXT,
  outcome_information TEXT,
  object TEXT,
  agent TEXT,
  intellectual_object_id INTEGER REFERENCES intellectual_objects(id),
  generic_file_id INTEGER REFERENCES generic_files(id),
  institution_id INTEGER REFERENCES institutions(id),
  outcome TEXT,
  intellectual_object_identifier TEXT NOT NULL DEFAULT '',
  generic_file_identifier TEXT,
  old_uuid TEXT,
  created_at TEXT,
  updated_at TEXT
);

CREATE TABLE IF NOT EXISTS work_items (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  intellectual_object_id INTEGER REFERENCES intellectual_objects(id),
  generic_file_id INTEGER REFERENCES generic_files(id),
  name TEXT,
  etag TEXT,
  bucket TEXT,
  "user" TEXT,
  note TEXT,
  action TEXT,
  stage TEXT,
  status TEXT,
  outcome TEXT,
  bag_date TEXT,
  date TEXT,
  retry BOOLEAN,
  object_identifier TEXT,
  generic_file_identifier TEXT,
  node TEXT,
  pid INTEGER,
  needs_admin_review BOOLEAN,
  institution_id INTEGER REFERENCES institutions(id),
  queued_at TEXT,
  size INTEGER,
  stage_started_at TEXT,
  created_at TEXT,
  updated_at TEXT
);

CREATE TABLE IF NOT EXISTS work_item_states (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  work_item_id INTEGER NOT NULL REFERENCES work_items(id),
  action TEXT,
  state TEXT NOT NULL,
  created_at TEXT,
  updated_at TEXT
);
"#;

const INSERT_EVENT_SQL: &str = "INSERT INTO premis_events(
    identifier, event_type, date_time, outcome_detail, detail, outcome_information, object,
    agent, intellectual_object_id, generic_file_id, institution_id, outcome,
    intellectual_object_identifier, generic_file_identifier, old_uuid, created_at, updated_at
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, NULL, ?3, ?3)";

const INSERT_CHECKSUM_SQL: &str = "INSERT INTO checksums(
    algorithm, datetime, digest, generic_file_id, created_at, updated_at
) VALUES (?1, ?2, ?3, ?4, ?2, ?2)";

/// Direct-write destination: a Pharos `SQLite` database filled with plain
/// INSERTs. Each batch runs in its own short transaction; a failed insert
/// drops the transaction before the error propagates.
pub struct SqliteSink {
    conn: Connection,
}

impl SqliteSink {
    /// Open (or create) a destination database and bootstrap its tables.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or migrated.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).with_context(|| {
            format!("failed to open destination database at {}", path.display())
        })?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        let mut sink = Self { conn };
        sink.migrate()?;
        Ok(sink)
    }

    /// Seed `path` with a copy of an empty Pharos database, then open it.
    ///
    /// # Errors
    /// Returns an error when `path` already exists, the copy fails, or the
    /// copied database cannot be opened.
    pub fn open_from_template(template: &Path, path: &Path) -> Result<Self> {
        if path.exists() {
            bail!(
                "refusing to overwrite existing destination database {} with template {}",
                path.display(),
                template.display()
            );
        }
        fs::copy(template, path).with_context(|| {
            format!("failed to copy template {} to {}", template.display(), path.display())
        })?;
        info!(
            template = %template.display(),
            destination = %path.display(),
            "seeded destination from template"
        );
        Self::open(path)
    }

    /// # Errors
    /// Returns an error when the bootstrap DDL fails or the recorded
    /// version is newer than this build understands.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_VERSIONS_SQL)
            .context("failed to apply import_schema_versions table")?;

        let mut version = current_schema_version(&self.conn)?;
        if version == 0 {
            if table_exists(&self.conn, "intellectual_objects")? {
                debug!("destination tables already present, recording bootstrap version");
            } else {
                self.conn
                    .execute_batch(MIGRATION_001_SQL)
                    .context("failed to apply destination migration 001")?;
            }
            record_schema_version(&self.conn, 1)?;
            version = 1;
        }

        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported destination schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// # Errors
    /// Returns an error when the table cannot be counted.
    pub fn count(&self, table_name: &str) -> Result<i64> {
        count_rows(&self.conn, table_name)
    }
}

impl Destination for SqliteSink {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn resolve_institutions(
        &mut self,
        institutions: &[InstitutionRecord],
    ) -> Result<Vec<ResolvedInstitution>> {
        let tx = self.conn.transaction().context("failed to start institution transaction")?;
        let mut resolved = Vec::with_capacity(institutions.len());
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO institutions(
                    name, brief_name, identifier, dpn_uuid, state, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for record in institutions {
                let institution = NewInstitution::from_source(record)?;
                stmt.execute(params![
                    institution.name,
                    institution.brief_name,
                    institution.identifier,
                    institution.dpn_uuid,
                    institution.state,
                    institution.created_at,
                    institution.updated_at,
                ])
                .with_context(|| format!("failed to insert institution {}", record.identifier))?;
                resolved.push(ResolvedInstitution {
                    old_id: record.old_id.clone(),
                    identifier: record.identifier.clone(),
                    new_id: NewId(tx.last_insert_rowid()),
                });
            }
        }
        tx.commit().context("failed to commit institution transaction")?;
        Ok(resolved)
    }

    fn create_users(&mut self, users: &[NewUser]) -> Result<usize> {
        let tx = self.conn.transaction().context("failed to start user transaction")?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO users(
                    name, email, phone_number, created_at, updated_at, encrypted_password,
                    reset_password_token, remember_created_at, sign_in_count,
                    current_sign_in_at, last_sign_in_at, current_sign_in_ip, last_sign_in_ip,
                    institution_id, encrypted_api_secret_key
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            )?;
            for user in users {
                stmt.execute(params![
                    user.name,
                    user.email,
                    user.phone_number,
                    user.created_at,
                    user.updated_at,
                    user.encrypted_password,
                    user.reset_password_token,
                    user.remember_created_at,
                    user.sign_in_count,
                    user.current_sign_in_at,
                    user.last_sign_in_at,
                    user.current_sign_in_ip,
                    user.last_sign_in_ip,
                    raw(user.institution_id),
                    user.encrypted_api_secret_key,
                ])
                .with_context(|| format!("failed to insert user {}", user.email))?;
            }
        }
        tx.commit().context("failed to commit user transaction")?;
        Ok(users.len())
    }

    fn create_object(&mut self, institution: &str, object: &NewObject) -> Result<NewId> {
        self.conn
            .execute(
                "INSERT INTO intellectual_objects(
                    title, description, identifier, alt_identifier, access, bag_name,
                    institution_id, state, etag, dpn_uuid, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
                params![
                    object.title,
                    object.description,
                    object.identifier,
                    object.alt_identifier,
                    object.access.as_str(),
                    object.bag_name,
                    raw(object.institution_id),
                    object.state,
                    object.etag,
                    object.dpn_uuid,
                    object.created_at,
                ],
            )
            .with_context(|| {
                let identifier = &object.identifier;
                format!("failed to insert intellectual object {identifier} for {institution}")
            })?;
        Ok(NewId(self.conn.last_insert_rowid()))
    }

    fn create_files(&mut self, object_id: NewId, files: &[FileBundle]) -> Result<Vec<NewId>> {
        let tx = self.conn.transaction().context("failed to start generic file transaction")?;
        let mut ids = Vec::with_capacity(files.len());
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO generic_files(
                    file_format, uri, size, identifier, intellectual_object_id, permissions,
                    state, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6, ?7, ?8)",
            )?;
            for bundle in files {
                let file = &bundle.file;
                stmt.execute(params![
                    file.file_format,
                    file.uri,
                    file.size,
                    file.identifier,
                    object_id.0,
                    file.state,
                    file.created_at,
                    file.updated_at,
                ])
                .with_context(|| format!("failed to insert generic file {}", file.identifier))?;
                ids.push(NewId(tx.last_insert_rowid()));
            }
        }
        tx.commit().context("failed to commit generic file transaction")?;

        for (bundle, file_id) in files.iter().zip(&ids) {
            self.insert_file_events(*file_id, &bundle.events)
                .with_context(|| format!("failed to save events of {}", bundle.file.identifier))?;
            self.insert_checksums(*file_id, &bundle.checksums).with_context(|| {
                format!("failed to save checksums of {}", bundle.file.identifier)
            })?;
        }
        Ok(ids)
    }

    fn create_events(&mut self, events: &[NewEvent]) -> Result<usize> {
        let tx = self.conn.transaction().context("failed to start event transaction")?;
        for event in events {
            insert_event(&tx, event, event.generic_file_id)?;
        }
        tx.commit().context("failed to commit event transaction")?;
        Ok(events.len())
    }

    fn create_work_item(&mut self, item: &NewWorkItem) -> Result<NewId> {
        self.conn
            .execute(
                r#"INSERT INTO work_items(
                    intellectual_object_id, generic_file_id, name, etag, bucket, "user", note,
                    action, stage, status, outcome, bag_date, date, retry, object_identifier,
                    generic_file_identifier, node, pid, needs_admin_review, institution_id,
                    queued_at, size, stage_started_at, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                          ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25)"#,
                params![
                    raw(item.intellectual_object_id),
                    raw(item.generic_file_id),
                    item.name,
                    item.etag,
                    item.bucket,
                    item.user,
                    item.note,
                    item.action,
                    item.stage,
                    item.status,
                    item.outcome,
                    item.bag_date,
                    item.date,
                    item.retry,
                    item.object_identifier,
                    item.generic_file_identifier,
                    item.node,
                    item.pid,
                    item.needs_admin_review,
                    raw(item.institution_id),
                    item.queued_at,
                    item.size,
                    item.stage_started_at,
                    item.created_at,
                    item.updated_at,
                ],
            )
            .with_context(|| {
                format!("failed to insert work item {}", item.name.as_deref().unwrap_or_default())
            })?;
        Ok(NewId(self.conn.last_insert_rowid()))
    }

    fn create_work_item_state(&mut self, state: &NewWorkItemState) -> Result<NewId> {
        self.conn
            .execute(
                "INSERT INTO work_item_states(work_item_id, action, state, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    state.work_item_id.0,
                    state.action,
                    state.state,
                    state.created_at,
                    state.updated_at,
                ],
            )
            .with_context(|| {
                format!("failed to insert state of work item {}", state.work_item_id)
            })?;
        Ok(NewId(self.conn.last_insert_rowid()))
    }
}

impl SqliteSink {
    fn insert_file_events(&mut self, file_id: NewId, events: &[NewEvent]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        let tx = self.conn.transaction()?;
        for event in events {
            insert_event(&tx, event, Some(file_id))?;
        }
        tx.commit()?;
        Ok(())
    }

    fn insert_checksums(&mut self, file_id: NewId, checksums: &[NewChecksum]) -> Result<()> {
        if checksums.is_empty() {
            return Ok(());
        }
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(INSERT_CHECKSUM_SQL)?;
            for checksum in checksums {
                stmt.execute(params![
                    checksum.algorithm,
                    checksum.datetime,
                    checksum.digest,
                    file_id.0
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

fn insert_event(conn: &Connection, event: &NewEvent, file_id: Option<NewId>) -> Result<()> {
    let mut stmt = conn.prepare_cached(INSERT_EVENT_SQL)?;
    stmt.execute(params![
        event.identifier,
        event.event_type,
        event.date_time,
        event.outcome_detail,
        event.detail,
        event.outcome_information,
        event.object,
        event.agent,
        raw(event.intellectual_object_id),
        raw(file_id),
        raw(event.institution_id),
        event.outcome,
        event.intellectual_object_identifier,
        event.generic_file_identifier,
    ])
    .with_context(|| format!("failed to insert premis event {}", event.identifier))?;
    Ok(())
}

fn raw(id: Option<NewId>) -> Option<i64> {
    id.map(|id| id.0)
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COALESCE(MAX(version), 0) FROM import_schema_versions", [], |row| {
        row.get::<_, i64>(0)
    })
    .context("failed to read destination schema version")
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = now_rfc3339()?;
    conn.execute(
        "INSERT OR IGNORE INTO import_schema_versions(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record destination schema version {version}"))?;
    Ok(())
}
