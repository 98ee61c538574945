use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use pharos_migrate_core::{Access, MigrateError};
use rusqlite::types::Value as SqlValue;
use rusqlite::params_from_iter;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::source::SourceStore;

/// Documents committed per transaction while loading a dump.
pub const DUMP_BATCH_SIZE: usize = 1000;

const RESPONSE_MARKER: &str = "\"response\":";

const INSERT_OBJECT_SQL: &str = "INSERT INTO intellectual_objects(
    id, identifier, title, description, alt_identifier, access, bag_name, institution_id, state
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)";

const INSERT_FILE_SQL: &str = "INSERT INTO generic_files(
    id, file_format, uri, size, intellectual_object_id, identifier, state, created_at, updated_at
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)";

const INSERT_EVENT_SQL: &str = "INSERT INTO premis_events_solr(
    intellectual_object_id, generic_file_id, institution_id, generic_file_identifier,
    identifier, event_type, date_time, detail, outcome, outcome_detail, outcome_information,
    object, agent, timestamp, generic_file_uri
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)";

const EVENT_FIELDS: [&str; 15] = [
    "intellectual_object_id_ssim",
    "generic_file_id_ssim",
    "institution_id_ssim",
    "generic_file_identifier_ssim",
    "event_identifier_ssim",
    "event_type_ssim",
    "event_date_time_ssim",
    "event_detail_ssim",
    "event_outcome_ssim",
    "event_outcome_detail_ssim",
    "event_outcome_information_ssim",
    "event_object_ssim",
    "event_agent_ssim",
    "timestamp",
    "generic_file_uri_ssim",
];

/// The three kinds of Solr document the legacy repository indexed.
#[derive(Debug, Clone, Copy, Serialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum DumpKind {
    Objects,
    Files,
    Events,
}

impl DumpKind {
    pub const ALL: [Self; 3] = [Self::Objects, Self::Files, Self::Events];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Objects => "objects",
            Self::Files => "files",
            Self::Events => "events",
        }
    }

    #[must_use]
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Objects => "objects.json",
            Self::Files => "files.json",
            Self::Events => "events.json",
        }
    }

    /// URL-encoded Solr `q` parameter selecting this kind.
    #[must_use]
    pub fn solr_query(self) -> &'static str {
        match self {
            Self::Objects => "active_fedora_model_ssi%3A%22IntellectualObject%22",
            Self::Files => "active_fedora_model_ssi%3A%22GenericFile%22",
            Self::Events => "event_type_ssim%3A*",
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ScannedRecord {
    Document(Value),
    Malformed { line: usize, text: String },
}

/// Streams documents out of an indented Solr `wt=json` response without
/// reading the whole file. Each document is assumed to close on a line
/// ending in `},` or `}]`, which is how Solr indents its output.
pub struct DocumentScanner<R> {
    lines: Lines<R>,
    line_number: usize,
    found_response: bool,
    pending: String,
    finished: bool,
}

impl<R: BufRead> DocumentScanner<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_number: 0,
            found_response: false,
            pending: String::new(),
            finished: false,
        }
    }

    fn classify(&self, text: String) -> Option<ScannedRecord> {
        match serde_json::from_str::<Value>(&text) {
            Ok(document @ Value::Object(_)) => Some(ScannedRecord::Document(document)),
            _ if is_end_marker(&text) => None,
            _ => Some(ScannedRecord::Malformed { line: self.line_number, text }),
        }
    }
}

impl<R: BufRead> Iterator for DocumentScanner<R> {
    type Item = Result<ScannedRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            let line = match self.lines.next() {
                Some(Ok(line)) => line,
                Some(Err(err)) => {
                    self.finished = true;
                    return Some(Err(anyhow!(err).context(format!(
                        "failed to read solr dump after line {}",
                        self.line_number
                    ))));
                }
                None => {
                    self.finished = true;
                    let rest = std::mem::take(&mut self.pending);
                    if rest.is_empty() {
                        return None;
                    }
                    return self.classify(rest).map(Ok);
                }
            };
            self.line_number += 1;

            let stripped = line.trim();
            if !self.found_response {
                self.found_response = stripped.starts_with(RESPONSE_MARKER);
                continue;
            }
            // A bare `},` closes the `response` object itself.
            if stripped == "}," && self.pending.is_empty() {
                self.finished = true;
                return None;
            }

            self.pending.push_str(stripped);
            if stripped.ends_with("},") || stripped.ends_with("}]") {
                let mut text = std::mem::take(&mut self.pending);
                text.pop();
                if let Some(record) = self.classify(text) {
                    return Some(Ok(record));
                }
            }
        }
        None
    }
}

fn is_end_marker(text: &str) -> bool {
    text.contains("facet_") || text.trim_matches(|c: char| matches!(c, '}' | ']' | ',')).is_empty()
}

#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
pub struct LoadSummary {
    pub kind: DumpKind,
    pub inserted: usize,
    pub skipped_malformed: usize,
}

impl SourceStore {
    /// Insert one batch of Solr documents of `kind` in a single transaction.
    ///
    /// # Errors
    /// Returns an error when a document lacks its parent reference, has an
    /// unsupported number of read groups, or an insert fails.
    pub fn insert_documents(&mut self, kind: DumpKind, documents: &[Value]) -> Result<usize> {
        let tx = self.conn.transaction().context("failed to start solr load transaction")?;
        {
            let sql = match kind {
                DumpKind::Objects => INSERT_OBJECT_SQL,
                DumpKind::Files => INSERT_FILE_SQL,
                DumpKind::Events => INSERT_EVENT_SQL,
            };
            let mut stmt = tx.prepare_cached(sql)?;
            for document in documents {
                let row = match kind {
                    DumpKind::Objects => object_row(document)?,
                    DumpKind::Files => file_row(document)?,
                    DumpKind::Events => {
                        EVENT_FIELDS.iter().map(|key| solr_value(document, key)).collect()
                    }
                };
                stmt.execute(params_from_iter(row)).with_context(|| {
                    let id = document_id(document);
                    format!("failed to insert solr {} document {id}", kind.as_str())
                })?;
            }
        }
        tx.commit().context("failed to commit solr load transaction")?;
        Ok(documents.len())
    }

    /// Load one dump file into its source table.
    ///
    /// # Errors
    /// Returns an error when the file cannot be read or a batch cannot be
    /// inserted. Undecodable documents are logged and skipped.
    pub fn load_dump_file(&mut self, kind: DumpKind, path: &Path) -> Result<LoadSummary> {
        self.ensure_schema()?;
        let file = File::open(path)
            .with_context(|| format!("failed to open solr dump {}", path.display()))?;

        let mut summary = LoadSummary { kind, inserted: 0, skipped_malformed: 0 };
        let mut batch = Vec::with_capacity(DUMP_BATCH_SIZE);
        for record in DocumentScanner::new(BufReader::new(file)) {
            match record? {
                ScannedRecord::Document(document) => batch.push(document),
                ScannedRecord::Malformed { line, text } => {
                    warn!(
                        kind = kind.as_str(),
                        line,
                        record = %text,
                        "skipping undecodable solr record"
                    );
                    summary.skipped_malformed += 1;
                }
            }
            if batch.len() == DUMP_BATCH_SIZE {
                summary.inserted += self.insert_documents(kind, &batch)?;
                batch.clear();
                info!(kind = kind.as_str(), inserted = summary.inserted, "loaded solr documents");
            }
        }
        if !batch.is_empty() {
            summary.inserted += self.insert_documents(kind, &batch)?;
        }
        info!(
            kind = kind.as_str(),
            inserted = summary.inserted,
            skipped = summary.skipped_malformed,
            "finished solr dump"
        );
        Ok(summary)
    }

    /// Load `objects.json`, `files.json` and `events.json` from `data_dir`.
    ///
    /// # Errors
    /// Returns an error when any of the three dumps fails to load.
    pub fn load_dump_dir(&mut self, data_dir: &Path) -> Result<Vec<LoadSummary>> {
        DumpKind::ALL
            .iter()
            .map(|kind| self.load_dump_file(*kind, &data_dir.join(kind.file_name())))
            .collect()
    }
}

fn object_row(document: &Value) -> Result<Vec<SqlValue>> {
    let institution = parent_pid(document)?;
    let read_groups = match document.get("read_access_group_ssim") {
        Some(Value::Array(groups)) => groups.len(),
        Some(Value::Null) | None => 0,
        Some(_) => 1,
    };
    let access = Access::from_read_group_count(read_groups).ok_or_else(|| {
        MigrateError::Validation(format!(
            "object {} has {read_groups} read groups",
            document_id(document)
        ))
    })?;
    Ok(vec![
        solr_value(document, "id"),
        solr_value(document, "desc_metadata__identifier_ssim"),
        solr_value(document, "desc_metadata__title_tesim"),
        solr_value(document, "desc_metadata__description_tesim"),
        solr_value(document, "desc_metadata__alt_identifier_ssim"),
        SqlValue::Text(access.as_str().to_string()),
        solr_value(document, "desc_metadata__bag_name_ssim"),
        SqlValue::Text(institution),
        solr_value(document, "object_state_ssi"),
    ])
}

fn file_row(document: &Value) -> Result<Vec<SqlValue>> {
    let object = parent_pid(document)?;
    Ok(vec![
        solr_value(document, "id"),
        solr_value(document, "tech_metadata__file_format_ssi"),
        solr_value(document, "tech_metadata__uri_ssim"),
        solr_value(document, "tech_metadata__size_lsi"),
        SqlValue::Text(object),
        solr_value(document, "tech_metadata__identifier_ssim"),
        solr_value(document, "object_state_ssi"),
        solr_value(document, "system_create_dtsi"),
        solr_value(document, "system_modified_dtsi"),
    ])
}

/// `is_part_of_ssim` holds `info:fedora/<pid>`; the pid is the second segment.
fn parent_pid(document: &Value) -> Result<String> {
    let is_part_of = scalar_text(document, "is_part_of_ssim");
    match is_part_of.split('/').nth(1) {
        Some(pid) if !pid.is_empty() => Ok(pid.to_string()),
        _ => Err(MigrateError::Validation(format!(
            "no parent for {} (is_part_of_ssim = {is_part_of:?})",
            document_id(document)
        ))
        .into()),
    }
}

fn document_id(document: &Value) -> String {
    scalar_text(document, "id")
}

fn scalar_text(document: &Value, key: &str) -> String {
    match solr_value(document, key) {
        SqlValue::Text(text) => text,
        SqlValue::Integer(value) => value.to_string(),
        SqlValue::Real(value) => value.to_string(),
        SqlValue::Null | SqlValue::Blob(_) => String::new(),
    }
}

/// Solr stores most fields as single-element arrays but occasionally as
/// bare scalars. Missing, null and empty fields all read as `''`.
fn solr_value(document: &Value, key: &str) -> SqlValue {
    let value = match document.get(key) {
        Some(Value::Array(items)) => items.first(),
        other => other,
    };
    match value {
        None | Some(Value::Null) => SqlValue::Text(String::new()),
        Some(Value::String(text)) => SqlValue::Text(text.clone()),
        Some(Value::Bool(flag)) => SqlValue::Integer(i64::from(*flag)),
        Some(Value::Number(number)) => number
            .as_i64()
            .map(SqlValue::Integer)
            .or_else(|| number.as_f64().map(SqlValue::Real))
            .unwrap_or_else(|| SqlValue::Text(number.to_string())),
        Some(other) => SqlValue::Text(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use serde_json::json;

    use super::*;

    const OBJECT_DUMP: &str = r#"{
  "responseHeader":{
    "status":0,
    "QTime":12},
  "response":{"numFound":3,"start":0,"docs":[
      {
        "id":"aptrust-test:100",
        "is_part_of_ssim":["info:fedora/aptrust-test:1"],
        "desc_metadata__identifier_ssim":["test.edu/photos"],
        "desc_metadata__title_tesim":["Photos"],
        "read_access_group_ssim":["test.edu"],
        "object_state_ssi":"A"},
      {
        "id":"aptrust-test:101",
        "is_part_of_ssim":["info:fedora/aptrust-test:1"],
        "desc_metadata__identifier_ssim":["test.edu/this is not" json],
        "object_state_ssi":"A"},
      {
        "id":"aptrust-test:102",
        "is_part_of_ssim":["info:fedora/aptrust-test:1"],
        "desc_metadata__identifier_ssim":["test.edu/audio"],
        "read_access_group_ssim":["test.edu","consortia"],
        "object_state_ssi":"D"}]
  },
  "facet_counts":{
    "facet_queries":{}}}
"#;

    const FILE_DUMP: &str = r#"{
  "response":{"numFound":1,"start":0,"docs":[
      {
        "id":"aptrust-test:200",
        "is_part_of_ssim":["info:fedora/aptrust-test:100"],
        "tech_metadata__identifier_ssim":["test.edu/photos/data/a.jpg"],
        "tech_metadata__size_lsi":2048}]
  }}
"#;

    const EVENT_DUMP: &str = r#"{
  "response":{"numFound":1,"start":0,"docs":[
      {
        "intellectual_object_id_ssim":["aptrust-test:100"],
        "event_identifier_ssim":["e-1"],
        "event_type_ssim":["ingest"]}]
  }}
"#;

    fn scan(text: &str) -> Result<Vec<ScannedRecord>> {
        DocumentScanner::new(Cursor::new(text)).collect()
    }

    fn fixture_store() -> Result<SourceStore> {
        let store = SourceStore::open(Path::new(":memory:"))?;
        store.ensure_schema()?;
        Ok(store)
    }

    #[test]
    fn scanner_yields_documents_and_flags_malformed_ones() -> Result<()> {
        let records = scan(OBJECT_DUMP)?;

        assert_eq!(records.len(), 3);
        assert!(matches!(
            &records[0],
            ScannedRecord::Document(doc) if doc["id"] == "aptrust-test:100"
        ));
        assert!(matches!(
            &records[1],
            ScannedRecord::Malformed { line: 17, text } if text.contains("aptrust-test:101")
        ));
        assert!(matches!(
            &records[2],
            ScannedRecord::Document(doc) if doc["object_state_ssi"] == "D"
        ));
        Ok(())
    }

    #[test]
    fn scanner_ignores_trailing_markers_without_facets() -> Result<()> {
        let dump = "{\n  \"response\":{\"docs\":[\n      {\n        \"id\":\"a\"}]\n  }}\n";
        let records = scan(dump)?;
        assert_eq!(records, vec![ScannedRecord::Document(json!({"id": "a"}))]);
        Ok(())
    }

    #[test]
    fn scanner_returns_nothing_before_response() -> Result<()> {
        assert!(scan("{\n  \"responseHeader\":{\n    \"status\":500},\n")?.is_empty());
        Ok(())
    }

    #[test]
    fn end_markers_are_recognized() {
        assert!(is_end_marker("}"));
        assert!(is_end_marker("}}"));
        assert!(is_end_marker("\"facet_counts\":{\"facet_queries\":{}"));
        assert!(!is_end_marker("{\"id\":"));
    }

    #[test]
    fn solr_values_unwrap_arrays_and_default_to_empty() {
        let document = json!({
            "a": ["first", "second"],
            "b": "scalar",
            "c": [],
            "d": null,
            "e": [4096],
            "f": true,
        });
        assert_eq!(solr_value(&document, "a"), SqlValue::Text("first".to_string()));
        assert_eq!(solr_value(&document, "b"), SqlValue::Text("scalar".to_string()));
        assert_eq!(solr_value(&document, "c"), SqlValue::Text(String::new()));
        assert_eq!(solr_value(&document, "d"), SqlValue::Text(String::new()));
        assert_eq!(solr_value(&document, "missing"), SqlValue::Text(String::new()));
        assert_eq!(solr_value(&document, "e"), SqlValue::Integer(4096));
        assert_eq!(solr_value(&document, "f"), SqlValue::Integer(1));
    }

    #[test]
    fn access_follows_read_group_count() -> Result<()> {
        let mut store = fixture_store()?;
        let object = |id: &str, identifier: &str| {
            json!({
                "id": id,
                "is_part_of_ssim": ["info:fedora/i:1"],
                "desc_metadata__identifier_ssim": [identifier],
            })
        };
        let mut documents =
            [object("o:1", "t.edu/a"), object("o:2", "t.edu/b"), object("o:3", "t.edu/c")];
        documents[1]["read_access_group_ssim"] = json!(["t.edu"]);
        documents[2]["read_access_group_ssim"] = json!(["t.edu", "all"]);
        store.insert_documents(DumpKind::Objects, &documents)?;

        let objects = store.objects(10, 0)?;
        let access = objects.iter().map(|object| object.access.as_str()).collect::<Vec<_>>();
        assert_eq!(access, vec!["restricted", "institution", "consortia"]);
        assert!(objects.iter().all(|object| object.institution_old_id == "i:1"));
        Ok(())
    }

    #[test]
    fn missing_parent_aborts_the_batch() -> Result<()> {
        let mut store = fixture_store()?;
        let documents = [
            json!({
                "id": "f:1",
                "is_part_of_ssim": ["info:fedora/o:1"],
                "tech_metadata__identifier_ssim": ["t.edu/a/data/x"],
            }),
            json!({"id": "f:2", "tech_metadata__identifier_ssim": ["t.edu/a/data/y"]}),
        ];
        let err = store.insert_documents(DumpKind::Files, &documents);
        assert!(err.is_err());
        assert_eq!(store.count("generic_files")?, 0);
        Ok(())
    }

    #[test]
    fn load_dump_dir_reads_all_three_kinds() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("objects.json"), OBJECT_DUMP)?;
        std::fs::write(dir.path().join("files.json"), FILE_DUMP)?;
        std::fs::write(dir.path().join("events.json"), EVENT_DUMP)?;

        let mut store = SourceStore::open(&dir.path().join("source.db"))?;
        let summaries = store.load_dump_dir(dir.path())?;

        assert_eq!(
            summaries[0],
            LoadSummary { kind: DumpKind::Objects, inserted: 2, skipped_malformed: 1 }
        );
        assert_eq!(summaries[1].inserted, 1);
        assert_eq!(summaries[2].inserted, 1);
        assert_eq!(store.files_for_object("aptrust-test:100")?[0].size, Some(2048));
        assert_eq!(store.object_level_events("aptrust-test:100")?.len(), 1);
        Ok(())
    }
}
