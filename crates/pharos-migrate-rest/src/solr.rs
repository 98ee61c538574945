use anyhow::{Context, Result};
use pharos_migrate_store_sqlite::{DumpKind, LoadSummary, SourceStore};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::transport::{Body, Method, Request, Transport};

pub const DEFAULT_SOLR_ROWS: usize = 1000;

#[derive(Debug, Deserialize)]
struct SolrEnvelope {
    response: SolrDocs,
}

#[derive(Debug, Deserialize)]
struct SolrDocs {
    docs: Vec<Value>,
}

/// Pages objects, files and events straight out of a live Solr core into
/// the source database.
pub struct SolrExporter<T> {
    transport: T,
    select_url: String,
    rows: usize,
}

impl<T: Transport> SolrExporter<T> {
    /// `select_url` is the core's select handler, e.g.
    /// `http://localhost:8080/solr/production/select`.
    pub fn new(transport: T, select_url: impl Into<String>) -> Self {
        Self { transport, select_url: select_url.into(), rows: DEFAULT_SOLR_ROWS }
    }

    #[must_use]
    pub fn with_rows(mut self, rows: usize) -> Self {
        self.rows = rows.max(1);
        self
    }

    fn page_url(&self, kind: DumpKind, start: usize) -> String {
        format!(
            "{}?q={}&wt=json&start={start}&rows={}&sort=system_create_dtsi+asc",
            self.select_url,
            kind.solr_query(),
            self.rows
        )
    }

    /// # Errors
    /// Returns an error when Solr is unreachable, a page cannot be decoded,
    /// or documents cannot be inserted. A non-200 page ends that kind early.
    pub fn export_kind(&self, store: &mut SourceStore, kind: DumpKind) -> Result<LoadSummary> {
        let mut summary = LoadSummary { kind, inserted: 0, skipped_malformed: 0 };
        let mut start = 0;
        loop {
            let request = Request {
                method: Method::Get,
                url: self.page_url(kind, start),
                headers: vec![("Accept".to_string(), "application/json".to_string())],
                body: Body::Empty,
            };
            let response = self.transport.send(&request)?;
            if response.status != 200 {
                warn!(
                    kind = kind.as_str(),
                    status = response.status,
                    body = %response.body,
                    "solr returned an error; stopping this export"
                );
                break;
            }
            let page: SolrEnvelope = serde_json::from_str(&response.body)
                .with_context(|| format!("failed to decode solr page at {}", request.url))?;
            if page.response.docs.is_empty() {
                break;
            }
            summary.inserted += store.insert_documents(kind, &page.response.docs)?;
            start += self.rows;
            info!(kind = kind.as_str(), exported = summary.inserted, "exported solr page");
        }
        Ok(summary)
    }

    /// Export objects, then files, then events.
    ///
    /// # Errors
    /// Returns the first error from [`Self::export_kind`].
    pub fn export_all(&self, store: &mut SourceStore) -> Result<Vec<LoadSummary>> {
        store.ensure_schema()?;
        DumpKind::ALL.iter().map(|kind| self.export_kind(store, *kind)).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::transport::scripted::ScriptedTransport;

    fn page(docs: &str) -> String {
        let header = r#"{"responseHeader":{"status":0},"response":{"numFound":3,"docs":["#;
        format!("{header}{docs}]}}}}")
    }

    fn object_doc(id: &str, identifier: &str) -> String {
        serde_json::json!({
            "id": id,
            "is_part_of_ssim": ["info:fedora/i:1"],
            "desc_metadata__identifier_ssim": [identifier],
        })
        .to_string()
    }

    #[test]
    fn pages_until_empty_then_moves_to_next_kind() -> Result<()> {
        let first = [object_doc("o:1", "t.edu/a"), object_doc("o:2", "t.edu/b")].join(",");
        let event = serde_json::json!({
            "event_identifier_ssim": ["e-1"],
            "event_type_ssim": ["ingest"],
            "intellectual_object_id_ssim": ["o:1"],
        });
        let transport = ScriptedTransport::default()
            .respond(200, &page(&first))
            .respond(200, &page(&object_doc("o:3", "t.edu/c")))
            .respond(200, &page(""))
            .respond(503, "unavailable")
            .respond(200, &page(&event.to_string()))
            .respond(200, &page(""));
        let exporter =
            SolrExporter::new(transport, "http://solr.test/solr/core/select").with_rows(2);
        let mut store = SourceStore::open(Path::new(":memory:"))?;

        let summaries = exporter.export_all(&mut store)?;

        assert_eq!(summaries.iter().map(|s| s.inserted).collect::<Vec<_>>(), vec![3, 0, 1]);
        assert_eq!(store.count("intellectual_objects")?, 3);
        let second = exporter.transport.request(1);
        assert_eq!(
            second.url,
            concat!(
                "http://solr.test/solr/core/select",
                "?q=active_fedora_model_ssi%3A%22IntellectualObject%22",
                "&wt=json&start=2&rows=2&sort=system_create_dtsi+asc"
            )
        );
        assert!(exporter.transport.request(3).url.contains("GenericFile"));
        Ok(())
    }

    #[test]
    fn undecodable_page_is_fatal() -> Result<()> {
        let exporter = SolrExporter::new(
            ScriptedTransport::default().respond(200, "<html>"),
            "http://solr.test/select",
        );
        let mut store = SourceStore::open(Path::new(":memory:"))?;
        store.ensure_schema()?;
        assert!(exporter.export_kind(&mut store, DumpKind::Events).is_err());
        Ok(())
    }
}
