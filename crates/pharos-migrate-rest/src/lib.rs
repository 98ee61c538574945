//! HTTP side of the migration: the Pharos REST destination and the Solr
//! exporter, both behind a small blocking [`Transport`] seam.

mod sink;
mod solr;
mod transport;

pub use sink::{RestConfig, RestSink, DEFAULT_API_USER, DEFAULT_BASE_URL};
pub use solr::{SolrExporter, DEFAULT_SOLR_ROWS};
pub use transport::{
    Body, HttpResponse, Method, Request, Transport, UreqTransport, DEFAULT_TIMEOUT,
};
