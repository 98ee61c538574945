//! `SQLite` plumbing for the Fedora to Pharos migration: the legacy export
//! database we read from, the Pharos database we can write into directly,
//! and the loader that fills the export database from Solr dumps.

mod dump;
mod sink;
mod source;

pub use dump::{DocumentScanner, DumpKind, LoadSummary, ScannedRecord, DUMP_BATCH_SIZE};
pub use sink::SqliteSink;
pub use source::SourceStore;

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use time::OffsetDateTime;

fn table_exists(conn: &Connection, table_name: &str) -> Result<bool> {
    let exists = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            params![table_name],
            |row| row.get::<_, i64>(0),
        )
        .with_context(|| format!("failed to check if table exists: {table_name}"))?;
    Ok(exists == 1)
}

fn count_rows(conn: &Connection, table_name: &str) -> Result<i64> {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table_name}"), [], |row| row.get(0))
        .with_context(|| format!("failed to count rows in {table_name}"))
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}
