use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use pharos_migrate_core::DEFAULT_RECEIVING_PREFIX;
use pharos_migrate_pipeline::{MigrateConfig, Migrator, ReferencePolicy, API_FILE_BATCH_SIZE};
use pharos_migrate_rest::{
    RestConfig, RestSink, SolrExporter, UreqTransport, DEFAULT_API_USER, DEFAULT_BASE_URL,
    DEFAULT_SOLR_ROWS, DEFAULT_TIMEOUT,
};
use pharos_migrate_store_sqlite::{SourceStore, SqliteSink};
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "pharos-migrate")]
#[command(about = "Move a Fedora/Solr export into Pharos")]
struct Cli {
    /// `SQLite` export of the old repository.
    #[arg(long, global = true, default_value = "./fedora_export.db")]
    source: PathBuf,

    /// Append-only diagnostic log.
    #[arg(long, global = true, default_value = "import.log")]
    log_file: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Write straight into a Pharos `SQLite` database.
    Sql(SqlArgs),
    /// Write through the Pharos REST API.
    Api(ApiArgs),
    /// Fill the source database from Solr `wt=json` dump files.
    LoadDump(LoadDumpArgs),
    /// Fill the source database by paging a live Solr core.
    ExportSolr(ExportSolrArgs),
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Import at most this many objects, and at most this many work items.
    #[arg(long)]
    limit: Option<u64>,

    #[arg(long, default_value_t = 0)]
    offset: u64,

    #[arg(long, value_enum, default_value_t = PolicyArg::Strict)]
    reference_policy: PolicyArg,

    #[arg(long, default_value = DEFAULT_RECEIVING_PREFIX)]
    receiving_bucket_prefix: String,
}

#[derive(Debug, Args)]
struct SqlArgs {
    dest_db: PathBuf,

    /// Copy this empty Pharos database to DEST_DB before importing.
    #[arg(long)]
    template: Option<PathBuf>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Debug, Args)]
struct ApiArgs {
    #[arg(env = "PHAROS_API_KEY", hide_env_values = true)]
    api_key: String,

    #[arg(long, env = "PHAROS_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    #[arg(long, default_value = DEFAULT_API_USER)]
    api_user: String,

    /// Per-request HTTP timeout.
    #[arg(long, default_value_t = DEFAULT_TIMEOUT.as_secs())]
    timeout_secs: u64,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Debug, Args)]
struct LoadDumpArgs {
    /// Directory holding objects.json, files.json and events.json.
    data_dir: PathBuf,
}

#[derive(Debug, Args)]
struct ExportSolrArgs {
    /// Select handler of the Solr core, e.g. http://localhost:8080/solr/production/select
    solr_url: String,

    #[arg(long, default_value_t = DEFAULT_SOLR_ROWS)]
    rows: usize,

    /// Per-request HTTP timeout.
    #[arg(long, default_value_t = DEFAULT_TIMEOUT.as_secs())]
    timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PolicyArg {
    Strict,
    Lenient,
}

impl From<PolicyArg> for ReferencePolicy {
    fn from(value: PolicyArg) -> Self {
        match value {
            PolicyArg::Strict => Self::Strict,
            PolicyArg::Lenient => Self::Lenient,
        }
    }
}

impl RunArgs {
    fn config(&self, file_batch_size: Option<usize>) -> MigrateConfig {
        MigrateConfig {
            limit: self.limit,
            offset: self.offset,
            file_batch_size,
            reference_policy: self.reference_policy.into(),
            receiving_bucket_prefix: self.receiving_bucket_prefix.clone(),
            ..MigrateConfig::default()
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = init_tracing(&cli.log_file) {
        eprintln!("failed to initialize logging: {err:#}");
        return ExitCode::FAILURE;
    }
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %format!("{err:#}"), "migration aborted");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(log_file: &Path) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .with_context(|| format!("failed to open log file {}", log_file.display()))?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(Mutex::<File>::new(file)))
        .try_init()
        .context("failed to install tracing subscriber")
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Sql(args) => run_sql(&cli.source, &args),
        Command::Api(args) => run_api(&cli.source, &args),
        Command::LoadDump(args) => run_load_dump(&cli.source, &args),
        Command::ExportSolr(args) => run_export_solr(&cli.source, &args),
    }
}

fn emit_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn open_existing_source(path: &Path) -> Result<SourceStore> {
    ensure!(path.is_file(), "source database {} does not exist", path.display());
    SourceStore::open(path)
}

fn run_sql(source_path: &Path, args: &SqlArgs) -> Result<()> {
    let source = open_existing_source(source_path)?;
    let mut sink = match args.template.as_deref() {
        Some(template) => SqliteSink::open_from_template(template, &args.dest_db)?,
        None => SqliteSink::open(&args.dest_db)?,
    };
    info!(
        source = %source_path.display(),
        destination = %args.dest_db.display(),
        "direct-write import"
    );
    let summary = Migrator::new(&source, &mut sink, args.run.config(None)).run()?;
    emit_json(&summary)
}

fn run_api(source_path: &Path, args: &ApiArgs) -> Result<()> {
    let source = open_existing_source(source_path)?;
    let config = RestConfig {
        base_url: args.base_url.clone(),
        api_user: args.api_user.clone(),
        api_key: args.api_key.clone(),
    };
    let transport = UreqTransport::new(Duration::from_secs(args.timeout_secs));
    let mut sink = RestSink::new(transport, config);
    info!(source = %source_path.display(), base_url = %args.base_url, "api import");
    let summary =
        Migrator::new(&source, &mut sink, args.run.config(Some(API_FILE_BATCH_SIZE))).run()?;
    emit_json(&summary)
}

fn run_load_dump(source_path: &Path, args: &LoadDumpArgs) -> Result<()> {
    ensure!(args.data_dir.is_dir(), "dump directory {} does not exist", args.data_dir.display());
    let mut source = SourceStore::open(source_path)?;
    let loaded = source.load_dump_dir(&args.data_dir)?;
    emit_json(&loaded)
}

fn run_export_solr(source_path: &Path, args: &ExportSolrArgs) -> Result<()> {
    let mut source = SourceStore::open(source_path)?;
    let transport = UreqTransport::new(Duration::from_secs(args.timeout_secs));
    let exporter = SolrExporter::new(transport, args.solr_url.clone()).with_rows(args.rows);
    let exported = exporter.export_all(&mut source)?;
    emit_json(&exported)
}
