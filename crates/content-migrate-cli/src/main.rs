use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use content_migrate_core::transform::run_rules;
use content_migrate_core::{
    evaluate, import_file, FileErrorPolicy, FsFileWriter, ImportOptions, Record, RuleSet,
    TransformerRegistry,
};
use content_migrate_store_sqlite::SqliteStore;
use serde_json::{json, Value};
use tracing::info;
use tracing_subscriber::EnvFilter;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "cmig")]
#[command(about = "Content migration CLI")]
struct Cli {
    #[arg(long, default_value = "./content.sqlite3")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Import an export payload below a destination page.
    Import(ImportArgs),
    /// Apply a YAML rule file to records already in the database.
    Transform(TransformArgs),
    /// Evaluate one transformer against a record given on the command line.
    Evaluate(EvaluateArgs),
    /// List destination tables with their columns and row counts.
    Schema,
}

#[derive(Debug, Args)]
struct ImportArgs {
    #[arg(long)]
    payload: PathBuf,
    /// Destination page id the imported tree is attached to.
    #[arg(long)]
    pid: i64,
    #[arg(long = "exclude-table")]
    exclude_tables: Vec<String>,
    #[arg(long)]
    overwrite_files: bool,
    #[arg(long, default_value = ".")]
    files_root: PathBuf,
    #[arg(long)]
    continue_on_file_error: bool,
}

#[derive(Debug, Args)]
struct TransformArgs {
    #[arg(long)]
    rules: PathBuf,
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct EvaluateArgs {
    #[arg(long)]
    transformer: String,
    #[arg(long)]
    field: String,
    /// Transformer configuration as JSON.
    #[arg(long, default_value = "{}")]
    config: String,
    /// Record as a JSON object.
    #[arg(long)]
    record: String,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Command::Import(args) => {
            let mut store = SqliteStore::open(&cli.db)?;
            run_import(args, &mut store)
        }
        Command::Transform(args) => {
            let mut store = SqliteStore::open(&cli.db)?;
            run_transform(&args, &mut store)
        }
        Command::Evaluate(args) => run_evaluate(&args),
        Command::Schema => {
            let store = SqliteStore::open(&cli.db)?;
            emit_json(json!({ "tables": store.describe()? }))
        }
    }
}

fn run_import(args: ImportArgs, store: &mut SqliteStore) -> Result<()> {
    let options = ImportOptions {
        destination_pid: args.pid,
        excluded_tables: args.exclude_tables.into_iter().collect::<BTreeSet<_>>(),
        overwrite_files: args.overwrite_files,
        file_errors: if args.continue_on_file_error {
            FileErrorPolicy::Continue
        } else {
            FileErrorPolicy::Abort
        },
    };
    let mut files = FsFileWriter::new(args.files_root);

    let report = store.in_transaction(|store| {
        import_file(&args.payload, options, store, &mut files)
            .with_context(|| format!("import of {} failed", args.payload.display()))
    })?;
    info!(
        run_id = %report.run_id,
        records = report.total_records(),
        files_written = report.files_written,
        "import finished"
    );
    emit_json(serde_json::to_value(&report)?)
}

fn run_transform(args: &TransformArgs, store: &mut SqliteStore) -> Result<()> {
    let body = fs::read_to_string(&args.rules)
        .with_context(|| format!("failed to read rules file {}", args.rules.display()))?;
    let rules: RuleSet = serde_yaml::from_str(&body)
        .with_context(|| format!("failed to parse rules file {}", args.rules.display()))?;
    let registry = TransformerRegistry::with_builtin();

    let summaries = store.in_transaction(|store| {
        run_rules(&registry, &rules, store, args.dry_run).context("transform run failed")
    })?;
    emit_json(json!({
        "dry_run": args.dry_run,
        "tables": summaries,
    }))
}

fn run_evaluate(args: &EvaluateArgs) -> Result<()> {
    let config: Value =
        serde_json::from_str(&args.config).context("--config must be valid JSON")?;
    let record: Record = match serde_json::from_str::<Value>(&args.record)
        .context("--record must be valid JSON")?
    {
        Value::Object(record) => record,
        other => return Err(anyhow!("--record must be a JSON object, got {other}")),
    };

    let registry = TransformerRegistry::with_builtin();
    let evaluation = evaluate(&registry, &args.transformer, &args.field, config, &record)?;
    emit_json(serde_json::to_value(&evaluation)?)
}
