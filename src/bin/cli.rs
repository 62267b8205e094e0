//! Binary entry point for the aqlbridge CLI.
#![forbid(unsafe_code)]

use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use aqlbridge::{
    query::{ast::ParsedQuery, ExplainTrace, QueryOutput, QueryProcessor, Row},
    BridgeConfig, NodeId, SqliteStore,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "aqlbridge",
    version,
    about = "Run compiled archetype queries against a SQLite clinical repository",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_name = "FILE",
        env = "AQLBRIDGE_CONFIG",
        help = "Configuration file (defaults to the user config directory)"
    )]
    config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct QueryCmd {
    #[arg(value_name = "DB", help = "Repository file (defaults to [database] default)")]
    db_path: Option<PathBuf>,

    #[arg(long, value_name = "FILE", help = "Compiled query as JSON")]
    query: PathBuf,

    #[arg(long, value_name = "ID", help = "Node id used in composition uids")]
    node: Option<String>,

    #[arg(long, help = "Render statements on a single line")]
    compact: bool,
}

#[derive(Args, Debug)]
struct SeedDemoCmd {
    #[arg(value_name = "DB")]
    db_path: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Create the repository schema")]
    Init {
        #[arg(value_name = "DB")]
        db_path: PathBuf,
    },

    #[command(about = "Populate demo EHRs with blood pressure readings under two templates")]
    SeedDemo(SeedDemoCmd),

    #[command(about = "Execute a compiled query")]
    Run(QueryCmd),

    #[command(about = "Print the statements a compiled query would execute")]
    Explain(QueryCmd),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn main() {
    install_tracing_subscriber();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn install_tracing_subscriber() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("aqlbridge=info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = BridgeConfig::load(cli.config.clone())?;

    match cli.command {
        Command::Init { db_path } => {
            SqliteStore::open(&db_path)?;
            println!("Initialized repository at {}", db_path.display());
        }
        Command::SeedDemo(cmd) => {
            let store = SqliteStore::open(&cmd.db_path)?;
            let compositions = store.seed_demo()?;
            println!(
                "Demo data inserted into {} ({} compositions)",
                cmd.db_path.display(),
                compositions
            );
        }
        Command::Run(cmd) => {
            let output = run_query(&config, &cmd, false)?;
            emit(&cli.format, &output, |_| {
                if let QueryOutput::Rows(rows) = &output {
                    print_rows_text(rows);
                }
            })?;
        }
        Command::Explain(cmd) => {
            let output = run_query(&config, &cmd, true)?;
            emit(&cli.format, &output, |_| {
                if let QueryOutput::Explain(trace) = &output {
                    print_explain_text(trace);
                }
            })?;
        }
    }

    Ok(())
}

fn run_query(
    config: &BridgeConfig,
    cmd: &QueryCmd,
    explain: bool,
) -> Result<QueryOutput, Box<dyn Error>> {
    let db_path = cmd
        .db_path
        .clone()
        .or_else(|| config.database.default_path.clone())
        .ok_or("no database given and no [database] default configured")?;
    let query = read_query(&cmd.query)?;
    let node = cmd
        .node
        .as_deref()
        .map(NodeId::from)
        .unwrap_or_else(|| config.node_id());

    let mut processor_config = config.processor_config();
    if cmd.compact {
        processor_config.explain_formatted = false;
    }
    let store = SqliteStore::open(&db_path)?;
    let processor = QueryProcessor::sqlite(store).with_config(processor_config);
    let output = processor.execute_with(&query, &node, explain)?;
    match &output {
        QueryOutput::Rows(rows) => info!(rows = rows.len(), node = %node, "query executed"),
        QueryOutput::Explain(trace) => info!(statements = trace.len(), "query explained"),
    }
    Ok(output)
}

fn read_query(path: &Path) -> Result<ParsedQuery, Box<dyn Error>> {
    let raw = fs::read_to_string(path)
        .map_err(|err| format!("cannot read query {}: {err}", path.display()))?;
    let query = serde_json::from_str(&raw)
        .map_err(|err| format!("invalid query {}: {err}", path.display()))?;
    Ok(query)
}

fn emit<T, F>(format: &OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: serde::Serialize,
    F: Fn(OutputFormat),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(OutputFormat::Text),
    }
    Ok(())
}

fn print_rows_text(rows: &[Row]) {
    if rows.is_empty() {
        println!("(no rows)");
        return;
    }
    for row in rows {
        let cells: Vec<String> = row.iter().map(|(name, value)| format!("{name}={value}")).collect();
        println!("{}", cells.join("  "));
    }
    println!("({} rows)", rows.len());
}

fn print_explain_text(trace: &ExplainTrace) {
    if trace.is_empty() {
        println!("(no statements: empty containment set)");
        return;
    }
    print!("{trace}");
}
