use std::collections::BTreeMap;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_kb_enricher::app::{App, EnrichReport, ResolveResult, RunReport, UpsertOptions};
use kira_kb_enricher::config::ConfigLoader;
use kira_kb_enricher::domain::{Claim, EntityId, EntityKind, Property};
use kira_kb_enricher::error::KiraError;
use kira_kb_enricher::ncbi::{DocumentSummary, EutilsHttpClient, SequenceClient, SequenceDb};
use kira_kb_enricher::output::{ConsoleProgress, JsonOutput, OutputMode};
use kira_kb_enricher::query::{LabelQuery, QueryError, SparqlHttpClient};
use kira_kb_enricher::record::Table;
use kira_kb_enricher::resolver::ResolutionDisposition;
use kira_kb_enricher::store::{EntityHandle, EntityStore};
use kira_kb_enricher::upsert::CreationStatus;
use kira_kb_enricher::wikibase::WikibaseHttpClient;

#[derive(Parser)]
#[command(name = "kira-kbe")]
#[command(about = "Enrich strain, gene and protein tables and upsert them into a Wikibase knowledge base")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Create or reuse entities for every row and add missing claims")]
    Upsert(UpsertArgs),
    #[command(about = "Fill empty name, organism and taxonomy cells from NCBI")]
    Enrich(EnrichArgs),
    #[command(about = "Look up which entities carry a label")]
    Resolve(ResolveArgs),
}

#[derive(Args)]
struct UpsertArgs {
    table: Utf8PathBuf,

    #[arg(long, value_delimiter = ',', default_values_t = EntityKind::ALL)]
    kinds: Vec<EntityKind>,

    #[arg(long)]
    dry_run: bool,

    #[arg(long)]
    output: Option<Utf8PathBuf>,

    #[arg(long)]
    config: Option<String>,
}

#[derive(Args)]
struct EnrichArgs {
    table: Utf8PathBuf,

    #[arg(long)]
    output: Option<Utf8PathBuf>,

    #[arg(long)]
    config: Option<String>,
}

#[derive(Args)]
struct ResolveArgs {
    label: String,

    #[arg(long)]
    config: Option<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(kira) = report.downcast_ref::<KiraError>() {
            return ExitCode::from(map_exit_code(kira));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &KiraError) -> u8 {
    match error {
        KiraError::ConfigRead(_)
        | KiraError::ConfigParse(_)
        | KiraError::InvalidPropertyId(_)
        | KiraError::TableRead(_)
        | KiraError::TableWrite(_) => 2,
        KiraError::QueryHttp(_)
        | KiraError::ResolutionTransportFailure { .. }
        | KiraError::ResolutionMalformedResponse { .. }
        | KiraError::WikibaseHttp(_)
        | KiraError::WikibaseStatus { .. }
        | KiraError::WikibaseApi { .. }
        | KiraError::WikibaseLogin(_)
        | KiraError::NcbiHttp(_)
        | KiraError::NcbiStatus { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    match cli.command {
        Commands::Upsert(args) => run_upsert(args, output_mode),
        Commands::Enrich(args) => run_enrich(args, output_mode),
        Commands::Resolve(args) => run_resolve(args, output_mode),
    }
}

fn run_upsert(args: UpsertArgs, output_mode: OutputMode) -> miette::Result<()> {
    let config = ConfigLoader::resolve(args.config.as_deref())?;
    let mut table = Table::read(&args.table)?;
    let query = SparqlHttpClient::new(&config.query_endpoint)?;
    let store = WikibaseHttpClient::new(
        &config.api_endpoint,
        config.properties.clone(),
        config.credentials.clone(),
    )?;
    let app = App::new(config, query, store, NopSequences);

    let options = UpsertOptions {
        kinds: args.kinds,
        dry_run: args.dry_run,
    };
    let report = match output_mode {
        OutputMode::Interactive => app.upsert(&table, &options, &ConsoleProgress)?,
        OutputMode::NonInteractive => app.upsert(&table, &options, &JsonOutput)?,
    };

    if let Some(path) = &args.output {
        report.apply_to(&mut table)?;
        table.write(path)?;
    }

    match output_mode {
        OutputMode::Interactive => print_upsert_summary(&report, args.output.as_ref()),
        OutputMode::NonInteractive => JsonOutput::print_upsert(&report).into_diagnostic()?,
    }
    Ok(())
}

fn run_enrich(args: EnrichArgs, output_mode: OutputMode) -> miette::Result<()> {
    let config = ConfigLoader::resolve(args.config.as_deref())?;
    let mut table = Table::read(&args.table)?;
    let sequences = EutilsHttpClient::new(config.ncbi_email.as_deref())?;
    let app = App::new(config, NopQuery, NopStore, sequences);

    let report = match output_mode {
        OutputMode::Interactive => app.enrich(&mut table, &ConsoleProgress)?,
        OutputMode::NonInteractive => app.enrich(&mut table, &JsonOutput)?,
    };

    let destination = args.output.unwrap_or(args.table);
    table.write(&destination)?;

    match output_mode {
        OutputMode::Interactive => print_enrich_summary(&report, &destination),
        OutputMode::NonInteractive => JsonOutput::print_enrich(&report).into_diagnostic()?,
    }
    Ok(())
}

fn run_resolve(args: ResolveArgs, output_mode: OutputMode) -> miette::Result<()> {
    let config = ConfigLoader::resolve(args.config.as_deref())?;
    let query = SparqlHttpClient::new(&config.query_endpoint)?;
    let app = App::new(config, query, NopStore, NopSequences);
    let result = app.resolve(&args.label)?;

    match output_mode {
        OutputMode::Interactive => print_resolve_summary(&result),
        OutputMode::NonInteractive => JsonOutput::print_resolve(&result).into_diagnostic()?,
    }
    Ok(())
}

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

fn print_upsert_summary(report: &RunReport, output: Option<&Utf8PathBuf>) {
    let title = if report.dry_run {
        "KIRA-KBE dry run"
    } else {
        "KIRA-KBE summary"
    };
    println!("{CYAN}{title}{RESET}");
    println!("{GREEN}Created: {}{RESET}", report.count_status(CreationStatus::Created));
    println!("{GREEN}Reused: {}{RESET}", report.count_status(CreationStatus::Reused));
    println!("{GREEN}Claims added: {}{RESET}", report.claims_added());
    println!("{YELLOW}Needs review (ambiguous label): {}{RESET}", report.aborted());
    println!("{RED}Errors: {}{RESET}", report.failed());

    for row in &report.rows {
        for outcome in &row.outcomes {
            let entity = outcome
                .entity
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "-".to_string());
            let color = match outcome.status {
                CreationStatus::Created => CYAN,
                CreationStatus::Reused => GREEN,
                CreationStatus::Skipped => YELLOW,
            };
            println!(
                "{color}  row {} {} {:?} -> {entity}{RESET}",
                row.row, outcome.kind, outcome.label
            );
            if !outcome.candidates.is_empty() {
                let candidates: Vec<&str> =
                    outcome.candidates.iter().map(EntityId::as_str).collect();
                println!("{YELLOW}     candidates: {}{RESET}", candidates.join(", "));
            }
        }
        for error in &row.errors {
            println!("{RED}  row {} {}: {}{RESET}", row.row, error.kind, error.message);
        }
    }

    if report.dry_run {
        println!("{CYAN}Planned mutations: {}{RESET}", report.planned.len());
        for mutation in &report.planned {
            println!("{CYAN}  {mutation}{RESET}");
        }
    }
    if let Some(path) = output {
        println!("{CYAN}Table written to {path}{RESET}");
    }
}

fn print_enrich_summary(report: &EnrichReport, destination: &Utf8PathBuf) {
    println!("{CYAN}KIRA-KBE enrich{RESET}");
    println!("{GREEN}Rows: {}{RESET}", report.rows.len());
    println!("{GREEN}Cells filled: {}{RESET}", report.cells_filled());
    let mut per_column: BTreeMap<&str, usize> = BTreeMap::new();
    for column in report.rows.iter().flat_map(|row| row.filled.iter()) {
        *per_column.entry(column.as_str()).or_default() += 1;
    }
    for (column, count) in per_column {
        println!("{GREEN}  {column}: {count}{RESET}");
    }
    println!("{CYAN}Table written to {destination}{RESET}");
}

fn print_resolve_summary(result: &ResolveResult) {
    println!("{CYAN}{:?}@{}{RESET}", result.label, result.language);
    match &result.resolution {
        ResolutionDisposition::NotFound => println!("{YELLOW}not found{RESET}"),
        ResolutionDisposition::Unique(id) => println!("{GREEN}{id}{RESET}"),
        ResolutionDisposition::Ambiguous(ids) => {
            println!("{YELLOW}ambiguous:{RESET}");
            for id in ids {
                println!("{YELLOW}  {id}{RESET}");
            }
        }
    }
}

struct NopQuery;
struct NopStore;
struct NopSequences;

impl LabelQuery for NopQuery {
    fn find_by_label(&self, _label: &str, _language: &str) -> Result<Vec<EntityId>, QueryError> {
        Err(QueryError::Malformed(
            "query service not configured".to_string(),
        ))
    }
}

fn store_not_configured<T>() -> Result<T, KiraError> {
    Err(KiraError::StoreWrite(
        "knowledge base not configured".to_string(),
    ))
}

impl EntityStore for NopStore {
    fn create_entity(&self) -> Result<EntityHandle, KiraError> {
        store_not_configured()
    }

    fn resolve_handle(&self, _id: &EntityId) -> Result<EntityHandle, KiraError> {
        store_not_configured()
    }

    fn set_label(
        &self,
        _handle: &EntityHandle,
        _language: &str,
        _value: &str,
    ) -> Result<(), KiraError> {
        store_not_configured()
    }

    fn get_descriptions(
        &self,
        _handle: &EntityHandle,
    ) -> Result<BTreeMap<String, String>, KiraError> {
        store_not_configured()
    }

    fn set_description(
        &self,
        _handle: &EntityHandle,
        _language: &str,
        _value: &str,
        _summary: &str,
    ) -> Result<(), KiraError> {
        store_not_configured()
    }

    fn get_aliases(
        &self,
        _handle: &EntityHandle,
    ) -> Result<BTreeMap<String, Vec<String>>, KiraError> {
        store_not_configured()
    }

    fn set_aliases(
        &self,
        _handle: &EntityHandle,
        _language: &str,
        _aliases: &[String],
        _summary: &str,
    ) -> Result<(), KiraError> {
        store_not_configured()
    }

    fn get_claims(
        &self,
        _handle: &EntityHandle,
        _property: Property,
    ) -> Result<Vec<Claim>, KiraError> {
        store_not_configured()
    }

    fn add_claim(
        &self,
        _handle: &EntityHandle,
        _claim: &Claim,
        _summary: &str,
    ) -> Result<(), KiraError> {
        store_not_configured()
    }
}

impl SequenceClient for NopSequences {
    fn summary(
        &self,
        _db: SequenceDb,
        _accession: &str,
    ) -> Result<Option<DocumentSummary>, KiraError> {
        Err(KiraError::NcbiHttp("NCBI client not configured".to_string()))
    }
}
