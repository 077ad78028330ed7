//! Command surface of the `fi` binary.
//!
//! Hosts can embed the same behavior through:
//! - [`run_cli`] for full parsed CLI execution.
//! - [`run_command_with_db`] for direct [`Command`] execution against a DB path.
//! - [`run_command`] for execution against an existing [`SqliteRecordStore`].

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use ethiofi_core::eda;
use ethiofi_core::forecast::{Forecaster, ScenarioValue, TargetProgress};
use ethiofi_core::impact::{methodology_text, ImpactModel};
use ethiofi_core::profile::{profile, ProfileReport};
use ethiofi_core::{
    check_enrichment_log, parse_date, read_records, write_records, Dataset, IssueSeverity,
    LogCheck, LogIssue, ModelConfig, RecordType,
};
use ethiofi_store_sqlite::{
    AppendReport, ProjectorCheck, ProjectorIssueSeverity, ProjectorStaleRecord, ProjectorStatus,
    ReplayReport, RevisionBatch, SqliteRecordStore,
};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "fi")]
#[command(about = "Ethiopia financial-inclusion dataset toolkit")]
pub struct Cli {
    #[arg(long, default_value = "./ethiofi.sqlite3")]
    db: PathBuf,

    /// Append `info` level events to this file as well as stderr.
    #[arg(long)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Ingest(IngestArgs),
    Replay(ReplayArgs),
    Projector {
        #[command(subcommand)]
        command: Box<ProjectorCommand>,
    },
    Records {
        #[command(subcommand)]
        command: Box<RecordsCommand>,
    },
    Export(ExportArgs),
    Log {
        #[command(subcommand)]
        command: Box<LogCommand>,
    },
    Config {
        #[command(subcommand)]
        command: Box<ConfigCommand>,
    },
    Profile(JsonArgs),
    Eda {
        #[command(subcommand)]
        command: Box<EdaCommand>,
    },
    Impact {
        #[command(subcommand)]
        command: Box<ImpactCommand>,
    },
    Forecast {
        #[command(subcommand)]
        command: Box<ForecastCommand>,
    },
}

#[derive(Debug, Args)]
pub struct IngestArgs {
    #[arg(long)]
    file: PathBuf,
    #[arg(long)]
    writer: String,
    #[arg(long)]
    justification: String,
    #[arg(long)]
    batch_id: Option<String>,
    /// Refresh the unified projection right after the append.
    #[arg(long)]
    replay: bool,
}

#[derive(Debug, Args)]
pub struct ReplayArgs {
    #[arg(long)]
    from_revision_seq: Option<i64>,
}

#[derive(Debug, Args)]
pub struct JsonArgs {
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Subcommand)]
pub enum ProjectorCommand {
    Status(JsonArgs),
    Check(JsonArgs),
    StaleRecords(ProjectorStaleRecordsArgs),
}

#[derive(Debug, Args)]
pub struct ProjectorStaleRecordsArgs {
    #[arg(long)]
    limit: Option<usize>,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Subcommand)]
pub enum RecordsCommand {
    List(RecordsListArgs),
    Show(RecordIdArgs),
    History(RecordsHistoryArgs),
}

#[derive(Debug, Args)]
pub struct RecordsListArgs {
    #[arg(long)]
    record_type: Option<String>,
    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Debug, Args)]
pub struct RecordIdArgs {
    #[arg(long)]
    record_id: String,
}

#[derive(Debug, Args)]
pub struct RecordsHistoryArgs {
    #[arg(long)]
    record_id: String,
    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    #[arg(long)]
    output: PathBuf,
}

#[derive(Debug, Subcommand)]
pub enum LogCommand {
    Check(LogCheckArgs),
}

impl LogCommand {
    fn needs_store(&self) -> bool {
        match self {
            Self::Check(args) => args.against_store,
        }
    }
}

#[derive(Debug, Args)]
pub struct LogCheckArgs {
    #[arg(long)]
    file: PathBuf,
    /// Also require every logged record to exist in the projected dataset.
    #[arg(long)]
    against_store: bool,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    Show(ConfigShowArgs),
    Set(ConfigSetArgs),
}

#[derive(Debug, Args)]
pub struct ConfigShowArgs {
    #[arg(long)]
    config_version: Option<u32>,
}

#[derive(Debug, Args)]
pub struct ConfigSetArgs {
    #[arg(long)]
    file: PathBuf,
}

#[derive(Debug, Args)]
pub struct ConfigVersionArgs {
    #[arg(long, default_value_t = 1)]
    config_version: u32,
}

#[derive(Debug, Args)]
pub struct IndicatorArgs {
    #[arg(long)]
    indicator: String,
}

#[derive(Debug, Subcommand)]
pub enum EdaCommand {
    Overview,
    Coverage,
    Access,
    Growth(IndicatorArgs),
    Usage,
    Timeline,
    Overlay(IndicatorArgs),
    /// Dated values of one indicator inside an optional window.
    Trend(TrendArgs),
    Links,
    Correlations(CorrelationArgs),
    Headline(JsonArgs),
}

#[derive(Debug, Args)]
pub struct TrendArgs {
    #[arg(long)]
    indicator: String,
    #[arg(long)]
    start: Option<String>,
    #[arg(long)]
    end: Option<String>,
}

#[derive(Debug, Args)]
pub struct CorrelationArgs {
    /// Overrides the configured `correlation_threshold`.
    #[arg(long)]
    threshold: Option<f64>,
    #[arg(long, default_value_t = 1)]
    config_version: u32,
}

#[derive(Debug, Subcommand)]
pub enum ImpactCommand {
    Links(ConfigVersionArgs),
    Matrix(ConfigVersionArgs),
    Simulate(SimulateArgs),
    Validate(ValidateArgs),
    Methodology,
}

#[derive(Debug, Args)]
pub struct SimulateArgs {
    #[arg(long)]
    indicator: String,
    #[arg(long)]
    start: Option<String>,
    #[arg(long)]
    end: Option<String>,
    #[arg(long, default_value_t = 1)]
    config_version: u32,
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    #[arg(long)]
    indicator: String,
    #[arg(long)]
    year_start: i32,
    #[arg(long)]
    year_end: i32,
    #[arg(long, default_value_t = 1)]
    config_version: u32,
}

#[derive(Debug, Subcommand)]
pub enum ForecastCommand {
    Baseline(ForecastArgs),
    Events(ForecastArgs),
    Scenarios(ForecastArgs),
    Explain(ForecastArgs),
    Summary(ForecastSummaryArgs),
    /// Scenario paths against the indicator's target.
    Target(ForecastTargetArgs),
}

#[derive(Debug, Args)]
pub struct ForecastArgs {
    #[arg(long)]
    indicator: String,
    #[arg(long, default_value_t = 1)]
    config_version: u32,
}

#[derive(Debug, Args)]
pub struct ForecastTargetArgs {
    #[arg(long)]
    indicator: String,
    #[arg(long, default_value_t = 1)]
    config_version: u32,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
pub struct ForecastSummaryArgs {
    #[arg(long)]
    indicator: String,
    #[arg(long)]
    year: i32,
    #[arg(long, default_value_t = 1)]
    config_version: u32,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct IngestJsonPayload {
    file: String,
    append: AppendReport,
    warnings: Vec<String>,
    replay: Option<ReplayReport>,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct ScenarioSummaryJsonPayload {
    indicator_code: String,
    year: i32,
    config_version: u32,
    scenarios: Vec<ScenarioValue>,
}

/// Installs the stderr subscriber and, when `log_file` is set, an append-mode
/// file layer at `info`. `RUST_LOG` overrides the stderr default of `warn`.
/// A second call keeps the subscriber that is already installed.
///
/// # Errors
/// Returns an error when the log file cannot be opened.
pub fn init_tracing(log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(filter);

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .with_filter(LevelFilter::INFO),
            )
        }
        None => None,
    };

    let _ = tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init();
    Ok(())
}

/// Executes the parsed top-level CLI command graph.
///
/// # Errors
/// Returns an error when logging setup, migration, or command execution fails.
pub fn run_cli(cli: Cli) -> Result<()> {
    init_tracing(cli.log_file.as_deref())?;
    run_command_with_db(&cli.db, cli.command)
}

/// Executes a parsed command using the provided `SQLite` DB path.
///
/// `log check` without `--against-store` never opens the database.
///
/// # Errors
/// Returns an error when store open/migrate fails or the requested command fails.
pub fn run_command_with_db(db_path: &Path, command: Command) -> Result<()> {
    match command {
        Command::Log { command } if !command.needs_store() => run_log(*command, None),
        command => {
            let mut store = SqliteRecordStore::open(db_path)?;
            store.migrate()?;
            run_command(command, &mut store)
        }
    }
}

/// Executes a parsed command against an existing store handle.
///
/// # Errors
/// Returns an error when validation, persistence, replay, or analysis fails,
/// and when a health check (`projector check`, `log check`) reports errors.
pub fn run_command(command: Command, store: &mut SqliteRecordStore) -> Result<()> {
    match command {
        Command::Ingest(args) => run_ingest(args, store),
        Command::Replay(args) => {
            let report = store.replay(args.from_revision_seq)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Projector { command } => run_projector(*command, store),
        Command::Records { command } => run_records(*command, store),
        Command::Export(args) => {
            let dataset = store.load_dataset()?;
            let file = File::create(&args.output)
                .with_context(|| format!("failed to create {}", args.output.display()))?;
            write_records(file, dataset.records())
                .map_err(|err| anyhow!("failed writing {}: {err}", args.output.display()))?;
            info!(records = dataset.len(), output = %args.output.display(), "exported dataset");
            println!(
                "exported {} records to {}",
                dataset.len(),
                args.output.display()
            );
            Ok(())
        }
        Command::Log { command } => run_log(*command, Some(store)),
        Command::Config { command } => run_config(*command, store),
        Command::Profile(args) => {
            let report = profile(&store.load_dataset()?).map_err(|err| anyhow!(err))?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_profile(&report);
            }
            Ok(())
        }
        Command::Eda { command } => run_eda(*command, store),
        Command::Impact { command } => run_impact(*command, store),
        Command::Forecast { command } => run_forecast(*command, store),
    }
}

fn run_ingest(args: IngestArgs, store: &mut SqliteRecordStore) -> Result<()> {
    let file = File::open(&args.file)
        .with_context(|| format!("failed to open {}", args.file.display()))?;
    let import =
        read_records(file).map_err(|err| anyhow!("failed reading {}: {err}", args.file.display()))?;
    for warning in &import.warnings {
        warn!(file = %args.file.display(), "{warning}");
    }

    let batch = RevisionBatch {
        batch_id: args.batch_id,
        writer: args.writer,
        justification: args.justification,
    };
    let append = store.append_records(&batch, &import.records)?;
    let replay = match (args.replay, append.first_revision_seq) {
        (true, Some(first)) => Some(store.replay(Some(first))?),
        _ => None,
    };

    let payload = IngestJsonPayload {
        file: args.file.display().to_string(),
        append,
        warnings: import.warnings,
        replay,
    };
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

fn run_projector(command: ProjectorCommand, store: &SqliteRecordStore) -> Result<()> {
    match command {
        ProjectorCommand::Status(args) => {
            let status = store.projector_status()?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_projector_status(&status);
            }
            Ok(())
        }
        ProjectorCommand::Check(args) => {
            let check = store.projector_check()?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&check)?);
            } else {
                print_projector_check(&check);
            }

            if !check.healthy {
                return Err(anyhow!(
                    "projector consistency check failed: {}",
                    check
                        .issues
                        .iter()
                        .map(|item| format!("{}:{}", item.code, item.message))
                        .collect::<Vec<_>>()
                        .join("; ")
                ));
            }

            Ok(())
        }
        ProjectorCommand::StaleRecords(args) => {
            let stale = store.projector_stale_records(args.limit)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&stale)?);
            } else {
                print_projector_stale_records(&stale);
            }
            Ok(())
        }
    }
}

fn run_records(command: RecordsCommand, store: &SqliteRecordStore) -> Result<()> {
    match command {
        RecordsCommand::List(args) => {
            let record_type = args
                .record_type
                .as_deref()
                .map(parse_record_type)
                .transpose()?;
            let records = store.list_records(record_type, args.limit)?;
            println!("{}", serde_json::to_string_pretty(&records)?);
            Ok(())
        }
        RecordsCommand::Show(args) => {
            let Some(record) = store.get_record(&args.record_id)? else {
                return Err(anyhow!("record not found: {}", args.record_id));
            };
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }
        RecordsCommand::History(args) => {
            let revisions = store.list_revisions_for_record(&args.record_id, args.limit)?;
            if revisions.is_empty() {
                return Err(anyhow!("no revisions for record {}", args.record_id));
            }
            println!("{}", serde_json::to_string_pretty(&revisions)?);
            Ok(())
        }
    }
}

fn run_log(command: LogCommand, store: Option<&mut SqliteRecordStore>) -> Result<()> {
    match command {
        LogCommand::Check(args) => {
            let markdown = std::fs::read_to_string(&args.file)
                .with_context(|| format!("failed to read {}", args.file.display()))?;
            let mut check = check_enrichment_log(&markdown);

            if args.against_store {
                let Some(store) = store else {
                    return Err(anyhow!(
                        "internal dispatch error: --against-store requires an open store"
                    ));
                };
                check_against_dataset(&mut check, &store.load_dataset()?);
            }

            if args.json {
                println!("{}", serde_json::to_string_pretty(&check)?);
            } else {
                print_log_check(&check);
            }

            if !check.healthy {
                return Err(anyhow!(
                    "enrichment log check failed: {}",
                    check
                        .issues
                        .iter()
                        .filter(|item| item.severity == IssueSeverity::Error)
                        .map(|item| format!("{}:{}", item.code, item.message))
                        .collect::<Vec<_>>()
                        .join("; ")
                ));
            }
            Ok(())
        }
    }
}

fn run_config(command: ConfigCommand, store: &SqliteRecordStore) -> Result<()> {
    match command {
        ConfigCommand::Show(args) => {
            match args.config_version {
                Some(version) => {
                    let config = store.get_config(version)?;
                    println!("{}", serde_json::to_string_pretty(&config)?);
                }
                None => {
                    let configs = store.get_configs()?;
                    println!("{}", serde_json::to_string_pretty(&configs)?);
                }
            }
            Ok(())
        }
        ConfigCommand::Set(args) => {
            let raw = std::fs::read_to_string(&args.file)
                .with_context(|| format!("failed to read {}", args.file.display()))?;
            let value: serde_json::Value = serde_json::from_str(&raw)
                .with_context(|| format!("config file must be valid JSON: {}", args.file.display()))?;
            let config = ModelConfig::from_json(&value)
                .map_err(|err| anyhow!("invalid model configuration: {err}"))?;
            store.upsert_config(&config)?;
            info!(config_version = config.config_version, "stored model config");
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn run_eda(command: EdaCommand, store: &SqliteRecordStore) -> Result<()> {
    let dataset = store.load_dataset()?;
    match command {
        EdaCommand::Overview => print_json(&eda::overview(&dataset)),
        EdaCommand::Coverage => print_json(&eda::temporal_coverage(&dataset)),
        EdaCommand::Access => {
            print_json(&eda::access_and_gender(&dataset).map_err(|err| anyhow!(err))?)
        }
        EdaCommand::Growth(args) => print_json(&eda::growth_rates(&dataset, &args.indicator)),
        EdaCommand::Usage => print_json(&eda::usage_vs_registration(&dataset)),
        EdaCommand::Timeline => print_json(&eda::event_timeline(&dataset)),
        EdaCommand::Overlay(args) => print_json(
            &eda::event_overlay(&dataset, &args.indicator).map_err(|err| anyhow!(err))?,
        ),
        EdaCommand::Trend(args) => {
            let start = parse_optional_date(args.start.as_deref(), "--start")?;
            let end = parse_optional_date(args.end.as_deref(), "--end")?;
            print_json(
                &eda::indicator_trend(&dataset, &args.indicator, start, end)
                    .map_err(|err| anyhow!(err))?,
            )
        }
        EdaCommand::Links => print_json(&eda::impact_link_summary(&dataset)),
        EdaCommand::Correlations(args) => {
            let threshold = match args.threshold {
                Some(value) => value,
                None => store.get_config(args.config_version)?.correlation_threshold,
            };
            print_json(&eda::correlations(&dataset, threshold))
        }
        EdaCommand::Headline(args) => {
            let headline = eda::headline(&dataset).map_err(|err| anyhow!(err))?;
            if args.json {
                print_json(&headline)
            } else {
                print_headline(&headline);
                Ok(())
            }
        }
    }
}

fn run_impact(command: ImpactCommand, store: &SqliteRecordStore) -> Result<()> {
    if let ImpactCommand::Methodology = command {
        println!("{}", methodology_text());
        return Ok(());
    }

    let dataset = store.load_dataset()?;
    match command {
        ImpactCommand::Links(args) => {
            let config = store.get_config(args.config_version)?;
            let model = ImpactModel::new(&dataset, &config);
            warn_unmatched(&model);
            print_json(model.links())
        }
        ImpactCommand::Matrix(args) => {
            let config = store.get_config(args.config_version)?;
            let model = ImpactModel::new(&dataset, &config);
            warn_unmatched(&model);
            print_json(&model.matrix())
        }
        ImpactCommand::Simulate(args) => {
            let config = store.get_config(args.config_version)?;
            let model = ImpactModel::new(&dataset, &config);
            let simulation = match parse_window(args.start.as_deref(), args.end.as_deref())? {
                Some((start, end)) => model.simulate_between(&args.indicator, start, end),
                None => model.simulate(&args.indicator),
            }
            .map_err(|err| anyhow!(err))?;
            for link_id in &simulation.skipped_links {
                warn!(link_id = %link_id, "impact link has no dated event; skipped");
            }
            print_json(&simulation)
        }
        ImpactCommand::Validate(args) => {
            let config = store.get_config(args.config_version)?;
            let model = ImpactModel::new(&dataset, &config);
            let summary = model
                .validate(&args.indicator, args.year_start, args.year_end)
                .map_err(|err| anyhow!(err))?;
            print_json(&summary)
        }
        ImpactCommand::Methodology => Err(anyhow!(
            "internal dispatch error: methodology should be handled before dataset load"
        )),
    }
}

fn run_forecast(command: ForecastCommand, store: &SqliteRecordStore) -> Result<()> {
    let dataset = store.load_dataset()?;
    match command {
        ForecastCommand::Baseline(args) => {
            let config = store.get_config(args.config_version)?;
            let forecaster = Forecaster::new(&dataset, &config);
            print_json(&forecaster.baseline(&args.indicator).map_err(|err| anyhow!(err))?)
        }
        ForecastCommand::Events(args) => {
            let config = store.get_config(args.config_version)?;
            let forecaster = Forecaster::new(&dataset, &config);
            let forecast = forecaster
                .event_augmented(&args.indicator)
                .map_err(|err| anyhow!(err))?;
            for link_id in &forecast.skipped_links {
                warn!(link_id = %link_id, "impact link has no dated event or estimate; skipped");
            }
            print_json(&forecast)
        }
        ForecastCommand::Scenarios(args) => {
            let config = store.get_config(args.config_version)?;
            let forecaster = Forecaster::new(&dataset, &config);
            print_json(&forecaster.scenarios(&args.indicator).map_err(|err| anyhow!(err))?)
        }
        ForecastCommand::Explain(args) => {
            let config = store.get_config(args.config_version)?;
            let forecaster = Forecaster::new(&dataset, &config);
            print_json(&forecaster.explain(&args.indicator))
        }
        ForecastCommand::Summary(args) => {
            let config = store.get_config(args.config_version)?;
            let forecaster = Forecaster::new(&dataset, &config);
            let set = forecaster
                .scenarios(&args.indicator)
                .map_err(|err| anyhow!(err))?;
            let payload = ScenarioSummaryJsonPayload {
                indicator_code: set.indicator_code.clone(),
                year: args.year,
                config_version: set.config_version,
                scenarios: set.summary(args.year).map_err(|err| anyhow!(err))?,
            };
            if args.json {
                print_json(&payload)
            } else {
                print_scenario_summary(&payload);
                Ok(())
            }
        }
        ForecastCommand::Target(args) => {
            let config = store.get_config(args.config_version)?;
            let forecaster = Forecaster::new(&dataset, &config);
            let progress = forecaster
                .target_progress(&args.indicator)
                .map_err(|err| anyhow!(err))?;
            if args.json {
                print_json(&progress)
            } else {
                print_target_progress(&progress);
                Ok(())
            }
        }
    }
}

fn check_against_dataset(check: &mut LogCheck, dataset: &Dataset) {
    let missing: Vec<(String, usize)> = check
        .entries
        .iter()
        .filter(|entry| !entry.record_id.is_empty() && dataset.get(&entry.record_id).is_none())
        .map(|entry| (entry.record_id.clone(), entry.line))
        .collect();

    for (record_id, line) in missing {
        check.push_issue(LogIssue {
            code: "log_record_missing_from_dataset".to_string(),
            severity: IssueSeverity::Error,
            message: format!("{record_id} is not in the projected dataset"),
            record_id: Some(record_id),
            line: Some(line),
        });
    }
}

fn warn_unmatched(model: &ImpactModel<'_>) {
    for link_id in model.unmatched_links() {
        warn!(link_id = %link_id, "impact link matches no dated event");
    }
}

fn parse_record_type(raw: &str) -> Result<RecordType> {
    RecordType::parse(raw).ok_or_else(|| {
        anyhow!("invalid record type: {raw} (expected observation, event, impact_link or target)")
    })
}

fn parse_window(
    start: Option<&str>,
    end: Option<&str>,
) -> Result<Option<(time::Date, time::Date)>> {
    match (start, end) {
        (Some(start), Some(end)) => {
            let start = parse_date(start).map_err(|err| anyhow!("invalid --start value: {err}"))?;
            let end = parse_date(end).map_err(|err| anyhow!("invalid --end value: {err}"))?;
            Ok(Some((start, end)))
        }
        (None, None) => Ok(None),
        _ => Err(anyhow!("a simulation window requires both --start and --end")),
    }
}

fn parse_optional_date(value: Option<&str>, flag: &str) -> Result<Option<time::Date>> {
    value
        .map(|raw| parse_date(raw).map_err(|err| anyhow!("invalid {flag} value: {err}")))
        .transpose()
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_projector_status(status: &ProjectorStatus) {
    println!(
        "contract={} projector={} projected_revision_seq={} latest_revision_seq={} lag_revisions={}",
        status.contract_version,
        status.projector_name,
        status.projected_revision_seq,
        status.latest_revision_seq,
        status.lag_revisions
    );
    println!(
        "tracked_records={} unified_rows={} stale_rows={} records_without_row={} rows_without_revisions={} max_stale_seq_gap={} updated_at={}",
        status.tracked_records,
        status.unified_rows,
        status.stale_rows,
        status.records_without_row,
        status.rows_without_revisions,
        status.max_stale_seq_gap,
        status.updated_at.as_deref().unwrap_or("n/a")
    );
}

fn print_projector_check(check: &ProjectorCheck) {
    println!("contract={}", check.contract_version);
    print_projector_status(&check.status);
    println!("healthy={}", if check.healthy { "yes" } else { "no" });
    if !check.issues.is_empty() {
        let formatted = check
            .issues
            .iter()
            .map(|item| {
                let severity = match item.severity {
                    ProjectorIssueSeverity::Warning => "warning",
                    ProjectorIssueSeverity::Error => "error",
                };
                format!("{severity}:{}:{}", item.code, item.message)
            })
            .collect::<Vec<_>>()
            .join(" | ");
        println!("issues={formatted}");
        println!("hint=run `fi replay` or `fi projector stale-records --json` for affected records");
    }
}

fn print_projector_stale_records(stale: &[ProjectorStaleRecord]) {
    println!(
        "{:<24} {:<17} projected_revision_seq",
        "record_id", "max_revision_seq"
    );
    println!("{}", "-".repeat(70));
    for item in stale {
        println!(
            "{:<24} {:<17} {}",
            item.record_id,
            item.max_revision_seq,
            item.projected_revision_seq
                .map_or_else(|| "none".to_string(), |value| value.to_string())
        );
    }
}

fn print_log_check(check: &LogCheck) {
    println!(
        "contract={} entries={} figures_checked={} healthy={}",
        check.contract_version,
        check.entries.len(),
        check.figures_checked,
        if check.healthy { "yes" } else { "no" }
    );
    println!(
        "{:<10} {:<8} {:<10} {:<44} source_url",
        "record_id", "line", "confidence", "original_text"
    );
    println!("{}", "-".repeat(110));
    for entry in &check.entries {
        println!(
            "{:<10} {:<8} {:<10} {:<44} {}",
            entry.record_id,
            entry.line,
            entry.confidence,
            truncate(&entry.original_text, 44),
            entry.source_url
        );
    }
    for issue in &check.issues {
        let severity = match issue.severity {
            IssueSeverity::Warning => "warning",
            IssueSeverity::Error => "error",
        };
        let line = issue
            .line
            .map_or_else(|| "-".to_string(), |value| value.to_string());
        println!("{severity}:{}:line={line}:{}", issue.code, issue.message);
    }
}

fn print_profile(report: &ProfileReport) {
    println!("total_records={}", report.total_records);
    if let Some(range) = &report.observation_range {
        println!("observation_range={}..{}", range.first, range.last);
    }
    let join_counts = |counts: &[eda::ValueCount]| {
        counts
            .iter()
            .map(|item| format!("{}={}", item.value, item.count))
            .collect::<Vec<_>>()
            .join(" ")
    };
    println!("record_types: {}", join_counts(&report.record_types));
    println!("pillars: {}", join_counts(&report.pillars));
    println!("confidence: {}", join_counts(&report.confidence));
    println!(
        "events: total={} dated={} undated={}",
        report.total_events,
        report.events.len(),
        report.undated_events.len()
    );
    for event in &report.undated_events {
        println!(
            "undated event {} {}",
            event.record_id,
            event.indicator.as_deref().unwrap_or("-")
        );
    }

    println!(
        "{:<40} {:<7} {:<10} {:<10} {:<10} dates",
        "indicator", "values", "mean", "min", "max"
    );
    println!("{}", "-".repeat(100));
    let cell = |value: Option<f64>| value.map_or_else(|| "-".to_string(), |v| format!("{v:.2}"));
    for item in &report.indicator_coverage {
        println!(
            "{:<40} {:<7} {:<10} {:<10} {:<10} {}",
            truncate(&item.indicator, 40),
            item.values,
            cell(item.mean),
            cell(item.min),
            cell(item.max),
            item.dates
                .as_ref()
                .map_or_else(|| "-".to_string(), |range| format!("{}..{}", range.first, range.last))
        );
    }

    if !report.missing_values.is_empty() {
        let formatted = report
            .missing_values
            .iter()
            .map(|item| format!("{}={} ({:.1}%)", item.column, item.missing, item.percent))
            .collect::<Vec<_>>()
            .join(" ");
        println!("missing: {formatted}");
    }
}

fn print_headline(headline: &eda::Headline) {
    let cell = |value: Option<f64>| value.map_or_else(|| "n/a".to_string(), |v| format!("{v:.1}%"));
    println!("latest_year={}", headline.latest_year);
    println!("account_ownership={}", cell(headline.account_ownership));
    println!("digital_payment={}", cell(headline.digital_payment));
    println!(
        "p2p_atm_crossover_ratio={:.2}",
        headline.p2p_atm_crossover_ratio
    );
}

fn print_target_progress(progress: &TargetProgress) {
    let deadline = progress
        .target_year
        .map_or_else(|| "none".to_string(), |year| year.to_string());
    println!(
        "indicator={} target={:.2} target_year={} source={} on_track={}",
        progress.indicator_code,
        progress.target_value,
        deadline,
        progress.target_source,
        progress.on_track
    );
    println!(
        "{:<6} {:>11} {:>11} {:>11} {:>8}",
        "year", "with_events", "optimistic", "pessimistic", "gap"
    );
    println!("{}", "-".repeat(52));
    for point in &progress.points {
        println!(
            "{:<6} {:>11.2} {:>11.2} {:>11.2} {:>8.2}",
            point.year, point.with_events, point.optimistic, point.pessimistic, point.gap
        );
    }
    for reach in &progress.reached {
        match reach.first_year {
            Some(year) => println!("{} reaches target in {year}", reach.scenario),
            None => println!("{} does not reach target", reach.scenario),
        }
    }
}

fn print_scenario_summary(payload: &ScenarioSummaryJsonPayload) {
    println!(
        "indicator={} year={} config_version={}",
        payload.indicator_code, payload.year, payload.config_version
    );
    println!("{:<14} forecast", "scenario");
    println!("{}", "-".repeat(30));
    for item in &payload.scenarios {
        println!("{:<14} {:.2}", item.scenario, item.forecast);
    }
}

fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        return value.to_string();
    }
    let mut shortened: String = value.chars().take(width.saturating_sub(3)).collect();
    shortened.push_str("...");
    shortened
}

#[cfg(test)]
mod tests {
    #![allow(clippy::too_many_lines)]

    use super::*;
    use ethiofi_core::parse_enrichment_log;
    use ulid::Ulid;

    fn must<T>(result: Result<T>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("test failure: {err}"),
        }
    }

    fn fixture_path(name: &str) -> String {
        let path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../../fixtures")
            .join(name);
        match path.to_str() {
            Some(value) => value.to_string(),
            None => panic!("fixture path must be valid UTF-8"),
        }
    }

    fn temp_db(label: &str) -> (PathBuf, String) {
        let db_path = std::env::temp_dir().join(format!("ethiofi-{label}-{}.sqlite3", Ulid::new()));
        let db_path_str = match db_path.to_str() {
            Some(value) => value.to_string(),
            None => panic!("temp db path must be valid UTF-8"),
        };
        (db_path, db_path_str)
    }

    fn execute_cli(args: &[&str]) -> Result<()> {
        let cli = Cli::try_parse_from(args)?;
        run_cli(cli)
    }

    #[test]
    fn parse_window_requires_both_bounds() {
        assert!(must(parse_window(None, None)).is_none());
        assert!(parse_window(Some("2021-01-01"), None).is_err());
        assert!(parse_window(Some("2021-13-01"), Some("2022-01-01")).is_err());

        let window = must(parse_window(Some("2021-01-01"), Some("2022-06-30")));
        assert!(window.is_some_and(|(start, end)| start < end));
    }

    #[test]
    fn parse_record_type_accepts_spelling_variants() {
        assert_eq!(must(parse_record_type("Impact Link")), RecordType::ImpactLink);
        assert!(parse_record_type("survey").is_err());
    }

    #[test]
    fn truncate_keeps_short_values_and_marks_long_ones() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a longer sentence", 10), "a longe...");
    }

    #[test]
    fn log_entries_missing_from_dataset_are_errors() {
        let markdown = match std::fs::read_to_string(fixture_path("enrichment_log.md")) {
            Ok(value) => value,
            Err(err) => panic!("failed reading fixture: {err}"),
        };
        let mut check = check_enrichment_log(&markdown);
        assert!(check.healthy);

        let entries = must(parse_enrichment_log(&markdown).map_err(|err| anyhow!(err)));
        let mut kept = ethiofi_core::Record::new(entries[0].record_id.clone(), RecordType::Observation);
        kept.source_url = Some(entries[0].source_url.clone());
        let dataset = must(Dataset::from_records(vec![kept]).map_err(|err| anyhow!(err)));

        check_against_dataset(&mut check, &dataset);
        assert!(!check.healthy);
        let missing: Vec<Option<&str>> = check
            .issues
            .iter()
            .filter(|issue| issue.code == "log_record_missing_from_dataset")
            .map(|issue| issue.record_id.as_deref())
            .collect();
        assert_eq!(
            missing,
            vec![Some("REC_0026"), Some("REC_0027"), Some("REC_0028")]
        );
    }

    #[test]
    fn scenario_summary_json_contract_is_stable_v1() {
        let payload = ScenarioSummaryJsonPayload {
            indicator_code: "ACC_OWNERSHIP".to_string(),
            year: 2027,
            config_version: 1,
            scenarios: vec![ScenarioValue {
                scenario: "baseline".to_string(),
                forecast: 55.5,
            }],
        };

        let value = must(serde_json::to_value(payload).map_err(Into::into));
        assert_eq!(
            value,
            serde_json::json!({
                "indicator_code": "ACC_OWNERSHIP",
                "year": 2027,
                "config_version": 1,
                "scenarios": [
                    { "scenario": "baseline", "forecast": 55.5 }
                ]
            })
        );
    }

    #[test]
    fn stable_embed_api_host_path_stays_operational() {
        let (db_path, db_path_str) = temp_db("embed-host");

        must(run_command_with_db(
            &db_path,
            Command::Ingest(IngestArgs {
                file: PathBuf::from(fixture_path("ethiopia_fi_sample.csv")),
                writer: "tester".to_string(),
                justification: "embed api regression".to_string(),
                batch_id: Some("batch-embed".to_string()),
                replay: false,
            }),
        ));

        let mut store = must(SqliteRecordStore::open(&db_path));
        must(store.migrate());
        assert!(!must(store.projector_check()).healthy);
        must(run_command(
            Command::Replay(ReplayArgs {
                from_revision_seq: None,
            }),
            &mut store,
        ));
        assert!(must(store.projector_check()).healthy);

        must(execute_cli(&[
            "fi",
            "--db",
            &db_path_str,
            "projector",
            "status",
            "--json",
        ]));

        let _ = std::fs::remove_file(&db_path);
    }

    #[test]
    fn cli_end_to_end_ingest_replay_analyse_and_export() {
        let (db_path, db_path_str) = temp_db("cli-e2e");
        let csv = fixture_path("ethiopia_fi_sample.csv");
        let export_path =
            std::env::temp_dir().join(format!("ethiofi-export-{}.csv", Ulid::new()));
        let export_str = match export_path.to_str() {
            Some(value) => value.to_string(),
            None => panic!("export path must be valid UTF-8"),
        };

        must(execute_cli(&[
            "fi",
            "--db",
            &db_path_str,
            "ingest",
            "--file",
            &csv,
            "--writer",
            "tester",
            "--justification",
            "fixture",
        ]));

        let check_before_replay =
            execute_cli(&["fi", "--db", &db_path_str, "projector", "check", "--json"]);
        assert!(check_before_replay.is_err());

        must(execute_cli(&["fi", "--db", &db_path_str, "replay"]));
        must(execute_cli(&["fi", "--db", &db_path_str, "projector", "check", "--json"]));

        must(execute_cli(&[
            "fi",
            "--db",
            &db_path_str,
            "log",
            "check",
            "--file",
            &fixture_path("enrichment_log.md"),
            "--against-store",
        ]));
        must(execute_cli(&["fi", "--db", &db_path_str, "profile"]));
        must(execute_cli(&["fi", "--db", &db_path_str, "eda", "headline"]));
        must(execute_cli(&["fi", "--db", &db_path_str, "eda", "access"]));
        must(execute_cli(&["fi", "--db", &db_path_str, "impact", "matrix"]));
        must(execute_cli(&[
            "fi",
            "--db",
            &db_path_str,
            "impact",
            "simulate",
            "--indicator",
            "ACC_MM_ACCOUNT",
            "--start",
            "2021-01-01",
            "--end",
            "2024-12-31",
        ]));
        must(execute_cli(&[
            "fi",
            "--db",
            &db_path_str,
            "forecast",
            "summary",
            "--indicator",
            "ACC_OWNERSHIP",
            "--year",
            "2027",
        ]));

        must(execute_cli(&[
            "fi",
            "--db",
            &db_path_str,
            "forecast",
            "target",
            "--indicator",
            "ACC_OWNERSHIP",
        ]));
        must(execute_cli(&[
            "fi",
            "--db",
            &db_path_str,
            "eda",
            "trend",
            "--indicator",
            "ACC_OWNERSHIP",
            "--start",
            "2017-01-01",
        ]));
        let bad_bound = execute_cli(&[
            "fi",
            "--db",
            &db_path_str,
            "eda",
            "trend",
            "--indicator",
            "ACC_OWNERSHIP",
            "--end",
            "2021-13-01",
        ]);
        assert!(bad_bound.is_err());

        let missing_year = execute_cli(&[
            "fi",
            "--db",
            &db_path_str,
            "forecast",
            "summary",
            "--indicator",
            "ACC_OWNERSHIP",
            "--year",
            "2030",
        ]);
        assert!(missing_year.is_err());

        must(execute_cli(&[
            "fi",
            "--db",
            &db_path_str,
            "export",
            "--output",
            &export_str,
        ]));

        let store = must(SqliteRecordStore::open(&db_path));
        let exported = match File::open(&export_path) {
            Ok(file) => must(read_records(file).map_err(|err| anyhow!(err))),
            Err(err) => panic!("failed to open export: {err}"),
        };
        let projected = must(store.load_dataset());
        assert_eq!(exported.records, projected.records());

        let _ = std::fs::remove_file(&db_path);
        let _ = std::fs::remove_file(&export_path);
    }

    #[test]
    fn corrections_append_revisions_and_keep_history() {
        let (db_path, db_path_str) = temp_db("cli-corrections");
        let correction_path =
            std::env::temp_dir().join(format!("ethiofi-correction-{}.csv", Ulid::new()));
        if let Err(err) = std::fs::write(
            &correction_path,
            "record_id,record_type,indicator_code,value_numeric,observation_date,gender\n\
             REC_0004,observation,ACC_OWNERSHIP,49.5,2024-12-31,all\n",
        ) {
            panic!("failed to write correction fixture: {err}");
        }
        let correction_str = match correction_path.to_str() {
            Some(value) => value.to_string(),
            None => panic!("correction path must be valid UTF-8"),
        };

        for (file, justification) in [
            (fixture_path("ethiopia_fi_sample.csv"), "initial load"),
            (correction_str, "findex 2025 revision"),
        ] {
            must(execute_cli(&[
                "fi",
                "--db",
                &db_path_str,
                "ingest",
                "--file",
                &file,
                "--writer",
                "tester",
                "--justification",
                justification,
                "--replay",
            ]));
        }

        let store = must(SqliteRecordStore::open(&db_path));
        let history = must(store.list_revisions_for_record("REC_0004", None));
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].record.value_numeric, Some(49.0));
        assert_eq!(history[1].justification, "findex 2025 revision");

        let current = match must(store.get_record("REC_0004")) {
            Some(value) => value,
            None => panic!("missing corrected record"),
        };
        assert_eq!(current.value_numeric, Some(49.5));
        assert!(must(store.projector_check()).healthy);

        let _ = std::fs::remove_file(&db_path);
        let _ = std::fs::remove_file(&correction_path);
    }
}
