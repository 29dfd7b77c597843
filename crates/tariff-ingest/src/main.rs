//! Tariff Ingest - per-country tariff acquisition and validation

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tariff_common::logging::{init_logging, LogConfig, LogLevel};
use tariff_common::types::TariffRecord;
use tariff_ingest::adapter::{csv::parse_csv, extract_records};
use tariff_ingest::catalog::{ReferenceCatalog, StaticCatalog};
use tariff_ingest::config::PipelineConfig;
use tariff_ingest::notify::{LogNotifier, NotificationHub, WebhookNotifier};
use tariff_ingest::orchestrator::{BatchSelection, JobOrchestrator};
use tariff_ingest::registry::AdapterRegistry;
use tariff_ingest::storage::FileStore;
use tariff_ingest::validation::{ConsistencyContext, ValidationPipeline, ValidationSettings};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "tariff-ingest")]
#[command(author, version, about = "Per-country tariff acquisition and validation")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Country catalog (JSON array)
    #[arg(long, env = "TARIFF_CATALOG", default_value = "./countries.json", global = true)]
    catalog: PathBuf,

    /// Directory for persisted records and reports
    #[arg(long, env = "TARIFF_STORE_DIR", default_value = "./data/tariffs", global = true)]
    store_dir: PathBuf,

    /// Validator settings (JSON)
    #[arg(long, env = "TARIFF_VALIDATION_CONFIG", global = true)]
    validation_config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Acquire and validate one source
    Run {
        /// ISO alpha-2 or alpha-3 code
        source_id: String,

        /// Ignore any registered adapter and use the generic one
        #[arg(long)]
        generic: bool,
    },

    /// Run several sources concurrently
    #[command(group(ArgGroup::new("selection").required(true)))]
    Batch {
        /// Comma-separated source ids
        #[arg(long, value_delimiter = ',', group = "selection")]
        ids: Vec<String>,

        #[arg(long, group = "selection")]
        priority: Option<u8>,

        #[arg(long, group = "selection")]
        region: Option<String>,

        #[arg(long, group = "selection")]
        bloc: Option<String>,

        #[arg(long, group = "selection")]
        all: bool,
    },

    /// Validate a local JSON or CSV file without fetching anything
    Validate {
        file: PathBuf,

        /// Catalog id used for bloc and region checks
        #[arg(long)]
        source_id: Option<String>,
    },

    /// List catalog sources
    List {
        #[arg(long)]
        region: Option<String>,

        #[arg(long)]
        bloc: Option<String>,

        #[arg(long)]
        priority: Option<u8>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Initialize logging based on verbose flag
    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("tariff-ingest".to_string())
        .build();

    // Environment variables take precedence
    let log_config = LogConfig::merge_env(log_config).context("Invalid LOG_* environment")?;
    init_logging(&log_config)?;

    let config = PipelineConfig::from_env().context("Invalid pipeline configuration")?;
    let settings = match &cli.validation_config {
        Some(path) => ValidationSettings::from_json_file(path)?,
        None => ValidationSettings::default(),
    };

    match cli.command {
        Command::Run { source_id, generic } => {
            let orchestrator = build_orchestrator(&cli.catalog, &cli.store_dir, settings, config)?;
            let outcome = orchestrator.run_single(&source_id, generic).await?;
            info!(
                job_id = %outcome.job_id,
                status = ?outcome.status,
                score = ?outcome.combined_score(),
                "Job complete"
            );
            print_json(&outcome)?;
        },
        Command::Batch {
            ids,
            priority,
            region,
            bloc,
            all,
        } => {
            let selection = if all {
                BatchSelection::All
            } else if let Some(tier) = priority {
                BatchSelection::Priority(tier)
            } else if let Some(region) = region {
                BatchSelection::Region(region)
            } else if let Some(bloc) = bloc {
                BatchSelection::Bloc(bloc)
            } else {
                BatchSelection::Ids(ids)
            };
            let orchestrator =
                build_orchestrator(&cli.catalog, &cli.store_dir, settings, config).map(Arc::new)?;
            let summary = orchestrator.run_batch(selection).await;
            print_json(&summary)?;
        },
        Command::Validate { file, source_id } => {
            let records = load_records(&file)?;
            let context = match source_id {
                Some(id) => {
                    let catalog = load_catalog(&cli.catalog)?;
                    let country = catalog
                        .lookup(&id)
                        .with_context(|| format!("Unknown source id: {}", id))?;
                    ConsistencyContext::default().with_blocs(&country.blocs, &country.region)
                },
                None => ConsistencyContext::default(),
            };
            info!(file = %file.display(), records = records.len(), "Validating file");
            let outcome = ValidationPipeline::new(settings).run(&records, &context);
            print_json(&outcome)?;
        },
        Command::List {
            region,
            bloc,
            priority,
        } => {
            let catalog = load_catalog(&cli.catalog)?;
            let ids = if let Some(region) = region {
                catalog.list_by_region(&region)
            } else if let Some(bloc) = bloc {
                catalog.list_by_bloc(&bloc)
            } else if let Some(tier) = priority {
                catalog.list_by_priority(tier)
            } else {
                catalog.list_all()
            };
            for country in ids.iter().filter_map(|id| catalog.lookup(id)) {
                println!(
                    "{}\t{}\t{}\ttier {}\t{}",
                    country.iso2,
                    country.name_en,
                    country.region,
                    country.priority_tier,
                    country.blocs.join(",")
                );
            }
        },
    }

    Ok(())
}

fn load_catalog(path: &Path) -> Result<StaticCatalog> {
    StaticCatalog::from_json_file(path)
        .with_context(|| format!("Failed to load catalog {}", path.display()))
}

fn build_orchestrator(
    catalog: &Path,
    store_dir: &Path,
    settings: ValidationSettings,
    config: PipelineConfig,
) -> Result<JobOrchestrator> {
    let catalog = Arc::new(load_catalog(catalog)?);
    info!(sources = catalog.len(), "Catalog loaded");

    let registry =
        Arc::new(AdapterRegistry::with_builtins(catalog, config.source_defaults.clone()));

    let mut hub = NotificationHub::new(config.notify_timeout()).with_channel(Arc::new(LogNotifier));
    if let Some(url) = &config.webhook_url {
        let webhook = WebhookNotifier::new(url.clone()).with_timeout(config.notify_timeout());
        hub = hub.with_channel(Arc::new(webhook));
    }

    Ok(JobOrchestrator::new(registry, config)
        .with_validation(ValidationPipeline::new(settings))
        .with_notifier(hub)
        .with_store(Arc::new(FileStore::new(store_dir))))
}

/// Records from a JSON payload (array or `{"tariffs": [...]}`) or a CSV file
fn load_records(path: &Path) -> Result<Vec<TariffRecord>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let is_csv = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));

    let payload = if is_csv {
        serde_json::Value::Array(parse_csv(&content)?)
    } else {
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid JSON in {}", path.display()))?
    };
    Ok(extract_records(&payload))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
