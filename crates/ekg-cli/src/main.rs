//! ekg CLI - dataset descriptions and event knowledge graph import

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use ekg_core::builder::EkgBuilder;
use ekg_core::config::Config;
use ekg_core::database::{self, Credentials, DatabaseConnection, DryRunTransport};
use ekg_core::dataset::{
    DATASET_DESCRIPTION_SCHEMA, DatasetDescription, DescriptionValidator, schema_defects,
};
use ekg_core::export::EventLogExporter;
use ekg_core::import::{ImportMode, Importer};
use ekg_core::management::{Count, DatabaseManager};
use ekg_core::modules::{InferenceEngine, ProcessDiscovery};
use ekg_core::performance::PerformanceTracker;
use ekg_core::preprocess::Preprocessor;
use ekg_core::semantic_header::SemanticHeader;
use serde_json::json;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "ekg")]
#[command(author, version, about = "Event knowledge graph import toolkit", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to $EKG_CONFIG_DIR/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a dataset description
    Validate {
        /// Dataset description file (defaults to paths.dataset_description_path)
        file: Option<PathBuf>,
        /// Also check that every source column exists in the CSV files
        #[arg(long)]
        check_files: bool,
    },

    /// Print the dataset description schema
    Schema {
        /// List constructs in the schema that are not valid JSON Schema instead
        #[arg(long)]
        defects: bool,
    },

    /// Preprocess the CSV files and store the results
    Preprocess {
        /// Only this structure
        #[arg(short, long)]
        structure: Option<String>,
    },

    /// Import the CSV files as records
    Import {
        /// Print queries instead of sending them
        #[arg(short, long)]
        dry_run: bool,
        /// Send rows as query parameters instead of CSV files
        #[arg(long)]
        batch: bool,
    },

    /// Build nodes, relations and DF edges from imported records
    Build {
        /// Print queries instead of sending them
        #[arg(short, long)]
        dry_run: bool,
        /// Store the time between consecutive events on DF edges
        #[arg(long)]
        add_duration: bool,
    },

    /// Infer which items events handled, from load and unload events
    Infer {
        /// Item node type
        entity: String,
        /// Node type of the batch positions items are kept at
        #[arg(long)]
        position: String,
        /// Node type of the resources that move items
        #[arg(long, default_value = "Equipment")]
        resource: String,
        /// Print queries instead of sending them
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Aggregate DF edges of a node type into a DF process model
    Discover {
        /// Node type from the semantic header
        entity: String,
        /// Keep only activity pairs followed more often than this
        #[arg(long, default_value_t = 0)]
        df_threshold: u64,
        /// Drop pairs whose reverse is at least this fraction as frequent (0 disables)
        #[arg(long, default_value_t = 0.0)]
        relative_df_threshold: f64,
        /// Keep DF edges from an activity to itself
        #[arg(long)]
        keep_self_loops: bool,
        /// Print queries instead of sending them
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Show node and relationship counts
    Stats,

    /// Delete everything in the database
    Clear {
        /// Delete nodes and relationships instead of recreating the database
        #[arg(long)]
        keep_database: bool,
        /// Print queries instead of sending them
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Export the event log of a node type to CSV
    Export {
        /// Node type from the semantic header
        entity: String,
        /// Additional event attribute to include (repeatable)
        #[arg(short, long = "attr")]
        attributes: Vec<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get { key: String },
    /// Set a config value
    Set { key: String, value: String },
    /// List all config values
    List,
    /// Reset to defaults
    Reset,
    /// Show config file path
    Path,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    if let Err(e) = init_tracing(cli.quiet) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        if let Some(core) = e.downcast_ref::<ekg_core::Error>() {
            eprintln!("  code: {}", core.code());
            if let Some(suggestion) = core.suggestion() {
                eprintln!("  try: {}", suggestion);
            }
        }
        std::process::exit(1);
    }
}

fn init_tracing(quiet: bool) -> anyhow::Result<()> {
    let default = if quiet { "ekg=warn" } else { "ekg=info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(default.parse()?))
        .init();
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Validate { file, check_files } => {
            let config = load_config(config_path)?;
            let file = file.unwrap_or_else(|| config.paths.dataset_description_path.clone());
            cmd_validate(&config, &file, check_files, cli.format, cli.quiet)
        }

        Commands::Schema { defects } => cmd_schema(defects, cli.format),

        Commands::Preprocess { structure } => {
            let config = load_config(config_path)?;
            cmd_preprocess(&config, structure.as_deref(), cli.format, cli.quiet)
        }

        Commands::Import { dry_run, batch } => {
            let config = load_config(config_path)?;
            cmd_import(&config, dry_run, batch, cli.format, cli.quiet).await
        }

        Commands::Build { dry_run, add_duration } => {
            let config = load_config(config_path)?;
            cmd_build(&config, dry_run, add_duration, cli.quiet).await
        }

        Commands::Infer {
            entity,
            position,
            resource,
            dry_run,
        } => {
            let config = load_config(config_path)?;
            cmd_infer(&config, &entity, &position, &resource, dry_run, cli.quiet).await
        }

        Commands::Discover {
            entity,
            df_threshold,
            relative_df_threshold,
            keep_self_loops,
            dry_run,
        } => {
            let config = load_config(config_path)?;
            let discovery = DiscoverOptions {
                df_threshold,
                relative_df_threshold,
                keep_self_loops,
            };
            cmd_discover(&config, &entity, &discovery, dry_run, cli.quiet).await
        }

        Commands::Stats => {
            let config = load_config(config_path)?;
            cmd_stats(&config, cli.format).await
        }

        Commands::Clear { keep_database, dry_run } => {
            let config = load_config(config_path)?;
            cmd_clear(&config, keep_database, dry_run, cli.quiet).await
        }

        Commands::Export { entity, attributes } => {
            let config = load_config(config_path)?;
            cmd_export(&config, &entity, &attributes, cli.quiet).await
        }

        Commands::Config { action } => cmd_config(config_path, action, cli.quiet),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

async fn connect(config: &Config, dry_run: bool) -> anyhow::Result<DatabaseConnection> {
    let connection = if dry_run {
        DatabaseConnection::new(DryRunTransport::new().echo(true), &config.database.db_name)
    } else {
        let credentials = Credentials::from_config(&config.database)?;
        database::connect(credentials, &config.database.db_name, config.database.timeout_secs)
            .await
            .with_context(|| format!("Failed to connect to {}", config.database.uri))?
    };
    debug!(database = %config.database.db_name, dry_run, "Connected");
    Ok(connection.verbose(config.import.verbose))
}

fn load_description(config: &Config) -> anyhow::Result<DatasetDescription> {
    let path = &config.paths.dataset_description_path;
    DatasetDescription::load(path)
        .with_context(|| format!("Failed to load dataset description: {}", path.display()))
}

fn load_semantic_header(config: &Config) -> anyhow::Result<SemanticHeader> {
    let path = &config.paths.semantic_header_path;
    SemanticHeader::load(path).with_context(|| format!("Failed to load semantic header: {}", path.display()))
}

fn preprocessor(config: &Config) -> Preprocessor {
    Preprocessor::new(&config.paths.data_directory)
        .use_preprocessed_files(config.import.use_preprocessed_files)
        .store_preprocessed_files(config.import.store_preprocessed_files)
        .seed(config.import.seed)
}

// ============================================================================
// Command Implementations
// ============================================================================

fn cmd_validate(
    config: &Config,
    file: &Path,
    check_files: bool,
    format: OutputFormat,
    quiet: bool,
) -> anyhow::Result<()> {
    let contents = fs::read_to_string(file)
        .with_context(|| format!("Failed to read dataset description: {}", file.display()))?;
    let document: serde_json::Value = serde_json::from_str(&contents)
        .with_context(|| format!("{} is not valid JSON", file.display()))?;

    let violations = DescriptionValidator::new()?.validate(&document);
    let mut problems: Vec<String> = violations.iter().map(ToString::to_string).collect();
    let mut missing_columns = Vec::new();

    if violations.is_empty() {
        match DatasetDescription::from_value(document) {
            Ok(description) => {
                if check_files {
                    missing_columns = description.check_source_columns(&config.paths.data_directory)?;
                    problems.extend(missing_columns.iter().map(|missing| {
                        format!(
                            "{}/{}: column '{}' of attribute '{}' is missing",
                            missing.structure, missing.file_name, missing.column, missing.attribute
                        )
                    }));
                }
            }
            Err(e) => problems.push(e.to_string()),
        }
    }

    match format {
        OutputFormat::Json => {
            let report = json!({
                "file": file.display().to_string(),
                "valid": problems.is_empty(),
                "violations": violations,
                "missing_columns": missing_columns,
                "problems": problems,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Text => {
            if problems.is_empty() {
                if !quiet {
                    println!("{} is valid.", file.display());
                }
            } else {
                println!("{} is invalid:", file.display());
                for problem in &problems {
                    println!("  - {}", problem);
                }
            }
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(anyhow!("{} problem(s) found in {}", problems.len(), file.display()))
    }
}

fn cmd_schema(defects: bool, format: OutputFormat) -> anyhow::Result<()> {
    if !defects {
        println!("{}", DATASET_DESCRIPTION_SCHEMA.trim_end());
        return Ok(());
    }

    let defects = schema_defects()?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&defects)?),
        OutputFormat::Text => {
            for defect in &defects {
                println!("{}: {}", defect.pointer, defect.message);
            }
        }
    }
    Ok(())
}

fn cmd_preprocess(
    config: &Config,
    structure: Option<&str>,
    format: OutputFormat,
    quiet: bool,
) -> anyhow::Result<()> {
    let description = load_description(config)?;
    let structures = match structure {
        Some(name) => vec![description.structure(name)?],
        None => description.structures.iter().collect(),
    };
    let preprocessor = preprocessor(config).store_preprocessed_files(true);

    let mut summary = Vec::new();
    for structure in structures {
        for file_name in &structure.file_names {
            let table = preprocessor.read_data_set(structure, file_name, config.import.use_sample)?;
            let cache = preprocessor.preprocessed_path(structure, file_name, config.import.use_sample);
            summary.push(json!({
                "structure": structure.name,
                "file": file_name,
                "rows": table.len(),
                "columns": table.columns(),
                "stored": cache.display().to_string(),
            }));
            if !quiet && format == OutputFormat::Text {
                println!(
                    "{} / {}: {} rows -> {}",
                    structure.name,
                    file_name,
                    table.len(),
                    cache.display()
                );
            }
        }
    }

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }
    Ok(())
}

async fn cmd_import(
    config: &Config,
    dry_run: bool,
    batch: bool,
    format: OutputFormat,
    quiet: bool,
) -> anyhow::Result<()> {
    let description = load_description(config)?;
    let header = load_semantic_header(config)?;
    let connection = connect(config, dry_run).await?;
    let tracker = PerformanceTracker::new();
    let mode = if batch { ImportMode::Batch } else { ImportMode::LoadCsv };

    let imported = Importer::new(
        &connection,
        &description,
        &header.records,
        preprocessor(config),
        &config.paths.import_directory,
    )
    .batch_size(config.import.batch_size)
    .use_sample(config.import.use_sample)
    .mode(mode)
    .tracker(tracker.clone())
    .import_data()
    .await?;

    let total = tracker.finish();
    if !dry_run {
        tracker.save(&config.paths.performance_path)?;
    }

    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "records": imported,
                "seconds": total.as_secs_f64(),
                "dry_run": dry_run,
            }))?
        ),
        OutputFormat::Text if !quiet => {
            println!("Imported {} records in {:.1}s.", imported, total.as_secs_f64());
        }
        OutputFormat::Text => {}
    }
    Ok(())
}

async fn cmd_build(config: &Config, dry_run: bool, add_duration: bool, quiet: bool) -> anyhow::Result<()> {
    let header = load_semantic_header(config)?;
    let connection = connect(config, dry_run).await?;
    let tracker = PerformanceTracker::new();

    EkgBuilder::new(&connection, &header)
        .batch_size(config.import.batch_size)
        .add_duration(add_duration)
        .tracker(tracker.clone())
        .build()
        .await?;

    let total = tracker.finish();
    if !dry_run {
        tracker.save(&config.paths.performance_path)?;
    }
    if !quiet {
        println!("Built '{}' in {:.1}s.", header.name, total.as_secs_f64());
    }
    Ok(())
}

async fn cmd_infer(
    config: &Config,
    entity: &str,
    position: &str,
    resource: &str,
    dry_run: bool,
    quiet: bool,
) -> anyhow::Result<()> {
    let header = load_semantic_header(config)?;
    let connection = connect(config, dry_run).await?;

    InferenceEngine::new(&connection, &header)
        .resource_type(resource)
        .infer_items(entity, position)
        .await?;

    if !quiet {
        println!("Inferred correlations of {} items.", entity);
    }
    Ok(())
}

struct DiscoverOptions {
    df_threshold: u64,
    relative_df_threshold: f64,
    keep_self_loops: bool,
}

async fn cmd_discover(
    config: &Config,
    entity: &str,
    options: &DiscoverOptions,
    dry_run: bool,
    quiet: bool,
) -> anyhow::Result<()> {
    let header = load_semantic_header(config)?;
    let connection = connect(config, dry_run).await?;

    ProcessDiscovery::new(&connection, &header)
        .df_threshold(options.df_threshold)
        .relative_df_threshold(options.relative_df_threshold)
        .exclude_self_loops(!options.keep_self_loops)
        .create_df_process_model(entity)
        .await?;

    if !quiet {
        println!("Created DF process model for {}.", entity);
    }
    Ok(())
}

async fn cmd_stats(config: &Config, format: OutputFormat) -> anyhow::Result<()> {
    let connection = connect(config, false).await?;
    let statistics = DatabaseManager::new(&connection).statistics().await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&statistics)?),
        OutputFormat::Text => {
            print_counts("Nodes", &statistics.nodes);
            print_counts("Aggregated relationships", &statistics.aggregated_relationships);
            print_counts("Relationships", &statistics.relationships);
        }
    }
    Ok(())
}

fn print_counts(title: &str, counts: &[Count]) {
    println!("{}", title);
    for count in counts {
        println!("  {:<24} {:>10}", count.name, count.count);
    }
}

async fn cmd_clear(config: &Config, keep_database: bool, dry_run: bool, quiet: bool) -> anyhow::Result<()> {
    let connection = connect(config, dry_run).await?;
    let manager = DatabaseManager::new(&connection).batch_size(config.import.batch_size);
    manager.clear_db(!keep_database).await?;
    if !keep_database {
        manager.set_constraints().await?;
    }
    if !quiet {
        println!("Cleared database '{}'.", config.database.db_name);
    }
    Ok(())
}

async fn cmd_export(config: &Config, entity: &str, attributes: &[String], quiet: bool) -> anyhow::Result<()> {
    let header = load_semantic_header(config)?;
    header.entity(entity)?;
    let connection = connect(config, false).await?;
    let path = EventLogExporter::new(&connection, &header)
        .save_event_log(entity, attributes, &config.paths.export_directory)
        .await?;
    info!(entity = %entity, path = %path.display(), "Exported event log");
    if !quiet {
        println!("Saved event log to {}", path.display());
    }
    Ok(())
}

fn cmd_config(config_path: Option<&Path>, action: ConfigAction, quiet: bool) -> anyhow::Result<()> {
    let path = match config_path {
        Some(path) => path.to_path_buf(),
        None => Config::config_path()?,
    };

    match action {
        ConfigAction::Get { key } => {
            let config = Config::load_from(&path)?;
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load_from(&path)?;
            config.set(&key, &value)?;
            config.save_to(&path)?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load_from(&path)?;
            for (key, value) in config.list()? {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Reset => {
            Config::reset_at(&path)?;
            if !quiet {
                println!("Configuration reset to defaults.");
            }
        }
        ConfigAction::Path => {
            println!("{}", path.display());
        }
    }
    Ok(())
}
