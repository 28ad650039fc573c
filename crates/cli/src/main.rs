//! TestGrid CLI - Main Entry Point
//!
//! Validates test cases, inspects data sources, and dry-runs executions
//! against the simulated driver.

use clap::{Parser, Subcommand};
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use testgrid_common::{
    EngineConfig, ExecutionStatus, ExecutionStore, Resource, ResourceType, TestCase,
};
use testgrid_engine::{
    DataSet, ExecutionEngine, ExecutionRepository, InMemoryRepository, SimulatedDriverFactory,
    SqliteRepository,
};
use testgrid_pool::ResourcePool;

mod output;

/// TestGrid - UI Test Execution Orchestrator
#[derive(Parser)]
#[command(name = "testgrid")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a test case file and its declared data source
    Validate {
        /// Test case YAML file
        case: PathBuf,
    },

    /// Dry-run a test case against the simulated driver
    Run {
        /// Test case YAML file
        case: PathBuf,

        /// Environment label recorded on the execution
        #[arg(long, default_value = "local")]
        environment: String,

        /// Override the case's data source
        #[arg(long)]
        data: Option<PathBuf>,

        /// Persist execution records to a SQLite store at this path
        #[arg(long)]
        store: Option<PathBuf>,
    },

    /// Data source utilities
    #[command(subcommand)]
    Data(DataCommands),

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum DataCommands {
    /// Print the rows of a data source
    Inspect { file: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Validate { case } => validate(&case, cli.format)?,
        Commands::Run {
            case,
            environment,
            data,
            store,
        } => run(case, environment, data, store, cli.format).await?,
        Commands::Data(DataCommands::Inspect { file }) => {
            let data = DataSet::load(&file)?;
            output::print_rows(data.rows(), cli.format)?;
        }
        Commands::Version => {
            println!("testgrid {}", testgrid_common::VERSION);
        }
    }
    Ok(())
}

fn validate(case_path: &PathBuf, format: output::OutputFormat) -> anyhow::Result<()> {
    let case = TestCase::from_file(case_path)?;
    let row_count = match &case.data_source {
        Some(source) => {
            let mut data = DataSet::load(source)?;
            if let Some(schema) = &case.data_schema {
                data.set_schema(schema.clone())?;
            }
            Some(data.len())
        }
        None => None,
    };

    match format {
        output::OutputFormat::Json => {
            let doc = json!({
                "name": case.name,
                "device_type": case.device_type,
                "steps": case.steps.len(),
                "data_rows": row_count,
            });
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
        output::OutputFormat::Table => {
            println!("Test case '{}' is valid", case.name);
            println!("  device type: {}", case.device_type);
            println!("  steps: {}", case.steps.len());
            if let Some(rows) = row_count {
                println!("  data rows: {}", rows);
            }
        }
    }
    Ok(())
}

async fn run(
    case_path: PathBuf,
    environment: String,
    data: Option<PathBuf>,
    store: Option<PathBuf>,
    format: output::OutputFormat,
) -> anyhow::Result<()> {
    let mut case = TestCase::from_file(&case_path)?;
    if let Some(data) = data {
        case.data_source = Some(data);
    }

    let config = EngineConfig::default();
    let pool = Arc::new(ResourcePool::new(config.allocation.clone()));
    pool.add(simulated_resource(case.device_type))?;

    let repository: Arc<dyn ExecutionRepository> = match store {
        Some(path) => Arc::new(SqliteRepository::new(ExecutionStore::open(path)?)),
        None => Arc::new(InMemoryRepository::new()),
    };
    let factory = Arc::new(SimulatedDriverFactory::new(case.fixture.clone()));
    let engine = ExecutionEngine::new(pool, factory, repository, config);

    let execution = engine.run_to_completion(case, &environment).await?;
    let results = engine.get_step_results(&execution.id)?;
    output::print_execution(&execution, &results, format)?;

    if execution.status != ExecutionStatus::Passed {
        std::process::exit(1);
    }
    Ok(())
}

/// A pool entry standing in for real hardware during dry runs
fn simulated_resource(device_type: ResourceType) -> Resource {
    let config: HashMap<String, serde_json::Value> = match device_type {
        ResourceType::Device => [
            ("platform".to_string(), json!("android")),
            ("version".to_string(), json!("14")),
            ("udid".to_string(), json!("simulated-device")),
        ]
        .into(),
        ResourceType::Browser => [
            ("browser_type".to_string(), json!("chrome")),
            ("version".to_string(), json!("120")),
        ]
        .into(),
        ResourceType::Database => [
            ("host".to_string(), json!("127.0.0.1")),
            ("port".to_string(), json!(5432)),
            ("username".to_string(), json!("testgrid")),
            ("password".to_string(), json!("testgrid")),
            ("database".to_string(), json!("testgrid")),
        ]
        .into(),
        ResourceType::Api => [
            ("base_url".to_string(), json!("http://127.0.0.1:8080")),
            ("timeout".to_string(), json!(5)),
        ]
        .into(),
        ResourceType::File | ResourceType::Cache => HashMap::new(),
    };
    Resource::new(
        format!("sim-{}", device_type),
        device_type,
        format!("Simulated {}", device_type),
        config,
    )
}
