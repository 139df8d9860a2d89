use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use arbo_core::{
    config::Config,
    lake::{self, LakeLayout, Layer},
    pipeline, RunSummary, StorageFormat,
};
use clap::{Args, Parser, Subcommand};
use comfy_table::Table;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Arbo bronze/silver/gold lake loader", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file (./arbo.toml is used when present)
    #[arg(long, global = true, env = "ARBO_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract the source tables and rebuild every lake layer
    Run(RunArgs),
    /// Print the head of a table already written to the lake
    Inspect(InspectArgs),
    /// Print the resolved configuration (password redacted)
    ShowConfig,
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    /// Override the lake base path
    #[arg(long)]
    base_path: Option<PathBuf>,
    /// Override the storage format (parquet, csv, json)
    #[arg(long)]
    format: Option<StorageFormat>,
    /// Log the first N rows of every frame as it is produced
    #[arg(long)]
    preview: Option<usize>,
    /// Print the run summary as JSON instead of a table
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct InspectArgs {
    /// Layer to read from (bronze, silver or gold)
    layer: Layer,
    /// Table name inside the layer
    table: String,
    /// Override the lake base path
    #[arg(long)]
    base_path: Option<PathBuf>,
    /// Number of rows to print
    #[arg(long, default_value_t = 10)]
    rows: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => handle_run(cli.config.as_deref(), args).await,
        Command::Inspect(args) => handle_inspect(cli.config.as_deref(), args),
        Command::ShowConfig => {
            let config = load_config(cli.config.as_deref())?;
            println!("{}", render_config(&config)?);
            Ok(())
        }
    }
}

fn describe(path: Option<&Path>) -> String {
    path.map_or_else(|| "defaults".to_string(), |p| p.display().to_string())
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    Config::load(path).with_context(|| format!("failed to load config from {}", describe(path)))
}

async fn handle_run(config_path: Option<&Path>, args: RunArgs) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(base_path) = args.base_path {
        config.base_path = base_path;
    }
    if let Some(format) = args.format {
        config.format = format;
    }
    if args.preview.is_some() {
        config.preview_rows = args.preview;
    }

    let summary = pipeline::run(&config)
        .await
        .context("pipeline run failed")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{}", summary_table(&summary));
    }
    Ok(())
}

fn handle_inspect(config_path: Option<&Path>, args: InspectArgs) -> Result<()> {
    // Reading the lake needs no database settings, so the source section is not validated.
    let base_path = match args.base_path {
        Some(path) => path,
        None => {
            Config::resolve(config_path)
                .with_context(|| format!("failed to load config from {}", describe(config_path)))?
                .base_path
        }
    };
    let path = LakeLayout::new(base_path).table_path(args.layer, &args.table);

    let df = lake::read_table(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    info!(table = %args.table, layer = %args.layer, rows = df.height(), "table loaded");

    println!("{}", df.head(Some(args.rows)));
    println!("{} rows", df.height());
    Ok(())
}

fn summary_table(summary: &RunSummary) -> Table {
    let mut table = Table::new();
    table.set_header(vec![
        "Layer",
        "Table",
        "Rows",
        "Partition",
        "Partitions",
        "Destination",
    ]);

    for layer in Layer::ALL {
        for write in summary.writes_for(layer) {
            let report = &write.report;
            table.add_row(vec![
                layer.to_string(),
                report.table.clone(),
                report.rows.to_string(),
                report.partition.clone().unwrap_or_else(|| "-".to_string()),
                report.partitions.to_string(),
                report.destination.display().to_string(),
            ]);
        }
    }

    table
}

fn render_config(config: &Config) -> Result<String> {
    let mut rendered = serde_json::to_value(config)?;
    if let Some(source) = rendered.get_mut("source").and_then(|s| s.as_object_mut()) {
        let password = if config.source.password.is_some() {
            "<redacted>"
        } else {
            "<unset>"
        };
        source.insert("password".to_string(), password.into());
    }
    Ok(serde_json::to_string_pretty(&rendered)?)
}
