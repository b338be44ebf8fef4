use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, Color, ContentArrangement, Table};
use etl_runner_core::{progress, PipelineQueue, QueueConfig, Transport};
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Run file-based ETL pipeline queues", long_about = None)]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Json, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download, parse, transform and load every pipeline in a queue file
    Run(RunArgs),
    /// Validate a queue file and print the plan without touching the network
    Check(CheckArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Queue definition (TOML)
    queue: PathBuf,
    /// Keep running later pipelines when one fails
    #[arg(long)]
    keep_going: bool,
    /// Hide progress bars
    #[arg(short, long)]
    quiet: bool,
    /// Override every loader's output directory
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Write the run summary as JSON to this path
    #[arg(long)]
    summary_json: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct CheckArgs {
    /// Queue definition (TOML)
    queue: PathBuf,
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let outcome = match cli.command {
        Command::Run(args) => handle_run(args),
        Command::Check(args) => handle_check(args).map(|()| true),
    };

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            let message = format!("{err:#}");
            error!(error = %message, "etl-runner failed");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(format: LogFormat) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.pretty().init(),
    }
}

fn load_config(path: &Path, output_dir: Option<PathBuf>) -> Result<QueueConfig> {
    let mut config = QueueConfig::from_path(path)
        .with_context(|| format!("failed to load queue definition {}", path.display()))?;
    config.apply_env();
    if let Some(dir) = output_dir {
        config.override_output_dir(dir);
    }
    Ok(config)
}

fn build_queue(config: &QueueConfig) -> Result<PipelineQueue> {
    config
        .build(&Transport::shared())
        .context("queue definition is invalid")
}

fn handle_run(args: RunArgs) -> Result<bool> {
    progress::set_quiet(args.quiet);
    let config = load_config(&args.queue, args.output_dir)?;
    let queue = build_queue(&config)?;
    info!(pipelines = queue.len(), queue = %args.queue.display(), "Starting queue");

    if args.keep_going {
        let report = queue.run_isolated();
        if let Some(path) = &args.summary_json {
            write_json(path, &report)?;
        }
        for failure in &report.failures {
            error!(source = %failure.source, error = %failure.error, "Pipeline failed");
        }
        return Ok(report.succeeded());
    }

    let summary = queue.run().context("queue run aborted")?;
    if let Some(path) = &args.summary_json {
        write_json(path, &summary)?;
    }
    info!(
        pipelines = summary.pipelines.len(),
        rows = summary.pipelines.iter().map(|p| p.rows_written()).sum::<usize>(),
        "Queue completed"
    );
    Ok(summary.succeeded())
}

fn handle_check(args: CheckArgs) -> Result<()> {
    let config = load_config(&args.queue, None)?;
    let queue = build_queue(&config)?;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Pipeline").fg(Color::Cyan),
        Cell::new("Kind").fg(Color::Cyan),
        Cell::new("File").fg(Color::Cyan),
        Cell::new("Codec").fg(Color::Cyan),
        Cell::new("Transform").fg(Color::Cyan),
        Cell::new("Target").fg(Color::Cyan),
    ]);

    for pipeline in queue.pipelines() {
        let source = pipeline.source();
        for file in source.files() {
            let target = match file.loader().or(pipeline.loader()) {
                Some(loader) => format!(
                    "{}:{} ({})",
                    loader.database_path().display(),
                    loader.table(),
                    loader.if_exists().name()
                ),
                None => "-".to_string(),
            };
            let codec = file
                .compression()
                .map(|c| c.name().to_string())
                .unwrap_or_else(|| "none".to_string());
            table.add_row(vec![
                Cell::new(source.name()),
                Cell::new(source.kind().name()),
                Cell::new(file.name()),
                Cell::new(codec),
                Cell::new(file.transform().or(pipeline.transform()).describe()),
                Cell::new(target),
            ]);
        }
    }

    println!("{table}");
    println!("{} pipeline(s) valid.", queue.len());
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value).context("failed to serialize run summary")?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    info!(path = %path.display(), "Run summary written");
    Ok(())
}
