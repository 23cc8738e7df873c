//! dBASE IV Converter CLI
//!
//! Convert dBASE IV .dbf tables (with .dbt memos) to JSON or CSV format.

use clap::{Parser, ValueEnum};
use dbf_converter::{output, Table, TableOptions};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

#[derive(Parser)]
#[command(name = "dbf-convert")]
#[command(about = "Convert dBASE IV .dbf tables to open formats")]
#[command(version)]
struct Cli {
    /// Input .dbf file(s)
    #[arg(required = true)]
    input: Vec<PathBuf>,

    /// Output file path (for single input) or directory (for multiple inputs)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "json")]
    format: OutputFormat,

    /// Pretty-print JSON output
    #[arg(short, long)]
    pretty: bool,

    /// Export soft-deleted records too
    #[arg(short = 'd', long)]
    include_deleted: bool,

    /// JSON file with table options
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Show verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Json,
    Csv,
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    let options = match &cli.config {
        Some(path) => match TableOptions::from_file(path) {
            Ok(options) => options,
            Err(e) => {
                error!("Invalid config {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => TableOptions::default(),
    };

    let mut success_count = 0;
    let mut error_count = 0;

    for input_path in &cli.input {
        debug!("Processing: {}", input_path.display());

        match process_file(&cli, input_path, &options) {
            Ok(output_path) => {
                success_count += 1;
                info!("{} -> {}", input_path.display(), output_path.display());
            }
            Err(e) => {
                error_count += 1;
                error!("Error processing {}: {}", input_path.display(), e);
            }
        }
    }

    if cli.input.len() > 1 {
        info!(
            "Processed {} file(s): {} success, {} errors",
            cli.input.len(),
            success_count,
            error_count
        );
    }

    if error_count > 0 {
        std::process::exit(1);
    }
}

fn process_file(
    cli: &Cli,
    input_path: &Path,
    options: &TableOptions,
) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let table = Table::load_with(input_path, options.clone())?;

    if let Some(header) = table.header() {
        debug!("  Version flags: {:#04x}", header.flags);
        if let Some(date) = header.last_update_date() {
            debug!("  Last update: {}", date);
        }
    }
    for field in table.fields() {
        debug!(
            "  Field {} {:?}({}.{})",
            field.name, field.field_type, field.length, field.decimal_count
        );
    }
    if let Some(memo) = table.memo_store() {
        debug!("  Memo blocks: {} (block size {})", memo.len(), memo.block_size());
    }

    let output_path = get_output_path(cli, input_path);

    let file = File::create(&output_path)?;
    let mut writer = BufWriter::new(file);

    match cli.format {
        OutputFormat::Json => {
            output::write_json(&table, &mut writer, cli.pretty, cli.include_deleted)?;
        }
        OutputFormat::Csv => {
            output::write_csv(&table, &mut writer, cli.include_deleted)?;
        }
    }

    writer.flush()?;

    Ok(output_path)
}

fn get_output_path(cli: &Cli, input_path: &Path) -> PathBuf {
    let extension = match cli.format {
        OutputFormat::Json => "json",
        OutputFormat::Csv => "csv",
    };

    match &cli.output {
        // Single file: use as-is if it has an extension
        Some(output) if cli.input.len() == 1 => {
            if output.extension().is_some() {
                output.clone()
            } else {
                output.with_extension(extension)
            }
        }
        // Multiple files: output is a directory
        Some(output) => {
            let stem = input_path.file_stem().unwrap_or_default().to_string_lossy();
            output.join(format!("{}.{}", stem, extension))
        }
        None => input_path.with_extension(extension),
    }
}
