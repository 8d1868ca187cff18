//! Maintenance CLI for NDTS column files.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use ndts::{AppendFile, CompactOptions, NdtsError, OpenOptions, verify_file};

/// Exit code for CRC or structural corruption.
const EXIT_CORRUPT: u8 = 2;

#[derive(Parser)]
#[command(name = "ndts", about = "Inspect and maintain NDTS column files", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Recompute the header CRC and every chunk CRC, listing all mismatches.
    Verify {
        path: PathBuf,
        /// Emit the report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Rewrite the file without its tombstoned rows.
    Compact {
        path: PathBuf,
        /// Keep the prior file as <path>.bak.
        #[arg(long)]
        bak: bool,
    },
    /// Truncate a malformed tail and recompute the header counters.
    Recover { path: PathBuf },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli.command) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> Result<ExitCode, NdtsError> {
    match command {
        Command::Verify { path, json } => {
            let report = verify_file(&path)?;
            if json {
                let issues: Vec<serde_json::Value> = report
                    .issues
                    .iter()
                    .map(|i| {
                        serde_json::json!({
                            "offset": i.offset,
                            "len": i.len,
                            "reason": i.reason,
                        })
                    })
                    .collect();
                let doc = serde_json::json!({
                    "path": report.path,
                    "ok": report.ok(),
                    "totalRows": report.total_rows,
                    "chunkCount": report.chunk_count,
                    "issues": issues,
                });
                println!("{doc:#}");
            } else if report.ok() {
                println!(
                    "{}: ok ({} rows in {} chunks)",
                    report.path.display(),
                    report.total_rows,
                    report.chunk_count
                );
            } else {
                for issue in &report.issues {
                    println!(
                        "{}: offset {} len {}: {}",
                        report.path.display(),
                        issue.offset,
                        issue.len,
                        issue.reason
                    );
                }
            }
            Ok(if report.ok() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_CORRUPT)
            })
        }
        Command::Compact { path, bak } => {
            // The file's own header supplies the schema.
            let mut file = AppendFile::open_existing(&path, &OpenOptions::default())?;
            let stats = file.compact(&CompactOptions {
                keep_bak: bak,
                cancel: None,
            })?;
            println!(
                "beforeRows={} afterRows={} deletedRows={} chunksWritten={}",
                stats.before_rows, stats.after_rows, stats.deleted_rows, stats.chunks_written
            );
            Ok(ExitCode::SUCCESS)
        }
        Command::Recover { path } => {
            let stats = AppendFile::recover(&path)?;
            println!(
                "totalRows={} chunkCount={} truncatedBytes={} countersFixed={}",
                stats.total_rows, stats.chunk_count, stats.truncated_bytes, stats.counters_fixed
            );
            Ok(ExitCode::SUCCESS)
        }
    }
}
