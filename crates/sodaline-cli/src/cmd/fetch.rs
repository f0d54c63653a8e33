//! Fetch subcommand - download a dataset in resumable batches

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

use sodaline_core::{RetryPolicy, SharedProgress, attach_log_file, fmt_num};
use sodaline_socrata::{ClientConfig, RunPaths, today_key};

use crate::config::Config;

use super::parse_date_key;

#[derive(Args, Debug, Default)]
pub struct FetchArgs {
    /// Socrata dataset id (e.g. jbjy-vk9h)
    #[arg(short, long)]
    pub dataset: Option<String>,

    /// Records per batch
    #[arg(short = 'n', long, value_parser = clap::value_parser!(u64).range(1..))]
    pub chunk_size: Option<u64>,

    /// Request timeout in seconds
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: Option<u64>,

    /// Attempts per request, including the first
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub retries: Option<u32>,

    /// Seconds to wait between attempts
    #[arg(long)]
    pub retry_delay: Option<u64>,

    /// Output directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Portal host or base URL
    #[arg(long)]
    pub host: Option<String>,

    /// Socrata app token (X-App-Token)
    #[arg(long)]
    pub app_token: Option<String>,

    /// Basic-auth username
    #[arg(long)]
    pub username: Option<String>,

    /// Basic-auth password
    #[arg(long)]
    pub password: Option<String>,

    /// Keep per-batch NDJSON files after they are appended
    #[arg(long)]
    pub keep_temp: bool,

    /// Run date (MMDDYYYY or YYYY-MM-DD) naming the files; resume an older run with it
    #[arg(long, value_parser = parse_date_key)]
    pub date: Option<String>,

    /// Records sampled for the pre-download summary
    #[arg(long)]
    pub sample_size: Option<u64>,

    /// Skip the pre-download sample summary
    #[arg(long)]
    pub no_summary: bool,
}

/// Merge CLI flags over the config file into run and client settings
fn settings(args: FetchArgs, config: &Config) -> (sodaline_socrata::Config, ClientConfig) {
    let sample_size = match args.sample_size.unwrap_or(config.download.sample_size) {
        _ if args.no_summary => None,
        0 => None,
        n => Some(n),
    };

    let run = sodaline_socrata::Config {
        dataset: args
            .dataset
            .unwrap_or_else(|| config.download.dataset.clone()),
        chunk_size: args.chunk_size.unwrap_or(config.download.chunk_size),
        retry: RetryPolicy::new(
            args.retries.unwrap_or(config.http.retries),
            Duration::from_secs(args.retry_delay.unwrap_or(config.http.retry_delay)),
        ),
        output_dir: args
            .output
            .unwrap_or_else(|| config.output.default_dir.clone()),
        date_key: args.date.unwrap_or_else(today_key),
        keep_temp: args.keep_temp,
        sample_size,
    };

    let client = ClientConfig {
        host: args.host.unwrap_or_else(|| config.socrata.host.clone()),
        app_token: args.app_token.or_else(|| config.socrata.app_token.clone()),
        username: args.username.or_else(|| config.socrata.username.clone()),
        password: args.password.or_else(|| config.socrata.password.clone()),
        timeout: Duration::from_secs(args.timeout.unwrap_or(config.http.timeout)),
        order: config.socrata.order.clone(),
    };

    (run, client)
}

pub fn run(args: FetchArgs, config: &Config, progress: &SharedProgress) -> Result<ExitCode> {
    let (run_config, client) = settings(args, config);
    let paths = RunPaths::new(
        &run_config.output_dir,
        &run_config.dataset,
        &run_config.date_key,
    );

    std::fs::create_dir_all(&paths.dir)
        .with_context(|| format!("Failed to create output directory {}", paths.dir.display()))?;
    if let Err(e) = attach_log_file(&paths.log) {
        log::warn!("Cannot open log file {}: {e}", paths.log.display());
    }

    log::info!("Fetching Socrata dataset {}", run_config.dataset);
    log::info!("  Host: {}", client.host);
    log::info!("  Output: {}", paths.output.display());
    log::info!("  Ledger: {}", paths.ledger.display());
    log::info!(
        "  Chunk size: {}, attempts: {}, retry delay: {}s",
        fmt_num(run_config.chunk_size),
        run_config.retry.attempts,
        run_config.retry.delay.as_secs()
    );

    let summary = sodaline_socrata::run(&run_config, &client, progress)?;

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new(&run_config.dataset).fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);
    table.add_row(vec![
        Cell::new("Batches"),
        Cell::new(format!(
            "{} completed, {} failed, {} already done ({} total)",
            summary.completed_batches,
            summary.failed_batches,
            summary.skipped_batches,
            summary.total_batches
        )),
    ]);
    table.add_row(vec![
        Cell::new("Rows"),
        Cell::new(format!(
            "{} appended ({} in dataset)",
            fmt_num(summary.records),
            fmt_num(summary.total_rows)
        )),
    ]);
    table.add_row(vec![
        Cell::new("Output"),
        Cell::new(paths.output.display().to_string()),
    ]);
    table.add_row(vec![
        Cell::new("Time"),
        Cell::new(format!("{:.1}s", summary.elapsed.as_secs_f64())),
    ]);
    eprintln!("\n{table}");

    if summary.interrupted {
        return Ok(ExitCode::from(130));
    }
    if summary.remaining_batches() > 0 {
        eprintln!(
            "{} batch(es) not completed; run the same command again to retry them.",
            summary.remaining_batches()
        );
    }
    Ok(ExitCode::SUCCESS)
}
