//! sodaline - resumable batch downloads from Socrata open data portals
//!
//! Pages a dataset into a single NDJSON file, recording every batch in a CSV
//! ledger so an interrupted or partly failed run picks up where it stopped.

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use sodaline_core::{ProgressContext, init_logging, request_shutdown};

mod cmd;
mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "sodaline")]
#[command(about = "Resumable batch downloader for Socrata open data")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "debug")]
    quiet: bool,

    /// Config file path (default: ./sodaline.toml or ~/.config/sodaline/config.toml)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Download a dataset in batches, resuming an earlier run of the same day
    Fetch(cmd::fetch::FetchArgs),
    /// Show the progress ledger of a run
    Status(cmd::status::StatusArgs),
    /// Show current configuration
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Progress context (TTY auto-detect); log lines are routed around the bars
    let progress = Arc::new(ProgressContext::new());
    let multi = if progress.is_tty() {
        Some(progress.multi())
    } else {
        None
    };
    init_logging(cli.quiet, cli.debug, multi);

    let loaded = match &cli.config {
        Some(path) => Config::from_file(path),
        None => Config::load(),
    };
    let config = match loaded {
        Ok(c) => c,
        Err(e) => {
            log::error!("Configuration error: {e:#}");
            return ExitCode::from(2);
        }
    };

    let result = match cli.command {
        Command::Fetch(args) => {
            if let Err(e) = setup_signal_handler() {
                log::warn!("Cannot install signal handlers, Ctrl-C will not stop cleanly: {e}");
            }
            cmd::fetch::run(args, &config, &progress)
        }
        Command::Status(args) => cmd::status::run(args, &config).map(|()| ExitCode::SUCCESS),
        Command::Config => {
            print_config(&config);
            Ok(ExitCode::SUCCESS)
        }
    };

    result.unwrap_or_else(|e| {
        log::error!("Fatal error: {e:#}");
        ExitCode::FAILURE
    })
}

/// First SIGINT/SIGTERM stops after the in-flight batch; the second exits.
fn setup_signal_handler() -> std::io::Result<()> {
    // SAFETY: AtomicBool::swap and process::exit are async-signal-safe
    unsafe {
        for signal in [signal_hook::consts::SIGTERM, signal_hook::consts::SIGINT] {
            signal_hook::low_level::register(signal, || {
                if request_shutdown() {
                    std::process::exit(130);
                }
            })?;
        }
    }
    Ok(())
}

fn print_config(config: &Config) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Setting").fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);

    let secret = |v: &Option<String>| if v.is_some() { "configured" } else { "not set" };

    table.add_row(vec![
        "Output directory",
        &config.output.default_dir.display().to_string(),
    ]);
    table.add_row(vec!["Host", &config.socrata.host]);
    table.add_row(vec!["Dataset", &config.download.dataset]);
    table.add_row(vec![
        "Order",
        config.socrata.order.as_deref().unwrap_or("(server default)"),
    ]);
    table.add_row(vec!["App token", secret(&config.socrata.app_token)]);
    table.add_row(vec![
        "Username",
        config.socrata.username.as_deref().unwrap_or("not set"),
    ]);
    table.add_row(vec!["Password", secret(&config.socrata.password)]);
    table.add_row(vec!["Timeout", &format!("{}s", config.http.timeout)]);
    table.add_row(vec!["Retries", &config.http.retries.to_string()]);
    table.add_row(vec!["Retry delay", &format!("{}s", config.http.retry_delay)]);
    table.add_row(vec!["Chunk size", &config.download.chunk_size.to_string()]);
    table.add_row(vec![
        "Sample size",
        &match config.download.sample_size {
            0 => "disabled".to_string(),
            n => n.to_string(),
        },
    ]);

    eprintln!("\n{table}");
}
