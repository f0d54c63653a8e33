//! Main runner for the resumable batch download
//!
//! Row count → batch plan → ledger → one batch at a time, each followed by
//! a ledger persist. Strictly sequential: the ledger and the output each have
//! exactly one writer.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use indicatif::ProgressBar;
use sodaline_core::{
    CsvLedgerFile, Ledger, LedgerStore, NdjsonOutput, ProgressContext, TailRepair, batch_count,
    fmt_num, is_shutdown_requested, retry,
};

use crate::api::{ClientConfig, SocrataClient};
use crate::config::Config;
use crate::source::RecordSource;
use crate::state::{BatchOutcome, RunPaths};
use crate::{summary, worker};

/// Run execution summary
#[derive(Debug, Clone)]
pub struct Summary {
    pub total_rows: u64,
    /// Batches in the ledger (may differ from the plan for an old ledger)
    pub total_batches: usize,
    /// Batches already Completed before this run
    pub skipped_batches: usize,
    pub completed_batches: usize,
    pub failed_batches: usize,
    /// Records appended by this run
    pub records: u64,
    /// Stopped early on a shutdown request
    pub interrupted: bool,
    pub elapsed: Duration,
}

impl Summary {
    /// Batches still Pending or Error after this run
    pub fn remaining_batches(&self) -> usize {
        self.total_batches - self.skipped_batches - self.completed_batches
    }
}

/// Run the download against the Socrata API, with the CSV ledger from
/// `config`'s run paths.
pub fn run(config: &Config, client: &ClientConfig, progress: &ProgressContext) -> Result<Summary> {
    let source = SocrataClient::new(client.clone()).context("Failed to build HTTP client")?;
    log::info!("Source: {}", source.resource_url(&config.dataset));
    let paths = RunPaths::new(&config.output_dir, &config.dataset, &config.date_key);
    run_with(&source, CsvLedgerFile::new(&paths.ledger), config, progress)
}

/// Run the download against any source and ledger store.
///
/// Fails only when no batch plan can be formed (row count exhausted its
/// retries) or when local state cannot be kept consistent (ledger persist,
/// output repair). Individual batch failures are recorded in the ledger.
pub fn run_with<S: RecordSource, L: LedgerStore>(
    source: &S,
    store: L,
    config: &Config,
    progress: &ProgressContext,
) -> Result<Summary> {
    let start = Instant::now();
    config.validate()?;

    let paths = RunPaths::new(&config.output_dir, &config.dataset, &config.date_key);
    std::fs::create_dir_all(&paths.dir).context("Failed to create output directory")?;

    log::info!("Starting resumable download for dataset {}", config.dataset);

    let total_rows = retry("row count", &config.retry, &ProgressBar::hidden(), || {
        source.count(&config.dataset)
    })
    .map_err(|e| {
        log::error!("Could not get row count for {}: {e}", config.dataset);
        anyhow::anyhow!("Failed to get row count for {}: {e}", config.dataset)
    })?;
    let planned_batches = batch_count(total_rows, config.chunk_size).with_context(|| {
        format!(
            "Cannot split {total_rows} rows into batches of {}",
            config.chunk_size
        )
    })?;
    log::info!(
        "Total rows: {}, total batches (chunk_size={}): {}",
        fmt_num(total_rows),
        fmt_num(config.chunk_size),
        planned_batches
    );

    if let Some(n) = config.sample_size {
        summary::export(source, config, n, &paths.summary, &ProgressBar::hidden());
    }

    let output = NdjsonOutput::new(&paths.output);
    let mut ledger = open_ledger(store, planned_batches, &output)?;
    if ledger.len() != planned_batches {
        log::warn!(
            "Ledger {} has {} batches but the dataset now needs {}; keeping the ledger \
             (start a new series with a different date key to re-plan)",
            ledger.store().location(),
            ledger.len(),
            planned_batches
        );
    }

    repair_output(&output, ledger.committed_records())?;
    output
        .ensure_exists()
        .with_context(|| format!("Failed to create {}", output.path().display()))?;
    handle_leftover_batch_files(&paths, config.keep_temp);

    let pending: Vec<usize> = ledger.pending_batches().collect();
    let total_batches = ledger.len();
    let skipped_batches = total_batches - pending.len();
    if skipped_batches > 0 {
        log::info!("Resuming: {skipped_batches}/{total_batches} batches already completed");
    }

    let pb = progress.batch_bar(&config.dataset, total_batches, skipped_batches);
    let mut completed_batches = 0usize;
    let mut failed_batches = 0usize;
    let mut records = 0u64;
    let mut interrupted = false;

    for batch in pending {
        if is_shutdown_requested() {
            log::warn!("Shutdown requested, stopping before batch {batch}");
            interrupted = true;
            break;
        }

        let offset = batch as u64 * config.chunk_size;
        let status = ledger.get(batch).map(|r| r.status);
        log::info!(
            "Processing batch {}/{} (offset={}) - status: {}",
            batch + 1,
            total_batches,
            offset,
            status.map_or_else(|| "?".to_string(), |s| s.to_string())
        );

        match worker::process_batch(source, config, &paths, &output, batch, &pb) {
            BatchOutcome::Completed { records: n } => {
                ledger.mark_completed(batch, n)?;
                ledger.persist().context("Failed to save progress ledger")?;
                completed_batches += 1;
                records += n;
                log::info!("Batch {batch} completed ({} records). Progress saved.", fmt_num(n));
            }
            BatchOutcome::Failed {
                message,
                output_dirty,
            } => {
                if output_dirty {
                    repair_output(&output, ledger.committed_records())?;
                }
                ledger.mark_error(batch, message)?;
                ledger.persist().context("Failed to save progress ledger")?;
                failed_batches += 1;
                log::error!(
                    "Batch {batch} failed; progress saved to {}",
                    ledger.store().location()
                );
            }
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    let summary = Summary {
        total_rows,
        total_batches,
        skipped_batches,
        completed_batches,
        failed_batches,
        records,
        interrupted,
        elapsed: start.elapsed(),
    };
    log_summary(&summary, &output);
    Ok(summary)
}

/// Load the stored ledger, or create one when the output holds nothing yet.
///
/// Output lines are tied to ledger rows by position, so a fresh ledger over
/// a non-empty output is refused before anything is written.
fn open_ledger<L: LedgerStore>(
    store: L,
    planned_batches: usize,
    output: &NdjsonOutput,
) -> Result<Ledger<L>> {
    let location = store.location();
    if let Some(rows) = store
        .load()
        .with_context(|| format!("Failed to open progress ledger {location}"))?
    {
        return Ok(Ledger::from_stored(store, rows));
    }

    let existing = output
        .len()
        .with_context(|| format!("Failed to stat {}", output.path().display()))?;
    if existing > 0 {
        anyhow::bail!(
            "{} already has {existing} bytes but there is no progress ledger at {location}; \
             move the file away or pick another --date",
            output.path().display()
        );
    }
    Ledger::create_in(store, planned_batches)
        .with_context(|| format!("Failed to create progress ledger {location}"))
}

/// Cut lines past the ledger's committed records off the output.
///
/// An output shorter than the ledger has lost committed records; appending
/// to it would misalign every later batch, so the run stops instead.
fn repair_output(output: &NdjsonOutput, committed: u64) -> Result<()> {
    let path = output.path().display();
    match output
        .repair_tail(committed)
        .with_context(|| format!("Failed to check {path}"))?
    {
        TailRepair::Clean => {}
        TailRepair::Trimmed { lines, bytes } => log::warn!(
            "Removed {lines} uncommitted lines ({bytes} bytes) from the end of {path}"
        ),
        TailRepair::Short { found } => anyhow::bail!(
            "{path} has {found} lines but the ledger records {committed} completed records; \
             restore the file or pick another --date"
        ),
    }
    Ok(())
}

/// Temp files from an interrupted run hold batches that are still pending.
fn handle_leftover_batch_files(paths: &RunPaths, keep_temp: bool) {
    let leftovers = match paths.leftover_batch_files() {
        Ok(files) => files,
        Err(e) => {
            log::warn!("Cannot scan {} for batch files: {e}", paths.dir.display());
            return;
        }
    };
    for file in leftovers {
        if keep_temp {
            log::warn!("Found batch file from an earlier run: {}", file.display());
        } else {
            log::warn!("Removing stale batch file: {}", file.display());
            if let Err(e) = std::fs::remove_file(&file) {
                log::warn!("Could not remove {}: {e}", file.display());
            }
        }
    }
}

fn log_summary(summary: &Summary, output: &NdjsonOutput) {
    log::info!("=== Download Summary ===");
    log::info!(
        "Batches: {} completed, {} failed, {} already done, {} remaining (of {})",
        summary.completed_batches,
        summary.failed_batches,
        summary.skipped_batches,
        summary.remaining_batches(),
        summary.total_batches
    );
    log::info!("Records appended: {}", fmt_num(summary.records));
    if summary.interrupted {
        log::warn!("Run interrupted; rerun the same command to resume");
    } else {
        log::info!(
            "All batches processed or attempted. Main file: {}",
            output.path().display()
        );
    }
    log::info!("Elapsed time: {:.2} seconds", summary.elapsed.as_secs_f64());
}
