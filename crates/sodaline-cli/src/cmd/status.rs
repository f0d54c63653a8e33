//! Status subcommand - summarize a run's progress ledger

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

use sodaline_core::{BatchStatus, Ledger, NdjsonOutput, fmt_num};
use sodaline_socrata::{RunPaths, today_key};

use crate::config::Config;

use super::parse_date_key;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Socrata dataset id
    #[arg(short, long)]
    pub dataset: Option<String>,

    /// Run date (MMDDYYYY or YYYY-MM-DD), today when omitted
    #[arg(long, value_parser = parse_date_key)]
    pub date: Option<String>,

    /// Directory holding the run files
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

pub fn run(args: StatusArgs, config: &Config) -> Result<()> {
    let dataset = args
        .dataset
        .unwrap_or_else(|| config.download.dataset.clone());
    let date_key = args.date.unwrap_or_else(today_key);
    let dir = args
        .output
        .unwrap_or_else(|| config.output.default_dir.clone());
    let paths = RunPaths::new(&dir, &dataset, &date_key);

    let Some(ledger) = Ledger::open_existing(&paths.ledger)
        .with_context(|| format!("Failed to read {}", paths.ledger.display()))?
    else {
        anyhow::bail!(
            "No progress ledger for {dataset} on {date_key} at {}",
            paths.ledger.display()
        );
    };

    let counts = ledger.counts();
    let output = NdjsonOutput::new(&paths.output);
    let lines = output
        .count_lines()
        .with_context(|| format!("Failed to read {}", paths.output.display()))?;

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new(format!("{dataset} ({date_key})")).fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);
    table.add_row(vec![
        Cell::new("Batches"),
        Cell::new(counts.total().to_string()),
    ]);
    table.add_row(vec![
        Cell::new("Completed"),
        Cell::new(counts.completed.to_string()).fg(Color::Green),
    ]);
    table.add_row(vec![
        Cell::new("Pending"),
        Cell::new(counts.pending.to_string()),
    ]);
    table.add_row(vec![
        Cell::new("Error"),
        Cell::new(counts.failed.to_string()).fg(if counts.failed > 0 {
            Color::Red
        } else {
            Color::Reset
        }),
    ]);
    table.add_row(vec![
        Cell::new("Records committed"),
        Cell::new(fmt_num(ledger.committed_records())),
    ]);
    table.add_row(vec![
        Cell::new("Output lines"),
        Cell::new(format!("{} ({})", fmt_num(lines), paths.output.display())),
    ]);
    eprintln!("\n{table}");

    let committed = ledger.committed_records();
    if lines > committed {
        log::warn!(
            "Output has {lines} lines but the ledger commits {committed}; \
             the next fetch trims the uncommitted tail"
        );
    } else if lines < committed {
        log::warn!(
            "Output has {lines} lines but the ledger commits {committed}; \
             the next fetch will refuse to append until the file is restored"
        );
    }

    let failed: Vec<_> = ledger
        .rows()
        .iter()
        .filter(|r| r.status == BatchStatus::Error)
        .collect();
    if !failed.is_empty() {
        let mut errors = Table::new();
        errors
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![
                Cell::new("Batch").fg(Color::Cyan),
                Cell::new("Error").fg(Color::Cyan),
            ]);
        for row in failed {
            errors.add_row(vec![Cell::new(row.batch), Cell::new(&row.error)]);
        }
        eprintln!("\n{errors}");
    }

    Ok(())
}
