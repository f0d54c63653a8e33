//! Pre-download sample summary: a first look at the columns before the
//! long batch loop starts.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::Context;
use indicatif::ProgressBar;
use serde::Serialize;
use serde_json::Value;
use sodaline_core::retry;

use crate::config::Config;
use crate::source::RecordSource;

/// Sample values kept per column
const SAMPLE_VALUES: usize = 5;

/// Column overview of a record sample
#[derive(Debug, Serialize)]
pub struct SampleSummary {
    pub dataset: String,
    pub sampled_rows: usize,
    pub columns: Vec<ColumnSummary>,
}

#[derive(Debug, Serialize)]
pub struct ColumnSummary {
    pub name: String,
    /// JSON kinds seen for this column (`string`, `number`, ...)
    pub kinds: BTreeSet<&'static str>,
    /// Rows where the column is missing or null
    pub nulls: usize,
    /// Distinct non-null values
    pub distinct: usize,
    pub samples: Vec<String>,
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Summarize the columns of `records`, in order of first appearance.
///
/// Records that are not JSON objects carry no columns and are skipped.
pub fn summarize(dataset: &str, records: &[Value]) -> SampleSummary {
    let mut columns: Vec<ColumnSummary> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut distinct: Vec<HashSet<String>> = Vec::new();
    let mut present: Vec<usize> = Vec::new();
    let mut rows = 0usize;

    for (i, record) in records.iter().enumerate() {
        let Some(fields) = record.as_object() else {
            log::debug!("Skipping sample record {i}: not an object");
            continue;
        };
        rows += 1;
        for (name, value) in fields {
            let col = *index.entry(name.clone()).or_insert_with(|| {
                columns.push(ColumnSummary {
                    name: name.clone(),
                    kinds: BTreeSet::new(),
                    nulls: 0,
                    distinct: 0,
                    samples: Vec::new(),
                });
                distinct.push(HashSet::new());
                present.push(0);
                columns.len() - 1
            });

            let column = &mut columns[col];
            column.kinds.insert(kind(value));
            if value.is_null() {
                continue;
            }
            present[col] += 1;
            let text = display(value);
            if column.samples.len() < SAMPLE_VALUES {
                column.samples.push(text.clone());
            }
            distinct[col].insert(text);
        }
    }

    for (col, column) in columns.iter_mut().enumerate() {
        column.distinct = distinct[col].len();
        column.nulls = rows - present[col];
    }

    SampleSummary {
        dataset: dataset.to_string(),
        sampled_rows: rows,
        columns,
    }
}

impl SampleSummary {
    /// Log shape and column kinds.
    pub fn log(&self) {
        log::info!(
            "Sample rows: {}, columns: {}",
            self.sampled_rows,
            self.columns.len()
        );
        for column in &self.columns {
            let kinds: Vec<&str> = column.kinds.iter().copied().collect();
            log::info!(
                "  {:<40} {:<20} nulls={} distinct={}",
                column.name,
                kinds.join("|"),
                column.nulls,
                column.distinct
            );
        }
    }

    pub fn write_to(&self, path: &Path) -> anyhow::Result<()> {
        let file =
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
        let mut out = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut out, self).context("failed to serialize summary")?;
        out.write_all(b"\n")?;
        out.flush()?;
        Ok(())
    }
}

/// Fetch the first `sample_size` records, log their shape and save the
/// summary to `path`.
///
/// Best effort: a failed fetch or write is logged and the download goes on.
pub fn export<S: RecordSource>(
    source: &S,
    config: &Config,
    sample_size: u64,
    path: &Path,
    pb: &ProgressBar,
) -> Option<SampleSummary> {
    let sample = match retry("sample", &config.retry, pb, || {
        source.fetch(&config.dataset, sample_size, 0)
    }) {
        Ok(records) if !records.is_empty() => records,
        Ok(_) => {
            log::warn!("Sample for {} is empty, no summary written", config.dataset);
            return None;
        }
        Err(e) => {
            log::warn!("Could not fetch sample records for summary: {e}");
            return None;
        }
    };

    let summary = summarize(&config.dataset, &sample);
    summary.log();
    match summary.write_to(path) {
        Ok(()) => log::info!("Saved summary to {}", path.display()),
        Err(e) => log::warn!("Could not save summary: {e:#}"),
    }
    Some(summary)
}
