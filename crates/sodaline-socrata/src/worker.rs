//! Fetch-and-persist for a single batch

use indicatif::ProgressBar;
use sodaline_core::{NdjsonOutput, retry, write_batch_file};

use crate::config::Config;
use crate::source::RecordSource;
use crate::state::{BatchOutcome, RunPaths};

/// Fetch one batch and append it to the main output.
///
/// The records go to the batch's temp file first, then to the main output,
/// and the temp file is removed afterwards unless `keep_temp` is set. If the
/// append is interrupted the temp file stays behind as a copy of the batch.
///
/// Never fails: every problem becomes [`BatchOutcome::Failed`] so the caller
/// can record it and carry on with the next batch. The ledger is not touched.
pub fn process_batch<S: RecordSource>(
    source: &S,
    config: &Config,
    paths: &RunPaths,
    output: &NdjsonOutput,
    batch: usize,
    pb: &ProgressBar,
) -> BatchOutcome {
    let offset = batch as u64 * config.chunk_size;
    let label = format!("batch {batch} (offset={offset})");

    let records = match retry(&label, &config.retry, pb, || {
        source.fetch(&config.dataset, config.chunk_size, offset)
    }) {
        Ok(records) => records,
        Err(e) => {
            log::error!("Giving up on {label}: {e}");
            return BatchOutcome::Failed {
                message: e.to_string(),
                output_dirty: false,
            };
        }
    };
    pb.set_message(String::new());

    let temp = paths.batch_file(batch);
    if let Err(e) = write_batch_file(&temp, &records) {
        log::error!("{label}: cannot write {}: {e}", temp.display());
        // Best effort, a partial temp file is useless
        let _ = std::fs::remove_file(&temp);
        return BatchOutcome::Failed {
            message: format!("writing batch file: {e}"),
            output_dirty: false,
        };
    }

    if let Err(e) = output.append(&records) {
        log::error!(
            "{label}: append to {} failed: {e}; batch copy kept at {}",
            output.path().display(),
            temp.display()
        );
        return BatchOutcome::Failed {
            message: format!("appending to output: {e}"),
            output_dirty: true,
        };
    }

    if !config.keep_temp {
        if let Err(e) = std::fs::remove_file(&temp) {
            log::warn!("{label}: could not remove {}: {e}", temp.display());
        }
    }

    if (records.len() as u64) < config.chunk_size {
        log::debug!("{label}: short batch ({} records)", records.len());
    }

    BatchOutcome::Completed {
        records: records.len() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use sodaline_core::RetryPolicy;
    use std::cell::Cell;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixed {
        records: Vec<Value>,
        fail: bool,
        calls: Cell<u32>,
    }

    impl RecordSource for Fixed {
        type Error = String;

        fn count(&self, _: &str) -> Result<u64, String> {
            Ok(self.records.len() as u64)
        }

        fn fetch(&self, _: &str, limit: u64, offset: u64) -> Result<Vec<Value>, String> {
            self.calls.set(self.calls.get() + 1);
            if self.fail {
                return Err("service unavailable".to_string());
            }
            Ok(self
                .records
                .iter()
                .skip(offset as usize)
                .take(limit as usize)
                .cloned()
                .collect())
        }
    }

    fn setup(dir: &TempDir, keep_temp: bool) -> (Config, RunPaths, NdjsonOutput) {
        let config = Config {
            dataset: "test-0001".to_string(),
            chunk_size: 2,
            retry: RetryPolicy::new(3, Duration::ZERO),
            output_dir: dir.path().to_path_buf(),
            date_key: "01012025".to_string(),
            keep_temp,
            sample_size: None,
        };
        let paths = RunPaths::new(dir.path(), &config.dataset, &config.date_key);
        let output = NdjsonOutput::new(&paths.output);
        (config, paths, output)
    }

    fn source(n: usize, fail: bool) -> Fixed {
        Fixed {
            records: (0..n).map(|i| json!({ "id": i })).collect(),
            fail,
            calls: Cell::new(0),
        }
    }

    #[test]
    fn completed_batch_appends_and_removes_temp() {
        let dir = TempDir::new().unwrap();
        let (config, paths, output) = setup(&dir, false);
        let src = source(5, false);

        let outcome = process_batch(&src, &config, &paths, &output, 1, &ProgressBar::hidden());
        assert_eq!(outcome, BatchOutcome::Completed { records: 2 });
        assert_eq!(
            std::fs::read_to_string(output.path()).unwrap(),
            "{\"id\":2}\n{\"id\":3}\n"
        );
        assert!(!paths.batch_file(1).exists());
    }

    #[test]
    fn keep_temp_leaves_batch_copy() {
        let dir = TempDir::new().unwrap();
        let (config, paths, output) = setup(&dir, true);
        let src = source(5, false);

        process_batch(&src, &config, &paths, &output, 2, &ProgressBar::hidden());
        assert_eq!(
            std::fs::read_to_string(paths.batch_file(2)).unwrap(),
            "{\"id\":4}\n"
        );
    }

    #[test]
    fn empty_page_completes_with_zero() {
        let dir = TempDir::new().unwrap();
        let (config, paths, output) = setup(&dir, false);
        let src = source(1, false);

        let outcome = process_batch(&src, &config, &paths, &output, 4, &ProgressBar::hidden());
        assert_eq!(outcome, BatchOutcome::Completed { records: 0 });
        assert!(output.is_empty().unwrap());
    }

    #[test]
    fn exhausted_fetch_fails_after_policy_attempts() {
        let dir = TempDir::new().unwrap();
        let (config, paths, output) = setup(&dir, false);
        let src = source(5, true);

        let outcome = process_batch(&src, &config, &paths, &output, 0, &ProgressBar::hidden());
        assert_eq!(src.calls.get(), 3);
        match outcome {
            BatchOutcome::Failed {
                message,
                output_dirty,
            } => {
                assert!(message.contains("service unavailable"), "{message}");
                assert!(!output_dirty);
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(!output.path().exists());
        assert!(!paths.batch_file(0).exists());
    }
}
