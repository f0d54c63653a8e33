//! Run naming and per-batch outcomes

use std::path::{Path, PathBuf};

/// Today's date key in the `%m%d%Y` form used in file names
pub fn today_key() -> String {
    chrono::Local::now().format("%m%d%Y").to_string()
}

/// Every file a run-series reads or writes, named from dataset id + date key.
///
/// Two invocations with the same dataset and date share ledger and output,
/// which is what makes a restarted run resume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPaths {
    pub dir: PathBuf,
    pub dataset: String,
    pub date_key: String,
    /// Main NDJSON output
    pub output: PathBuf,
    /// Progress ledger (CSV)
    pub ledger: PathBuf,
    /// Sample summary (JSON)
    pub summary: PathBuf,
    /// Run log
    pub log: PathBuf,
}

impl RunPaths {
    pub fn new(dir: &Path, dataset: &str, date_key: &str) -> Self {
        Self {
            dir: dir.to_path_buf(),
            dataset: dataset.to_string(),
            date_key: date_key.to_string(),
            output: dir.join(format!("{dataset}_{date_key}.json")),
            ledger: dir.join(format!("progress_{dataset}_{date_key}.csv")),
            summary: dir.join(format!("summary_{dataset}_{date_key}.json")),
            log: dir.join(format!("sodaline_{dataset}_{date_key}.log")),
        }
    }

    /// Temp file one batch is written to before it is appended
    pub fn batch_file(&self, batch: usize) -> PathBuf {
        self.dir.join(format!(
            "{}_batch_{batch}_{}.ndjson",
            self.dataset, self.date_key
        ))
    }

    /// Batch index encoded in a temp file name belonging to this run-series
    pub fn parse_batch_file(&self, file_name: &str) -> Option<usize> {
        file_name
            .strip_prefix(&format!("{}_batch_", self.dataset))?
            .strip_suffix(&format!("_{}.ndjson", self.date_key))?
            .parse()
            .ok()
    }

    /// Temp files left behind by earlier runs of this series, sorted
    pub fn leftover_batch_files(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut found = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_ours = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| self.parse_batch_file(n).is_some());
            if is_ours && path.is_file() {
                found.push(path);
            }
        }
        found.sort();
        Ok(found)
    }
}

/// How one batch ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Records fetched, appended and synced
    Completed { records: u64 },
    /// Fetch exhausted its retries or a local write failed.
    ///
    /// `output_dirty` is set when the failure happened during the append, so
    /// the main output may hold part of this batch.
    Failed { message: String, output_dirty: bool },
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn paths() -> RunPaths {
        RunPaths::new(Path::new("/data"), "jbjy-vk9h", "10062025")
    }

    #[test]
    fn file_names() {
        let p = paths();
        assert_eq!(p.output, PathBuf::from("/data/jbjy-vk9h_10062025.json"));
        assert_eq!(
            p.ledger,
            PathBuf::from("/data/progress_jbjy-vk9h_10062025.csv")
        );
        assert_eq!(
            p.summary,
            PathBuf::from("/data/summary_jbjy-vk9h_10062025.json")
        );
        assert_eq!(
            p.batch_file(7),
            PathBuf::from("/data/jbjy-vk9h_batch_7_10062025.ndjson")
        );
    }

    #[test]
    fn parse_batch_file_round_trip() {
        let p = paths();
        assert_eq!(p.parse_batch_file("jbjy-vk9h_batch_12_10062025.ndjson"), Some(12));
    }

    #[test]
    fn parse_batch_file_other_series() {
        let p = paths();
        assert_eq!(p.parse_batch_file("jbjy-vk9h_batch_12_10072025.ndjson"), None);
        assert_eq!(p.parse_batch_file("other_batch_12_10062025.ndjson"), None);
        assert_eq!(p.parse_batch_file("jbjy-vk9h_batch_x_10062025.ndjson"), None);
        assert_eq!(p.parse_batch_file("jbjy-vk9h_10062025.json"), None);
    }

    #[test]
    fn leftover_batch_files_only_lists_series() {
        let dir = TempDir::new().unwrap();
        let p = RunPaths::new(dir.path(), "abcd-1234", "01022025");
        std::fs::write(p.batch_file(3), "").unwrap();
        std::fs::write(p.batch_file(1), "").unwrap();
        std::fs::write(&p.output, "").unwrap();
        std::fs::write(dir.path().join("abcd-1234_batch_1_01032025.ndjson"), "").unwrap();

        let found = p.leftover_batch_files().unwrap();
        assert_eq!(found, vec![p.batch_file(1), p.batch_file(3)]);
    }

    #[test]
    fn today_key_shape() {
        let key = today_key();
        assert_eq!(key.len(), 8);
        assert!(key.chars().all(|c| c.is_ascii_digit()));
    }
}
