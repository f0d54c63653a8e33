//! Download run configuration

use std::path::PathBuf;

use sodaline_core::RetryPolicy;

use crate::state::today_key;

/// Runtime configuration for one download run
#[derive(Debug, Clone)]
pub struct Config {
    /// Socrata dataset id (four-by-four, e.g. `jbjy-vk9h`)
    pub dataset: String,
    /// Records per batch
    pub chunk_size: u64,
    /// Retry policy for the row count and each batch fetch
    pub retry: RetryPolicy,
    /// Directory for output, ledger, summary and log files
    pub output_dir: PathBuf,
    /// Date part of every file name (`%m%d%Y`); fixes the run-series
    pub date_key: String,
    /// Keep per-batch temp files after they were appended
    pub keep_temp: bool,
    /// Records to sample for the pre-download summary (`None` skips it)
    pub sample_size: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dataset: "jbjy-vk9h".to_string(),
            chunk_size: 50_000,
            retry: RetryPolicy::default(),
            output_dir: PathBuf::from("."),
            date_key: today_key(),
            keep_temp: false,
            sample_size: Some(100),
        }
    }
}

impl Config {
    /// Reject settings the pipeline cannot work with
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.dataset.trim().is_empty(), "dataset id is empty");
        anyhow::ensure!(
            !self.dataset.contains(['/', '\\']),
            "dataset id {:?} contains a path separator",
            self.dataset
        );
        anyhow::ensure!(self.chunk_size > 0, "chunk size must be positive");
        anyhow::ensure!(!self.date_key.is_empty(), "date key is empty");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.dataset, "jbjy-vk9h");
        assert_eq!(config.chunk_size, 50_000);
        assert_eq!(config.retry.attempts, 5);
        assert_eq!(config.sample_size, Some(100));
        assert!(!config.keep_temp);
        assert_eq!(config.date_key.len(), 8);
        config.validate().unwrap();
    }

    #[test]
    fn zero_chunk_size_rejected() {
        let config = Config {
            chunk_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn path_like_dataset_rejected() {
        let config = Config {
            dataset: "../etc".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
