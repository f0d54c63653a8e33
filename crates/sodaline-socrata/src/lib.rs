//! Sodaline Socrata - resumable batch downloads from Socrata open data portals
//!
//! Splits a dataset into fixed-size `$limit`/`$offset` batches, records each
//! batch's outcome in a CSV ledger and appends fetched records to a single
//! NDJSON file. Rerunning with the same dataset and date key resumes where
//! the previous run stopped.
//!
//! # Example
//!
//! ```ignore
//! use sodaline_socrata::{ClientConfig, Config, run};
//!
//! let config = Config {
//!     dataset: "jbjy-vk9h".into(),
//!     output_dir: "data".into(),
//!     ..Default::default()
//! };
//!
//! let progress = sodaline_core::ProgressContext::new();
//! let summary = run(&config, &ClientConfig::default(), &progress)?;
//! println!("Appended {} records", summary.records);
//! ```

pub mod api;
pub mod config;
pub mod runner;
pub mod source;
pub mod state;
pub mod summary;
pub mod worker;

// Re-exports
pub use api::{ClientConfig, SocrataClient};
pub use config::Config;
pub use runner::{Summary, run, run_with};
pub use source::RecordSource;
pub use state::{BatchOutcome, RunPaths, today_key};
