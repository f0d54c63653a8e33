//! Sodaline Core - infrastructure for resumable batch downloads
//!
//! This crate provides the pieces every remote source shares: the bounded
//! retry combinator, the durable per-batch ledger, the append-only NDJSON
//! output, HTTP plumbing, logging and progress reporting.

pub mod http;
pub mod ledger;
pub mod logging;
pub mod ndjson;
pub mod progress;
pub mod retry;
pub mod shutdown;

// Re-exports for convenience
pub use http::{HttpError, SHARED_RUNTIME, http_client};
pub use ledger::{
    BatchRecord, BatchStatus, CsvLedgerFile, Ledger, LedgerError, LedgerStore, StatusCounts,
    batch_count,
};
pub use logging::{RunLogger, attach_log_file, init_logging};
pub use ndjson::{NdjsonOutput, TailRepair, write_batch_file};
pub use progress::{ProgressContext, SharedProgress, fmt_num};
pub use retry::{RetryError, RetryPolicy, retry};
pub use shutdown::{is_shutdown_requested, request_shutdown, shutdown_flag};
