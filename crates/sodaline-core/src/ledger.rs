//! Durable per-batch progress ledger
//!
//! One row per batch: index, status, records fetched and the last error.
//! The file form is a CSV table (`Batch,Status,Length,Error`, header plus one
//! row per batch in index order) so it can be inspected between runs.
//!
//! The ledger is the commit point of the download: a batch counts as done
//! only once a `persist()` recording it as `Completed` has returned.

use std::fmt;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Header of the ledger file, in column order
pub const LEDGER_COLUMNS: [&str; 4] = ["Batch", "Status", "Length", "Error"];

/// Outcome of a batch so far
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BatchStatus {
    Pending,
    Completed,
    Error,
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "Pending",
            Self::Completed => "Completed",
            Self::Error => "Error",
        })
    }
}

/// One ledger row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRecord {
    #[serde(rename = "Batch")]
    pub batch: usize,
    #[serde(rename = "Status")]
    pub status: BatchStatus,
    #[serde(rename = "Length")]
    pub length: u64,
    #[serde(rename = "Error")]
    pub error: String,
}

impl BatchRecord {
    pub fn pending(batch: usize) -> Self {
        Self {
            batch,
            status: BatchStatus::Pending,
            length: 0,
            error: String::new(),
        }
    }
}

/// Errors reading or writing the ledger
#[derive(Debug)]
pub enum LedgerError {
    Io { path: PathBuf, source: io::Error },
    Csv { path: PathBuf, source: csv::Error },
    /// File parsed but rows are not `0..n` in order
    Corrupt { path: PathBuf, message: String },
    /// Batch index outside the ledger
    UnknownBatch { batch: usize, total: usize },
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "ledger {}: {source}", path.display()),
            Self::Csv { path, source } => write!(f, "ledger {}: {source}", path.display()),
            Self::Corrupt { path, message } => {
                write!(f, "ledger {} is corrupt: {message}", path.display())
            }
            Self::UnknownBatch { batch, total } => {
                write!(f, "batch {batch} is outside the ledger ({total} batches)")
            }
        }
    }
}

impl std::error::Error for LedgerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Csv { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Where ledger rows live between runs.
pub trait LedgerStore {
    /// Stored rows, or `None` when nothing has been stored yet
    fn load(&self) -> Result<Option<Vec<BatchRecord>>, LedgerError>;
    /// Replace the stored rows; must be durable when this returns
    fn save(&self, rows: &[BatchRecord]) -> Result<(), LedgerError>;
    /// Human-readable location, for log lines
    fn location(&self) -> String;
}

/// CSV ledger file, rewritten atomically (tmp + fsync + rename) on save.
#[derive(Debug, Clone)]
pub struct CsvLedgerFile {
    path: PathBuf,
}

impl CsvLedgerFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    fn io_err(&self, source: io::Error) -> LedgerError {
        LedgerError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn csv_err(&self, source: csv::Error) -> LedgerError {
        LedgerError::Csv {
            path: self.path.clone(),
            source,
        }
    }
}

impl LedgerStore for CsvLedgerFile {
    fn load(&self) -> Result<Option<Vec<BatchRecord>>, LedgerError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let mut reader = csv::Reader::from_path(&self.path).map_err(|e| self.csv_err(e))?;

        let headers = reader.headers().map_err(|e| self.csv_err(e))?;
        if headers.iter().ne(LEDGER_COLUMNS) {
            return Err(LedgerError::Corrupt {
                path: self.path.clone(),
                message: format!(
                    "expected columns {}, found {}",
                    LEDGER_COLUMNS.join(","),
                    headers.iter().collect::<Vec<_>>().join(",")
                ),
            });
        }

        let mut rows = Vec::new();
        for (i, row) in reader.deserialize::<BatchRecord>().enumerate() {
            let row = row.map_err(|e| self.csv_err(e))?;
            if row.batch != i {
                return Err(LedgerError::Corrupt {
                    path: self.path.clone(),
                    message: format!("row {} holds batch {}", i + 1, row.batch),
                });
            }
            rows.push(row);
        }
        Ok(Some(rows))
    }

    fn save(&self, rows: &[BatchRecord]) -> Result<(), LedgerError> {
        let tmp = self.tmp_path();
        let file = File::create(&tmp).map_err(|e| self.io_err(e))?;
        let handle = file.try_clone().map_err(|e| self.io_err(e))?;

        // Header written by hand so an empty ledger still has one
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        writer
            .write_record(LEDGER_COLUMNS)
            .map_err(|e| self.csv_err(e))?;
        for row in rows {
            writer.serialize(row).map_err(|e| self.csv_err(e))?;
        }
        writer.flush().map_err(|e| self.io_err(e))?;
        drop(writer);
        handle.sync_all().map_err(|e| self.io_err(e))?;
        drop(handle);

        fs::rename(&tmp, &self.path).map_err(|e| self.io_err(e))?;
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// Tally of ledger rows by status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: usize,
    pub completed: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.pending + self.completed + self.failed
    }
}

/// In-memory ledger backed by a [`LedgerStore`].
///
/// Mutations only touch memory; nothing reaches the store until [`persist`]
/// is called.
///
/// [`persist`]: Ledger::persist
#[derive(Debug)]
pub struct Ledger<S: LedgerStore = CsvLedgerFile> {
    store: S,
    rows: Vec<BatchRecord>,
}

impl Ledger<CsvLedgerFile> {
    /// Open the CSV ledger at `path`, creating it with `total_batches`
    /// pending rows if it does not exist yet.
    pub fn load_or_create(path: &Path, total_batches: usize) -> Result<Self, LedgerError> {
        Self::load_or_create_in(CsvLedgerFile::new(path), total_batches)
    }

    /// Open an existing CSV ledger without creating anything.
    pub fn open_existing(path: &Path) -> Result<Option<Self>, LedgerError> {
        let store = CsvLedgerFile::new(path);
        Ok(store.load()?.map(|rows| Self::from_stored(store, rows)))
    }
}

impl<S: LedgerStore> Ledger<S> {
    /// Load the stored ledger as-is, or create and persist a fresh one.
    ///
    /// An existing ledger is never resized: `total_batches` is only used when
    /// nothing is stored yet.
    pub fn load_or_create_in(store: S, total_batches: usize) -> Result<Self, LedgerError> {
        match store.load()? {
            Some(rows) => Ok(Self::from_stored(store, rows)),
            None => Self::create_in(store, total_batches),
        }
    }

    /// Wrap rows already read from `store`.
    pub fn from_stored(store: S, rows: Vec<BatchRecord>) -> Self {
        log::debug!("Loaded ledger {} ({} batches)", store.location(), rows.len());
        Self { store, rows }
    }

    /// Create a ledger of `total_batches` pending rows and persist it.
    pub fn create_in(store: S, total_batches: usize) -> Result<Self, LedgerError> {
        let rows = (0..total_batches).map(BatchRecord::pending).collect();
        let ledger = Self { store, rows };
        ledger.persist()?;
        log::info!(
            "Created ledger {} ({total_batches} batches)",
            ledger.store.location()
        );
        Ok(ledger)
    }

    pub fn rows(&self) -> &[BatchRecord] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, batch: usize) -> Option<&BatchRecord> {
        self.rows.get(batch)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn row_mut(&mut self, batch: usize) -> Result<&mut BatchRecord, LedgerError> {
        let total = self.rows.len();
        self.rows
            .get_mut(batch)
            .ok_or(LedgerError::UnknownBatch { batch, total })
    }

    pub fn mark_completed(&mut self, batch: usize, length: u64) -> Result<(), LedgerError> {
        let row = self.row_mut(batch)?;
        row.status = BatchStatus::Completed;
        row.length = length;
        row.error.clear();
        Ok(())
    }

    pub fn mark_error(
        &mut self,
        batch: usize,
        message: impl Into<String>,
    ) -> Result<(), LedgerError> {
        let mut message = message.into();
        if message.is_empty() {
            message.push_str("unknown error");
        }
        let row = self.row_mut(batch)?;
        row.status = BatchStatus::Error;
        row.length = 0;
        row.error = message;
        Ok(())
    }

    /// Write every row to the store.
    pub fn persist(&self) -> Result<(), LedgerError> {
        self.store.save(&self.rows)
    }

    /// Indices of batches still to fetch (Pending or Error), ascending.
    pub fn pending_batches(&self) -> impl Iterator<Item = usize> + '_ {
        self.rows
            .iter()
            .filter(|r| r.status != BatchStatus::Completed)
            .map(|r| r.batch)
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for row in &self.rows {
            match row.status {
                BatchStatus::Pending => counts.pending += 1,
                BatchStatus::Completed => counts.completed += 1,
                BatchStatus::Error => counts.failed += 1,
            }
        }
        counts
    }

    /// Records covered by Completed rows, i.e. lines the output must hold
    pub fn committed_records(&self) -> u64 {
        self.rows
            .iter()
            .filter(|r| r.status == BatchStatus::Completed)
            .map(|r| r.length)
            .sum()
    }
}

/// Number of `chunk_size` batches needed to cover `total_rows`.
///
/// `None` for a zero chunk size or a count that does not fit in `usize`.
pub fn batch_count(total_rows: u64, chunk_size: u64) -> Option<usize> {
    if chunk_size == 0 {
        return None;
    }
    usize::try_from(total_rows.div_ceil(chunk_size)).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use tempfile::TempDir;

    /// Store that keeps every saved snapshot in memory
    #[derive(Default)]
    struct MemoryStore {
        initial: Option<Vec<BatchRecord>>,
        saves: RefCell<Vec<Vec<BatchRecord>>>,
    }

    impl LedgerStore for MemoryStore {
        fn load(&self) -> Result<Option<Vec<BatchRecord>>, LedgerError> {
            Ok(self.initial.clone())
        }

        fn save(&self, rows: &[BatchRecord]) -> Result<(), LedgerError> {
            self.saves.borrow_mut().push(rows.to_vec());
            Ok(())
        }

        fn location(&self) -> String {
            "memory".to_string()
        }
    }

    fn row(batch: usize, status: BatchStatus, length: u64, error: &str) -> BatchRecord {
        BatchRecord {
            batch,
            status,
            length,
            error: error.to_string(),
        }
    }

    #[test]
    fn batch_math() {
        assert_eq!(batch_count(125_000, 50_000), Some(3));
        assert_eq!(batch_count(100_000, 50_000), Some(2));
        assert_eq!(batch_count(1, 50_000), Some(1));
        assert_eq!(batch_count(0, 50_000), Some(0));
        assert_eq!(batch_count(3, 1), Some(3));
    }

    #[test]
    fn batch_math_rejects_zero_chunk() {
        assert_eq!(batch_count(10, 0), None);
        assert_eq!(batch_count(0, 0), None);
    }

    #[test]
    fn create_initializes_pending_and_persists() {
        let ledger = Ledger::load_or_create_in(MemoryStore::default(), 3).unwrap();
        assert_eq!(ledger.len(), 3);
        assert!(ledger
            .rows()
            .iter()
            .enumerate()
            .all(|(i, r)| *r == BatchRecord::pending(i)));
        assert_eq!(ledger.store().saves.borrow().len(), 1);
    }

    #[test]
    fn existing_ledger_is_not_resized() {
        let store = MemoryStore {
            initial: Some(vec![BatchRecord::pending(0), BatchRecord::pending(1)]),
            ..Default::default()
        };
        let ledger = Ledger::load_or_create_in(store, 5).unwrap();
        assert_eq!(ledger.len(), 2);
        assert!(ledger.store().saves.borrow().is_empty());
    }

    #[test]
    fn marks_only_reach_store_on_persist() {
        let mut ledger = Ledger::load_or_create_in(MemoryStore::default(), 2).unwrap();
        ledger.mark_completed(0, 10).unwrap();
        assert_eq!(ledger.store().saves.borrow().len(), 1);

        ledger.persist().unwrap();
        let saves = ledger.store().saves.borrow();
        assert_eq!(saves.len(), 2);
        assert_eq!(saves[1][0], row(0, BatchStatus::Completed, 10, ""));
    }

    #[test]
    fn mark_error_resets_length() {
        let mut ledger = Ledger::load_or_create_in(MemoryStore::default(), 1).unwrap();
        ledger.mark_completed(0, 10).unwrap();
        ledger.mark_error(0, "timed out").unwrap();
        assert_eq!(ledger.rows()[0], row(0, BatchStatus::Error, 0, "timed out"));

        ledger.mark_error(0, "").unwrap();
        assert_eq!(ledger.rows()[0].error, "unknown error");

        ledger.mark_completed(0, 4).unwrap();
        assert_eq!(ledger.rows()[0], row(0, BatchStatus::Completed, 4, ""));
    }

    #[test]
    fn unknown_batch_is_rejected() {
        let mut ledger = Ledger::load_or_create_in(MemoryStore::default(), 1).unwrap();
        let err = ledger.mark_completed(3, 1).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::UnknownBatch { batch: 3, total: 1 }
        ));
    }

    #[test]
    fn pending_batches_include_errors_in_order() {
        let store = MemoryStore {
            initial: Some(vec![
                row(0, BatchStatus::Completed, 5, ""),
                row(1, BatchStatus::Error, 0, "boom"),
                row(2, BatchStatus::Pending, 0, ""),
                row(3, BatchStatus::Completed, 5, ""),
            ]),
            ..Default::default()
        };
        let ledger = Ledger::load_or_create_in(store, 4).unwrap();
        assert_eq!(ledger.pending_batches().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(
            ledger.counts(),
            StatusCounts {
                pending: 1,
                completed: 2,
                failed: 1
            }
        );
        assert_eq!(ledger.committed_records(), 10);
    }

    #[test]
    fn csv_round_trip_preserves_rows_and_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("progress.csv");
        let rows = vec![
            row(0, BatchStatus::Completed, 50_000, ""),
            row(1, BatchStatus::Pending, 0, ""),
        ];

        CsvLedgerFile::new(&path).save(&rows).unwrap();
        let loaded = CsvLedgerFile::new(&path).load().unwrap().unwrap();
        assert_eq!(loaded, rows);

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "Batch,Status,Length,Error\n0,Completed,50000,\n1,Pending,0,\n"
        );
    }

    #[test]
    fn csv_quotes_messages_with_commas_and_newlines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("progress.csv");
        let rows = vec![row(0, BatchStatus::Error, 0, "HTTP 500: bad, worse\nworst")];

        CsvLedgerFile::new(&path).save(&rows).unwrap();
        assert_eq!(CsvLedgerFile::new(&path).load().unwrap().unwrap(), rows);
    }

    #[test]
    fn csv_empty_ledger_keeps_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("progress.csv");

        let ledger = Ledger::load_or_create(&path, 0).unwrap();
        assert!(ledger.is_empty());
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "Batch,Status,Length,Error\n"
        );
        assert_eq!(CsvLedgerFile::new(&path).load().unwrap(), Some(vec![]));
    }

    #[test]
    fn csv_missing_file_loads_none() {
        let dir = TempDir::new().unwrap();
        let store = CsvLedgerFile::new(dir.path().join("nope.csv"));
        assert!(store.load().unwrap().is_none());
        assert!(Ledger::open_existing(store.path()).unwrap().is_none());
    }

    #[test]
    fn csv_save_leaves_no_tmp_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("progress.csv");
        Ledger::load_or_create(&path, 2).unwrap();
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("progress.csv")]);
    }

    #[test]
    fn csv_out_of_order_rows_are_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("progress.csv");
        fs::write(
            &path,
            "Batch,Status,Length,Error\n0,Pending,0,\n2,Pending,0,\n",
        )
        .unwrap();
        let err = CsvLedgerFile::new(&path).load().unwrap_err();
        assert!(matches!(err, LedgerError::Corrupt { .. }), "{err}");
    }

    #[test]
    fn csv_wrong_header_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("progress.csv");
        fs::write(&path, "Index,State\n0,Pending\n").unwrap();
        let err = CsvLedgerFile::new(&path).load().unwrap_err();
        assert!(matches!(err, LedgerError::Corrupt { .. }), "{err}");
    }

    #[test]
    fn csv_unknown_status_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("progress.csv");
        fs::write(&path, "Batch,Status,Length,Error\n0,Done,0,\n").unwrap();
        assert!(matches!(
            CsvLedgerFile::new(&path).load(),
            Err(LedgerError::Csv { .. })
        ));
    }
}
